//! Dense vector primitives shared by the ANN optimizer and the in-memory
//! store.

/// Cosine similarity: dot product over the product of norms.
/// Returns 0 when either norm is 0 or the dimensions mismatch, which keeps
/// empty centroids out of every similarity-ranked selection.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Euclidean distance. Returns +infinity on dimension mismatch; the mismatch
/// is a defensive contract, never expected in normal operation.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }

    let mut sum = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = (*x as f64) - (*y as f64);
        sum += diff * diff;
    }
    sum.sqrt()
}

/// Component-wise mean of a set of embeddings. Vectors whose dimension
/// disagrees with the first are skipped; an empty input yields an empty
/// centroid.
pub fn mean_centroid(embeddings: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = embeddings.first() else {
        return Vec::new();
    };
    let dimension = first.len();

    let mut centroid = vec![0.0f32; dimension];
    let mut counted = 0usize;

    for embedding in embeddings {
        if embedding.len() != dimension {
            continue;
        }
        for (slot, value) in centroid.iter_mut().zip(embedding.iter()) {
            *slot += value;
        }
        counted += 1;
    }

    if counted == 0 {
        return Vec::new();
    }
    for slot in centroid.iter_mut() {
        *slot /= counted as f32;
    }
    centroid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_empty_centroid() {
        // Empty centroids must never win a similarity comparison
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let d = euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        assert_eq!(euclidean_distance(&[1.0], &[1.0, 2.0]), f64::INFINITY);
    }

    #[test]
    fn test_mean_centroid() {
        let centroid = mean_centroid(&[vec![1.0, 3.0], vec![3.0, 5.0]]);
        assert_eq!(centroid, vec![2.0, 4.0]);
    }

    #[test]
    fn test_mean_centroid_empty() {
        assert!(mean_centroid(&[]).is_empty());
    }
}
