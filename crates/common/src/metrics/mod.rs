//! Metrics and observability utilities
//!
//! Provides counters and histograms for the retrieval and resolution
//! pipelines with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all Docsense metrics
pub const METRICS_PREFIX: &str = "docsense";

/// Register all metric descriptions
pub fn register_metrics() {
    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of search queries"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Search query latency in seconds"
    );

    describe_counter!(
        format!("{}_search_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Searches served by a fallback tier instead of the ensemble"
    );

    // ANN metrics
    describe_counter!(
        format!("{}_ann_strategy_total", METRICS_PREFIX),
        Unit::Count,
        "ANN searches by selected strategy"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    // Resolution metrics
    describe_counter!(
        format!("{}_resolutions_total", METRICS_PREFIX),
        Unit::Count,
        "Total reference resolutions by outcome"
    );

    describe_histogram!(
        format!("{}_resolution_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Reference resolution latency in seconds"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, method: &str, result_count: usize) {
    counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        "method" => method.to_string(),
        "results" => if result_count == 0 { "empty" } else { "nonempty" }
    )
    .increment(1);

    histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        "method" => method.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a fallback tier being used
pub fn record_fallback(method: &str) {
    counter!(
        format!("{}_search_fallbacks_total", METRICS_PREFIX),
        "method" => method.to_string()
    )
    .increment(1);
}

/// Helper to record which ANN strategy handled a query
pub fn record_ann_strategy(strategy: &str) {
    counter!(
        format!("{}_ann_strategy_total", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .increment(1);
}

/// Helper to record a resolution outcome
pub fn record_resolution(duration_secs: f64, outcome: &str) {
    counter!(
        format!("{}_resolutions_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_resolution_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_run_without_recorder_installed() {
        record_search(0.012, "document_ensemble_rrf", 5);
        record_fallback("ann_fallback");
        record_ann_strategy("clustered_probe");
        record_resolution(0.4, "resolved");
        record_cache(true, "resolution");
    }
}
