//! Repository: store traits implemented over Postgres + pgvector
//!
//! Vector operations go through raw SQL (`embedding <-> $query::vector`)
//! because SeaORM has no native pgvector column type; everything else uses
//! the entity API.

use crate::db::models::*;
use crate::db::stores::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, Set, Statement,
};

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    /// Render an embedding in pgvector literal form "[1.0,2.0,...]"
    fn embedding_literal(embedding: &[f32]) -> String {
        format!(
            "[{}]",
            embedding
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(",")
        )
    }

    /// Render an id list for an `IN (...)` clause. Ids are integers, so
    /// inlining them keeps the statement free of array bind parameters.
    fn id_list(ids: &[i64]) -> String {
        ids.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn row_to_chunk(row: &sea_orm::QueryResult) -> Option<ChunkRecord> {
        use sea_orm::TryGetable;
        Some(ChunkRecord {
            id: i64::try_get(row, "", "id").ok()?,
            document_id: i64::try_get(row, "", "document_id").ok()?,
            page: i32::try_get(row, "", "page").ok()?,
            content: String::try_get(row, "", "content").ok()?,
            embedding: None,
            document_title: String::try_get(row, "", "document_title").ok(),
        })
    }
}

#[async_trait]
impl ChunkStore for Repository {
    async fn chunks_by_document(&self, document_id: i64) -> Result<Vec<ChunkRecord>> {
        let chunks = ChunkEntity::find()
            .filter(ChunkColumn::DocumentId.eq(document_id))
            .order_by_asc(ChunkColumn::Id)
            .all(self.pool.read())
            .await?;

        Ok(chunks
            .into_iter()
            .map(|c| {
                let embedding = c.parse_embedding();
                ChunkRecord {
                    id: c.id,
                    document_id: c.document_id,
                    page: c.page,
                    content: c.content,
                    embedding,
                    document_title: None,
                }
            })
            .collect())
    }

    async fn chunks_by_company(&self, company_id: i64) -> Result<Vec<ChunkRecord>> {
        let sql = r#"
            SELECT
                c.id,
                c.document_id,
                c.page,
                c.content,
                c.embedding,
                d.title as document_title
            FROM pdf_chunks c
            INNER JOIN documents d ON c.document_id = d.id
            WHERE d.company_id = $1
            ORDER BY c.id
        "#;

        let rows = self
            .pool
            .read()
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                sql,
                vec![company_id.into()],
            ))
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                use sea_orm::TryGetable;
                let mut record = Self::row_to_chunk(row)?;
                record.embedding = String::try_get(row, "", "embedding").ok().and_then(|s| {
                    let inner = s.trim_start_matches('[').trim_end_matches(']');
                    inner.split(',').map(|v| v.trim().parse::<f32>().ok()).collect()
                });
                Some(record)
            })
            .collect())
    }

    async fn nearest_chunks(
        &self,
        embedding: &[f32],
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let embedding_str = Self::embedding_literal(embedding);

        let mut predicates = Vec::new();
        if !filter.document_ids.is_empty() {
            predicates.push(format!(
                "c.document_id IN ({})",
                Self::id_list(&filter.document_ids)
            ));
        }
        if let Some(ref chunk_ids) = filter.chunk_ids {
            if chunk_ids.is_empty() {
                return Ok(Vec::new());
            }
            predicates.push(format!("c.id IN ({})", Self::id_list(chunk_ids)));
        }
        if let Some(max_distance) = filter.max_distance {
            predicates.push(format!(
                "c.embedding <-> '{}'::vector <= {}",
                embedding_str, max_distance
            ));
        }
        let where_clause = if predicates.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", predicates.join(" AND "))
        };

        let sql = format!(
            r#"
            SELECT
                c.id,
                c.document_id,
                c.page,
                c.content,
                d.title as document_title,
                c.embedding <-> '{embedding}'::vector as distance
            FROM pdf_chunks c
            INNER JOIN documents d ON c.document_id = d.id
            {where_clause}
            ORDER BY c.embedding <-> '{embedding}'::vector
            LIMIT {limit}
            "#,
            embedding = embedding_str,
            where_clause = where_clause,
            limit = limit,
        );

        let rows = self
            .pool
            .read()
            .query_all(Statement::from_string(DbBackend::Postgres, sql))
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Nearest-chunk query failed: {}", e),
            })?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                use sea_orm::TryGetable;
                let chunk = Self::row_to_chunk(row)?;
                let distance = f64::try_get(row, "", "distance").unwrap_or(1.0);
                Some(ScoredChunk { chunk, distance })
            })
            .collect())
    }

    async fn chunks_containing(
        &self,
        document_ids: &[i64],
        needle: &str,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT
                c.id,
                c.document_id,
                c.page,
                c.content,
                d.title as document_title
            FROM pdf_chunks c
            INNER JOIN documents d ON c.document_id = d.id
            WHERE c.document_id IN ({ids})
              AND LOWER(c.content) LIKE $1
            ORDER BY c.id
            LIMIT {limit}
            "#,
            ids = Self::id_list(document_ids),
            limit = limit,
        );

        let pattern = format!("%{}%", needle.to_lowercase());
        let rows = self
            .pool
            .read()
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &sql,
                vec![pattern.into()],
            ))
            .await?;

        Ok(rows.iter().filter_map(Self::row_to_chunk).collect())
    }
}

#[async_trait]
impl DocumentStore for Repository {
    async fn company_documents(
        &self,
        company_id: i64,
        exclude_document_id: Option<i64>,
    ) -> Result<Vec<DocumentRecord>> {
        let mut query = DocumentEntity::find().filter(DocumentColumn::CompanyId.eq(company_id));
        if let Some(excluded) = exclude_document_id {
            query = query.filter(DocumentColumn::Id.ne(excluded));
        }

        let documents = query
            .order_by_asc(DocumentColumn::Id)
            .all(self.pool.read())
            .await?;

        Ok(documents
            .into_iter()
            .map(|d| DocumentRecord {
                id: d.id,
                title: d.title,
            })
            .collect())
    }
}

#[async_trait]
impl ResolutionStore for Repository {
    async fn find_resolution(
        &self,
        company_id: i64,
        reference_name: &str,
    ) -> Result<Option<ResolutionRecord>> {
        // Most recent row wins: inserts are append-only and may race,
        // so the reader must pick deterministically.
        let row = ResolutionEntity::find()
            .filter(ResolutionColumn::CompanyId.eq(company_id))
            .filter(ResolutionColumn::ReferenceName.eq(reference_name))
            .order_by_desc(ResolutionColumn::CreatedAt)
            .one(self.pool.read())
            .await?;

        Ok(row.map(|r| {
            let details = r
                .details
                .as_ref()
                .and_then(|v| serde_json::from_value(v.clone()).ok());
            ResolutionRecord {
                company_id: r.company_id,
                reference_name: r.reference_name,
                resolved_document_id: r.resolved_document_id,
                details,
                created_at: r.created_at.into(),
            }
        }))
    }

    async fn append_resolution(&self, record: ResolutionRecord) -> Result<()> {
        let details = record
            .details
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let row = ResolutionActiveModel {
            company_id: Set(record.company_id),
            reference_name: Set(record.reference_name),
            resolved_document_id: Set(record.resolved_document_id),
            details: Set(details),
            created_at: Set(record.created_at.into()),
            ..Default::default()
        };

        row.insert(self.pool.write()).await?;
        Ok(())
    }

    async fn invalidate_resolution(&self, company_id: i64, reference_name: &str) -> Result<u64> {
        let result = ResolutionEntity::delete_many()
            .filter(ResolutionColumn::CompanyId.eq(company_id))
            .filter(ResolutionColumn::ReferenceName.eq(reference_name))
            .exec(self.pool.write())
            .await?;

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_literal() {
        assert_eq!(Repository::embedding_literal(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
    }

    #[test]
    fn test_id_list() {
        assert_eq!(Repository::id_list(&[3, 7, 11]), "3,7,11");
        assert_eq!(Repository::id_list(&[]), "");
    }
}
