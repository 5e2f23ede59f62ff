//! Chunk entity: one contiguous slice of a document's extracted text

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pdf_chunks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub document_id: i64,

    /// 1-based page number
    pub page: i32,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    /// pgvector embedding stored as text for SeaORM compatibility.
    /// Actual vector operations are done via raw SQL.
    #[sea_orm(column_type = "Text", nullable)]
    pub embedding: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::document::Entity",
        from = "Column::DocumentId",
        to = "super::document::Column::Id",
        on_delete = "Cascade"
    )]
    Document,
}

impl Related<super::document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Document.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parse embedding from stored text format to Vec<f32>
    pub fn parse_embedding(&self) -> Option<Vec<f32>> {
        self.embedding.as_ref().and_then(|s| {
            // Format: "[1.0,2.0,3.0,...]"
            let inner = s.trim_start_matches('[').trim_end_matches(']');
            inner
                .split(',')
                .map(|v| v.trim().parse::<f32>().ok())
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_embedding(embedding: Option<&str>) -> Model {
        Model {
            id: 1,
            document_id: 1,
            page: 1,
            content: "text".into(),
            embedding: embedding.map(String::from),
            created_at: chrono::Utc::now().into(),
        }
    }

    #[test]
    fn test_parse_embedding() {
        let chunk = chunk_with_embedding(Some("[0.1, 0.2,0.3]"));
        assert_eq!(chunk.parse_embedding(), Some(vec![0.1, 0.2, 0.3]));
    }

    #[test]
    fn test_parse_embedding_absent() {
        let chunk = chunk_with_embedding(None);
        assert_eq!(chunk.parse_embedding(), None);
    }

    #[test]
    fn test_parse_embedding_malformed() {
        let chunk = chunk_with_embedding(Some("[0.1,oops]"));
        assert_eq!(chunk.parse_embedding(), None);
    }
}
