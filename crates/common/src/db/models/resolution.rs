//! Reference resolution entity: the durable memo of whether a reference
//! was ever found elsewhere in the company corpus.
//!
//! Rows are append-only; readers take the most recent row for a
//! `(company_id, reference_name)` pair. The schema carries no uniqueness
//! constraint, so concurrent resolvers can each insert a row — the
//! ORDER BY created_at DESC read keeps the outcome deterministic.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reference_resolutions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub company_id: i64,

    #[sea_orm(column_type = "Text")]
    pub reference_name: String,

    /// NULL means the reference was confirmed missing
    pub resolved_document_id: Option<i64>,

    /// `{documentId, page, snippet}` when resolved
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub details: Option<serde_json::Value>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
