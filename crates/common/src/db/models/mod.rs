//! SeaORM entity models

pub mod chunk;
pub mod document;
pub mod resolution;

pub use chunk::{
    ActiveModel as ChunkActiveModel, Column as ChunkColumn, Entity as ChunkEntity, Model as Chunk,
};
pub use document::{
    ActiveModel as DocumentActiveModel, Column as DocumentColumn, Entity as DocumentEntity,
    Model as Document,
};
pub use resolution::{
    ActiveModel as ResolutionActiveModel, Column as ResolutionColumn, Entity as ResolutionEntity,
    Model as Resolution,
};
