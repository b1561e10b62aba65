pub mod face;
pub mod pipeline;

// Re-export commonly used types
pub use face::{match_embedding, Embedding, EmbeddingShape, ShapeError};
pub use pipeline::{ExtractError, Pipeline, DEFAULT_GRID_SIZE};
