//! docqa vector crate - embedding services, the vector index, retrieval, and
//! the ingestion pipeline.
//!
//! Provides an in-memory copy-on-write vector index with cosine similarity
//! search and JSON persistence, an embedding service trait with Ollama, ONNX
//! and mock implementations, a retriever for queries, and the document
//! ingestion pipeline.

pub mod embedding;
pub mod index;
pub mod pipeline;
pub mod retriever;

#[cfg(feature = "onnx")]
pub use embedding::OnnxEmbeddingService;
pub use embedding::{
    build_embedder, DynEmbeddingService, EmbeddingService, MockEmbedding, OllamaEmbedding,
};
pub use index::{IndexCheckpoint, IndexEntry, IndexStats, SearchHit, VectorIndex};
pub use pipeline::IngestionPipeline;
pub use retriever::Retriever;
