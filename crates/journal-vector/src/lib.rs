//! Journal Vector crate - embedding providers, exact nearest-neighbor index,
//! atomic index persistence, and per-user similarity retrieval.
//!
//! The index is built once from a batch of entries, published to disk, and
//! loaded read-only by any number of concurrent retrievers.

pub mod embedding;
pub mod index;
pub mod persist;
pub mod retriever;

pub use embedding::{
    DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService, TimeoutEmbedding,
};
pub use index::{EmbeddingIndex, SearchHit, BUILD_BATCH_SIZE};
pub use persist::IndexLoad;
pub use retriever::{RetrievedEntry, Retriever, CANDIDATE_MULTIPLIER};
