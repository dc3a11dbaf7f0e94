//! Example memory: labeled emails retrieved by similarity to bias triage.

pub mod embedding;
#[cfg(feature = "semantic")]
pub mod semantic;
pub mod store;

pub use embedding::{
    EmbedderKind, EmbeddingProvider, HashedTermEmbedder, cosine_similarity, create_embedder,
};
#[cfg(feature = "semantic")]
pub use semantic::FastEmbedder;
pub use store::{ExampleStore, InMemoryExampleStore, Namespace, ScoredExample};
