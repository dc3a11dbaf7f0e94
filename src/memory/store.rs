//! Namespaced example memory with similarity search.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::MemoryError;
use crate::memory::embedding::{EmbeddingProvider, cosine_similarity};
use crate::pipeline::types::LabeledExample;

/// Collection name for labeled triage examples.
pub const EXAMPLES_COLLECTION: &str = "examples";

/// Partition key for stored examples: `(application, user id, collection)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub application: String,
    pub user_id: String,
    pub collection: String,
}

impl Namespace {
    /// The examples namespace for one user of one application.
    pub fn examples(application: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            user_id: user_id.into(),
            collection: EXAMPLES_COLLECTION.to_string(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.application, self.user_id, self.collection)
    }
}

/// A search hit.
#[derive(Debug, Clone)]
pub struct ScoredExample {
    pub key: String,
    pub example: LabeledExample,
    /// Cosine similarity to the query, in `[-1, 1]`.
    pub score: f64,
}

/// Append-only store of labeled examples, partitioned by namespace.
///
/// `put` overwrites whatever is stored under the same key; there is no delete.
#[async_trait]
pub trait ExampleStore: Send + Sync {
    /// Insert or overwrite the entry at `key`.
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        example: LabeledExample,
    ) -> Result<(), MemoryError>;

    /// Entries ranked by similarity to `query`, most similar first.
    async fn search(
        &self,
        namespace: &Namespace,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredExample>, MemoryError>;

    async fn get(
        &self,
        namespace: &Namespace,
        key: &str,
    ) -> Result<Option<LabeledExample>, MemoryError>;

    /// Number of entries in the namespace.
    async fn len(&self, namespace: &Namespace) -> Result<usize, MemoryError>;
}

struct Entry {
    example: LabeledExample,
    embedding: Vec<f32>,
    /// Write order within the store, for tie-breaking.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    namespaces: HashMap<Namespace, HashMap<String, Entry>>,
    next_seq: u64,
}

/// Process-lifetime example store.
pub struct InMemoryExampleStore {
    embedder: Arc<dyn EmbeddingProvider>,
    inner: RwLock<Inner>,
}

impl InMemoryExampleStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            inner: RwLock::new(Inner::default()),
        }
    }
}

#[async_trait]
impl ExampleStore for InMemoryExampleStore {
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        example: LabeledExample,
    ) -> Result<(), MemoryError> {
        // Embed outside the lock.
        let embedding = self.embedder.embed(&example.email.search_text())?;

        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let previous = inner
            .namespaces
            .entry(namespace.clone())
            .or_default()
            .insert(
                key.to_string(),
                Entry {
                    example,
                    embedding,
                    seq,
                },
            );

        debug!(
            namespace = %namespace,
            overwrote = previous.is_some(),
            "Stored labeled example"
        );
        Ok(())
    }

    async fn search(
        &self,
        namespace: &Namespace,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredExample>, MemoryError> {
        let query_vec = self.embedder.embed(query)?;

        let inner = self.inner.read().await;
        let Some(entries) = inner.namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f64, u64, &String, &Entry)> = entries
            .iter()
            .map(|(key, entry)| {
                (
                    cosine_similarity(&query_vec, &entry.embedding),
                    entry.seq,
                    key,
                    entry,
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
        });

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, _, key, entry)| ScoredExample {
                key: key.clone(),
                example: entry.example.clone(),
                score,
            })
            .collect())
    }

    async fn get(
        &self,
        namespace: &Namespace,
        key: &str,
    ) -> Result<Option<LabeledExample>, MemoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .namespaces
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .map(|entry| entry.example.clone()))
    }

    async fn len(&self, namespace: &Namespace) -> Result<usize, MemoryError> {
        let inner = self.inner.read().await;
        Ok(inner.namespaces.get(namespace).map_or(0, HashMap::len))
    }
}
