//! Text embeddings for example retrieval.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::MemoryError;

/// Produces dense vectors for similarity search.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;

    fn dimensions(&self) -> usize;

    fn name(&self) -> &str;
}

/// Deterministic term-frequency embedder.
///
/// Terms are hashed into a fixed number of buckets (FNV-1a) and weighted by
/// frequency and length, then L2-normalized. Always available, no model
/// download, same input gives the same vector.
pub struct HashedTermEmbedder {
    dimensions: usize,
}

impl HashedTermEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(term: &str, dims: usize) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % dims as u64) as usize
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.chars().count() >= 2)
            .map(|s| s.to_lowercase())
            .collect()
    }
}

impl EmbeddingProvider for HashedTermEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let tokens = Self::tokenize(text);
        let mut vec = vec![0.0f32; self.dimensions];
        if tokens.is_empty() {
            return Ok(vec);
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for tok in &tokens {
            *tf.entry(tok.as_str()).or_default() += 1.0;
        }

        let total = tokens.len() as f32;
        for (term, count) in tf {
            // Short terms are mostly stopwords.
            let weight = 1.0 + (term.len() as f32).ln();
            vec[Self::bucket(term, self.dimensions)] += (count / total) * weight;
        }

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vec {
                *v /= norm;
            }
        }
        Ok(vec)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hashed-term"
    }
}

/// Which embedder backs example retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// all-MiniLM-L6-v2 through fastembed; needs the `semantic` feature.
    Semantic,
    Hashed,
}

impl Default for EmbedderKind {
    fn default() -> Self {
        if cfg!(feature = "semantic") {
            Self::Semantic
        } else {
            Self::Hashed
        }
    }
}

impl std::str::FromStr for EmbedderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "semantic" | "minilm" => Ok(Self::Semantic),
            "hashed" => Ok(Self::Hashed),
            other => Err(format!("unknown embedder '{other}' (expected semantic or hashed)")),
        }
    }
}

/// Build the configured embedder, degrading to `HashedTermEmbedder` when the
/// semantic model is unavailable.
pub fn create_embedder(kind: EmbedderKind, hashed_dimensions: usize) -> Arc<dyn EmbeddingProvider> {
    let embedder: Arc<dyn EmbeddingProvider> = match kind {
        EmbedderKind::Semantic => match load_semantic() {
            Ok(embedder) => embedder,
            Err(e) => {
                warn!(error = %e, "Semantic embedder unavailable, using hashed terms");
                Arc::new(HashedTermEmbedder::new(hashed_dimensions))
            }
        },
        EmbedderKind::Hashed => Arc::new(HashedTermEmbedder::new(hashed_dimensions)),
    };
    info!(
        embedder = embedder.name(),
        dims = embedder.dimensions(),
        "Example memory embedder ready"
    );
    embedder
}

#[cfg(feature = "semantic")]
fn load_semantic() -> Result<Arc<dyn EmbeddingProvider>, MemoryError> {
    Ok(Arc::new(crate::memory::semantic::FastEmbedder::load()?))
}

#[cfg(not(feature = "semantic"))]
fn load_semantic() -> Result<Arc<dyn EmbeddingProvider>, MemoryError> {
    Err(MemoryError::ModelLoadFailed {
        model: "all-MiniLM-L6-v2".to_string(),
        reason: "built without the `semantic` feature".to_string(),
    })
}

/// Cosine similarity between two vectors.
/// Returns 0.0 for empty, mismatched or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut mag_a, mut mag_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom < f64::EPSILON {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0)
    }
}
