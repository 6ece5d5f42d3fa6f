use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A vector tagged with the model that produced it. Vectors from different
/// models are never compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub model: String,
    pub vector: Vec<f32>,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identity of the embedding model.
    fn model_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embedding(&self, text: &str) -> Result<Embedding> {
        Ok(Embedding {
            model: self.model_id().to_string(),
            vector: self.embed(text).await?,
        })
    }
}

/// Bag-of-words tokenizer with hashed buckets for deterministic embeddings.
pub struct HashingEmbedder {
    buckets: usize,
    model_id: String,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl HashingEmbedder {
    pub fn new(buckets: usize) -> Self {
        let buckets = buckets.max(1);
        Self {
            buckets,
            model_id: format!("hashing-{buckets}"),
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0; self.buckets];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.buckets;
            vector[idx] += 1.0;
        }

        Ok(vector)
    }
}

/// Cosine similarity; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_and_orthogonal_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn hashing_embedder_is_case_and_punctuation_insensitive() {
        let embedder = HashingEmbedder::new(32);
        let a = embedder.embed("Calculate the derivative!").await.unwrap();
        let b = embedder.embed("calculate THE derivative").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);

        let tagged = embedder.embedding("x").await.unwrap();
        assert_eq!(tagged.model, "hashing-32");
    }
}
