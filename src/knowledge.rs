//! Small in-process retrieval layer used to ground agent preambles.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::Result;

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Value::Null,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<String>>;
}

pub struct KnowledgeBase {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<(Document, Vec<f32>)>>,
    threshold: Option<f32>,
}

impl KnowledgeBase {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
            threshold: None,
        }
    }

    /// Drop results scoring below `threshold`.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub async fn add_document(&self, document: Document) -> Result<()> {
        let embedding = self.embedder.embed(&document.text).await?;
        self.entries.write().await.push((document, embedding));
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredDocument>> {
        let embedding = self.embedder.embed(query).await?;
        let entries = self.entries.read().await;
        let mut scored: Vec<ScoredDocument> = entries
            .iter()
            .map(|(doc, stored)| ScoredDocument {
                document: doc.clone(),
                score: cosine_similarity(stored, &embedding),
            })
            .filter(|scored| self.threshold.map_or(true, |t| scored.score >= t))
            .collect();

        // stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[async_trait]
impl Retriever for KnowledgeBase {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        let docs = self.search(query, top_k).await?;
        Ok(docs.into_iter().map(|d| d.document.text).collect())
    }
}
