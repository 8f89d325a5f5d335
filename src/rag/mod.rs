//! Retrieval-augmented generation: embed, search, filter, rerank, assemble.
//!
//! The vector store is a pgvector table owned by an offline indexer; the
//! core only reads it. Candidates come back in store order (cosine
//! distance); a similarity floor drops weak matches and the reranker picks
//! the final set — the default policy trusts store ordering and truncates.

use std::sync::Arc;

use async_trait::async_trait;
use pgvector::Vector;
use serde::Deserialize;
use serde_json::json;
use sqlx::Row;

use crate::config::RagConfig;
use crate::store::Database;

/// Deadline for one embedding call.
const EMBED_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Errors from the retrieval path.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// The embedding endpoint failed.
    #[error("embedding request failed: {0}")]
    Embedding(String),
    /// The vector store query failed.
    #[error("vector store error: {0}")]
    Store(#[from] sqlx::Error),
    /// The store returned no candidates at all.
    #[error("no documents retrieved")]
    NoDocuments,
    /// Candidates exist but none clears the similarity floor.
    #[error("no candidate above the similarity floor")]
    BelowThreshold,
}

/// One retrieved chunk with its similarity score.
#[derive(Debug, Clone)]
pub struct RetrievedDoc {
    /// Chunk title.
    pub title: String,
    /// Chunk text.
    pub text: String,
    /// Topical category assigned by the indexer.
    pub category: Option<String>,
    /// Cosine similarity to the query (1 − distance).
    pub similarity: f64,
}

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts, one vector per input, L2-normalized.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Embedding`] on transport or shape failure.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;
}

/// OpenAI embeddings endpoint client.
pub struct OpenAiEmbeddings {
    api_key: String,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    /// Create a client for the configured embedding model and dimension.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let body = json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimensions,
        });
        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .timeout(EMBED_TIMEOUT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RagError::Embedding(format!(
                "embedding endpoint returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        Ok(parsed
            .data
            .into_iter()
            .map(|d| l2_normalize(d.embedding))
            .collect())
    }
}

/// Normalize a vector to unit length so dot products are cosines.
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// Final-stage document selection.
pub trait Reranker: Send + Sync {
    /// Reduce filtered candidates to at most `top_k` documents.
    fn rerank(&self, question: &str, docs: Vec<RetrievedDoc>, top_k: usize) -> Vec<RetrievedDoc>;
}

/// Default policy: trust the store's distance ordering and truncate.
/// A cross-encoder adds seconds of latency for little gain at these
/// candidate counts.
pub struct TruncateReranker;

impl Reranker for TruncateReranker {
    fn rerank(
        &self,
        _question: &str,
        mut docs: Vec<RetrievedDoc>,
        top_k: usize,
    ) -> Vec<RetrievedDoc> {
        docs.truncate(top_k);
        docs
    }
}

/// Drop candidates under the similarity floor, preserving order.
pub fn filter_by_similarity(docs: Vec<RetrievedDoc>, min_similarity: f64) -> Vec<RetrievedDoc> {
    docs.into_iter()
        .filter(|doc| doc.similarity >= min_similarity)
        .collect()
}

/// Assemble numbered context blocks for the answerer.
pub fn build_context(docs: &[RetrievedDoc]) -> String {
    docs.iter()
        .enumerate()
        .map(|(i, doc)| format!("[Document {}]\n{}", i.saturating_add(1), doc.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Context blocks with chunk metadata, used on the hybrid path.
pub fn build_context_with_meta(docs: &[RetrievedDoc]) -> String {
    docs.iter()
        .enumerate()
        .map(|(i, doc)| {
            let mut header = format!("[Document {}] {}", i.saturating_add(1), doc.title);
            if let Some(category) = &doc.category {
                header.push_str(&format!("; Categoria: {category}"));
            }
            format!("{header}\n{}", doc.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The retrieval stage.
pub struct Retriever {
    db: Database,
    embeddings: Arc<dyn EmbeddingClient>,
    reranker: Box<dyn Reranker>,
    config: RagConfig,
}

impl Retriever {
    /// Create a retriever with the default truncation reranker.
    pub fn new(db: Database, embeddings: Arc<dyn EmbeddingClient>, config: RagConfig) -> Self {
        Self {
            db,
            embeddings,
            reranker: Box::new(TruncateReranker),
            config,
        }
    }

    /// Swap in a different reranking policy.
    pub fn with_reranker(mut self, reranker: Box<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    /// Nearest-neighbor search for `initial_k` candidates in store order.
    ///
    /// # Errors
    ///
    /// [`RagError::Embedding`] or [`RagError::Store`] on stage failure.
    pub async fn search(
        &self,
        question: &str,
        initial_k: usize,
    ) -> Result<Vec<RetrievedDoc>, RagError> {
        let embeddings = self.embeddings.embed(&[question.to_owned()]).await?;
        let query_vector = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("empty embedding batch".to_owned()))?;
        let vector = Vector::from(query_vector);

        let mut conn = self.db.pool().acquire().await?;

        // Probe enough IVFFlat lists for good recall on a small index. The
        // setting is per-connection, so it rides the same acquisition as
        // the search itself.
        sqlx::query(&format!("SET ivfflat.probes = {}", self.config.probes))
            .execute(&mut *conn)
            .await?;

        let rows = sqlx::query(
            r#"SELECT
    title,
    text,
    category,
    1 - (combined_embedding <=> $1) AS similarity
FROM castellers_info_chunks
ORDER BY combined_embedding <=> $1
LIMIT $2"#,
        )
        .bind(&vector)
        .bind(i64::try_from(initial_k).unwrap_or(i64::MAX))
        .fetch_all(&mut *conn)
        .await?;

        let docs: Vec<RetrievedDoc> = rows
            .iter()
            .map(|row| RetrievedDoc {
                title: row.try_get::<Option<String>, _>("title").ok().flatten().unwrap_or_default(),
                text: row.try_get::<Option<String>, _>("text").ok().flatten().unwrap_or_default(),
                category: row.try_get::<Option<String>, _>("category").ok().flatten(),
                similarity: row.try_get::<f64, _>("similarity").unwrap_or(0.0),
            })
            .collect();

        tracing::debug!(candidates = docs.len(), "vector search completed");
        Ok(docs)
    }

    /// The full retrieval pipeline: search, floor-filter, rerank.
    ///
    /// # Errors
    ///
    /// [`RagError::NoDocuments`] when the store is empty for the query,
    /// [`RagError::BelowThreshold`] when nothing clears the floor, plus the
    /// stage failures of [`Self::search`].
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedDoc>, RagError> {
        self.retrieve_k(question, self.config.initial_k, self.config.final_k)
            .await
    }

    /// Retrieval with explicit candidate and final counts (hybrid path).
    ///
    /// # Errors
    ///
    /// Same as [`Self::retrieve`].
    pub async fn retrieve_k(
        &self,
        question: &str,
        initial_k: usize,
        final_k: usize,
    ) -> Result<Vec<RetrievedDoc>, RagError> {
        let candidates = self.search(question, initial_k).await?;
        if candidates.is_empty() {
            return Err(RagError::NoDocuments);
        }

        let filtered = filter_by_similarity(candidates, self.config.min_similarity);
        tracing::debug!(kept = filtered.len(), "similarity filter applied");
        if filtered.is_empty() {
            return Err(RagError::BelowThreshold);
        }

        Ok(self.reranker.rerank(question, filtered, final_k))
    }
}
