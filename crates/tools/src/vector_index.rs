//! In-memory retrieval index over per-namespace document chunks.
//!
//! Chunks are ranked by cosine similarity of embeddings produced through
//! the shared model handle. When the model cannot embed (no embedding model,
//! provider error) ranking falls back to keyword overlap.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use parlor_core::error::ToolError;
use parlor_core::provider::ModelHandle;
use parlor_core::retrieval::{RetrievedChunk, Retriever};
use tracing::{debug, info, warn};

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 for empty or mismatched vectors and for zero-norm input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of query terms present in `content`.
pub fn keyword_score(query: &str, content: &str) -> f32 {
    let query_terms = tokens(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms = tokens(content);
    let hits = query_terms
        .iter()
        .filter(|t| content_terms.contains(*t))
        .count();
    hits as f32 / query_terms.len() as f32
}

#[derive(Debug, Clone)]
struct Chunk {
    document_id: String,
    content: String,
}

pub struct InMemoryVectorIndex {
    namespaces: HashMap<String, Vec<Chunk>>,
    /// (embedding model, namespace, chunk position) → vector
    embeddings: Mutex<HashMap<(String, String, usize), Vec<f32>>>,
    limit: usize,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            namespaces: HashMap::new(),
            embeddings: Mutex::new(HashMap::new()),
            limit: 5,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Add a document to `namespace`, split into blank-line separated chunks.
    pub fn add_document(&mut self, namespace: &str, document_id: &str, text: &str) {
        let chunks = self.namespaces.entry(namespace.to_string()).or_default();
        for (i, paragraph) in text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .enumerate()
        {
            chunks.push(Chunk {
                document_id: format!("{document_id}#{i}"),
                content: paragraph.to_string(),
            });
        }
    }

    /// Load `<dir>/<namespace>/<file>` text documents.
    ///
    /// A missing directory yields an empty index.
    pub async fn load_dir(dir: &Path) -> Result<Self, ToolError> {
        let mut index = Self::new();
        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            info!(path = %dir.display(), "No documents directory, retrieval index is empty");
            return Ok(index);
        }

        let io_err = |e: std::io::Error| {
            ToolError::SourceUnavailable(format!("failed to read {}: {e}", dir.display()))
        };

        let mut namespaces = tokio::fs::read_dir(dir).await.map_err(io_err)?;
        while let Some(ns_entry) = namespaces.next_entry().await.map_err(io_err)? {
            if !ns_entry.file_type().await.map_err(io_err)?.is_dir() {
                continue;
            }
            let namespace = ns_entry.file_name().to_string_lossy().into_owned();
            let mut files = tokio::fs::read_dir(ns_entry.path()).await.map_err(io_err)?;
            while let Some(file) = files.next_entry().await.map_err(io_err)? {
                let path = file.path();
                match tokio::fs::read_to_string(&path).await {
                    Ok(text) => {
                        let doc_id = file.file_name().to_string_lossy().into_owned();
                        index.add_document(&namespace, &doc_id, &text);
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable document"),
                }
            }
        }

        info!(
            namespaces = index.namespaces.len(),
            chunks = index.chunk_count(),
            "Retrieval index loaded"
        );
        Ok(index)
    }

    pub fn chunk_count(&self) -> usize {
        self.namespaces.values().map(Vec::len).sum()
    }

    pub fn namespaces(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.namespaces.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Embed the query plus any chunks not yet embedded with this model.
    async fn semantic_scores(
        &self,
        query: &str,
        model: &ModelHandle,
        namespace: &str,
        chunks: &[Chunk],
    ) -> Result<Vec<f32>, ToolError> {
        let model_name = model.embedding_model.clone().unwrap_or_default();
        let missing: Vec<usize> = {
            let cache = self.lock_embeddings();
            (0..chunks.len())
                .filter(|i| !cache.contains_key(&(model_name.clone(), namespace.to_string(), *i)))
                .collect()
        };

        let mut inputs = vec![query.to_string()];
        inputs.extend(missing.iter().map(|&i| chunks[i].content.clone()));
        let vectors = model
            .embed(inputs)
            .await
            .map_err(|e| ToolError::ExternalService(e.to_string()))?;
        if vectors.len() != missing.len() + 1 {
            return Err(ToolError::ExternalService(format!(
                "expected {} embeddings, got {}",
                missing.len() + 1,
                vectors.len()
            )));
        }

        let mut vectors = vectors.into_iter();
        let query_vec = vectors.next().unwrap_or_default();
        let mut cache = self.lock_embeddings();
        for (&i, v) in missing.iter().zip(vectors) {
            cache.insert((model_name.clone(), namespace.to_string(), i), v);
        }

        Ok((0..chunks.len())
            .map(|i| {
                cache
                    .get(&(model_name.clone(), namespace.to_string(), i))
                    .map_or(0.0, |v| cosine_similarity(&query_vec, v))
            })
            .collect())
    }

    fn lock_embeddings(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(String, String, usize), Vec<f32>>> {
        self.embeddings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Retriever for InMemoryVectorIndex {
    async fn search(
        &self,
        query: &str,
        model: &ModelHandle,
        namespace: &str,
    ) -> Result<Vec<RetrievedChunk>, ToolError> {
        let Some(chunks) = self.namespaces.get(namespace) else {
            debug!(namespace, "Search in unknown namespace");
            return Ok(vec![]);
        };

        let scores = match self.semantic_scores(query, model, namespace, chunks).await {
            Ok(scores) => scores,
            Err(e) => {
                debug!(namespace, error = %e, "Embedding unavailable, using keyword scoring");
                chunks
                    .iter()
                    .map(|c| keyword_score(query, &c.content))
                    .collect()
            }
        };

        let mut ranked: Vec<RetrievedChunk> = chunks
            .iter()
            .zip(scores)
            .filter(|(_, score)| *score > 0.0)
            .map(|(chunk, score)| RetrievedChunk {
                document_id: chunk.document_id.clone(),
                content: chunk.content.clone(),
                namespace: namespace.to_string(),
                score,
            })
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(self.limit);
        Ok(ranked)
    }
}
