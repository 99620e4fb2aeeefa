//! Vector store façade: embedding-backed document storage and search.
//!
//! [`VectorStore`] is the one handle the rest of the system uses for
//! persistent nearest-neighbor storage. It composes a [`LanguageModel`] (for
//! embeddings) with a [`VectorBackend`] (the actual vector database) and
//! layers the search refinements on top:
//!
//! 1. embed the query;
//! 2. fetch `n×3` candidates when a keyword is given, else `n`;
//! 3. exact metadata filtering;
//! 4. case-insensitive keyword retention with occurrence counting, sorted by
//!    count (desc) then distance (asc);
//! 5. optional distance gating;
//! 6. truncation to `n`.
//!
//! Backends are pluggable: [`crate::chroma::ChromaBackend`] in production,
//! [`MemoryBackend`] for tests. Distance is dissimilarity — lower is closer.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::drive;
use crate::llm::LanguageModel;
use crate::models::{DocMetadata, Document};

/// A row returned from a backend nearest-neighbor query.
#[derive(Debug, Clone)]
pub struct ScoredRow {
    pub doc: Document,
    pub distance: f64,
}

/// Narrow contract over the underlying vector database.
///
/// The façade owns all embedding and refinement logic; backends only store
/// vectors and answer raw queries by ascending distance.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Insert or replace the row for `id`.
    async fn upsert(
        &self,
        id: &str,
        embedding: Vec<f32>,
        text: &str,
        metadata: &DocMetadata,
    ) -> Result<()>;

    /// Top-`n` rows by ascending distance to `embedding`.
    async fn query(&self, embedding: &[f32], n: usize) -> Result<Vec<ScoredRow>>;

    /// Every stored row. Intended for sync reconciliation, not user queries.
    async fn get_all(&self) -> Result<Vec<Document>>;

    async fn delete(&self, ids: &[String]) -> Result<()>;

    async fn count(&self) -> Result<u64>;

    /// Empty the collection.
    async fn reset(&self) -> Result<()>;

    fn collection_name(&self) -> &str;
}

/// Optional refinements for [`VectorStore::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Retain only rows containing this keyword (case-insensitive) and rank
    /// by occurrence count before distance.
    pub keyword: Option<String>,
    /// Drop rows farther than this distance.
    pub max_distance: Option<f64>,
    /// Retain only rows whose metadata matches all given fields exactly.
    /// Keys use the stored camelCase names (`name`, `mimeType`, ...).
    pub metadata_filter: Option<HashMap<String, String>>,
}

/// A search result row with display fields resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: DocMetadata,
    pub distance: f64,
    /// `"{root}/{folderPath}/{name}{extension}"` with empty segments skipped.
    pub path: String,
    pub google_link: String,
    /// Keyword occurrences in the text; zero when no keyword was given.
    pub keyword_count: usize,
}

/// Collection statistics for the stats tool.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub count: u64,
    pub name: String,
}

/// Persistent nearest-neighbor store with side metadata and lexical
/// post-filtering. Constructed once at startup and shared.
pub struct VectorStore {
    model: Arc<dyn LanguageModel>,
    backend: Arc<dyn VectorBackend>,
    root_name: String,
}

impl VectorStore {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        backend: Arc<dyn VectorBackend>,
        root_name: String,
    ) -> Self {
        Self {
            model,
            backend,
            root_name,
        }
    }

    /// Embed and upsert every document, in order.
    ///
    /// At-least-once semantics: on failure the ids already written are
    /// logged and the error is surfaced; the next sync run re-drives the
    /// rest. Re-adding an existing `id` replaces its prior content.
    pub async fn add_many(&self, docs: &[Document]) -> Result<()> {
        let mut succeeded: Vec<&str> = Vec::with_capacity(docs.len());
        for doc in docs {
            let result = async {
                let embedding = self
                    .model
                    .embed(&doc.text)
                    .await
                    .with_context(|| format!("embedding failed for {}", doc.id))?;
                self.backend
                    .upsert(&doc.id, embedding, &doc.text, &doc.metadata)
                    .await
                    .with_context(|| format!("upsert failed for {}", doc.id))
            }
            .await;

            if let Err(e) = result {
                warn!(
                    succeeded = succeeded.len(),
                    ids = %succeeded.join(","),
                    "add_many failed partway"
                );
                return Err(e);
            }
            succeeded.push(&doc.id);
        }
        Ok(())
    }

    /// Nearest-neighbor search with the refinement pipeline described in the
    /// module docs. Never returns more than `n` rows.
    pub async fn search(
        &self,
        query: &str,
        n: usize,
        opts: SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let embedding = self.model.embed(query).await.context("query embedding failed")?;

        // Keyword filtering discards rows, so over-fetch to keep recall up.
        let fetch_n = if opts.keyword.is_some() { n * 3 } else { n };
        let mut rows = self.backend.query(&embedding, fetch_n).await?;

        if let Some(filter) = &opts.metadata_filter {
            rows.retain(|row| metadata_matches(&row.doc.metadata, filter));
        }

        let mut hits: Vec<SearchHit> = match &opts.keyword {
            Some(keyword) => {
                let needle = keyword.to_lowercase();
                let mut kept: Vec<SearchHit> = rows
                    .into_iter()
                    .filter_map(|row| {
                        let count = row.doc.text.to_lowercase().matches(&needle).count();
                        (count > 0).then(|| self.to_hit(row, count))
                    })
                    .collect();
                kept.sort_by(|a, b| {
                    b.keyword_count
                        .cmp(&a.keyword_count)
                        .then(a.distance.total_cmp(&b.distance))
                });
                kept
            }
            None => {
                let mut kept: Vec<SearchHit> =
                    rows.into_iter().map(|row| self.to_hit(row, 0)).collect();
                kept.sort_by(|a, b| a.distance.total_cmp(&b.distance));
                kept
            }
        };

        if let Some(max) = opts.max_distance {
            hits.retain(|h| h.distance <= max);
        }
        hits.truncate(n);
        Ok(hits)
    }

    pub async fn get_all(&self) -> Result<Vec<Document>> {
        self.backend.get_all().await
    }

    pub async fn delete_many(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.backend.delete(ids).await
    }

    pub async fn get_stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            count: self.backend.count().await?,
            name: self.backend.collection_name().to_string(),
        })
    }

    pub async fn reset(&self) -> Result<()> {
        self.backend.reset().await
    }

    fn to_hit(&self, row: ScoredRow, keyword_count: usize) -> SearchHit {
        let meta = &row.doc.metadata;
        let google_link = meta
            .google_link
            .clone()
            .unwrap_or_else(|| drive::web_link(&row.doc.id, &meta.mime_type));
        let file_name = format!("{}{}", meta.name, meta.extension);
        let path = [self.root_name.as_str(), meta.folder_path.as_str(), file_name.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        SearchHit {
            id: row.doc.id,
            text: row.doc.text,
            metadata: row.doc.metadata,
            distance: row.distance,
            path,
            google_link,
            keyword_count,
        }
    }
}

fn metadata_matches(meta: &DocMetadata, filter: &HashMap<String, String>) -> bool {
    let value = serde_json::to_value(meta).unwrap_or_default();
    filter.iter().all(|(k, expected)| {
        value
            .get(k)
            .and_then(|v| v.as_str())
            .map(|v| v == expected)
            .unwrap_or(false)
    })
}

// ============ In-memory backend ============

/// Brute-force in-memory [`VectorBackend`] for tests and local runs.
///
/// Uses cosine distance to match the remote backend's ranking behavior.
pub struct MemoryBackend {
    rows: std::sync::RwLock<HashMap<String, (Vec<f32>, Document)>>,
    name: String,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            rows: std::sync::RwLock::new(HashMap::new()),
            name: name.into(),
        }
    }
}

/// Cosine distance in `[0, 2]`; `0` = identical direction.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 2.0;
    }
    1.0 - dot / denom
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn upsert(
        &self,
        id: &str,
        embedding: Vec<f32>,
        text: &str,
        metadata: &DocMetadata,
    ) -> Result<()> {
        let doc = Document {
            id: id.to_string(),
            text: text.to_string(),
            metadata: metadata.clone(),
        };
        self.rows
            .write()
            .unwrap()
            .insert(id.to_string(), (embedding, doc));
        Ok(())
    }

    async fn query(&self, embedding: &[f32], n: usize) -> Result<Vec<ScoredRow>> {
        let rows = self.rows.read().unwrap();
        let mut scored: Vec<ScoredRow> = rows
            .values()
            .map(|(vec, doc)| ScoredRow {
                doc: doc.clone(),
                distance: cosine_distance(embedding, vec),
            })
            .collect();
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(n);
        Ok(scored)
    }

    async fn get_all(&self) -> Result<Vec<Document>> {
        let rows = self.rows.read().unwrap();
        let mut docs: Vec<Document> = rows.values().map(|(_, doc)| doc.clone()).collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut rows = self.rows.write().unwrap();
        for id in ids {
            rows.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.rows.read().unwrap().len() as u64)
    }

    async fn reset(&self) -> Result<()> {
        self.rows.write().unwrap().clear();
        Ok(())
    }

    fn collection_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelResponse, ToolDeclaration};
    use crate::models::{ConversationTurn, MIME_GOOGLE_DOC, MIME_PDF};

    /// Embeds by keyword presence so tests control the ranking.
    struct KeywordEmbedModel;

    #[async_trait]
    impl LanguageModel for KeywordEmbedModel {
        async fn chat(&self, _prompt: &str) -> Result<String> {
            anyhow::bail!("not scripted")
        }
        async fn chat_with_tools(
            &self,
            _turns: &[ConversationTurn],
            _tools: &[ToolDeclaration],
            _force: bool,
        ) -> Result<ModelResponse> {
            anyhow::bail!("not scripted")
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(vec![
                if lower.contains("alpha") { 1.0 } else { 0.1 },
                if lower.contains("beta") { 1.0 } else { 0.1 },
                1.0,
            ])
        }
    }

    fn meta(name: &str) -> DocMetadata {
        DocMetadata {
            name: name.to_string(),
            mime_type: MIME_GOOGLE_DOC.to_string(),
            folder_path: "folder".to_string(),
            modified_time: "2024-01-01T00:00:00Z".to_string(),
            extension: ".docx".to_string(),
            google_link: None,
        }
    }

    fn store() -> VectorStore {
        VectorStore::new(
            Arc::new(KeywordEmbedModel),
            Arc::new(MemoryBackend::new("documents")),
            "Drive".to_string(),
        )
    }

    fn doc(id: &str, name: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            text: text.to_string(),
            metadata: meta(name),
        }
    }

    #[tokio::test]
    async fn add_then_get_all_roundtrips() {
        let store = store();
        let docs = vec![doc("a", "A", "alpha text"), doc("b", "B", "beta text")];
        store.add_many(&docs).await.unwrap();
        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], docs[0]);
        assert_eq!(all[1], docs[1]);
    }

    #[tokio::test]
    async fn add_same_id_replaces() {
        let store = store();
        store.add_many(&[doc("a", "A", "old")]).await.unwrap();
        store.add_many(&[doc("a", "A", "new")]).await.unwrap();
        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text, "new");
    }

    #[tokio::test]
    async fn search_truncates_to_n() {
        let store = store();
        let docs: Vec<Document> = (0..8)
            .map(|i| doc(&format!("d{i}"), "D", "alpha alpha"))
            .collect();
        store.add_many(&docs).await.unwrap();
        let hits = store.search("alpha", 3, SearchOptions::default()).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn keyword_sorts_by_count_then_distance() {
        let store = store();
        store
            .add_many(&[
                doc("one", "One", "Jelena"),
                doc("two", "Two", "jelena and Jelena again"),
                doc("none", "None", "unrelated"),
            ])
            .await
            .unwrap();
        let hits = store
            .search(
                "alpha",
                10,
                SearchOptions {
                    keyword: Some("jelena".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "two");
        assert_eq!(hits[0].keyword_count, 2);
        assert_eq!(hits[1].id, "one");
        assert_eq!(hits[1].keyword_count, 1);
    }

    #[tokio::test]
    async fn max_distance_gates_results() {
        let store = store();
        store
            .add_many(&[doc("close", "C", "alpha match"), doc("far", "F", "nothing shared")])
            .await
            .unwrap();
        let hits = store
            .search(
                "alpha",
                10,
                SearchOptions {
                    max_distance: Some(0.2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.distance <= 0.2));
        assert!(hits.iter().any(|h| h.id == "close"));
        assert!(!hits.iter().any(|h| h.id == "far"));
    }

    #[tokio::test]
    async fn metadata_filter_is_exact() {
        let store = store();
        store
            .add_many(&[doc("a", "Report", "alpha"), doc("b", "Other", "alpha")])
            .await
            .unwrap();
        let mut filter = HashMap::new();
        filter.insert("name".to_string(), "Report".to_string());
        let hits = store
            .search(
                "alpha",
                10,
                SearchOptions {
                    metadata_filter: Some(filter),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn hit_paths_and_links_are_derived() {
        let store = store();
        store.add_many(&[doc("abc123", "Nested doc 2", "alpha")]).await.unwrap();
        let hits = store.search("alpha", 1, SearchOptions::default()).await.unwrap();
        assert_eq!(hits[0].path, "Drive/folder/Nested doc 2.docx");
        assert_eq!(
            hits[0].google_link,
            "https://docs.google.com/document/d/abc123"
        );
    }

    #[tokio::test]
    async fn stored_link_wins_over_derivation() {
        let store = store();
        let mut d = doc("x", "X", "alpha");
        d.metadata.google_link = Some("https://example.com/custom".to_string());
        d.metadata.mime_type = MIME_PDF.to_string();
        store.add_many(&[d]).await.unwrap();
        let hits = store.search("alpha", 1, SearchOptions::default()).await.unwrap();
        assert_eq!(hits[0].google_link, "https://example.com/custom");
    }

    #[tokio::test]
    async fn reset_empties_collection() {
        let store = store();
        store.add_many(&[doc("a", "A", "alpha")]).await.unwrap();
        store.reset().await.unwrap();
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.name, "documents");
    }

    #[test]
    fn cosine_distance_basics() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]) < 1e-9);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_distance(&[], &[]), 2.0);
    }
}
