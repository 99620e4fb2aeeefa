//! Chroma REST backend for the vector store.
//!
//! Implements [`VectorBackend`] against a Chroma server. The collection is
//! resolved once in [`ChromaBackend::open`] (get-or-create); backend errors
//! all surface as "vector store unavailable" so callers know a retry is the
//! right recovery.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Duration;

use crate::models::{DocMetadata, Document};
use crate::store::{ScoredRow, VectorBackend};

pub struct ChromaBackend {
    client: reqwest::Client,
    base_url: String,
    collection_name: String,
    /// Collection UUID; replaced when `reset` recreates the collection.
    collection_id: RwLock<String>,
}

impl ChromaBackend {
    /// Connect and resolve (or create) the named collection.
    pub async fn open(base_url: &str, collection_name: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let backend = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection_name: collection_name.to_string(),
            collection_id: RwLock::new(String::new()),
        };
        let id = backend.get_or_create_collection().await?;
        *backend.collection_id.write().unwrap() = id;
        Ok(backend)
    }

    async fn get_or_create_collection(&self) -> Result<String> {
        let url = format!("{}/api/v1/collections", self.base_url);
        let body = json!({ "name": self.collection_name, "get_or_create": true });
        let response = self.post_json(&url, &body).await?;
        response
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("vector store unavailable: collection response missing id"))
    }

    fn collection_url(&self, op: &str) -> String {
        format!(
            "{}/api/v1/collections/{}/{}",
            self.base_url,
            self.collection_id.read().unwrap(),
            op
        )
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("vector store unavailable")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("vector store unavailable: HTTP {}: {}", status, text);
        }
        response.json().await.context("vector store unavailable")
    }
}

fn metadata_to_value(metadata: &DocMetadata) -> Value {
    serde_json::to_value(metadata).unwrap_or_else(|_| json!({}))
}

fn value_to_metadata(value: &Value) -> Result<DocMetadata> {
    serde_json::from_value(value.clone())
        .map_err(|e| anyhow!("stored metadata does not parse: {e}"))
}

#[async_trait]
impl VectorBackend for ChromaBackend {
    async fn upsert(
        &self,
        id: &str,
        embedding: Vec<f32>,
        text: &str,
        metadata: &DocMetadata,
    ) -> Result<()> {
        let body = json!({
            "ids": [id],
            "embeddings": [embedding],
            "documents": [text],
            "metadatas": [metadata_to_value(metadata)],
        });
        self.post_json(&self.collection_url("upsert"), &body).await?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], n: usize) -> Result<Vec<ScoredRow>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let body = json!({
            "query_embeddings": [embedding],
            "n_results": n,
            "include": ["documents", "metadatas", "distances"],
        });
        let response = self.post_json(&self.collection_url("query"), &body).await?;

        // Query responses nest one list per query embedding; we send one.
        let ids = first_batch(&response, "ids")?;
        let documents = first_batch(&response, "documents")?;
        let metadatas = first_batch(&response, "metadatas")?;
        let distances = first_batch(&response, "distances")?;

        let mut rows = Vec::with_capacity(ids.len());
        for i in 0..ids.len() {
            let id = ids[i]
                .as_str()
                .ok_or_else(|| anyhow!("query response id is not a string"))?;
            rows.push(ScoredRow {
                doc: Document {
                    id: id.to_string(),
                    text: documents
                        .get(i)
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    metadata: value_to_metadata(metadatas.get(i).unwrap_or(&Value::Null))?,
                },
                distance: distances.get(i).and_then(|d| d.as_f64()).unwrap_or(f64::MAX),
            });
        }
        Ok(rows)
    }

    async fn get_all(&self) -> Result<Vec<Document>> {
        let body = json!({ "include": ["documents", "metadatas"] });
        let response = self.post_json(&self.collection_url("get"), &body).await?;

        let ids = response
            .get("ids")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow!("get response missing ids"))?;
        let documents = response.get("documents").and_then(|v| v.as_array());
        let metadatas = response.get("metadatas").and_then(|v| v.as_array());

        let mut docs = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            let id = id
                .as_str()
                .ok_or_else(|| anyhow!("get response id is not a string"))?;
            docs.push(Document {
                id: id.to_string(),
                text: documents
                    .and_then(|d| d.get(i))
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string(),
                metadata: value_to_metadata(
                    metadatas.and_then(|m| m.get(i)).unwrap_or(&Value::Null),
                )?,
            });
        }
        Ok(docs)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let body = json!({ "ids": ids });
        self.post_json(&self.collection_url("delete"), &body).await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let url = self.collection_url("count");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("vector store unavailable")?;
        let status = response.status();
        if !status.is_success() {
            bail!("vector store unavailable: HTTP {}", status);
        }
        let count: u64 = response.json().await.context("vector store unavailable")?;
        Ok(count)
    }

    async fn reset(&self) -> Result<()> {
        let url = format!(
            "{}/api/v1/collections/{}",
            self.base_url, self.collection_name
        );
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("vector store unavailable")?;
        // 404 just means there was nothing to drop.
        if !response.status().is_success() && response.status().as_u16() != 404 {
            bail!("vector store unavailable: HTTP {}", response.status());
        }

        let id = self.get_or_create_collection().await?;
        *self.collection_id.write().unwrap() = id;
        Ok(())
    }

    fn collection_name(&self) -> &str {
        &self.collection_name
    }
}

/// Unwrap the outer per-query list of a query response field.
fn first_batch<'a>(response: &'a Value, field: &str) -> Result<&'a Vec<Value>> {
    response
        .get(field)
        .and_then(|v| v.as_array())
        .and_then(|v| v.first())
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("query response missing {field}"))
}
