use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::warn;

use super::config::ChromaConfig;
use super::embed::EmbeddingsProvider;
use super::store::{derive_chunk_id, KnowledgeStore};
use super::types::{ChunkFilters, ChunkMetadata, RetrievedChunk};
use crate::error::{RelayError, RelayResult};

/// HTTP client for a Chroma-compatible vector database.
///
/// One collection per project, named `project_{id}`, so project isolation is
/// structural: a query can only ever touch its own collection. The full
/// metadata travels as a `record_json` string next to the scalar fields used
/// for `where` filtering.
pub struct ChromaHttpStore {
    http: reqwest::Client,
    config: ChromaConfig,
    embedder: Arc<dyn EmbeddingsProvider>,
    collections: Mutex<HashMap<String, String>>,
}

impl ChromaHttpStore {
    pub fn new(config: ChromaConfig, embedder: Arc<dyn EmbeddingsProvider>) -> RelayResult<Self> {
        let timeout = Duration::from_millis(config.http_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RelayError::storage(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            http,
            config,
            embedder,
            collections: Mutex::new(HashMap::new()),
        })
    }

    fn collection_name(project_id: &str) -> String {
        format!("project_{project_id}")
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.config.api_token {
            builder.bearer_auth(token)
        } else {
            builder
        }
    }

    /// Get-or-create the project's collection, caching the handle.
    async fn ensure_collection(&self, project_id: &str) -> RelayResult<String> {
        let name = Self::collection_name(project_id);

        let mut cache = self.collections.lock().await;
        if let Some(id) = cache.get(&name) {
            return Ok(id.clone());
        }

        let payload = json!({ "name": name, "get_or_create": true });
        let response = self
            .apply_auth(self.http.post(self.endpoint("api/v1/collections")))
            .json(&payload)
            .send()
            .await
            .map_err(|err| RelayError::storage(format!("collection create failed: {err}")))?
            .error_for_status()
            .map_err(|err| RelayError::storage(format!("collection create rejected: {err}")))?;

        let handle: ChromaCollectionHandle = response
            .json()
            .await
            .map_err(|err| RelayError::storage(format!("collection response malformed: {err}")))?;

        cache.insert(name, handle.id.clone());
        Ok(handle.id)
    }

    /// Resolve an existing collection without creating it.
    async fn lookup_collection(&self, project_id: &str) -> RelayResult<Option<String>> {
        let name = Self::collection_name(project_id);

        {
            let cache = self.collections.lock().await;
            if let Some(id) = cache.get(&name) {
                return Ok(Some(id.clone()));
            }
        }

        let path = format!("api/v1/collections/{name}");
        let response = self
            .apply_auth(self.http.get(self.endpoint(&path)))
            .send()
            .await
            .map_err(|err| RelayError::storage(format!("collection lookup failed: {err}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let handle: ChromaCollectionHandle = response
            .error_for_status()
            .map_err(|err| RelayError::storage(format!("collection lookup rejected: {err}")))?
            .json()
            .await
            .map_err(|err| RelayError::storage(format!("collection response malformed: {err}")))?;

        self.collections
            .lock()
            .await
            .insert(name, handle.id.clone());
        Ok(Some(handle.id))
    }
}

/// Scalar metadata fields plus the serialized record, as stored per entry.
fn metadata_payload(metadata: &ChunkMetadata, ingested_at: &DateTime<Utc>) -> RelayResult<Value> {
    let record_json = serde_json::to_string(metadata)
        .map_err(|err| RelayError::storage(format!("metadata serialization failed: {err}")))?;

    let mut map = Map::new();
    map.insert("project_id".to_string(), json!(metadata.project_id));
    map.insert(
        "source_type".to_string(),
        json!(metadata.source_type.as_str()),
    );
    map.insert("origin_id".to_string(), json!(metadata.origin_id));
    if let Some(file_name) = &metadata.file_name {
        map.insert("file_name".to_string(), json!(file_name));
    }
    map.insert("chunk_index".to_string(), json!(metadata.chunk_index));
    map.insert("ingested_at".to_string(), json!(ingested_at.to_rfc3339()));
    map.insert("record_json".to_string(), json!(record_json));

    Ok(Value::Object(map))
}

/// Equality constraints in Chroma's `where` shape; `None` when unfiltered.
fn build_where(filters: &ChunkFilters) -> Option<Value> {
    let mut clauses = Vec::new();
    if let Some(source_type) = &filters.source_type {
        clauses.push(json!({ "source_type": { "$eq": source_type.as_str() } }));
    }
    if let Some(origin_id) = &filters.origin_id {
        clauses.push(json!({ "origin_id": { "$eq": origin_id } }));
    }
    if let Some(file_name) = &filters.file_name {
        clauses.push(json!({ "file_name": { "$eq": file_name } }));
    }

    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(json!({ "$and": clauses })),
    }
}

fn hit_from_row(id: &str, document: Option<&str>, metadata: Option<&Value>, distance: f32) -> Option<(RetrievedChunk, DateTime<Utc>)> {
    let metadata = metadata?;
    let record: ChunkMetadata = metadata
        .get("record_json")
        .and_then(|v| v.as_str())
        .and_then(|raw| serde_json::from_str(raw).ok())
        .or_else(|| {
            warn!(%id, "entry missing record_json; skipping");
            None
        })?;

    let ingested_at = metadata
        .get("ingested_at")
        .and_then(|v| v.as_str())
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some((
        RetrievedChunk {
            text: document.unwrap_or_default().to_string(),
            metadata: record,
            // Chroma reports distances; similarity search wants scores.
            score: 1.0 - distance,
        },
        ingested_at,
    ))
}

#[async_trait]
impl KnowledgeStore for ChromaHttpStore {
    async fn ingest(
        &self,
        project_id: &str,
        text: &str,
        mut metadata: ChunkMetadata,
        chunk_id: Option<String>,
    ) -> RelayResult<String> {
        metadata.project_id = project_id.to_string();

        let collection_id = self.ensure_collection(project_id).await?;
        let vector = self.embedder.embed(text).await?;
        let id = chunk_id.unwrap_or_else(|| derive_chunk_id(&metadata, text));
        let ingested_at = Utc::now();

        let payload = ChromaAddRequest {
            ids: vec![id.clone()],
            embeddings: vec![vector],
            documents: vec![text.to_string()],
            metadatas: vec![metadata_payload(&metadata, &ingested_at)?],
        };

        let path = format!("api/v1/collections/{collection_id}/add");
        self.apply_auth(self.http.post(self.endpoint(&path)))
            .json(&payload)
            .send()
            .await
            .map_err(|err| RelayError::storage(format!("add request failed: {err}")))?
            .error_for_status()
            .map_err(|err| RelayError::storage(format!("add rejected: {err}")))?;

        Ok(id)
    }

    async fn query(
        &self,
        project_id: &str,
        query_text: &str,
        filters: &ChunkFilters,
        k: usize,
    ) -> RelayResult<Vec<RetrievedChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let collection_id = match self.lookup_collection(project_id).await? {
            Some(id) => id,
            // Never-ingested project: a valid empty outcome.
            None => return Ok(Vec::new()),
        };

        let vector = self.embedder.embed(query_text).await?;

        let payload = ChromaQueryRequest {
            query_embeddings: vec![vector],
            n_results: k,
            r#where: build_where(filters),
            include: vec!["documents", "metadatas", "distances"],
        };

        let path = format!("api/v1/collections/{collection_id}/query");
        let response: ChromaQueryResponse = self
            .apply_auth(self.http.post(self.endpoint(&path)))
            .json(&payload)
            .send()
            .await
            .map_err(|err| RelayError::storage(format!("query request failed: {err}")))?
            .error_for_status()
            .map_err(|err| RelayError::storage(format!("query rejected: {err}")))?
            .json()
            .await
            .map_err(|err| RelayError::storage(format!("query response malformed: {err}")))?;

        let ids = response.ids.into_iter().next().unwrap_or_default();
        let documents = response.documents.into_iter().next().unwrap_or_default();
        let metadatas = response.metadatas.into_iter().next().unwrap_or_default();
        let distances = response.distances.into_iter().next().unwrap_or_default();

        let mut hits: Vec<(RetrievedChunk, DateTime<Utc>)> = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            let document = documents.get(i).and_then(|d| d.as_deref());
            let metadata = metadatas.get(i).and_then(|m| m.as_ref());
            let distance = distances.get(i).copied().unwrap_or(1.0);
            if let Some(hit) = hit_from_row(id, document, metadata, distance) {
                hits.push(hit);
            }
        }

        // The engine's equal-score ordering is unspecified; re-sort so ties
        // break by ingestion time.
        hits.sort_by(|a, b| {
            b.0.score
                .partial_cmp(&a.0.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        hits.truncate(k);

        Ok(hits.into_iter().map(|(hit, _)| hit).collect())
    }

    async fn purge_project(&self, project_id: &str) -> RelayResult<()> {
        let name = Self::collection_name(project_id);
        let path = format!("api/v1/collections/{name}");
        let response = self
            .apply_auth(self.http.delete(self.endpoint(&path)))
            .send()
            .await
            .map_err(|err| RelayError::storage(format!("delete request failed: {err}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RelayError::not_found(format!(
                "project '{project_id}' has no collection"
            )));
        }

        response
            .error_for_status()
            .map_err(|err| RelayError::storage(format!("delete rejected: {err}")))?;

        self.collections.lock().await.remove(&name);
        Ok(())
    }
}

#[derive(Deserialize)]
struct ChromaCollectionHandle {
    id: String,
}

#[derive(Serialize)]
struct ChromaAddRequest {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<String>,
    metadatas: Vec<Value>,
}

#[derive(Serialize)]
struct ChromaQueryRequest {
    query_embeddings: Vec<Vec<f32>>,
    n_results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#where: Option<Value>,
    include: Vec<&'static str>,
}

#[derive(Deserialize)]
struct ChromaQueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Vec<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Vec<Vec<Option<Value>>>,
    #[serde(default)]
    distances: Vec<Vec<f32>>,
}
