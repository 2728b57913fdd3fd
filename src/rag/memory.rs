use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use super::embed::{cosine_similarity, EmbeddingsProvider};
use super::store::{derive_chunk_id, KnowledgeStore};
use super::types::{ChunkFilters, ChunkMetadata, ChunkRecord, RetrievedChunk};
use crate::error::{RelayError, RelayResult};

/// In-memory knowledge store: embeds on ingest, ranks by cosine similarity
/// on query. Used for offline runs and as the reference implementation of
/// the store contract in tests.
pub struct InMemoryStore {
    embedder: Arc<dyn EmbeddingsProvider>,
    records: Mutex<Vec<StoredChunk>>,
    seq: AtomicU64,
}

struct StoredChunk {
    record: ChunkRecord,
    vector: Vec<f32>,
    seq: u64,
}

impl InMemoryStore {
    pub fn new(embedder: Arc<dyn EmbeddingsProvider>) -> Self {
        Self {
            embedder,
            records: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn ingest(
        &self,
        project_id: &str,
        text: &str,
        mut metadata: ChunkMetadata,
        chunk_id: Option<String>,
    ) -> RelayResult<String> {
        metadata.project_id = project_id.to_string();

        let vector = self.embedder.embed(text).await?;
        let id = chunk_id.unwrap_or_else(|| derive_chunk_id(&metadata, text));

        let mut records = self
            .records
            .lock()
            .map_err(|_| RelayError::storage("in-memory store lock poisoned"))?;
        records.push(StoredChunk {
            record: ChunkRecord {
                id: id.clone(),
                text: text.to_string(),
                metadata,
                timestamp: Utc::now(),
            },
            vector,
            seq: self.next_seq(),
        });

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

        let query_vector = self.embedder.embed(query_text).await?;

        let records = self
            .records
            .lock()
            .map_err(|_| RelayError::storage("in-memory store lock poisoned"))?;

        let mut scored: Vec<(f32, u64, RetrievedChunk)> = records
            .iter()
            .filter(|stored| stored.record.metadata.project_id == project_id)
            .filter(|stored| filters.matches(&stored.record.metadata))
            .map(|stored| {
                let score = cosine_similarity(&query_vector, &stored.vector);
                (
                    score,
                    stored.seq,
                    RetrievedChunk {
                        text: stored.record.text.clone(),
                        metadata: stored.record.metadata.clone(),
                        score,
                    },
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        Ok(scored.into_iter().take(k).map(|(_, _, hit)| hit).collect())
    }

    async fn purge_project(&self, project_id: &str) -> RelayResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| RelayError::storage("in-memory store lock poisoned"))?;

        let before = records.len();
        records.retain(|stored| stored.record.metadata.project_id != project_id);
        if records.len() == before {
            return Err(RelayError::not_found(format!(
                "project '{project_id}' has no stored chunks"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::embed::HashEmbedder;
    use crate::rag::types::SourceType;

    fn store() -> InMemoryStore {
        InMemoryStore::new(Arc::new(HashEmbedder::default()))
    }

    fn metadata(project_id: &str, origin_id: &str) -> ChunkMetadata {
        ChunkMetadata {
            project_id: project_id.to_string(),
            source_type: SourceType::Document,
            origin_id: origin_id.to_string(),
            file_name: None,
            question: None,
            chunk_index: 0,
            span: None,
            extra: None,
        }
    }

    #[tokio::test]
    async fn query_never_crosses_projects() {
        let store = store();
        store
            .ingest("a", "the deploy pipeline runs on push", metadata("a", "d1"), None)
            .await
            .unwrap();
        store
            .ingest("b", "the deploy pipeline runs on push", metadata("b", "d2"), None)
            .await
            .unwrap();

        // Permissive filters must not loosen the project scope.
        let hits = store
            .query("a", "deploy pipeline", &ChunkFilters::default(), 10)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|hit| hit.metadata.project_id == "a"));
    }

    #[tokio::test]
    async fn ties_break_by_insertion_order() {
        let store = store();
        let first = store
            .ingest("p", "identical chunk text", metadata("p", "d1"), None)
            .await
            .unwrap();
        let second = store
            .ingest(
                "p",
                "identical chunk text",
                metadata("p", "d2"),
                Some("chunk-later".to_string()),
            )
            .await
            .unwrap();
        assert_ne!(first, second);

        let hits = store
            .query("p", "identical chunk text", &ChunkFilters::default(), 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].score, hits[1].score);
        assert_eq!(hits[0].metadata.origin_id, "d1");
        assert_eq!(hits[1].metadata.origin_id, "d2");
    }

    #[tokio::test]
    async fn no_matches_is_an_empty_vec() {
        let store = store();
        let hits = store
            .query("missing", "anything", &ChunkFilters::default(), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn filters_narrow_within_the_project() {
        let store = store();
        store
            .ingest("p", "alpha content", metadata("p", "doc-1"), None)
            .await
            .unwrap();
        store
            .ingest("p", "alpha content", metadata("p", "doc-2"), None)
            .await
            .unwrap();

        let filters = ChunkFilters {
            origin_id: Some("doc-2".to_string()),
            ..ChunkFilters::default()
        };
        let hits = store.query("p", "alpha content", &filters, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.origin_id, "doc-2");
    }

    #[tokio::test]
    async fn supplied_chunk_id_is_stable_across_retries() {
        let store = store();
        let id1 = store
            .ingest(
                "p",
                "retry me",
                metadata("p", "d1"),
                Some("chunk-stable".to_string()),
            )
            .await
            .unwrap();
        let id2 = store
            .ingest(
                "p",
                "retry me",
                metadata("p", "d1"),
                Some("chunk-stable".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(id1, "chunk-stable");
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn purge_unknown_project_is_not_found() {
        let store = store();
        let err = store.purge_project("ghost").await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));

        store
            .ingest("p", "some text", metadata("p", "d1"), None)
            .await
            .unwrap();
        store.purge_project("p").await.unwrap();
        let hits = store
            .query("p", "some text", &ChunkFilters::default(), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn top_k_limits_results_by_relevance() {
        let store = store();
        store
            .ingest("p", "deploy with github actions", metadata("p", "d1"), None)
            .await
            .unwrap();
        store
            .ingest("p", "cats sleep in the afternoon", metadata("p", "d2"), None)
            .await
            .unwrap();

        let hits = store
            .query("p", "github actions deploy", &ChunkFilters::default(), 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.origin_id, "d1");
    }
}
