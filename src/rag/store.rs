use std::sync::Arc;

use async_trait::async_trait;

use super::types::{ChunkFilters, ChunkMetadata, RetrievedChunk};
use crate::error::RelayResult;

/// Metadata-filterable vector index, scoped per project.
///
/// Every operation names its project explicitly; implementations must never
/// let a query observe chunks from a different project, no matter how
/// permissive the filters are.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Embed `text` and persist it under `project_id`.
    ///
    /// Returns the chunk id. Ids are content-derived unless the caller
    /// supplies `chunk_id`, which makes retries stable.
    async fn ingest(
        &self,
        project_id: &str,
        text: &str,
        metadata: ChunkMetadata,
        chunk_id: Option<String>,
    ) -> RelayResult<String>;

    /// Similarity search restricted to `project_id` and `filters`.
    ///
    /// Returns at most `k` hits by descending score, ties broken by
    /// insertion order. No matches is an empty vec, not an error.
    async fn query(
        &self,
        project_id: &str,
        query_text: &str,
        filters: &ChunkFilters,
        k: usize,
    ) -> RelayResult<Vec<RetrievedChunk>>;

    /// Drop every chunk belonging to `project_id`.
    ///
    /// `NotFound` when the project has never been ingested.
    async fn purge_project(&self, project_id: &str) -> RelayResult<()>;
}

pub type SharedKnowledgeStore = Arc<dyn KnowledgeStore>;

/// Content-derived chunk id shared by the store backends.
pub(crate) fn derive_chunk_id(metadata: &ChunkMetadata, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(metadata.project_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(metadata.origin_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(metadata.chunk_index.to_le_bytes().as_slice());
    hasher.update(b"\0");
    hasher.update(text.as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("chunk-{}", &hex.as_str()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::types::SourceType;

    #[test]
    fn chunk_ids_are_content_derived() {
        let metadata = ChunkMetadata {
            project_id: "p1".to_string(),
            source_type: SourceType::Document,
            origin_id: "doc-1".to_string(),
            file_name: None,
            question: None,
            chunk_index: 0,
            span: None,
            extra: None,
        };
        let a = derive_chunk_id(&metadata, "same text");
        let b = derive_chunk_id(&metadata, "same text");
        let c = derive_chunk_id(&metadata, "other text");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("chunk-"));

        let other_index = ChunkMetadata {
            chunk_index: 1,
            ..metadata
        };
        assert_ne!(a, derive_chunk_id(&other_index, "same text"));
    }
}
