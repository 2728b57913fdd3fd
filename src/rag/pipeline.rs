use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::chroma::ChromaHttpStore;
use super::config::{ChromaConfig, EmbeddingConfig};
use super::embed::{EmbeddingsProvider, HashEmbedder, OpenAiEmbeddingsClient};
use super::memory::InMemoryStore;
use super::store::SharedKnowledgeStore;
use super::types::{ChunkMetadata, SourceType};
use crate::chunk::{chunk, ChunkConfig, CodeLanguage, ContentKind};
use crate::error::{RelayError, RelayResult};
use crate::normalize::normalize;

/// Where ingested text came from; determines chunk provenance metadata.
#[derive(Debug, Clone)]
pub enum IngestOrigin {
    Document {
        document_id: String,
        file_name: Option<String>,
    },
    ChatAnswer {
        question_id: String,
        question: String,
    },
}

impl IngestOrigin {
    fn source_type(&self) -> SourceType {
        match self {
            Self::Document { .. } => SourceType::Document,
            Self::ChatAnswer { .. } => SourceType::ChatAnswer,
        }
    }

    fn origin_id(&self) -> &str {
        match self {
            Self::Document { document_id, .. } => document_id,
            Self::ChatAnswer { question_id, .. } => question_id,
        }
    }

    fn file_name(&self) -> Option<&str> {
        match self {
            Self::Document { file_name, .. } => file_name.as_deref(),
            Self::ChatAnswer { .. } => None,
        }
    }

    fn question(&self) -> Option<&str> {
        match self {
            Self::Document { .. } => None,
            Self::ChatAnswer { question, .. } => Some(question),
        }
    }
}

/// Normalize → chunk → embed → store, one call per source text.
pub struct IngestionPipeline {
    store: SharedKnowledgeStore,
}

impl IngestionPipeline {
    pub fn new(store: SharedKnowledgeStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SharedKnowledgeStore {
        &self.store
    }

    /// Ingest one source text under `project_id`, returning the chunk ids.
    #[instrument(skip_all, fields(project_id = %project_id, kind = kind.as_str()))]
    pub async fn ingest_text(
        &self,
        project_id: &str,
        raw_text: &str,
        kind: ContentKind,
        origin: IngestOrigin,
    ) -> RelayResult<Vec<String>> {
        if project_id.trim().is_empty() {
            return Err(RelayError::validation("project id must not be empty"));
        }

        let clean = normalize(raw_text);
        if clean.is_empty() {
            return Err(RelayError::validation("text is empty after cleaning"));
        }

        let language = origin.file_name().and_then(CodeLanguage::from_extension);
        let config = ChunkConfig::for_kind(kind, language);
        let spans = chunk(&clean, kind, &config);

        let mut ids = Vec::with_capacity(spans.len());
        for (index, span) in spans.iter().enumerate() {
            let metadata = ChunkMetadata {
                project_id: project_id.to_string(),
                source_type: origin.source_type(),
                origin_id: origin.origin_id().to_string(),
                file_name: origin.file_name().map(str::to_string),
                question: origin.question().map(str::to_string),
                chunk_index: index,
                span: Some((span.start, span.end)),
                extra: None,
            };
            let id = self
                .store
                .ingest(project_id, &span.text, metadata, None)
                .await?;
            ids.push(id);
        }

        info!(chunks = ids.len(), "ingestion complete");
        Ok(ids)
    }

    /// Store an answered interview question, linking it back to its question.
    pub async fn ingest_answer(
        &self,
        project_id: &str,
        question_id: &str,
        question: &str,
        answer: &str,
    ) -> RelayResult<Vec<String>> {
        self.ingest_text(
            project_id,
            answer,
            ContentKind::Prose,
            IngestOrigin::ChatAnswer {
                question_id: question_id.to_string(),
                question: question.to_string(),
            },
        )
        .await
    }
}

/// Build a knowledge store from env configuration, optionally falling back
/// to the offline stack (hash embedder + in-memory store).
pub fn build_knowledge_store_from_env(
    default_to_memory: bool,
) -> RelayResult<SharedKnowledgeStore> {
    let embedder: Arc<dyn EmbeddingsProvider> = match EmbeddingConfig::from_env() {
        Ok(config) => Arc::new(OpenAiEmbeddingsClient::from_config(&config)?),
        Err(err) if default_to_memory => {
            warn!(?err, "Embedding config missing; using deterministic hash embedder");
            Arc::new(HashEmbedder::default())
        }
        Err(err) => return Err(err),
    };

    match ChromaConfig::from_env() {
        Ok(config) => {
            let store: SharedKnowledgeStore = Arc::new(ChromaHttpStore::new(config, embedder)?);
            Ok(store)
        }
        Err(err) if default_to_memory => {
            warn!(?err, "Vector store config missing; using in-memory store");
            let store: SharedKnowledgeStore = Arc::new(InMemoryStore::new(embedder));
            Ok(store)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::types::ChunkFilters;

    fn pipeline() -> IngestionPipeline {
        let store: SharedKnowledgeStore =
            Arc::new(InMemoryStore::new(Arc::new(HashEmbedder::default())));
        IngestionPipeline::new(store)
    }

    fn document_origin(file_name: &str) -> IngestOrigin {
        IngestOrigin::Document {
            document_id: "doc-1".to_string(),
            file_name: Some(file_name.to_string()),
        }
    }

    #[tokio::test]
    async fn blank_project_id_is_rejected() {
        let err = pipeline()
            .ingest_text("  ", "some text", ContentKind::Prose, document_origin("a.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn text_empty_after_cleaning_is_rejected() {
        let err = pipeline()
            .ingest_text(
                "p1",
                "\u{1F600}\u{1F680}\n\n",
                ContentKind::Prose,
                document_origin("a.txt"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn ingested_document_chunks_are_retrievable() {
        let pipeline = pipeline();
        let ids = pipeline
            .ingest_text(
                "p1",
                "We deploy via GitHub Actions to staging, then promote to prod.",
                ContentKind::Prose,
                document_origin("deploy.md"),
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        let hits = pipeline
            .store()
            .query("p1", "How do we deploy?", &ChunkFilters::default(), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.file_name.as_deref(), Some("deploy.md"));
        assert_eq!(hits[0].metadata.origin_id, "doc-1");
        assert!(hits[0].text.contains("GitHub Actions"));
    }

    #[tokio::test]
    async fn answers_link_back_to_their_question() {
        let pipeline = pipeline();
        pipeline
            .ingest_answer(
                "p1",
                "q-3",
                "What is the standard deployment process?",
                "Merge to main; CI builds and ships to staging automatically.",
            )
            .await
            .unwrap();

        let filters = ChunkFilters {
            origin_id: Some("q-3".to_string()),
            ..ChunkFilters::default()
        };
        let hits = pipeline
            .store()
            .query("p1", "deployment process", &filters, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].metadata.question.as_deref(),
            Some("What is the standard deployment process?")
        );
        assert_eq!(hits[0].metadata.source_type, SourceType::ChatAnswer);
    }

    #[tokio::test]
    async fn long_input_produces_multiple_ordered_chunks() {
        let pipeline = pipeline();
        let text = (0..60)
            .map(|i| format!("Operational note number {i} about the release train."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let ids = pipeline
            .ingest_text("p1", &text, ContentKind::Prose, document_origin("notes.txt"))
            .await
            .unwrap();
        assert!(ids.len() > 1);

        let hits = pipeline
            .store()
            .query("p1", "release train notes", &ChunkFilters::default(), 50)
            .await
            .unwrap();
        assert_eq!(hits.len(), ids.len());
        let mut indices: Vec<usize> = hits.iter().map(|h| h.metadata.chunk_index).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..ids.len()).collect::<Vec<_>>());
    }
}
