use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provenance of a stored chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    ChatAnswer,
    Document,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatAnswer => "chat_answer",
            Self::Document => "document",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata stored alongside every chunk and matched by retrieval filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub project_id: String,
    pub source_type: SourceType,
    /// Question id for chat answers, document id for document chunks.
    pub origin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Interview question text, carried so answers cite their question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub chunk_index: usize,
    /// Byte offsets into the normalized source text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<(usize, usize)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl ChunkMetadata {
    /// Label suitable for citation display: file name for document chunks,
    /// the originating question for interview answers.
    pub fn origin_label(&self) -> String {
        if let Some(file_name) = &self.file_name {
            return file_name.clone();
        }
        match self.source_type {
            SourceType::ChatAnswer => self
                .question
                .as_ref()
                .map(|q| format!("Q&A: {q}"))
                .unwrap_or_else(|| "Q&A".to_string()),
            SourceType::Document => "Unknown".to_string(),
        }
    }
}

/// An immutable stored chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub timestamp: DateTime<Utc>,
}

/// Conjunction of equality constraints applied at retrieval time.
///
/// The project id is not a filter: it is a mandatory scope argument on every
/// store operation and can never be loosened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkFilters {
    pub source_type: Option<SourceType>,
    pub origin_id: Option<String>,
    pub file_name: Option<String>,
}

impl ChunkFilters {
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.source_type
            .as_ref()
            .is_none_or(|needle| metadata.source_type == *needle)
            && self
                .origin_id
                .as_ref()
                .is_none_or(|needle| metadata.origin_id == *needle)
            && self
                .file_name
                .as_ref()
                .is_none_or(|needle| metadata.file_name.as_deref() == Some(needle.as_str()))
    }
}

/// One retrieval hit, best first.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Human,
    Ai,
}

/// One turn of the new-member conversation, supplied by the caller per
/// request; the core never caches history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Human,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Ai,
            content: content.into(),
        }
    }
}

/// Citation entry attached to an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    /// Human-readable origin: file name or originating question.
    pub origin: String,
    pub origin_id: String,
    pub excerpt: String,
}

/// Result of one grounded query; created per query, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}
