pub mod chroma;
pub mod config;
pub mod embed;
pub mod memory;
pub mod pipeline;
pub mod store;
pub mod types;

pub use pipeline::{build_knowledge_store_from_env, IngestOrigin, IngestionPipeline};
pub use store::{KnowledgeStore, SharedKnowledgeStore};
pub use types::{
    AnswerRecord, ChunkFilters, ChunkMetadata, ConversationTurn, RetrievedChunk, SourceRef,
    SourceType, TurnRole,
};
