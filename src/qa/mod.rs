pub mod answer;
pub mod contextualize;
pub mod interview;

pub use answer::{RetrievalAnswerer, NO_KNOWLEDGE_FALLBACK};
pub use contextualize::contextualize;
pub use interview::{
    DocumentInterview, InterviewFlow, ProjectInterview, SessionState, COMPLETION_SENTINEL,
};
