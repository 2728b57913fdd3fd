use thiserror::Error;

/// Error taxonomy for the knowledge-transfer core.
///
/// Each variant names the stage that failed so callers can decide on retry
/// and user messaging without parsing message strings. The core never
/// retries on its own.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Malformed input: empty text, unknown content kind, missing project scope.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The embedding capability was unavailable or rejected the input.
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// The LLM capability was unavailable, rejected the input, or returned
    /// unusable output.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Persistence or read failure in the knowledge store.
    #[error("Storage failure: {0}")]
    Storage(String),

    /// A project or document with no data was addressed where data is
    /// required. Distinct from a query returning zero matches, which is a
    /// valid empty outcome.
    #[error("Not found: {0}")]
    NotFound(String),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
