use thiserror::Error;

/// Failure of a single store operation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] mongodb::bson::ser::Error),

    /// Update-by-id matched no document
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Failure that aborts the ingestion of one quiz. Other quizzes in the
/// cycle are unaffected and the quiz is retried on the next cycle.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Failed to fetch quiz {quiz_id}: {source}")]
    Fetch {
        quiz_id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Quiz {quiz_id} source returned HTTP {status}")]
    Status { quiz_id: String, status: u16 },

    #[error("Timed out fetching quiz {quiz_id} after {seconds}s")]
    Timeout { quiz_id: String, seconds: u64 },

    #[error("Failed to store submissions: {0}")]
    Store(#[from] StoreError),
}

impl IngestionError {
    /// Whether a retry within the same cycle can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestionError::Timeout { .. } => true,
            IngestionError::Status { status, .. } => *status >= 500 || *status == 429,
            IngestionError::Fetch { source, .. } => source.is_connect() || source.is_timeout(),
            IngestionError::Store(_) => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestionError::Fetch { .. } => "fetch",
            IngestionError::Status { .. } => "status",
            IngestionError::Timeout { .. } => "timeout",
            IngestionError::Store(_) => "store",
        }
    }
}
