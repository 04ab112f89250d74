use thiserror::Error;

/// Failures raised by the storage collaborators behind a sticky-bucket store.
///
/// The store operations themselves never return these: reads degrade to
/// "absent" and writes to [`crate::SaveAck::Unavailable`].
#[derive(Debug, Error)]
pub enum StickyBucketError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("blocking task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, StickyBucketError>;
