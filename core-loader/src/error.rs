use thiserror::Error;

/// Failure delivered to observers or returned by the driving layers.
///
/// Clonable because one failure fans out to every attached observer.
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    /// The transport gave up. `retryable` records the classification of the
    /// final attempt; by the time observers see this, retries are exhausted.
    #[error("Transport failed: {message}")]
    Transport { message: String, retryable: bool },

    /// The load was cancelled before completion.
    #[error("Load cancelled")]
    Cancelled,

    /// The payload could not be decoded. Never retried.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Writing the payload or its record to the disk store failed.
    #[error("Persist failed: {0}")]
    Persist(String),

    /// A store record pointed at a payload that could not be read back.
    #[error("Inconsistent cache state: {0}")]
    InconsistentCache(String),

    /// The key is not present in any store and loading was not permitted.
    #[error("Resource not in store")]
    NotCached,

    /// The coordinator task is gone.
    #[error("Coordinator unavailable")]
    CoordinatorGone,
}

pub type Result<T> = std::result::Result<T, LoadError>;
