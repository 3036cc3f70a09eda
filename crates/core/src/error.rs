//! Tag index error model.

use thiserror::Error;

/// Result type used across the tag index.
pub type TagIndexResult<T> = Result<T, TagIndexError>;

/// Error taxonomy surfaced to callers of the index.
///
/// `InvalidArgument` is raised before any storage round trip. `IndexUnavailable`
/// always propagates: a dropped index update leaves a permanently stale entry,
/// so callers (the job engine) decide whether to retry the whole transition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagIndexError {
    /// An identifier or tag was empty/malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backing store could not be reached or a command failed.
    #[error("tag index unavailable: {0}")]
    IndexUnavailable(String),

    /// A job payload could not be decoded (type no longer resolvable, bad JSON).
    ///
    /// Listing never returns this; the materializer turns it into a tombstone.
    #[error("job payload could not be deserialized: {0}")]
    Deserialization(String),
}

impl TagIndexError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::IndexUnavailable(msg.into())
    }

    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }

    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::IndexUnavailable(_))
    }
}
