//! Job identifiers and tag validation.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TagIndexError, TagIndexResult};

/// Identifier of a background job.
///
/// Job ids are owned by the external job engine and are opaque to the index;
/// the only rule enforced here is that they are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing ids explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap an existing identifier, rejecting empty/blank values.
    pub fn parse(value: impl Into<String>) -> TagIndexResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(TagIndexError::invalid_argument("job id must not be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = TagIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reject an empty tag.
pub fn ensure_tag(tag: &str) -> TagIndexResult<()> {
    if tag.is_empty() {
        return Err(TagIndexError::invalid_argument("tag must not be empty"));
    }
    Ok(())
}

/// Reject an empty tag list or any empty tag in it.
pub fn ensure_tags<T: AsRef<str>>(tags: &[T]) -> TagIndexResult<()> {
    if tags.is_empty() {
        return Err(TagIndexError::invalid_argument("at least one tag is required"));
    }
    for tag in tags {
        ensure_tag(tag.as_ref())?;
    }
    Ok(())
}
