//! Job lifecycle states.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::TagIndexError;

/// Well-known lifecycle states of a background job.
///
/// The index itself stores arbitrary state names (the job engine may define
/// custom states); this enum names the ones every deployment has and which the
/// dashboard counters always check.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Enqueued,
    Scheduled,
    Processing,
    Succeeded,
    Failed,
    Deleted,
    Awaiting,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::Enqueued,
        JobState::Scheduled,
        JobState::Processing,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Deleted,
        JobState::Awaiting,
    ];

    /// Display name, as the job engine writes it into job records.
    pub fn name(self) -> &'static str {
        match self {
            JobState::Enqueued => "Enqueued",
            JobState::Scheduled => "Scheduled",
            JobState::Processing => "Processing",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
            JobState::Deleted => "Deleted",
            JobState::Awaiting => "Awaiting",
        }
    }

    /// Lower-cased name used in storage keys.
    pub fn canonical(self) -> &'static str {
        match self {
            JobState::Enqueued => "enqueued",
            JobState::Scheduled => "scheduled",
            JobState::Processing => "processing",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Deleted => "deleted",
            JobState::Awaiting => "awaiting",
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobState {
    type Err = TagIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let canonical = canonical_state(s);
        JobState::ALL
            .into_iter()
            .find(|state| state.canonical() == canonical)
            .ok_or_else(|| TagIndexError::invalid_argument(format!("unknown job state: {s}")))
    }
}

/// Canonical storage form of a state name: trimmed and lower-cased.
pub fn canonical_state(name: &str) -> String {
    name.trim().to_lowercase()
}
