use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobtags_core::JobId;

/// A committed job state transition.
///
/// - `old_state` is `None` when the job was just created.
/// - `new_state` is `None` when the job was removed with no successor state.
///
/// State names are kept as the engine reported them; consumers canonicalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    job_id: JobId,
    old_state: Option<String>,
    new_state: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(
        job_id: JobId,
        old_state: Option<impl Into<String>>,
        new_state: Option<impl Into<String>>,
    ) -> Self {
        Self {
            job_id,
            old_state: old_state.map(Into::into),
            new_state: new_state.map(Into::into),
            occurred_at: Utc::now(),
        }
    }

    /// First transition of a freshly created job.
    pub fn created(job_id: JobId, state: impl Into<String>) -> Self {
        Self::new(job_id, None::<String>, Some(state))
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn old_state(&self) -> Option<&str> {
        self.old_state.as_deref()
    }

    pub fn new_state(&self) -> Option<&str> {
        self.new_state.as_deref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// The transition that undoes this one (used for rollbacks).
    pub fn reversed(&self) -> Self {
        Self {
            job_id: self.job_id.clone(),
            old_state: self.new_state.clone(),
            new_state: self.old_state.clone(),
            occurred_at: self.occurred_at,
        }
    }
}
