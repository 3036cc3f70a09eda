//! Keeps the state index consistent with job state transitions.

use std::time::Duration;

use tracing::{debug, instrument};

use jobtags_core::{JobId, TagIndexError, TagIndexResult};
use jobtags_events::{StateTransition, TransitionHandler};

use crate::index::membership::{TagMembershipStore, tags_on};
use crate::index::state_index::move_state_on;
use crate::keys::KeySpace;
use crate::store::TagStorage;

/// Transition callback driven by the job engine.
///
/// Each call reads the job's tags and moves it between state collections on
/// one storage connection. Errors are returned, never retried.
#[derive(Debug, Clone)]
pub struct StateTransitionListener<S> {
    storage: S,
    keys: KeySpace,
    membership: TagMembershipStore<S>,
}

impl<S> StateTransitionListener<S>
where
    S: TagStorage + Clone,
{
    pub fn new(storage: S, keys: KeySpace) -> Self {
        let membership = TagMembershipStore::new(storage.clone(), keys.clone());
        Self {
            storage,
            keys,
            membership,
        }
    }

    /// Apply one committed transition. `from_state = None` means the job was
    /// just created; `to_state = None` means it is leaving with no successor.
    ///
    /// Rollbacks call this with the states swapped.
    #[instrument(
        skip(self),
        fields(job_id = %job_id, from = ?from_state, to = ?to_state),
        err
    )]
    pub fn on_transition(
        &self,
        job_id: &JobId,
        from_state: Option<&str>,
        to_state: Option<&str>,
    ) -> TagIndexResult<()> {
        let keys = &self.keys;
        let moved = self.storage.with_connection(|conn| {
            let tags = tags_on(conn, keys, job_id.as_str())?;
            if tags.is_empty() {
                return Ok(0);
            }
            move_state_on(conn, keys, job_id.as_str(), &tags, from_state, to_state)?;
            Ok(tags.len())
        })?;

        debug!(tags = moved, "state index updated");
        Ok(())
    }
}

impl<S> TransitionHandler for StateTransitionListener<S>
where
    S: TagStorage + Clone,
{
    type Error = TagIndexError;

    fn on_state_applied(&self, transition: &StateTransition) -> Result<(), Self::Error> {
        self.on_transition(
            transition.job_id(),
            transition.old_state(),
            transition.new_state(),
        )
    }

    fn on_expire(&self, job_id: &JobId, expire_in: Duration) -> Result<(), Self::Error> {
        self.membership.propagate_expiry(job_id, expire_in)
    }

    fn on_persist(&self, job_id: &JobId) -> Result<(), Self::Error> {
        self.membership.persist_expiry(job_id)
    }
}
