//! Per (tag, state) collections of job ids.

use tracing::{debug, instrument};

use jobtags_core::{JobId, TagIndexResult, canonical_state, ensure_tag};

use crate::keys::KeySpace;
use crate::store::{SetCommands, StoreResult, TagStorage};

/// State index: `tags:<tag>:<state>` holds the ids of jobs carrying `tag`
/// that are currently in `state`.
///
/// State names are stored lower-cased, so `"Failed"` and `"failed"` address
/// the same collection.
#[derive(Debug, Clone)]
pub struct StateIndexStore<S> {
    storage: S,
    keys: KeySpace,
}

impl<S> StateIndexStore<S>
where
    S: TagStorage,
{
    pub fn new(storage: S, keys: KeySpace) -> Self {
        Self { storage, keys }
    }

    /// Move a job between state collections for every tag in `tags`.
    ///
    /// `from_state = None` is a job being created, `to_state = None` a job
    /// leaving the index. Blank names count as absent. Moving between equal
    /// states (case-insensitive) does nothing.
    #[instrument(
        skip(self, tags),
        fields(job_id = %job_id, tag_count = tags.len(), from = ?from_state, to = ?to_state),
        err
    )]
    pub fn move_state<T: AsRef<str>>(
        &self,
        job_id: &JobId,
        tags: &[T],
        from_state: Option<&str>,
        to_state: Option<&str>,
    ) -> TagIndexResult<()> {
        for tag in tags {
            ensure_tag(tag.as_ref())?;
        }

        self.storage.with_connection(|conn| {
            move_state_on(conn, &self.keys, job_id.as_str(), tags, from_state, to_state)
        })?;
        Ok(())
    }

    /// Size of `(tag, state)`, or of the tag's whole membership when `state`
    /// is `None`.
    #[instrument(skip(self), err)]
    pub fn count(&self, tag: &str, state: Option<&str>) -> TagIndexResult<u64> {
        ensure_tag(tag)?;
        Ok(self
            .storage
            .with_connection(|conn| count_on(conn, &self.keys, tag, state))?)
    }

    /// Job ids in `(tag, state)`.
    ///
    /// Unscoped members come back in insertion order. State-scoped collections
    /// are unordered; they are returned sorted so repeated reads agree.
    #[instrument(skip(self), err)]
    pub fn members(&self, tag: &str, state: Option<&str>) -> TagIndexResult<Vec<String>> {
        ensure_tag(tag)?;
        Ok(self
            .storage
            .with_connection(|conn| members_on(conn, &self.keys, tag, state))?)
    }
}

/// Canonical state name, `None` for absent or blank input.
pub(crate) fn normalize_state(state: Option<&str>) -> Option<String> {
    state
        .map(canonical_state)
        .filter(|s| !s.is_empty())
}

pub(crate) fn move_state_on<C, T>(
    conn: &mut C,
    keys: &KeySpace,
    job_id: &str,
    tags: &[T],
    from_state: Option<&str>,
    to_state: Option<&str>,
) -> StoreResult<()>
where
    C: SetCommands,
    T: AsRef<str>,
{
    let from = normalize_state(from_state);
    let to = normalize_state(to_state);

    if from == to {
        debug!("state unchanged; nothing to move");
        return Ok(());
    }

    let job = [job_id.to_string()];
    for tag in tags {
        let tag = tag.as_ref();
        if let Some(from) = &from {
            conn.srem(&keys.tag_state(tag, from), &job)?;
        }
        if let Some(to) = &to {
            conn.sadd(&keys.tag_state(tag, to), job_id)?;
        }
    }

    Ok(())
}

pub(crate) fn count_on<C: SetCommands>(
    conn: &mut C,
    keys: &KeySpace,
    tag: &str,
    state: Option<&str>,
) -> StoreResult<u64> {
    match normalize_state(state) {
        None => conn.zcard(&keys.tag_members(tag)),
        Some(state) => conn.scard(&keys.tag_state(tag, &state)),
    }
}

pub(crate) fn members_on<C: SetCommands>(
    conn: &mut C,
    keys: &KeySpace,
    tag: &str,
    state: Option<&str>,
) -> StoreResult<Vec<String>> {
    match normalize_state(state) {
        None => conn.zrange(&keys.tag_members(tag), 0, -1),
        Some(state) => {
            let mut ids = conn.smembers(&keys.tag_state(tag, &state))?;
            ids.sort();
            Ok(ids)
        }
    }
}
