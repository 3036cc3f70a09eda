//! Tag membership: the per-job tag record and the per-tag job collection.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument};

use jobtags_core::{JobId, TagIndexResult, ensure_tag};

use crate::keys::KeySpace;
use crate::store::{SetCommands, StoreResult, TagStorage};

/// Records which tags a job carries.
///
/// Two collections are written per attach:
/// - `job:<id>:tags`, ordered by first-seen position;
/// - `tags:<tag>`, ordered by insertion weight (a shared monotonic counter).
///
/// Every tag is also registered in the tag universe used by tag search.
#[derive(Debug, Clone)]
pub struct TagMembershipStore<S> {
    storage: S,
    keys: KeySpace,
}

impl<S> TagMembershipStore<S>
where
    S: TagStorage,
{
    pub fn new(storage: S, keys: KeySpace) -> Self {
        Self { storage, keys }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Attach `tags` to a job. Idempotent: tags already attached keep their
    /// position and insertion weight.
    #[instrument(skip(self, tags), fields(job_id = %job_id, tag_count = tags.len()), err)]
    pub fn attach_tags<T: AsRef<str>>(&self, job_id: &JobId, tags: &[T]) -> TagIndexResult<()> {
        for tag in tags {
            ensure_tag(tag.as_ref())?;
        }
        if tags.is_empty() {
            return Ok(());
        }

        let added = self
            .storage
            .with_connection(|conn| attach_on(conn, &self.keys, job_id.as_str(), tags))?;
        debug!(added, "tags attached");
        Ok(())
    }

    /// Tags of a job in attach order; empty when the job is unknown.
    #[instrument(skip(self), fields(job_id = %job_id), err)]
    pub fn get_tags(&self, job_id: &JobId) -> TagIndexResult<Vec<String>> {
        Ok(self
            .storage
            .with_connection(|conn| tags_on(conn, &self.keys, job_id.as_str()))?)
    }

    /// Expire the job's membership record after `ttl` and schedule the job for
    /// removal from the shared per-tag collections.
    ///
    /// Shared collections never expire as a unit; the reclaimer strips the
    /// job out of them once the deadline has passed. A job without tags has
    /// no record and is not scheduled.
    #[instrument(skip(self), fields(job_id = %job_id, ttl_ms = ttl.as_millis() as u64), err)]
    pub fn propagate_expiry(&self, job_id: &JobId, ttl: Duration) -> TagIndexResult<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let deadline = Utc::now().timestamp_millis().saturating_add(ttl_ms);

        let scheduled = self.storage.with_connection(|conn| {
            if !conn.expire(&self.keys.job_tags(job_id.as_str()), ttl)? {
                return Ok(false);
            }
            conn.zadd(&self.keys.expiry_schedule(), job_id.as_str(), deadline as f64)?;
            Ok(true)
        })?;
        debug!(scheduled, "expiry propagated");
        Ok(())
    }

    /// Undo [`TagMembershipStore::propagate_expiry`]: the record lives on and
    /// the job is no longer scheduled for reclamation.
    #[instrument(skip(self), fields(job_id = %job_id), err)]
    pub fn persist_expiry(&self, job_id: &JobId) -> TagIndexResult<()> {
        self.storage.with_connection(|conn| {
            conn.persist(&self.keys.job_tags(job_id.as_str()))?;
            conn.zrem(&self.keys.expiry_schedule(), &[job_id.to_string()])
                .map(|_| ())
        })?;
        Ok(())
    }
}

pub(crate) fn attach_on<C, T>(
    conn: &mut C,
    keys: &KeySpace,
    job_id: &str,
    tags: &[T],
) -> StoreResult<usize>
where
    C: SetCommands,
    T: AsRef<str>,
{
    let record = keys.job_tags(job_id);
    let weight = conn.incr(&keys.insertion_counter())? as f64;
    let mut position = conn.zcard(&record)?;
    let mut added = 0;

    for tag in tags {
        let tag = tag.as_ref();
        if conn.zadd_nx(&record, tag, position as f64)? {
            position += 1;
            added += 1;
        }
        conn.zadd_nx(&keys.tag_members(tag), job_id, weight)?;
        conn.zadd_nx(&keys.tag_universe(), tag, weight)?;
    }

    Ok(added)
}

pub(crate) fn tags_on<C: SetCommands>(
    conn: &mut C,
    keys: &KeySpace,
    job_id: &str,
) -> StoreResult<Vec<String>> {
    conn.zrange(&keys.job_tags(job_id), 0, -1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTagStorage;
    use jobtags_core::TagIndexError;
    use std::sync::Arc;

    fn store() -> (Arc<InMemoryTagStorage>, TagMembershipStore<Arc<InMemoryTagStorage>>) {
        let storage = InMemoryTagStorage::arc();
        let membership = TagMembershipStore::new(storage.clone(), KeySpace::new("t:"));
        (storage, membership)
    }

    fn job(id: &str) -> JobId {
        JobId::parse(id).unwrap()
    }

    #[test]
    fn attach_keeps_first_seen_order_and_dedups() {
        let (_, membership) = store();
        let j = job("J1");

        membership.attach_tags(&j, &["b", "a", "b"]).unwrap();
        membership.attach_tags(&j, &["c", "a"]).unwrap();

        assert_eq!(membership.get_tags(&j).unwrap(), vec!["b", "a", "c"]);
    }

    #[test]
    fn unknown_job_has_no_tags() {
        let (_, membership) = store();
        assert!(membership.get_tags(&job("nope")).unwrap().is_empty());
    }

    #[test]
    fn empty_tag_is_rejected_before_io() {
        let (storage, membership) = store();
        storage.set_offline(true);

        let err = membership.attach_tags(&job("J1"), &["ok", ""]).unwrap_err();
        assert!(matches!(err, TagIndexError::InvalidArgument(_)));
    }

    #[test]
    fn tag_collections_keep_insertion_order() {
        let (storage, membership) = store();
        for id in ["J3", "J1", "J2"] {
            membership.attach_tags(&job(id), &["shared"]).unwrap();
        }
        // re-attaching must not move J3 to the back
        membership.attach_tags(&job("J3"), &["shared"]).unwrap();

        let members = storage
            .with_connection(|conn| conn.zrange("t:tags:shared", 0, -1))
            .unwrap();
        assert_eq!(members, vec!["J3", "J1", "J2"]);

        let universe = storage
            .with_connection(|conn| conn.zrange("t:tags", 0, -1))
            .unwrap();
        assert_eq!(universe, vec!["shared"]);
    }

    #[test]
    fn expiry_is_scheduled_and_persist_clears_it() {
        let (storage, membership) = store();
        let j = job("J1");
        membership.attach_tags(&j, &["x"]).unwrap();

        membership.propagate_expiry(&j, Duration::from_secs(60)).unwrap();
        let ttl = storage
            .with_connection(|conn| conn.ttl("t:job:J1:tags"))
            .unwrap();
        assert!(ttl.is_some());
        let scheduled = storage
            .with_connection(|conn| conn.zcard("t:tags-expiry"))
            .unwrap();
        assert_eq!(scheduled, 1);

        membership.persist_expiry(&j).unwrap();
        let ttl = storage
            .with_connection(|conn| conn.ttl("t:job:J1:tags"))
            .unwrap();
        assert_eq!(ttl, None);
        let scheduled = storage
            .with_connection(|conn| conn.zcard("t:tags-expiry"))
            .unwrap();
        assert_eq!(scheduled, 0);
    }

    #[test]
    fn untagged_job_is_never_scheduled() {
        let (storage, membership) = store();

        membership
            .propagate_expiry(&job("untagged"), Duration::from_secs(1))
            .unwrap();

        let scheduled = storage
            .with_connection(|conn| conn.zcard("t:tags-expiry"))
            .unwrap();
        assert_eq!(scheduled, 0);
        assert!(storage.live_keys().is_empty());
    }

    #[test]
    fn unreachable_store_is_reported() {
        let (storage, membership) = store();
        storage.set_offline(true);
        let err = membership.get_tags(&job("J1")).unwrap_err();
        assert!(err.is_transient());
    }
}
