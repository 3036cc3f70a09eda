//! Reclaims index entries of expired jobs.
//!
//! A job's membership record expires on its own, but the shared `tags:<tag>`
//! and `tags:<tag>:<state>` collections hold entries for many jobs and can
//! only be cleaned member by member. Expiring jobs are scheduled by
//! [`TagMembershipStore::propagate_expiry`](crate::index::TagMembershipStore::propagate_expiry);
//! this sweep removes the due ones.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use jobtags_core::{JobState, TagIndexResult, canonical_state};

use crate::config::TagIndexConfig;
use crate::keys::KeySpace;
use crate::store::{SetCommands, StoreResult, TagStorage};

/// Periodic maintenance over the expiry schedule.
///
/// Hosts call [`ExpiredJobReclaimer::reclaim_expired`] from whatever
/// maintenance hook they already run; nothing here spawns threads.
///
/// Cost: the job's own tag record may already have expired when the sweep
/// runs, so a batch walks the whole tag universe. That is one ZREM per tag
/// plus one SREM per (tag, state), whatever the batch size. Larger batches
/// amortize it; untagged jobs are never scheduled.
///
/// A job renewed between the schedule read and the unschedule keeps its
/// record and its new deadline, but its shared entries are already gone.
#[derive(Debug, Clone)]
pub struct ExpiredJobReclaimer<S> {
    storage: S,
    keys: KeySpace,
    states: Vec<String>,
    batch_size: usize,
}

impl<S> ExpiredJobReclaimer<S>
where
    S: TagStorage,
{
    pub fn new(storage: S, config: &TagIndexConfig) -> Self {
        // Built-in states are always swept so a narrowed config cannot strand entries.
        let states: BTreeSet<String> = config
            .known_states
            .iter()
            .map(|s| canonical_state(s))
            .chain(JobState::ALL.iter().map(|s| s.canonical().to_string()))
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            storage,
            keys: KeySpace::new(config.key_prefix.clone()),
            states: states.into_iter().collect(),
            batch_size: config.reclaim_batch_size.max(1),
        }
    }

    /// Remove up to one batch of jobs whose deadline is `<= now` from every
    /// tag and (tag, state) collection. Returns how many jobs were reclaimed.
    #[instrument(skip(self), fields(batch_size = self.batch_size), err)]
    pub fn reclaim_expired(&self, now: DateTime<Utc>) -> TagIndexResult<usize> {
        let reclaimed = self
            .storage
            .with_connection(|conn| self.sweep(conn, now.timestamp_millis() as f64))?;

        if reclaimed > 0 {
            info!(reclaimed, "expired jobs removed from tag index");
        }
        Ok(reclaimed)
    }

    /// Run batches until the schedule has nothing due.
    pub fn reclaim_all(&self, now: DateTime<Utc>) -> TagIndexResult<usize> {
        let mut total = 0;
        loop {
            let reclaimed = self.reclaim_expired(now)?;
            total += reclaimed;
            if reclaimed < self.batch_size {
                return Ok(total);
            }
        }
    }

    fn sweep<C: SetCommands>(&self, conn: &mut C, now_ms: f64) -> StoreResult<usize> {
        let schedule = self.keys.expiry_schedule();
        let due = conn.zrangebyscore(&schedule, now_ms, self.batch_size)?;
        if due.is_empty() {
            return Ok(0);
        }

        let tags = conn.zrange(&self.keys.tag_universe(), 0, -1)?;
        debug!(due = due.len(), tags = tags.len(), "sweeping tag collections");

        for tag in &tags {
            conn.zrem(&self.keys.tag_members(tag), &due)?;
            for state in &self.states {
                conn.srem(&self.keys.tag_state(tag, state), &due)?;
            }
        }

        // Unschedule last: a failed sweep is retried in full next time.
        self.settle(conn, &due, now_ms)
    }

    /// Drop the record and schedule entry of every job still due at `now_ms`.
    /// Jobs renewed or persisted since they were read are left alone.
    /// Returns how many were settled.
    fn settle<C: SetCommands>(
        &self,
        conn: &mut C,
        due: &[String],
        now_ms: f64,
    ) -> StoreResult<usize> {
        let schedule = self.keys.expiry_schedule();
        let mut settled = 0;

        for job_id in due {
            match conn.zscore(&schedule, job_id)? {
                Some(deadline) if deadline <= now_ms => {}
                _ => {
                    debug!(job_id = %job_id, "expiry changed during sweep");
                    continue;
                }
            }
            conn.del(&self.keys.job_tags(job_id))?;
            conn.zrem(&schedule, std::slice::from_ref(job_id))?;
            settled += 1;
        }

        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{StateIndexStore, TagMembershipStore};
    use crate::store::InMemoryTagStorage;
    use chrono::Duration as ChronoDuration;
    use jobtags_core::JobId;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        storage: Arc<InMemoryTagStorage>,
        membership: TagMembershipStore<Arc<InMemoryTagStorage>>,
        states: StateIndexStore<Arc<InMemoryTagStorage>>,
        reclaimer: ExpiredJobReclaimer<Arc<InMemoryTagStorage>>,
    }

    fn fixture(config: TagIndexConfig) -> Fixture {
        let storage = InMemoryTagStorage::arc();
        let keys = KeySpace::new(config.key_prefix.clone());
        Fixture {
            membership: TagMembershipStore::new(storage.clone(), keys.clone()),
            states: StateIndexStore::new(storage.clone(), keys),
            reclaimer: ExpiredJobReclaimer::new(storage.clone(), &config),
            storage,
        }
    }

    fn tagged(f: &Fixture, id: &str, tags: &[&str], state: &str) -> JobId {
        let job = JobId::parse(id).unwrap();
        f.membership.attach_tags(&job, tags).unwrap();
        f.states.move_state(&job, tags, None, Some(state)).unwrap();
        job
    }

    #[test]
    fn due_jobs_leave_every_collection() {
        let f = fixture(TagIndexConfig::default());
        let gone = tagged(&f, "J1", &["a", "b"], "Succeeded");
        let kept = tagged(&f, "J2", &["a"], "Succeeded");

        f.membership
            .propagate_expiry(&gone, Duration::from_secs(60))
            .unwrap();

        // not due yet
        assert_eq!(f.reclaimer.reclaim_expired(Utc::now()).unwrap(), 0);

        let later = Utc::now() + ChronoDuration::minutes(5);
        assert_eq!(f.reclaimer.reclaim_expired(later).unwrap(), 1);

        assert_eq!(f.states.members("a", None).unwrap(), vec![kept.to_string()]);
        assert_eq!(f.states.count("b", None).unwrap(), 0);
        assert_eq!(f.states.count("a", Some("succeeded")).unwrap(), 1);
        assert_eq!(f.states.count("b", Some("succeeded")).unwrap(), 0);
        assert!(f.membership.get_tags(&gone).unwrap().is_empty());
    }

    #[test]
    fn persisted_jobs_are_not_reclaimed() {
        let f = fixture(TagIndexConfig::default());
        let job = tagged(&f, "J1", &["a"], "Failed");

        f.membership
            .propagate_expiry(&job, Duration::from_secs(1))
            .unwrap();
        f.membership.persist_expiry(&job).unwrap();

        let later = Utc::now() + ChronoDuration::hours(1);
        assert_eq!(f.reclaimer.reclaim_expired(later).unwrap(), 0);
        assert_eq!(f.states.count("a", Some("failed")).unwrap(), 1);
    }

    #[test]
    fn custom_states_are_swept_alongside_built_in_ones() {
        let config = TagIndexConfig::default().with_known_states(["Archived"]);
        let f = fixture(config);
        let job = tagged(&f, "J1", &["a"], "Archived");
        let other = tagged(&f, "J2", &["a"], "Failed");

        f.membership
            .propagate_expiry(&job, Duration::from_secs(1))
            .unwrap();
        f.membership
            .propagate_expiry(&other, Duration::from_secs(1))
            .unwrap();

        let later = Utc::now() + ChronoDuration::minutes(1);
        assert_eq!(f.reclaimer.reclaim_all(later).unwrap(), 2);
        assert_eq!(f.states.count("a", Some("archived")).unwrap(), 0);
        assert_eq!(f.states.count("a", Some("failed")).unwrap(), 0);
    }

    #[test]
    fn batches_are_bounded() {
        let config = TagIndexConfig::default().with_reclaim_batch_size(2);
        let f = fixture(config);
        for i in 0..5 {
            let job = tagged(&f, &format!("J{i}"), &["a"], "Deleted");
            f.membership
                .propagate_expiry(&job, Duration::from_millis(1))
                .unwrap();
        }

        let later = Utc::now() + ChronoDuration::minutes(1);
        assert_eq!(f.reclaimer.reclaim_expired(later).unwrap(), 2);
        assert_eq!(f.reclaimer.reclaim_all(later).unwrap(), 3);
        assert_eq!(f.states.count("a", None).unwrap(), 0);
    }

    #[test]
    fn renewed_deadline_survives_the_unschedule() {
        let f = fixture(TagIndexConfig::default());
        let job = tagged(&f, "J1", &["a"], "Succeeded");
        let read_at = Utc::now();

        // Read as due, then renewed before the sweep settles it.
        f.membership
            .propagate_expiry(&job, Duration::from_secs(3600))
            .unwrap();
        let due = vec![job.to_string()];

        let settled = f
            .storage
            .with_connection(|conn| {
                f.reclaimer
                    .settle(conn, &due, read_at.timestamp_millis() as f64)
            })
            .unwrap();

        assert_eq!(settled, 0);
        let scheduled = f
            .storage
            .with_connection(|conn| conn.zscore("jobtags:tags-expiry", "J1"))
            .unwrap();
        assert!(scheduled.is_some());
        assert_eq!(f.membership.get_tags(&job).unwrap(), vec!["a"]);
    }

    #[test]
    fn untagged_jobs_cost_no_sweep() {
        let f = fixture(TagIndexConfig::default());
        tagged(&f, "J1", &["a"], "Failed");
        f.membership
            .propagate_expiry(&JobId::parse("bare").unwrap(), Duration::from_millis(1))
            .unwrap();

        let later = Utc::now() + ChronoDuration::minutes(1);
        assert_eq!(f.reclaimer.reclaim_expired(later).unwrap(), 0);
        assert_eq!(f.states.count("a", Some("failed")).unwrap(), 1);
    }
}
