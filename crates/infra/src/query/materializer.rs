//! Turns job ids into display-ready descriptors.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{instrument, warn};

use jobtags_core::{JobId, TagIndexResult};

use crate::keys::KeySpace;
use crate::query::decoder::{DecodedJob, InvocationDecoder, JsonInvocationDecoder};
use crate::query::record::{FieldMap, JobRecord};
use crate::store::{SetCommands, StoreResult, TagStorage};

/// One entry of a listing page.
///
/// `job` is `None` for tombstones: jobs whose payload can no longer be
/// decoded, or whose record is gone. State and timestamps are still filled in
/// from whatever the record holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchingJob {
    pub job_id: String,
    pub job: Option<DecodedJob>,
    pub state: Option<String>,
    pub state_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub result_at: Option<DateTime<Utc>>,
    pub enqueue_at: Option<DateTime<Utc>>,
    pub expire_at: Option<DateTime<Utc>>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl MatchingJob {
    pub fn is_tombstone(&self) -> bool {
        self.job.is_none()
    }
}

/// Reads `job:<id>` and `job:<id>:state` and decodes the invocation.
#[derive(Debug, Clone)]
pub struct JobMaterializer<S, D = JsonInvocationDecoder> {
    storage: S,
    keys: KeySpace,
    decoder: D,
}

impl<S, D> JobMaterializer<S, D>
where
    S: TagStorage,
    D: InvocationDecoder,
{
    pub fn new(storage: S, keys: KeySpace, decoder: D) -> Self {
        Self {
            storage,
            keys,
            decoder,
        }
    }

    /// Descriptor for one job. Decoding failures yield a tombstone; only
    /// storage failures are errors.
    #[instrument(skip(self), fields(job_id = %job_id), err)]
    pub fn materialize(&self, job_id: &JobId) -> TagIndexResult<MatchingJob> {
        Ok(self
            .storage
            .with_connection(|conn| self.materialize_on(conn, job_id.as_str()))?)
    }

    pub(crate) fn materialize_on<C: SetCommands>(
        &self,
        conn: &mut C,
        job_id: &str,
    ) -> StoreResult<MatchingJob> {
        let record = JobRecord::new(
            FieldMap::new(conn.hgetall(&self.keys.job(job_id))?),
            FieldMap::new(conn.hgetall(&self.keys.job_state(job_id))?),
        );
        Ok(self.describe(job_id, &record))
    }

    fn describe(&self, job_id: &str, record: &JobRecord) -> MatchingJob {
        let job = if record.is_missing() {
            warn!(job_id, "job record missing; listing as tombstone");
            None
        } else {
            match self.decoder.decode(&record.invocation()) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(job_id, error = %e, "job payload not decodable; listing as tombstone");
                    None
                }
            }
        };

        MatchingJob {
            job_id: job_id.to_string(),
            job,
            state: record.state_name().map(str::to_string),
            state_reason: record.state_reason().map(str::to_string),
            created_at: record.created_at(),
            result_at: record.result_at(),
            enqueue_at: record.enqueue_at(),
            expire_at: record.expire_at(),
            fetched_at: record.fetched_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTagStorage;
    use std::sync::Arc;

    fn seed(storage: &InMemoryTagStorage, id: &str, job: &[(&str, &str)], state: &[(&str, &str)]) {
        let keys = KeySpace::default();
        let owned = |pairs: &[(&str, &str)]| -> Vec<(String, String)> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        storage
            .with_connection(|conn| {
                conn.hset_multiple(&keys.job(id), &owned(job))?;
                conn.hset_multiple(&keys.job_state(id), &owned(state))
            })
            .unwrap();
    }

    fn materializer(
        storage: Arc<InMemoryTagStorage>,
    ) -> JobMaterializer<Arc<InMemoryTagStorage>, JsonInvocationDecoder> {
        JobMaterializer::new(
            storage,
            KeySpace::default(),
            JsonInvocationDecoder::with_known_types(["Jobs.Mailer"]),
        )
    }

    #[test]
    fn known_job_is_fully_described() {
        let storage = InMemoryTagStorage::arc();
        seed(
            &storage,
            "J1",
            &[
                ("Type", "Jobs.Mailer, Jobs"),
                ("Method", "Send"),
                ("ParameterTypes", r#"["System.String"]"#),
                ("Arguments", r#"["\"a@b.c\""]"#),
                ("State", "Succeeded"),
                ("CreatedAt", "1700000000000"),
            ],
            &[("SucceededAt", "1700000005000"), ("Reason", "done")],
        );

        let job = materializer(storage)
            .materialize(&JobId::parse("J1").unwrap())
            .unwrap();

        assert!(!job.is_tombstone());
        assert_eq!(job.state.as_deref(), Some("Succeeded"));
        assert_eq!(job.state_reason.as_deref(), Some("done"));
        assert!(job.created_at.is_some());
        assert!(job.result_at.is_some());
        assert_eq!(job.enqueue_at, None);
    }

    #[test]
    fn removed_type_becomes_tombstone_with_metadata() {
        let storage = InMemoryTagStorage::arc();
        seed(
            &storage,
            "J2",
            &[
                ("Type", "Jobs.Deleted, Jobs"),
                ("Method", "Run"),
                ("State", "Failed"),
                ("CreatedAt", "1700000000000"),
            ],
            &[("FailedAt", "1700000009000")],
        );

        let job = materializer(storage)
            .materialize(&JobId::parse("J2").unwrap())
            .unwrap();

        assert!(job.is_tombstone());
        assert_eq!(job.state.as_deref(), Some("Failed"));
        assert!(job.created_at.is_some());
        assert!(job.result_at.is_some());
    }

    #[test]
    fn missing_record_is_an_empty_tombstone() {
        let job = materializer(InMemoryTagStorage::arc())
            .materialize(&JobId::parse("ghost").unwrap())
            .unwrap();

        assert!(job.is_tombstone());
        assert_eq!(job.job_id, "ghost");
        assert_eq!(job.state, None);
    }
}
