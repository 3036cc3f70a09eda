//! Multi-tag aggregate queries.
//!
//! Every query takes a non-empty tag list with OR semantics: a job matches if
//! it carries any of the tags. Multi-tag results come from a union computed
//! into a scratch key that is unique per call and deleted before returning.
//! Any failed read aborts the whole query; a partial union would look like a
//! smaller but valid answer.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use tracing::{debug, instrument};

use jobtags_core::{TagIndexResult, canonical_state, ensure_tag, ensure_tags};

use crate::config::TagIndexConfig;
use crate::index::membership::tags_on;
use crate::index::state_index::{count_on, members_on, normalize_state};
use crate::keys::KeySpace;
use crate::query::decoder::{InvocationDecoder, JsonInvocationDecoder};
use crate::query::materializer::{JobMaterializer, MatchingJob};
use crate::store::{SetCommands, StoreResult, TagStorage};

/// States every dashboard counter checks, whatever the configuration says.
const ALWAYS_COUNTED: [&str; 2] = ["Processing", "Failed"];

/// A tag search hit. The weight is a constant 1; no frequency ranking is
/// computed here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WeightedTag {
    pub tag: String,
    pub weight: u64,
}

/// Read side of the tag index.
#[derive(Debug, Clone)]
pub struct TagQueryEngine<S, D = JsonInvocationDecoder> {
    storage: S,
    keys: KeySpace,
    counted_states: Vec<String>,
    max_state_counts: usize,
    materializer: JobMaterializer<S, D>,
}

impl<S, D> TagQueryEngine<S, D>
where
    S: TagStorage + Clone,
    D: InvocationDecoder,
{
    pub fn new(storage: S, config: &TagIndexConfig, decoder: D) -> Self {
        let keys = KeySpace::new(config.key_prefix.clone());

        let mut seen = HashSet::new();
        let counted_states = config
            .known_states
            .iter()
            .map(String::as_str)
            .chain(ALWAYS_COUNTED)
            .map(str::trim)
            .filter(|s| !s.is_empty() && seen.insert(canonical_state(s)))
            .map(str::to_string)
            .collect();

        Self {
            materializer: JobMaterializer::new(storage.clone(), keys.clone(), decoder),
            storage,
            keys,
            counted_states,
            max_state_counts: config.max_state_counts,
        }
    }

    /// Number of distinct jobs carrying any of `tags`, optionally restricted
    /// to one state.
    #[instrument(skip(self, tags), fields(tag_count = tags.len(), state = ?state), err)]
    pub fn count<T: AsRef<str>>(&self, tags: &[T], state: Option<&str>) -> TagIndexResult<u64> {
        ensure_tags(tags)?;
        Ok(self
            .storage
            .with_connection(|conn| self.union_count(conn, tags, state))?)
    }

    /// Non-zero counts per state, keyed by state display name.
    ///
    /// Checks every configured state plus Processing and Failed, stopping once
    /// `max_states` entries (default: `max_state_counts` from the config) are
    /// collected.
    #[instrument(skip(self, tags), fields(tag_count = tags.len()), err)]
    pub fn state_counts<T: AsRef<str>>(
        &self,
        tags: &[T],
        max_states: Option<usize>,
    ) -> TagIndexResult<BTreeMap<String, u64>> {
        ensure_tags(tags)?;
        let cap = max_states.unwrap_or(self.max_state_counts);

        Ok(self.storage.with_connection(|conn| {
            let mut counts = BTreeMap::new();
            for state in &self.counted_states {
                if counts.len() >= cap {
                    break;
                }
                let count = self.union_count(conn, tags, Some(state.as_str()))?;
                if count > 0 {
                    counts.insert(state.clone(), count);
                }
            }
            Ok(counts)
        })?)
    }

    /// One page of jobs carrying any of `tags`.
    ///
    /// Unscoped pages follow insertion order. State-scoped collections carry
    /// no order, so their pages are sorted by job id. An offset past the end
    /// yields an empty page.
    #[instrument(skip(self, tags), fields(tag_count = tags.len(), state = ?state), err)]
    pub fn list_matching<T: AsRef<str>>(
        &self,
        tags: &[T],
        offset: usize,
        limit: usize,
        state: Option<&str>,
    ) -> TagIndexResult<Vec<MatchingJob>> {
        ensure_tags(tags)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        Ok(self.storage.with_connection(|conn| {
            let ids = self.page_ids(conn, tags, offset, limit, state)?;
            debug!(page_size = ids.len(), "materializing page");
            ids.iter()
                .map(|id| self.materializer.materialize_on(conn, id))
                .collect::<StoreResult<Vec<_>>>()
        })?)
    }

    /// Tags whose name contains `substring` (case-sensitive), or every tag.
    #[instrument(skip(self), err)]
    pub fn search_tags(&self, substring: Option<&str>) -> TagIndexResult<Vec<WeightedTag>> {
        let needle = substring.filter(|s| !s.is_empty());
        let tags = self
            .storage
            .with_connection(|conn| conn.zrange(&self.keys.tag_universe(), 0, -1))?;

        Ok(tags
            .into_iter()
            .filter(|tag| needle.is_none_or(|n| tag.contains(n)))
            .map(|tag| WeightedTag { tag, weight: 1 })
            .collect())
    }

    /// Tags co-occurring with `tag` on at least one job, excluding `tag`.
    #[instrument(skip(self), err)]
    pub fn related_tags(&self, tag: &str) -> TagIndexResult<BTreeSet<String>> {
        ensure_tag(tag)?;
        Ok(self.storage.with_connection(|conn| {
            let jobs = members_on(conn, &self.keys, tag, None)?;
            let mut related = BTreeSet::new();
            for job_id in &jobs {
                related.extend(
                    tags_on(conn, &self.keys, job_id)?
                        .into_iter()
                        .filter(|t| t != tag),
                );
            }
            debug!(jobs = jobs.len(), related = related.len(), "related tags collected");
            Ok(related)
        })?)
    }

    fn source_keys<T: AsRef<str>>(&self, tags: &[T], state: Option<&str>) -> Vec<String> {
        let mut keys: Vec<String> = tags
            .iter()
            .map(|tag| match state {
                None => self.keys.tag_members(tag.as_ref()),
                Some(state) => self.keys.tag_state(tag.as_ref(), state),
            })
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn union_count<C, T>(&self, conn: &mut C, tags: &[T], state: Option<&str>) -> StoreResult<u64>
    where
        C: SetCommands,
        T: AsRef<str>,
    {
        let state = normalize_state(state);
        let sources = self.source_keys(tags, state.as_deref());

        if sources.len() == 1 {
            return count_on(conn, &self.keys, tags[0].as_ref(), state.as_deref());
        }

        with_temp_key(conn, &self.keys, |conn, temp| match state {
            None => conn.zunionstore(temp, &sources),
            Some(_) => conn.sunionstore(temp, &sources),
        })
    }

    fn page_ids<C, T>(
        &self,
        conn: &mut C,
        tags: &[T],
        offset: usize,
        limit: usize,
        state: Option<&str>,
    ) -> StoreResult<Vec<String>>
    where
        C: SetCommands,
        T: AsRef<str>,
    {
        let state = normalize_state(state);
        let sources = self.source_keys(tags, state.as_deref());

        match state {
            None => {
                let Some((start, stop)) = rank_bounds(offset, limit) else {
                    return Ok(Vec::new());
                };
                if let [single] = sources.as_slice() {
                    return conn.zrange(single, start, stop);
                }
                with_temp_key(conn, &self.keys, |conn, temp| {
                    conn.zunionstore(temp, &sources)?;
                    conn.zrange(temp, start, stop)
                })
            }
            Some(_) => {
                let mut ids = if let [single] = sources.as_slice() {
                    conn.smembers(single)?
                } else {
                    with_temp_key(conn, &self.keys, |conn, temp| {
                        conn.sunionstore(temp, &sources)?;
                        conn.smembers(temp)
                    })?
                };
                ids.sort();
                Ok(ids.into_iter().skip(offset).take(limit).collect())
            }
        }
    }
}

/// Inclusive rank window for a page, `None` when it cannot hold anything.
fn rank_bounds(offset: usize, limit: usize) -> Option<(isize, isize)> {
    let start = isize::try_from(offset).ok()?;
    let stop = offset
        .saturating_add(limit.checked_sub(1)?)
        .min(isize::MAX as usize) as isize;
    Some((start, stop))
}

/// Run `f` against a fresh scratch key and delete the key afterwards, whether
/// or not `f` succeeded.
fn with_temp_key<C, T, F>(conn: &mut C, keys: &KeySpace, f: F) -> StoreResult<T>
where
    C: SetCommands,
    F: FnOnce(&mut C, &str) -> StoreResult<T>,
{
    let temp = keys.temp_union();
    debug!(temp_key = %temp, "computing union");

    let result = f(conn, &temp);
    let cleanup = conn.del(&temp);
    let value = result?;
    cleanup?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{StateIndexStore, TagMembershipStore};
    use crate::store::InMemoryTagStorage;
    use jobtags_core::{JobId, TagIndexError};
    use std::sync::Arc;

    type Storage = Arc<InMemoryTagStorage>;

    struct Fixture {
        storage: Storage,
        membership: TagMembershipStore<Storage>,
        states: StateIndexStore<Storage>,
        engine: TagQueryEngine<Storage>,
    }

    fn fixture() -> Fixture {
        let storage = InMemoryTagStorage::arc();
        let config = TagIndexConfig::default();
        let keys = KeySpace::new(config.key_prefix.clone());
        Fixture {
            membership: TagMembershipStore::new(storage.clone(), keys.clone()),
            states: StateIndexStore::new(storage.clone(), keys),
            engine: TagQueryEngine::new(storage.clone(), &config, JsonInvocationDecoder::new()),
            storage,
        }
    }

    impl Fixture {
        fn job(&self, id: &str, tags: &[&str], state: &str) {
            let job = JobId::parse(id).unwrap();
            self.membership.attach_tags(&job, tags).unwrap();
            self.states.move_state(&job, tags, None, Some(state)).unwrap();
        }

        fn ids(&self, tags: &[&str], offset: usize, limit: usize, state: Option<&str>) -> Vec<String> {
            self.engine
                .list_matching(tags, offset, limit, state)
                .unwrap()
                .into_iter()
                .map(|j| j.job_id)
                .collect()
        }
    }

    #[test]
    fn union_counts_shared_jobs_once() {
        let f = fixture();
        f.job("J1", &["a", "b"], "Failed");
        f.job("J2", &["a"], "Failed");
        f.job("J3", &["b"], "Succeeded");

        assert_eq!(f.engine.count(&["a", "b"], None).unwrap(), 3);
        assert_eq!(f.engine.count(&["a", "b"], Some("failed")).unwrap(), 2);
        assert_eq!(f.engine.count(&["a", "a"], Some("FAILED")).unwrap(), 2);
        assert_eq!(f.engine.count(&["missing"], None).unwrap(), 0);
    }

    #[test]
    fn empty_tag_lists_are_rejected_before_io() {
        let f = fixture();
        f.storage.set_offline(true);
        let none: [&str; 0] = [];

        for result in [
            f.engine.count(&none, None).map(|_| ()),
            f.engine.count(&["a", ""], None).map(|_| ()),
            f.engine.list_matching(&none, 0, 10, None).map(|_| ()),
            f.engine.state_counts(&none, None).map(|_| ()),
            f.engine.related_tags("").map(|_| ()),
        ] {
            assert!(matches!(result, Err(TagIndexError::InvalidArgument(_))));
        }
    }

    #[test]
    fn state_counts_omit_zeroes_and_respect_the_cap() {
        let f = fixture();
        f.job("J1", &["a"], "Failed");
        f.job("J2", &["a"], "Processing");
        f.job("J3", &["b"], "Enqueued");

        let counts = f.engine.state_counts(&["a", "b"], None).unwrap();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts["Failed"], 1);
        assert_eq!(counts["Processing"], 1);
        assert_eq!(counts["Enqueued"], 1);

        let capped = f.engine.state_counts(&["a", "b"], Some(1)).unwrap();
        assert_eq!(capped.len(), 1);
        assert!(f.engine.state_counts(&["a"], Some(0)).unwrap().is_empty());
    }

    #[test]
    fn always_counted_states_survive_a_narrow_config() {
        let storage = InMemoryTagStorage::arc();
        let config = TagIndexConfig::default().with_known_states(["Enqueued"]);
        let keys = KeySpace::new(config.key_prefix.clone());
        let membership = TagMembershipStore::new(storage.clone(), keys.clone());
        let states = StateIndexStore::new(storage.clone(), keys);
        let engine = TagQueryEngine::new(storage, &config, JsonInvocationDecoder::new());

        let job = JobId::parse("J1").unwrap();
        membership.attach_tags(&job, &["a"]).unwrap();
        states.move_state(&job, &["a"], None, Some("failed")).unwrap();

        let counts = engine.state_counts(&["a"], None).unwrap();
        assert_eq!(counts.get("Failed"), Some(&1));
    }

    #[test]
    fn unscoped_pages_follow_insertion_order() {
        let f = fixture();
        f.job("J3", &["a"], "Enqueued");
        f.job("J1", &["b"], "Enqueued");
        f.job("J2", &["a", "b"], "Enqueued");

        assert_eq!(f.ids(&["a", "b"], 0, 10, None), vec!["J3", "J1", "J2"]);
        assert_eq!(f.ids(&["a", "b"], 1, 1, None), vec!["J1"]);
        assert_eq!(f.ids(&["a"], 0, 10, None), vec!["J3", "J2"]);
    }

    #[test]
    fn scoped_pages_are_stable() {
        let f = fixture();
        for id in ["J5", "J2", "J9", "J1"] {
            f.job(id, &["a"], "Failed");
        }
        f.job("J7", &["b"], "Failed");

        assert_eq!(
            f.ids(&["a", "b"], 0, 10, Some("failed")),
            vec!["J1", "J2", "J5", "J7", "J9"]
        );
        assert_eq!(f.ids(&["a", "b"], 2, 2, Some("failed")), vec!["J5", "J7"]);
        assert_eq!(f.ids(&["a"], 3, 5, Some("Failed")), vec!["J9"]);
    }

    #[test]
    fn out_of_range_pages_are_empty() {
        let f = fixture();
        f.job("J1", &["a"], "Enqueued");

        assert!(f.ids(&["a"], 5, 10, None).is_empty());
        assert!(f.ids(&["a", "b"], 5, 10, Some("enqueued")).is_empty());
        assert!(f.ids(&["a"], 0, 0, None).is_empty());
        assert!(f.ids(&["a"], usize::MAX, usize::MAX, None).is_empty());
    }

    #[test]
    fn search_filters_by_substring_with_constant_weight() {
        let f = fixture();
        f.job("J1", &["email-send", "report"], "Enqueued");
        f.job("J2", &["email-bounce"], "Enqueued");

        let hits = f.engine.search_tags(Some("email")).unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.tag.as_str()).collect();
        assert_eq!(names, vec!["email-send", "email-bounce"]);
        assert!(hits.iter().all(|h| h.weight == 1));

        assert_eq!(f.engine.search_tags(None).unwrap().len(), 3);
        assert_eq!(f.engine.search_tags(Some("")).unwrap().len(), 3);
        assert!(f.engine.search_tags(Some("EMAIL")).unwrap().is_empty());
    }

    #[test]
    fn related_tags_exclude_the_queried_tag() {
        let f = fixture();
        f.job("J1", &["job", "task-a"], "Enqueued");
        f.job("J2", &["job", "task-b"], "Enqueued");
        f.job("J3", &["other"], "Enqueued");

        let related = f.engine.related_tags("job").unwrap();
        assert_eq!(
            related,
            BTreeSet::from(["task-a".to_string(), "task-b".to_string()])
        );
        assert!(f.engine.related_tags("nobody").unwrap().is_empty());
    }

    #[test]
    fn scratch_keys_never_outlive_a_query() {
        let f = fixture();
        f.job("J1", &["a"], "Enqueued");
        f.job("J2", &["b"], "Enqueued");

        f.engine.count(&["a", "b"], None).unwrap();
        f.engine.count(&["a", "b"], Some("enqueued")).unwrap();
        f.engine.list_matching(&["a", "b"], 0, 5, None).unwrap();
        f.engine.state_counts(&["a", "b"], None).unwrap();

        assert!(
            f.storage
                .live_keys()
                .iter()
                .all(|k| !k.contains("tags-tmp:"))
        );
    }

    #[test]
    fn unreadable_collection_aborts_the_union() {
        let f = fixture();
        f.job("J1", &["a"], "Failed");
        f.job("J2", &["b"], "Failed");
        f.storage.fail_commands_on("jobtags:tags:b:failed");

        let err = f.engine.count(&["a", "b"], Some("failed")).unwrap_err();
        assert!(matches!(err, TagIndexError::IndexUnavailable(_)));
        assert!(
            f.storage
                .live_keys()
                .iter()
                .all(|k| !k.contains("tags-tmp:"))
        );
    }

    #[test]
    fn rank_bounds_cover_edge_cases() {
        assert_eq!(rank_bounds(0, 10), Some((0, 9)));
        assert_eq!(rank_bounds(5, 1), Some((5, 5)));
        assert_eq!(rank_bounds(0, 0), None);
        assert_eq!(rank_bounds(usize::MAX, 1), None);
    }
}
