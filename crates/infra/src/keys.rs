//! Deterministic key layout.
//!
//! ```text
//! <prefix>tags                    tag universe        (sorted set: tag -> first use)
//! <prefix>tags:<tag>              jobs carrying tag   (sorted set: job id -> insertion weight)
//! <prefix>tags:<tag>:<state>      jobs with tag in state (set of job ids)
//! <prefix>job:<id>:tags           tags of one job     (sorted set: tag -> position)
//! <prefix>job:<id>                job record          (hash, written by the job engine)
//! <prefix>job:<id>:state          current state data  (hash, written by the job engine)
//! <prefix>tags-seq                insertion weight counter
//! <prefix>tags-expiry             reclaim schedule    (sorted set: job id -> deadline ms)
//! <prefix>tags-tmp:<uuid>         per-call union scratch key
//! ```
//!
//! Tags, state names and job ids are escaped so a segment containing `:` can
//! never alias another key: tag `a:failed` is not the `failed` collection of
//! tag `a`, and the record of job `X:tags` is not the tag record of job `X`.
//! Ids without `%` or `:` (GUIDs, counters) map to themselves.

use uuid::Uuid;

use jobtags_core::canonical_state;

/// Key builder bound to one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn tag_universe(&self) -> String {
        format!("{}tags", self.prefix)
    }

    pub fn tag_members(&self, tag: &str) -> String {
        format!("{}tags:{}", self.prefix, escape_segment(tag))
    }

    /// Per-(tag, state) collection; the state name is canonicalized.
    pub fn tag_state(&self, tag: &str, state: &str) -> String {
        format!(
            "{}tags:{}:{}",
            self.prefix,
            escape_segment(tag),
            escape_segment(&canonical_state(state))
        )
    }

    pub fn job_tags(&self, job_id: &str) -> String {
        format!("{}job:{}:tags", self.prefix, escape_segment(job_id))
    }

    pub fn job(&self, job_id: &str) -> String {
        format!("{}job:{}", self.prefix, escape_segment(job_id))
    }

    pub fn job_state(&self, job_id: &str) -> String {
        format!("{}job:{}:state", self.prefix, escape_segment(job_id))
    }

    pub fn insertion_counter(&self) -> String {
        format!("{}tags-seq", self.prefix)
    }

    pub fn expiry_schedule(&self) -> String {
        format!("{}tags-expiry", self.prefix)
    }

    /// A fresh scratch key; never returns the same name twice.
    pub fn temp_union(&self) -> String {
        format!("{}tags-tmp:{}", self.prefix, Uuid::now_v7())
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_KEY_PREFIX)
    }
}

/// Escape `%` and `:` so arbitrary strings stay inside one key segment.
pub fn escape_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace(':', "%3A")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_deterministic() {
        let keys = KeySpace::new("p:");
        assert_eq!(keys.tag_universe(), "p:tags");
        assert_eq!(keys.tag_members("email"), "p:tags:email");
        assert_eq!(keys.tag_state("email", "Failed"), "p:tags:email:failed");
        assert_eq!(keys.job_tags("J1"), "p:job:J1:tags");
        assert_eq!(keys.job("J1"), "p:job:J1");
        assert_eq!(keys.job_state("J1"), "p:job:J1:state");
    }

    #[test]
    fn tags_with_separators_do_not_alias_state_keys() {
        let keys = KeySpace::new("");
        assert_ne!(keys.tag_members("a:failed"), keys.tag_state("a", "failed"));
        assert_eq!(keys.tag_members("a:failed"), "tags:a%3Afailed");
    }

    #[test]
    fn job_ids_with_separators_do_not_alias_tag_records() {
        let keys = KeySpace::new("");
        assert_ne!(keys.job("X:tags"), keys.job_tags("X"));
        assert_ne!(keys.job("X:state"), keys.job_state("X"));
        assert_eq!(keys.job_tags("a:b"), "job:a%3Ab:tags");
    }

    #[test]
    fn temp_keys_are_unique() {
        let keys = KeySpace::default();
        let a = keys.temp_union();
        let b = keys.temp_union();
        assert_ne!(a, b);
        assert!(a.starts_with("jobtags:tags-tmp:"));
    }
}
