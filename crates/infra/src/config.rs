//! Tag index configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use jobtags_core::JobState;

/// Default key prefix for every key the index reads or writes.
pub const DEFAULT_KEY_PREFIX: &str = "jobtags:";

/// Default cap on the number of entries returned by state counters.
pub const DEFAULT_MAX_STATE_COUNTS: usize = 50;

/// Default number of expired jobs reclaimed per sweep.
pub const DEFAULT_RECLAIM_BATCH_SIZE: usize = 500;

/// Tag index configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagIndexConfig {
    /// Prefix prepended to every key (shared with the job engine's own keys).
    pub key_prefix: String,
    /// Lifecycle state names (display form) checked by state counters and the reclaimer.
    pub known_states: Vec<String>,
    /// Default cap for `state_counts`.
    pub max_state_counts: usize,
    /// How many expired jobs one reclaim sweep processes.
    pub reclaim_batch_size: usize,
}

impl Default for TagIndexConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            known_states: JobState::ALL.iter().map(|s| s.name().to_string()).collect(),
            max_state_counts: DEFAULT_MAX_STATE_COUNTS,
            reclaim_batch_size: DEFAULT_RECLAIM_BATCH_SIZE,
        }
    }
}

impl TagIndexConfig {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// - `JOBTAGS_KEY_PREFIX`
    /// - `JOBTAGS_KNOWN_STATES` (comma-separated)
    /// - `JOBTAGS_MAX_STATE_COUNTS`
    /// - `JOBTAGS_RECLAIM_BATCH_SIZE`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`TagIndexConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(prefix) = lookup("JOBTAGS_KEY_PREFIX") {
            config.key_prefix = prefix;
        }

        if let Some(states) = lookup("JOBTAGS_KNOWN_STATES") {
            let states: Vec<String> = states
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if states.is_empty() {
                warn!("JOBTAGS_KNOWN_STATES is empty; keeping default states");
            } else {
                config.known_states = states;
            }
        }

        if let Some(v) = parse_var(&lookup, "JOBTAGS_MAX_STATE_COUNTS") {
            config.max_state_counts = v;
        }

        if let Some(v) = parse_var(&lookup, "JOBTAGS_RECLAIM_BATCH_SIZE") {
            config.reclaim_batch_size = v;
        }

        config
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_known_states<I, T>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.known_states = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_state_counts(mut self, max: usize) -> Self {
        self.max_state_counts = max;
        self
    }

    pub fn with_reclaim_batch_size(mut self, size: usize) -> Self {
        self.reclaim_batch_size = size;
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}
