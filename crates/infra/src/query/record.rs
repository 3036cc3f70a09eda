//! Denormalized job records as written by the job engine.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use jobtags_core::canonical_state;

use crate::query::decoder::InvocationData;

/// String field map with case-insensitive lookup.
///
/// Missing fields read as absent, never as an error; different states carry
/// different fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    fields: HashMap<String, String>,
}

impl FieldMap {
    pub fn new(raw: HashMap<String, String>) -> Self {
        raw.into_iter().collect()
    }

    /// Field value; empty values read as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.to_lowercase())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Field value, or `""` when absent.
    pub fn get_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or_default()
    }

    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name).and_then(parse_timestamp)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for FieldMap
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_lowercase(), v.into()))
                .collect(),
        }
    }
}

/// Parse a stored timestamp: unix milliseconds, RFC 3339, or a naive ISO 8601
/// date-time taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(millis) = raw.parse::<i64>() {
        return Utc.timestamp_millis_opt(millis).single();
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Name of the state-data field holding the timestamp of entering `state`.
pub fn state_timestamp_field(state: &str) -> String {
    if canonical_state(state) == "processing" {
        "StartedAt".to_string()
    } else {
        format!("{}At", state.trim())
    }
}

/// A job's record hash (`job:<id>`) plus its current state hash
/// (`job:<id>:state`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobRecord {
    job: FieldMap,
    state: FieldMap,
}

impl JobRecord {
    pub fn new(job: FieldMap, state: FieldMap) -> Self {
        Self { job, state }
    }

    /// True when the job hash is gone (expired or never written).
    pub fn is_missing(&self) -> bool {
        self.job.is_empty()
    }

    pub fn invocation(&self) -> InvocationData {
        InvocationData {
            type_name: self.job.get_or_empty("Type").to_string(),
            method: self.job.get_or_empty("Method").to_string(),
            parameter_types: self.job.get_or_empty("ParameterTypes").to_string(),
            arguments: self.job.get_or_empty("Arguments").to_string(),
        }
    }

    pub fn state_name(&self) -> Option<&str> {
        self.job.get("State").or_else(|| self.state.get("State"))
    }

    pub fn state_reason(&self) -> Option<&str> {
        self.state.get("Reason").or_else(|| self.job.get("StateReason"))
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.job.timestamp("CreatedAt")
    }

    pub fn expire_at(&self) -> Option<DateTime<Utc>> {
        self.job.timestamp("ExpireAt")
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.job.timestamp("FetchedAt")
    }

    /// When the job entered its current state.
    pub fn result_at(&self) -> Option<DateTime<Utc>> {
        let state = self.state_name()?;
        self.state.timestamp(&state_timestamp_field(state))
    }

    pub fn enqueue_at(&self) -> Option<DateTime<Utc>> {
        self.state.timestamp("EnqueueAt")
    }
}
