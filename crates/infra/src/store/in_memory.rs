//! In-memory substrate for tests/dev.
//!
//! Mirrors the sorted-set/set store semantics the index relies on (empty
//! collections disappear, TTLs expire lazily on access, unions keep the lowest
//! score). One mutex guards the whole keyspace, so each unit of work runs
//! serialized. Not optimized for performance.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{SetCommands, StoreError, StoreResult, TagStorage};

#[derive(Debug, Clone)]
enum Value {
    Sorted(HashMap<String, f64>),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
    Counter(i64),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Sorted(z) => z.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Counter(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// The keyspace behind [`InMemoryTagStorage`]; lent out by `with_connection`.
#[derive(Debug, Default)]
pub struct InMemoryConnection {
    entries: HashMap<String, Entry>,
    failing_keys: HashSet<String>,
}

impl InMemoryConnection {
    /// Fail fast on injected faults and drop the key if its TTL elapsed.
    fn touch(&mut self, key: &str) -> StoreResult<()> {
        if self.failing_keys.contains(key) {
            return Err(StoreError::Command(format!("injected failure on {key}")));
        }
        if self
            .entries
            .get(key)
            .is_some_and(|e| e.is_expired(Instant::now()))
        {
            self.entries.remove(key);
        }
        Ok(())
    }

    fn existing(&mut self, key: &str) -> StoreResult<Option<&mut Entry>> {
        self.touch(key)?;
        Ok(self.entries.get_mut(key))
    }

    fn sorted(&mut self, key: &str) -> StoreResult<Option<&HashMap<String, f64>>> {
        self.touch(key)?;
        match self.entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Sorted(z)) => Ok(Some(z)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn sorted_mut(&mut self, key: &str) -> StoreResult<&mut HashMap<String, f64>> {
        self.touch(key)?;
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Sorted(HashMap::new())));
        match &mut entry.value {
            Value::Sorted(z) => Ok(z),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn set(&mut self, key: &str) -> StoreResult<Option<&HashSet<String>>> {
        self.touch(key)?;
        match self.entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Set(s)) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn set_mut(&mut self, key: &str) -> StoreResult<&mut HashSet<String>> {
        self.touch(key)?;
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Set(HashSet::new())));
        match &mut entry.value {
            Value::Set(s) => Ok(s),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(|e| e.value.is_empty()) {
            self.entries.remove(key);
        }
    }

    /// Replace `dest` with `value`, or delete it when `value` is empty.
    fn store(&mut self, dest: &str, value: Value) -> StoreResult<()> {
        self.touch(dest)?;
        if value.is_empty() {
            self.entries.remove(dest);
        } else {
            self.entries.insert(dest.to_string(), Entry::new(value));
        }
        Ok(())
    }

    fn live_keys(&mut self) -> Vec<String> {
        let now = Instant::now();
        self.entries.retain(|_, e| !e.is_expired(now));
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn by_rank(z: &HashMap<String, f64>) -> Vec<String> {
    let mut pairs: Vec<(&String, &f64)> = z.iter().collect();
    pairs.sort_by(|a, b| {
        a.1.partial_cmp(b.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    pairs.into_iter().map(|(m, _)| m.clone()).collect()
}

/// Resolve inclusive rank bounds (negative = from the end) against `len`.
fn rank_window(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

impl SetCommands for InMemoryConnection {
    fn zadd_nx(&mut self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let z = self.sorted_mut(key)?;
        if z.contains_key(member) {
            return Ok(false);
        }
        z.insert(member.to_string(), score);
        Ok(true)
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.sorted_mut(key)?.insert(member.to_string(), score);
        Ok(())
    }

    fn zrem(&mut self, key: &str, members: &[String]) -> StoreResult<u64> {
        if self.sorted(key)?.is_none() {
            return Ok(0);
        }
        let z = self.sorted_mut(key)?;
        let removed = members.iter().filter(|m| z.remove(*m).is_some()).count();
        self.drop_if_empty(key);
        Ok(removed as u64)
    }

    fn zcard(&mut self, key: &str) -> StoreResult<u64> {
        Ok(self.sorted(key)?.map_or(0, |z| z.len() as u64))
    }

    fn zscore(&mut self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        Ok(self.sorted(key)?.and_then(|z| z.get(member).copied()))
    }

    fn zrange(&mut self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let Some(z) = self.sorted(key)? else {
            return Ok(vec![]);
        };
        let ranked = by_rank(z);
        Ok(match rank_window(ranked.len(), start, stop) {
            Some((from, to)) => ranked[from..=to].to_vec(),
            None => vec![],
        })
    }

    fn zrangebyscore(&mut self, key: &str, max: f64, limit: usize) -> StoreResult<Vec<String>> {
        let Some(z) = self.sorted(key)? else {
            return Ok(vec![]);
        };
        let due: HashMap<String, f64> = z
            .iter()
            .filter(|(_, score)| **score <= max)
            .map(|(m, s)| (m.clone(), *s))
            .collect();
        let mut ranked = by_rank(&due);
        ranked.truncate(limit);
        Ok(ranked)
    }

    fn zunionstore(&mut self, dest: &str, keys: &[String]) -> StoreResult<u64> {
        let mut union: HashMap<String, f64> = HashMap::new();
        for key in keys {
            // Plain sets take part with score 1, as in the usual store semantics.
            self.touch(key)?;
            let members: Vec<(String, f64)> = match self.entries.get(key).map(|e| &e.value) {
                None => continue,
                Some(Value::Sorted(z)) => z.iter().map(|(m, s)| (m.clone(), *s)).collect(),
                Some(Value::Set(s)) => s.iter().map(|m| (m.clone(), 1.0)).collect(),
                Some(_) => return Err(StoreError::WrongType(key.clone())),
            };
            for (member, score) in members {
                union
                    .entry(member)
                    .and_modify(|s| *s = s.min(score))
                    .or_insert(score);
            }
        }
        let len = union.len() as u64;
        self.store(dest, Value::Sorted(union))?;
        Ok(len)
    }

    fn sadd(&mut self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self.set_mut(key)?.insert(member.to_string()))
    }

    fn srem(&mut self, key: &str, members: &[String]) -> StoreResult<u64> {
        if self.set(key)?.is_none() {
            return Ok(0);
        }
        let s = self.set_mut(key)?;
        let removed = members.iter().filter(|m| s.remove(*m)).count();
        self.drop_if_empty(key);
        Ok(removed as u64)
    }

    fn scard(&mut self, key: &str) -> StoreResult<u64> {
        Ok(self.set(key)?.map_or(0, |s| s.len() as u64))
    }

    fn smembers(&mut self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .set(key)?
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn sunionstore(&mut self, dest: &str, keys: &[String]) -> StoreResult<u64> {
        let mut union: HashSet<String> = HashSet::new();
        for key in keys {
            if let Some(s) = self.set(key)? {
                union.extend(s.iter().cloned());
            }
        }
        let len = union.len() as u64;
        self.store(dest, Value::Set(union))?;
        Ok(len)
    }

    fn hgetall(&mut self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.touch(key)?;
        match self.entries.get(key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(h)) => Ok(h.clone()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn hset_multiple(&mut self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        self.touch(key)?;
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
        match &mut entry.value {
            Value::Hash(h) => {
                h.extend(fields.iter().cloned());
                Ok(())
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn incr(&mut self, key: &str) -> StoreResult<i64> {
        self.touch(key)?;
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Counter(0)));
        match &mut entry.value {
            Value::Counter(n) => {
                *n += 1;
                Ok(*n)
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn del(&mut self, key: &str) -> StoreResult<()> {
        self.touch(key)?;
        self.entries.remove(key);
        Ok(())
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let Some(entry) = self.existing(key)? else {
            return Ok(false);
        };
        entry.expires_at = Some(Instant::now() + ttl);
        if ttl.is_zero() {
            self.entries.remove(key);
        }
        Ok(true)
    }

    fn persist(&mut self, key: &str) -> StoreResult<bool> {
        Ok(self
            .existing(key)?
            .is_some_and(|entry| entry.expires_at.take().is_some()))
    }

    fn ttl(&mut self, key: &str) -> StoreResult<Option<Duration>> {
        Ok(self
            .existing(key)?
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }
}

/// In-memory [`TagStorage`] for tests/dev.
///
/// Supports fault injection (`set_offline`, `fail_commands_on`) so callers can
/// exercise the unavailable-index paths.
#[derive(Debug, Default)]
pub struct InMemoryTagStorage {
    conn: Mutex<InMemoryConnection>,
    offline: AtomicBool,
}

impl InMemoryTagStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every subsequent `with_connection` fail with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    /// Make every command touching `key` fail.
    pub fn fail_commands_on(&self, key: impl Into<String>) {
        if let Ok(mut conn) = self.conn.lock() {
            conn.failing_keys.insert(key.into());
        }
    }

    /// All keys currently alive, sorted.
    pub fn live_keys(&self) -> Vec<String> {
        match self.conn.lock() {
            Ok(mut conn) => conn.live_keys(),
            Err(_) => vec![],
        }
    }
}

impl TagStorage for InMemoryTagStorage {
    type Connection = InMemoryConnection;

    fn with_connection<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Self::Connection) -> StoreResult<T>,
    {
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Connection("store is offline".to_string()));
        }
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut conn)
    }
}
