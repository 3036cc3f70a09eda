//! Set/sorted-set substrate used by the tag index.
//!
//! The index never talks to a concrete client. Backends implement two traits:
//!
//! - [`SetCommands`]: the command set (sorted sets, sets, hashes, key TTLs),
//!   each command atomic on its own key.
//! - [`TagStorage`]: the `with_connection` capability that lends a connection
//!   for the duration of one unit of work.
//!
//! Nothing here batches commands into transactions; multi-step sequences are
//! made safe by the callers (unique scratch keys, idempotent set operations).

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jobtags_core::TagIndexError;

pub use in_memory::{InMemoryConnection, InMemoryTagStorage};
#[cfg(feature = "redis")]
pub use redis_store::RedisTagStorage;

/// Result type for substrate commands.
pub type StoreResult<T> = Result<T, StoreError>;

/// Substrate failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("command timed out: {0}")]
    Timeout(String),

    #[error("key holds a value of the wrong type: {0}")]
    WrongType(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl From<StoreError> for TagIndexError {
    fn from(err: StoreError) -> Self {
        TagIndexError::unavailable(err.to_string())
    }
}

/// Commands the index issues against the substrate.
///
/// Semantics follow the usual sorted-set/set store conventions: removing the
/// last member deletes the key, reading a missing key yields an empty value,
/// sorted-set ranges are ordered by score then member.
pub trait SetCommands {
    /// Add `member` only if absent (keeps the original score). Returns true if added.
    fn zadd_nx(&mut self, key: &str, member: &str, score: f64) -> StoreResult<bool>;

    /// Add or update `member` with `score`.
    fn zadd(&mut self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    fn zrem(&mut self, key: &str, members: &[String]) -> StoreResult<u64>;

    fn zcard(&mut self, key: &str) -> StoreResult<u64>;

    /// Score of `member`, `None` when the member or the key is missing.
    fn zscore(&mut self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    /// Members by rank, inclusive bounds; negative indexes count from the end.
    fn zrange(&mut self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    /// Up to `limit` members with score `<= max`, lowest first.
    fn zrangebyscore(&mut self, key: &str, max: f64, limit: usize) -> StoreResult<Vec<String>>;

    /// Union of sorted sets into `dest`, keeping each member's lowest score.
    /// Returns the cardinality of `dest`.
    fn zunionstore(&mut self, dest: &str, keys: &[String]) -> StoreResult<u64>;

    fn sadd(&mut self, key: &str, member: &str) -> StoreResult<bool>;

    fn srem(&mut self, key: &str, members: &[String]) -> StoreResult<u64>;

    fn scard(&mut self, key: &str) -> StoreResult<u64>;

    fn smembers(&mut self, key: &str) -> StoreResult<Vec<String>>;

    /// Union of sets into `dest`. Returns the cardinality of `dest`.
    fn sunionstore(&mut self, dest: &str, keys: &[String]) -> StoreResult<u64>;

    fn hgetall(&mut self, key: &str) -> StoreResult<HashMap<String, String>>;

    fn hset_multiple(&mut self, key: &str, fields: &[(String, String)]) -> StoreResult<()>;

    /// Atomically increment an integer counter, returning the new value.
    fn incr(&mut self, key: &str) -> StoreResult<i64>;

    fn del(&mut self, key: &str) -> StoreResult<()>;

    /// Set a time to live. Returns false if the key does not exist.
    fn expire(&mut self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Clear a time to live. Returns false if the key had none.
    fn persist(&mut self, key: &str) -> StoreResult<bool>;

    /// Remaining time to live, `None` for missing keys or keys without one.
    fn ttl(&mut self, key: &str) -> StoreResult<Option<Duration>>;
}

/// Storage capability: lend a connection for one unit of work.
///
/// Every index component receives its storage at construction; there is no
/// process-wide "current storage".
pub trait TagStorage: Send + Sync {
    type Connection: SetCommands;

    fn with_connection<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Self::Connection) -> StoreResult<T>;
}

impl<S> TagStorage for Arc<S>
where
    S: TagStorage,
{
    type Connection = S::Connection;

    fn with_connection<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Self::Connection) -> StoreResult<T>,
    {
        (**self).with_connection(f)
    }
}
