//! Redis-backed substrate (sync connections).
//!
//! Each `with_connection` call opens one connection from the client and runs
//! the whole unit of work on it. Commands are issued one by one; nothing is
//! wrapped in MULTI/EXEC.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use super::{SetCommands, StoreError, StoreResult, TagStorage};

/// Default Redis URL when `REDIS_URL` is not set.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Default connect/read/write timeout.
const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// [`TagStorage`] over a Redis server.
#[derive(Debug, Clone)]
pub struct RedisTagStorage {
    client: Arc<redis::Client>,
    timeout: Duration,
}

impl RedisTagStorage {
    /// Create a storage for `redis_url` (e.g. "redis://localhost:6379").
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        })
    }

    /// Create a storage from `REDIS_URL`, defaulting to localhost.
    pub fn from_env() -> Result<Self, StoreError> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
        Self::new(url)
    }

    /// Timeout applied to connecting and to every command round trip.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl TagStorage for RedisTagStorage {
    type Connection = redis::Connection;

    #[instrument(skip(self, f), err)]
    fn with_connection<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Self::Connection) -> StoreResult<T>,
    {
        let mut conn = self
            .client
            .get_connection_with_timeout(self.timeout)
            .map_err(|e| classify("connect", e))?;

        conn.set_read_timeout(Some(self.timeout))
            .map_err(|e| classify("connect", e))?;
        conn.set_write_timeout(Some(self.timeout))
            .map_err(|e| classify("connect", e))?;

        f(&mut conn)
    }
}

fn classify(command: &str, e: redis::RedisError) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout(format!("{command}: {e}"))
    } else if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
        StoreError::Connection(format!("{command}: {e}"))
    } else if e.code() == Some("WRONGTYPE") {
        StoreError::WrongType(format!("{command}: {e}"))
    } else {
        StoreError::Command(format!("{command} failed: {e}"))
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl SetCommands for redis::Connection {
    fn zadd_nx(&mut self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let added: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .query(self)
            .map_err(|e| classify("ZADD", e))?;
        Ok(added > 0)
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query(self)
            .map_err(|e| classify("ZADD", e))?;
        Ok(())
    }

    fn zrem(&mut self, key: &str, members: &[String]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        redis::cmd("ZREM")
            .arg(key)
            .arg(members)
            .query(self)
            .map_err(|e| classify("ZREM", e))
    }

    fn zcard(&mut self, key: &str) -> StoreResult<u64> {
        redis::cmd("ZCARD")
            .arg(key)
            .query(self)
            .map_err(|e| classify("ZCARD", e))
    }

    fn zscore(&mut self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query(self)
            .map_err(|e| classify("ZSCORE", e))
    }

    fn zrange(&mut self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query(self)
            .map_err(|e| classify("ZRANGE", e))
    }

    fn zrangebyscore(&mut self, key: &str, max: f64, limit: usize) -> StoreResult<Vec<String>> {
        redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(max)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query(self)
            .map_err(|e| classify("ZRANGEBYSCORE", e))
    }

    fn zunionstore(&mut self, dest: &str, keys: &[String]) -> StoreResult<u64> {
        redis::cmd("ZUNIONSTORE")
            .arg(dest)
            .arg(keys.len())
            .arg(keys)
            .arg("AGGREGATE")
            .arg("MIN")
            .query(self)
            .map_err(|e| classify("ZUNIONSTORE", e))
    }

    fn sadd(&mut self, key: &str, member: &str) -> StoreResult<bool> {
        let added: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query(self)
            .map_err(|e| classify("SADD", e))?;
        Ok(added > 0)
    }

    fn srem(&mut self, key: &str, members: &[String]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        redis::cmd("SREM")
            .arg(key)
            .arg(members)
            .query(self)
            .map_err(|e| classify("SREM", e))
    }

    fn scard(&mut self, key: &str) -> StoreResult<u64> {
        redis::cmd("SCARD")
            .arg(key)
            .query(self)
            .map_err(|e| classify("SCARD", e))
    }

    fn smembers(&mut self, key: &str) -> StoreResult<Vec<String>> {
        redis::cmd("SMEMBERS")
            .arg(key)
            .query(self)
            .map_err(|e| classify("SMEMBERS", e))
    }

    fn sunionstore(&mut self, dest: &str, keys: &[String]) -> StoreResult<u64> {
        redis::cmd("SUNIONSTORE")
            .arg(dest)
            .arg(keys)
            .query(self)
            .map_err(|e| classify("SUNIONSTORE", e))
    }

    fn hgetall(&mut self, key: &str) -> StoreResult<HashMap<String, String>> {
        redis::cmd("HGETALL")
            .arg(key)
            .query(self)
            .map_err(|e| classify("HGETALL", e))
    }

    fn hset_multiple(&mut self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let _: i64 = cmd.query(self).map_err(|e| classify("HSET", e))?;
        Ok(())
    }

    fn incr(&mut self, key: &str) -> StoreResult<i64> {
        redis::cmd("INCR")
            .arg(key)
            .query(self)
            .map_err(|e| classify("INCR", e))
    }

    fn del(&mut self, key: &str) -> StoreResult<()> {
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query(self)
            .map_err(|e| classify("DEL", e))?;
        Ok(())
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let set: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query(self)
            .map_err(|e| classify("PEXPIRE", e))?;
        Ok(set == 1)
    }

    fn persist(&mut self, key: &str) -> StoreResult<bool> {
        let cleared: i64 = redis::cmd("PERSIST")
            .arg(key)
            .query(self)
            .map_err(|e| classify("PERSIST", e))?;
        Ok(cleared == 1)
    }

    fn ttl(&mut self, key: &str) -> StoreResult<Option<Duration>> {
        // -2: missing key, -1: no expiry
        let remaining: i64 = redis::cmd("PTTL")
            .arg(key)
            .query(self)
            .map_err(|e| classify("PTTL", e))?;
        Ok(u64::try_from(remaining).ok().map(Duration::from_millis))
    }
}
