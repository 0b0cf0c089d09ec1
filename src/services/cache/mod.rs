pub mod keys;
pub mod memory;
pub mod redis;

pub use self::memory::MemoryCacheClient;
pub use self::redis::RedisCacheClient;

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::error::Result;

/// The cache primitives the engine relies on.
///
/// Multi-command methods (`zadd_many_with_expire`, `sadd_each`,
/// `replace_hash`, `replace_set`) are submitted in a single round trip.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// `SET key value NX EX ttl`. Returns `true` when this call created the key.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn del(&self, keys: &[String]) -> Result<()>;

    /// `ZADD key score member` for every entry followed by `EXPIRE key ttl`.
    /// Existing members are overwritten. Returns the number of entries sent.
    async fn zadd_many_with_expire(
        &self,
        key: &str,
        entries: &[(i64, f64)],
        ttl: Duration,
    ) -> Result<usize>;

    /// `ZREVRANGE key start stop WITHSCORES`, `stop` inclusive.
    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<(String, f64)>>;

    async fn zrem(&self, key: &str, member: &str) -> Result<()>;

    /// `SADD k member` for each key, refreshing each key's TTL when given.
    async fn sadd_each(&self, keys: &[String], member: &str, ttl: Option<Duration>) -> Result<()>;

    async fn smembers(&self, key: &str) -> Result<BTreeSet<String>>;

    /// Atomically replaces the hash with `fields`. Empty `fields` deletes the key.
    async fn replace_hash(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<()>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Atomically replaces the set with `members`. Empty `members` deletes the key.
    async fn replace_set(
        &self,
        key: &str,
        members: &BTreeSet<String>,
        ttl: Duration,
    ) -> Result<()>;
}
