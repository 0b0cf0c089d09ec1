use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ExistenceCheck, SetExpiry, SetOptions};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::info;

use super::CacheClient;
use crate::error::Result;

/// Redis-backed cache. `ConnectionManager` multiplexes one connection and
/// reconnects on failure; it is cheap to clone per call.
#[derive(Clone)]
pub struct RedisCacheClient {
    conn: ConnectionManager,
}

impl RedisCacheClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis at {}", url);
        Ok(Self { conn })
    }
}

fn secs(ttl: Duration) -> i64 {
    ttl.as_secs().max(1) as i64
}

#[async_trait]
impl CacheClient for RedisCacheClient {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let options = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::EX(secs(ttl) as usize));

        // OK when set, nil when the key already exists
        let reply: Option<String> = conn.set_options(key, value, options).await?;
        Ok(reply.is_some())
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    async fn zadd_many_with_expire(
        &self,
        key: &str,
        entries: &[(i64, f64)],
        ttl: Duration,
    ) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        for (member, score) in entries {
            pipe.zadd(key, *member, *score).ignore();
        }
        pipe.expire(key, secs(ttl)).ignore();

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(entries.len())
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<(String, f64)>> {
        // negative indices count from the tail, so never let a cast wrap
        let Ok(start) = isize::try_from(start) else {
            return Ok(Vec::new());
        };
        let stop = isize::try_from(stop).unwrap_or(isize::MAX);
        let mut conn = self.conn.clone();
        let rows: Vec<(String, f64)> = conn.zrevrange_withscores(key, start, stop).await?;
        Ok(rows)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    async fn sadd_each(&self, keys: &[String], member: &str, ttl: Option<Duration>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.sadd(key, member).ignore();
            if let Some(ttl) = ttl {
                pipe.expire(key, secs(ttl)).ignore();
            }
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<BTreeSet<String>> {
        let mut conn = self.conn.clone();
        let members: BTreeSet<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn replace_hash(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !fields.is_empty() {
            pipe.hset_multiple(key, fields).ignore();
            pipe.expire(key, secs(ttl)).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn replace_set(
        &self,
        key: &str,
        members: &BTreeSet<String>,
        ttl: Duration,
    ) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !members.is_empty() {
            let members: Vec<&str> = members.iter().map(String::as_str).collect();
            pipe.sadd(key, members).ignore();
            pipe.expire(key, secs(ttl)).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
