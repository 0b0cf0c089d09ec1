use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

use super::CacheClient;
use crate::error::{RecError, Result};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    ZSet(HashMap<String, f64>),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// In-process stand-in for Redis with the same observable semantics for the
/// commands the engine uses. Expiry is lazy and measured on the tokio clock.
#[derive(Debug, Default)]
pub struct MemoryCacheClient {
    entries: DashMap<String, Entry>,
}

fn wrong_type(key: &str) -> RecError {
    RecError::Internal(format!(
        "WRONGTYPE operation against key {} holding the wrong kind of value",
        key
    ))
}

impl MemoryCacheClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    pub fn exists(&self, key: &str) -> bool {
        self.purge_expired(key);
        self.entries.contains_key(key)
    }

    /// Remaining time to live, `None` for missing or persistent keys.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.purge_expired(key);
        self.entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn zcard(&self, key: &str) -> usize {
        self.purge_expired(key);
        match self.entries.get(key).map(|entry| entry.value.clone()) {
            Some(Value::ZSet(members)) => members.len(),
            _ => 0,
        }
    }

    pub fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        self.purge_expired(key);
        match &self.entries.get(key)?.value {
            Value::ZSet(members) => members.get(member).copied(),
            _ => None,
        }
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now) && entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CacheClient for MemoryCacheClient {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.purge_expired(key);
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                });
                Ok(true)
            }
        }
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.entries.remove(key);
        }
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
        self.purge_expired(key);

        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::ZSet(HashMap::new()),
            expires_at: None,
        });
        match &mut slot.value {
            Value::ZSet(members) => {
                for (member, score) in entries {
                    members.insert(member.to_string(), *score);
                }
            }
            _ => return Err(wrong_type(key)),
        }
        slot.expires_at = Some(Instant::now() + ttl);
        Ok(entries.len())
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<(String, f64)>> {
        self.purge_expired(key);
        let mut members: Vec<(String, f64)> = match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::ZSet(members) => members.iter().map(|(m, s)| (m.clone(), *s)).collect(),
                _ => return Err(wrong_type(key)),
            },
            None => return Ok(Vec::new()),
        };

        // Redis breaks score ties by reverse lexicographic member order
        members.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.cmp(&a.0))
        });

        if start >= members.len() || start > stop {
            return Ok(Vec::new());
        }
        let end = stop.saturating_add(1).min(members.len());
        Ok(members[start..end].to_vec())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        self.purge_expired(key);
        let now_empty = match self.entries.get_mut(key) {
            Some(mut entry) => match &mut entry.value {
                Value::ZSet(members) => {
                    members.remove(member);
                    members.is_empty()
                }
                _ => return Err(wrong_type(key)),
            },
            None => false,
        };
        if now_empty {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn sadd_each(&self, keys: &[String], member: &str, ttl: Option<Duration>) -> Result<()> {
        for key in keys {
            self.purge_expired(key);
            let mut slot = self.entries.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::Set(BTreeSet::new()),
                expires_at: None,
            });
            match &mut slot.value {
                Value::Set(members) => {
                    members.insert(member.to_string());
                }
                _ => return Err(wrong_type(key)),
            }
            if let Some(ttl) = ttl {
                slot.expires_at = Some(Instant::now() + ttl);
            }
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<BTreeSet<String>> {
        self.purge_expired(key);
        match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::Set(members) => Ok(members.clone()),
                _ => Err(wrong_type(key)),
            },
            None => Ok(BTreeSet::new()),
        }
    }

    async fn replace_hash(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<()> {
        if fields.is_empty() {
            self.entries.remove(key);
            return Ok(());
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Hash(fields.iter().cloned().collect()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.purge_expired(key);
        match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::Hash(fields) => Ok(fields.clone()),
                _ => Err(wrong_type(key)),
            },
            None => Ok(HashMap::new()),
        }
    }

    async fn replace_set(
        &self,
        key: &str,
        members: &BTreeSet<String>,
        ttl: Duration,
    ) -> Result<()> {
        if members.is_empty() {
            self.entries.remove(key);
            return Ok(());
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Set(members.clone()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }
}
