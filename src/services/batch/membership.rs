use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::Result;
use crate::services::cache::{keys, CacheClient};

/// Reverse index from item id to the segments whose ranking contains it, so a
/// modified or deleted item can be pulled out of every group at once.
#[derive(Clone)]
pub struct MembershipIndex {
    cache: Arc<dyn CacheClient>,
    ttl: Duration,
}

impl MembershipIndex {
    pub fn new(cache: Arc<dyn CacheClient>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Records that every item in `item_ids` was written under `segment`.
    pub async fn remember(&self, segment: &str, item_ids: &[i64]) -> Result<()> {
        let index_keys: Vec<String> = item_ids.iter().map(|id| keys::feed_groups(*id)).collect();
        self.cache.sadd_each(&index_keys, segment, Some(self.ttl)).await
    }

    /// Removes the item from every indexed group ranking and drops its index
    /// entry. Returns the number of groups touched.
    pub async fn evict(&self, item_id: i64) -> Result<usize> {
        let index_key = keys::feed_groups(item_id);
        let segments = self.cache.smembers(&index_key).await?;
        let member = item_id.to_string();

        for segment in &segments {
            self.cache.zrem(&keys::group(segment), &member).await?;
            debug!(item_id, segment = %segment, "Evicted item from group");
        }
        self.cache.del(&[index_key]).await?;

        info!(item_id, groups = segments.len(), "Item evicted from group rankings");
        Ok(segments.len())
    }
}
