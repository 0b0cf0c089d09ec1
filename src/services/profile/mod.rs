use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::UserProfileSnapshot;
use crate::services::cache::{keys, CacheClient};
use crate::services::store::CatalogStore;

pub const W_AUTHORED: f64 = 2.0;
pub const W_LIKED: f64 = 2.5;
pub const W_COMMENTED: f64 = 1.2;

/// The three interaction sets a profile is derived from.
#[derive(Debug, Clone, Default)]
pub struct Interactions {
    pub authored: HashSet<i64>,
    pub liked: HashSet<i64>,
    pub commented: HashSet<i64>,
}

impl Interactions {
    pub fn item_ids(&self) -> Vec<i64> {
        let all: BTreeSet<i64> = self
            .authored
            .iter()
            .chain(&self.liked)
            .chain(&self.commented)
            .copied()
            .collect();
        all.into_iter().collect()
    }
}

/// Sums per-action weights for every tag on every interacted item. An item
/// reached through several actions contributes each weight. Pairs whose tag
/// has no name are ignored.
pub fn accumulate_tag_weights(
    interactions: &Interactions,
    item_tags: &[(i64, i64)],
    tag_names: &HashMap<i64, String>,
) -> HashMap<String, f64> {
    let mut weights: HashMap<String, f64> = HashMap::new();
    for (item_id, tag_id) in item_tags {
        let Some(name) = tag_names.get(tag_id) else {
            continue;
        };
        let mut add = |w: f64| *weights.entry(name.clone()).or_insert(0.0) += w;
        if interactions.authored.contains(item_id) {
            add(W_AUTHORED);
        }
        if interactions.liked.contains(item_id) {
            add(W_LIKED);
        }
        if interactions.commented.contains(item_id) {
            add(W_COMMENTED);
        }
    }
    weights
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileRebuildReport {
    pub rebuilt: usize,
    pub failed: Vec<i64>,
}

/// Per-user tag preferences and owned animal categories, kept in the cache
/// with their own TTL. Readers only ever touch the cache.
pub struct UserProfileCache {
    store: Arc<dyn CatalogStore>,
    cache: Arc<dyn CacheClient>,
    ttl: Duration,
}

impl UserProfileCache {
    pub fn new(store: Arc<dyn CatalogStore>, cache: Arc<dyn CacheClient>, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    /// Recomputes and replaces both cached structures for `user_id`.
    pub async fn rebuild(&self, user_id: i64) -> Result<UserProfileSnapshot> {
        let interactions = Interactions {
            authored: self.store.authored_item_ids(user_id).await?.into_iter().collect(),
            liked: self.store.liked_item_ids(user_id).await?.into_iter().collect(),
            commented: self.store.commented_item_ids(user_id).await?.into_iter().collect(),
        };

        let owned_categories: BTreeSet<String> = self
            .store
            .pets_by_user_ids(&[user_id])
            .await?
            .into_iter()
            .map(|pet| pet.animal.as_str().to_string())
            .collect();

        let item_ids = interactions.item_ids();
        let mut tag_weights = HashMap::new();
        if !item_ids.is_empty() {
            let pairs = self.store.item_tag_pairs(&item_ids).await?;
            if !pairs.is_empty() {
                let tag_ids: Vec<i64> = pairs
                    .iter()
                    .map(|(_, tag)| *tag)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let names = self.store.tag_names(&tag_ids).await?;
                tag_weights = accumulate_tag_weights(&interactions, &pairs, &names);
            }
        }

        let mut fields: Vec<(String, String)> = tag_weights
            .iter()
            .map(|(tag, weight)| (tag.clone(), weight.to_string()))
            .collect();
        fields.sort();
        self.cache
            .replace_hash(&keys::profile_tags(user_id), &fields, self.ttl)
            .await?;
        self.cache
            .replace_set(&keys::profile_animals(user_id), &owned_categories, self.ttl)
            .await?;

        debug!(
            user_id,
            tags = tag_weights.len(),
            animals = owned_categories.len(),
            "Rebuilt user profile"
        );
        Ok(UserProfileSnapshot {
            user_id,
            tag_weights,
            owned_categories,
        })
    }

    /// Rebuilds each user in turn; one user's failure does not stop the rest.
    pub async fn rebuild_many(&self, user_ids: &[i64]) -> ProfileRebuildReport {
        let mut report = ProfileRebuildReport::default();
        for &user_id in user_ids {
            match self.rebuild(user_id).await {
                Ok(_) => report.rebuilt += 1,
                Err(e) => {
                    warn!(user_id, error = %e, "Profile rebuild failed");
                    report.failed.push(user_id);
                }
            }
        }
        info!(rebuilt = report.rebuilt, failed = report.failed.len(), "Profile batch finished");
        report
    }

    /// Cached tag weights; empty when nothing is cached.
    pub async fn load_tag_preferences(&self, user_id: i64) -> Result<HashMap<String, f64>> {
        let raw = self.cache.hgetall(&keys::profile_tags(user_id)).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(tag, value)| match value.parse::<f64>() {
                Ok(weight) => Some((tag, weight)),
                Err(_) => {
                    warn!(user_id, tag = %tag, value = %value, "Ignoring unparsable tag weight");
                    None
                }
            })
            .collect())
    }

    pub async fn load_owned_categories(&self, user_id: i64) -> Result<BTreeSet<String>> {
        self.cache.smembers(&keys::profile_animals(user_id)).await
    }

    pub async fn snapshot(&self, user_id: i64) -> Result<UserProfileSnapshot> {
        Ok(UserProfileSnapshot {
            user_id,
            tag_weights: self.load_tag_preferences(user_id).await?,
            owned_categories: self.load_owned_categories(user_id).await?,
        })
    }

    pub async fn invalidate(&self, user_id: i64) -> Result<()> {
        self.cache
            .del(&[keys::profile_tags(user_id), keys::profile_animals(user_id)])
            .await
    }
}
