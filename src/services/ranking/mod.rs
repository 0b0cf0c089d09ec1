use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::algorithms::{resolve_group_key, SegmentKey};
use crate::error::{RecError, Result};
use crate::models::{CandidateItem, RankedItem};
use crate::services::cache::CacheClient;
use crate::services::profile::UserProfileCache;
use crate::services::store::CatalogStore;

/// Added once per item when any of its tags names an animal the user keeps.
pub const W_OWNED_ANIMAL: f64 = 1.0;

/// Serves a page of the requesting user's precomputed segment ranking.
///
/// The segment is recomputed from live user data on every call; the read path
/// never writes to the cache.
pub struct GroupRankingService {
    store: Arc<dyn CatalogStore>,
    cache: Arc<dyn CacheClient>,
    boost: Option<PersonalBoost>,
}

struct PersonalBoost {
    profiles: Arc<UserProfileCache>,
    alpha: f64,
}

impl GroupRankingService {
    pub fn new(store: Arc<dyn CatalogStore>, cache: Arc<dyn CacheClient>) -> Self {
        Self {
            store,
            cache,
            boost: None,
        }
    }

    /// Re-ranks each served page by `score + alpha * personal_boost` using the
    /// user's cached profile. An `alpha` of zero or less leaves pages untouched.
    pub fn with_personal_boost(mut self, profiles: Arc<UserProfileCache>, alpha: f64) -> Self {
        self.boost = (alpha > 0.0).then_some(PersonalBoost { profiles, alpha });
        self
    }

    /// Resolves the user's segment as of `as_of`.
    pub async fn segment_for(&self, user_id: i64, as_of: NaiveDate) -> Result<SegmentKey> {
        let user = self
            .store
            .user_by_id(user_id)
            .await?
            .ok_or(RecError::UserNotFound(user_id))?;
        let pets = self.store.pets_by_user_ids(&[user_id]).await?;

        let mut regions = HashMap::new();
        if let Some(region_id) = user.region_id {
            if let Some(name) = self.store.region_name(region_id).await? {
                regions.insert(region_id, name);
            }
        }

        Ok(resolve_group_key(&user, &pets, &regions, as_of))
    }

    /// Returns items in descending score order for zero-based `page`.
    ///
    /// A missing segment, a page past the end, and `size == 0` all yield an
    /// empty list. Ids whose item no longer exists are dropped.
    pub async fn get_ranked(
        &self,
        user_id: i64,
        page: usize,
        size: usize,
        as_of: NaiveDate,
    ) -> Result<Vec<RankedItem>> {
        let segment = self.segment_for(user_id, as_of).await?;

        let Some((start, stop)) = page_bounds(page, size) else {
            return Ok(Vec::new());
        };

        let entries = self
            .cache
            .zrevrange_withscores(&segment.cache_key(), start, stop)
            .await?;
        if entries.is_empty() {
            debug!(user_id, segment = %segment, page, "No cached ranking for segment page");
            return Ok(Vec::new());
        }

        let ranked_ids: Vec<(i64, f64)> = entries
            .into_iter()
            .filter_map(|(member, score)| match member.parse::<i64>() {
                Ok(id) => Some((id, score)),
                Err(_) => {
                    warn!(
                        segment = %segment,
                        member = %member,
                        "Skipping non-numeric ranking member"
                    );
                    None
                }
            })
            .collect();

        let ids: Vec<i64> = ranked_ids.iter().map(|(id, _)| *id).collect();
        let mut items: HashMap<i64, CandidateItem> = self
            .store
            .items_by_ids(&ids)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        let mut ranked: Vec<RankedItem> = ranked_ids
            .into_iter()
            .filter_map(|(id, score)| items.remove(&id).map(|item| RankedItem { item, score }))
            .collect();

        if ranked.len() < ids.len() {
            debug!(
                segment = %segment,
                stale = ids.len() - ranked.len(),
                "Dropped stale item references"
            );
        }

        if let Some(boost) = &self.boost {
            self.apply_personal_boost(user_id, boost, &mut ranked).await?;
        }
        Ok(ranked)
    }

    /// Reads the profile from the cache only; a user with no cached profile
    /// keeps the segment order.
    async fn apply_personal_boost(
        &self,
        user_id: i64,
        boost: &PersonalBoost,
        ranked: &mut [RankedItem],
    ) -> Result<()> {
        if ranked.is_empty() {
            return Ok(());
        }

        let weights = boost.profiles.load_tag_preferences(user_id).await?;
        let owned = boost.profiles.load_owned_categories(user_id).await?;
        if weights.is_empty() && owned.is_empty() {
            return Ok(());
        }

        let tag_ids: BTreeSet<i64> = ranked
            .iter()
            .flat_map(|entry| entry.item.tag_ids.iter().copied())
            .collect();
        if tag_ids.is_empty() {
            return Ok(());
        }
        let tag_ids: Vec<i64> = tag_ids.into_iter().collect();
        let names = self.store.tag_names(&tag_ids).await?;

        for entry in ranked.iter_mut() {
            let tags: Vec<&str> = entry
                .item
                .tag_ids
                .iter()
                .filter_map(|id| names.get(id).map(String::as_str))
                .collect();
            entry.score += boost.alpha * personal_boost(&tags, &weights, &owned);
        }

        // stable, so equal scores keep segment order
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!(user_id, alpha = boost.alpha, "Applied personal boost to page");
        Ok(())
    }
}

/// Sum of the user's weights over an item's tag names, plus
/// [`W_OWNED_ANIMAL`] once when any tag names an owned animal.
pub fn personal_boost(
    tags: &[&str],
    weights: &HashMap<String, f64>,
    owned: &BTreeSet<String>,
) -> f64 {
    let preferred: f64 = tags.iter().filter_map(|tag| weights.get(*tag)).sum();
    let animal = if tags.iter().any(|tag| owned.contains(*tag)) {
        W_OWNED_ANIMAL
    } else {
        0.0
    };
    preferred + animal
}

/// Inclusive rank range for a page, or `None` when the page cannot hold any
/// entries or its bounds overflow.
fn page_bounds(page: usize, size: usize) -> Option<(usize, usize)> {
    if size == 0 {
        return None;
    }
    let start = page.checked_mul(size)?;
    let stop = start.checked_add(size - 1)?;
    Some((start, stop))
}
