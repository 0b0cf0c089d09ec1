use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use petrec::algorithms::{score, AuthorSignal, UserSignal};
use petrec::services::batch::{BatchOrchestrator, BatchOutcome, BatchSettings, SkipReason};
use petrec::services::cache::{keys, CacheClient, MemoryCacheClient};
use petrec::services::profile::UserProfileCache;
use petrec::services::ranking::GroupRankingService;
use petrec::services::store::{CatalogStore, MemoryCatalogStore};
use petrec::*;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(12, 0, 0).unwrap()
}

fn as_of() -> NaiveDate {
    date(2024, 6, 1)
}

fn settings(track_membership: bool) -> BatchSettings {
    BatchSettings {
        candidate_pool_size: 200,
        lock_ttl: Duration::from_secs(30 * 60),
        group_ttl: Duration::from_secs(48 * 60 * 60),
        track_membership,
    }
}

/// One user in Seoul with a dog, three old items by an author who is not a user.
fn scenario_store() -> Arc<MemoryCatalogStore> {
    let store = Arc::new(MemoryCatalogStore::new());
    store.insert_region(1, "Seoul");
    store.insert_user(UserRecord::new(1, date(1990, 3, 1), "F", Some(1)));
    store.insert_pet(PetRecord::new(1, 1, "DOG"));

    for (id, likes, comments) in [(101, 10, 2), (102, 5, 0), (103, 0, 1)] {
        store.insert_item(CandidateItem::new(id, Some(999), likes).created_at(at(2024, 1, 1)));
        for n in 0..comments {
            store.add_comment(id, 50 + n);
        }
    }
    store
}

/// Delegates to the in-memory catalog, optionally failing or panicking in
/// chosen places.
struct FaultyStore {
    inner: Arc<MemoryCatalogStore>,
    fail_all_users: bool,
    panic_all_users: bool,
    poisoned_user: Option<i64>,
}

impl FaultyStore {
    fn wrap(inner: Arc<MemoryCatalogStore>) -> Self {
        Self {
            inner,
            fail_all_users: false,
            panic_all_users: false,
            poisoned_user: None,
        }
    }
}

#[async_trait]
impl CatalogStore for FaultyStore {
    async fn top_items_by_likes(&self, limit: usize) -> Result<Vec<CandidateItem>> {
        self.inner.top_items_by_likes(limit).await
    }

    async fn comment_counts(&self, item_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        self.inner.comment_counts(item_ids).await
    }

    async fn users_by_ids(&self, user_ids: &[i64]) -> Result<Vec<UserRecord>> {
        self.inner.users_by_ids(user_ids).await
    }

    async fn all_users(&self) -> Result<Vec<UserRecord>> {
        if self.panic_all_users {
            panic!("user table exploded");
        }
        if self.fail_all_users {
            return Err(RecError::Internal("connection reset".to_string()));
        }
        self.inner.all_users().await
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>> {
        self.inner.user_by_id(user_id).await
    }

    async fn pets_by_user_ids(&self, user_ids: &[i64]) -> Result<Vec<PetRecord>> {
        self.inner.pets_by_user_ids(user_ids).await
    }

    async fn region_names(&self) -> Result<HashMap<i64, String>> {
        self.inner.region_names().await
    }

    async fn region_name(&self, region_id: i64) -> Result<Option<String>> {
        self.inner.region_name(region_id).await
    }

    async fn items_by_ids(&self, item_ids: &[i64]) -> Result<Vec<CandidateItem>> {
        self.inner.items_by_ids(item_ids).await
    }

    async fn authored_item_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        if self.poisoned_user == Some(user_id) {
            return Err(RecError::Internal(format!("bad rows for user {}", user_id)));
        }
        self.inner.authored_item_ids(user_id).await
    }

    async fn liked_item_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.inner.liked_item_ids(user_id).await
    }

    async fn commented_item_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.inner.commented_item_ids(user_id).await
    }

    async fn item_tag_pairs(&self, item_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        self.inner.item_tag_pairs(item_ids).await
    }

    async fn tag_names(&self, tag_ids: &[i64]) -> Result<HashMap<i64, String>> {
        self.inner.tag_names(tag_ids).await
    }
}

#[tokio::test]
async fn test_end_to_end_batch_then_read() {
    let store = scenario_store();
    let cache = Arc::new(MemoryCacheClient::new());
    let orchestrator = BatchOrchestrator::new(store.clone(), cache.clone(), settings(false));

    let outcome = orchestrator.run_once(as_of()).await;
    assert!(outcome.is_completed(), "unexpected outcome {:?}", outcome);

    let key = "group:30_F_Seoul_HASDOG";
    assert_eq!(cache.zscore(key, "101"), Some(22.0));
    assert_eq!(cache.zscore(key, "102"), Some(10.0));
    assert_eq!(cache.zscore(key, "103"), Some(1.0));
    assert!(cache.ttl(key).unwrap() <= Duration::from_secs(48 * 60 * 60));

    let ranking = GroupRankingService::new(store, cache);
    let page = ranking.get_ranked(1, 0, 2, as_of()).await.unwrap();
    let got: Vec<(i64, f64)> = page.iter().map(|r| (r.item.id, r.score)).collect();
    assert_eq!(got, vec![(101, 22.0), (102, 10.0)]);
}

#[tokio::test(start_paused = true)]
async fn test_lock_excludes_until_released_or_expired() {
    let cache = MemoryCacheClient::new();
    let ttl = Duration::from_secs(30 * 60);

    assert!(cache.set_nx_ex(keys::BATCH_LOCK, "1", ttl).await.unwrap());
    assert!(!cache.set_nx_ex(keys::BATCH_LOCK, "1", ttl).await.unwrap());

    tokio::time::advance(ttl - Duration::from_secs(1)).await;
    assert!(!cache.set_nx_ex(keys::BATCH_LOCK, "1", ttl).await.unwrap());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(cache.set_nx_ex(keys::BATCH_LOCK, "1", ttl).await.unwrap());

    cache.del(&[keys::BATCH_LOCK.to_string()]).await.unwrap();
    assert!(cache.set_nx_ex(keys::BATCH_LOCK, "1", ttl).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_run_is_skipped_while_lock_is_held() {
    let store = scenario_store();
    let cache = Arc::new(MemoryCacheClient::new());
    cache
        .set_nx_ex(keys::BATCH_LOCK, keys::BATCH_LOCK_VALUE, Duration::from_secs(60))
        .await
        .unwrap();

    let orchestrator = BatchOrchestrator::new(store, cache.clone(), settings(false));
    let outcome = orchestrator.run_once(as_of()).await;

    assert!(matches!(outcome, BatchOutcome::Skipped { reason: SkipReason::LockHeld }));
    assert!(cache.keys_with_prefix(keys::GROUP_PREFIX).is_empty());
}

#[tokio::test]
async fn test_query_count_does_not_grow_with_users() {
    let small = scenario_store();
    let large = scenario_store();
    for id in 2..=40 {
        large.insert_user(UserRecord::new(id, date(1980 + (id % 20) as i32, 1, 1), "M", Some(1)));
        large.insert_pet(PetRecord::new(id, id, if id % 2 == 0 { "CAT" } else { "DOG" }));
    }

    for store in [&small, &large] {
        let cache = Arc::new(MemoryCacheClient::new());
        let outcome = BatchOrchestrator::new(store.clone(), cache, settings(false))
            .run_once(as_of())
            .await;
        assert!(outcome.is_completed());
    }

    assert_eq!(small.query_count(), large.query_count());
}

#[tokio::test]
async fn test_failed_run_still_releases_lock() {
    let cache = Arc::new(MemoryCacheClient::new());

    let mut failing = FaultyStore::wrap(scenario_store());
    failing.fail_all_users = true;
    let outcome = BatchOrchestrator::new(Arc::new(failing), cache.clone(), settings(false))
        .run_once(as_of())
        .await;
    assert!(matches!(outcome, BatchOutcome::Failed { .. }));
    assert!(!cache.exists(keys::BATCH_LOCK));

    let mut panicking = FaultyStore::wrap(scenario_store());
    panicking.panic_all_users = true;
    let outcome = BatchOrchestrator::new(Arc::new(panicking), cache.clone(), settings(false))
        .run_once(as_of())
        .await;
    match outcome {
        BatchOutcome::Failed { error, .. } => assert!(error.contains("exploded")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!cache.exists(keys::BATCH_LOCK));

    // the next run is not blocked
    let outcome = BatchOrchestrator::new(scenario_store(), cache.clone(), settings(false))
        .run_once(as_of())
        .await;
    assert!(outcome.is_completed());
}

#[tokio::test]
async fn test_last_user_in_a_segment_wins() {
    let store = Arc::new(MemoryCatalogStore::new());
    store.insert_region(1, "Seoul");
    store.insert_user(UserRecord::new(900, date(1950, 1, 1), "M", None));
    store.insert_pet(PetRecord::new(900, 900, "CAT"));
    store.insert_item(CandidateItem::new(1, Some(900), 1));

    // same segment, only user 2 shares the author's cat
    store.insert_user(UserRecord::new(1, date(1991, 1, 1), "F", Some(1)));
    store.insert_pet(PetRecord::new(1, 1, "DOG"));
    store.insert_user(UserRecord::new(2, date(1992, 1, 1), "F", Some(1)));
    store.insert_pet(PetRecord::new(2, 2, "DOG"));
    store.insert_pet(PetRecord::new(3, 2, "CAT"));

    let cache = Arc::new(MemoryCacheClient::new());
    let outcome = BatchOrchestrator::new(store, cache.clone(), settings(false))
        .run_once(as_of())
        .await;
    let BatchOutcome::Completed(report) = outcome else {
        panic!("batch did not complete");
    };

    assert_eq!(cache.zcard("group:30_F_Seoul_HASDOG"), 1);
    assert_eq!(cache.zscore("group:30_F_Seoul_HASDOG", "1"), Some(2.0 + 7.0));
    assert_eq!(report.metrics.users, 3);
    assert_eq!(report.metrics.segments, 2);
}

#[tokio::test]
async fn test_rewriting_a_score_replaces_it() {
    let cache = MemoryCacheClient::new();
    let ttl = Duration::from_secs(60);
    cache.zadd_many_with_expire("group:x", &[(7, 1.0)], ttl).await.unwrap();
    cache.zadd_many_with_expire("group:x", &[(7, 4.5)], ttl).await.unwrap();

    assert_eq!(cache.zcard("group:x"), 1);
    assert_eq!(cache.zscore("group:x", "7"), Some(4.5));
}

#[tokio::test]
async fn test_pagination_returns_expected_counts_in_order() {
    let store = Arc::new(MemoryCatalogStore::new());
    store.insert_user(UserRecord::new(1, date(2000, 1, 1), "M", None));
    let cache = Arc::new(MemoryCacheClient::new());

    let n: usize = 7;
    let entries: Vec<(i64, f64)> = (0..n as i64).map(|id| (id, (id * 3 % 5) as f64)).collect();
    for (id, _) in &entries {
        store.insert_item(CandidateItem::new(*id, None, 0));
    }
    cache
        .zadd_many_with_expire("group:20_M_UNKNOWN_NOPET", &entries, Duration::from_secs(60))
        .await
        .unwrap();

    let ranking = GroupRankingService::new(store, cache);
    for size in 0..=8usize {
        for page in 0..=8usize {
            let items = ranking.get_ranked(1, page, size, as_of()).await.unwrap();
            let expected = size.min(n.saturating_sub(page * size));
            assert_eq!(items.len(), expected, "page={} size={}", page, size);
            assert!(items.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }
}

#[tokio::test]
async fn test_read_path_edge_cases() {
    let store = scenario_store();
    let cache = Arc::new(MemoryCacheClient::new());
    let ranking = GroupRankingService::new(store.clone(), cache.clone());

    // nothing cached yet
    assert!(ranking.get_ranked(1, 0, 20, as_of()).await.unwrap().is_empty());

    assert!(matches!(
        ranking.get_ranked(404, 0, 20, as_of()).await,
        Err(RecError::UserNotFound(404))
    ));

    BatchOrchestrator::new(store.clone(), cache.clone(), settings(false))
        .run_once(as_of())
        .await;
    store.remove_item(101);

    let page = ranking.get_ranked(1, 0, 3, as_of()).await.unwrap();
    let ids: Vec<i64> = page.iter().map(|r| r.item.id).collect();
    assert_eq!(ids, vec![102, 103]);
}

#[tokio::test]
async fn test_evicted_item_disappears_from_groups() {
    let store = scenario_store();
    store.insert_user(UserRecord::new(2, date(1970, 5, 5), "M", None));
    let cache = Arc::new(MemoryCacheClient::new());
    let orchestrator = BatchOrchestrator::new(store.clone(), cache.clone(), settings(true));
    assert!(orchestrator.run_once(as_of()).await.is_completed());

    assert_eq!(orchestrator.membership().evict(102).await.unwrap(), 2);
    assert_eq!(cache.zscore("group:30_F_Seoul_HASDOG", "102"), None);
    assert_eq!(cache.zscore("group:50_M_UNKNOWN_NOPET", "102"), None);
    assert_eq!(cache.zscore("group:50_M_UNKNOWN_NOPET", "101"), Some(22.0));
    assert!(!cache.exists(&keys::feed_groups(102)));
}

#[tokio::test]
async fn test_profile_rebuild_drops_stale_tags() {
    let store = Arc::new(MemoryCatalogStore::new());
    store.insert_user(UserRecord::new(5, date(1995, 1, 1), "F", None));
    store.insert_pet(PetRecord::new(1, 5, "cat"));
    store.insert_tag(1, "A");
    store.insert_tag(2, "B");
    store.insert_item(CandidateItem::new(10, Some(5), 0).with_tags(vec![1]));
    store.insert_item(CandidateItem::new(20, Some(6), 0).with_tags(vec![2]));
    store.add_like(5, 20);

    let cache = Arc::new(MemoryCacheClient::new());
    let profiles =
        UserProfileCache::new(store.clone(), cache.clone(), Duration::from_secs(48 * 3600));

    profiles.rebuild(5).await.unwrap();
    let weights = profiles.load_tag_preferences(5).await.unwrap();
    assert_eq!(weights, HashMap::from([("A".to_string(), 2.0), ("B".to_string(), 2.5)]));
    assert!(profiles.load_owned_categories(5).await.unwrap().contains("CAT"));

    store.remove_like(5, 20);
    profiles.rebuild(5).await.unwrap();
    let weights = profiles.load_tag_preferences(5).await.unwrap();
    assert_eq!(weights, HashMap::from([("A".to_string(), 2.0)]));

    store.reset_query_count();
    profiles.snapshot(5).await.unwrap();
    assert_eq!(store.query_count(), 0);

    profiles.invalidate(5).await.unwrap();
    assert!(profiles.load_tag_preferences(5).await.unwrap().is_empty());
    assert!(profiles.load_owned_categories(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_profile_without_interactions_deletes_tag_key() {
    let store = Arc::new(MemoryCatalogStore::new());
    store.insert_user(UserRecord::new(8, date(1995, 1, 1), "M", None));
    let cache = Arc::new(MemoryCacheClient::new());
    cache
        .replace_hash(
            &keys::profile_tags(8),
            &[("old".to_string(), "1".to_string())],
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    let profiles = UserProfileCache::new(store, cache.clone(), Duration::from_secs(60));
    let snapshot = profiles.rebuild(8).await.unwrap();

    assert!(snapshot.tag_weights.is_empty());
    assert!(!cache.exists(&keys::profile_tags(8)));
    assert!(!cache.exists(&keys::profile_animals(8)));
}

#[tokio::test]
async fn test_profile_batch_isolates_failures() {
    let inner = Arc::new(MemoryCatalogStore::new());
    inner.insert_tag(1, "walk");
    for uid in 1..=3 {
        inner.insert_user(UserRecord::new(uid, date(1990, 1, 1), "F", None));
        inner.insert_item(CandidateItem::new(uid * 10, Some(uid), 0).with_tags(vec![1]));
    }
    let mut store = FaultyStore::wrap(inner);
    store.poisoned_user = Some(2);

    let cache = Arc::new(MemoryCacheClient::new());
    let profiles = UserProfileCache::new(Arc::new(store), cache, Duration::from_secs(60));
    let report = profiles.rebuild_many(&[1, 2, 3]).await;

    assert_eq!(report.rebuilt, 2);
    assert_eq!(report.failed, vec![2]);
    assert_eq!(profiles.load_tag_preferences(3).await.unwrap()["walk"], 2.0);
    assert!(profiles.load_tag_preferences(2).await.unwrap().is_empty());
}

#[test]
fn test_score_is_pure_under_parallel_calls() {
    let as_of = as_of();
    let items: Vec<CandidateItem> = (0..200)
        .map(|id| CandidateItem::new(id, Some(id % 7), id * 3).created_at(at(2024, 5, 31)))
        .collect();
    let authors: Vec<AuthorSignal> = (0..7)
        .map(|n| AuthorSignal {
            age_group: Some(n * 10),
            region_name: Some(format!("R{}", n % 3)),
            categories: [AnimalKind::new(if n % 2 == 0 { "DOG" } else { "CAT" })]
                .into_iter()
                .collect(),
        })
        .collect();
    let users: Vec<UserSignal> = (0..16)
        .map(|n| UserSignal {
            categories: if n % 3 == 0 {
                HashSet::new()
            } else {
                [AnimalKind::dog()].into_iter().collect()
            },
            age_group: (n % 6) * 10,
            region_name: format!("R{}", n % 3),
        })
        .collect();

    let run = |user: &UserSignal| -> Vec<u64> {
        items
            .iter()
            .map(|item| {
                let author = item.author_id.map(|a| &authors[a as usize]);
                score(user, item, item.id % 4, author, as_of).to_bits()
            })
            .collect()
    };

    let sequential: Vec<Vec<u64>> = users.iter().map(run).collect();
    let parallel: Vec<Vec<u64>> = users.par_iter().map(run).collect();
    assert_eq!(sequential, parallel);
}

fn scores(page: &[RankedItem]) -> Vec<(i64, f64)> {
    page.iter().map(|r| (r.item.id, r.score)).collect()
}

/// Tags item 103 with "walk" and "DOG" and has user 1 like it.
fn tagged_scenario_store() -> Arc<MemoryCatalogStore> {
    let store = scenario_store();
    store.insert_tag(7, "walk");
    store.insert_tag(8, "DOG");
    store.insert_item(
        CandidateItem::new(103, Some(999), 0)
            .with_tags(vec![7, 8])
            .created_at(at(2024, 1, 1)),
    );
    store.add_like(1, 103);
    store
}

#[tokio::test(start_paused = true)]
async fn test_group_ttl_is_refreshed_and_expires() {
    let store = scenario_store();
    let cache = Arc::new(MemoryCacheClient::new());
    let orchestrator = BatchOrchestrator::new(store, cache.clone(), settings(false));
    let group_ttl = Duration::from_secs(48 * 60 * 60);
    let key = "group:30_F_Seoul_HASDOG";

    assert!(orchestrator.run_once(as_of()).await.is_completed());
    assert_eq!(cache.ttl(key), Some(group_ttl));

    tokio::time::advance(Duration::from_secs(40 * 60 * 60)).await;
    assert_eq!(cache.ttl(key), Some(Duration::from_secs(8 * 60 * 60)));

    assert!(orchestrator.run_once(as_of()).await.is_completed());
    assert_eq!(cache.ttl(key), Some(group_ttl));

    tokio::time::advance(group_ttl - Duration::from_secs(1)).await;
    assert!(cache.exists(key));
    assert_eq!(cache.zcard(key), 3);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!cache.exists(key));
}

#[tokio::test(start_paused = true)]
async fn test_profile_ttl_is_refreshed_and_expires() {
    let store = tagged_scenario_store();
    let cache = Arc::new(MemoryCacheClient::new());
    let profile_ttl = Duration::from_secs(48 * 60 * 60);
    let profiles = UserProfileCache::new(store, cache.clone(), profile_ttl);
    let profile_keys = [keys::profile_tags(1), keys::profile_animals(1)];

    profiles.rebuild(1).await.unwrap();
    for key in &profile_keys {
        assert_eq!(cache.ttl(key), Some(profile_ttl), "{}", key);
    }

    tokio::time::advance(Duration::from_secs(40 * 60 * 60)).await;
    profiles.rebuild(1).await.unwrap();
    for key in &profile_keys {
        assert_eq!(cache.ttl(key), Some(profile_ttl), "{}", key);
    }

    tokio::time::advance(profile_ttl - Duration::from_secs(1)).await;
    for key in &profile_keys {
        assert!(cache.exists(key), "{} expired early", key);
    }

    tokio::time::advance(Duration::from_secs(2)).await;
    for key in &profile_keys {
        assert!(!cache.exists(key), "{} outlived its ttl", key);
    }
}

#[tokio::test]
async fn test_personal_boost_reorders_page_by_profile() {
    let store = tagged_scenario_store();
    let cache = Arc::new(MemoryCacheClient::new());
    let orchestrator = BatchOrchestrator::new(store.clone(), cache.clone(), settings(false));
    assert!(orchestrator.run_once(as_of()).await.is_completed());

    let profiles = Arc::new(UserProfileCache::new(
        store.clone(),
        cache.clone(),
        Duration::from_secs(48 * 60 * 60),
    ));
    profiles.rebuild(1).await.unwrap();

    let plain = GroupRankingService::new(store.clone(), cache.clone());
    let page = plain.get_ranked(1, 0, 10, as_of()).await.unwrap();
    assert_eq!(scores(&page), vec![(101, 22.0), (102, 10.0), (103, 1.0)]);

    let disabled = GroupRankingService::new(store.clone(), cache.clone())
        .with_personal_boost(profiles.clone(), 0.0);
    let page = disabled.get_ranked(1, 0, 10, as_of()).await.unwrap();
    assert_eq!(scores(&page), vec![(101, 22.0), (102, 10.0), (103, 1.0)]);

    // walk 2.5 + DOG 2.5 from the like, plus 1.0 for owning a dog
    let boosted = GroupRankingService::new(store.clone(), cache.clone())
        .with_personal_boost(profiles.clone(), 2.0);
    let page = boosted.get_ranked(1, 0, 10, as_of()).await.unwrap();
    assert_eq!(scores(&page), vec![(101, 22.0), (103, 13.0), (102, 10.0)]);

    // the boost only reorders within the page it serves
    let page = boosted.get_ranked(1, 0, 2, as_of()).await.unwrap();
    assert_eq!(scores(&page), vec![(101, 22.0), (102, 10.0)]);

    profiles.invalidate(1).await.unwrap();
    let page = boosted.get_ranked(1, 0, 10, as_of()).await.unwrap();
    assert_eq!(scores(&page), vec![(101, 22.0), (102, 10.0), (103, 1.0)]);
}
