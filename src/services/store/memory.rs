use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::CatalogStore;
use crate::error::Result;
use crate::models::{CandidateItem, PetRecord, UserRecord};

#[derive(Debug, Default)]
struct Catalog {
    users: BTreeMap<i64, UserRecord>,
    pets: Vec<PetRecord>,
    regions: HashMap<i64, String>,
    items: BTreeMap<i64, CandidateItem>,
    tags: HashMap<i64, String>,
    comments: Vec<(i64, i64)>,
    likes: HashSet<(i64, i64)>,
}

/// In-process catalog used for local runs and tests.
///
/// Counts every trait call so callers can assert that the number of queries
/// does not grow with the number of users or items.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    catalog: RwLock<Catalog>,
    queries: AtomicUsize,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn reset_query_count(&self) {
        self.queries.store(0, Ordering::SeqCst);
    }

    fn tick(&self) {
        self.queries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn insert_user(&self, user: UserRecord) {
        self.catalog.write().users.insert(user.id, user);
    }

    pub fn insert_pet(&self, pet: PetRecord) {
        self.catalog.write().pets.push(pet);
    }

    pub fn insert_region(&self, id: i64, name: impl Into<String>) {
        self.catalog.write().regions.insert(id, name.into());
    }

    pub fn insert_tag(&self, id: i64, name: impl Into<String>) {
        self.catalog.write().tags.insert(id, name.into());
    }

    pub fn insert_item(&self, item: CandidateItem) {
        self.catalog.write().items.insert(item.id, item);
    }

    pub fn remove_item(&self, item_id: i64) {
        self.catalog.write().items.remove(&item_id);
    }

    pub fn add_comment(&self, item_id: i64, user_id: i64) {
        self.catalog.write().comments.push((item_id, user_id));
    }

    pub fn add_like(&self, user_id: i64, item_id: i64) {
        self.catalog.write().likes.insert((user_id, item_id));
    }

    pub fn remove_like(&self, user_id: i64, item_id: i64) {
        self.catalog.write().likes.remove(&(user_id, item_id));
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn top_items_by_likes(&self, limit: usize) -> Result<Vec<CandidateItem>> {
        self.tick();
        let catalog = self.catalog.read();
        let mut items: Vec<CandidateItem> = catalog.items.values().cloned().collect();
        items.sort_by(|a, b| b.like_count.cmp(&a.like_count).then(b.id.cmp(&a.id)));
        items.truncate(limit);
        Ok(items)
    }

    async fn comment_counts(&self, item_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        self.tick();
        let wanted: HashSet<i64> = item_ids.iter().copied().collect();
        let mut counts = HashMap::new();
        for (item_id, _) in self.catalog.read().comments.iter() {
            if wanted.contains(item_id) {
                *counts.entry(*item_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn users_by_ids(&self, user_ids: &[i64]) -> Result<Vec<UserRecord>> {
        self.tick();
        let catalog = self.catalog.read();
        Ok(user_ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| catalog.users.get(id).cloned())
            .collect())
    }

    async fn all_users(&self) -> Result<Vec<UserRecord>> {
        self.tick();
        Ok(self.catalog.read().users.values().cloned().collect())
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>> {
        self.tick();
        Ok(self.catalog.read().users.get(&user_id).cloned())
    }

    async fn pets_by_user_ids(&self, user_ids: &[i64]) -> Result<Vec<PetRecord>> {
        self.tick();
        let wanted: HashSet<i64> = user_ids.iter().copied().collect();
        Ok(self
            .catalog
            .read()
            .pets
            .iter()
            .filter(|pet| wanted.contains(&pet.user_id))
            .cloned()
            .collect())
    }

    async fn region_names(&self) -> Result<HashMap<i64, String>> {
        self.tick();
        Ok(self.catalog.read().regions.clone())
    }

    async fn region_name(&self, region_id: i64) -> Result<Option<String>> {
        self.tick();
        Ok(self.catalog.read().regions.get(&region_id).cloned())
    }

    async fn items_by_ids(&self, item_ids: &[i64]) -> Result<Vec<CandidateItem>> {
        self.tick();
        let catalog = self.catalog.read();
        // HashSet iteration: callers must not rely on order
        Ok(item_ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| catalog.items.get(id).cloned())
            .collect())
    }

    async fn authored_item_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.tick();
        Ok(self
            .catalog
            .read()
            .items
            .values()
            .filter(|item| item.author_id == Some(user_id))
            .map(|item| item.id)
            .collect())
    }

    async fn liked_item_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.tick();
        Ok(self
            .catalog
            .read()
            .likes
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, item_id)| *item_id)
            .collect())
    }

    async fn commented_item_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.tick();
        let ids: HashSet<i64> = self
            .catalog
            .read()
            .comments
            .iter()
            .filter(|(_, uid)| *uid == user_id)
            .map(|(item_id, _)| *item_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn item_tag_pairs(&self, item_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        self.tick();
        let catalog = self.catalog.read();
        Ok(item_ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| catalog.items.get(id))
            .flat_map(|item| item.tag_ids.iter().map(move |tag| (item.id, *tag)))
            .collect())
    }

    async fn tag_names(&self, tag_ids: &[i64]) -> Result<HashMap<i64, String>> {
        self.tick();
        let catalog = self.catalog.read();
        Ok(tag_ids
            .iter()
            .filter_map(|id| catalog.tags.get(id).map(|name| (*id, name.clone())))
            .collect())
    }
}
