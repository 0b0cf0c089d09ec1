use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::algorithms::AuthorSignal;
use crate::error::Result;
use crate::models::{AnimalKind, CandidateItem, PetRecord, UserRecord};
use crate::services::store::CatalogStore;

/// Everything one batch run reads, loaded up front and never shared with
/// another run or with the read path.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub as_of: NaiveDate,
    pub candidates: Vec<CandidateItem>,
    pub comment_counts: HashMap<i64, i64>,
    pub authors: HashMap<i64, UserRecord>,
    pub author_categories: HashMap<i64, HashSet<AnimalKind>>,
    pub region_names: HashMap<i64, String>,
    pub users: Vec<UserRecord>,
    pub pets_by_user: HashMap<i64, Vec<PetRecord>>,
    /// Author-side scoring inputs derived once from the maps above.
    pub author_signals: HashMap<i64, AuthorSignal>,
}

impl BatchSnapshot {
    pub fn pets_of(&self, user_id: i64) -> &[PetRecord] {
        self.pets_by_user
            .get(&user_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Fetches the candidate pool and every lookup table the scorer needs in a
/// fixed number of bulk queries.
pub struct BulkLoader {
    store: Arc<dyn CatalogStore>,
    pool_size: usize,
}

impl BulkLoader {
    pub fn new(store: Arc<dyn CatalogStore>, pool_size: usize) -> Self {
        Self { store, pool_size }
    }

    /// Returns `None` when the candidate pool is empty; nothing else is
    /// queried in that case.
    pub async fn load(&self, as_of: NaiveDate) -> Result<Option<BatchSnapshot>> {
        let candidates = self.store.top_items_by_likes(self.pool_size).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let item_ids: Vec<i64> = candidates.iter().map(|item| item.id).collect();
        let comment_counts = self.store.comment_counts(&item_ids).await?;

        let author_ids: Vec<i64> = candidates
            .iter()
            .filter_map(|item| item.author_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let authors: HashMap<i64, UserRecord> = self
            .store
            .users_by_ids(&author_ids)
            .await?
            .into_iter()
            .map(|user| (user.id, user))
            .collect();

        let mut author_categories: HashMap<i64, HashSet<AnimalKind>> = HashMap::new();
        for pet in self.store.pets_by_user_ids(&author_ids).await? {
            author_categories.entry(pet.user_id).or_default().insert(pet.animal);
        }

        let region_names = self.store.region_names().await?;

        let users = self.store.all_users().await?;
        let user_ids: Vec<i64> = users.iter().map(|user| user.id).collect();
        let mut pets_by_user: HashMap<i64, Vec<PetRecord>> = HashMap::new();
        for pet in self.store.pets_by_user_ids(&user_ids).await? {
            pets_by_user.entry(pet.user_id).or_default().push(pet);
        }

        let author_signals = authors
            .values()
            .map(|author| {
                let categories = author_categories.get(&author.id).cloned().unwrap_or_default();
                (author.id, AuthorSignal::new(author, categories, &region_names, as_of))
            })
            .collect();

        debug!(
            candidates = candidates.len(),
            authors = authors.len(),
            regions = region_names.len(),
            "Loaded lookup tables"
        );
        info!(
            candidates = candidates.len(),
            users = users.len(),
            "Batch snapshot loaded"
        );

        Ok(Some(BatchSnapshot {
            as_of,
            candidates,
            comment_counts,
            authors,
            author_categories,
            region_names,
            users,
            pets_by_user,
            author_signals,
        }))
    }
}
