pub mod memory;
pub mod postgres;

pub use memory::MemoryCatalogStore;
pub use postgres::PgCatalogStore;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::models::{CandidateItem, PetRecord, UserRecord};

/// Read-only access to the relational system of truth.
///
/// Every method is one bulk query; callers never loop over ids to fetch.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Live items ordered by like count, descending.
    async fn top_items_by_likes(&self, limit: usize) -> Result<Vec<CandidateItem>>;

    /// Live-comment counts per item; items without comments are absent.
    async fn comment_counts(&self, item_ids: &[i64]) -> Result<HashMap<i64, i64>>;

    async fn users_by_ids(&self, user_ids: &[i64]) -> Result<Vec<UserRecord>>;

    async fn all_users(&self) -> Result<Vec<UserRecord>>;

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>>;

    async fn pets_by_user_ids(&self, user_ids: &[i64]) -> Result<Vec<PetRecord>>;

    async fn region_names(&self) -> Result<HashMap<i64, String>>;

    async fn region_name(&self, region_id: i64) -> Result<Option<String>>;

    /// Live items for the given ids, in no particular order.
    async fn items_by_ids(&self, item_ids: &[i64]) -> Result<Vec<CandidateItem>>;

    async fn authored_item_ids(&self, user_id: i64) -> Result<Vec<i64>>;

    async fn liked_item_ids(&self, user_id: i64) -> Result<Vec<i64>>;

    async fn commented_item_ids(&self, user_id: i64) -> Result<Vec<i64>>;

    /// (item id, tag id) pairs for the given items.
    async fn item_tag_pairs(&self, item_ids: &[i64]) -> Result<Vec<(i64, i64)>>;

    async fn tag_names(&self, tag_ids: &[i64]) -> Result<HashMap<i64, String>>;
}
