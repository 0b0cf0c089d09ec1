use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use tracing::info;

use super::CatalogStore;
use crate::config::PostgresConfig;
use crate::error::Result;
use crate::models::{CandidateItem, PetRecord, UserRecord};

const ITEM_COLUMNS: &str = r#"
    f.id,
    f.user_id AS author_id,
    f.likes::BIGINT AS like_count,
    f.created_at,
    COALESCE(array_agg(ft.tag_id) FILTER (WHERE ft.tag_id IS NOT NULL), '{}')::BIGINT[] AS tag_ids
"#;

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    author_id: Option<i64>,
    like_count: i64,
    created_at: Option<NaiveDateTime>,
    tag_ids: Vec<i64>,
}

impl From<ItemRow> for CandidateItem {
    fn from(row: ItemRow) -> Self {
        CandidateItem {
            id: row.id,
            author_id: row.author_id,
            like_count: row.like_count,
            tag_ids: row.tag_ids,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    birthday: NaiveDate,
    gender: String,
    region_id: Option<i64>,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        UserRecord::new(row.id, row.birthday, row.gender, row.region_id)
    }
}

#[derive(sqlx::FromRow)]
struct PetRow {
    id: i64,
    user_id: i64,
    animal: String,
}

/// Postgres-backed catalog. Id lists are bound as arrays (`= ANY($1)`), so
/// each method is exactly one round trip regardless of list length.
#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        info!("Connected to Postgres (max_connections={})", config.max_connections);
        Ok(Self { pool })
    }

    async fn ids(&self, sql: &str, user_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn top_items_by_likes(&self, limit: usize) -> Result<Vec<CandidateItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS}
             FROM feeds f
             LEFT JOIN feed_tags ft ON ft.feed_id = f.id
             WHERE f.deleted_at IS NULL
             GROUP BY f.id
             ORDER BY f.likes DESC, f.id DESC
             LIMIT $1"
        );
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(CandidateItem::from).collect())
    }

    async fn comment_counts(&self, item_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT feed_id, COUNT(id) FROM comments
             WHERE feed_id = ANY($1) AND deleted_at IS NULL
             GROUP BY feed_id",
        )
        .bind(item_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn users_by_ids(&self, user_ids: &[i64]) -> Result<Vec<UserRecord>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, birthday, gender, region_id FROM users WHERE id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserRecord::from).collect())
    }

    async fn all_users(&self) -> Result<Vec<UserRecord>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, birthday, gender, region_id FROM users ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserRecord::from).collect())
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, birthday, gender, region_id FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserRecord::from))
    }

    async fn pets_by_user_ids(&self, user_ids: &[i64]) -> Result<Vec<PetRecord>> {
        let rows: Vec<PetRow> = sqlx::query_as(
            "SELECT id, user_id, animal FROM pets WHERE user_id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| PetRecord::new(row.id, row.user_id, row.animal))
            .collect())
    }

    async fn region_names(&self) -> Result<HashMap<i64, String>> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM regions")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn region_name(&self, region_id: i64) -> Result<Option<String>> {
        let name: Option<String> = sqlx::query_scalar("SELECT name FROM regions WHERE id = $1")
            .bind(region_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(name)
    }

    async fn items_by_ids(&self, item_ids: &[i64]) -> Result<Vec<CandidateItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS}
             FROM feeds f
             LEFT JOIN feed_tags ft ON ft.feed_id = f.id
             WHERE f.id = ANY($1) AND f.deleted_at IS NULL
             GROUP BY f.id"
        );
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(item_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(CandidateItem::from).collect())
    }

    async fn authored_item_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.ids(
            "SELECT id FROM feeds WHERE user_id = $1 AND deleted_at IS NULL",
            user_id,
        )
        .await
    }

    async fn liked_item_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.ids("SELECT feed_id FROM likes WHERE user_id = $1", user_id)
            .await
    }

    async fn commented_item_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.ids(
            "SELECT DISTINCT feed_id FROM comments WHERE user_id = $1 AND deleted_at IS NULL",
            user_id,
        )
        .await
    }

    async fn item_tag_pairs(&self, item_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT feed_id, tag_id FROM feed_tags WHERE feed_id = ANY($1)",
        )
        .bind(item_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn tag_names(&self, tag_ids: &[i64]) -> Result<HashMap<i64, String>> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, name FROM tags WHERE id = ANY($1)")
                .bind(tag_ids)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }
}
