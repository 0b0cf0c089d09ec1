use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Animal kind of an owned pet, normalised to upper case (`DOG`, `CAT`, ...).
///
/// Doubles as the "category" of the category-overlap bonus and of the
/// owned-category profile set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnimalKind(String);

impl AnimalKind {
    /// The category that lifts a user into the top ownership tier.
    pub const PRIMARY: &'static str = "DOG";

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_uppercase())
    }

    pub fn dog() -> Self {
        Self(Self::PRIMARY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_primary(&self) -> bool {
        self.0 == Self::PRIMARY
    }
}

impl fmt::Display for AnimalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub birth_date: NaiveDate,
    /// Stored verbatim (e.g. `F`, `M`) and copied into the segment key as-is.
    pub gender: String,
    pub region_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetRecord {
    pub id: i64,
    pub user_id: i64,
    pub animal: AnimalKind,
}

/// Snapshot of an item considered for recommendation.
///
/// Comment counts are resolved separately by the bulk loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: i64,
    pub author_id: Option<i64>,
    pub like_count: i64,
    pub tag_ids: Vec<i64>,
    pub created_at: Option<NaiveDateTime>,
}

impl CandidateItem {
    pub fn new(id: i64, author_id: Option<i64>, like_count: i64) -> Self {
        Self {
            id,
            author_id,
            like_count,
            tag_ids: Vec::new(),
            created_at: None,
        }
    }

    pub fn with_tags(mut self, tag_ids: Vec<i64>) -> Self {
        self.tag_ids = tag_ids;
        self
    }

    pub fn created_at(mut self, created_at: NaiveDateTime) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// One entry of a served ranking page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub item: CandidateItem,
    pub score: f64,
}

/// Cached per-user preference signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfileSnapshot {
    pub user_id: i64,
    pub tag_weights: std::collections::HashMap<String, f64>,
    pub owned_categories: std::collections::BTreeSet<String>,
}

impl UserRecord {
    pub fn new(
        id: i64,
        birth_date: NaiveDate,
        gender: impl Into<String>,
        region_id: Option<i64>,
    ) -> Self {
        Self {
            id,
            birth_date,
            gender: gender.into(),
            region_id,
        }
    }
}

impl PetRecord {
    pub fn new(id: i64, user_id: i64, animal: impl AsRef<str>) -> Self {
        Self {
            id,
            user_id,
            animal: AnimalKind::new(animal),
        }
    }
}
