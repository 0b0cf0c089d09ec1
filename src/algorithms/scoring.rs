//! Rule-based relevance scoring for (user, item) pairs.
//!
//! Everything here is pure: inputs come from the batch snapshot, nothing is
//! fetched, nothing is mutated. The orchestrator times this step as "compute"
//! on that basis.

use chrono::{Duration, NaiveDate, NaiveTime};
use std::collections::{HashMap, HashSet};

use crate::algorithms::group_key::RegionNames;
use crate::models::{AnimalKind, CandidateItem, PetRecord, UserRecord};
use crate::utils::age_group;

pub const W_LIKE: f64 = 2.0;
pub const W_COMMENT: f64 = 1.0;
pub const W_SAME_CATEGORY: f64 = 7.0;
pub const W_SAME_AGE_GROUP: f64 = 5.0;
pub const W_SAME_REGION: f64 = 5.0;
pub const W_RECENCY: f64 = 10.0;

/// Items created after midnight this many days before `as_of` count as new.
pub const RECENCY_WINDOW_DAYS: i64 = 2;

/// Per-user inputs, computed once per user and reused across the pool.
#[derive(Debug, Clone)]
pub struct UserSignal {
    pub categories: HashSet<AnimalKind>,
    pub age_group: i32,
    pub region_name: String,
}

impl UserSignal {
    pub fn new(
        user: &UserRecord,
        pets: &[PetRecord],
        regions: &impl RegionNames,
        as_of: NaiveDate,
    ) -> Self {
        Self {
            categories: pets.iter().map(|p| p.animal.clone()).collect(),
            age_group: age_group(user.birth_date, as_of),
            region_name: regions.resolve(user.region_id).to_string(),
        }
    }
}

/// Author-side inputs. A missing author is modelled as `None` at the call site
/// and contributes no author-dependent bonus.
#[derive(Debug, Clone, Default)]
pub struct AuthorSignal {
    pub age_group: Option<i32>,
    pub region_name: Option<String>,
    pub categories: HashSet<AnimalKind>,
}

impl AuthorSignal {
    pub fn new(
        author: &UserRecord,
        categories: HashSet<AnimalKind>,
        regions: &impl RegionNames,
        as_of: NaiveDate,
    ) -> Self {
        Self {
            age_group: Some(age_group(author.birth_date, as_of)),
            region_name: Some(regions.resolve(author.region_id).to_string()),
            categories,
        }
    }
}

pub fn score(
    user: &UserSignal,
    item: &CandidateItem,
    comment_count: i64,
    author: Option<&AuthorSignal>,
    as_of: NaiveDate,
) -> f64 {
    let mut score = item.like_count as f64 * W_LIKE;
    score += comment_count as f64 * W_COMMENT;

    if let Some(author) = author {
        if !user.categories.is_disjoint(&author.categories) {
            score += W_SAME_CATEGORY;
        }
        if author.age_group == Some(user.age_group) {
            score += W_SAME_AGE_GROUP;
        }
        if author.region_name.as_deref() == Some(user.region_name.as_str()) {
            score += W_SAME_REGION;
        }
    }

    if is_recent(item, as_of) {
        score += W_RECENCY;
    }

    score
}

fn is_recent(item: &CandidateItem, as_of: NaiveDate) -> bool {
    let cutoff = (as_of - Duration::days(RECENCY_WINDOW_DAYS)).and_time(NaiveTime::default());
    item.created_at.map_or(false, |created| created > cutoff)
}

/// Scores the whole candidate pool for one user, in pool order.
pub fn score_pool(
    user: &UserSignal,
    pool: &[CandidateItem],
    comment_counts: &HashMap<i64, i64>,
    authors: &HashMap<i64, AuthorSignal>,
    as_of: NaiveDate,
) -> Vec<(i64, f64)> {
    pool.iter()
        .map(|item| {
            let comments = comment_counts.get(&item.id).copied().unwrap_or(0);
            let author = item.author_id.and_then(|id| authors.get(&id));
            (item.id, score(user, item, comments, author, as_of))
        })
        .collect()
}
