use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::models::{PetRecord, UserRecord};
use crate::services::cache::keys;
use crate::utils::age_group;

/// Placeholder region name for users whose region id does not resolve.
pub const UNKNOWN_REGION: &str = "UNKNOWN";

/// Side-channel lookup from region id to display name.
pub trait RegionNames {
    fn region_name(&self, region_id: i64) -> Option<&str>;

    /// Name for an optional region reference, falling back to [`UNKNOWN_REGION`].
    fn resolve(&self, region_id: Option<i64>) -> &str {
        region_id
            .and_then(|id| self.region_name(id))
            .unwrap_or(UNKNOWN_REGION)
    }
}

impl RegionNames for HashMap<i64, String> {
    fn region_name(&self, region_id: i64) -> Option<&str> {
        self.get(&region_id).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnershipTier {
    NoPet,
    HasPet,
    HasDog,
}

impl OwnershipTier {
    pub fn from_pets(pets: &[PetRecord]) -> Self {
        if pets.iter().any(|p| p.animal.is_primary()) {
            OwnershipTier::HasDog
        } else if !pets.is_empty() {
            OwnershipTier::HasPet
        } else {
            OwnershipTier::NoPet
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OwnershipTier::NoPet => "NOPET",
            OwnershipTier::HasPet => "HASPET",
            OwnershipTier::HasDog => "HASDOG",
        }
    }
}

/// Coarse user segment, `<ageGroup>_<gender>_<region>_<tier>`.
///
/// Never persisted: the batch writer and the read path both recompute it and
/// must arrive at the same bytes for the same inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentKey(String);

impl SegmentKey {
    pub fn from_parts(age_group: i32, gender: &str, region: &str, tier: OwnershipTier) -> Self {
        Self(format!("{}_{}_{}_{}", age_group, gender, region, tier.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sorted-set key holding this segment's ranking.
    pub fn cache_key(&self) -> String {
        keys::group(self.as_str())
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn resolve_group_key(
    user: &UserRecord,
    pets: &[PetRecord],
    regions: &impl RegionNames,
    as_of: NaiveDate,
) -> SegmentKey {
    SegmentKey::from_parts(
        age_group(user.birth_date, as_of),
        &user.gender,
        regions.resolve(user.region_id),
        OwnershipTier::from_pets(pets),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn regions() -> HashMap<i64, String> {
        HashMap::from([(1, "Seoul".to_string()), (2, "Busan".to_string())])
    }

    #[test]
    fn formats_documented_example() {
        let user = UserRecord::new(7, date(1990, 3, 1), "F", Some(1));
        let pets = vec![PetRecord::new(1, 7, "cat")];
        let key = resolve_group_key(&user, &pets, &regions(), date(2024, 6, 1));
        assert_eq!(key.as_str(), "30_F_Seoul_HASPET");
        assert_eq!(key.cache_key(), "group:30_F_Seoul_HASPET");
    }

    #[test]
    fn tiers_follow_ownership() {
        assert_eq!(OwnershipTier::from_pets(&[]), OwnershipTier::NoPet);
        let mixed = vec![PetRecord::new(1, 1, "CAT"), PetRecord::new(2, 1, "dog")];
        assert_eq!(OwnershipTier::from_pets(&mixed), OwnershipTier::HasDog);
    }

    #[test]
    fn unknown_or_missing_region_uses_placeholder() {
        let as_of = date(2024, 6, 1);
        let stray = UserRecord::new(1, date(2001, 1, 1), "M", Some(99));
        let homeless = UserRecord::new(2, date(2001, 1, 1), "M", None);
        assert_eq!(
            resolve_group_key(&stray, &[], &regions(), as_of).as_str(),
            "20_M_UNKNOWN_NOPET"
        );
        assert_eq!(
            resolve_group_key(&homeless, &[], &regions(), as_of).as_str(),
            "20_M_UNKNOWN_NOPET"
        );
    }

    #[test]
    fn stable_while_decade_unchanged() {
        let user = UserRecord::new(3, date(1985, 12, 31), "F", Some(2));
        let pets = vec![PetRecord::new(9, 3, "DOG")];
        let early = resolve_group_key(&user, &pets, &regions(), date(2020, 1, 1));
        let later = resolve_group_key(&user, &pets, &regions(), date(2025, 12, 30));
        assert_eq!(early, later);
        let next_decade = resolve_group_key(&user, &pets, &regions(), date(2025, 12, 31));
        assert_eq!(next_decade.as_str(), "40_F_Busan_HASDOG");
    }
}
