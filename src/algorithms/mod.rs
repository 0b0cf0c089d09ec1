pub mod group_key;
pub mod scoring;

pub use group_key::{resolve_group_key, OwnershipTier, RegionNames, SegmentKey, UNKNOWN_REGION};
pub use scoring::{score, score_pool, AuthorSignal, UserSignal};
