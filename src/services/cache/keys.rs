//! Cache key layout. These strings are shared with other deployments of the
//! platform and must stay byte-compatible.

pub const GROUP_PREFIX: &str = "group:";
pub const FEED_GROUPS_PREFIX: &str = "feed_groups:";
pub const PROFILE_PREFIX: &str = "prof:u:";

/// Single cluster-wide key guarding the batch run.
pub const BATCH_LOCK: &str = "cbf_batch_lock";
pub const BATCH_LOCK_VALUE: &str = "1";

/// Sorted set of (itemId, score) for one segment.
pub fn group(segment: &str) -> String {
    format!("{}{}", GROUP_PREFIX, segment)
}

/// Set of segments an item was written into.
pub fn feed_groups(item_id: i64) -> String {
    format!("{}{}", FEED_GROUPS_PREFIX, item_id)
}

/// Hash of tag name -> preference weight.
pub fn profile_tags(user_id: i64) -> String {
    format!("{}{}:tag", PROFILE_PREFIX, user_id)
}

/// Set of owned animal kinds.
pub fn profile_animals(user_id: i64) -> String {
    format!("{}{}:animal", PROFILE_PREFIX, user_id)
}
