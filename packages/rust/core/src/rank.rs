//! Per-user discovery depth.
//!
//! A base element sits at rank 0. Anything a user crafts sits one level
//! below the deeper of its two operands, where each operand counts at the
//! shallowest depth that user has ever reached it.

use opencraft_shared::{Result, is_base_element};
use opencraft_storage::Storage;

/// Rank of `word` in `username`'s tree: 0 for base elements and words the
/// user never crafted, otherwise the minimum rank logged for it.
pub async fn rank(storage: &Storage, word: &str, username: &str) -> Result<u32> {
    if is_base_element(word) {
        return Ok(0);
    }
    Ok(storage.min_rank(word, username).await?.unwrap_or(0))
}

/// Rank of a new craft of `first + second` by `username`.
pub async fn craft_rank(
    storage: &Storage,
    first: &str,
    second: &str,
    username: &str,
) -> Result<u32> {
    let a = rank(storage, first, username).await?;
    let b = rank(storage, second, username).await?;
    Ok(a.max(b) + 1)
}
