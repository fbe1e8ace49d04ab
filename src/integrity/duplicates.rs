//! Duplicate-entry heuristic. Two entries are "the same" when they share owner and
//! category, their category match keys hash equal, and they were created within the
//! configured window of each other.

use xxhash_rust::xxh3::xxh3_64;

use super::ImmutableRecord;
use crate::model::{DataCategory, HealthPayload};

pub fn content_fingerprint(plaintext: &[u8]) -> String { format!("{:016x}", xxh3_64(plaintext)) }

pub fn match_fingerprint(payload: &HealthPayload) -> String {
    let key = format!("{}|{}", payload.category().as_str(), payload.match_key());
    format!("{:016x}", xxh3_64(key.as_bytes()))
}

pub fn find_duplicate<'a>(
    existing: &'a [ImmutableRecord],
    category: DataCategory,
    match_fp: &str,
    now_ms: i64,
    window_ms: i64,
) -> Option<&'a ImmutableRecord> {
    let since = now_ms.saturating_sub(window_ms);
    existing
        .iter()
        .find(|r| r.category == category && r.created_at >= since && r.match_fingerprint == match_fp)
}
