//! Shared timestamp helpers.
//!
//! Timestamps are unix-epoch seconds with a `Z` suffix (e.g. `1771220592Z`),
//! which sort lexically only when the digit count matches, so ordering in SQL
//! always goes through `CAST(... AS INTEGER)` or the parsed value.

use crate::core::error::PalaceError;
use std::sync::{LazyLock, Mutex};
use ulid::{Generator, Ulid};

pub const SECS_PER_DAY: u64 = 86_400;

/// Current unix-epoch seconds.
pub fn now_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns unix-epoch seconds with `Z` suffix.
pub fn now_epoch_z() -> String {
    epoch_z(now_secs())
}

pub fn epoch_z(secs: u64) -> String {
    format!("{}Z", secs)
}

pub fn parse_epoch_z(ts: &str) -> Result<u64, PalaceError> {
    ts.trim_end_matches('Z')
        .parse::<u64>()
        .map_err(|_| PalaceError::ValidationError(format!("Invalid timestamp '{}'", ts)))
}

/// Whole days elapsed between two epoch-second instants (0 if `later` is earlier).
pub fn days_between(earlier: u64, later: u64) -> u64 {
    later.saturating_sub(earlier) / SECS_PER_DAY
}

/// Kind-prefixed unique id, e.g. `d_01J...`.
///
/// Ids minted by one process are strictly increasing, so `id` breaks ties
/// between records created in the same second in creation order.
pub fn new_id(prefix: &str) -> String {
    static GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));
    let ulid = GENERATOR
        .lock()
        .ok()
        .and_then(|mut g| g.generate().ok())
        .unwrap_or_else(Ulid::new);
    format!("{}_{}", prefix, ulid)
}
