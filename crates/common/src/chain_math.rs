//! Block-height to wall-clock estimation.
//! The chain produces one block every `BLOCK_INTERVAL_SECS`; given one
//! observed (height, time) pair any other height can be projected.

use chrono::{DateTime, Duration, Utc};

/// Nominal block production interval of the chain, in seconds.
pub const BLOCK_INTERVAL_SECS: i64 = 6;

/// One observed chain block together with the local time it was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAndTime {
    pub block: u64,
    pub time: DateTime<Utc>,
}

/// Estimate the wall-clock time at which `height` is (or was) produced,
/// projecting forward or backward from the observed pair.
pub fn estimate_time_at_block(height: u64, observed: &BlockAndTime) -> DateTime<Utc> {
    let delta = height as i64 - observed.block as i64;
    observed.time + Duration::seconds(delta * BLOCK_INTERVAL_SECS)
}
