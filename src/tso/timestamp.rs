//! Hybrid timestamp layout.
//!
//! ```text
//!  63                         18 17            0
//! +-----------------------------+---------------+
//! |   physical (unix millis)    |    logical    |
//! +-----------------------------+---------------+
//! ```

use crate::core::Timestamp;

pub const LOGICAL_BITS: u32 = 18;
pub const MAX_LOGICAL: u64 = 1 << LOGICAL_BITS;
const LOGICAL_MASK: u64 = MAX_LOGICAL - 1;

pub fn compose_ts(physical_ms: u64, logical: u64) -> Timestamp {
    (physical_ms << LOGICAL_BITS) | (logical & LOGICAL_MASK)
}

/// Split a timestamp into `(physical_ms, logical)`.
pub fn parse_ts(ts: Timestamp) -> (u64, u64) {
    (ts >> LOGICAL_BITS, ts & LOGICAL_MASK)
}

/// Wall clock in milliseconds since the Unix epoch.
pub fn physical_now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
