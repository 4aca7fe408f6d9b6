//! Logical clock service: hybrid timestamps and unique IDs.

pub mod allocator;
pub mod timestamp;

pub use allocator::{ID_KEY, IdAllocator, TIMESTAMP_KEY, TimestampOracle};
pub use timestamp::{LOGICAL_BITS, MAX_LOGICAL, compose_ts, parse_ts, physical_now_ms};
