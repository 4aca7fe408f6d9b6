// ============================================================================
// Timestamp and ID allocators
// ============================================================================
//
// Both allocators hand out ranges from an in-memory counter and keep a
// high-water mark in the metadata store. The mark is always persisted
// before the counter moves past it, so a restart resumes above every value
// that could have been issued.
//
// ============================================================================

use super::timestamp::{MAX_LOGICAL, compose_ts, physical_now_ms};
use crate::core::{MetaError, Result, Timestamp, UniqueId};
use crate::storage::KvStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Level, event};

pub const TIMESTAMP_KEY: &str = "tso/timestamp";
pub const ID_KEY: &str = "tso/id";

/// Persisted upper bound for one allocator namespace.
struct HighWaterMark {
    kv: Arc<dyn KvStore>,
    key: String,
}

impl HighWaterMark {
    async fn load(&self) -> Result<Option<u64>> {
        match self.kv.get(&self.key).await? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, mark: u64) -> Result<()> {
        let bytes = rmp_serde::to_vec(&mark)?;
        self.kv.set(&self.key, bytes).await.inspect_err(|err| {
            event!(Level::WARN, key = %self.key, mark, error = %err, "high-water mark persist failed");
        })
    }
}

fn validate_count(count: u32) -> Result<()> {
    if count == 0 {
        return Err(MetaError::InvalidArgument("count must be positive".to_string()));
    }
    Ok(())
}

// ============================================================================
// Timestamp Oracle
// ============================================================================

struct TsoState {
    physical_ms: u64,
    /// Next unused logical value within `physical_ms`
    logical: u64,
    /// Every issued timestamp has a physical part strictly below this
    saved_ms: u64,
}

/// Issues strictly increasing hybrid timestamps.
pub struct TimestampOracle {
    mark: HighWaterMark,
    save_interval_ms: u64,
    clock: fn() -> u64,
    state: Mutex<TsoState>,
}

impl TimestampOracle {
    pub async fn load(kv: Arc<dyn KvStore>, save_interval_ms: u64) -> Result<Self> {
        Self::load_with_clock(kv, save_interval_ms, physical_now_ms).await
    }

    /// Same as [`load`](Self::load) with an explicit physical clock source.
    pub async fn load_with_clock(
        kv: Arc<dyn KvStore>,
        save_interval_ms: u64,
        clock: fn() -> u64,
    ) -> Result<Self> {
        let mark = HighWaterMark {
            kv,
            key: TIMESTAMP_KEY.to_string(),
        };
        let saved_ms = mark.load().await?.unwrap_or(0);
        let physical_ms = clock().max(saved_ms);

        event!(Level::INFO, saved_ms, physical_ms, "timestamp oracle loaded");

        Ok(Self {
            mark,
            save_interval_ms: save_interval_ms.max(1),
            clock,
            state: Mutex::new(TsoState {
                physical_ms,
                logical: 0,
                saved_ms,
            }),
        })
    }

    /// Reserve `count` consecutive timestamps and return the first one.
    pub async fn alloc(&self, count: u32) -> Result<Timestamp> {
        validate_count(count)?;
        let count = u64::from(count);
        if count > MAX_LOGICAL {
            return Err(MetaError::InvalidArgument(format!(
                "count {} exceeds {} timestamps per request",
                count, MAX_LOGICAL
            )));
        }

        let mut state = self.state.lock().await;

        let now = (self.clock)();
        let (mut physical, mut logical) = if now > state.physical_ms {
            (now, 0)
        } else {
            // same millisecond, or the wall clock went backwards
            (state.physical_ms, state.logical)
        };
        if logical + count > MAX_LOGICAL {
            physical += 1;
            logical = 0;
        }

        if physical >= state.saved_ms {
            let new_saved = physical + self.save_interval_ms;
            self.mark.save(new_saved).await?;
            state.saved_ms = new_saved;
        }

        state.physical_ms = physical;
        state.logical = logical + count;
        Ok(compose_ts(physical, logical))
    }

    pub async fn alloc_one(&self) -> Result<Timestamp> {
        self.alloc(1).await
    }
}

// ============================================================================
// ID Allocator
// ============================================================================

struct IdState {
    next: UniqueId,
    reserved_end: UniqueId,
}

/// Issues unique IDs from a counter independent of the timestamp oracle.
pub struct IdAllocator {
    mark: HighWaterMark,
    batch_size: i64,
    state: Mutex<IdState>,
}

impl IdAllocator {
    pub async fn load(kv: Arc<dyn KvStore>, batch_size: u32) -> Result<Self> {
        let mark = HighWaterMark {
            kv,
            key: ID_KEY.to_string(),
        };
        // 0 is never issued
        let end = mark.load().await?.unwrap_or(1).max(1) as UniqueId;

        event!(Level::INFO, next_id = end, "id allocator loaded");

        Ok(Self {
            mark,
            batch_size: i64::from(batch_size.max(1)),
            state: Mutex::new(IdState {
                next: end,
                reserved_end: end,
            }),
        })
    }

    /// Reserve `count` IDs, returned as the half-open range `(start, end)`.
    pub async fn alloc(&self, count: u32) -> Result<(UniqueId, UniqueId)> {
        validate_count(count)?;
        let count = i64::from(count);

        let mut state = self.state.lock().await;
        let end = state.next + count;
        if end > state.reserved_end {
            let new_reserved = end + self.batch_size;
            self.mark.save(new_reserved as u64).await?;
            state.reserved_end = new_reserved;
        }

        let start = state.next;
        state.next = end;
        Ok((start, end))
    }

    pub async fn alloc_one(&self) -> Result<UniqueId> {
        let (start, _) = self.alloc(1).await?;
        Ok(start)
    }
}
