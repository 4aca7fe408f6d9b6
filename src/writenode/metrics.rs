use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the DD node and read by anyone holding the `Arc`.
#[derive(Debug, Default)]
pub struct DdNodeMetrics {
    batches: AtomicU64,
    applied: AtomicU64,
    buffer_violations: AtomicU64,
    decode_failures: AtomicU64,
    unsupported_messages: AtomicU64,
    invalid_inputs: AtomicU64,
}

/// Point-in-time copy of [`DdNodeMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdNodeStats {
    pub batches: u64,
    pub applied: u64,
    pub buffer_violations: u64,
    pub decode_failures: u64,
    pub unsupported_messages: u64,
    pub invalid_inputs: u64,
}

impl DdNodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_violation(&self) {
        self.buffer_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unsupported(&self) {
        self.unsupported_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalid_input(&self) {
        self.invalid_inputs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DdNodeStats {
        DdNodeStats {
            batches: self.batches.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            buffer_violations: self.buffer_violations.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            unsupported_messages: self.unsupported_messages.load(Ordering::Relaxed),
            invalid_inputs: self.invalid_inputs.load(Ordering::Relaxed),
        }
    }
}
