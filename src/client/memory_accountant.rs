// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

/// External memory-tracker sink (spec §6 Memory listener interface).
///
/// Thread-safe; deltas must sum to zero over the client's lifetime after the
/// final `close()`. The implementation is treated as an opaque external
/// collaborator — only this contract matters.
pub trait SystemMemoryUsageListener: Send + Sync {
    fn update_system_memory_usage(&self, delta: i64);
}

/// Thin adapter applying signed deltas to the external memory tracker
/// (spec §4.2). Positive on enqueue, negative on dequeue or on returning the
/// full buffer to the pool at `close()`.
#[derive(Debug, Clone)]
pub struct MemoryAccountant {
    listener: Arc<dyn SystemMemoryUsageListener>,
}

impl MemoryAccountant {
    pub fn new(listener: Arc<dyn SystemMemoryUsageListener>) -> Self {
        Self { listener }
    }

    /// Positive delta for `bytes` just enqueued. No-op for zero.
    pub fn reserve(&self, bytes: u64) {
        if bytes > 0 {
            self.listener.update_system_memory_usage(bytes as i64);
        }
    }

    /// Negative delta for `bytes` just dequeued or returned to the pool.
    /// No-op for zero.
    pub fn release(&self, bytes: u64) {
        if bytes > 0 {
            self.listener.update_system_memory_usage(-(bytes as i64));
        }
    }
}

/// Memory listener that discards every delta; used when the caller doesn't
/// wire up a real system memory tracker (demo binary, unit tests of
/// components other than accounting itself).
#[derive(Debug, Default)]
pub struct NoopMemoryListener;

impl SystemMemoryUsageListener for NoopMemoryListener {
    fn update_system_memory_usage(&self, _delta: i64) {}
}

/// Test double accumulating the running sum of deltas, used to assert the
/// "deltas sum to zero over the client's lifetime" property (spec §8).
#[derive(Debug, Default)]
pub struct CountingMemoryListener {
    total: AtomicI64,
}

impl CountingMemoryListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> i64 {
        self.total.load(Ordering::SeqCst)
    }
}

impl SystemMemoryUsageListener for CountingMemoryListener {
    fn update_system_memory_usage(&self, delta: i64) {
        self.total.fetch_add(delta, Ordering::SeqCst);
    }
}
