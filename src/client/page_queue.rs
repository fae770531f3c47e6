// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use tokio::sync::Notify;
use tokio::time::{Instant, sleep};

use crate::models::page::SerializedPage;

/// MPSC byte-bounded queue of serialized pages with a sentinel end-of-stream
/// marker and a blocking poll with timeout (spec §4.1).
///
/// Only the consumer thread polls; any sub-client thread may push. Backed by
/// a short-held `std::sync::Mutex<VecDeque<_>>` plus a `Notify` rather than a
/// lock-free structure: contention is low because the queue is only ever
/// held for the duration of a `VecDeque` push/pop, never across an `.await`.
#[derive(Debug)]
pub struct PageQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct Inner {
    pages: VecDeque<SerializedPage>,
    buffer_bytes: u64,
    has_sentinel: bool,
}

impl Default for PageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PageQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    /// Non-blocking pop of the head of the queue.
    pub fn poll(&self) -> Option<SerializedPage> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let page = guard.pages.pop_front()?;
        if !page.is_sentinel() {
            guard.buffer_bytes -= page.retained_size_in_bytes;
        } else {
            // The sentinel was consumed; the caller (consumer) re-appends it
            // via `append_sentinel_if_absent` to keep it terminal.
            guard.has_sentinel = false;
        }
        Some(page)
    }

    /// Blocks up to `max_wait` for a page, returning `None` on timeout.
    /// Woken promptly by any `push_all`/`append_sentinel_if_absent` call, so
    /// it is interruptible by `close()` (which appends the sentinel).
    pub async fn poll_with_timeout(&self, max_wait: Duration) -> Option<SerializedPage> {
        let deadline = Instant::now() + max_wait;
        loop {
            // Register interest *before* checking, to avoid missing a
            // notification delivered between the check and the await. A
            // `Notified` only enrolls as a waiter once polled, so `enable()`
            // it here rather than relying on the first `select!` poll —
            // otherwise a `notify_waiters()` landing between `poll()` below
            // and that first poll is dropped silently (`notify_waiters`
            // stores no permit, unlike `notify_one`).
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(page) = self.poll() {
                return Some(page);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            tokio::select! {
                _ = &mut notified => {},
                _ = sleep(remaining) => return None,
            }
        }
    }

    /// Pushes a batch of freshly-arrived pages (never the sentinel — use
    /// `append_sentinel_if_absent` for that) and wakes any waiter.
    pub fn push_all(&self, pages: impl IntoIterator<Item = SerializedPage>) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for page in pages {
            if !page.is_sentinel() {
                guard.buffer_bytes += page.retained_size_in_bytes;
            }
            guard.pages.push_back(page);
        }
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Appends `NO_MORE_PAGES` unless one is already present; the sentinel is
    /// always last and appears at most once.
    pub fn append_sentinel_if_absent(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !guard.has_sentinel {
            guard.pages.push_back(SerializedPage::no_more_pages());
            guard.has_sentinel = true;
        }
        drop(guard);
        self.notify.notify_waiters();
    }

    /// The front element without removing it.
    pub fn peek_head(&self) -> Option<SerializedPage> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.pages.front().cloned()
    }

    /// The back element without removing it.
    pub fn peek_tail(&self) -> Option<SerializedPage> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.pages.back().cloned()
    }

    /// True iff the head of the queue is the end-of-stream sentinel.
    pub fn head_is_sentinel(&self) -> bool {
        self.peek_head().is_some_and(|p| p.is_sentinel())
    }

    /// Running sum of `retained_size_in_bytes` for pages currently queued,
    /// excluding the sentinel.
    pub fn buffer_bytes(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).buffer_bytes
    }

    /// Count of buffered pages, excluding the sentinel.
    pub fn buffered_page_count(&self) -> usize {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.pages.len() - usize::from(guard.has_sentinel)
    }

    /// Drops all queued pages (including the sentinel flag) and returns the
    /// retained bytes that were discarded, for the caller to return to the
    /// memory pool.
    pub fn clear(&self) -> u64 {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let freed = guard.buffer_bytes;
        guard.pages.clear();
        guard.buffer_bytes = 0;
        guard.has_sentinel = false;
        drop(guard);
        self.notify.notify_waiters();
        freed
    }
}
