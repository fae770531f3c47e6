// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::{
    client::{
        blocked_callers::{BlockedCallers, BlockedSignal},
        http_sub_client::HttpPageBufferClient,
        memory_accountant::{MemoryAccountant, SystemMemoryUsageListener},
        page_queue::PageQueue,
        registry::SubClientRegistry,
        scheduler,
        sub_client::{PageBufferSubClient, SubClientCallback},
    },
    models::{
        errors::ExchangeError,
        location::Location,
        page::SerializedPage,
        status::ExchangeClientStatus,
    },
};
use crate::cfg::{config::ExchangeClientConfig, enums::BufferPressure};

/// Mutable state guarded by the façade's coarse mutex (spec §5): everything
/// except the lock-free page queue, `closed`, and `failure`.
pub(crate) struct FacadeState {
    pub(crate) registry: SubClientRegistry,
    pub(crate) blocked_callers: BlockedCallers,
    pub(crate) no_more_locations: bool,
    pub(crate) average_bytes_per_request: u64,
    pub(crate) successful_requests: u64,
}

impl FacadeState {
    fn new() -> Self {
        Self {
            registry: SubClientRegistry::new(),
            blocked_callers: BlockedCallers::new(),
            no_more_locations: false,
            average_bytes_per_request: 0,
            successful_requests: 0,
        }
    }
}

/// Shared state behind the façade, reached both from `ExchangeClient`'s
/// public methods and, via a `Weak` handle, from every sub-client's callback
/// (spec §4.6, §9).
pub(crate) struct ExchangeClientInner {
    pub(crate) max_buffered_bytes: u64,
    pub(crate) max_response_size: u64,
    pub(crate) concurrent_request_multiplier: u32,
    pub(crate) min_error_duration: Duration,
    pub(crate) max_error_duration: Duration,
    pub(crate) max_error_retries: u32,
    pub(crate) http_client: reqwest::Client,
    pub(crate) executor: tokio::runtime::Handle,
    pub(crate) page_queue: PageQueue,
    pub(crate) memory: MemoryAccountant,
    pub(crate) closed: AtomicBool,
    pub(crate) failure: OnceCell<Arc<ExchangeError>>,
    pub(crate) state: Mutex<FacadeState>,
}

impl ExchangeClientInner {
    /// First-writer-wins install into the failure cell (spec §4.7).
    fn fail(&self, err: ExchangeError) -> Arc<ExchangeError> {
        let arc = Arc::new(err);
        match self.failure.set(arc.clone()) {
            Ok(()) => arc,
            Err(_rejected) => self
                .failure
                .get()
                .cloned()
                .unwrap_or(arc),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FacadeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SubClientCallback for ExchangeClientInner {
    fn add_pages(&self, location: &Location, pages: Vec<SerializedPage>) -> bool {
        let total_retained: u64 = pages.iter().map(|p| p.retained_size_in_bytes).sum();
        let response_size: u64 = pages.iter().map(|p| p.size_in_bytes).sum();

        // `closed` is re-checked under the façade lock (spec §5): push_all
        // and reserve must not race `close()`'s clear()+release(), or a page
        // can land after the sentinel and its delta never gets released.
        let mut state = self.lock_state();
        if self.closed.load(Ordering::Acquire) || self.failure.get().is_some() {
            return false;
        }
        tracing::debug!(%location, pages = pages.len(), total_retained, "add_pages");

        self.page_queue.push_all(pages);
        self.memory.reserve(total_retained);

        state.successful_requests += 1;
        let n = state.successful_requests as u128;
        let prev = state.average_bytes_per_request as u128;
        let updated = prev * (n - 1) / n + response_size as u128 / n;
        state.average_bytes_per_request = updated as u64;
        state.blocked_callers.notify_all();
        scheduler::dispatch(self, &mut state);
        true
    }

    fn request_complete(&self, location: &Location) {
        let mut state = self.lock_state();
        state.registry.mark_queued(location);
        scheduler::dispatch(self, &mut state);
    }

    fn client_finished(&self, location: &Location) {
        let mut state = self.lock_state();
        state.registry.mark_completed(location);
        scheduler::dispatch(self, &mut state);
    }

    fn client_failed(&self, location: &Location, cause: anyhow::Error) {
        warn!(%location, error = %cause, "sub-client escalated failure");
        self.fail(ExchangeError::transport(location.clone(), cause));
        let mut state = self.lock_state();
        state.blocked_callers.notify_all();
        scheduler::dispatch(self, &mut state);
    }
}

/// Consumer-side distributed exchange client (spec §4.6).
///
/// An `Arc`-friendly façade over [`ExchangeClientInner`] — cheap to clone,
/// mirroring the teacher's `Arc<ClientConnection>` / `Arc<Pool>` split
/// between the transport object exposed to callers and the shared state
/// reached from callbacks.
#[derive(Clone)]
pub struct ExchangeClient {
    inner: Arc<ExchangeClientInner>,
}

impl ExchangeClient {
    /// Builds a new client from validated configuration, an injected HTTP
    /// client, and a memory listener (spec §6 Configuration).
    pub fn new(
        cfg: &ExchangeClientConfig,
        http_client: reqwest::Client,
        memory_listener: Arc<dyn SystemMemoryUsageListener>,
        executor: tokio::runtime::Handle,
    ) -> Self {
        let inner = Arc::new(ExchangeClientInner {
            max_buffered_bytes: cfg.buffer.max_buffered_bytes,
            max_response_size: cfg.buffer.max_response_size,
            concurrent_request_multiplier: cfg.buffer.concurrent_request_multiplier,
            min_error_duration: cfg.retry.min_error_duration,
            max_error_duration: cfg.retry.max_error_duration,
            max_error_retries: cfg.retry.max_error_retries,
            http_client,
            executor,
            page_queue: PageQueue::new(),
            memory: MemoryAccountant::new(memory_listener),
            closed: AtomicBool::new(false),
            failure: OnceCell::new(),
            state: Mutex::new(FacadeState::new()),
        });
        Self { inner }
    }

    fn build_sub_client(&self, location: Location) -> Arc<dyn PageBufferSubClient> {
        let callback: Weak<dyn SubClientCallback> = Arc::downgrade(&self.inner);
        HttpPageBufferClient::new(
            self.inner.http_client.clone(),
            self.inner.max_response_size,
            self.inner.min_error_duration,
            self.inner.max_error_duration,
            self.inner.max_error_retries,
            location,
            callback,
            self.inner.executor.clone(),
        )
    }

    /// Registers a new endpoint; idempotent on duplicates (spec §4.6).
    pub fn add_location(&self, location: Location) -> Result<(), ExchangeError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.inner.lock_state();
        if state.no_more_locations {
            return Err(ExchangeError::usage(
                "add_location called after no_more_locations",
            ));
        }
        if state.registry.contains(&location) {
            return Ok(());
        }
        let client = self.build_sub_client(location.clone());
        state.registry.add(location, client);
        scheduler::dispatch(&self.inner, &mut state);
        Ok(())
    }

    /// Freezes the endpoint set and triggers the termination check.
    pub fn no_more_locations(&self) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.inner.lock_state();
        if state.no_more_locations {
            return;
        }
        state.no_more_locations = true;
        info!("no more locations; draining registered endpoints");
        scheduler::dispatch(&self.inner, &mut state);
    }

    /// Folds the invariants shared by `poll_page`/`get_next_page` once a
    /// page has been popped off the queue: sentinel bookkeeping, memory
    /// accounting, and scheduler re-evaluation.
    fn observe_polled(&self, page: SerializedPage) -> Option<SerializedPage> {
        if page.is_sentinel() {
            self.inner.closed.store(true, Ordering::Release);
            self.inner.page_queue.append_sentinel_if_absent();
            let mut state = self.inner.lock_state();
            state.blocked_callers.notify_all();
            return None;
        }
        self.inner.memory.release(page.retained_size_in_bytes);
        let mut state = self.inner.lock_state();
        scheduler::dispatch(&self.inner, &mut state);
        Some(page)
    }

    /// Non-blocking poll for the next page (spec §4.6). Must not be called
    /// while holding the façade mutex (precondition; there is no way to
    /// observe that mutex from outside this module).
    pub fn poll_page(&self) -> Result<Option<SerializedPage>, ExchangeError> {
        if let Some(err) = self.inner.failure.get() {
            return Err((**err).clone());
        }
        match self.inner.page_queue.poll() {
            None => Ok(None),
            Some(page) => Ok(self.observe_polled(page)),
        }
    }

    /// Blocks up to `max_wait` for a page (spec §4.6). Only actually waits
    /// if endpoints are registered and `max_wait >= 1ms`; otherwise behaves
    /// like `poll_page`.
    pub async fn get_next_page(
        &self,
        max_wait: Duration,
    ) -> Result<Option<SerializedPage>, ExchangeError> {
        if let Some(err) = self.inner.failure.get() {
            return Err((**err).clone());
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        let has_registered = self.inner.lock_state().registry.registered_count() > 0;
        if !has_registered || max_wait < Duration::from_millis(1) {
            return self.poll_page();
        }

        let polled = self.inner.page_queue.poll_with_timeout(max_wait).await;
        if let Some(err) = self.inner.failure.get() {
            return Err((**err).clone());
        }
        match polled {
            None => Ok(None),
            Some(page) => Ok(self.observe_polled(page)),
        }
    }

    /// Returns a signal completed immediately if a page is available,
    /// closed, or failed; otherwise deferred (spec §4.6, §4.4).
    pub fn is_blocked(&self) -> BlockedSignal {
        let ready = |inner: &ExchangeClientInner| {
            inner.closed.load(Ordering::Acquire)
                || inner.failure.get().is_some()
                || inner.page_queue.peek_head().is_some()
        };
        if ready(&self.inner) {
            return BlockedCallers::already_fired();
        }
        let mut state = self.inner.lock_state();
        if ready(&self.inner) {
            return BlockedCallers::already_fired();
        }
        state.blocked_callers.register()
    }

    /// True iff closed and every registered endpoint has completed.
    pub fn is_finished(&self) -> Result<bool, ExchangeError> {
        if let Some(err) = self.inner.failure.get() {
            return Err((**err).clone());
        }
        if !self.inner.closed.load(Ordering::Acquire) {
            return Ok(false);
        }
        let state = self.inner.lock_state();
        Ok(state.registry.completed_count() == state.registry.registered_count())
    }

    /// True iff terminal (explicit close or natural completion).
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// If the client has failed, returns the first error observed.
    pub fn failure(&self) -> Option<ExchangeError> {
        self.inner.failure.get().map(|e| (**e).clone())
    }

    /// Idempotent terminal shutdown (spec §4.6): closes every sub-client,
    /// clears the queue, returns buffered bytes to the memory pool, appends
    /// the sentinel, and wakes blocked callers. Safe to call more than
    /// once — every step it performs is itself idempotent.
    pub fn close(&self) {
        // Held across the whole sequence so it serializes against
        // `add_pages`'s own lock-guarded closed-check (spec §5): otherwise
        // a page can be pushed after `clear()` has already run, landing
        // after the sentinel with its delta never released.
        let mut state = self.inner.lock_state();
        self.inner.closed.store(true, Ordering::Release);
        let freed = self.inner.page_queue.clear();
        self.inner.page_queue.append_sentinel_if_absent();
        self.inner.memory.release(freed);

        for client in state.registry.all_clients() {
            client.close();
        }
        state.blocked_callers.notify_all();
    }

    /// Snapshot of buffered bytes, EWMA, buffered-page count, and per-client
    /// status (spec §6 Status report).
    pub fn status(&self) -> ExchangeClientStatus {
        let state = self.inner.lock_state();
        let buffer_bytes = self.inner.page_queue.buffer_bytes();
        ExchangeClientStatus {
            buffer_bytes,
            average_bytes_per_request: state.average_bytes_per_request,
            buffered_pages: self.inner.page_queue.buffered_page_count(),
            no_more_locations: state.no_more_locations,
            pressure: BufferPressure::classify(buffer_bytes, self.inner.max_buffered_bytes),
            per_client: state.registry.all_clients().map(|c| c.status()).collect(),
        }
    }
}

#[cfg(test)]
impl ExchangeClient {
    /// Test-only constructor bypassing config validation and HTTP wiring,
    /// for scheduler/registry unit tests that never issue a real request.
    pub(crate) fn for_testing(
        max_buffered_bytes: u64,
        concurrent_request_multiplier: u32,
        memory_listener: Arc<dyn SystemMemoryUsageListener>,
    ) -> Self {
        let inner = Arc::new(ExchangeClientInner {
            max_buffered_bytes,
            max_response_size: 16 * 1024 * 1024,
            concurrent_request_multiplier,
            min_error_duration: Duration::from_millis(1),
            max_error_duration: Duration::from_secs(1),
            max_error_retries: 5,
            http_client: reqwest::Client::new(),
            executor: tokio::runtime::Handle::current(),
            page_queue: PageQueue::new(),
            memory: MemoryAccountant::new(memory_listener),
            closed: AtomicBool::new(false),
            failure: OnceCell::new(),
            state: Mutex::new(FacadeState::new()),
        });
        Self { inner }
    }

    /// Registers a stub sub-client directly, without going through the HTTP
    /// constructor.
    pub(crate) fn add_test_sub_client(
        &self,
        location: Location,
        client: Arc<dyn PageBufferSubClient>,
    ) {
        let mut state = self.inner.lock_state();
        state.registry.add(location, client);
    }

    /// Invokes the scheduler once under the façade lock, as every public
    /// entry point does internally.
    pub(crate) fn run_scheduler_for_testing(&self) {
        let mut state = self.inner.lock_state();
        scheduler::dispatch(&self.inner, &mut state);
    }

    /// Directly drives the `add_pages` callback, as a sub-client would.
    pub(crate) fn deliver_pages_for_testing(&self, location: &Location, pages: Vec<SerializedPage>) -> bool {
        self.inner.add_pages(location, pages)
    }

    /// Directly drives the `client_finished` callback.
    pub(crate) fn finish_client_for_testing(&self, location: &Location) {
        self.inner.client_finished(location)
    }

    /// Directly drives the `client_failed` callback.
    pub(crate) fn fail_client_for_testing(&self, location: &Location, cause: anyhow::Error) {
        self.inner.client_failed(location, cause)
    }
}
