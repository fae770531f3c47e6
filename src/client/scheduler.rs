// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::atomic::Ordering;

use tracing::debug;

use crate::client::facade::{ExchangeClientInner, FacadeState};

/// Adaptive dispatcher (spec §4.5). Called re-entrantly from many entry
/// points; idempotent under the façade lock, which the caller must already
/// hold (`state` is `&mut` evidence of that).
pub(crate) fn dispatch(inner: &ExchangeClientInner, state: &mut FacadeState) {
    if inner.closed.load(Ordering::Acquire) || inner.failure.get().is_some() {
        return;
    }

    if state.no_more_locations && state.registry.completed_count() == state.registry.registered_count()
    {
        inner.page_queue.append_sentinel_if_absent();
        if inner.page_queue.head_is_sentinel() {
            inner.closed.store(true, Ordering::Release);
        }
        state.blocked_callers.notify_all();
        return;
    }

    let buffer_bytes = inner.page_queue.buffer_bytes();
    if buffer_bytes >= inner.max_buffered_bytes {
        return; // needed <= 0: backpressure
    }
    let needed = inner.max_buffered_bytes - buffer_bytes;

    let ratio = if state.average_bytes_per_request == 0 {
        1.0
    } else {
        needed as f64 / state.average_bytes_per_request as f64
    };

    let mut target = (ratio * inner.concurrent_request_multiplier as f64).floor() as i64;
    target = target.max(1);
    target -= state.registry.pending_count() as i64;

    debug!(
        needed,
        avg = state.average_bytes_per_request,
        target,
        pending = state.registry.pending_count(),
        "scheduler dispatch decision"
    );

    let mut dispatched = 0;
    while dispatched < target {
        let Some((location, client)) = state.registry.pop_queued() else {
            break;
        };
        state.registry.mark_pending(&location);
        client.schedule_request();
        dispatched += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, atomic::AtomicUsize},
        time::Duration,
    };

    use crate::{
        client::{
            facade::ExchangeClient, memory_accountant::NoopMemoryListener,
            sub_client::PageBufferSubClient,
        },
        models::{
            location::Location,
            status::{PageBufferClientStatus, SubClientState},
        },
    };

    #[derive(Debug)]
    struct CountingClient(Arc<AtomicUsize>);
    impl PageBufferSubClient for CountingClient {
        fn schedule_request(&self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        fn close(&self) {}
        fn status(&self) -> PageBufferClientStatus {
            PageBufferClientStatus {
                location: Location::new("counting"),
                state: SubClientState::Queued,
                last_request_micros: None,
                failure_count: 0,
            }
        }
    }

    #[tokio::test]
    async fn dispatches_at_least_one_with_zero_average() {
        let client = ExchangeClient::for_testing(1000, 3, Arc::new(NoopMemoryListener));
        let calls = Arc::new(AtomicUsize::new(0));
        client.add_test_sub_client(Location::new("a"), Arc::new(CountingClient(calls.clone())));
        client.add_test_sub_client(Location::new("b"), Arc::new(CountingClient(calls.clone())));
        client.run_scheduler_for_testing();

        assert!(calls.load(std::sync::atomic::Ordering::SeqCst) >= 1);
        let _ = Duration::from_secs(0);
    }
}
