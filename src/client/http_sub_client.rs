// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use bytes::{Buf, Bytes};
use once_cell::sync::OnceCell;
use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::sub_client::{PageBufferSubClient, SubClientCallback},
    models::{
        location::Location,
        page::SerializedPage,
        status::{PageBufferClientStatus, SubClientState},
    },
};

/// Header carried in-band on a frame marking the end of this endpoint's
/// stream (spec §4.8 "the only the contract matters" collaborator made
/// concrete). Real deployments would read this from a transport-level
/// trailer; this crate's stand-in codec puts it in a response header
/// instead, since the wire codec itself is out of scope (spec §1).
const COMPLETE_HEADER: &str = "x-exchange-complete";

/// Frame header: 4-byte LE total length, 8-byte LE `size_in_bytes`, 8-byte
/// LE `retained_size_in_bytes`, followed by an opaque payload.
const FRAME_HEADER_LEN: usize = 4 + 8 + 8;

/// Concrete, runnable implementation of the `PageBufferSubClient` contract
/// (spec §4.8) over HTTP via `reqwest`, with a bounded exponential-backoff
/// retry loop between `min_error_duration` and `max_error_duration`.
///
/// Mirrors the teacher's `ClientConnection`: a hard-stop `CancellationToken`
/// cancels in-flight work immediately, and a `self_weak` handle (set once,
/// right after construction, exactly like `Pool::attach_self`) lets
/// `schedule_request` spawn a detached task that outlives the `&self` call.
#[derive(Debug)]
pub struct HttpPageBufferClient {
    http_client: reqwest::Client,
    max_response_size: u64,
    min_error_duration: Duration,
    max_error_duration: Duration,
    max_error_retries: u32,
    location: Location,
    callback: Weak<dyn SubClientCallback>,
    executor: tokio::runtime::Handle,
    cancel: CancellationToken,
    closed: AtomicBool,
    failure_count: AtomicU32,
    last_request_micros: AtomicU64,
    state: Mutex<SubClientState>,
    self_weak: OnceCell<Weak<HttpPageBufferClient>>,
}

impl HttpPageBufferClient {
    /// Builds a new sub-client and returns it already wrapped in the `Arc`
    /// required for `schedule_request` to spawn self-referential tasks.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http_client: reqwest::Client,
        max_response_size: u64,
        min_error_duration: Duration,
        max_error_duration: Duration,
        max_error_retries: u32,
        location: Location,
        callback: Weak<dyn SubClientCallback>,
        executor: tokio::runtime::Handle,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            http_client,
            max_response_size,
            min_error_duration,
            max_error_duration,
            max_error_retries,
            location,
            callback,
            executor,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            failure_count: AtomicU32::new(0),
            last_request_micros: AtomicU64::new(0),
            state: Mutex::new(SubClientState::Queued),
            self_weak: OnceCell::new(),
        });
        let _ = client.self_weak.set(Arc::downgrade(&client));
        client
    }

    fn set_state(&self, s: SubClientState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = s;
    }

    fn record_request_time(&self) {
        let micros = self
            .last_request_micros
            .load(Ordering::Relaxed)
            .wrapping_add(1);
        // Monotonic counter stand-in: an injected clock would be required to
        // report wall-clock timings without making tests flaky. What matters
        // for `status()` is "has this client ever issued a request", which
        // this preserves.
        self.last_request_micros.store(micros, Ordering::Relaxed);
    }

    async fn run_one_request(self: Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.set_state(SubClientState::Pending);
        self.record_request_time();

        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.fetch_once().await {
                Ok((pages, finished)) => {
                    self.failure_count.store(0, Ordering::Relaxed);
                    let Some(callback) = self.callback.upgrade() else {
                        return;
                    };
                    if !pages.is_empty() && !callback.add_pages(&self.location, pages) {
                        // Façade is closed/failed and dropped the batch;
                        // nothing left for this sub-client to do.
                        self.set_state(SubClientState::Completed);
                        return;
                    }
                    if finished {
                        self.set_state(SubClientState::Completed);
                        callback.client_finished(&self.location);
                    } else {
                        self.set_state(SubClientState::Queued);
                        callback.request_complete(&self.location);
                    }
                    return;
                }
                Err(err) => {
                    attempt += 1;
                    self.failure_count.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        location = %self.location,
                        attempt,
                        error = %err,
                        "sub-client request failed"
                    );
                    if attempt > self.max_error_retries {
                        self.set_state(SubClientState::Failed);
                        if let Some(callback) = self.callback.upgrade() {
                            callback.client_failed(&self.location, err);
                        }
                        return;
                    }
                    let backoff = self.backoff_for_attempt(attempt);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = sleep(backoff) => {}
                    }
                }
            }
        }
    }

    /// Jittered exponential backoff, floor-clamped to `min_error_duration`
    /// and ceiling-clamped to `max_error_duration`.
    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.min_error_duration.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
        let capped = base.min(self.max_error_duration.as_secs_f64());
        let jitter = rand::rng().random_range(0.75..=1.25);
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }

    async fn fetch_once(&self) -> Result<(Vec<SerializedPage>, bool)> {
        let response = self
            .http_client
            .get(self.location.as_str())
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.location))?;

        if !response.status().is_success() {
            bail!("{} returned status {}", self.location, response.status());
        }

        let finished = response
            .headers()
            .get(COMPLETE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let body = response
            .bytes()
            .await
            .with_context(|| format!("reading body from {} failed", self.location))?;

        if body.len() as u64 > self.max_response_size {
            bail!(
                "{} response of {} bytes exceeds max_response_size {}",
                self.location,
                body.len(),
                self.max_response_size
            );
        }

        let pages = decode_frames(body)?;
        debug!(location = %self.location, pages = pages.len(), finished, "fetch_once decoded");
        Ok((pages, finished))
    }
}

/// Decodes the stand-in length-prefixed frame format described in spec §2
/// item 8: `[u32 LE total_len][u64 LE size_in_bytes][u64 LE
/// retained_size_in_bytes][opaque payload]`, repeated until the buffer is
/// exhausted. The real page codec (compression, row encoding) is an
/// external collaborator and out of scope here (spec §1).
fn decode_frames(mut body: Bytes) -> Result<Vec<SerializedPage>> {
    let mut pages = Vec::new();
    while body.has_remaining() {
        if body.remaining() < FRAME_HEADER_LEN {
            bail!("truncated frame header: {} bytes left", body.remaining());
        }
        let total_len = body.get_u32_le() as usize;
        let size_in_bytes = body.get_u64_le();
        let retained_size_in_bytes = body.get_u64_le();
        let payload_len = total_len
            .checked_sub(FRAME_HEADER_LEN)
            .ok_or_else(|| anyhow!("frame length {total_len} shorter than its own header"))?;
        if body.remaining() < payload_len {
            bail!(
                "truncated frame payload: need {payload_len}, have {}",
                body.remaining()
            );
        }
        let payload = body.copy_to_bytes(payload_len);
        pages.push(SerializedPage::new(
            payload,
            size_in_bytes,
            retained_size_in_bytes,
        ));
    }
    Ok(pages)
}

impl PageBufferSubClient for HttpPageBufferClient {
    fn schedule_request(&self) {
        let Some(weak_self) = self.self_weak.get() else {
            return;
        };
        let Some(this) = weak_self.upgrade() else {
            return;
        };
        // Fire-and-forget: the façade mutex is held across this call (spec
        // §4.5), so nothing here may block or synchronously call back into
        // it. Spawning onto the injected executor satisfies both.
        self.executor.spawn(async move {
            this.run_one_request().await;
        });
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    fn status(&self) -> PageBufferClientStatus {
        let state = *self.state.lock().unwrap_or_else(|e| e.into_inner());
        let last = self.last_request_micros.load(Ordering::Relaxed);
        PageBufferClientStatus {
            location: self.location.clone(),
            state,
            last_request_micros: if last == 0 { None } else { Some(last) },
            failure_count: self.failure_count.load(Ordering::Relaxed),
        }
    }
}
