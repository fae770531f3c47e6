// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde::Serialize;

use crate::{cfg::enums::BufferPressure, models::location::Location};

/// Lifecycle state of one sub-client, as tracked by the
/// [`crate::client::registry::SubClientRegistry`] (spec §3 SubClient state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubClientState {
    /// Registered, idle, eligible to be dispatched.
    Queued,
    /// In-flight HTTP request outstanding.
    Pending,
    /// Producer reported end-of-stream for this endpoint.
    Completed,
    /// The endpoint (or the whole client) has failed.
    Failed,
}

/// Snapshot of one sub-client's state, returned by `PageBufferSubClient::status`.
#[derive(Debug, Clone, Serialize)]
pub struct PageBufferClientStatus {
    pub location: Location,
    pub state: SubClientState,
    /// Microseconds since the last request was scheduled, if any.
    pub last_request_micros: Option<u64>,
    /// Count of failed attempts before either success or escalation.
    pub failure_count: u32,
}

/// Status report for the façade (spec §6 Status report).
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeClientStatus {
    pub buffer_bytes: u64,
    pub average_bytes_per_request: u64,
    /// Buffered-page count, excluding the sentinel.
    pub buffered_pages: usize,
    pub no_more_locations: bool,
    pub pressure: BufferPressure,
    pub per_client: Vec<PageBufferClientStatus>,
}
