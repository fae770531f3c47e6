// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt::Debug;

use crate::models::{location::Location, page::SerializedPage, status::PageBufferClientStatus};

/// Required sub-client contract (spec §6): one instance per remote endpoint,
/// driving the four [`SubClientCallback`] methods on the parent. Not
/// implemented here in full generality — the HTTP transport and page codec
/// are external collaborators; only this contract matters to the façade. See
/// [`crate::client::http_sub_client::HttpPageBufferClient`] for a concrete
/// implementation.
pub trait PageBufferSubClient: Send + Sync + Debug {
    /// Kicks off one more request for this endpoint. Must be non-blocking —
    /// the sub-client owns its own async work and must not synchronously
    /// re-enter the façade (spec §4.5, §9).
    fn schedule_request(&self);

    /// Closes the sub-client; idempotent.
    fn close(&self);

    /// Snapshot of this sub-client's state for `ExchangeClient::status()`.
    fn status(&self) -> PageBufferClientStatus;
}

/// Callback surface the façade exposes to each sub-client (spec §4.6).
pub trait SubClientCallback: Send + Sync {
    /// Accept-and-enqueue a batch of pages. Returns `false` if the façade is
    /// closed/failed, in which case the sub-client must drop the batch.
    fn add_pages(&self, location: &Location, pages: Vec<SerializedPage>) -> bool;

    /// The sub-client is ready for another request (`Pending -> Queued`).
    fn request_complete(&self, location: &Location);

    /// The endpoint produced its last page (`Pending -> Completed`).
    fn client_finished(&self, location: &Location);

    /// The sub-client has exhausted its retry envelope and is escalating.
    /// Records the first failure atomically; does not transition to closed.
    fn client_failed(&self, location: &Location, cause: anyhow::Error);
}
