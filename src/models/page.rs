// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;

/// Opaque serialized batch of rows; the unit of transfer and buffering.
///
/// `size_in_bytes` is the on-the-wire (compressed) size, used only for the
/// scheduler's running-mean response size. `retained_size_in_bytes` is the
/// in-memory footprint once decoded, used for memory accounting and the
/// buffer-headroom calculation. The two may differ (e.g. compressed pages);
/// neither implies anything about `payload.len()`, which is opaque to this
/// crate (the page codec is an external collaborator).
#[derive(Debug, Clone)]
pub struct SerializedPage {
    pub payload: Bytes,
    pub size_in_bytes: u64,
    pub retained_size_in_bytes: u64,
}

impl SerializedPage {
    pub fn new(payload: Bytes, size_in_bytes: u64, retained_size_in_bytes: u64) -> Self {
        Self {
            payload,
            size_in_bytes,
            retained_size_in_bytes,
        }
    }

    /// Reserved sentinel marking end-of-stream inside the queue: empty
    /// payload, zero sizes.
    pub fn no_more_pages() -> Self {
        Self {
            payload: Bytes::new(),
            size_in_bytes: 0,
            retained_size_in_bytes: 0,
        }
    }

    /// True for the reserved end-of-stream sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.payload.is_empty() && self.size_in_bytes == 0 && self.retained_size_in_bytes == 0
    }
}
