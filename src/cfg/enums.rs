// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Backpressure posture reported in `ExchangeClientStatus` for human/metrics
/// consumption; purely informational, derived from `buffer_bytes` vs.
/// `max_buffered_bytes` at snapshot time.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPressure {
    #[serde(rename = "Low")]
    Low,
    #[serde(rename = "High")]
    High,
    #[serde(rename = "Full")]
    Full,
}

impl fmt::Display for BufferPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BufferPressure::Low => "Low",
            BufferPressure::High => "High",
            BufferPressure::Full => "Full",
        })
    }
}

impl BufferPressure {
    pub fn classify(buffer_bytes: u64, max_buffered_bytes: u64) -> Self {
        if max_buffered_bytes == 0 || buffer_bytes >= max_buffered_bytes {
            return BufferPressure::Full;
        }
        if buffer_bytes * 2 >= max_buffered_bytes {
            return BufferPressure::High;
        }
        BufferPressure::Low
    }
}
