// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use thiserror::Error;

use crate::models::location::Location;

/// Errors surfaced by the exchange client (spec §7).
///
/// `Transport` and `StateViolation` are terminal for the client instance:
/// once installed into the façade's `failure` cell they are returned by
/// every subsequent poll/status call. `Usage` surfaces synchronously at the
/// call site and never touches the failure cell.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// Propagated from a sub-client's escalation (`client_failed`); wraps the
    /// underlying cause. First one wins — see `ExchangeClientInner::fail`.
    #[error("transport error from {location}: {source}")]
    Transport {
        location: Location,
        source: Arc<anyhow::Error>,
    },

    /// Programming error such as `add_location` after `no_more_locations`.
    /// Surfaces at the caller; does not poison the client.
    #[error("usage error: {0}")]
    Usage(String),

    /// Defensive assertion, e.g. polling while holding the façade mutex.
    #[error("state violation: {0}")]
    StateViolation(String),
}

impl ExchangeError {
    pub fn transport(location: Location, source: anyhow::Error) -> Self {
        ExchangeError::Transport {
            location,
            source: Arc::new(source),
        }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        ExchangeError::Usage(msg.into())
    }

    pub fn state_violation(msg: impl Into<String>) -> Self {
        ExchangeError::StateViolation(msg.into())
    }

    /// Whether this error, once observed, poisons the client (terminal) or
    /// is a one-off usage mistake the caller can recover from.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExchangeError::Usage(_))
    }
}
