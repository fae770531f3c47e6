// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tokio::sync::oneshot;

/// One-shot completion signal handed out by `is_blocked()`. Never carries a
/// value beyond "you may proceed"; awaiting it resolves once a page arrives,
/// the client closes, or it fails.
pub type BlockedSignal = oneshot::Receiver<()>;

/// Set of one-shot completion signals used to wake consumers waiting for
/// data or termination (spec §4.4).
///
/// Holds no lock of its own — like [`crate::client::registry::SubClientRegistry`],
/// every operation runs with the façade's mutex already held.
#[derive(Debug, Default)]
pub struct BlockedCallers {
    waiters: Vec<oneshot::Sender<()>>,
}

impl BlockedCallers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a new signal, owned by the recipient once fired.
    pub fn register(&mut self) -> BlockedSignal {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    /// An already-completed signal, for the fast path where `is_blocked()`
    /// observes a page/close/failure without needing to wait.
    pub fn already_fired() -> BlockedSignal {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        rx
    }

    /// Drains the list and completes each signal exactly once.
    pub fn notify_all(&mut self) {
        for tx in self.waiters.drain(..) {
            let _ = tx.send(());
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_signal_completes_on_notify_all() {
        let mut callers = BlockedCallers::new();
        let signal = callers.register();
        assert_eq!(callers.pending_len(), 1);

        callers.notify_all();
        assert_eq!(callers.pending_len(), 0);
        assert!(signal.await.is_ok());
    }

    #[tokio::test]
    async fn already_fired_signal_resolves_immediately() {
        let signal = BlockedCallers::already_fired();
        assert!(signal.await.is_ok());
    }
}
