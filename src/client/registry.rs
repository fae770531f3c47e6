// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use crate::{client::sub_client::PageBufferSubClient, models::location::Location};

/// Maps endpoint identity to sub-client handle; tracks `queued` (ready to
/// dispatch), `pending` (in flight), `completed` (terminally done) disjoint
/// sets (spec §4.3).
///
/// Deliberately holds no lock of its own: every operation is called with the
/// façade's mutex already held (spec §9 "single coarse mutex... plus the
/// registry").
#[derive(Debug, Default)]
pub struct SubClientRegistry {
    registered: HashMap<Location, Arc<dyn PageBufferSubClient>>,
    queued: VecDeque<Location>,
    pending: HashSet<Location>,
    completed: HashSet<Location>,
}

impl SubClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts into `registered` and `queued`. No-op if already present
    /// (duplicate adds are silently ignored, spec §3).
    pub fn add(&mut self, location: Location, client: Arc<dyn PageBufferSubClient>) -> bool {
        if self.registered.contains_key(&location) {
            return false;
        }
        self.registered.insert(location.clone(), client);
        self.queued.push_back(location);
        true
    }

    /// Pops one sub-client from `queued`, if any, without changing its
    /// tracked state — callers must follow up with `mark_pending`.
    pub fn pop_queued(&mut self) -> Option<(Location, Arc<dyn PageBufferSubClient>)> {
        let location = self.queued.pop_front()?;
        let client = self.registered.get(&location)?.clone();
        Some((location, client))
    }

    pub fn mark_pending(&mut self, location: &Location) {
        self.pending.insert(location.clone());
    }

    /// `Pending -> Queued`: the client is ready for another request.
    pub fn mark_queued(&mut self, location: &Location) {
        self.pending.remove(location);
        self.completed.remove(location);
        if self.registered.contains_key(location) {
            self.queued.push_back(location.clone());
        }
    }

    /// `Pending -> Completed`: the endpoint produced its last page.
    pub fn mark_completed(&mut self, location: &Location) {
        self.pending.remove(location);
        self.completed.insert(location.clone());
    }

    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// `pending_count() = |registered| - |queued| - |completed|` (spec
    /// §4.3), computed from the authoritative disjoint-set sizes rather than
    /// the separately tracked `pending` set, which exists only so
    /// `mark_queued`/`mark_completed` can assert the prior state.
    pub fn pending_count(&self) -> usize {
        self.registered
            .len()
            .saturating_sub(self.queued.len())
            .saturating_sub(self.completed.len())
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.registered.contains_key(location)
    }

    pub fn get(&self, location: &Location) -> Option<Arc<dyn PageBufferSubClient>> {
        self.registered.get(location).cloned()
    }

    pub fn all_clients(&self) -> impl Iterator<Item = &Arc<dyn PageBufferSubClient>> {
        self.registered.values()
    }
}
