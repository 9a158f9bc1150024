//! The sync ledger: what has been received and what has been reported.
//!
//! Three pieces of state, all owned by one [`SyncLedger`]:
//!
//! - **Item cursor**: the absolute index of the next item the server will
//!   grant us. Items are applied strictly in index order; anything below
//!   the cursor is a redelivery and is skipped.
//! - **Checked set**: every location this client has reported or the
//!   server has confirmed. An id in the set is never reported again.
//! - **Pending checks**: ids produced locally that have not been sent
//!   yet, in the order they were reported.
//!
//! Reports are optimistic: an id joins the checked set as soon as it is
//! queued, before the server has seen it. The only correction mechanism
//! is [`SyncLedger::seed_from_server`], which runs on every successful
//! authentication and hands back the ids the server doesn't know about.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tether_protocol::LocationId;

/// Item cursor, checked-location set and pending outbound checks.
#[derive(Debug, Clone, Default)]
pub struct SyncLedger {
    next_item_index: u64,
    checked: BTreeSet<LocationId>,
    pending: Vec<LocationId>,
}

/// A persistable copy of the ledger.
///
/// Hosts may save this between runs to save resync traffic. Restoring it
/// is never required for correctness: the server is authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub next_item_index: u64,
    pub checked_locations: Vec<LocationId>,
}

impl SyncLedger {
    // -- Item cursor ------------------------------------------------------

    /// Index of the next item to apply.
    pub fn next_item_index(&self) -> u64 {
        self.next_item_index
    }

    /// Whether the item at `index` has already been applied.
    pub fn is_stale(&self, index: u64) -> bool {
        index < self.next_item_index
    }

    /// Moves the cursor past `index`. Never moves it backwards.
    pub fn advance_past(&mut self, index: u64) {
        if index >= self.next_item_index {
            self.next_item_index = index + 1;
        }
    }

    // -- Location checks --------------------------------------------------

    /// Marks `ids` checked and queues the new ones for sending.
    ///
    /// Returns how many ids were new. Ids already in the checked set are
    /// ignored, including duplicates within `ids`.
    pub fn queue_checks(&mut self, ids: impl IntoIterator<Item = LocationId>) -> usize {
        let mut queued = 0;
        for id in ids {
            if self.checked.insert(id) {
                self.pending.push(id);
                queued += 1;
            }
        }
        queued
    }

    /// Ids waiting to be sent, oldest first.
    pub fn pending(&self) -> &[LocationId] {
        &self.pending
    }

    /// Empties the pending queue and returns its contents.
    pub fn take_pending(&mut self) -> Vec<LocationId> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_checked(&self, id: LocationId) -> bool {
        self.checked.contains(&id)
    }

    /// All checked ids in ascending order.
    pub fn checked(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.checked.iter().copied()
    }

    pub fn checked_count(&self) -> usize {
        self.checked.len()
    }

    /// Merges ids the server reports as checked.
    ///
    /// A confirmed id no longer needs sending, so it leaves the pending
    /// queue as well.
    pub fn merge_confirmed(&mut self, ids: &[LocationId]) {
        self.checked.extend(ids.iter().copied());
        if !self.pending.is_empty() {
            let confirmed: BTreeSet<_> = ids.iter().copied().collect();
            self.pending.retain(|id| !confirmed.contains(id));
        }
    }

    /// Reconciles with the server's checked list after authentication.
    ///
    /// The server's ids join the set. Returns every local id the server
    /// did not report, ascending: the pending queue plus optimistic sends
    /// that never arrived. The pending queue is cleared; the caller is
    /// expected to send the returned ids in one batch.
    pub fn seed_from_server(&mut self, server_checked: &[LocationId]) -> Vec<LocationId> {
        let server: BTreeSet<_> = server_checked.iter().copied().collect();
        let unconfirmed: Vec<_> = self.checked.difference(&server).copied().collect();

        self.checked.extend(server);
        self.pending.clear();

        tracing::debug!(
            checked = self.checked.len(),
            unconfirmed = unconfirmed.len(),
            "ledger seeded from server"
        );
        unconfirmed
    }

    // -- Persistence ------------------------------------------------------

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            next_item_index: self.next_item_index,
            checked_locations: self.checked.iter().copied().collect(),
        }
    }

    /// Merges a saved snapshot into this ledger.
    ///
    /// The cursor only moves forward and the checked set only grows, so
    /// restoring an old snapshot can't make the client re-apply items.
    /// Restored ids are treated as already sent; the next authentication
    /// re-sends any the server doesn't know.
    pub fn restore(&mut self, snapshot: &SyncSnapshot) {
        self.next_item_index = self.next_item_index.max(snapshot.next_item_index);
        self.checked
            .extend(snapshot.checked_locations.iter().copied());
    }
}

// =========================================================================
// Tests
// =========================================================================
