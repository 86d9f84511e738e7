// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::backend::DisplayBackend;
use crate::model::{DeviceId, Snapshot, SnapshotTier};

use super::store::SnapshotStore;

/// Composes a [`SnapshotStore`] with the blacklist-filtering and
/// availability rules of spec §4.5.
pub struct SnapshotLedger {
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotLedger {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Snapshot the live OS state via the backend (spec §4.5 `capture`).
    pub async fn capture(&self, backend: &dyn DisplayBackend) -> Snapshot {
        backend.capture_snapshot().await
    }

    /// Prune `blacklist` from all four fields; reject (return `false`)
    /// without persisting if both `topology` and `modes` end up empty
    /// (spec §4.5 `save`).
    pub fn save(&self, tier: SnapshotTier, mut snapshot: Snapshot, blacklist: &BTreeSet<DeviceId>) -> bool {
        snapshot.filter_blacklist(blacklist);
        if snapshot.is_empty() {
            return false;
        }
        self.store.write(tier, &snapshot)
    }

    /// Read `tier`; return `None` if absent, malformed, or if it references
    /// a device not in `available_devices` (spec §4.5 `load`).
    pub fn load(&self, tier: SnapshotTier, available_devices: &BTreeSet<DeviceId>) -> Option<Snapshot> {
        let snapshot = self.store.read(tier)?;
        if snapshot.devices().is_subset(available_devices) {
            Some(snapshot)
        } else {
            None
        }
    }

    /// Copy Current into Previous. Absence of Current is not an error;
    /// returns `false` (spec §4.5 `rotate_current_to_previous`).
    pub fn rotate_current_to_previous(&self) -> bool {
        match self.store.read(SnapshotTier::Current) {
            Some(current) => self.store.write(SnapshotTier::Previous, &current),
            None => false,
        }
    }

    pub fn delete(&self, tier: SnapshotTier) {
        self.store.delete(tier);
    }

    /// Tier search order for Recover (spec §4.4 Recover step 2, §4.5
    /// `recovery_order`).
    pub fn recovery_order(prefer_golden_first: bool) -> [SnapshotTier; 3] {
        if prefer_golden_first {
            [SnapshotTier::Golden, SnapshotTier::Current, SnapshotTier::Previous]
        } else {
            [SnapshotTier::Current, SnapshotTier::Previous, SnapshotTier::Golden]
        }
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
