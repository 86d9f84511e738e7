// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pluggable snapshot storage back-ends (spec §4.5): a JSON-file store under
//! the app-data directory, and an in-memory store for tests. Mirrors the
//! teacher's `event_log::EventLog` style of best-effort, sync `std::fs`
//! calls with `let Ok(..) = .. else { return .. }` short-circuiting rather
//! than propagating I/O errors up as a hard failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::model::{Snapshot, SnapshotTier};

/// Storage for the three snapshot tiers. A torn or malformed file is
/// treated as absent, never as an error (spec §6 "a torn file must be
/// rejected by the loader").
pub trait SnapshotStore: Send + Sync + 'static {
    fn read(&self, tier: SnapshotTier) -> Option<Snapshot>;

    /// Returns `false` if the write could not be completed.
    fn write(&self, tier: SnapshotTier, snapshot: &Snapshot) -> bool;

    fn delete(&self, tier: SnapshotTier);
}

fn tier_file_name(tier: SnapshotTier) -> &'static str {
    match tier {
        SnapshotTier::Current => "current.json",
        SnapshotTier::Previous => "previous.json",
        SnapshotTier::Golden => "golden.json",
    }
}

/// JSON-file-backed store under the helper's app-data directory (spec §6
/// "Persistent state layout").
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let _ = std::fs::create_dir_all(&dir);
        Self { dir }
    }

    fn path_for(&self, tier: SnapshotTier) -> PathBuf {
        self.dir.join(tier_file_name(tier))
    }
}

impl SnapshotStore for FileStore {
    fn read(&self, tier: SnapshotTier) -> Option<Snapshot> {
        let path = self.path_for(tier);
        let contents = std::fs::read_to_string(&path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    fn write(&self, tier: SnapshotTier, snapshot: &Snapshot) -> bool {
        let Ok(serialized) = serde_json::to_string(snapshot) else {
            return false;
        };
        std::fs::write(self.path_for(tier), serialized).is_ok()
    }

    fn delete(&self, tier: SnapshotTier) {
        let _ = std::fs::remove_file(self.path_for(tier));
    }
}

/// In-memory store for tests; never touches the filesystem.
#[derive(Default)]
pub struct MemStore {
    slots: Mutex<HashMap<SnapshotTier, Snapshot>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemStore {
    fn read(&self, tier: SnapshotTier) -> Option<Snapshot> {
        self.slots.lock().ok()?.get(&tier).cloned()
    }

    fn write(&self, tier: SnapshotTier, snapshot: &Snapshot) -> bool {
        let Ok(mut slots) = self.slots.lock() else {
            return false;
        };
        slots.insert(tier, snapshot.clone());
        true
    }

    fn delete(&self, tier: SnapshotTier) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.remove(&tier);
        }
    }
}

/// Helper for tests that want a `FileStore` rooted in a scratch directory.
pub fn file_store_in(dir: &Path) -> FileStore {
    FileStore::new(dir)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
