// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted fakes shared across test modules for the external collaborators
//! (spec §1): a configurable [`DisplayBackend`], [`VirtualDisplayDriver`],
//! and [`RestoreTaskRegistrar`]. Every method defaults to the "everything
//! is fine" answer; tests override just the queue or flag they care about.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::backend::{BoxFuture, DisplayBackend, RestoreTaskRegistrar, VirtualDisplayDriver};
use crate::error::BackendApplyResult;
use crate::model::{DeviceConfiguration, DeviceId, Point, Snapshot, Topology};

pub struct ScriptedBackend {
    pub apply_results: Mutex<VecDeque<BackendApplyResult>>,
    pub apply_topology_results: Mutex<VecDeque<BackendApplyResult>>,
    pub current_topology: Mutex<Topology>,
    pub topology_same: AtomicBool,
    pub configuration_matches: AtomicBool,
    pub set_origin_ok: AtomicBool,
    pub available_devices: Mutex<BTreeSet<DeviceId>>,
    pub validate_snapshot_ok: AtomicBool,
    pub apply_snapshot_results: Mutex<VecDeque<BackendApplyResult>>,
    pub snapshot_matches_ok: AtomicBool,
    pub capture_snapshot: Mutex<Snapshot>,
    pub apply_calls: AtomicUsize,
    pub apply_topology_calls: AtomicUsize,
    pub refresh_shell_calls: AtomicUsize,
    pub hdr_blank_calls: AtomicUsize,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            apply_results: Mutex::new(VecDeque::new()),
            apply_topology_results: Mutex::new(VecDeque::new()),
            current_topology: Mutex::new(Vec::new()),
            topology_same: AtomicBool::new(true),
            configuration_matches: AtomicBool::new(true),
            set_origin_ok: AtomicBool::new(true),
            available_devices: Mutex::new(BTreeSet::new()),
            validate_snapshot_ok: AtomicBool::new(true),
            apply_snapshot_results: Mutex::new(VecDeque::new()),
            snapshot_matches_ok: AtomicBool::new(true),
            capture_snapshot: Mutex::new(Snapshot::default()),
            apply_calls: AtomicUsize::new(0),
            apply_topology_calls: AtomicUsize::new(0),
            refresh_shell_calls: AtomicUsize::new(0),
            hdr_blank_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedBackend {
    pub fn with_apply_results(results: impl IntoIterator<Item = BackendApplyResult>) -> Self {
        Self { apply_results: Mutex::new(results.into_iter().collect()), ..Self::default() }
    }

    fn pop_or(queue: &Mutex<VecDeque<BackendApplyResult>>, default: BackendApplyResult) -> BackendApplyResult {
        queue.lock().expect("lock").pop_front().unwrap_or(default)
    }
}

impl DisplayBackend for ScriptedBackend {
    fn apply(&self, _configuration: &DeviceConfiguration) -> BoxFuture<'_, BackendApplyResult> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Self::pop_or(&self.apply_results, BackendApplyResult::Ok) })
    }

    fn apply_topology(&self, _topology: &Topology) -> BoxFuture<'_, BackendApplyResult> {
        self.apply_topology_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Self::pop_or(&self.apply_topology_results, BackendApplyResult::Ok) })
    }

    fn current_topology(&self) -> BoxFuture<'_, Topology> {
        Box::pin(async { self.current_topology.lock().expect("lock").clone() })
    }

    fn is_topology_same(&self, _expected: &Topology) -> BoxFuture<'_, bool> {
        Box::pin(async { self.topology_same.load(Ordering::SeqCst) })
    }

    fn configuration_matches(&self, _configuration: &DeviceConfiguration) -> BoxFuture<'_, bool> {
        Box::pin(async { self.configuration_matches.load(Ordering::SeqCst) })
    }

    fn set_display_origin(&self, _device_id: &DeviceId, _point: Point) -> BoxFuture<'_, bool> {
        Box::pin(async { self.set_origin_ok.load(Ordering::SeqCst) })
    }

    fn available_devices(&self) -> BoxFuture<'_, BTreeSet<DeviceId>> {
        Box::pin(async { self.available_devices.lock().expect("lock").clone() })
    }

    fn validate_snapshot(&self, _snapshot: &Snapshot) -> BoxFuture<'_, bool> {
        Box::pin(async { self.validate_snapshot_ok.load(Ordering::SeqCst) })
    }

    fn apply_snapshot(&self, _snapshot: &Snapshot) -> BoxFuture<'_, BackendApplyResult> {
        Box::pin(async { Self::pop_or(&self.apply_snapshot_results, BackendApplyResult::Ok) })
    }

    fn snapshot_matches(&self, _snapshot: &Snapshot) -> BoxFuture<'_, bool> {
        Box::pin(async { self.snapshot_matches_ok.load(Ordering::SeqCst) })
    }

    fn capture_snapshot(&self) -> BoxFuture<'_, Snapshot> {
        Box::pin(async { self.capture_snapshot.lock().expect("lock").clone() })
    }

    fn refresh_shell(&self) -> BoxFuture<'_, ()> {
        self.refresh_shell_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }

    fn hdr_blank(&self, _device_id: &DeviceId) -> BoxFuture<'_, ()> {
        self.hdr_blank_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}

pub struct ScriptedVirtualDisplayDriver {
    pub disable_ok: AtomicBool,
    pub enable_ok: AtomicBool,
    pub device_id: Mutex<Option<DeviceId>>,
}

impl Default for ScriptedVirtualDisplayDriver {
    fn default() -> Self {
        Self {
            disable_ok: AtomicBool::new(true),
            enable_ok: AtomicBool::new(true),
            device_id: Mutex::new(None),
        }
    }
}

impl VirtualDisplayDriver for ScriptedVirtualDisplayDriver {
    fn disable(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { self.disable_ok.load(Ordering::SeqCst) })
    }

    fn enable(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { self.enable_ok.load(Ordering::SeqCst) })
    }

    fn current_device_id(&self) -> BoxFuture<'_, Option<DeviceId>> {
        Box::pin(async { self.device_id.lock().expect("lock").clone() })
    }
}

#[derive(Default)]
pub struct ScriptedRestoreTaskRegistrar {
    pub install_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
}

impl RestoreTaskRegistrar for ScriptedRestoreTaskRegistrar {
    fn install(&self) -> BoxFuture<'_, ()> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }

    fn remove(&self) -> BoxFuture<'_, ()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}
