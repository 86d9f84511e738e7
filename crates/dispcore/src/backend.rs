// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External collaborators the dispatcher calls into but this crate does not
//! implement: the OS display backend, the virtual-display driver, and the
//! scheduled-task restore registrar (spec §1 "Explicitly out of scope").
//!
//! Mirrors the teacher's `pty::Backend` shape: object-safe traits returning
//! a pinned boxed future rather than `async fn`, so they can be held as
//! `Box<dyn ...>` behind the dispatcher.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use crate::error::BackendApplyResult;
use crate::model::{DeviceConfiguration, DeviceId, Point, Snapshot, Topology};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The OS-specific display device backend (spec §1): enumerate devices,
/// apply mode sets, query topology, blank HDR, refresh the shell.
///
/// Object-safe for use as `Box<dyn DisplayBackend>` inside the dispatcher.
pub trait DisplayBackend: Send + Sync + 'static {
    /// Apply one device's desired mode/HDR/prep (spec §4.4 Apply step 7).
    fn apply(&self, configuration: &DeviceConfiguration) -> BoxFuture<'_, BackendApplyResult>;

    /// Apply a requested topology (spec §4.4 Apply step 6).
    fn apply_topology(&self, topology: &Topology) -> BoxFuture<'_, BackendApplyResult>;

    /// The topology currently in effect, used to compute `expected_topology`
    /// when the request did not supply one (spec §4.4 Apply step 5).
    fn current_topology(&self) -> BoxFuture<'_, Topology>;

    /// Does the live topology match `expected`? (spec §4.4 Verify step 2).
    fn is_topology_same(&self, expected: &Topology) -> BoxFuture<'_, bool>;

    /// Does the live device state match the requested configuration's
    /// resolution, refresh rate, and HDR state? (spec §4.4 Verify step 3).
    fn configuration_matches(&self, configuration: &DeviceConfiguration) -> BoxFuture<'_, bool>;

    /// Place one display at `point` on the virtual desktop. Individual
    /// failures are swallowed by the caller (spec §4.4 Apply step 8).
    fn set_display_origin(&self, device_id: &DeviceId, point: Point) -> BoxFuture<'_, bool>;

    /// Every device ID currently physically present (spec §4.4 Recover
    /// step 1, and the ledger's "available devices" load precondition).
    fn available_devices(&self) -> BoxFuture<'_, BTreeSet<DeviceId>>;

    /// Validate a candidate recovery snapshot against the live OS topology
    /// before attempting to apply it (spec §4.4 Recover step 4).
    fn validate_snapshot(&self, snapshot: &Snapshot) -> BoxFuture<'_, bool>;

    /// Apply a full recovery snapshot (spec §4.4 Recover step 5).
    fn apply_snapshot(&self, snapshot: &Snapshot) -> BoxFuture<'_, BackendApplyResult>;

    /// Does the live OS state now match `snapshot`? Used both by Recover's
    /// post-apply check and by RecoverValidate (spec §4.4 Recover step 5,
    /// RecoverValidate).
    fn snapshot_matches(&self, snapshot: &Snapshot) -> BoxFuture<'_, bool>;

    /// Capture the current OS display state (spec §4.5 `capture`).
    fn capture_snapshot(&self) -> BoxFuture<'_, Snapshot>;

    /// Force the compositor to rebuild pipelines after a verified apply
    /// (spec §4.3 `VerifCompleted(ok)` side effect).
    fn refresh_shell(&self) -> BoxFuture<'_, ()>;

    /// Briefly toggle HDR to force a pipeline rebuild (spec §3 `hdr_blank`,
    /// GLOSSARY "HDR blank").
    fn hdr_blank(&self, device_id: &DeviceId) -> BoxFuture<'_, ()>;
}

/// The virtual-display driver (spec §1): open/close and device-id
/// discovery. `device_id` may change across an enable/disable cycle, which
/// is why `VirtualDisplayMonitoring` retargets the request (spec §4.3).
pub trait VirtualDisplayDriver: Send + Sync + 'static {
    fn disable(&self) -> BoxFuture<'_, bool>;

    fn enable(&self) -> BoxFuture<'_, bool>;

    /// The device_id the driver currently reports, or `None` if it has not
    /// yet resolved one.
    fn current_device_id(&self) -> BoxFuture<'_, Option<DeviceId>>;
}

/// Scheduled-task / auto-restore registration (spec §1, GLOSSARY "Restore
/// task"): installed on Apply, removed on Disarm or successful recovery
/// validation.
pub trait RestoreTaskRegistrar: Send + Sync + 'static {
    fn install(&self) -> BoxFuture<'_, ()>;

    fn remove(&self) -> BoxFuture<'_, ()>;
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
