// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! No-op [`DisplayBackend`], [`VirtualDisplayDriver`], and
//! [`DisplayEventSource`] placeholders wired by `main.rs`. The real adapters
//! call into Windows's display-configuration API, the virtual-display
//! driver's control surface, and `WM_DEVICECHANGE`/`WM_WTSSESSION_CHANGE` —
//! OS integration out of this crate's scope (spec §1 "Explicitly out of
//! scope"). These stand in so the binary links and runs end-to-end, the same
//! role [`crate::restore_task::NoopRestoreTaskRegistrar`] plays for the
//! restore task.

use std::collections::BTreeSet;

use tracing::debug;

use crate::backend::{BoxFuture as BackendBoxFuture, DisplayBackend, VirtualDisplayDriver};
use crate::error::BackendApplyResult;
use crate::event_source::{BoxFuture as EventBoxFuture, DisplayEventSource};
use crate::message::DisplayEventKind;
use crate::model::{DeviceConfiguration, DeviceId, Point, Snapshot, Topology};

/// Reports every apply/verify step as succeeding against an empty topology.
/// Swap for a real Windows adapter once that OS integration exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDisplayBackend;

impl DisplayBackend for NoopDisplayBackend {
    fn apply(&self, _configuration: &DeviceConfiguration) -> BackendBoxFuture<'_, BackendApplyResult> {
        Box::pin(async { BackendApplyResult::Ok })
    }

    fn apply_topology(&self, _topology: &Topology) -> BackendBoxFuture<'_, BackendApplyResult> {
        Box::pin(async { BackendApplyResult::Ok })
    }

    fn current_topology(&self) -> BackendBoxFuture<'_, Topology> {
        Box::pin(async { Topology::default() })
    }

    fn is_topology_same(&self, _expected: &Topology) -> BackendBoxFuture<'_, bool> {
        Box::pin(async { true })
    }

    fn configuration_matches(&self, _configuration: &DeviceConfiguration) -> BackendBoxFuture<'_, bool> {
        Box::pin(async { true })
    }

    fn set_display_origin(&self, _device_id: &DeviceId, _point: Point) -> BackendBoxFuture<'_, bool> {
        Box::pin(async { true })
    }

    fn available_devices(&self) -> BackendBoxFuture<'_, BTreeSet<DeviceId>> {
        Box::pin(async { BTreeSet::new() })
    }

    fn validate_snapshot(&self, _snapshot: &Snapshot) -> BackendBoxFuture<'_, bool> {
        Box::pin(async { false })
    }

    fn apply_snapshot(&self, _snapshot: &Snapshot) -> BackendBoxFuture<'_, BackendApplyResult> {
        Box::pin(async { BackendApplyResult::HelperUnavailable })
    }

    fn snapshot_matches(&self, _snapshot: &Snapshot) -> BackendBoxFuture<'_, bool> {
        Box::pin(async { false })
    }

    fn capture_snapshot(&self) -> BackendBoxFuture<'_, Snapshot> {
        Box::pin(async { Snapshot::default() })
    }

    fn refresh_shell(&self) -> BackendBoxFuture<'_, ()> {
        Box::pin(async {
            debug!("refresh_shell requested (no-op backend)");
        })
    }

    fn hdr_blank(&self, _device_id: &DeviceId) -> BackendBoxFuture<'_, ()> {
        Box::pin(async {
            debug!("hdr_blank requested (no-op backend)");
        })
    }
}

/// Reports the virtual display as permanently absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVirtualDisplayDriver;

impl VirtualDisplayDriver for NoopVirtualDisplayDriver {
    fn disable(&self) -> BackendBoxFuture<'_, bool> {
        Box::pin(async { true })
    }

    fn enable(&self) -> BackendBoxFuture<'_, bool> {
        Box::pin(async { false })
    }

    fn current_device_id(&self) -> BackendBoxFuture<'_, Option<DeviceId>> {
        Box::pin(async { None })
    }
}

/// Never yields an event; [`crate::event_source::EventSourceAdapter::run`]
/// exits the moment it is polled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDisplayEventSource;

impl DisplayEventSource for NoopDisplayEventSource {
    fn next_event(&mut self) -> EventBoxFuture<'_, Option<DisplayEventKind>> {
        Box::pin(async { None })
    }
}

#[cfg(test)]
#[path = "platform_tests.rs"]
mod tests;
