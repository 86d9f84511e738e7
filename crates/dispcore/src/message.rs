// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generation counter, cancellation, and the closed message sum that flows
//! through the state machine's mailbox (spec §3 `generation`, §5
//! "Cancellation", §9 "Message variant").
//!
//! The fourteen message kinds are a closed enum rather than a trait object:
//! keeping every variant in one tagged union means the staleness check in
//! [`crate::session::run`] has exactly one match arm to maintain.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::OperationStatus;
use crate::model::{ApplyRequest, DeviceId, Topology};

/// Monotonically increasing session counter (spec §3 `generation`). Bumped
/// only by [`CancellationSource::cancel`].
pub type Generation = u64;

/// Owns the shared generation counter. The state machine holds the single
/// `CancellationSource`; every other component only ever sees a
/// [`CancellationToken`] captured from it.
#[derive(Debug, Clone)]
pub struct CancellationSource {
    generation: Arc<AtomicU64>,
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSource {
    pub fn new() -> Self {
        Self { generation: Arc::new(AtomicU64::new(0)) }
    }

    /// Current generation, to stamp a freshly parsed or emitted message.
    pub fn current(&self) -> Generation {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate all outstanding work: bump the counter and return the new
    /// value. Called on `Revert`, `Disarm`, and virtual-display event-driven
    /// restart (spec §4.3).
    pub fn cancel(&self) -> Generation {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// A token good for one dispatch, capturing the generation at the
    /// moment of dispatch.
    pub fn token(&self) -> CancellationToken {
        CancellationToken { generation: Arc::clone(&self.generation), expected: self.current() }
    }
}

/// Captures the generation expected by one in-flight operation.
/// `is_cancelled()` is true iff the live counter has since moved past it.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    generation: Arc<AtomicU64>,
    expected: Generation,
}

impl CancellationToken {
    pub fn expected(&self) -> Generation {
        self.expected
    }

    pub fn is_cancelled(&self) -> bool {
        self.generation.load(Ordering::Acquire) != self.expected
    }
}

/// Exclude-set payload shared by `ExportGolden` and `SnapshotCurrent`
/// (spec §6 `{exclude_devices: [id,...]}`).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExcludeDevices {
    #[serde(default)]
    pub exclude_devices: Vec<DeviceId>,
}

impl ExcludeDevices {
    pub fn blacklist(&self) -> BTreeSet<DeviceId> {
        self.exclude_devices.iter().cloned().collect()
    }
}

/// Outcome of one Apply attempt (spec §4.4 "Apply").
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub status: OperationStatus,
    pub expected_topology: Option<Topology>,
    pub virtual_display_requested: bool,
}

/// Outcome of one Recover attempt (spec §4.4 "Recover").
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub snapshot: Option<crate::model::Snapshot>,
}

/// Kind of display signal observed by the event source adapter (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEventKind {
    ModeChange,
    DeviceArrival,
    DeviceRemoval,
    PowerResume,
}

/// Every message the state machine's mailbox can receive. Commands come
/// from the router (C2), completions from the dispatcher (C4), and
/// `DisplayEvent`/`HeartbeatTimeout` from the watchdogs (C6/C7). All
/// fourteen kinds carry the generation they were stamped with at emission
/// time (spec §9).
#[derive(Debug, Clone)]
pub enum Message {
    Apply { generation: Generation, request: ApplyRequest },
    Revert { generation: Generation },
    Disarm { generation: Generation },
    ExportGolden { generation: Generation, exclude: ExcludeDevices },
    SnapshotCurrent { generation: Generation, exclude: ExcludeDevices },
    /// Deprecated wire slot `0x03` (spec §4.2, §6): parsed but always a
    /// complete no-op in the state machine.
    Reset { generation: Generation },
    Ping { generation: Generation },
    Stop { generation: Generation },

    ApplyCompleted { generation: Generation, outcome: ApplyOutcome },
    VerifCompleted { generation: Generation, ok: bool },
    RecoverCompleted { generation: Generation, outcome: RecoveryOutcome },
    RecoverValidCompleted { generation: Generation, ok: bool },

    DisplayEvent { generation: Generation, kind: DisplayEventKind },
    HeartbeatTimeout { generation: Generation },
}

impl Message {
    pub fn generation(&self) -> Generation {
        match self {
            Message::Apply { generation, .. }
            | Message::Revert { generation }
            | Message::Disarm { generation }
            | Message::ExportGolden { generation, .. }
            | Message::SnapshotCurrent { generation, .. }
            | Message::Reset { generation }
            | Message::Ping { generation }
            | Message::Stop { generation }
            | Message::ApplyCompleted { generation, .. }
            | Message::VerifCompleted { generation, .. }
            | Message::RecoverCompleted { generation, .. }
            | Message::RecoverValidCompleted { generation, .. }
            | Message::DisplayEvent { generation, .. }
            | Message::HeartbeatTimeout { generation } => *generation,
        }
    }

    /// True for the eight inbound commands (router- or watchdog-originated,
    /// never a dispatcher completion). Used by the router to decide whether
    /// a freshly parsed frame should be stamped with the *current*
    /// generation rather than carrying one captured earlier.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Message::Apply { .. }
                | Message::Revert { .. }
                | Message::Disarm { .. }
                | Message::ExportGolden { .. }
                | Message::SnapshotCurrent { .. }
                | Message::Reset { .. }
                | Message::Ping { .. }
                | Message::Stop { .. }
        )
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
