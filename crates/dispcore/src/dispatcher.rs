// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation Dispatcher (spec §4.4, C4): the four operation classes, run
//! strictly FIFO on one worker, posting typed completions back into the
//! state machine's mailbox. The free functions (`apply_operation` etc.) are
//! the testable unit; [`Dispatcher::run`] is just their FIFO wiring.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{DisplayBackend, VirtualDisplayDriver};
use crate::clock::Clock;
use crate::ledger::SnapshotLedger;
use crate::message::{ApplyOutcome, CancellationToken, Message, RecoveryOutcome};
use crate::model::{ApplyRequest, Snapshot, Topology};

const VD_DISABLE_SETTLE: Duration = Duration::from_millis(500);
const VD_ENABLE_SETTLE: Duration = Duration::from_millis(1000);
const VERIFY_SETTLE: Duration = Duration::from_millis(250);
const RECOVER_RETRY_DELAY: Duration = Duration::from_millis(300);
const RECOVER_POST_APPLY_SETTLE: Duration = Duration::from_millis(250);
const RECOVER_MAX_ATTEMPTS: u32 = 2;

/// One unit of dispatcher work, carrying the cancellation token captured at
/// dispatch time (spec §4.4, §5 "Cancellation").
pub enum DispatchTask {
    Apply { request: ApplyRequest, delay: Duration, reset_virtual_display: bool, token: CancellationToken },
    Verify { request: ApplyRequest, expected_topology: Option<Topology>, token: CancellationToken },
    Recover { prefer_golden_first: bool, token: CancellationToken },
    RecoverValidate { snapshot: Snapshot, token: CancellationToken },
}

/// Apply(request, delay, reset_virtual_display) → ApplyOutcome (spec §4.4).
pub async fn apply_operation(
    backend: &dyn DisplayBackend,
    vd_driver: &dyn VirtualDisplayDriver,
    clock: &dyn Clock,
    token: &CancellationToken,
    request: &ApplyRequest,
    delay: Duration,
    reset_virtual_display: bool,
) -> ApplyOutcome {
    let virtual_display_requested = request.targets_virtual_display();
    let cancelled_outcome = |status| ApplyOutcome { status, expected_topology: None, virtual_display_requested };

    if delay > Duration::ZERO {
        clock.sleep(delay).await;
        if token.is_cancelled() {
            return cancelled_outcome(crate::error::OperationStatus::Fatal);
        }
    }

    if reset_virtual_display {
        let disabled = vd_driver.disable().await;
        clock.sleep(VD_DISABLE_SETTLE).await;
        let enabled = disabled && vd_driver.enable().await;
        clock.sleep(VD_ENABLE_SETTLE).await;
        if !disabled || !enabled {
            warn!("virtual display reset cycle failed");
            return cancelled_outcome(crate::error::OperationStatus::Fatal);
        }
    }

    if token.is_cancelled() {
        return cancelled_outcome(crate::error::OperationStatus::Fatal);
    }

    let Some(configuration) = request.configuration.as_ref() else {
        return cancelled_outcome(crate::error::OperationStatus::InvalidRequest);
    };

    let expected_topology = match request.topology.clone() {
        Some(topology) => topology,
        None => backend.current_topology().await,
    };

    if let Some(topology) = request.topology.as_ref() {
        let status: crate::error::OperationStatus = backend.apply_topology(topology).await.into();
        if status != crate::error::OperationStatus::Ok {
            return ApplyOutcome {
                status,
                expected_topology: Some(expected_topology),
                virtual_display_requested,
            };
        }
    }

    let status: crate::error::OperationStatus = backend.apply(configuration).await.into();

    for position in &request.monitor_positions {
        if position.device_id.is_empty() {
            continue;
        }
        // Individual origin failures are swallowed (spec §4.4 Apply step 8).
        let _ = backend.set_display_origin(&position.device_id, position.point).await;
    }

    ApplyOutcome { status, expected_topology: Some(expected_topology), virtual_display_requested }
}

/// Verify(request, expected_topology) → bool (spec §4.4).
pub async fn verify_operation(
    backend: &dyn DisplayBackend,
    clock: &dyn Clock,
    token: &CancellationToken,
    request: &ApplyRequest,
    expected_topology: Option<&Topology>,
) -> bool {
    if token.is_cancelled() {
        return false;
    }
    clock.sleep(VERIFY_SETTLE).await;
    if token.is_cancelled() {
        return false;
    }

    if let Some(topology) = expected_topology {
        if !backend.is_topology_same(topology).await {
            return false;
        }
    }

    if let Some(configuration) = request.configuration.as_ref() {
        if !backend.configuration_matches(configuration).await {
            return false;
        }
    }

    !token.is_cancelled()
}

/// Recover(cancellation_token) → RecoveryOutcome (spec §4.4).
pub async fn recover_operation(
    backend: &dyn DisplayBackend,
    ledger: &SnapshotLedger,
    clock: &dyn Clock,
    token: &CancellationToken,
    prefer_golden_first: bool,
) -> RecoveryOutcome {
    let available = backend.available_devices().await;

    for tier in SnapshotLedger::recovery_order(prefer_golden_first) {
        if token.is_cancelled() {
            break;
        }

        let Some(snapshot) = ledger.load(tier, &available) else {
            debug!(?tier, "recovery tier not applicable, skipping");
            continue;
        };

        if !backend.validate_snapshot(&snapshot).await {
            debug!(?tier, "recovery snapshot failed backend validation, skipping");
            continue;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            if token.is_cancelled() {
                return RecoveryOutcome { success: false, snapshot: None };
            }

            let status: crate::error::OperationStatus = backend.apply_snapshot(&snapshot).await.into();

            if status == crate::error::OperationStatus::Ok {
                clock.sleep(RECOVER_POST_APPLY_SETTLE).await;
                if backend.snapshot_matches(&snapshot).await {
                    return RecoveryOutcome { success: true, snapshot: Some(snapshot) };
                }
                break;
            }

            if status.should_skip_tier() {
                break;
            }

            if status.is_retryable() && attempt < RECOVER_MAX_ATTEMPTS {
                clock.sleep(RECOVER_RETRY_DELAY).await;
                continue;
            }

            break;
        }
    }

    RecoveryOutcome { success: false, snapshot: None }
}

/// RecoverValidate(snapshot) → bool (spec §4.4).
pub async fn recover_validate_operation(
    backend: &dyn DisplayBackend,
    clock: &dyn Clock,
    token: &CancellationToken,
    snapshot: &Snapshot,
) -> bool {
    clock.sleep(VERIFY_SETTLE).await;
    if token.is_cancelled() {
        return false;
    }
    backend.snapshot_matches(snapshot).await
}

/// Single FIFO worker executing dispatcher tasks and posting completions
/// back to the state machine (spec §4.4, §5 "dispatcher executes at most
/// one operation at a time").
pub struct Dispatcher {
    backend: Arc<dyn DisplayBackend>,
    vd_driver: Arc<dyn VirtualDisplayDriver>,
    ledger: Arc<SnapshotLedger>,
    clock: Arc<dyn Clock>,
    mailbox: mpsc::Sender<Message>,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn DisplayBackend>,
        vd_driver: Arc<dyn VirtualDisplayDriver>,
        ledger: Arc<SnapshotLedger>,
        clock: Arc<dyn Clock>,
        mailbox: mpsc::Sender<Message>,
    ) -> Self {
        Self { backend, vd_driver, ledger, clock, mailbox }
    }

    /// Drain `tasks` strictly FIFO until the channel closes.
    pub async fn run(self, mut tasks: mpsc::Receiver<DispatchTask>) {
        while let Some(task) = tasks.recv().await {
            let message = self.execute(task).await;
            if self.mailbox.send(message).await.is_err() {
                break;
            }
        }
    }

    async fn execute(&self, task: DispatchTask) -> Message {
        match task {
            DispatchTask::Apply { request, delay, reset_virtual_display, token } => {
                let generation = token.expected();
                let outcome = apply_operation(
                    self.backend.as_ref(),
                    self.vd_driver.as_ref(),
                    self.clock.as_ref(),
                    &token,
                    &request,
                    delay,
                    reset_virtual_display,
                )
                .await;
                Message::ApplyCompleted { generation, outcome }
            }
            DispatchTask::Verify { request, expected_topology, token } => {
                let generation = token.expected();
                let ok = verify_operation(
                    self.backend.as_ref(),
                    self.clock.as_ref(),
                    &token,
                    &request,
                    expected_topology.as_ref(),
                )
                .await;
                Message::VerifCompleted { generation, ok }
            }
            DispatchTask::Recover { prefer_golden_first, token } => {
                let generation = token.expected();
                let outcome = recover_operation(
                    self.backend.as_ref(),
                    self.ledger.as_ref(),
                    self.clock.as_ref(),
                    &token,
                    prefer_golden_first,
                )
                .await;
                Message::RecoverCompleted { generation, outcome }
            }
            DispatchTask::RecoverValidate { snapshot, token } => {
                let generation = token.expected();
                let ok = recover_validate_operation(
                    self.backend.as_ref(),
                    self.clock.as_ref(),
                    &token,
                    &snapshot,
                )
                .await;
                Message::RecoverValidCompleted { generation, ok }
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
