// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State transition functions extracted from the mailbox loop (spec §4.3
//! "Per-transition side effects"). Each takes the [`Session`] plus the
//! minimal extra argument the event carries, so it is independently
//! testable without driving the whole `tokio::select!` loop.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dispatcher::DispatchTask;
use crate::message::{ApplyOutcome, CancellationToken, DisplayEventKind, ExcludeDevices, RecoveryOutcome};
use crate::model::{ApplyRequest, DeviceId, SnapshotTier};
use crate::policy::VdResetDecision;

use super::run::{Session, State};
use super::Reply;

/// Debounce window for event-driven restarts during virtual-display apply
/// (spec §4.3 "debounce (≥ 250 ms since last restart)").
pub const VD_RESTART_DEBOUNCE: Duration = Duration::from_millis(250);
/// Delay before re-dispatching apply after a debounced virtual-display
/// restart (spec §8 scenario 4 "new apply dispatched after 100 ms").
const VD_RESTART_REDISPATCH_DELAY: Duration = Duration::from_millis(100);
/// HDR-blank workaround delay after a verified apply (spec §4.3
/// "VerifCompleted(ok)... kick off the HDR-blank workaround (1000 ms delay)").
const HDR_BLANK_DELAY: Duration = Duration::from_millis(1000);

async fn send_apply_reply(session: &mut Session, status: crate::error::OperationStatus) {
    if session.state_mut().apply_result_sent {
        return;
    }
    session.state_mut().apply_result_sent = true;
    session.reply_sink.send(Reply::ApplyResult { status }).await;
}

async fn dispatch(session: &Session, task: DispatchTask) {
    if session.dispatch_tx.send(task).await.is_err() {
        warn!("dispatcher mailbox closed, dropping task");
    }
}

fn token(session: &Session) -> CancellationToken {
    session.cancellation.token()
}

/// On `Apply` (spec §4.3): reset per-apply state, (re)install the restore
/// task, and dispatch a fresh apply. The transition table leaves this
/// column blank for `Recovery`/`RecoveryValidation` — an in-flight recovery
/// ignores a fresh Apply rather than being pre-empted by one — so those two
/// phases no-op here instead of cancelling the recovery in progress.
pub async fn on_apply(session: &mut Session, request: ApplyRequest) {
    if matches!(session.state_mut().phase, State::Recovery | State::RecoveryValidation) {
        debug!("apply ignored while a recovery is in flight");
        return;
    }

    session.cancellation.cancel();

    {
        let state = session.state_mut();
        state.apply_attempt = 1;
        state.apply_result_sent = false;
        state.expected_topology = None;
        state.current_request = Some(request.clone());
        state.phase = State::InProgress;
    }

    session.restore.install().await;

    let task = DispatchTask::Apply {
        request,
        delay: Duration::ZERO,
        reset_virtual_display: false,
        token: token(session),
    };
    dispatch(session, task).await;
}

/// On `Revert` (spec §4.3): cancel outstanding work, arm recovery and the
/// heartbeat, delete the restore task, dispatch recovery. Valid from every
/// state, including re-entrant from `Recovery`/`RecoveryValidation`.
pub async fn on_revert(session: &mut Session) {
    session.cancellation.cancel();

    let prefer_golden_first = session
        .state_mut()
        .current_request
        .as_ref()
        .is_some_and(|r| r.prefer_golden_first);

    {
        let now = session.clock.now();
        let state = session.state_mut();
        state.recovery_armed = true;
        state.heartbeat.arm(now);
        state.phase = State::Recovery;
    }

    session.restore.remove().await;

    let task = DispatchTask::Recover { prefer_golden_first, token: token(session) };
    dispatch(session, task).await;
}

/// On `Disarm` (spec §4.3): cancel outstanding work, disarm recovery and the
/// heartbeat, delete the restore task, clear per-apply state, return to
/// Waiting. Not reachable from the wire in this version (see DESIGN.md) but
/// fully implemented for direct/internal use.
pub async fn on_disarm(session: &mut Session) {
    session.cancellation.cancel();

    {
        let state = session.state_mut();
        state.recovery_armed = false;
        state.heartbeat.disarm();
        state.apply_attempt = 1;
        state.apply_result_sent = false;
        state.expected_topology = None;
        state.recovery_snapshot = None;
        state.phase = State::Waiting;
    }

    session.restore.remove().await;
}

/// `ExportGolden`/`SnapshotCurrent` are not part of the apply/verify/recover
/// lifecycle (spec §4.3's table has no column for them); they run inline on
/// the mailbox worker since a snapshot capture is a quick backend query, not
/// a retried operation, and the single-consumer mailbox already serializes
/// it against any concurrent Apply.
pub async fn on_export_golden(session: &mut Session, exclude: ExcludeDevices) {
    let blacklist = exclude.blacklist();
    session.state_mut().snapshot_blacklist = blacklist.clone();

    let snapshot = session.ledger.capture(session.backend.as_ref()).await;
    if !session.ledger.save(SnapshotTier::Golden, snapshot, &blacklist) {
        warn!("golden snapshot rejected: empty after blacklist filtering");
    }
}

pub async fn on_snapshot_current(session: &mut Session, exclude: ExcludeDevices) {
    let blacklist = exclude.blacklist();
    session.state_mut().snapshot_blacklist = blacklist.clone();

    session.ledger.rotate_current_to_previous();
    let snapshot = session.ledger.capture(session.backend.as_ref()).await;
    if !session.ledger.save(SnapshotTier::Current, snapshot, &blacklist) {
        warn!("current snapshot rejected: empty after blacklist filtering");
    }
}

/// On `ApplyCompleted` (spec §4.3): branch on the outcome's status.
pub async fn on_apply_completed(session: &mut Session, outcome: ApplyOutcome) {
    use crate::error::OperationStatus::*;

    match outcome.status {
        Ok => {
            send_apply_reply(session, Ok).await;
            let request = session.state_mut().current_request.clone();
            session.state_mut().expected_topology = outcome.expected_topology.clone();
            session.state_mut().phase = State::Verification;
            if let Some(request) = request {
                let task = DispatchTask::Verify {
                    request,
                    expected_topology: outcome.expected_topology,
                    token: token(session),
                };
                dispatch(session, task).await;
            }
        }
        NeedsVirtualDisplayReset => {
            let now = session.clock.now();
            let last_reset = session.state_mut().last_vd_reset;
            let decision = session.policy.maybe_reset_virtual_display(
                NeedsVirtualDisplayReset,
                outcome.virtual_display_requested,
                last_reset,
                now,
            );
            match decision {
                VdResetDecision::ResetVirtualDisplay => {
                    session.state_mut().last_vd_reset = Some(now);
                    let request = session.state_mut().current_request.clone();
                    if let Some(request) = request {
                        let task = DispatchTask::Apply {
                            request,
                            delay: Duration::ZERO,
                            reset_virtual_display: true,
                            token: token(session),
                        };
                        dispatch(session, task).await;
                    }
                }
                VdResetDecision::Proceed => {
                    send_apply_reply(session, NeedsVirtualDisplayReset).await;
                    session.state_mut().phase = State::Waiting;
                }
            }
        }
        Retryable | VerificationFailed => {
            let attempt = session.state_mut().apply_attempt;
            if session.policy.can_retry_apply(attempt) {
                session.state_mut().apply_attempt = attempt + 1;
                let request = session.state_mut().current_request.clone();
                if let Some(request) = request {
                    let task = DispatchTask::Apply {
                        request,
                        delay: session.policy.retry_delay(),
                        reset_virtual_display: false,
                        token: token(session),
                    };
                    dispatch(session, task).await;
                }
            } else {
                send_apply_reply(session, outcome.status).await;
                session.state_mut().phase = State::Waiting;
            }
        }
        HelperUnavailable | InvalidRequest | Fatal => {
            send_apply_reply(session, outcome.status).await;
            session.state_mut().phase = State::Waiting;
        }
    }
}

/// On `VerifCompleted` (spec §4.3): always post a verification-result reply;
/// on success arm recovery/heartbeat, refresh the shell, kick the HDR-blank
/// workaround, and move to VirtualDisplayMonitoring or Waiting depending on
/// whether the request targets a virtual display.
pub async fn on_verif_completed(session: &mut Session, ok: bool) {
    session.reply_sink.send(Reply::VerificationResult { ok }).await;

    if !ok {
        session.state_mut().phase = State::Waiting;
        return;
    }

    let now = session.clock.now();
    {
        let state = session.state_mut();
        state.recovery_armed = true;
        state.heartbeat.arm(now);
    }

    session.backend.refresh_shell().await;

    let request = session.state_mut().current_request.clone();
    if let Some(request) = request {
        if request.hdr_blank {
            if let Some(device_id) = request.device_id().map(DeviceId::from) {
                spawn_hdr_blank(session, device_id);
            }
        }
        session.state_mut().phase = if request.targets_virtual_display() {
            State::VirtualDisplayMonitoring
        } else {
            State::Waiting
        };
    } else {
        session.state_mut().phase = State::Waiting;
    }
}

/// Fire-and-forget HDR-blank workaround: not part of the apply/verify
/// lifecycle, has no completion message, and is not cancellable by
/// generation (spec §4.3 names only the delay, not a cancellation point).
fn spawn_hdr_blank(session: &Session, device_id: DeviceId) {
    let backend = session.backend.clone();
    let clock = session.clock.clone();
    tokio::spawn(async move {
        clock.sleep(HDR_BLANK_DELAY).await;
        backend.hdr_blank(&device_id).await;
    });
}

/// On `RecoverCompleted` (spec §4.3): retain the snapshot and validate it,
/// or park in `EventLoop` to await the next trigger.
pub async fn on_recover_completed(session: &mut Session, outcome: RecoveryOutcome) {
    match outcome.snapshot {
        Some(snapshot) if outcome.success => {
            session.state_mut().recovery_snapshot = Some(snapshot.clone());
            session.state_mut().phase = State::RecoveryValidation;
            let task = DispatchTask::RecoverValidate { snapshot, token: token(session) };
            dispatch(session, task).await;
        }
        _ => {
            debug!("recovery exhausted all tiers, parking in event loop");
            session.state_mut().phase = State::EventLoop;
        }
    }
}

/// On `RecoverValidCompleted` (spec §4.3): disarm and exit on success,
/// otherwise park in `EventLoop`.
pub async fn on_recover_valid_completed(session: &mut Session, ok: bool) -> Option<i32> {
    if ok {
        {
            let state = session.state_mut();
            state.recovery_armed = false;
            state.heartbeat.disarm();
        }
        session.restore.remove().await;
        info!("recovery validated, exiting");
        Some(0)
    } else {
        session.state_mut().phase = State::EventLoop;
        None
    }
}

/// On `DisplayEvent` (spec §4.3): behavior depends entirely on the current
/// phase.
pub async fn on_display_event(session: &mut Session, kind: DisplayEventKind) {
    match session.state_mut().phase {
        State::Waiting | State::Recovery | State::RecoveryValidation => {
            debug!(?kind, "display event ignored in current phase");
        }
        State::VirtualDisplayMonitoring => {
            retarget_and_redispatch(session).await;
        }
        State::InProgress | State::Verification => {
            let targets_virtual = session
                .state_mut()
                .current_request
                .as_ref()
                .is_some_and(|r| r.targets_virtual_display());
            if !targets_virtual {
                debug!(?kind, "display event ignored for a non-virtual apply");
                return;
            }

            let current_vd_id = session.vd_driver.current_device_id().await;
            let request_device_id =
                session.state_mut().current_request.as_ref().and_then(|r| r.device_id().map(String::from));

            if current_vd_id.as_deref() == request_device_id.as_deref() {
                debug!("virtual display event is spurious, device_id unchanged");
                return;
            }

            let now = session.clock.now();
            if !session.state_mut().vd_restart_debounce.try_fire(now) {
                debug!("virtual display restart debounced");
                return;
            }

            session.cancellation.cancel();
            session.state_mut().expected_topology = None;
            session.state_mut().apply_attempt = 1;
            session.state_mut().phase = State::InProgress;

            if let Some(new_id) = current_vd_id {
                if let Some(request) = session.state_mut().current_request.as_mut() {
                    request.retarget_device_id(new_id);
                }
            }

            let request = session.state_mut().current_request.clone();
            if let Some(request) = request {
                let task = DispatchTask::Apply {
                    request,
                    delay: VD_RESTART_REDISPATCH_DELAY,
                    reset_virtual_display: false,
                    token: token(session),
                };
                dispatch(session, task).await;
            }
        }
        State::EventLoop => {
            if session.state_mut().recovery_armed {
                dispatch_recovery_from_trigger(session).await;
            }
        }
    }
}

/// Retarget the virtual display's device_id and re-dispatch apply (spec
/// §4.3 "On `DisplayEvent` in `VirtualDisplayMonitoring`").
async fn retarget_and_redispatch(session: &mut Session) {
    let new_id = session.vd_driver.current_device_id().await;
    if let Some(new_id) = new_id {
        if let Some(request) = session.state_mut().current_request.as_mut() {
            request.retarget_device_id(new_id);
        }
    }
    session.state_mut().apply_attempt = 1;
    session.state_mut().phase = State::InProgress;

    let request = session.state_mut().current_request.clone();
    if let Some(request) = request {
        let task = DispatchTask::Apply {
            request,
            delay: Duration::ZERO,
            reset_virtual_display: false,
            token: token(session),
        };
        dispatch(session, task).await;
    }
}

/// On `HeartbeatTimeout` (spec §4.3): dispatch recovery if armed, otherwise
/// ignore. Shared with the `DisplayEvent` `EventLoop` branch since both
/// reduce to the same "Recovery (if armed)" side effect.
pub async fn on_heartbeat_timeout(session: &mut Session) {
    match session.state_mut().phase {
        State::Waiting | State::Recovery | State::RecoveryValidation => {
            debug!("heartbeat timeout ignored in current phase");
        }
        State::InProgress | State::Verification | State::EventLoop | State::VirtualDisplayMonitoring => {
            if session.state_mut().recovery_armed {
                dispatch_recovery_from_trigger(session).await;
            }
        }
    }
}

/// Shared tail of the `DisplayEvent`/`HeartbeatTimeout` "Recovery (if armed)"
/// transitions: cancel whatever is in flight and dispatch recovery.
async fn dispatch_recovery_from_trigger(session: &mut Session) {
    session.cancellation.cancel();

    let prefer_golden_first = session
        .state_mut()
        .current_request
        .as_ref()
        .is_some_and(|r| r.prefer_golden_first);
    session.state_mut().phase = State::Recovery;

    let task = DispatchTask::Recover { prefer_golden_first, token: token(session) };
    dispatch(session, task).await;
}
