use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::backend::{BoxFuture, DisplayBackend, RestoreTaskRegistrar, VirtualDisplayDriver};
use crate::clock::FakeClock;
use crate::dispatcher::DispatchTask;
use crate::error::OperationStatus;
use crate::ipc::{Frame, FrameError, Transport};
use crate::ledger::{MemStore, SnapshotLedger};
use crate::message::{ApplyOutcome, CancellationSource, DisplayEventKind, ExcludeDevices, RecoveryOutcome};
use crate::model::{ApplyRequest, DeviceConfiguration, Snapshot};
use crate::policy::ApplyPolicy;
use crate::testutil::{ScriptedBackend, ScriptedRestoreTaskRegistrar, ScriptedVirtualDisplayDriver};

use super::run::{Session, State};
use super::transition;
use super::{Reply, ReplySink, SessionConfig};

/// A transport whose connectivity can be flipped by the test driving it,
/// used to exercise `DisconnectGrace` wiring without a real pipe.
#[derive(Default)]
struct FakeTransport {
    connected: AtomicBool,
}

impl FakeTransport {
    fn new(connected: bool) -> Self {
        Self { connected: AtomicBool::new(connected) }
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

impl Transport for FakeTransport {
    fn send(&self, _frame: Frame) -> BoxFuture<'_, Result<(), FrameError>> {
        Box::pin(async { Ok(()) })
    }

    fn receive(&self, _timeout: Duration) -> BoxFuture<'_, Result<Frame, FrameError>> {
        Box::pin(async { Err(FrameError::Timeout) })
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct RecordingReplySink {
    replies: Mutex<Vec<Reply>>,
}

impl RecordingReplySink {
    fn replies(&self) -> Vec<Reply> {
        self.replies.lock().expect("lock").clone()
    }
}

impl ReplySink for RecordingReplySink {
    fn send(&self, reply: Reply) -> BoxFuture<'_, ()> {
        self.replies.lock().expect("lock").push(reply);
        Box::pin(async {})
    }
}

struct Harness {
    session: Session,
    dispatch_rx: mpsc::Receiver<DispatchTask>,
    replies: Arc<RecordingReplySink>,
    backend: Arc<ScriptedBackend>,
    vd_driver: Arc<ScriptedVirtualDisplayDriver>,
    restore: Arc<ScriptedRestoreTaskRegistrar>,
    clock: FakeClock,
    transport: Arc<FakeTransport>,
    mailbox_tx: mpsc::Sender<crate::message::Message>,
}

fn harness() -> Harness {
    harness_with_policy(ApplyPolicy::default())
}

fn harness_with_policy(policy: ApplyPolicy) -> Harness {
    let backend = Arc::new(ScriptedBackend::default());
    let vd_driver = Arc::new(ScriptedVirtualDisplayDriver::default());
    let restore = Arc::new(ScriptedRestoreTaskRegistrar::default());
    let ledger = Arc::new(SnapshotLedger::new(Arc::new(MemStore::new())));
    let clock = FakeClock::new();
    let replies = Arc::new(RecordingReplySink::default());
    let transport = Arc::new(FakeTransport::new(true));
    let (dispatch_tx, dispatch_rx) = mpsc::channel(16);
    let (mailbox_tx, mailbox_rx) = mpsc::channel(16);

    let config = SessionConfig {
        backend: backend.clone() as Arc<dyn DisplayBackend>,
        vd_driver: vd_driver.clone() as Arc<dyn VirtualDisplayDriver>,
        restore: restore.clone() as Arc<dyn RestoreTaskRegistrar>,
        ledger,
        clock: Arc::new(clock.clone()) as Arc<dyn crate::clock::Clock>,
        policy,
        reply_sink: replies.clone() as Arc<dyn ReplySink>,
        heartbeat_timeout: Duration::from_secs(30),
        transport: transport.clone() as Arc<dyn Transport>,
        disconnect_grace: Duration::from_secs(5),
    };

    let cancellation = CancellationSource::new();
    let session = Session::new(config, cancellation, dispatch_tx, mailbox_rx);

    Harness { session, dispatch_rx, replies, backend, vd_driver, restore, clock, transport, mailbox_tx }
}

fn apply_request(device_id: &str) -> ApplyRequest {
    ApplyRequest {
        configuration: Some(DeviceConfiguration {
            device_id: device_id.to_string(),
            resolution: None,
            refresh_rate: None,
            hdr_state: Default::default(),
            device_prep: Default::default(),
        }),
        topology: None,
        monitor_positions: Vec::new(),
        hdr_blank: false,
        prefer_golden_first: false,
        virtual_layout: None,
    }
}

fn virtual_apply_request(device_id: &str) -> ApplyRequest {
    let mut request = apply_request(device_id);
    request.virtual_layout = Some("layout-a".into());
    request
}

fn expect_apply_task(task: DispatchTask) -> (ApplyRequest, Duration, bool) {
    match task {
        DispatchTask::Apply { request, delay, reset_virtual_display, .. } => {
            (request, delay, reset_virtual_display)
        }
        other => panic!("expected Apply task, got a different variant: {}", discriminant_name(&other)),
    }
}

fn discriminant_name(task: &DispatchTask) -> &'static str {
    match task {
        DispatchTask::Apply { .. } => "Apply",
        DispatchTask::Verify { .. } => "Verify",
        DispatchTask::Recover { .. } => "Recover",
        DispatchTask::RecoverValidate { .. } => "RecoverValidate",
    }
}

// ---- Apply ----

#[tokio::test]
async fn on_apply_resets_state_installs_restore_and_dispatches_immediately() {
    let mut h = harness();
    transition::on_apply(&mut h.session, apply_request("dev0")).await;

    assert_eq!(h.session.state().phase, State::InProgress);
    assert_eq!(h.session.state().apply_attempt, 1);
    assert!(!h.session.state().apply_result_sent);
    assert_eq!(h.restore.install_calls.load(Ordering::SeqCst), 1);

    let task = h.dispatch_rx.try_recv().expect("apply task dispatched");
    let (request, delay, reset_vd) = expect_apply_task(task);
    assert_eq!(request.device_id(), Some("dev0"));
    assert_eq!(delay, Duration::ZERO);
    assert!(!reset_vd);
}

#[tokio::test]
async fn on_apply_bumps_generation_cancelling_prior_work() {
    let mut h = harness();
    let before = h.session.cancellation.current();
    transition::on_apply(&mut h.session, apply_request("dev0")).await;
    assert_eq!(h.session.cancellation.current(), before + 1);
}

#[tokio::test]
async fn on_apply_reinstalls_restore_task_idempotently() {
    let mut h = harness();
    transition::on_apply(&mut h.session, apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain");
    transition::on_apply(&mut h.session, apply_request("dev1")).await;
    h.dispatch_rx.try_recv().expect("drain");
    assert_eq!(h.restore.install_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn on_apply_is_a_no_op_during_recovery_or_recovery_validation() {
    for phase in [State::Recovery, State::RecoveryValidation] {
        let mut h = harness();
        h.session.state_mut().phase = phase;
        let generation_before = h.session.cancellation.current();

        transition::on_apply(&mut h.session, apply_request("dev0")).await;

        assert_eq!(h.session.state().phase, phase);
        assert_eq!(h.session.cancellation.current(), generation_before);
        assert_eq!(h.restore.install_calls.load(Ordering::SeqCst), 0);
        assert!(h.dispatch_rx.try_recv().is_err());
    }
}

// ---- ApplyCompleted ----

#[tokio::test]
async fn apply_completed_ok_sends_reply_once_and_dispatches_verify() {
    let mut h = harness();
    transition::on_apply(&mut h.session, apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");

    let outcome = ApplyOutcome { status: OperationStatus::Ok, expected_topology: None, virtual_display_requested: false };
    transition::on_apply_completed(&mut h.session, outcome).await;

    assert_eq!(h.session.state().phase, State::Verification);
    assert!(h.session.state().apply_result_sent);
    assert_eq!(h.replies.replies().len(), 1);
    assert!(matches!(h.replies.replies()[0], Reply::ApplyResult { status: OperationStatus::Ok }));

    let task = h.dispatch_rx.try_recv().expect("verify task dispatched");
    assert!(matches!(task, DispatchTask::Verify { .. }));
}

#[tokio::test]
async fn apply_result_reply_fires_at_most_once() {
    let mut h = harness();
    transition::on_apply(&mut h.session, apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");

    let outcome = ApplyOutcome { status: OperationStatus::Fatal, expected_topology: None, virtual_display_requested: false };
    transition::on_apply_completed(&mut h.session, outcome.clone()).await;
    transition::on_apply_completed(&mut h.session, outcome).await;

    assert_eq!(h.replies.replies().len(), 1, "a second completion must not fire a second reply");
}

#[tokio::test]
async fn apply_completed_retryable_retries_up_to_policy_max_attempts() {
    let policy = ApplyPolicy { max_attempts: 3, retry_delay: Duration::from_millis(300), vd_reset_cooldown: Duration::from_secs(30) };
    let mut h = harness_with_policy(policy);
    transition::on_apply(&mut h.session, apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");

    let outcome = ApplyOutcome { status: OperationStatus::Retryable, expected_topology: None, virtual_display_requested: false };

    // attempt 1 -> 2: retried
    transition::on_apply_completed(&mut h.session, outcome.clone()).await;
    assert_eq!(h.session.state().apply_attempt, 2);
    let (_, delay, _) = expect_apply_task(h.dispatch_rx.try_recv().expect("retry 1"));
    assert_eq!(delay, Duration::from_millis(300));
    assert!(h.replies.replies().is_empty());

    // attempt 2 -> 3: retried
    transition::on_apply_completed(&mut h.session, outcome.clone()).await;
    assert_eq!(h.session.state().apply_attempt, 3);
    expect_apply_task(h.dispatch_rx.try_recv().expect("retry 2"));
    assert!(h.replies.replies().is_empty());

    // attempt 3: exhausted, final reply, back to Waiting
    transition::on_apply_completed(&mut h.session, outcome).await;
    assert_eq!(h.session.state().phase, State::Waiting);
    assert!(h.dispatch_rx.try_recv().is_err(), "no further dispatch once retries are exhausted");
    assert_eq!(h.replies.replies().len(), 1);
    assert!(matches!(h.replies.replies()[0], Reply::ApplyResult { status: OperationStatus::Retryable }));
}

#[tokio::test]
async fn apply_completed_needs_vd_reset_resets_when_cooldown_elapsed() {
    let mut h = harness();
    transition::on_apply(&mut h.session, virtual_apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");

    let outcome = ApplyOutcome {
        status: OperationStatus::NeedsVirtualDisplayReset,
        expected_topology: None,
        virtual_display_requested: true,
    };
    transition::on_apply_completed(&mut h.session, outcome).await;

    let (_, _, reset_vd) = expect_apply_task(h.dispatch_rx.try_recv().expect("reset-triggered apply"));
    assert!(reset_vd);
    assert!(h.replies.replies().is_empty(), "no reply yet, the reset apply is still in flight");
    assert!(h.session.state().last_vd_reset.is_some());
}

#[tokio::test]
async fn apply_completed_needs_vd_reset_proceeds_during_cooldown() {
    let mut h = harness();
    transition::on_apply(&mut h.session, virtual_apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");

    let outcome = ApplyOutcome {
        status: OperationStatus::NeedsVirtualDisplayReset,
        expected_topology: None,
        virtual_display_requested: true,
    };
    // First reset consumes the cooldown window.
    transition::on_apply_completed(&mut h.session, outcome.clone()).await;
    h.dispatch_rx.try_recv().expect("first reset dispatch");

    transition::on_apply_completed(&mut h.session, outcome).await;
    assert_eq!(h.session.state().phase, State::Waiting);
    assert!(h.dispatch_rx.try_recv().is_err());
    assert!(matches!(
        h.replies.replies().last(),
        Some(Reply::ApplyResult { status: OperationStatus::NeedsVirtualDisplayReset })
    ));
}

#[tokio::test]
async fn apply_completed_terminal_statuses_reply_immediately() {
    for status in [OperationStatus::HelperUnavailable, OperationStatus::InvalidRequest, OperationStatus::Fatal] {
        let mut h = harness();
        transition::on_apply(&mut h.session, apply_request("dev0")).await;
        h.dispatch_rx.try_recv().expect("drain apply");

        let outcome = ApplyOutcome { status, expected_topology: None, virtual_display_requested: false };
        transition::on_apply_completed(&mut h.session, outcome).await;

        assert_eq!(h.session.state().phase, State::Waiting);
        assert!(h.dispatch_rx.try_recv().is_err());
        assert!(matches!(h.replies.replies().last(), Some(Reply::ApplyResult { status: got }) if *got == status));
    }
}

// ---- VerifCompleted ----

#[tokio::test]
async fn verif_completed_failure_always_reports_and_returns_to_waiting() {
    let mut h = harness();
    transition::on_apply(&mut h.session, apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");
    h.session.state_mut().phase = State::Verification;

    transition::on_verif_completed(&mut h.session, false).await;

    assert_eq!(h.session.state().phase, State::Waiting);
    assert!(matches!(h.replies.replies().last(), Some(Reply::VerificationResult { ok: false })));
    assert_eq!(h.backend.refresh_shell_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn verif_completed_success_arms_recovery_refreshes_shell_and_moves_to_waiting_for_physical_request() {
    let mut h = harness();
    transition::on_apply(&mut h.session, apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");

    transition::on_verif_completed(&mut h.session, true).await;

    assert_eq!(h.session.state().phase, State::Waiting);
    assert!(h.session.state().recovery_armed);
    assert!(h.session.state().heartbeat.is_armed());
    assert_eq!(h.backend.refresh_shell_calls.load(Ordering::SeqCst), 1);
    assert!(matches!(h.replies.replies().last(), Some(Reply::VerificationResult { ok: true })));
}

#[tokio::test]
async fn verif_completed_success_moves_to_vd_monitoring_for_virtual_request() {
    let mut h = harness();
    transition::on_apply(&mut h.session, virtual_apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");

    transition::on_verif_completed(&mut h.session, true).await;

    assert_eq!(h.session.state().phase, State::VirtualDisplayMonitoring);
}

#[tokio::test]
async fn verif_completed_success_with_hdr_blank_schedules_backend_hdr_blank() {
    let mut h = harness();
    let mut request = apply_request("dev0");
    request.hdr_blank = true;
    transition::on_apply(&mut h.session, request).await;
    h.dispatch_rx.try_recv().expect("drain apply");

    transition::on_verif_completed(&mut h.session, true).await;

    h.clock.advance(Duration::from_millis(1000));
    // Give the detached tokio::spawn a chance to observe the advanced clock.
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.backend.hdr_blank_calls.load(Ordering::SeqCst), 1);
}

// ---- Revert / Disarm ----

#[tokio::test]
async fn on_revert_cancels_arms_recovery_removes_restore_and_dispatches_recover() {
    let mut h = harness();
    transition::on_apply(&mut h.session, apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");
    let before = h.session.cancellation.current();

    transition::on_revert(&mut h.session).await;

    assert_eq!(h.session.cancellation.current(), before + 1);
    assert_eq!(h.session.state().phase, State::Recovery);
    assert!(h.session.state().recovery_armed);
    assert!(h.session.state().heartbeat.is_armed());
    assert_eq!(h.restore.remove_calls.load(Ordering::SeqCst), 1);
    assert!(matches!(h.dispatch_rx.try_recv(), Ok(DispatchTask::Recover { .. })));
}

#[tokio::test]
async fn on_disarm_clears_state_removes_restore_and_does_not_dispatch() {
    let mut h = harness();
    transition::on_apply(&mut h.session, apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");

    transition::on_disarm(&mut h.session).await;

    assert_eq!(h.session.state().phase, State::Waiting);
    assert!(!h.session.state().recovery_armed);
    assert!(!h.session.state().heartbeat.is_armed());
    assert_eq!(h.restore.remove_calls.load(Ordering::SeqCst), 1);
    assert!(h.dispatch_rx.try_recv().is_err());
}

// ---- ExportGolden / SnapshotCurrent ----

#[tokio::test]
async fn export_golden_saves_non_empty_capture() {
    let mut h = harness();
    let mut snapshot = Snapshot::default();
    snapshot.primary_device = "dev0".into();
    snapshot.modes.insert("dev0".into(), crate::model::Mode { width: 1920, height: 1080, refresh_rate_numerator: 60, refresh_rate_denominator: 1 });
    *h.backend.capture_snapshot.lock().expect("lock") = snapshot;

    transition::on_export_golden(&mut h.session, ExcludeDevices::default()).await;

    let loaded = h.session.ledger.load(crate::model::SnapshotTier::Golden, &std::collections::BTreeSet::from(["dev0".to_string()]));
    assert!(loaded.is_some());
}

#[tokio::test]
async fn export_golden_rejects_when_blacklist_empties_the_snapshot() {
    let mut h = harness();
    let mut snapshot = Snapshot::default();
    snapshot.primary_device = "dev0".into();
    snapshot.modes.insert("dev0".into(), crate::model::Mode { width: 1920, height: 1080, refresh_rate_numerator: 60, refresh_rate_denominator: 1 });
    *h.backend.capture_snapshot.lock().expect("lock") = snapshot;

    let exclude = ExcludeDevices { exclude_devices: vec!["dev0".into()] };
    transition::on_export_golden(&mut h.session, exclude).await;

    let loaded = h.session.ledger.load(crate::model::SnapshotTier::Golden, &std::collections::BTreeSet::new());
    assert!(loaded.is_none());
}

#[tokio::test]
async fn snapshot_current_rotates_existing_current_into_previous() {
    let mut h = harness();
    let mut first = Snapshot::default();
    first.primary_device = "dev0".into();
    first.modes.insert("dev0".into(), crate::model::Mode { width: 1920, height: 1080, refresh_rate_numerator: 60, refresh_rate_denominator: 1 });
    *h.backend.capture_snapshot.lock().expect("lock") = first.clone();
    transition::on_snapshot_current(&mut h.session, ExcludeDevices::default()).await;

    let mut second = first.clone();
    second.primary_device = "dev1".into();
    second.modes.insert("dev1".into(), second.modes["dev0"]);
    *h.backend.capture_snapshot.lock().expect("lock") = second;
    transition::on_snapshot_current(&mut h.session, ExcludeDevices::default()).await;

    let available: std::collections::BTreeSet<_> = ["dev0".to_string(), "dev1".to_string()].into();
    let previous = h.session.ledger.load(crate::model::SnapshotTier::Previous, &available).expect("previous present");
    assert_eq!(previous.primary_device, "dev0");
}

// ---- Recover / RecoverValidate ----

#[tokio::test]
async fn recover_completed_success_parks_in_recovery_validation_and_dispatches_validate() {
    let mut h = harness();
    transition::on_revert(&mut h.session).await;
    h.dispatch_rx.try_recv().expect("drain recover dispatch");

    let snapshot = Snapshot::default();
    let outcome = RecoveryOutcome { success: true, snapshot: Some(snapshot) };
    transition::on_recover_completed(&mut h.session, outcome).await;

    assert_eq!(h.session.state().phase, State::RecoveryValidation);
    assert!(h.session.state().recovery_snapshot.is_some());
    assert!(matches!(h.dispatch_rx.try_recv(), Ok(DispatchTask::RecoverValidate { .. })));
}

#[tokio::test]
async fn recover_completed_failure_parks_in_event_loop() {
    let mut h = harness();
    transition::on_revert(&mut h.session).await;
    h.dispatch_rx.try_recv().expect("drain recover dispatch");

    let outcome = RecoveryOutcome { success: false, snapshot: None };
    transition::on_recover_completed(&mut h.session, outcome).await;

    assert_eq!(h.session.state().phase, State::EventLoop);
    assert!(h.dispatch_rx.try_recv().is_err());
}

#[tokio::test]
async fn recover_valid_completed_ok_disarms_and_signals_exit() {
    let mut h = harness();
    transition::on_revert(&mut h.session).await;
    h.dispatch_rx.try_recv().expect("drain recover dispatch");
    h.session.state_mut().phase = State::RecoveryValidation;

    let exit_code = transition::on_recover_valid_completed(&mut h.session, true).await;

    assert_eq!(exit_code, Some(0));
    assert!(!h.session.state().recovery_armed);
    assert!(!h.session.state().heartbeat.is_armed());
    assert_eq!(h.restore.remove_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn recover_valid_completed_failure_parks_in_event_loop_without_exit() {
    let mut h = harness();
    transition::on_revert(&mut h.session).await;
    h.dispatch_rx.try_recv().expect("drain recover dispatch");
    h.session.state_mut().phase = State::RecoveryValidation;

    let exit_code = transition::on_recover_valid_completed(&mut h.session, false).await;

    assert_eq!(exit_code, None);
    assert_eq!(h.session.state().phase, State::EventLoop);
}

// ---- DisplayEvent ----

#[tokio::test]
async fn display_event_ignored_while_waiting() {
    let mut h = harness();
    transition::on_display_event(&mut h.session, DisplayEventKind::ModeChange).await;
    assert_eq!(h.session.state().phase, State::Waiting);
    assert!(h.dispatch_rx.try_recv().is_err());
}

#[tokio::test]
async fn display_event_during_non_virtual_apply_is_ignored() {
    let mut h = harness();
    transition::on_apply(&mut h.session, apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");

    transition::on_display_event(&mut h.session, DisplayEventKind::DeviceArrival).await;

    assert_eq!(h.session.state().phase, State::InProgress);
    assert!(h.dispatch_rx.try_recv().is_err());
}

#[tokio::test]
async fn display_event_spurious_when_vd_device_id_unchanged() {
    let mut h = harness();
    transition::on_apply(&mut h.session, virtual_apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");
    *h.vd_driver.device_id.lock().expect("lock") = Some("dev0".into());

    transition::on_display_event(&mut h.session, DisplayEventKind::DeviceArrival).await;

    assert_eq!(h.session.state().phase, State::InProgress);
    assert!(h.dispatch_rx.try_recv().is_err());
}

#[tokio::test]
async fn display_event_retargets_and_redispatches_during_virtual_apply() {
    let mut h = harness();
    transition::on_apply(&mut h.session, virtual_apply_request("vd-old")).await;
    h.dispatch_rx.try_recv().expect("drain apply");
    *h.vd_driver.device_id.lock().expect("lock") = Some("vd-new".into());
    let before = h.session.cancellation.current();

    transition::on_display_event(&mut h.session, DisplayEventKind::DeviceArrival).await;

    assert_eq!(h.session.cancellation.current(), before + 1, "in-flight apply must be cancelled");
    assert_eq!(h.session.state().phase, State::InProgress);
    assert_eq!(h.session.state().apply_attempt, 1);
    let (request, delay, reset_vd) = expect_apply_task(h.dispatch_rx.try_recv().expect("redispatched apply"));
    assert_eq!(request.device_id(), Some("vd-new"));
    assert_eq!(delay, Duration::from_millis(100));
    assert!(!reset_vd);
}

#[tokio::test]
async fn display_event_debounced_when_fired_twice_within_window() {
    let mut h = harness();
    transition::on_apply(&mut h.session, virtual_apply_request("vd-old")).await;
    h.dispatch_rx.try_recv().expect("drain apply");
    *h.vd_driver.device_id.lock().expect("lock") = Some("vd-new".into());

    transition::on_display_event(&mut h.session, DisplayEventKind::DeviceArrival).await;
    h.dispatch_rx.try_recv().expect("first retarget dispatch");

    // Same new device id again, no time elapsed: debounced.
    transition::on_display_event(&mut h.session, DisplayEventKind::DeviceArrival).await;
    assert!(h.dispatch_rx.try_recv().is_err(), "debounce window has not elapsed");
}

#[tokio::test]
async fn display_event_in_vd_monitoring_retargets_and_redispatches_immediately() {
    let mut h = harness();
    transition::on_apply(&mut h.session, virtual_apply_request("vd-old")).await;
    h.dispatch_rx.try_recv().expect("drain apply");
    transition::on_verif_completed(&mut h.session, true).await;
    assert_eq!(h.session.state().phase, State::VirtualDisplayMonitoring);

    *h.vd_driver.device_id.lock().expect("lock") = Some("vd-new".into());
    transition::on_display_event(&mut h.session, DisplayEventKind::PowerResume).await;

    assert_eq!(h.session.state().phase, State::InProgress);
    let (request, delay, _) = expect_apply_task(h.dispatch_rx.try_recv().expect("redispatch"));
    assert_eq!(request.device_id(), Some("vd-new"));
    assert_eq!(delay, Duration::ZERO);
}

#[tokio::test]
async fn display_event_in_event_loop_triggers_recovery_only_when_armed() {
    let mut h = harness();
    h.session.state_mut().phase = State::EventLoop;
    h.session.state_mut().recovery_armed = false;
    transition::on_display_event(&mut h.session, DisplayEventKind::DeviceRemoval).await;
    assert_eq!(h.session.state().phase, State::EventLoop);
    assert!(h.dispatch_rx.try_recv().is_err());

    h.session.state_mut().recovery_armed = true;
    transition::on_display_event(&mut h.session, DisplayEventKind::DeviceRemoval).await;
    assert_eq!(h.session.state().phase, State::Recovery);
    assert!(matches!(h.dispatch_rx.try_recv(), Ok(DispatchTask::Recover { .. })));
}

// ---- HeartbeatTimeout ----

#[tokio::test]
async fn heartbeat_timeout_ignored_while_waiting_or_recovering() {
    let mut h = harness();
    for phase in [State::Waiting, State::Recovery, State::RecoveryValidation] {
        h.session.state_mut().phase = phase;
        h.session.state_mut().recovery_armed = true;
        transition::on_heartbeat_timeout(&mut h.session).await;
        assert_eq!(h.session.state().phase, phase);
        assert!(h.dispatch_rx.try_recv().is_err());
    }
}

#[tokio::test]
async fn heartbeat_timeout_triggers_recovery_when_armed_in_event_loop() {
    let mut h = harness();
    h.session.state_mut().phase = State::EventLoop;
    h.session.state_mut().recovery_armed = true;

    transition::on_heartbeat_timeout(&mut h.session).await;

    assert_eq!(h.session.state().phase, State::Recovery);
    assert!(matches!(h.dispatch_rx.try_recv(), Ok(DispatchTask::Recover { .. })));
}

// ---- Full mailbox loop: generation staleness, Ping/Stop ----

#[tokio::test]
async fn stale_generation_commands_are_discarded_by_the_mailbox_loop() {
    let h = harness();
    let mailbox_tx = h.mailbox_tx.clone();
    // Bump the generation once before anything is sent, so generation 0 is stale.
    h.session.cancellation.cancel();
    let current = h.session.cancellation.current();

    let Harness { session, mut dispatch_rx, .. } = h;
    let run_handle = tokio::spawn(session.run());

    mailbox_tx
        .send(crate::message::Message::Apply { generation: 0, request: apply_request("dev0") })
        .await
        .expect("send stale apply");
    mailbox_tx.send(crate::message::Message::Stop { generation: current }).await.expect("send stop");

    let exit_code = run_handle.await.expect("join");
    assert_eq!(exit_code, 0);
    assert!(dispatch_rx.try_recv().is_err(), "a stale-generation Apply must never reach the dispatcher");
}

#[tokio::test]
async fn stop_command_ends_the_mailbox_loop_with_exit_code_zero() {
    let h = harness();
    let mailbox_tx = h.mailbox_tx.clone();
    let generation = h.session.cancellation.current();
    let Harness { session, .. } = h;

    let run_handle = tokio::spawn(session.run());
    mailbox_tx.send(crate::message::Message::Stop { generation }).await.expect("send stop");
    assert_eq!(run_handle.await.expect("join"), 0);
}

#[tokio::test]
async fn reset_command_is_a_no_op() {
    let h = harness();
    let mailbox_tx = h.mailbox_tx.clone();
    let generation = h.session.cancellation.current();
    let Harness { session, mut dispatch_rx, .. } = h;

    let run_handle = tokio::spawn(session.run());
    mailbox_tx.send(crate::message::Message::Reset { generation }).await.expect("send reset");
    mailbox_tx.send(crate::message::Message::Stop { generation }).await.expect("send stop");

    assert_eq!(run_handle.await.expect("join"), 0);
    assert!(dispatch_rx.try_recv().is_err(), "Reset must never dispatch work");
}

#[tokio::test]
async fn ping_refreshes_the_heartbeat_window_while_armed() {
    let mut h = harness();
    transition::on_apply(&mut h.session, apply_request("dev0")).await;
    h.dispatch_rx.try_recv().expect("drain apply");
    transition::on_verif_completed(&mut h.session, true).await;
    assert!(h.session.state().heartbeat.is_armed());

    let mailbox_tx = h.mailbox_tx.clone();
    let generation = h.session.cancellation.current();
    let clock = h.clock.clone();
    let Harness { session, .. } = h;
    let run_handle = tokio::spawn(session.run());

    // Advance close to the 30s timeout, ping, then advance past where the
    // timeout would have fired had the ping not landed.
    clock.advance(Duration::from_secs(29));
    mailbox_tx.send(crate::message::Message::Ping { generation }).await.expect("send ping");
    tokio::time::sleep(Duration::from_millis(20)).await;
    clock.advance(Duration::from_secs(29));
    tokio::time::sleep(Duration::from_millis(20)).await;

    mailbox_tx.send(crate::message::Message::Stop { generation }).await.expect("send stop");
    assert_eq!(run_handle.await.expect("join"), 0);
}

// ---- Disconnect grace ----

#[tokio::test]
async fn disconnect_grace_elapsing_forces_a_revert() {
    let h = harness();
    let clock = h.clock.clone();
    let transport = h.transport.clone();
    let mailbox_tx = h.mailbox_tx.clone();
    let Harness { session, mut dispatch_rx, .. } = h;
    let run_handle = tokio::spawn(session.run());

    transport.set_connected(false);
    clock.advance(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let generation = match dispatch_rx.recv().await.expect("recover dispatched") {
        DispatchTask::Recover { token, .. } => token.expected(),
        other => panic!("unexpected task: {other:?}"),
    };

    mailbox_tx.send(crate::message::Message::Stop { generation }).await.expect("send stop");
    assert_eq!(run_handle.await.expect("join"), 0);
}

#[tokio::test]
async fn disconnect_grace_does_not_trigger_while_still_connected() {
    let h = harness();
    let clock = h.clock.clone();
    let mailbox_tx = h.mailbox_tx.clone();
    let generation = h.session.cancellation.current();
    let Harness { session, mut dispatch_rx, .. } = h;
    let run_handle = tokio::spawn(session.run());

    clock.advance(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(dispatch_rx.try_recv().is_err(), "a connected transport must never force a revert");

    mailbox_tx.send(crate::message::Message::Stop { generation }).await.expect("send stop");
    assert_eq!(run_handle.await.expect("join"), 0);
}
