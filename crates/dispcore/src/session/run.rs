// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! [`SessionState`] (the mutable fields owned by the single state-machine
//! worker) and [`Session`] (the construction-time dependencies plus the
//! mailbox `tokio::select!` loop).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{DisplayBackend, RestoreTaskRegistrar, VirtualDisplayDriver};
use crate::clock::Clock;
use crate::dispatcher::DispatchTask;
use crate::ipc::Transport;
use crate::ledger::SnapshotLedger;
use crate::message::{CancellationSource, Message};
use crate::model::{ApplyRequest, DeviceId, Snapshot, Topology};
use crate::policy::{ApplyPolicy, DebouncedTrigger, DisconnectGrace, HeartbeatMonitor};

use super::transition;
use super::{ReplySink, SessionConfig};

/// How often the mailbox loop polls the heartbeat monitor while armed
/// (spec §4.6 "a periodic tick"). Not itself a timeout — just the poll
/// granularity; the 30 s window lives in [`HeartbeatMonitor`].
pub const HEARTBEAT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// How often the mailbox loop polls the transport's connectivity to drive
/// [`DisconnectGrace`] (spec §4.6).
pub const DISCONNECT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// The session's place in the apply/verify/recover/revert lifecycle
/// (spec §3 `state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Waiting,
    InProgress,
    Verification,
    Recovery,
    RecoveryValidation,
    EventLoop,
    VirtualDisplayMonitoring,
}

/// Mutable fields tracked across iterations of the mailbox loop (spec §3
/// "Session state"). Everything here is plain data; the behavior lives in
/// [`transition`].
pub struct SessionState {
    pub phase: State,
    pub current_request: Option<ApplyRequest>,
    pub expected_topology: Option<Topology>,
    pub recovery_snapshot: Option<Snapshot>,
    pub apply_attempt: u32,
    pub apply_result_sent: bool,
    pub recovery_armed: bool,
    pub snapshot_blacklist: BTreeSet<DeviceId>,
    pub last_vd_reset: Option<Instant>,
    pub vd_restart_debounce: DebouncedTrigger,
    pub heartbeat: HeartbeatMonitor,
    pub disconnect_grace: DisconnectGrace,
    transport_was_connected: bool,
}

impl SessionState {
    pub fn new(heartbeat_timeout: Duration, disconnect_grace: Duration) -> Self {
        Self {
            phase: State::Waiting,
            current_request: None,
            expected_topology: None,
            recovery_snapshot: None,
            apply_attempt: 1,
            apply_result_sent: false,
            recovery_armed: false,
            snapshot_blacklist: BTreeSet::new(),
            last_vd_reset: None,
            vd_restart_debounce: DebouncedTrigger::new(transition::VD_RESTART_DEBOUNCE),
            heartbeat: HeartbeatMonitor::new(heartbeat_timeout),
            disconnect_grace: DisconnectGrace::new(disconnect_grace),
            transport_was_connected: true,
        }
    }
}

/// Core session worker: owns the mutable [`SessionState`] and drives the
/// single-consumer mailbox (spec §4.3 "Mailbox discipline").
pub struct Session {
    pub(super) backend: Arc<dyn DisplayBackend>,
    pub(super) vd_driver: Arc<dyn VirtualDisplayDriver>,
    pub(super) restore: Arc<dyn RestoreTaskRegistrar>,
    pub(super) ledger: Arc<SnapshotLedger>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) policy: ApplyPolicy,
    pub(super) cancellation: CancellationSource,
    pub(super) dispatch_tx: mpsc::Sender<DispatchTask>,
    pub(super) reply_sink: Arc<dyn ReplySink>,
    transport: Arc<dyn Transport>,
    mailbox_rx: mpsc::Receiver<Message>,
    state: SessionState,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        cancellation: CancellationSource,
        dispatch_tx: mpsc::Sender<DispatchTask>,
        mailbox_rx: mpsc::Receiver<Message>,
    ) -> Self {
        let state = SessionState::new(config.heartbeat_timeout, config.disconnect_grace);
        Self {
            backend: config.backend,
            vd_driver: config.vd_driver,
            restore: config.restore,
            ledger: config.ledger,
            clock: config.clock,
            policy: config.policy,
            cancellation,
            dispatch_tx,
            reply_sink: config.reply_sink,
            transport: config.transport,
            mailbox_rx,
            state,
        }
    }

    #[cfg(test)]
    pub(super) fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drive the mailbox until a `Stop` command or a successful recovery
    /// validation ends the process (spec §7 "Only `RecoverValidate(ok)` or
    /// explicit `Stop` ends the process"). Returns the process exit code.
    pub async fn run(mut self) -> i32 {
        loop {
            let heartbeat_armed = self.state.heartbeat.is_armed();
            tokio::select! {
                message = self.mailbox_rx.recv() => {
                    match message {
                        Some(message) => {
                            if let Some(exit_code) = self.handle(message).await {
                                return exit_code;
                            }
                        }
                        None => {
                            info!("mailbox closed with no producers left, exiting");
                            return 0;
                        }
                    }
                }

                _ = self.clock.sleep(HEARTBEAT_POLL_INTERVAL), if heartbeat_armed => {
                    if self.state.heartbeat.tick(self.clock.now()) {
                        debug!("heartbeat timeout");
                        let generation = self.cancellation.current();
                        if let Some(exit_code) = self
                            .handle(Message::HeartbeatTimeout { generation })
                            .await
                        {
                            return exit_code;
                        }
                    }
                }

                _ = self.clock.sleep(DISCONNECT_POLL_INTERVAL) => {
                    self.poll_disconnect_grace().await;
                }
            }
        }
    }

    /// Edge-detect the transport's connectivity and drive
    /// [`DisconnectGrace`] from it (spec §4.6): arm on the disconnect edge,
    /// disarm on reconnect, and force a revert once the grace elapses.
    async fn poll_disconnect_grace(&mut self) {
        let connected = self.transport.is_connected();
        let now = self.clock.now();

        if connected && !self.state.transport_was_connected {
            self.state.disconnect_grace.on_reconnect();
        } else if !connected && self.state.transport_was_connected {
            self.state.disconnect_grace.on_disconnect(now);
        }
        self.state.transport_was_connected = connected;

        if !connected && self.state.disconnect_grace.should_trigger(now) {
            warn!("ipc disconnect grace elapsed, forcing revert");
            transition::on_revert(self).await;
        }
    }

    /// Generation check (spec §4.3 "Generation check") then dispatch to the
    /// matching transition function. Returns `Some(exit_code)` when the
    /// process should stop.
    async fn handle(&mut self, message: Message) -> Option<i32> {
        if message.generation() != self.cancellation.current() {
            debug!(?message, "discarding stale message");
            return None;
        }

        match message {
            Message::Apply { request, .. } => {
                transition::on_apply(self, request).await;
                None
            }
            Message::Revert { .. } => {
                transition::on_revert(self).await;
                None
            }
            Message::Disarm { .. } => {
                transition::on_disarm(self).await;
                None
            }
            Message::ExportGolden { exclude, .. } => {
                transition::on_export_golden(self, exclude).await;
                None
            }
            Message::SnapshotCurrent { exclude, .. } => {
                transition::on_snapshot_current(self, exclude).await;
                None
            }
            Message::Reset { .. } => {
                debug!("reset command received, no-op");
                None
            }
            Message::Ping { .. } => {
                self.state.heartbeat.ping(self.clock.now());
                None
            }
            Message::Stop { .. } => {
                info!("stop command received, exiting");
                Some(0)
            }
            Message::ApplyCompleted { outcome, .. } => {
                transition::on_apply_completed(self, outcome).await;
                None
            }
            Message::VerifCompleted { ok, .. } => {
                transition::on_verif_completed(self, ok).await;
                None
            }
            Message::RecoverCompleted { outcome, .. } => {
                transition::on_recover_completed(self, outcome).await;
                None
            }
            Message::RecoverValidCompleted { ok, .. } => {
                transition::on_recover_valid_completed(self, ok).await
            }
            Message::DisplayEvent { kind, .. } => {
                transition::on_display_event(self, kind).await;
                None
            }
            Message::HeartbeatTimeout { .. } => {
                transition::on_heartbeat_timeout(self).await;
                None
            }
        }
    }
}

impl Session {
    pub(super) fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }
}
