// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State Machine (spec §4.3, C3): the session struct, its mailbox
//! `tokio::select!` loop, and the extracted per-message transition
//! functions. Split the way the teacher splits `session/{mod,run,transition}`:
//! this file carries the construction-time bag and the outbound-reply
//! plumbing, `run.rs` carries the mutable state and the loop, `transition.rs`
//! carries the sixteen independently-testable side-effect functions.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::backend::{BoxFuture, DisplayBackend, RestoreTaskRegistrar, VirtualDisplayDriver};
use crate::clock::Clock;
use crate::error::OperationStatus;
use crate::ipc::{Frame, MsgType, Transport};
use crate::ledger::SnapshotLedger;
use crate::policy::ApplyPolicy;

pub mod run;
pub mod transition;

pub use run::{Session, SessionState, State};

/// One reply the state machine may post back over the transport (spec §7
/// "the state machine fires at most one Apply-result reply per Apply
/// command... Verification results are separately reportable").
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    ApplyResult { status: OperationStatus },
    VerificationResult { ok: bool },
}

/// Where the state machine sends [`Reply`] values. A trait rather than a
/// bare `Transport` reference so tests can assert on emitted replies
/// without standing up a real framed channel (see DESIGN.md decision on
/// outbound reply wire encoding).
pub trait ReplySink: Send + Sync + 'static {
    fn send(&self, reply: Reply) -> BoxFuture<'_, ()>;
}

/// Encodes a [`Reply`] as a JSON body inside a `Frame` tagged with
/// `MsgType::Apply` (the byte of the command the reply answers — neither
/// reply kind gets a byte of its own in spec §6's wire table).
pub struct TransportReplySink<T> {
    transport: Arc<T>,
}

impl<T> TransportReplySink<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }
}

impl<T: Transport> ReplySink for TransportReplySink<T> {
    fn send(&self, reply: Reply) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let body = match serde_json::to_vec(&reply) {
                Ok(body) => body,
                Err(err) => {
                    warn!(%err, "failed to serialize reply");
                    return;
                }
            };
            if let Err(err) = self.transport.send(Frame::new(MsgType::Apply, body)).await {
                warn!(%err, "failed to send reply frame");
            }
        })
    }
}

/// Construction-time dependencies for a [`Session`], bundled the way the
/// teacher bundles `SessionConfig` for its own `Session::new` — everything
/// here is a runtime object the session needs but cannot derive from
/// `crate::config::Config` alone.
pub struct SessionConfig {
    pub backend: Arc<dyn DisplayBackend>,
    pub vd_driver: Arc<dyn VirtualDisplayDriver>,
    pub restore: Arc<dyn RestoreTaskRegistrar>,
    pub ledger: Arc<SnapshotLedger>,
    pub clock: Arc<dyn Clock>,
    pub policy: ApplyPolicy,
    pub reply_sink: Arc<dyn ReplySink>,
    pub heartbeat_timeout: Duration,
    /// Polled by the mailbox loop to drive [`crate::policy::DisconnectGrace`]
    /// (spec §4.6): the same transport the router reads frames from.
    pub transport: Arc<dyn Transport>,
    pub disconnect_grace: Duration,
}

#[cfg(test)]
#[path = "../session_tests.rs"]
mod tests;
