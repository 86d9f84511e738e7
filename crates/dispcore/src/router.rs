// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command Router (spec §4.2, C2): parses each inbound frame into exactly
//! one typed command, stamps it with the generation live at parse time, and
//! posts it to the state machine's mailbox. Malformed frames are logged and
//! dropped — they never block the frames behind them.
//!
//! Grounded on the teacher's `transport::ws_msg` tagged `ClientMessage` enum
//! (parse → typed variant) and `transport::handler`'s "parse → call shared
//! fn" shape, adapted from a `serde(tag=...)` JSON protocol to this crate's
//! length-prefixed binary one, where the tag is the frame's `MsgType` byte
//! instead of a JSON field.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ipc::{Frame, FrameError, MsgType, Transport};
use crate::message::{CancellationSource, ExcludeDevices, Message};
use crate::model::ApplyRequest;

/// How long the router blocks waiting for the next frame before looping
/// back to check for shutdown. Not a protocol timeout — just a poll period.
pub const ROUTER_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Parse one wire frame into a mailbox [`Message`], stamped with
/// `cancellation`'s current generation (spec §4.2). Returns `None` only for
/// a malformed body; the deprecated `Reset` slot (spec §6 `0x03`) is still
/// posted as a [`Message::Reset`] for the state machine to no-op on.
pub fn parse_frame(frame: &Frame, cancellation: &CancellationSource) -> Option<Message> {
    let generation = cancellation.current();
    match frame.msg_type {
        MsgType::Apply => match serde_json::from_slice::<ApplyRequest>(&frame.body) {
            Ok(request) => Some(Message::Apply { generation, request }),
            Err(err) => {
                warn!(%err, "dropping malformed Apply frame");
                None
            }
        },
        MsgType::Revert => Some(Message::Revert { generation }),
        MsgType::Reset => {
            debug!("deprecated Reset frame (0x03) received, posting as a no-op");
            Some(Message::Reset { generation })
        }
        MsgType::ExportGolden => {
            parse_exclude(&frame.body).map(|exclude| Message::ExportGolden { generation, exclude })
        }
        MsgType::SnapshotCurrent => {
            parse_exclude(&frame.body).map(|exclude| Message::SnapshotCurrent { generation, exclude })
        }
        MsgType::Ping => Some(Message::Ping { generation }),
        MsgType::Stop => Some(Message::Stop { generation }),
    }
}

/// `ExportGolden`/`SnapshotCurrent` bodies may be empty (spec §6: "or
/// empty"), meaning no exclusions.
fn parse_exclude(body: &[u8]) -> Option<ExcludeDevices> {
    if body.is_empty() {
        return Some(ExcludeDevices::default());
    }
    match serde_json::from_slice(body) {
        Ok(exclude) => Some(exclude),
        Err(err) => {
            warn!(%err, "dropping malformed exclude-devices frame");
            None
        }
    }
}

/// Drives a [`Transport`], parsing inbound frames and posting them to the
/// state machine's mailbox until the transport reports an unrecoverable
/// error or the mailbox is dropped.
pub struct Router<T> {
    transport: T,
    cancellation: CancellationSource,
    mailbox: mpsc::Sender<Message>,
}

impl<T: Transport> Router<T> {
    pub fn new(transport: T, cancellation: CancellationSource, mailbox: mpsc::Sender<Message>) -> Self {
        Self { transport, cancellation, mailbox }
    }

    /// Run until the transport disconnects, a protocol error desyncs the
    /// stream, or the mailbox receiver is dropped. Intended to be spawned
    /// as its own task, independent of the state-machine worker.
    pub async fn run(self) {
        loop {
            match self.transport.receive(ROUTER_RECEIVE_TIMEOUT).await {
                Ok(frame) => match parse_frame(&frame, &self.cancellation) {
                    Some(message) => {
                        if self.mailbox.send(message).await.is_err() {
                            break;
                        }
                    }
                    None => continue,
                },
                Err(FrameError::Timeout) => continue,
                Err(err) => {
                    warn!(%err, "ipc transport error, stopping router");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
