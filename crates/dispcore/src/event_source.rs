// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event Source Adapter (spec §4.7, C7): translates raw OS display signals
//! into `DisplayEvent` mailbox messages stamped with the current
//! generation, coalescing identical consecutive events so a noisy signal
//! source can never apply backpressure to the state machine.
//!
//! [`DisplayEventSource`] is the external collaborator (spec §1): on
//! Windows this is a `WM_DEVICECHANGE`/`WM_WTSSESSION_CHANGE` listener with
//! its own debounce worker thread, the same shape as the teacher corpus's
//! `lg-service` device-notification service. This crate only adapts
//! whatever the source yields into the mailbox; it does not implement the
//! OS listener itself.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::debug;

use crate::message::{CancellationSource, DisplayEventKind, Message};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw OS display/power/hotplug signal source (spec §1 "Explicitly out of
/// scope"). `next_event` returns `None` once the source is permanently
/// closed (e.g. the listener thread exited).
pub trait DisplayEventSource: Send + 'static {
    fn next_event(&mut self) -> BoxFuture<'_, Option<DisplayEventKind>>;
}

/// Drives a [`DisplayEventSource`], coalesces consecutive duplicates, and
/// posts `Message::DisplayEvent` into the state machine's mailbox.
pub struct EventSourceAdapter<S> {
    source: S,
    cancellation: CancellationSource,
    mailbox: mpsc::Sender<Message>,
}

impl<S: DisplayEventSource> EventSourceAdapter<S> {
    pub fn new(source: S, cancellation: CancellationSource, mailbox: mpsc::Sender<Message>) -> Self {
        Self { source, cancellation, mailbox }
    }

    /// Run until the source closes or the mailbox is dropped. Intended to
    /// be spawned as its own task so it never shares a worker with the
    /// state machine.
    pub async fn run(mut self) {
        let mut last_kind: Option<DisplayEventKind> = None;
        while let Some(kind) = self.source.next_event().await {
            if last_kind == Some(kind) {
                debug!(?kind, "coalescing identical consecutive display event");
                continue;
            }
            last_kind = Some(kind);

            let generation = self.cancellation.current();
            if self.mailbox.send(Message::DisplayEvent { generation, kind }).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "event_source_tests.rs"]
mod tests;
