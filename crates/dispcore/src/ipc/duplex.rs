// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory [`Transport`] over [`tokio::io::duplex`], used by tests and by
//! any host platform without a named-pipe backend. Writes are serialized
//! through a bounded outbox flushed by a dedicated task; reads run on a
//! second dedicated task — the concurrency shape spec §4.1 prescribes for
//! the real transport too.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::frame::{read_frame, write_frame, Frame, FrameError};
use super::transport::{BoxFuture, Transport};

const OUTBOX_CAPACITY: usize = 64;
const INBOX_CAPACITY: usize = 64;

pub struct DuplexTransport {
    outbox_tx: mpsc::Sender<Frame>,
    inbox_rx: Mutex<mpsc::Receiver<Frame>>,
    connected: Arc<AtomicBool>,
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
}

impl DuplexTransport {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = split(stream);
        Self::from_halves(read_half, write_half)
    }

    fn from_halves<R, W>(mut reader: R, mut writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox_tx, mut outbox_rx) = mpsc::channel::<Frame>(OUTBOX_CAPACITY);
        let (inbox_tx, inbox_rx) = mpsc::channel::<Frame>(INBOX_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));

        let writer_connected = Arc::clone(&connected);
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbox_rx.recv().await {
                if write_frame(&mut writer, &frame).await.is_err() {
                    writer_connected.store(false, Ordering::Release);
                    break;
                }
            }
        });

        let reader_connected = Arc::clone(&connected);
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(frame) => {
                        if inbox_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        reader_connected.store(false, Ordering::Release);
                        break;
                    }
                }
            }
        });

        Self { outbox_tx, inbox_rx: Mutex::new(inbox_rx), connected, writer_task, reader_task }
    }

    /// Build a connected pair of transports wired to each other — the
    /// in-memory stand-in for a dialed named pipe in tests.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(8192);
        (Self::new(a), Self::new(b))
    }
}

impl Transport for DuplexTransport {
    fn send(&self, frame: Frame) -> BoxFuture<'_, Result<(), FrameError>> {
        Box::pin(async move { self.outbox_tx.send(frame).await.map_err(|_| FrameError::Disconnected) })
    }

    fn receive(&self, timeout: Duration) -> BoxFuture<'_, Result<Frame, FrameError>> {
        Box::pin(async move {
            let mut inbox = self.inbox_rx.lock().await;
            match tokio::time::timeout(timeout, inbox.recv()).await {
                Ok(Some(frame)) => Ok(frame),
                Ok(None) => Err(FrameError::Disconnected),
                Err(_) => Err(FrameError::Timeout),
            }
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.writer_task.abort();
            self.reader_task.abort();
            self.connected.store(false, Ordering::Release);
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[path = "duplex_tests.rs"]
mod tests;
