// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Transport` trait and the self-healing reconnect wrapper (spec §4.1).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::frame::{Frame, FrameError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A bidirectional, message-oriented channel carrying framed messages
/// between the controller and the helper (spec §4.1 "Operations exposed").
pub trait Transport: Send + Sync + 'static {
    fn send(&self, frame: Frame) -> BoxFuture<'_, Result<(), FrameError>>;

    fn receive(&self, timeout: Duration) -> BoxFuture<'_, Result<Frame, FrameError>>;

    fn disconnect(&self) -> BoxFuture<'_, ()>;

    fn is_connected(&self) -> bool;
}

/// Rebuilds the underlying transport via `creator` and retries once when
/// the wrapped channel reports `BrokenPipe`/`Disconnected` (spec §4.1
/// "Self-healing wrapper"). Construction failure is surfaced unchanged.
pub struct SelfHealingTransport<F> {
    inner: Mutex<Box<dyn Transport>>,
    creator: F,
    connected: AtomicBool,
}

impl<F> SelfHealingTransport<F>
where
    F: Fn() -> Result<Box<dyn Transport>, FrameError> + Send + Sync + 'static,
{
    pub fn new(initial: Box<dyn Transport>, creator: F) -> Self {
        Self { inner: Mutex::new(initial), creator, connected: AtomicBool::new(true) }
    }

    fn is_broken(err: &FrameError) -> bool {
        matches!(err, FrameError::Disconnected | FrameError::Io(_))
    }

    async fn rebuild(&self) -> Result<(), FrameError> {
        let fresh = (self.creator)()?;
        *self.inner.lock().await = fresh;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }
}

impl<F> Transport for SelfHealingTransport<F>
where
    F: Fn() -> Result<Box<dyn Transport>, FrameError> + Send + Sync + 'static,
{
    fn send(&self, frame: Frame) -> BoxFuture<'_, Result<(), FrameError>> {
        Box::pin(async move {
            let first = self.inner.lock().await.send(frame.clone()).await;
            match first {
                Err(e) if Self::is_broken(&e) => {
                    self.connected.store(false, Ordering::Release);
                    self.rebuild().await?;
                    self.inner.lock().await.send(frame).await
                }
                other => other,
            }
        })
    }

    fn receive(&self, timeout: Duration) -> BoxFuture<'_, Result<Frame, FrameError>> {
        Box::pin(async move {
            let first = self.inner.lock().await.receive(timeout).await;
            match first {
                Err(e) if Self::is_broken(&e) => {
                    self.connected.store(false, Ordering::Release);
                    self.rebuild().await?;
                    self.inner.lock().await.receive(timeout).await
                }
                other => other,
            }
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.inner.lock().await.disconnect().await;
            self.connected.store(false, Ordering::Release);
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Lets a shared transport (e.g. one handed to both the router and the
/// reply sink) stand in wherever `T: Transport` is expected.
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, frame: Frame) -> BoxFuture<'_, Result<(), FrameError>> {
        self.as_ref().send(frame)
    }

    fn receive(&self, timeout: Duration) -> BoxFuture<'_, Result<Frame, FrameError>> {
        self.as_ref().receive(timeout)
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        self.as_ref().disconnect()
    }

    fn is_connected(&self) -> bool {
        self.as_ref().is_connected()
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
