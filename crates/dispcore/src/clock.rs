// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Injectable monotonic clock.
//!
//! Every cooldown/debounce/heartbeat computation goes through this trait
//! instead of calling `Instant::now()` directly (spec §9 "Time"), so tests
//! can drive the 30s VD-reset cooldown, the 30s heartbeat window, and the
//! 250ms debounce window with a [`FakeClock`] instead of real wall-clock
//! delay.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

pub type BoxSleep = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Source of monotonic time and sleep, injected at construction.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Sleep until this clock's `now()` reaches `deadline`.
    fn sleep_until(&self, deadline: Instant) -> BoxSleep;

    fn sleep(&self, duration: Duration) -> BoxSleep {
        self.sleep_until(self.now() + duration)
    }
}

/// Real wall-clock time, backed by Tokio's timer wheel.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) -> BoxSleep {
        Box::pin(async move {
            let now = Instant::now();
            if deadline > now {
                tokio::time::sleep(deadline - now).await;
            }
        })
    }
}

struct FakeClockInner {
    base: Instant,
    offset: Mutex<Duration>,
    notify: Notify,
}

/// Deterministic virtual clock. `now()` is `base + offset`; [`advance`]
/// moves `offset` forward and wakes any task parked in `sleep_until`.
///
/// Unlike `tokio::time::pause`, this is a local object with no process-wide
/// effect, so it composes with real timers elsewhere in the same test.
#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<FakeClockInner>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FakeClockInner {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
                notify: Notify::new(),
            }),
        }
    }

    /// Move virtual time forward by `by` and wake any pending sleepers.
    pub fn advance(&self, by: Duration) {
        let mut offset = match self.inner.offset.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *offset += by;
        drop(offset);
        self.inner.notify.notify_waiters();
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        let offset = match self.inner.offset.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        };
        self.inner.base + offset
    }

    fn sleep_until(&self, deadline: Instant) -> BoxSleep {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            loop {
                let now = {
                    let offset = match inner.offset.lock() {
                        Ok(g) => *g,
                        Err(poisoned) => *poisoned.into_inner(),
                    };
                    inner.base + offset
                };
                if now >= deadline {
                    return;
                }
                let notified = inner.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().await;
            }
        })
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
