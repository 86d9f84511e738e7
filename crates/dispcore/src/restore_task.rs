// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concrete [`RestoreTaskRegistrar`] wired by `main.rs`. The real scheduled
//! task (a Windows Task Scheduler entry that re-launches `dispcore --restore`
//! on next logon) is OS integration out of this crate's scope (spec §1); this
//! is the logging placeholder that stands in for it so the binary links and
//! runs end-to-end, the same role the teacher's `test_support.rs` fakes play
//! for backends it doesn't own either.

use tracing::debug;

use crate::backend::{BoxFuture, RestoreTaskRegistrar};

/// Installs/removes nothing; just logs. Swap for a real Task Scheduler
/// adapter once that OS integration exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRestoreTaskRegistrar;

impl RestoreTaskRegistrar for NoopRestoreTaskRegistrar {
    fn install(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {
            debug!("restore task install requested (no-op registrar)");
        })
    }

    fn remove(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {
            debug!("restore task remove requested (no-op registrar)");
        })
    }
}

#[cfg(test)]
#[path = "restore_task_tests.rs"]
mod tests;
