// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::{Duration, Instant};

use crate::error::OperationStatus;

/// Bounded-attempt apply/retry policy and the virtual-display reset
/// cooldown (spec §4.6 `ApplyPolicy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub vd_reset_cooldown: Duration,
}

impl Default for ApplyPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(300),
            vd_reset_cooldown: Duration::from_secs(30),
        }
    }
}

/// What the state machine should do after an `ApplyCompleted` with status
/// `NeedsVirtualDisplayReset` (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdResetDecision {
    ResetVirtualDisplay,
    Proceed,
}

impl ApplyPolicy {
    /// `attempt < max_attempts` (spec §4.6).
    pub fn can_retry_apply(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// `ResetVirtualDisplay` iff `status` is `NeedsVirtualDisplayReset`,
    /// the request targeted a virtual display, and the cooldown has
    /// elapsed since `last_reset` (spec §4.6, §8 boundary behaviors).
    pub fn maybe_reset_virtual_display(
        &self,
        status: OperationStatus,
        virtual_requested: bool,
        last_reset: Option<Instant>,
        now: Instant,
    ) -> VdResetDecision {
        if status != OperationStatus::NeedsVirtualDisplayReset || !virtual_requested {
            return VdResetDecision::Proceed;
        }
        let cooldown_elapsed =
            last_reset.map_or(true, |at| now.saturating_duration_since(at) >= self.vd_reset_cooldown);
        if cooldown_elapsed {
            VdResetDecision::ResetVirtualDisplay
        } else {
            VdResetDecision::Proceed
        }
    }
}

#[cfg(test)]
#[path = "apply_policy_tests.rs"]
mod tests;
