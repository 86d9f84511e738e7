// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by the dispatcher, state machine, and ledger
//! (spec §7). One enum, several projections — the same shape as the
//! teacher's `error::ErrorCode`, here projected onto retry/terminal policy
//! instead of HTTP/gRPC status codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome kind for an Apply/Verify/Recover/RecoverValidate attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum OperationStatus {
    #[error("operation succeeded")]
    Ok,
    #[error("display backend could not be initialized")]
    HelperUnavailable,
    #[error("request is semantically invalid")]
    InvalidRequest,
    #[error("apply succeeded but OS state does not match")]
    VerificationFailed,
    #[error("backend needs the virtual display driver cycled")]
    NeedsVirtualDisplayReset,
    #[error("transient failure, safe to retry")]
    Retryable,
    #[error("unexpected failure")]
    Fatal,
}

impl OperationStatus {
    /// True for outcomes that end the current command's retry loop and
    /// produce an immediate, final reply to the caller.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::HelperUnavailable | Self::InvalidRequest | Self::Fatal)
    }

    /// True when a recovery tier should be abandoned rather than retried
    /// (spec §4.4 Recover step 5: `should_skip_tier`).
    pub fn should_skip_tier(self) -> bool {
        matches!(self, Self::InvalidRequest | Self::Fatal)
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }

    pub fn is_verification_failed(self) -> bool {
        matches!(self, Self::VerificationFailed)
    }
}

/// Raw classification returned by [`crate::backend::DisplayBackend::apply`],
/// before the Apply operation (spec §4.4 step 7) maps it onto
/// [`OperationStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendApplyResult {
    Ok,
    ApiTemporarilyUnavailable,
    PersistenceSaveFailed,
    DevicePrepFailed,
    PrimaryDevicePrepFailed,
    DisplayModePrepFailed,
    HdrStatePrepFailed,
    InvalidRequest,
    HelperUnavailable,
    /// Any backend failure not named above collapses to `Fatal`.
    Other(String),
}

impl From<BackendApplyResult> for OperationStatus {
    fn from(result: BackendApplyResult) -> Self {
        match result {
            BackendApplyResult::Ok => OperationStatus::Ok,
            BackendApplyResult::ApiTemporarilyUnavailable
            | BackendApplyResult::PersistenceSaveFailed => OperationStatus::Retryable,
            BackendApplyResult::DevicePrepFailed
            | BackendApplyResult::PrimaryDevicePrepFailed
            | BackendApplyResult::DisplayModePrepFailed
            | BackendApplyResult::HdrStatePrepFailed => OperationStatus::VerificationFailed,
            BackendApplyResult::InvalidRequest => OperationStatus::InvalidRequest,
            BackendApplyResult::HelperUnavailable => OperationStatus::HelperUnavailable,
            BackendApplyResult::Other(_) => OperationStatus::Fatal,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
