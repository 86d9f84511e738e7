// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI/env configuration, built on the teacher's `clap::Parser` + `env = ...`
//! convention (spec §6 "CLI surface").

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

fn default_state_dir() -> PathBuf {
    dirs_state_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(target_os = "windows")]
fn dirs_state_dir() -> Option<PathBuf> {
    std::env::var_os("PROGRAMDATA").map(|dir| PathBuf::from(dir).join("dispcore"))
}

#[cfg(not(target_os = "windows"))]
fn dirs_state_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/state")))
        .map(|base| base.join("dispcore"))
}

/// Display-configuration supervisor: applies, verifies, and reverts a
/// requested display topology on behalf of a streaming server (spec §1).
#[derive(Debug, Parser)]
#[command(name = "dispcore", version, about)]
pub struct Config {
    /// Base name for the anonymous-pipe handshake. Generated if omitted.
    #[arg(long, env = "DISPCORE_PIPE_NAME")]
    pub pipe_name: Option<String>,

    /// Directory holding `current.json`/`previous.json`/`golden.json`.
    #[arg(long, env = "DISPCORE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Boot-time recovery pass: validate the persisted snapshots and exit
    /// without starting the session loop.
    #[arg(long, default_value_t = false)]
    pub restore: bool,

    /// Log format: `json` or `text`.
    #[arg(long, env = "DISPCORE_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level: `trace`..`error`.
    #[arg(long, env = "DISPCORE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Heartbeat timeout in seconds (spec §4.6).
    #[arg(long, env = "DISPCORE_HEARTBEAT_TIMEOUT", default_value = "30")]
    pub heartbeat_timeout_secs: u64,

    /// Virtual-display reset cooldown in seconds (spec §4.6).
    #[arg(long, env = "DISPCORE_VD_RESET_COOLDOWN", default_value = "30")]
    pub vd_reset_cooldown_secs: u64,

    /// IPC disconnect grace period in seconds before a forced revert
    /// (spec §4.6 `DisconnectGrace`).
    #[arg(long, env = "DISPCORE_DISCONNECT_GRACE", default_value = "15")]
    pub disconnect_grace_secs: u64,
}

impl Config {
    /// `state_dir`, falling back to the platform app-data directory
    /// (spec §6 "Persistent state layout").
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(default_state_dir)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn vd_reset_cooldown(&self) -> Duration {
        Duration::from_secs(self.vd_reset_cooldown_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs)
    }

    /// Reject log levels `tracing_subscriber::EnvFilter` can't parse before
    /// committing to a run, rather than silently falling back at init time.
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.log_format.as_str(), "json" | "text") {
            return Err(format!("invalid --log-format {:?}: must be json or text", self.log_format));
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            return Err(format!("invalid --log-level {:?}", self.log_level));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
