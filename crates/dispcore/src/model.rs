// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire/domain data model (spec §3): `ApplyRequest`, `Snapshot`, topology,
//! and device-prep hints. These types cross the IPC boundary as JSON, so
//! every field that is optional on the wire is `#[serde(default)]` and
//! unknown fields are ignored (no `deny_unknown_fields`) per spec §6.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type DeviceId = String;

/// A rational refresh rate, or a plain double — spec §3 "either a double
/// or a numerator/denominator rational".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RefreshRate {
    Hz(f64),
    Rational { numerator: u32, denominator: u32 },
}

impl RefreshRate {
    pub fn as_hz(self) -> f64 {
        match self {
            RefreshRate::Hz(hz) => hz,
            RefreshRate::Rational { numerator, denominator } => {
                if denominator == 0 {
                    0.0
                } else {
                    f64::from(numerator) / f64::from(denominator)
                }
            }
        }
    }

    /// Relative-tolerance comparison used by Verify (spec §4.4 step 3:
    /// "refresh rate compared to 1e-4 relative tolerance").
    pub fn approx_eq(self, other: RefreshRate) -> bool {
        let (a, b) = (self.as_hz(), other.as_hz());
        if a == 0.0 && b == 0.0 {
            return true;
        }
        ((a - b).abs() / a.max(b).max(f64::EPSILON)) <= 1e-4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HdrState {
    On,
    Off,
    Unspecified,
}

impl Default for HdrState {
    fn default() -> Self {
        HdrState::Unspecified
    }
}

/// Hint for how the backend should stage the primary device before applying
/// mode/HDR state (spec §3 `device_prep`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DevicePrep {
    NoOp,
    EnsureActive,
    EnsurePrimary,
    EnsureOnlyDisplay,
    VerifyOnly,
}

impl Default for DevicePrep {
    fn default() -> Self {
        DevicePrep::NoOp
    }
}

/// The primary device and its desired mode/HDR state (spec §3
/// `ApplyRequest.configuration`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub device_id: DeviceId,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub refresh_rate: Option<RefreshRate>,
    #[serde(default)]
    pub hdr_state: HdrState,
    #[serde(default)]
    pub device_prep: DevicePrep,
}

/// Ordered grouping of device IDs fused as one logical display.
pub type TopologyGroup = Vec<DeviceId>;

/// Ordered sequence of topology groups.
pub type Topology = Vec<TopologyGroup>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorPosition {
    pub device_id: DeviceId,
    pub point: Point,
}

/// The declarative configuration a caller wants realized (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    #[serde(default)]
    pub configuration: Option<DeviceConfiguration>,
    #[serde(default)]
    pub topology: Option<Topology>,
    #[serde(default)]
    pub monitor_positions: Vec<MonitorPosition>,
    #[serde(default)]
    pub hdr_blank: bool,
    #[serde(default)]
    pub prefer_golden_first: bool,
    #[serde(default)]
    pub virtual_layout: Option<String>,
}

impl ApplyRequest {
    /// `true` when this request targets a virtual display (spec §3
    /// `virtual_layout`: "non-empty means the request targets a virtual
    /// display").
    pub fn targets_virtual_display(&self) -> bool {
        self.virtual_layout.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// The device_id currently named by `configuration`, if any. Mutated in
    /// place by VirtualDisplayMonitoring retargeting (spec §3
    /// `current_request`).
    pub fn device_id(&self) -> Option<&str> {
        self.configuration.as_ref().map(|c| c.device_id.as_str())
    }

    /// Retarget the virtual display's device_id after the driver resolves
    /// its concrete identity.
    pub fn retarget_device_id(&mut self, device_id: DeviceId) {
        if let Some(configuration) = self.configuration.as_mut() {
            configuration.device_id = device_id;
        }
    }
}

/// Persisted as `{"w":...,"h":...,"num":...,"den":...}` (spec §6 snapshot
/// JSON file format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    #[serde(rename = "w")]
    pub width: u32,
    #[serde(rename = "h")]
    pub height: u32,
    #[serde(rename = "num")]
    pub refresh_rate_numerator: u32,
    #[serde(rename = "den")]
    pub refresh_rate_denominator: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotHdrState {
    On,
    Off,
    Absent,
}

/// Captured or persisted OS display state (spec §3 `Snapshot`). Equality is
/// structural over all four fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub topology: Topology,
    #[serde(default)]
    pub modes: BTreeMap<DeviceId, Mode>,
    #[serde(default, rename = "hdr")]
    pub hdr_states: BTreeMap<DeviceId, Option<SnapshotHdrState>>,
    #[serde(default, rename = "primary")]
    pub primary_device: DeviceId,
}

impl Snapshot {
    /// All device IDs this snapshot references, across topology, modes,
    /// HDR, and primary — used for the "availability of referenced
    /// devices" load precondition (spec §4.5 `load`).
    pub fn devices(&self) -> std::collections::BTreeSet<DeviceId> {
        let mut set = std::collections::BTreeSet::new();
        for group in &self.topology {
            for id in group {
                set.insert(id.clone());
            }
        }
        set.extend(self.modes.keys().cloned());
        set.extend(self.hdr_states.keys().cloned());
        if !self.primary_device.is_empty() {
            set.insert(self.primary_device.clone());
        }
        set
    }

    /// Remove every reference to a blacklisted device from all four fields
    /// (spec §4.5 `save`).
    pub fn filter_blacklist(&mut self, blacklist: &std::collections::BTreeSet<DeviceId>) {
        if blacklist.is_empty() {
            return;
        }
        for group in &mut self.topology {
            group.retain(|id| !blacklist.contains(id));
        }
        self.topology.retain(|group| !group.is_empty());
        self.modes.retain(|id, _| !blacklist.contains(id));
        self.hdr_states.retain(|id, _| !blacklist.contains(id));
        if blacklist.contains(&self.primary_device) {
            self.primary_device.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.topology.is_empty() && self.modes.is_empty()
    }
}

/// The three snapshot tiers (spec §3 `SnapshotTier`). At most one snapshot
/// per tier exists at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotTier {
    Current,
    Previous,
    Golden,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
