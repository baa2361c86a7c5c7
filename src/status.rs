//! Controller status snapshots and mount state classification
//!
//! The controller reports its full state as newline-separated `key=value`
//! text. A snapshot is parsed fresh on every poll and discarded after use;
//! nothing is cached or diffed between polls.

use std::collections::HashMap;

use serde::{Serialize, Serializer};

use crate::sky::Site;

/// One parsed controller status response.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    fields: HashMap<String, String>,
}

impl StatusSnapshot {
    /// Parse a line-oriented `key=value` response body.
    ///
    /// Lines without an `=` separator are skipped.
    pub fn parse(body: &str) -> Self {
        let mut fields = HashMap::new();
        for line in body.lines() {
            let line = line.trim();
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self { fields }
    }

    /// Raw field lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Boolean field; absent or unrecognized values read as false.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true") | Some("True") | Some("1"))
    }

    /// Numeric field; absent or malformed values read as None.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key)?.parse().ok()
    }

    pub fn is_connected(&self) -> bool {
        self.flag("mount.is_connected")
    }

    pub fn is_slewing(&self) -> bool {
        self.flag("mount.is_slewing")
    }

    pub fn is_tracking(&self) -> bool {
        self.flag("mount.is_tracking")
    }

    /// True when both axes report a completed home find.
    pub fn axes_homed(&self) -> bool {
        self.flag("mount.axis0.is_homed") && self.flag("mount.axis1.is_homed")
    }

    /// True when both axes are powered.
    pub fn axes_enabled(&self) -> bool {
        self.flag("mount.axis0.is_enabled") && self.flag("mount.axis1.is_enabled")
    }

    /// True when either axis reports a nonzero commanded velocity.
    ///
    /// The controller does not assert its slewing flag while homing, so this
    /// is the only observable evidence that a home find is in progress.
    pub fn axes_moving(&self) -> bool {
        [
            "mount.axis0.setpoint_velocity_degs_per_sec",
            "mount.axis1.setpoint_velocity_degs_per_sec",
        ]
        .iter()
        .any(|key| self.number(key).map(|v| v != 0.0).unwrap_or(false))
    }

    pub fn ra_degs(&self) -> Option<f64> {
        self.number("mount.ra_j2000_degs")
    }

    pub fn dec_degs(&self) -> Option<f64> {
        self.number("mount.dec_j2000_degs")
    }

    pub fn altitude_degs(&self) -> Option<f64> {
        self.number("mount.altitude_degs")
    }

    pub fn azimuth_degs(&self) -> Option<f64> {
        self.number("mount.azimuth_degs")
    }

    pub fn offset_ra_degs(&self) -> Option<f64> {
        self.number("mount.offset_ra_arcsec").map(|v| v / 3600.0)
    }

    pub fn offset_dec_degs(&self) -> Option<f64> {
        self.number("mount.offset_dec_arcsec").map(|v| v / 3600.0)
    }

    pub fn version(&self) -> Option<&str> {
        self.get("pwi4.version")
    }

    /// Observing site reported by the controller, if all fields are present.
    pub fn site(&self) -> Option<Site> {
        Some(Site {
            latitude_deg: self.number("site.latitude_degs")?,
            longitude_deg: self.number("site.longitude_degs")?,
            elevation_m: self.number("site.height_meters")?,
        })
    }
}

/// Normalized mount state derived from one snapshot.
///
/// The ordering is deliberate: every state at or above `Parked` has a
/// connected, homed mount behind it and therefore valid position data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MountState {
    Disabled = 0,
    NotHomed = 1,
    Homing = 2,
    Parked = 3,
    Slewing = 4,
    Stopped = 5,
    Tracking = 6,
}

impl MountState {
    pub fn label(self) -> &'static str {
        match self {
            MountState::Disabled => "DISABLED",
            MountState::NotHomed => "NOT HOMED",
            MountState::Homing => "HOMING",
            MountState::Parked => "PARKED",
            MountState::Slewing => "SLEWING",
            MountState::Stopped => "STOPPED",
            MountState::Tracking => "TRACKING",
        }
    }

    /// Whether position fields are trustworthy in this state.
    pub fn has_position(self) -> bool {
        self >= MountState::Parked
    }
}

impl std::fmt::Display for MountState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for MountState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Derive the mount state from a snapshot.
///
/// `homing` is the process-local flag set while a home find is in flight;
/// it cannot be derived from the snapshot alone. The homed/powered checks
/// must stay ahead of the motion checks: an unhomed or unpowered mount can
/// transiently report slewing-like fields.
pub fn classify(snapshot: Option<&StatusSnapshot>, homing: bool) -> MountState {
    let Some(snapshot) = snapshot else {
        return MountState::Disabled;
    };
    if !snapshot.is_connected() {
        return MountState::Disabled;
    }
    if homing && snapshot.axes_moving() {
        return MountState::Homing;
    }
    if !snapshot.axes_homed() {
        return MountState::NotHomed;
    }
    if !snapshot.axes_enabled() {
        return MountState::Parked;
    }
    if snapshot.is_slewing() {
        return MountState::Slewing;
    }
    if snapshot.is_tracking() {
        return MountState::Tracking;
    }
    MountState::Stopped
}
