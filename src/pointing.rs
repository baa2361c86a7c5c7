//! Soft-limit validation of target coordinates
//!
//! Targets are checked against the configured hour-angle and declination
//! limits before any motion is issued. Limits are operational boundaries
//! enforced in software; the controller's own hardware limits are separate.

use tracing::warn;

use crate::config::Config;
use crate::error::CommandResult;

/// Wrap an hour angle in degrees into the range (-180, 180].
///
/// +12h and -12h name the same physical direction; both wrap to +180 so a
/// symmetric limit pair evaluates them identically.
pub fn wrap_ha_degrees(ha_deg: f64) -> f64 {
    let wrapped = ha_deg.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Check a target against the configured soft limits.
///
/// The hour angle is derived from the supplied sidereal time; it is checked
/// first and short-circuits the declination check.
pub fn validate_pointing(
    config: &Config,
    lst_hours: f64,
    ra_deg: f64,
    dec_deg: f64,
) -> CommandResult {
    let ha_deg = wrap_ha_degrees(lst_hours * 15.0 - ra_deg);
    let [ha_min, ha_max] = config.ha_soft_limits;
    if ha_deg < ha_min || ha_deg > ha_max {
        warn!(
            ra_deg,
            dec_deg, ha_deg, ha_min, ha_max, "target rejected: outside HA limits"
        );
        return CommandResult::OutsideHALimits;
    }

    let [dec_min, dec_max] = config.dec_soft_limits;
    if dec_deg < dec_min || dec_deg > dec_max {
        warn!(
            ra_deg,
            dec_deg, dec_min, dec_max, "target rejected: outside Dec limits"
        );
        return CommandResult::OutsideDecLimits;
    }

    CommandResult::Succeeded
}
