//! Coordinate-frame collaborator boundary
//!
//! The daemon delegates all astronomy (sidereal time, equatorial/horizontal
//! transforms, solar-system body separations) to an external implementation
//! of `SkyModel`. Only the interface is defined here.

use chrono::{DateTime, Utc};

/// Observing site, as reported by the mount controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Site {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub elevation_m: f64,
}

/// Frame transforms and ephemerides needed by the command handlers.
///
/// All angles are in degrees except sidereal time, which is in hours.
pub trait SkyModel: Send + Sync {
    /// Local apparent sidereal time in hours.
    fn local_sidereal_time(&self, at: DateTime<Utc>, site: &Site) -> f64;

    /// Convert horizontal (alt, az) to equatorial (ra, dec).
    fn horizontal_to_equatorial(
        &self,
        alt_deg: f64,
        az_deg: f64,
        at: DateTime<Utc>,
        site: &Site,
    ) -> (f64, f64);

    /// Convert equatorial (ra, dec) to horizontal (alt, az).
    fn equatorial_to_horizontal(
        &self,
        ra_deg: f64,
        dec_deg: f64,
        at: DateTime<Utc>,
        site: &Site,
    ) -> (f64, f64);

    /// Angular separation between the target and the Sun, in degrees.
    fn sun_separation_deg(&self, ra_deg: f64, dec_deg: f64, at: DateTime<Utc>) -> f64;

    /// Angular separation between the target and the Moon, in degrees.
    fn moon_separation_deg(&self, ra_deg: f64, dec_deg: f64, at: DateTime<Utc>) -> f64;
}
