//! Mount command orchestration
//!
//! `Mount` composes the controller client, the command serializer, the state
//! classifier and the soft-limit gate into the public command set. Every
//! command returns one value from the closed `CommandResult` taxonomy;
//! failures never cross the RPC boundary as errors.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::client::{Controller, PwiClient};
use crate::config::Config;
use crate::error::{CommandResult, ControllerError};
use crate::point::run_to_state;
use crate::pointing::{validate_pointing, wrap_ha_degrees};
use crate::serializer::CommandSerializer;
use crate::sky::SkyModel;
use crate::status::{classify, MountState, StatusSnapshot};

/// One waypoint of a `track_radec_path` trajectory.
#[derive(Debug, Clone, Copy)]
pub struct PathPoint {
    pub utc: DateTime<Utc>,
    pub ra_j2000_deg: f64,
    pub dec_j2000_deg: f64,
}

/// Normalized status returned from `report_status`.
///
/// `date` is ISO-8601 UTC with microseconds. Controller fields are present
/// only while connected; position fields only for states at or above
/// `Parked`. All angles are degrees except `lst` (hours).
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub date: String,
    pub state: MountState,
    pub state_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwi_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_elevation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lst: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ra: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ha: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub az: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_ra: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_dec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moon_separation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sun_separation: Option<f64>,
}

/// The mount control daemon core.
///
/// Owns the command slot, the force-stop flag and the process-local homing
/// flag; all shared mutable state lives here and is passed to the command
/// handlers by `&self`.
pub struct Mount {
    config: Config,
    controller: Arc<dyn Controller>,
    sky: Arc<dyn SkyModel>,
    serializer: CommandSerializer,
    homing: AtomicBool,
}

impl Mount {
    pub fn new(config: Config, controller: Arc<dyn Controller>, sky: Arc<dyn SkyModel>) -> Self {
        Self {
            config,
            controller,
            sky,
            serializer: CommandSerializer::new(),
            homing: AtomicBool::new(false),
        }
    }

    /// Build a mount talking HTTP to the controller named in the config.
    pub fn with_http_controller(
        config: Config,
        sky: Arc<dyn SkyModel>,
    ) -> Result<Self, ControllerError> {
        let client = PwiClient::new(
            &config.controller_host,
            config.controller_port,
            config.controller_timeout(),
        )?;
        Ok(Self::new(config, Arc::new(client), sky))
    }

    fn authorized(&self, caller: IpAddr) -> bool {
        if self.config.control_addrs.contains(&caller) {
            return true;
        }
        warn!(%caller, "command rejected: caller is not in the control list");
        false
    }

    async fn poll(&self) -> (Option<StatusSnapshot>, MountState) {
        let snapshot = match self.controller.status().await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(%err, "status poll failed");
                None
            }
        };
        let state = classify(snapshot.as_ref(), self.homing.load(Ordering::SeqCst));
        (snapshot, state)
    }

    /// Precondition shared by all motion commands.
    fn motion_gate(&self, state: MountState) -> Option<CommandResult> {
        match state {
            MountState::Disabled => Some(CommandResult::MountNotInitialized),
            MountState::NotHomed | MountState::Homing => Some(CommandResult::MountNotHomed),
            _ => None,
        }
    }

    async fn set_axis_power(&self, enable: bool) -> Result<(), ControllerError> {
        let command = if enable { "mount/enable" } else { "mount/disable" };
        for axis in 0..2u8 {
            self.controller
                .exchange(command, &[("axis", axis.to_string())])
                .await?;
        }
        Ok(())
    }

    /// Issue an alt/az slew and poll until it settles in `expected`.
    ///
    /// Powers the axes up first when the mount is parked.
    async fn run_motion(
        &self,
        state: MountState,
        command: &str,
        params: &[(&str, String)],
        expected: MountState,
    ) -> CommandResult {
        if state == MountState::Parked {
            if let Err(err) = self.set_axis_power(true).await {
                error!(%err, "failed to power axes before motion");
                return CommandResult::Failed;
            }
        }
        run_to_state(
            self.controller.as_ref(),
            &self.serializer,
            command,
            params,
            expected,
            self.config.slew_poll_interval(),
            self.config.slew_timeout(),
            false,
        )
        .await
    }

    /// Connect the controller to the mount hardware.
    pub async fn initialize(&self, caller: IpAddr) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        let Some(_slot) = self.serializer.try_acquire() else {
            return CommandResult::Blocked;
        };

        let snapshot = match self.controller.status().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(%err, "controller is unreachable");
                return CommandResult::MountControlNotRunning;
            }
        };
        if classify(Some(&snapshot), false) != MountState::Disabled {
            return CommandResult::MountNotDisabled;
        }

        if let Err(err) = self.controller.exchange("mount/connect", &[]).await {
            error!(%err, "connect command failed");
            return CommandResult::Failed;
        }
        let (_, state) = self.poll().await;
        if state == MountState::Disabled {
            error!("mount still reports disconnected after connect");
            return CommandResult::Failed;
        }
        info!("mount initialized");
        CommandResult::Succeeded
    }

    /// Run the per-axis home finding procedure.
    ///
    /// Axes are powered up if needed and the prior power state is restored
    /// afterwards.
    pub async fn find_homes(&self, caller: IpAddr) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        let Some(_slot) = self.serializer.try_acquire() else {
            return CommandResult::Blocked;
        };

        let (snapshot, state) = self.poll().await;
        if state == MountState::Disabled {
            return CommandResult::MountNotInitialized;
        }
        let was_enabled = snapshot.map(|s| s.axes_enabled()).unwrap_or(false);
        if !was_enabled {
            if let Err(err) = self.set_axis_power(true).await {
                error!(%err, "failed to power axes for homing");
                return CommandResult::Failed;
            }
        }

        self.homing.store(true, Ordering::SeqCst);
        let result = run_to_state(
            self.controller.as_ref(),
            &self.serializer,
            "mount/find_home",
            &[],
            MountState::Stopped,
            self.config.home_poll_interval(),
            self.config.home_timeout(),
            true,
        )
        .await;
        self.homing.store(false, Ordering::SeqCst);

        if !was_enabled {
            if let Err(err) = self.set_axis_power(false).await {
                error!(%err, "failed to restore axis power state after homing");
                if result == CommandResult::Succeeded {
                    return CommandResult::Failed;
                }
            }
        }
        if result == CommandResult::Succeeded {
            info!("home finding complete");
        }
        result
    }

    /// Disable the axes and disconnect the controller from the mount.
    pub async fn shutdown(&self, caller: IpAddr) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        let Some(_slot) = self.serializer.try_acquire() else {
            return CommandResult::Blocked;
        };

        let (_, state) = self.poll().await;
        if state == MountState::Disabled {
            return CommandResult::MountNotInitialized;
        }
        if state != MountState::Parked {
            if let Err(err) = self.set_axis_power(false).await {
                error!(%err, "failed to disable axes during shutdown");
                return CommandResult::Failed;
            }
        }
        if let Err(err) = self.controller.exchange("mount/disconnect", &[]).await {
            error!(%err, "disconnect command failed");
            return CommandResult::Failed;
        }
        info!("mount shut down");
        CommandResult::Succeeded
    }

    /// Interrupt any in-flight command and stop the mount.
    ///
    /// Never takes the command slot; safe to call with nothing in flight.
    /// Returns only after the interrupted command (if any) has exited.
    pub async fn stop(&self, caller: IpAddr) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        let (_, state) = self.poll().await;
        if state == MountState::Disabled {
            return CommandResult::MountNotInitialized;
        }

        info!("stop requested");
        self.serializer.signal_stop();
        if let Err(err) = self.controller.exchange("mount/stop", &[]).await {
            warn!(%err, "stop command exchange failed");
        }
        self.serializer.wait_idle().await;
        self.serializer.clear_stop();
        CommandResult::Succeeded
    }

    /// Slew to a horizontal position and stop there.
    pub async fn slew_altaz(&self, caller: IpAddr, alt_deg: f64, az_deg: f64) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        if !alt_deg.is_finite() || !az_deg.is_finite() {
            warn!(alt_deg, az_deg, "slew rejected: non-finite target");
            return CommandResult::Failed;
        }
        let Some(_slot) = self.serializer.try_acquire() else {
            return CommandResult::Blocked;
        };

        let (snapshot, state) = self.poll().await;
        if let Some(reject) = self.motion_gate(state) {
            return reject;
        }
        let Some(site) = snapshot.as_ref().and_then(|s| s.site()) else {
            error!("controller status is missing site information");
            return CommandResult::Failed;
        };

        let now = Utc::now();
        let (ra_deg, dec_deg) = self.sky.horizontal_to_equatorial(alt_deg, az_deg, now, &site);
        let lst = self.sky.local_sidereal_time(now, &site);
        let check = validate_pointing(&self.config, lst, ra_deg, dec_deg);
        if check != CommandResult::Succeeded {
            return check;
        }

        info!(alt_deg, az_deg, "slewing to alt/az target");
        self.run_motion(
            state,
            "mount/goto_alt_az",
            &[
                ("alt_degs", alt_deg.to_string()),
                ("az_degs", az_deg.to_string()),
            ],
            MountState::Stopped,
        )
        .await
    }

    /// Slew to an equatorial position and stop there.
    pub async fn slew_radec(&self, caller: IpAddr, ra_deg: f64, dec_deg: f64) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        if !ra_deg.is_finite() || !dec_deg.is_finite() {
            warn!(ra_deg, dec_deg, "slew rejected: non-finite target");
            return CommandResult::Failed;
        }
        let Some(_slot) = self.serializer.try_acquire() else {
            return CommandResult::Blocked;
        };
        self.slew_equatorial(ra_deg, dec_deg).await
    }

    /// Slew to an hour-angle/declination position and stop there.
    pub async fn slew_hadec(&self, caller: IpAddr, ha_deg: f64, dec_deg: f64) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        if !ha_deg.is_finite() || !dec_deg.is_finite() {
            warn!(ha_deg, dec_deg, "slew rejected: non-finite target");
            return CommandResult::Failed;
        }
        let Some(_slot) = self.serializer.try_acquire() else {
            return CommandResult::Blocked;
        };

        let (snapshot, state) = self.poll().await;
        if let Some(reject) = self.motion_gate(state) {
            return reject;
        }
        let Some(site) = snapshot.as_ref().and_then(|s| s.site()) else {
            error!("controller status is missing site information");
            return CommandResult::Failed;
        };

        let now = Utc::now();
        let lst = self.sky.local_sidereal_time(now, &site);
        let ra_deg = (lst * 15.0 - ha_deg).rem_euclid(360.0);
        let check = validate_pointing(&self.config, lst, ra_deg, dec_deg);
        if check != CommandResult::Succeeded {
            return check;
        }

        let (alt_deg, az_deg) = self.sky.equatorial_to_horizontal(ra_deg, dec_deg, now, &site);
        info!(ha_deg, dec_deg, alt_deg, az_deg, "slewing to ha/dec target");
        self.run_motion(
            state,
            "mount/goto_alt_az",
            &[
                ("alt_degs", alt_deg.to_string()),
                ("az_degs", az_deg.to_string()),
            ],
            MountState::Stopped,
        )
        .await
    }

    /// Slew to an equatorial position and track it at the sidereal rate.
    pub async fn track_radec(&self, caller: IpAddr, ra_deg: f64, dec_deg: f64) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        if !ra_deg.is_finite() || !dec_deg.is_finite() {
            warn!(ra_deg, dec_deg, "track rejected: non-finite target");
            return CommandResult::Failed;
        }
        let Some(_slot) = self.serializer.try_acquire() else {
            return CommandResult::Blocked;
        };

        let (snapshot, state) = self.poll().await;
        if let Some(reject) = self.motion_gate(state) {
            return reject;
        }
        let Some(site) = snapshot.as_ref().and_then(|s| s.site()) else {
            error!("controller status is missing site information");
            return CommandResult::Failed;
        };

        let now = Utc::now();
        let lst = self.sky.local_sidereal_time(now, &site);
        let check = validate_pointing(&self.config, lst, ra_deg, dec_deg);
        if check != CommandResult::Succeeded {
            return check;
        }

        info!(ra_deg, dec_deg, "slewing to equatorial target for tracking");
        self.run_motion(
            state,
            "mount/goto_ra_dec_j2000",
            &[
                ("ra_degs", ra_deg.to_string()),
                ("dec_degs", dec_deg.to_string()),
            ],
            MountState::Tracking,
        )
        .await
    }

    /// Offset the current pointing by the given equatorial deltas.
    ///
    /// While tracking this is a single relative offset exchange; otherwise
    /// the absolute target is computed from the current position and slewed
    /// to like any other target.
    pub async fn offset_radec(&self, caller: IpAddr, d_ra_deg: f64, d_dec_deg: f64) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        if !d_ra_deg.is_finite() || !d_dec_deg.is_finite() {
            warn!(d_ra_deg, d_dec_deg, "offset rejected: non-finite delta");
            return CommandResult::Failed;
        }
        let Some(_slot) = self.serializer.try_acquire() else {
            return CommandResult::Blocked;
        };

        let (snapshot, state) = self.poll().await;
        if let Some(reject) = self.motion_gate(state) {
            return reject;
        }

        if state == MountState::Tracking {
            let params = [
                ("ra_add_arcsec", (d_ra_deg * 3600.0).to_string()),
                ("dec_add_arcsec", (d_dec_deg * 3600.0).to_string()),
            ];
            return match self.controller.exchange("mount/offset", &params).await {
                Ok(_) => CommandResult::Succeeded,
                Err(err) => {
                    error!(%err, "offset command failed");
                    CommandResult::Failed
                }
            };
        }

        let target = snapshot
            .as_ref()
            .and_then(|s| Some((s.ra_degs()?, s.dec_degs()?, s.site()?)));
        let Some((ra_deg, dec_deg, site)) = target else {
            error!("controller status is missing position fields");
            return CommandResult::Failed;
        };
        let ra_deg = (ra_deg + d_ra_deg).rem_euclid(360.0);
        let dec_deg = dec_deg + d_dec_deg;

        let now = Utc::now();
        let lst = self.sky.local_sidereal_time(now, &site);
        let check = validate_pointing(&self.config, lst, ra_deg, dec_deg);
        if check != CommandResult::Succeeded {
            return check;
        }

        let (alt_deg, az_deg) = self.sky.equatorial_to_horizontal(ra_deg, dec_deg, now, &site);
        info!(d_ra_deg, d_dec_deg, "applying offset as an absolute slew");
        self.run_motion(
            state,
            "mount/goto_alt_az",
            &[
                ("alt_degs", alt_deg.to_string()),
                ("az_degs", az_deg.to_string()),
            ],
            MountState::Stopped,
        )
        .await
    }

    /// Slew to a named park position and power the axes down.
    pub async fn park(&self, caller: IpAddr, name: &str) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        let Some(_slot) = self.serializer.try_acquire() else {
            return CommandResult::Blocked;
        };

        // Reject unknown names before any controller exchange.
        let Some(position) = self.config.park_positions.get(name) else {
            warn!(name, "park rejected: unknown park position");
            return CommandResult::UnknownParkPosition;
        };

        let (_, state) = self.poll().await;
        if let Some(reject) = self.motion_gate(state) {
            return reject;
        }

        info!(name, alt_deg = position.alt, az_deg = position.az, "parking mount");
        let result = self
            .run_motion(
                state,
                "mount/goto_alt_az",
                &[
                    ("alt_degs", position.alt.to_string()),
                    ("az_degs", position.az.to_string()),
                ],
                MountState::Stopped,
            )
            .await;
        if result != CommandResult::Succeeded {
            return result;
        }

        if let Err(err) = self.set_axis_power(false).await {
            error!(%err, "failed to disable axes after park");
            return CommandResult::Failed;
        }
        info!(name, "mount parked");
        CommandResult::Succeeded
    }

    /// Follow a two-line-element satellite ephemeris.
    ///
    /// Soft limits are not checked: low-altitude satellite passes are a
    /// supported use case and target selection is the caller's
    /// responsibility.
    pub async fn track_tle(
        &self,
        caller: IpAddr,
        line1: &str,
        line2: &str,
        line3: &str,
    ) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        let Some(_slot) = self.serializer.try_acquire() else {
            return CommandResult::Blocked;
        };

        let (_, state) = self.poll().await;
        if let Some(reject) = self.motion_gate(state) {
            return reject;
        }

        info!(name = line1, "following TLE ephemeris");
        let params = [
            ("line1", line1.to_string()),
            ("line2", line2.to_string()),
            ("line3", line3.to_string()),
        ];
        match self.controller.exchange("mount/follow_tle", &params).await {
            Ok(_) => CommandResult::Succeeded,
            Err(err) => {
                error!(%err, "follow_tle command failed");
                CommandResult::Failed
            }
        }
    }

    /// Follow a timestamped equatorial path.
    ///
    /// As with `track_tle`, soft limits are intentionally not enforced.
    pub async fn track_radec_path(&self, caller: IpAddr, points: &[PathPoint]) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        let Some(_slot) = self.serializer.try_acquire() else {
            return CommandResult::Blocked;
        };
        if points.is_empty() {
            warn!("path rejected: no points supplied");
            return CommandResult::Failed;
        }

        let (_, state) = self.poll().await;
        if let Some(reject) = self.motion_gate(state) {
            return reject;
        }

        info!(points = points.len(), "following equatorial path");
        if let Err(err) = self.controller.exchange("mount/radecpath/new", &[]).await {
            error!(%err, "radecpath/new command failed");
            return CommandResult::Failed;
        }
        for point in points {
            let params = [
                ("utc", format_utc(point.utc)),
                ("ra_j2000_degs", point.ra_j2000_deg.to_string()),
                ("dec_j2000_degs", point.dec_j2000_deg.to_string()),
            ];
            if let Err(err) = self
                .controller
                .exchange("mount/radecpath/add_point", &params)
                .await
            {
                error!(%err, "radecpath/add_point command failed");
                return CommandResult::Failed;
            }
        }
        if let Err(err) = self.controller.exchange("mount/radecpath/apply", &[]).await {
            error!(%err, "radecpath/apply command failed");
            return CommandResult::Failed;
        }
        CommandResult::Succeeded
    }

    /// Forward a calibration point to the controller's pointing model.
    pub async fn add_pointing_model_point(
        &self,
        caller: IpAddr,
        ra_j2000_deg: f64,
        dec_j2000_deg: f64,
    ) -> CommandResult {
        if !self.authorized(caller) {
            return CommandResult::InvalidControlIP;
        }
        let Some(_slot) = self.serializer.try_acquire() else {
            return CommandResult::Blocked;
        };

        let (_, state) = self.poll().await;
        if state != MountState::Tracking {
            warn!(observed = state.label(), "model point rejected: mount is not tracking");
            return CommandResult::Failed;
        }

        let params = [
            ("ra_j2000_degs", ra_j2000_deg.to_string()),
            ("dec_j2000_degs", dec_j2000_deg.to_string()),
        ];
        match self
            .controller
            .exchange("mount/model/add_point", &params)
            .await
        {
            Ok(_) => CommandResult::Succeeded,
            Err(err) => {
                error!(%err, "model/add_point command failed");
                CommandResult::Failed
            }
        }
    }

    /// Liveness check; touches neither the controller nor the command slot.
    ///
    /// Deliberately exempt from caller authorization so hosts outside the
    /// control list can probe that the daemon is up.
    pub async fn ping(&self) -> CommandResult {
        CommandResult::Succeeded
    }

    /// Poll once and report the normalized mount status.
    ///
    /// Requires no authorization and never touches the command slot.
    pub async fn report_status(&self) -> StatusReport {
        let (snapshot, state) = self.poll().await;
        let now = Utc::now();
        let mut report = StatusReport {
            date: format_utc(now),
            state,
            state_label: state.label(),
            pwi_version: None,
            site_latitude: None,
            site_longitude: None,
            site_elevation: None,
            lst: None,
            ra: None,
            dec: None,
            ha: None,
            alt: None,
            az: None,
            offset_ra: None,
            offset_dec: None,
            moon_separation: None,
            sun_separation: None,
        };

        let Some(snapshot) = snapshot else {
            return report;
        };
        if !snapshot.is_connected() {
            return report;
        }

        report.pwi_version = snapshot.version().map(str::to_string);
        let Some(site) = snapshot.site() else {
            return report;
        };
        report.site_latitude = Some(site.latitude_deg);
        report.site_longitude = Some(site.longitude_deg);
        report.site_elevation = Some(site.elevation_m);
        let lst = self.sky.local_sidereal_time(now, &site);
        report.lst = Some(lst);

        if state.has_position() {
            report.ra = snapshot.ra_degs();
            report.dec = snapshot.dec_degs();
            report.alt = snapshot.altitude_degs();
            report.az = snapshot.azimuth_degs();
            report.offset_ra = snapshot.offset_ra_degs();
            report.offset_dec = snapshot.offset_dec_degs();
            if let (Some(ra), Some(dec)) = (report.ra, report.dec) {
                report.ha = Some(wrap_ha_degrees(lst * 15.0 - ra));
                report.moon_separation = Some(self.sky.moon_separation_deg(ra, dec, now));
                report.sun_separation = Some(self.sky.sun_separation_deg(ra, dec, now));
            }
        }
        report
    }

    /// Shared body of `slew_radec`; the command slot must already be held.
    async fn slew_equatorial(&self, ra_deg: f64, dec_deg: f64) -> CommandResult {
        let (snapshot, state) = self.poll().await;
        if let Some(reject) = self.motion_gate(state) {
            return reject;
        }
        let Some(site) = snapshot.as_ref().and_then(|s| s.site()) else {
            error!("controller status is missing site information");
            return CommandResult::Failed;
        };

        let now = Utc::now();
        let lst = self.sky.local_sidereal_time(now, &site);
        let check = validate_pointing(&self.config, lst, ra_deg, dec_deg);
        if check != CommandResult::Succeeded {
            return check;
        }

        let (alt_deg, az_deg) = self.sky.equatorial_to_horizontal(ra_deg, dec_deg, now, &site);
        info!(ra_deg, dec_deg, alt_deg, az_deg, "slewing to equatorial target");
        self.run_motion(
            state,
            "mount/goto_alt_az",
            &[
                ("alt_degs", alt_deg.to_string()),
                ("az_degs", az_deg.to_string()),
            ],
            MountState::Stopped,
        )
        .await
    }
}

fn format_utc(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::sky::Site;

    const CONTROL: &str = "10.2.6.10";
    const OUTSIDER: &str = "10.2.99.99";

    fn control() -> IpAddr {
        CONTROL.parse().unwrap()
    }

    fn outsider() -> IpAddr {
        OUTSIDER.parse().unwrap()
    }

    fn config() -> Config {
        let value = serde_json::json!({
            "daemon": "mount_daemon",
            "log_name": "mountd",
            "control_addrs": [CONTROL],
            "controller_host": "127.0.0.1",
            "controller_port": 8220,
            "controller_timeout": 5.0,
            "slew_timeout": 120.0,
            "slew_poll_interval": 0.5,
            "home_timeout": 300.0,
            "home_poll_interval": 1.0,
            "ha_soft_limits": [-90.0, 90.0],
            "dec_soft_limits": [-45.0, 90.0],
            "park_positions": {
                "stow": {"desc": "Stow position", "alt": 50.0, "az": 0.0}
            }
        });
        Config::from_json(&value.to_string()).unwrap()
    }

    /// Degenerate geometry: HA stays at the target's distance from the
    /// meridian and declination maps straight to altitude. Good enough for
    /// gating tests without real astronomy.
    struct FlatSky {
        lst_hours: f64,
    }

    impl SkyModel for FlatSky {
        fn local_sidereal_time(&self, _at: DateTime<Utc>, _site: &Site) -> f64 {
            self.lst_hours
        }

        fn horizontal_to_equatorial(
            &self,
            alt_deg: f64,
            _az_deg: f64,
            _at: DateTime<Utc>,
            _site: &Site,
        ) -> (f64, f64) {
            (self.lst_hours * 15.0, alt_deg)
        }

        fn equatorial_to_horizontal(
            &self,
            _ra_deg: f64,
            dec_deg: f64,
            _at: DateTime<Utc>,
            _site: &Site,
        ) -> (f64, f64) {
            (dec_deg, 0.0)
        }

        fn sun_separation_deg(&self, _ra: f64, _dec: f64, _at: DateTime<Utc>) -> f64 {
            90.0
        }

        fn moon_separation_deg(&self, _ra: f64, _dec: f64, _at: DateTime<Utc>) -> f64 {
            45.0
        }
    }

    #[derive(Clone)]
    struct FakeState {
        connected: bool,
        homed: bool,
        enabled: bool,
        slewing: bool,
        tracking: bool,
        homing_velocity: bool,
        // Status polls remaining until in-flight motion settles.
        polls_left: u32,
        settle_tracking: bool,
        settle_homed: bool,
        fail_all: bool,
    }

    /// Scripted controller: motion commands set in-flight flags that decay
    /// after a fixed number of status polls, or persist until a stop when
    /// `hold_motion` is set.
    struct FakeController {
        state: Mutex<FakeState>,
        commands: Mutex<Vec<String>>,
        motion_polls: u32,
        hold_motion: bool,
    }

    impl FakeController {
        fn new(state: FakeState) -> Self {
            Self {
                state: Mutex::new(state),
                commands: Mutex::new(Vec::new()),
                motion_polls: 3,
                hold_motion: false,
            }
        }

        fn ready() -> Self {
            Self::new(FakeState {
                connected: true,
                homed: true,
                enabled: true,
                slewing: false,
                tracking: false,
                homing_velocity: false,
                polls_left: 0,
                settle_tracking: false,
                settle_homed: false,
                fail_all: false,
            })
        }

        fn holding() -> Self {
            let mut fake = Self::ready();
            fake.hold_motion = true;
            fake
        }

        fn commands(&self) -> Vec<String> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .filter(|c| *c != "status")
                .cloned()
                .collect()
        }

        fn snapshot_text(state: &FakeState) -> String {
            let velocity = if state.homing_velocity { 2.5 } else { 0.0 };
            format!(
                "mount.is_connected={connected}\n\
                 mount.is_slewing={slewing}\n\
                 mount.is_tracking={tracking}\n\
                 mount.axis0.is_homed={homed}\n\
                 mount.axis1.is_homed={homed}\n\
                 mount.axis0.is_enabled={enabled}\n\
                 mount.axis1.is_enabled={enabled}\n\
                 mount.axis0.setpoint_velocity_degs_per_sec={velocity}\n\
                 mount.axis1.setpoint_velocity_degs_per_sec=0\n\
                 mount.ra_j2000_degs=120.0\n\
                 mount.dec_j2000_degs=20.0\n\
                 mount.altitude_degs=45.0\n\
                 mount.azimuth_degs=30.0\n\
                 mount.offset_ra_arcsec=3600\n\
                 mount.offset_dec_arcsec=-1800\n\
                 site.latitude_degs=28.76\n\
                 site.longitude_degs=-17.88\n\
                 site.height_meters=2332\n\
                 pwi4.version=4.0.34",
                connected = state.connected,
                slewing = state.slewing,
                tracking = state.tracking,
                homed = state.homed,
                enabled = state.enabled,
            )
        }
    }

    #[async_trait]
    impl Controller for FakeController {
        async fn exchange(
            &self,
            command: &str,
            _params: &[(&str, String)],
        ) -> Result<StatusSnapshot, ControllerError> {
            self.commands.lock().unwrap().push(command.to_string());
            let mut state = self.state.lock().unwrap();
            if state.fail_all {
                return Err(ControllerError::Status(500));
            }

            match command {
                "status" => {
                    if state.polls_left > 0 && !self.hold_motion {
                        state.polls_left -= 1;
                        if state.polls_left == 0 {
                            state.slewing = false;
                            state.homing_velocity = false;
                            state.tracking = state.settle_tracking;
                            if state.settle_homed {
                                state.homed = true;
                            }
                        }
                    }
                }
                "mount/connect" => state.connected = true,
                "mount/disconnect" => state.connected = false,
                "mount/enable" => state.enabled = true,
                "mount/disable" => state.enabled = false,
                "mount/goto_alt_az" | "mount/goto_ra_dec_j2000" => {
                    state.slewing = true;
                    state.tracking = false;
                    state.settle_tracking = command == "mount/goto_ra_dec_j2000";
                    state.settle_homed = false;
                    state.polls_left = self.motion_polls;
                }
                "mount/find_home" => {
                    state.homing_velocity = true;
                    state.settle_tracking = false;
                    state.settle_homed = true;
                    state.polls_left = self.motion_polls;
                }
                "mount/stop" => {
                    state.slewing = false;
                    state.tracking = false;
                    state.homing_velocity = false;
                    state.polls_left = 0;
                }
                _ => {}
            }
            Ok(StatusSnapshot::parse(&Self::snapshot_text(&state)))
        }
    }

    fn mount_with(fake: FakeController) -> (Arc<Mount>, Arc<FakeController>) {
        mount_with_config(fake, config())
    }

    fn mount_with_config(
        fake: FakeController,
        config: Config,
    ) -> (Arc<Mount>, Arc<FakeController>) {
        let controller = Arc::new(fake);
        let sky = Arc::new(FlatSky { lst_hours: 8.0 });
        let mount = Arc::new(Mount::new(config, controller.clone(), sky));
        (mount, controller)
    }

    #[tokio::test]
    async fn test_unauthorized_caller_is_rejected_before_any_exchange() {
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.slew_altaz(outsider(), 45.0, 120.0).await;
        assert_eq!(result, CommandResult::InvalidControlIP);
        assert!(fake.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_park_position_issues_no_exchange() {
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.park(control(), "unknown_name").await;
        assert_eq!(result, CommandResult::UnknownParkPosition);
        assert!(fake.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ping_always_succeeds() {
        let (mount, _) = mount_with(FakeController::ready());
        assert_eq!(mount.ping().await, CommandResult::Succeeded);
    }

    #[tokio::test]
    async fn test_initialize_is_rejected_on_second_call() {
        let fake = FakeController::ready();
        fake.state.lock().unwrap().connected = false;
        let (mount, _) = mount_with(fake);

        assert_eq!(mount.initialize(control()).await, CommandResult::Succeeded);
        assert_eq!(
            mount.initialize(control()).await,
            CommandResult::MountNotDisabled
        );
    }

    #[tokio::test]
    async fn test_initialize_reports_unreachable_controller() {
        let fake = FakeController::ready();
        fake.state.lock().unwrap().fail_all = true;
        let (mount, _) = mount_with(fake);
        assert_eq!(
            mount.initialize(control()).await,
            CommandResult::MountControlNotRunning
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slew_settles_and_succeeds() {
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.slew_altaz(control(), 45.0, 120.0).await;
        assert_eq!(result, CommandResult::Succeeded);
        assert!(fake.commands().contains(&"mount/goto_alt_az".to_string()));
    }

    #[tokio::test]
    async fn test_slew_from_disabled_mount_is_rejected() {
        let fake = FakeController::ready();
        fake.state.lock().unwrap().connected = false;
        let (mount, _) = mount_with(fake);
        assert_eq!(
            mount.slew_altaz(control(), 45.0, 120.0).await,
            CommandResult::MountNotInitialized
        );
    }

    #[tokio::test]
    async fn test_slew_from_unhomed_mount_is_rejected() {
        let fake = FakeController::ready();
        fake.state.lock().unwrap().homed = false;
        let (mount, _) = mount_with(fake);
        assert_eq!(
            mount.slew_altaz(control(), 45.0, 120.0).await,
            CommandResult::MountNotHomed
        );
    }

    #[tokio::test]
    async fn test_slew_outside_dec_limits_issues_no_motion() {
        // FlatSky maps altitude straight to declination; -50 breaches the
        // configured [-45, 90] window.
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.slew_altaz(control(), -50.0, 0.0).await;
        assert_eq!(result, CommandResult::OutsideDecLimits);
        assert!(!fake.commands().contains(&"mount/goto_alt_az".to_string()));
    }

    #[tokio::test]
    async fn test_slew_radec_outside_ha_limits_is_rejected() {
        // LST 8h = 120 degrees; RA 340 gives HA -220, wrapped to +140.
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.slew_radec(control(), 340.0, 20.0).await;
        assert_eq!(result, CommandResult::OutsideHALimits);
        assert!(!fake.commands().contains(&"mount/goto_alt_az".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slew_hadec_derives_ra_and_succeeds() {
        // LST 8h = 120 degrees; HA +30 puts the target at RA 90, well
        // inside the [-90, 90] HA window.
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.slew_hadec(control(), 30.0, 20.0).await;
        assert_eq!(result, CommandResult::Succeeded);
        assert!(fake.commands().contains(&"mount/goto_alt_az".to_string()));
    }

    #[tokio::test]
    async fn test_slew_hadec_outside_ha_limits_issues_no_motion() {
        // HA -100 derives RA 220; the round trip through the derived RA
        // must reproduce the requested hour angle and reject it.
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.slew_hadec(control(), -100.0, 20.0).await;
        assert_eq!(result, CommandResult::OutsideHALimits);
        assert!(!fake.commands().contains(&"mount/goto_alt_az".to_string()));
    }

    #[tokio::test]
    async fn test_non_finite_target_is_rejected() {
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.slew_radec(control(), f64::NAN, 20.0).await;
        assert_eq!(result, CommandResult::Failed);
        assert!(fake.commands.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_command_is_blocked_and_stop_interrupts() {
        let (mount, fake) = mount_with(FakeController::holding());

        let slew = {
            let mount = mount.clone();
            tokio::spawn(async move { mount.slew_altaz(control(), 45.0, 120.0).await })
        };
        // Let the slew take the slot and issue its motion command.
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            mount.slew_altaz(control(), 30.0, 90.0).await,
            CommandResult::Blocked
        );

        let stop_started = tokio::time::Instant::now();
        assert_eq!(mount.stop(control()).await, CommandResult::Succeeded);
        assert_eq!(slew.await.unwrap(), CommandResult::Failed);
        // Cancellation latency is bounded by one poll interval.
        assert!(stop_started.elapsed() <= Duration::from_millis(600));

        assert!(fake.commands().contains(&"mount/stop".to_string()));
        // The slot is free again after stop.
        assert_ne!(
            mount.slew_altaz(control(), 45.0, 120.0).await,
            CommandResult::Blocked
        );
    }

    #[tokio::test]
    async fn test_stop_with_nothing_in_flight_is_idempotent() {
        let (mount, _) = mount_with(FakeController::ready());
        assert_eq!(mount.stop(control()).await, CommandResult::Succeeded);
        assert_eq!(mount.stop(control()).await, CommandResult::Succeeded);
    }

    #[tokio::test]
    async fn test_stop_on_disabled_mount_is_rejected() {
        let fake = FakeController::ready();
        fake.state.lock().unwrap().connected = false;
        let (mount, _) = mount_with(fake);
        assert_eq!(
            mount.stop(control()).await,
            CommandResult::MountNotInitialized
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slew_timeout_stops_the_mount() {
        let short = {
            let mut c = config();
            c.slew_timeout = 2.0;
            c
        };
        let (mount, fake) = mount_with_config(FakeController::holding(), short);
        let result = mount.slew_altaz(control(), 45.0, 120.0).await;
        assert_eq!(result, CommandResult::Failed);
        assert!(fake.commands().contains(&"mount/stop".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_terminal_state_stops_the_mount() {
        let (mount, fake) = mount_with(FakeController::ready());
        // A tracking request that settles without tracking: flip the fake's
        // settle flag after the motion command has been issued.
        let result = {
            let mount = mount.clone();
            let fake = fake.clone();
            let task = tokio::spawn(async move { mount.track_radec(control(), 120.0, 20.0).await });
            tokio::time::sleep(Duration::from_millis(10)).await;
            fake.state.lock().unwrap().settle_tracking = false;
            task.await.unwrap()
        };
        assert_eq!(result, CommandResult::Failed);
        assert!(fake.commands().contains(&"mount/stop".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_radec_ends_tracking() {
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.track_radec(control(), 120.0, 20.0).await;
        assert_eq!(result, CommandResult::Succeeded);
        assert!(fake
            .commands()
            .contains(&"mount/goto_ra_dec_j2000".to_string()));
        assert!(fake.state.lock().unwrap().tracking);
    }

    #[tokio::test(start_paused = true)]
    async fn test_park_powers_down_after_settling() {
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.park(control(), "stow").await;
        assert_eq!(result, CommandResult::Succeeded);
        let commands = fake.commands();
        assert!(commands.contains(&"mount/goto_alt_az".to_string()));
        assert!(commands.contains(&"mount/disable".to_string()));
        assert!(!fake.state.lock().unwrap().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_park_from_parked_state_powers_up_first() {
        let fake = FakeController::ready();
        fake.state.lock().unwrap().enabled = false;
        let (mount, fake) = mount_with(fake);
        let result = mount.park(control(), "stow").await;
        assert_eq!(result, CommandResult::Succeeded);
        let commands = fake.commands();
        assert!(commands.contains(&"mount/enable".to_string()));
        assert!(commands.contains(&"mount/disable".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_homes_restores_prior_power_state() {
        let fake = FakeController::ready();
        {
            let mut state = fake.state.lock().unwrap();
            state.homed = false;
            state.enabled = false;
        }
        let (mount, fake) = mount_with(fake);
        let result = mount.find_homes(control()).await;
        assert_eq!(result, CommandResult::Succeeded);
        let state = fake.state.lock().unwrap();
        assert!(state.homed);
        assert!(!state.enabled);
    }

    #[tokio::test]
    async fn test_shutdown_disables_axes_and_disconnects() {
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.shutdown(control()).await;
        assert_eq!(result, CommandResult::Succeeded);
        let commands = fake.commands();
        assert!(commands.contains(&"mount/disable".to_string()));
        assert!(commands.contains(&"mount/disconnect".to_string()));
        assert!(!fake.state.lock().unwrap().connected);
    }

    #[tokio::test]
    async fn test_track_tle_bypasses_soft_limits() {
        // Limits so tight that any pointing target would be rejected.
        let mut tight = config();
        tight.ha_soft_limits = [0.0, 0.0];
        tight.dec_soft_limits = [0.0, 0.0];
        let (mount, fake) = mount_with_config(FakeController::ready(), tight);
        let result = mount
            .track_tle(control(), "ISS (ZARYA)", "1 25544U ...", "2 25544 ...")
            .await;
        assert_eq!(result, CommandResult::Succeeded);
        assert!(fake.commands().contains(&"mount/follow_tle".to_string()));
    }

    #[tokio::test]
    async fn test_track_radec_path_issues_the_full_sequence() {
        let (mount, fake) = mount_with(FakeController::ready());
        let points = [
            PathPoint {
                utc: Utc::now(),
                ra_j2000_deg: 120.0,
                dec_j2000_deg: 20.0,
            },
            PathPoint {
                utc: Utc::now(),
                ra_j2000_deg: 121.0,
                dec_j2000_deg: 20.5,
            },
        ];
        let result = mount.track_radec_path(control(), &points).await;
        assert_eq!(result, CommandResult::Succeeded);
        let commands = fake.commands();
        assert_eq!(
            commands,
            vec![
                "mount/radecpath/new",
                "mount/radecpath/add_point",
                "mount/radecpath/add_point",
                "mount/radecpath/apply",
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_path_is_rejected_without_exchanges() {
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.track_radec_path(control(), &[]).await;
        assert_eq!(result, CommandResult::Failed);
        assert!(fake.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offset_while_tracking_is_a_single_exchange() {
        let fake = FakeController::ready();
        fake.state.lock().unwrap().tracking = true;
        let (mount, fake) = mount_with(fake);
        let result = mount.offset_radec(control(), 0.1, -0.1).await;
        assert_eq!(result, CommandResult::Succeeded);
        let commands = fake.commands();
        assert!(commands.contains(&"mount/offset".to_string()));
        assert!(!commands.contains(&"mount/goto_alt_az".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offset_while_stopped_slews_to_absolute_target() {
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.offset_radec(control(), 1.0, 1.0).await;
        assert_eq!(result, CommandResult::Succeeded);
        let commands = fake.commands();
        assert!(commands.contains(&"mount/goto_alt_az".to_string()));
        assert!(!commands.contains(&"mount/offset".to_string()));
    }

    #[tokio::test]
    async fn test_offset_breaching_dec_limits_issues_no_motion() {
        // Snapshot declination is 20; +75 lands at 95, past the +90 limit.
        // A full-turn RA delta exercises the wrap without moving the target.
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.offset_radec(control(), 360.0, 75.0).await;
        assert_eq!(result, CommandResult::OutsideDecLimits);
        let commands = fake.commands();
        assert!(!commands.contains(&"mount/goto_alt_az".to_string()));
        assert!(!commands.contains(&"mount/offset".to_string()));
    }

    #[tokio::test]
    async fn test_model_point_requires_tracking() {
        let (mount, fake) = mount_with(FakeController::ready());
        let result = mount.add_pointing_model_point(control(), 120.0, 20.0).await;
        assert_eq!(result, CommandResult::Failed);
        assert!(!fake.commands().contains(&"mount/model/add_point".to_string()));

        fake.state.lock().unwrap().tracking = true;
        let result = mount.add_pointing_model_point(control(), 120.0, 20.0).await;
        assert_eq!(result, CommandResult::Succeeded);
        assert!(fake.commands().contains(&"mount/model/add_point".to_string()));
    }

    #[tokio::test]
    async fn test_report_status_enriches_positioned_states() {
        let (mount, _) = mount_with(FakeController::ready());
        let report = mount.report_status().await;
        assert_eq!(report.state, MountState::Stopped);
        assert_eq!(report.state_label, "STOPPED");
        assert_eq!(report.pwi_version.as_deref(), Some("4.0.34"));
        assert_eq!(report.ra, Some(120.0));
        assert_eq!(report.dec, Some(20.0));
        assert_eq!(report.lst, Some(8.0));
        // LST 8h = 120 degrees, RA 120: the mount sits on the meridian.
        assert_eq!(report.ha, Some(0.0));
        assert_eq!(report.offset_ra, Some(1.0));
        assert_eq!(report.offset_dec, Some(-0.5));
        assert_eq!(report.moon_separation, Some(45.0));
        assert_eq!(report.sun_separation, Some(90.0));
        assert!(report.date.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_report_status_omits_position_before_homing() {
        let fake = FakeController::ready();
        fake.state.lock().unwrap().homed = false;
        let (mount, _) = mount_with(fake);
        let report = mount.report_status().await;
        assert_eq!(report.state, MountState::NotHomed);
        // Connected fields are present, position fields are not.
        assert!(report.pwi_version.is_some());
        assert!(report.lst.is_some());
        assert!(report.ra.is_none());
        assert!(report.moon_separation.is_none());
    }

    #[tokio::test]
    async fn test_report_status_with_unreachable_controller() {
        let fake = FakeController::ready();
        fake.state.lock().unwrap().fail_all = true;
        let (mount, _) = mount_with(fake);
        let report = mount.report_status().await;
        assert_eq!(report.state, MountState::Disabled);
        assert!(report.pwi_version.is_none());
        assert!(report.ra.is_none());
    }
}
