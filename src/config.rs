//! Daemon configuration parsed from a JSON file
//!
//! The file is validated on load; the parsed `Config` is immutable for the
//! process lifetime.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context};
use serde::Deserialize;

/// A named safe resting position.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParkPosition {
    pub desc: String,
    pub alt: f64,
    pub az: f64,
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Daemon identity name, used for logging context only.
    pub daemon: String,
    /// Logging channel name.
    pub log_name: String,
    /// Callers allowed to issue control commands.
    pub control_addrs: Vec<IpAddr>,
    pub controller_host: String,
    pub controller_port: u16,
    /// Per-exchange HTTP timeout, seconds.
    pub controller_timeout: f64,
    pub slew_timeout: f64,
    pub slew_poll_interval: f64,
    pub home_timeout: f64,
    pub home_poll_interval: f64,
    /// Hour-angle soft limits `[min, max]`, degrees.
    pub ha_soft_limits: [f64; 2],
    /// Declination soft limits `[min, max]`, degrees.
    pub dec_soft_limits: [f64; 2],
    pub park_positions: HashMap<String, ParkPosition>,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse and validate a configuration document.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(raw).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (name, seconds) in [
            ("controller_timeout", self.controller_timeout),
            ("slew_timeout", self.slew_timeout),
            ("slew_poll_interval", self.slew_poll_interval),
            ("home_timeout", self.home_timeout),
            ("home_poll_interval", self.home_poll_interval),
        ] {
            ensure!(seconds > 0.0, "{name} must be positive");
        }

        let [ha_min, ha_max] = self.ha_soft_limits;
        ensure!(
            (-180.0..=180.0).contains(&ha_min) && (-180.0..=180.0).contains(&ha_max),
            "ha_soft_limits must be within [-180, 180] degrees"
        );
        ensure!(ha_min <= ha_max, "ha_soft_limits must be ordered [min, max]");

        let [dec_min, dec_max] = self.dec_soft_limits;
        ensure!(
            (-90.0..=90.0).contains(&dec_min) && (-90.0..=90.0).contains(&dec_max),
            "dec_soft_limits must be within [-90, 90] degrees"
        );
        ensure!(dec_min <= dec_max, "dec_soft_limits must be ordered [min, max]");

        for (name, position) in &self.park_positions {
            ensure!(
                (0.0..=90.0).contains(&position.alt),
                "park position '{name}' altitude must be within [0, 90] degrees"
            );
            ensure!(
                (0.0..360.0).contains(&position.az),
                "park position '{name}' azimuth must be within [0, 360) degrees"
            );
        }

        Ok(())
    }

    pub fn controller_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.controller_timeout)
    }

    pub fn slew_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.slew_poll_interval)
    }

    pub fn slew_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.slew_timeout)
    }

    pub fn home_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.home_poll_interval)
    }

    pub fn home_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.home_timeout)
    }
}
