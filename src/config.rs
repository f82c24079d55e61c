//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2020-2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Program configuration.
//!

use crate::mount::{
    axis::{DEFAULT_STATUS_REFRESH, MAX_RATE, MIN_RATE},
    goto::MeridianLimits,
    session::SessionSettings,
    skywatcher::{CodecSettings, DEFAULT_RETRIES, DEFAULT_TIMEOUT, MAX_HEX24},
    tracking::{DEFAULT_GUIDE_RATE, MAX_GUIDE_RATE, MIN_GUIDE_RATE, TrackMode, TrackRates},
    SIDEREAL_RATE
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_BAUD_RATE: u32 = 9600;

const DEFAULT_SLEW_SPEED: f64 = 64.0;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    Invalid(String)
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "parse error: {}", e),
            ConfigError::Serialize(e) => write!(f, "serialization error: {}", e),
            ConfigError::Invalid(s) => write!(f, "invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> ConfigError { ConfigError::Io(e) }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> ConfigError { ConfigError::Parse(e) }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> ConfigError { ConfigError::Serialize(e) }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Connection {
    pub device: String,
    pub baud_rate: u32,
    /// Deadline for a single reply.
    pub read_timeout_ms: u64,
    /// Attempts per command before the mount is considered disconnected.
    pub retries: u32
}

impl Default for Connection {
    fn default() -> Connection {
        Connection{
            device: default_device().into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            retries: DEFAULT_RETRIES
        }
    }
}

#[cfg(target_os = "windows")]
fn default_device() -> &'static str { "COM1" }

#[cfg(not(target_os = "windows"))]
fn default_device() -> &'static str { "/dev/ttyUSB0" }

/// Observer location (degrees; longitude east positive).
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Site {
    pub latitude: f64,
    pub longitude: f64
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Mount {
    /// Park position (RA, Dec encoders); home position if absent.
    pub park_encoders: Option<[u32; 2]>,
    pub track_after_goto: bool,
    /// Goto with the counterweight up when within the RA limits.
    pub force_cw_up: bool,
    pub check_limits: bool,
    pub status_refresh_ms: u64
}

impl Default for Mount {
    fn default() -> Mount {
        Mount{
            park_encoders: None,
            track_after_goto: true,
            force_cw_up: false,
            check_limits: true,
            status_refresh_ms: DEFAULT_STATUS_REFRESH.as_millis() as u64
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Tracking {
    pub mode: TrackMode,
    /// Arcseconds per second.
    pub custom_ra_rate: f64,
    /// Arcseconds per second.
    pub custom_dec_rate: f64
}

impl Default for Tracking {
    fn default() -> Tracking {
        Tracking{ mode: TrackMode::Sidereal, custom_ra_rate: SIDEREAL_RATE, custom_dec_rate: 0.0 }
    }
}

/// Guide rates as fractions of the sidereal rate.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Guiding {
    pub ra_rate: f64,
    pub dec_rate: f64
}

impl Default for Guiding {
    fn default() -> Guiding {
        Guiding{ ra_rate: DEFAULT_GUIDE_RATE, dec_rate: DEFAULT_GUIDE_RATE }
    }
}

/// Manual slew speeds as multiples of the sidereal rate.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Slewing {
    pub ra_speed: f64,
    pub dec_speed: f64
}

impl Default for Slewing {
    fn default() -> Slewing {
        Slewing{ ra_speed: DEFAULT_SLEW_SPEED, dec_speed: DEFAULT_SLEW_SPEED }
    }
}

/// Meridian limits checked on every status update.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Limits {
    /// East and west RA encoder limits; no check if absent.
    pub ra_encoders: Option<[u32; 2]>,
    pub abort_when_tracking: bool,
    pub abort_when_slewing: bool
}

impl Default for Limits {
    fn default() -> Limits {
        Limits{ ra_encoders: None, abort_when_tracking: true, abort_when_slewing: true }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Configuration {
    pub connection: Connection,
    pub site: Site,
    pub mount: Mount,
    pub tracking: Tracking,
    pub guiding: Guiding,
    pub slewing: Slewing,
    pub limits: Limits
}

impl Configuration {
    /// Loads the configuration from the default location.
    ///
    /// A missing file yields the defaults.
    pub fn new() -> Result<Configuration, ConfigError> {
        let file_path = config_file_path();
        if !file_path.exists() {
            log::warn!("configuration file {} not found, using defaults", file_path.display());
            return Ok(Configuration::default());
        }

        Configuration::load(&file_path)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Configuration, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Configuration::parse(&contents)?;
        log::info!("loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Configuration, ConfigError> {
        let config: Configuration = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path.as_ref(), toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.device.is_empty() {
            return Err(ConfigError::Invalid("connection.device is empty".into()));
        }
        if self.connection.baud_rate == 0 {
            return Err(ConfigError::Invalid("connection.baud_rate must be positive".into()));
        }
        if self.connection.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connection.read_timeout_ms must be positive".into()));
        }
        if !(1..=10).contains(&self.connection.retries) {
            return Err(ConfigError::Invalid(format!("connection.retries = {} (allowed: 1-10)", self.connection.retries)));
        }

        check_range("site.latitude", self.site.latitude, -90.0, 90.0)?;
        check_range("site.longitude", self.site.longitude, -180.0, 180.0)?;

        if let Some(park) = self.mount.park_encoders {
            if park.iter().any(|e| *e > MAX_HEX24) {
                return Err(ConfigError::Invalid(format!("mount.park_encoders {:?} exceed 24 bits", park)));
            }
        }

        if let Some([east, west]) = self.limits.ra_encoders {
            if east > MAX_HEX24 || west > MAX_HEX24 || east > west {
                return Err(ConfigError::Invalid(format!(
                    "limits.ra_encoders [{}, {}] (east must not exceed west, 24 bits max)", east, west
                )));
            }
        }

        let max_rate = MAX_RATE * SIDEREAL_RATE;
        check_range("tracking.custom_ra_rate", self.tracking.custom_ra_rate, -max_rate, max_rate)?;
        check_range("tracking.custom_dec_rate", self.tracking.custom_dec_rate, -max_rate, max_rate)?;

        check_range("guiding.ra_rate", self.guiding.ra_rate, MIN_GUIDE_RATE, MAX_GUIDE_RATE)?;
        check_range("guiding.dec_rate", self.guiding.dec_rate, MIN_GUIDE_RATE, MAX_GUIDE_RATE)?;

        check_range("slewing.ra_speed", self.slewing.ra_speed, MIN_RATE, MAX_RATE)?;
        check_range("slewing.dec_speed", self.slewing.dec_speed, MIN_RATE, MAX_RATE)?;

        Ok(())
    }

    pub fn codec_settings(&self) -> CodecSettings {
        CodecSettings{
            retries: self.connection.retries,
            timeout: Duration::from_millis(self.connection.read_timeout_ms)
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings{
            latitude: self.site.latitude,
            longitude: self.site.longitude,
            park_encoders: self.mount.park_encoders,
            track_after_goto: self.mount.track_after_goto,
            force_cw_up: self.mount.force_cw_up,
            check_limits: self.mount.check_limits,
            status_refresh: Duration::from_millis(self.mount.status_refresh_ms),
            track_mode: self.tracking.mode,
            custom_rates: TrackRates{ ra: self.tracking.custom_ra_rate, dec: self.tracking.custom_dec_rate },
            guide_rates: [self.guiding.ra_rate, self.guiding.dec_rate],
            slew_speeds: [self.slewing.ra_speed, self.slewing.dec_speed],
            meridian_limits: self.limits.ra_encoders.map(|[east, west]| MeridianLimits{
                east,
                west,
                abort_tracking: self.limits.abort_when_tracking,
                abort_slewing: self.limits.abort_when_slewing
            })
        }
    }
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} = {} (allowed: {} to {})", name, value, min, max)))
    }
}

pub fn config_file_path() -> PathBuf {
    dirs::config_dir().unwrap_or_default().join("eqmount.toml")
}
