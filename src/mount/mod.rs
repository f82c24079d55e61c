//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2020-2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Telescope mount module.
//!

pub mod astro;
pub mod axis;
pub mod coords;
pub mod goto;
pub mod session;
pub mod skywatcher;
pub mod status;
pub mod sync;
pub mod tracking;

use strum_macros as sm;

/// Length of the stellar day in seconds.
pub const SIDEREAL_DAY_SECONDS: f64 = 86164.098903691;

/// Sidereal rate in arcseconds per second.
pub const SIDEREAL_RATE: f64 = 360.0 * 3600.0 / SIDEREAL_DAY_SECONDS;

/// Solar rate in arcseconds per second.
pub const SOLAR_RATE: f64 = 15.0;

/// Mean lunar rate in arcseconds per second.
pub const LUNAR_RATE: f64 = 14.511415;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, sm::EnumIter, sm::Display)]
pub enum Axis {
    /// Right ascension (or azimuth) axis, wire id '1'.
    #[strum(serialize = "RA")]
    RaAzimuth,
    /// Declination (or altitude) axis, wire id '2'.
    #[strum(serialize = "Dec")]
    DecAltitude
}

impl Axis {
    pub fn as_char(&self) -> char {
        match self {
            Axis::RaAzimuth => '1',
            Axis::DecAltitude => '2'
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Axis::RaAzimuth => 0,
            Axis::DecAltitude => 1
        }
    }
}

pub const AXES: [Axis; 2] = [Axis::RaAzimuth, Axis::DecAltitude];

#[derive(Copy, Clone, Debug, PartialEq, Eq, sm::Display)]
pub enum Hemisphere { North, South }

impl Hemisphere {
    pub fn from_latitude(latitude: f64) -> Hemisphere {
        if latitude < 0.0 { Hemisphere::South } else { Hemisphere::North }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, sm::Display)]
pub enum PierSide { East, West }

#[derive(Copy, Clone, Debug, PartialEq, Eq, sm::Display)]
pub enum TrackState { Idle, Slewing, Tracking, Parking, Parked }

/// Direction of a manual motion or guide pulse.
///
/// For the RA axis `Positive` means West, for the Dec axis it means North.
#[derive(Copy, Clone, Debug, PartialEq, Eq, sm::Display)]
pub enum AxisDirection { Positive, Negative }

impl AxisDirection {
    pub fn sign(&self) -> f64 {
        match self {
            AxisDirection::Positive => 1.0,
            AxisDirection::Negative => -1.0
        }
    }
}

#[derive(Debug)]
pub enum TransportError {
    Io(std::io::Error),
    SerialPort(serialport::Error),
    /// No complete reply arrived before the deadline.
    Timeout,
    /// All retries timed out.
    Disconnected
}

#[derive(Debug)]
pub enum ProtocolError {
    MountRejected { code: u8, message: &'static str, command: String, response: String },
    Malformed { command: String, response: String }
}

#[derive(Debug)]
pub enum MountError {
    Transport(TransportError),
    Protocol(ProtocolError),
    /// Argument out of its allowed range.
    Parameter(String),
    /// Operation not allowed in the current state.
    Precondition(String)
}

pub type Result<T> = std::result::Result<T, MountError>;

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "I/O error: {}", e),
            TransportError::SerialPort(e) => write!(f, "serial port error: {}", e),
            TransportError::Timeout => write!(f, "timed out waiting for reply"),
            TransportError::Disconnected => write!(f, "mount not responding"),
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::MountRejected{ code, message, command, response } =>
                write!(f, "mount error {} ({}) for command {}, reply {}", code, message, command, response),

            ProtocolError::Malformed{ command, response } =>
                write!(f, "malformed reply {:?} to command {}", response, command),
        }
    }
}

impl std::fmt::Display for MountError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MountError::Transport(e) => write!(f, "transport: {}", e),
            MountError::Protocol(e) => write!(f, "protocol: {}", e),
            MountError::Parameter(s) => write!(f, "invalid parameter: {}", s),
            MountError::Precondition(s) => write!(f, "not allowed: {}", s),
        }
    }
}

impl std::error::Error for TransportError {}

impl std::error::Error for ProtocolError {}

impl std::error::Error for MountError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MountError::Transport(e) => Some(e),
            MountError::Protocol(e) => Some(e),
            _ => None
        }
    }
}

impl From<TransportError> for MountError {
    fn from(e: TransportError) -> MountError {
        MountError::Transport(e)
    }
}

impl From<ProtocolError> for MountError {
    fn from(e: ProtocolError) -> MountError {
        MountError::Protocol(e)
    }
}

impl From<std::io::Error> for MountError {
    fn from(e: std::io::Error) -> MountError {
        MountError::Transport(TransportError::Io(e))
    }
}

impl From<serialport::Error> for MountError {
    fn from(e: serialport::Error) -> MountError {
        MountError::Transport(TransportError::SerialPort(e))
    }
}
