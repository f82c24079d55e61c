//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Mount status snapshot.
//!

use crate::mount::{PierSide, TrackState, skywatcher::AxisStatus};

/// Published once per tick.
#[derive(Clone, Debug, PartialEq)]
pub struct MountStatus {
    /// Right ascension with the sync offset applied (hours).
    pub ra: f64,
    /// Declination with the sync offset applied (degrees).
    pub dec: f64,
    /// Mechanical hour angle (hours).
    pub ha: f64,
    pub lst: f64,
    pub jd: f64,
    pub axis_status: [AxisStatus; 2],
    /// Step periods last sent to the axes.
    pub periods: [u32; 2],
    pub encoders: [u32; 2],
    pub pier_side: PierSide,
    pub altitude: f64,
    pub azimuth: f64,
    pub track_state: TrackState
}

/// Receiver of status snapshots.
pub trait StatusSink: Send {
    fn publish(&mut self, status: &MountStatus);
}

/// Writes snapshots to the log.
pub struct LogSink;

impl StatusSink for LogSink {
    fn publish(&mut self, status: &MountStatus) {
        log::debug!(
            "{}: RA {:.5}h, Dec {:.4}°, HA {:.4}h, alt {:.3}°, az {:.3}°, pier {}, encoders 0x{:06X}/0x{:06X}, periods {}/{}",
            status.track_state, status.ra, status.dec, status.ha, status.altitude, status.azimuth,
            status.pier_side, status.encoders[0], status.encoders[1], status.periods[0], status.periods[1]
        );
    }
}
