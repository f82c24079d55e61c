//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Tracking rates and timed guide pulses.
//!

use crate::mount::{
    Axis,
    AxisDirection,
    LUNAR_RATE,
    Result,
    SIDEREAL_RATE,
    SOLAR_RATE,
    axis::Motors
};
use crate::timer::OneShotTimer;
use crossbeam::channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use strum_macros as sm;

pub const DEFAULT_GUIDE_RATE: f64 = 0.5;

pub const MIN_GUIDE_RATE: f64 = 0.1;

pub const MAX_GUIDE_RATE: f64 = 1.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, sm::EnumIter, sm::EnumString, sm::Display, Deserialize, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TrackMode { Sidereal, Lunar, Solar, Custom }

/// Axis rates in arcseconds per second.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TrackRates {
    pub ra: f64,
    pub dec: f64
}

impl TrackRates {
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::RaAzimuth => self.ra,
            Axis::DecAltitude => self.dec
        }
    }
}

impl TrackMode {
    /// Returns the nominal axis rates; `custom` applies to `TrackMode::Custom` only.
    pub fn rates(&self, custom: TrackRates) -> TrackRates {
        match self {
            TrackMode::Sidereal => TrackRates{ ra: SIDEREAL_RATE, dec: 0.0 },
            TrackMode::Lunar => TrackRates{ ra: LUNAR_RATE, dec: 0.0 },
            TrackMode::Solar => TrackRates{ ra: SOLAR_RATE, dec: 0.0 },
            TrackMode::Custom => custom
        }
    }
}

/// Runs an axis at `rate` arcseconds per second (signed); zero stops it.
#[must_use]
pub fn start_tracking(motors: &mut Motors, axis: Axis, rate: f64) -> Result<()> {
    let multiple = rate / SIDEREAL_RATE;
    log::debug!("{} axis: tracking at {:.4}\"/s ({:.4}x sidereal)", axis, rate, multiple);

    if multiple.abs() < 1.0e-9 {
        return motors.stop_slow(axis);
    }

    motors.set_rate(axis, multiple)?;
    if !motors.read_status(axis)?.running {
        motors.start(axis)?;
    }

    Ok(())
}

/// Rate change (arcseconds per second) of a guide pulse.
///
/// `fraction` is the guide rate as a fraction of sidereal; `inverted` is the axis inversion flag.
pub fn guide_rate_shift(direction: AxisDirection, fraction: f64, inverted: bool) -> f64 {
    let shift = direction.sign() * fraction * SIDEREAL_RATE;
    if inverted { -shift } else { shift }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GuidePulse {
    pub axis: Axis,
    pub direction: AxisDirection,
    /// Arcseconds per second added to the tracking rate.
    pub rate_shift: f64,
    pub duration: Duration,
    pub started: Instant
}

/// Sent by a guide timer when a pulse should end.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GuideTimerEvent {
    pub axis: Axis,
    pub started: Instant
}

/// Pending guide pulses and their restore timers, one per axis.
pub struct Guider {
    timers: [OneShotTimer<GuideTimerEvent>; 2],
    pending: [Option<GuidePulse>; 2],
    receiver: Receiver<GuideTimerEvent>
}

impl Guider {
    pub fn new() -> Guider {
        let (sender, receiver): (Sender<GuideTimerEvent>, _) = crossbeam::channel::unbounded();
        Guider{
            timers: [OneShotTimer::new(sender.clone()), OneShotTimer::new(sender)],
            pending: [None, None],
            receiver
        }
    }

    /// Channel delivering pulse-end events.
    pub fn events(&self) -> Receiver<GuideTimerEvent> {
        self.receiver.clone()
    }

    /// Removes and returns an already fired event, if any.
    pub fn try_next_event(&self) -> Option<GuideTimerEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn pending(&self, axis: Axis) -> Option<&GuidePulse> {
        self.pending[axis.index()].as_ref()
    }

    /// Registers a pulse, replacing any pending one on the same axis.
    pub fn schedule(&mut self, pulse: GuidePulse) {
        self.timers[pulse.axis.index()].run_once(
            pulse.duration,
            GuideTimerEvent{ axis: pulse.axis, started: pulse.started }
        );
        self.pending[pulse.axis.index()] = Some(pulse);
    }

    /// Returns the pulse ended by `event`, or `None` if the event is stale.
    pub fn complete(&mut self, event: GuideTimerEvent) -> Option<GuidePulse> {
        let index = event.axis.index();
        if self.pending[index].map_or(false, |pulse| pulse.started == event.started) {
            self.pending[index].take()
        } else {
            None
        }
    }

    pub fn cancel(&mut self, axis: Axis) {
        self.timers[axis.index()].stop();
        self.pending[axis.index()] = None;
    }

    pub fn cancel_all(&mut self) {
        self.cancel(Axis::RaAzimuth);
        self.cancel(Axis::DecAltitude);
        while self.receiver.try_recv().is_ok() {}
    }
}
