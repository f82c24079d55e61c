//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Mount session: the driver's public entry point.
//!
//! All calls must come from a single thread; the host drives `tick` periodically
//! (about once per second) and forwards guide timer events to `handle_timer_event`.
//!

use crate::config::Configuration;
use crate::mount::{
    AXES,
    Axis,
    AxisDirection,
    MountError,
    PierSide,
    Result,
    TrackState,
    astro::{Clock, julian_date, local_sidereal_time},
    axis::{AxisState, MountInfo, Motors},
    coords::{
        AxisGeometry,
        MountGeometry,
        encoders_to_radec,
        equatorial_to_horizontal,
        inversion_flags,
        range_ha,
        side_of_pier
    },
    goto::{GotoKind, GotoRequest, GotoStep, MeridianLimits},
    skywatcher::{Codec, CodecSettings, SerialTransport, open_serial_port},
    status::{MountStatus, StatusSink},
    sync::{PolarAlignment, SyncPoint, SyncStore, apply_delta, polar_alignment},
    tracking::{GuidePulse, GuideTimerEvent, Guider, TrackMode, TrackRates, guide_rate_shift, start_tracking},
    Hemisphere
};
use crossbeam::channel::Receiver;
use std::time::{Duration, Instant};

/// Starts or stops a manual motion.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MoveCommand { Start, Stop }

#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    /// Degrees, north positive.
    pub latitude: f64,
    /// Degrees, east positive.
    pub longitude: f64,
    pub park_encoders: Option<[u32; 2]>,
    pub track_after_goto: bool,
    pub force_cw_up: bool,
    pub check_limits: bool,
    pub status_refresh: Duration,
    pub track_mode: TrackMode,
    pub custom_rates: TrackRates,
    /// Fractions of the sidereal rate (RA, Dec).
    pub guide_rates: [f64; 2],
    /// Multiples of the sidereal rate (RA, Dec).
    pub slew_speeds: [f64; 2],
    pub meridian_limits: Option<MeridianLimits>
}

impl Default for SessionSettings {
    fn default() -> SessionSettings {
        Configuration::default().session_settings()
    }
}

fn ensure_coordinates(ra: f64, dec: f64) -> Result<()> {
    if !(0.0..=24.0).contains(&ra) || !(-90.0..=90.0).contains(&dec) {
        return Err(MountError::Parameter(format!("coordinates out of range: RA {}h, Dec {}°", ra, dec)));
    }
    Ok(())
}

pub struct MountSession {
    motors: Motors,
    info: MountInfo,
    geometry: MountGeometry,
    settings: SessionSettings,
    clock: Box<dyn Clock>,
    sink: Box<dyn StatusSink>,
    state: TrackState,
    /// State to return to after a manual motion.
    remembered_state: TrackState,
    goto: Option<GotoRequest>,
    moving: [Option<AxisDirection>; 2],
    syncs: SyncStore,
    polar: Option<PolarAlignment>,
    guider: Guider,
    track_mode: TrackMode,
    pier_side: PierSide,
    ra_inverted: bool,
    dec_inverted: bool,
    last_status: Option<MountStatus>
}

impl MountSession {
    /// Opens the configured serial device and connects to the mount.
    pub fn connect(
        config: &Configuration,
        clock: Box<dyn Clock>,
        sink: Box<dyn StatusSink>
    ) -> Result<MountSession> {
        log::info!("connecting to {} at {} baud", config.connection.device, config.connection.baud_rate);
        let transport = open_serial_port(&config.connection.device, config.connection.baud_rate)?;
        MountSession::with_transport(transport, config.codec_settings(), config.session_settings(), clock, sink)
    }

    pub fn with_transport(
        transport: Box<dyn SerialTransport>,
        codec_settings: CodecSettings,
        settings: SessionSettings,
        clock: Box<dyn Clock>,
        sink: Box<dyn StatusSink>
    ) -> Result<MountSession> {
        let (mut motors, info) = Motors::connect(Codec::new(transport, codec_settings), settings.status_refresh)?;
        let zero = motors.initialize()?;

        let geometry = MountGeometry{
            ra: AxisGeometry{ zero: zero[0], total: motors.params(Axis::RaAzimuth).counts_per_rev },
            dec: AxisGeometry{ zero: zero[1], total: motors.params(Axis::DecAltitude).counts_per_rev },
            hemisphere: Hemisphere::from_latitude(settings.latitude)
        };
        log::info!("{} hemisphere; geometry {:?}", geometry.hemisphere, geometry);

        let mut session = MountSession{
            motors,
            info,
            geometry,
            track_mode: settings.track_mode,
            settings,
            clock,
            sink,
            state: TrackState::Idle,
            remembered_state: TrackState::Idle,
            goto: None,
            moving: [None, None],
            syncs: SyncStore::new(),
            polar: None,
            guider: Guider::new(),
            pier_side: PierSide::East,
            ra_inverted: false,
            dec_inverted: false,
            last_status: None
        };
        session.read_position()?;

        Ok(session)
    }

    /// Stops both axes (best effort) and releases the serial port.
    pub fn disconnect(mut self) {
        self.guider.cancel_all();
        for axis in &AXES {
            if let Err(e) = self.motors.stop_slow(*axis) {
                log::error!("failed to stop {} axis on disconnect: {}", axis, e);
            }
        }
        log::info!("disconnected");
    }

    pub fn info(&self) -> &MountInfo { &self.info }

    pub fn geometry(&self) -> &MountGeometry { &self.geometry }

    pub fn state(&self) -> TrackState { self.state }

    pub fn track_mode(&self) -> TrackMode { self.track_mode }

    pub fn goto_request(&self) -> Option<&GotoRequest> { self.goto.as_ref() }

    pub fn sync_points(&self) -> &SyncStore { &self.syncs }

    pub fn polar_alignment(&self) -> Option<&PolarAlignment> { self.polar.as_ref() }

    pub fn last_status(&self) -> Option<&MountStatus> { self.last_status.as_ref() }

    /// Home position: counterweight down, pointing at the pole.
    pub fn home_encoders(&self) -> [u32; 2] {
        [self.geometry.ra.zero, self.geometry.dec.zero.wrapping_add(self.geometry.dec.total / 4) & 0xFF_FFFF]
    }

    pub fn park_encoders(&self) -> [u32; 2] {
        self.settings.park_encoders.unwrap_or_else(|| self.home_encoders())
    }

    /// Channel on which guide pulse ends are signalled.
    pub fn timer_events(&self) -> Receiver<GuideTimerEvent> {
        self.guider.events()
    }

    fn is_inverted(&self, axis: Axis) -> bool {
        match axis {
            Axis::RaAzimuth => self.ra_inverted,
            Axis::DecAltitude => self.dec_inverted
        }
    }

    /// Nominal tracking rate of an axis (arcseconds per second, signed).
    pub fn track_rate(&self, axis: Axis) -> f64 {
        let rate = self.track_mode.rates(self.settings.custom_rates).get(axis);
        if self.is_inverted(axis) { -rate } else { rate }
    }

    fn lst_now(&self) -> (f64, f64) {
        let jd = julian_date(self.clock.now());
        (jd, local_sidereal_time(jd, self.settings.longitude))
    }

    fn read_encoders(&mut self) -> Result<[u32; 2]> {
        Ok([self.motors.get_encoder(Axis::RaAzimuth)?, self.motors.get_encoder(Axis::DecAltitude)?])
    }

    /// Reads the encoders and updates pier side and inversion flags.
    fn read_position(&mut self) -> Result<MountStatus> {
        let encoders = self.read_encoders()?;
        let (jd, lst) = self.lst_now();
        let position = encoders_to_radec(encoders[0], encoders[1], lst, &self.geometry);

        self.pier_side = side_of_pier(position.ha);
        let (ra_inverted, dec_inverted) = inversion_flags(self.geometry.hemisphere, self.pier_side);
        self.ra_inverted = ra_inverted;
        self.dec_inverted = dec_inverted;

        let (delta_ra, delta_dec) = self.syncs.delta();
        let (ra, dec) = apply_delta(position.ra, position.dec, delta_ra, delta_dec);
        let (altitude, azimuth) = equatorial_to_horizontal(range_ha(lst - ra), dec, self.settings.latitude);

        Ok(MountStatus{
            ra,
            dec,
            ha: position.ha,
            lst,
            jd,
            axis_status: [self.motors.get_status(Axis::RaAzimuth)?, self.motors.get_status(Axis::DecAltitude)?],
            periods: [self.motors.period(Axis::RaAzimuth), self.motors.period(Axis::DecAltitude)],
            encoders,
            pier_side: self.pier_side,
            altitude,
            azimuth,
            track_state: self.state
        })
    }

    /// Reads and publishes the mount status, then advances a goto or park in progress.
    pub fn tick(&mut self) -> Result<()> {
        let result = self.service_timers().and_then(|_| self.tick_inner());
        if result.is_err() && (self.state == TrackState::Slewing || self.state == TrackState::Parking) {
            log::error!("error during slew, stopping the mount");
            self.abort();
        }
        result
    }

    fn tick_inner(&mut self) -> Result<()> {
        let mut status = self.read_position()?;
        if let Some(limits) = self.settings.meridian_limits {
            self.check_meridian_limits(&limits, status.encoders[0]);
            status.track_state = self.state;
        }
        self.sink.publish(&status);
        self.last_status = Some(status);

        if self.goto.is_some() {
            self.advance()?;
        }

        Ok(())
    }

    fn check_meridian_limits(&mut self, limits: &MeridianLimits, ra_encoder: u32) {
        if limits.contains(ra_encoder) {
            return;
        }

        if limits.should_abort(ra_encoder, self.state) {
            log::warn!(
                "RA encoder 0x{:06X} outside limits 0x{:06X}..0x{:06X} while {}; stopping the mount",
                ra_encoder, limits.east, limits.west, self.state
            );
            self.abort();
        } else {
            log::warn!(
                "RA encoder 0x{:06X} outside limits 0x{:06X}..0x{:06X}", ra_encoder, limits.east, limits.west
            );
        }
    }

    /// One goto step; does nothing until both axes have stopped.
    fn advance(&mut self) -> Result<()> {
        for axis in &AXES {
            if self.motors.axis_state(*axis)? != AxisState::FullStop {
                return Ok(());
            }
        }

        let encoders = self.read_encoders()?;
        let (_, lst) = self.lst_now();
        let position = encoders_to_radec(encoders[0], encoders[1], lst, &self.geometry);

        let mut request = match self.goto.take() {
            Some(request) => request,
            None => return Ok(())
        };
        request.set_current(position.ra, position.dec, encoders);

        match request.next_step(lst, &self.geometry) {
            GotoStep::Iterate{ deltas } => {
                self.motors.slew_to(deltas)?;
                self.goto = Some(request);
            },

            GotoStep::Complete{ .. } => match request.kind {
                GotoKind::Park => {
                    log::info!("mount parked");
                    self.state = TrackState::Parked;
                },

                GotoKind::Slew{ resume_tracking } => {
                    log::info!("goto complete after {} iteration(s)", request.iterations);
                    if resume_tracking {
                        self.read_position()?;
                        self.start_tracking_all()?;
                        self.state = TrackState::Tracking;
                    } else {
                        self.state = TrackState::Idle;
                    }
                }
            }
        }

        Ok(())
    }

    fn start_tracking_all(&mut self) -> Result<()> {
        for axis in &AXES {
            let rate = self.track_rate(*axis);
            start_tracking(&mut self.motors, *axis, rate)?;
        }
        Ok(())
    }

    fn stop_and_wait_all(&mut self) -> Result<()> {
        for axis in &AXES {
            self.motors.stop_and_wait(*axis)?;
        }
        Ok(())
    }

    /// Slews to `ra` (hours), `dec` (degrees); the current sync offset is removed from the target.
    pub fn goto(&mut self, ra: f64, dec: f64) -> Result<()> {
        ensure_coordinates(ra, dec)?;
        match self.state {
            TrackState::Slewing | TrackState::Parking | TrackState::Parked => return Err(MountError::Precondition(
                format!("cannot start goto while {}", self.state)
            )),
            _ => ()
        }

        let (delta_ra, delta_dec) = self.syncs.delta();
        let (target_ra, target_dec) = apply_delta(ra, dec, -delta_ra, -delta_dec);
        log::info!("goto RA {:.5}h, Dec {:.4}° (mount coordinates {:.5}h, {:.4}°)", ra, dec, target_ra, target_dec);

        self.guider.cancel_all();
        let resume_tracking = self.state == TrackState::Tracking || self.settings.track_after_goto;

        let result = self.start_goto(target_ra, target_dec, resume_tracking);
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn start_goto(&mut self, ra: f64, dec: f64, resume_tracking: bool) -> Result<()> {
        self.stop_and_wait_all()?;

        let encoders = self.read_encoders()?;
        let (_, lst) = self.lst_now();
        let position = encoders_to_radec(encoders[0], encoders[1], lst, &self.geometry);

        let mut request = GotoRequest::new_slew(
            ra, dec, resume_tracking, self.settings.force_cw_up, self.settings.check_limits, &self.geometry
        );
        request.set_current(position.ra, position.dec, encoders);
        request.compute_target(lst, &self.geometry);
        log::debug!(
            "goto target encoders 0x{:06X}/0x{:06X}, pier {}",
            request.target_encoders[0], request.target_encoders[1], request.target_pier
        );

        self.motors.slew_to(request.deltas())?;

        self.remembered_state = self.state;
        self.state = TrackState::Slewing;
        self.goto = Some(request);
        Ok(())
    }

    /// Records the difference between the commanded coordinates and the current position.
    ///
    /// Allowed only while tracking. With a previous sync point, also estimates polar alignment.
    pub fn sync(&mut self, ra: f64, dec: f64) -> Result<()> {
        ensure_coordinates(ra, dec)?;
        let encoders = self.read_encoders()?;
        let (jd, lst) = self.lst_now();

        if self.state != TrackState::Tracking {
            log::warn!("sync rejected: mount is not tracking");
            return Err(MountError::Precondition("sync is allowed only when tracking".into()));
        }

        let point = SyncPoint::new(lst, jd, ra, dec, encoders, &self.geometry);
        log::info!("mount synced (delta RA = {:.6}h, delta Dec = {:.6}°)", point.delta_ra, point.delta_dec);
        self.syncs.add(point);

        if let (Some(previous), Some(current)) = (self.syncs.previous(), self.syncs.current()) {
            self.polar = polar_alignment(previous, current, self.settings.latitude);
            match &self.polar {
                Some(pa) => log::info!(
                    "polar axis at alt {:.4}°, az {:.4}° (offsets {:.4}°, {:.4}°); \
                     to verify, goto RA {:.5}h, Dec {:.4}°",
                    pa.altitude, pa.azimuth, pa.altitude_offset, pa.azimuth_offset,
                    pa.recommended_ra, pa.recommended_dec
                ),
                None => log::info!("polar alignment not computed for these sync points")
            }
        }

        Ok(())
    }

    /// Discards all sync points.
    pub fn clear_sync(&mut self) {
        self.syncs.clear();
        self.polar = None;
        log::info!("sync data cleared");
    }

    /// Slews to the park position; the mount is parked once both axes stop.
    pub fn park(&mut self) -> Result<()> {
        if self.state == TrackState::Parking || self.state == TrackState::Parked {
            return Err(MountError::Precondition(format!("mount is already {}", self.state)));
        }

        log::info!("parking");
        self.guider.cancel_all();
        self.moving = [None, None];
        self.goto = None;

        let result = self.start_park();
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn start_park(&mut self) -> Result<()> {
        self.stop_and_wait_all()?;

        let encoders = self.read_encoders()?;
        let mut request = GotoRequest::new_park(self.park_encoders(), &self.geometry);
        request.set_current(0.0, 0.0, encoders);
        self.motors.slew_to(request.deltas())?;

        self.state = TrackState::Parking;
        self.goto = Some(request);
        Ok(())
    }

    pub fn unpark(&mut self) -> Result<()> {
        if self.state != TrackState::Parked {
            return Err(MountError::Precondition("mount is not parked".into()));
        }
        log::info!("unparked");
        self.state = TrackState::Idle;
        Ok(())
    }

    fn reset_motion(&mut self) {
        self.goto = None;
        self.moving = [None, None];
        self.guider.cancel_all();
        self.state = TrackState::Idle;
    }

    /// Stops both axes with deceleration; never fails.
    pub fn abort(&mut self) {
        log::info!("abort");
        self.reset_motion();
        for axis in &AXES {
            if let Err(e) = self.motors.stop_slow(*axis) {
                log::error!("failed to stop {} axis: {}", axis, e);
            }
        }
    }

    /// Stops both axes immediately; never fails.
    pub fn emergency_stop(&mut self) {
        log::warn!("emergency stop");
        self.reset_motion();
        for axis in &AXES {
            if let Err(e) = self.motors.stop_instant(*axis) {
                log::error!("failed to stop {} axis: {}", axis, e);
            }
        }
    }

    /// Starts or stops a manual motion at the configured slew speed.
    ///
    /// Stopping restores tracking if it was active before the motion began.
    pub fn move_axis(&mut self, axis: Axis, direction: AxisDirection, command: MoveCommand) -> Result<()> {
        match command {
            MoveCommand::Start => {
                if self.goto.is_some() || self.state == TrackState::Parking || self.state == TrackState::Parked {
                    return Err(MountError::Precondition(format!("cannot move {} axis while {}", axis, self.state)));
                }

                let mut rate = self.settings.slew_speeds[axis.index()] * direction.sign();
                if self.is_inverted(axis) { rate = -rate; }
                log::info!("manual motion of {} axis ({}) at {:.1}x sidereal", axis, direction, rate);

                if self.moving.iter().all(|m| m.is_none()) && self.state != TrackState::Slewing {
                    self.remembered_state = self.state;
                }
                self.guider.cancel(axis);
                self.state = TrackState::Slewing;

                if let Err(e) = self.motors.slew(axis, rate) {
                    self.abort();
                    return Err(e);
                }
                self.moving[axis.index()] = Some(direction);
                Ok(())
            },

            MoveCommand::Stop => {
                if self.moving[axis.index()].is_none() {
                    return Ok(());
                }
                self.moving[axis.index()] = None;
                log::info!("manual motion of {} axis stopped", axis);

                let result = self.finish_move(axis);
                if result.is_err() {
                    self.abort();
                }
                result
            }
        }
    }

    fn finish_move(&mut self, axis: Axis) -> Result<()> {
        self.motors.stop_and_wait(axis)?;

        let other_moving = self.moving.iter().any(|m| m.is_some());
        if self.remembered_state == TrackState::Tracking {
            self.read_position()?;
            let rate = self.track_rate(axis);
            start_tracking(&mut self.motors, axis, rate)?;
            if !other_moving { self.state = TrackState::Tracking; }
        } else if !other_moving {
            self.state = TrackState::Idle;
        }

        Ok(())
    }

    /// Applies a guide correction for `duration`; allowed only while tracking.
    ///
    /// A new pulse on the same axis replaces a pending one.
    pub fn guide(&mut self, axis: Axis, direction: AxisDirection, duration: Duration) -> Result<()> {
        if self.state != TrackState::Tracking {
            self.guider.cancel(axis);
            return Err(MountError::Precondition("guiding is allowed only when tracking".into()));
        }

        let shift = guide_rate_shift(direction, self.settings.guide_rates[axis.index()], self.is_inverted(axis));
        let rate = self.track_rate(axis) + shift;
        log::debug!("guide {} axis {} for {:?}: {:.4}\"/s", axis, direction, duration, rate);

        if let Err(e) = start_tracking(&mut self.motors, axis, rate) {
            log::error!("guide pulse failed: {}", e);
            self.abort();
            return Err(e);
        }

        self.guider.schedule(GuidePulse{ axis, direction, rate_shift: shift, duration, started: Instant::now() });
        Ok(())
    }

    /// Ends a guide pulse by restoring the axis' nominal rate; stale events are ignored.
    ///
    /// An axis under manual motion is left alone; stopping the motion restores tracking.
    pub fn handle_timer_event(&mut self, event: GuideTimerEvent) -> Result<()> {
        let pulse = match self.guider.complete(event) {
            Some(pulse) => pulse,
            None => return Ok(())
        };

        if self.moving[pulse.axis.index()].is_some() {
            return Ok(());
        }

        let rate = self.track_rate(pulse.axis);
        log::debug!("guide pulse on {} axis ended, restoring {:.4}\"/s", pulse.axis, rate);
        if let Err(e) = start_tracking(&mut self.motors, pulse.axis, rate) {
            log::error!("failed to restore tracking rate: {}", e);
            self.abort();
            return Err(e);
        }

        Ok(())
    }

    /// Handles all guide timer events that have already fired.
    pub fn service_timers(&mut self) -> Result<()> {
        while let Some(event) = self.guider.try_next_event() {
            self.handle_timer_event(event)?;
        }
        Ok(())
    }

    /// Changes the tracking rates; takes effect immediately if tracking.
    pub fn set_track_mode(&mut self, mode: TrackMode) -> Result<()> {
        log::info!("track mode: {}", mode);
        self.track_mode = mode;

        if self.state == TrackState::Tracking {
            self.guider.cancel_all();
            if let Err(e) = self.start_tracking_all() {
                self.abort();
                return Err(e);
            }
        }

        Ok(())
    }

    pub fn set_tracking(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            match self.state {
                TrackState::Tracking => return Ok(()),
                TrackState::Slewing | TrackState::Parking | TrackState::Parked => return Err(
                    MountError::Precondition(format!("cannot start tracking while {}", self.state))
                ),
                TrackState::Idle => ()
            }

            log::info!("tracking started ({})", self.track_mode);
            let result = self.read_position().and_then(|_| self.start_tracking_all());
            match result {
                Ok(()) => { self.state = TrackState::Tracking; Ok(()) },
                Err(e) => { self.abort(); Err(e) }
            }
        } else {
            if self.state != TrackState::Tracking {
                return Ok(());
            }

            log::info!("tracking stopped");
            self.guider.cancel_all();
            self.state = TrackState::Idle;
            for axis in &AXES {
                self.motors.stop_slow(*axis)?;
            }
            Ok(())
        }
    }
}
