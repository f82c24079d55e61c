//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2020-2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Per-axis motor control on top of the protocol codec.
//!

use crate::mount::{
    Axis,
    AXES,
    MountError,
    Result,
    SIDEREAL_DAY_SECONDS,
    TransportError,
    skywatcher::{
        Argument,
        AxisStatus,
        Codec,
        Direction,
        Opcode,
        SlewMode,
        SpeedMode,
        decode_hex,
        decode_status,
        motion_mode_chars
    }
};
use std::time::{Duration, Instant};

/// Slowest allowed slew rate (multiple of sidereal).
pub const MIN_RATE: f64 = 0.05;

/// Fastest allowed slew rate (multiple of sidereal).
pub const MAX_RATE: f64 = 800.0;

/// Rates above this multiple of sidereal use the high-speed mode.
pub const LOW_SPEED_MARGIN_RATE: f64 = 128.0;

/// Goto distances (in counts) above this use the high-speed mode.
pub const HIGH_SPEED_GOTO_MARGIN: u32 = 20000;

pub const LOW_SPEED_GOTO_PERIOD: u32 = 18;

pub const DEFAULT_STATUS_REFRESH: Duration = Duration::from_millis(500);

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

const AXIS_STOP_MOTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Zero encoder position assumed for axes already initialized by a previous session.
pub const DEFAULT_ZERO_ENCODER: u32 = 0x80_0000;

/// Mount codes that cannot be driven as an equatorial mount.
const UNSUPPORTED_MOUNT_CODES: [u8; 3] = [0x80, 0x81, 0x90];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AxisState { FullStop, Slewing, SlewingTo }

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MotionMode {
    pub slew_mode: SlewMode,
    pub speed: SpeedMode,
    pub direction: Direction
}

/// Motor parameters read from the controller at connection time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AxisParameters {
    /// Encoder counts per full axis revolution.
    pub counts_per_rev: u32,
    /// Timer interrupt frequency, i.e. counts per worm revolution.
    pub counts_per_worm: u32,
    pub high_speed_ratio: u32,
    /// Shortest step period allowed in high-speed mode.
    pub min_period: u32
}

#[derive(Clone, Debug, PartialEq)]
pub struct MountInfo {
    /// Motor board version, byte order as displayed (0xVVVVCC).
    pub board_version: u32,
    pub mount_code: u8,
    pub model: &'static str
}

impl MountInfo {
    pub fn firmware_version(&self) -> String {
        format!("{:02X}.{:02X}", (self.board_version >> 16) & 0xFF, (self.board_version >> 8) & 0xFF)
    }
}

pub fn model_name(mount_code: u8) -> &'static str {
    match mount_code {
        0x00 => "EQ6",
        0x01 => "HEQ5",
        0x02 => "EQ5",
        0x03 => "EQ3",
        0x04 => "EQ8",
        0x05 => "AZEQ6",
        0x06 => "AZEQ5",
        0x0A => "Star Adventurer",
        0x80 => "GT",
        0x81 => "MF",
        0x82 => "114GT",
        0x90 => "DOB",
        0xF0 => "GEEHALEL",
        _ => "Custom"
    }
}

struct CachedStatus {
    status: AxisStatus,
    read_at: Instant
}

/// Both axes' motors.
pub struct Motors {
    codec: Codec,
    params: [AxisParameters; 2],
    cache: [Option<CachedStatus>; 2],
    periods: [u32; 2],
    status_refresh: Duration
}

impl Motors {
    /// Queries the motor board and the per-axis parameters.
    #[must_use]
    pub fn connect(mut codec: Codec, status_refresh: Duration) -> Result<(Motors, MountInfo)> {
        let reply = codec.dispatch(Axis::RaAzimuth, Opcode::InquireMotorBoardVersion, Argument::None)?;
        let raw = decode_payload(&reply, "motor board version")?;
        let board_version = ((raw & 0xFF) << 16) | (raw & 0xFF00) | ((raw & 0xFF_0000) >> 16);
        let mount_code = (board_version & 0xFF) as u8;

        if UNSUPPORTED_MOUNT_CODES.contains(&mount_code) {
            return Err(MountError::Precondition(
                format!("mount type {} (code 0x{:02X}) is not supported", model_name(mount_code), mount_code)
            ));
        }

        let mut params = [AxisParameters{ counts_per_rev: 0, counts_per_worm: 0, high_speed_ratio: 0, min_period: 0 }; 2];
        for axis in &AXES {
            let p = &mut params[axis.index()];

            p.counts_per_rev = decode_payload(
                &codec.dispatch(*axis, Opcode::InquireGridPerRevolution, Argument::None)?, "counts per revolution"
            )?;
            p.counts_per_worm = decode_payload(
                &codec.dispatch(*axis, Opcode::InquireTimerInterruptFreq, Argument::None)?, "timer frequency"
            )?;
            p.high_speed_ratio = decode_payload(
                &codec.dispatch(*axis, Opcode::InquireHighSpeedRatio, Argument::None)?, "high speed ratio"
            )?;

            if p.counts_per_rev == 0 || p.counts_per_worm == 0 || p.high_speed_ratio == 0 {
                return Err(MountError::Precondition(format!("{} axis reports zero gearing parameters", axis)));
            }
        }

        // 80GT and 114GT report wrong worm values
        match mount_code {
            0x80 => params[Axis::RaAzimuth.index()].counts_per_worm = 0x16_2B97,
            0x82 => params[Axis::RaAzimuth.index()].counts_per_worm = 0x20_5318,
            _ => ()
        }

        if mount_code == 0xF0 {
            params[Axis::RaAzimuth.index()].min_period = 12;
            params[Axis::DecAltitude.index()].min_period = 16;
        } else {
            params[Axis::RaAzimuth.index()].min_period = 6;
            params[Axis::DecAltitude.index()].min_period = 6;
        }

        let info = MountInfo{ board_version, mount_code, model: model_name(mount_code) };
        log::info!(
            "connected to {} (code 0x{:02X}), firmware {}; RA {:?}; Dec {:?}",
            info.model, info.mount_code, info.firmware_version(),
            params[Axis::RaAzimuth.index()], params[Axis::DecAltitude.index()]
        );

        Ok((Motors{ codec, params, cache: [None, None], periods: [0, 0], status_refresh }, info))
    }

    pub fn params(&self, axis: Axis) -> &AxisParameters {
        &self.params[axis.index()]
    }

    /// Last step period sent to the axis.
    pub fn period(&self, axis: Axis) -> u32 {
        self.periods[axis.index()]
    }

    /// Establishes the zero encoder positions, energizing the motors on first use.
    ///
    /// If neither axis has been initialized yet, the current positions become the zero
    /// positions (RA: counterweight down, Dec: pointing at the pole). Otherwise a previous
    /// session already did this and the controller's default origin applies.
    ///
    /// Returns the zero encoder values.
    #[must_use]
    pub fn initialize(&mut self) -> Result<[u32; 2]> {
        let ra_status = self.read_status(Axis::RaAzimuth)?;
        let dec_status = self.read_status(Axis::DecAltitude)?;

        if !ra_status.initialized && !dec_status.initialized {
            let ra_zero = self.get_encoder(Axis::RaAzimuth)?;
            let dec_zero = self.get_encoder(Axis::DecAltitude)?;
            let dec_home = dec_zero.wrapping_add(self.params(Axis::DecAltitude).counts_per_rev / 4) & 0xFF_FFFF;
            self.set_encoder(Axis::DecAltitude, dec_home)?;

            for axis in &AXES {
                self.codec.dispatch(*axis, Opcode::Initialize, Argument::None)?;
                self.cache[axis.index()] = None;
            }

            log::info!("axes initialized; zero encoders: RA 0x{:06X}, Dec 0x{:06X}", ra_zero, dec_zero);
            Ok([ra_zero, dec_zero])
        } else {
            log::info!("axes already initialized");
            Ok([DEFAULT_ZERO_ENCODER, DEFAULT_ZERO_ENCODER])
        }
    }

    /// Returns axis status, re-reading it if the cached value is stale.
    #[must_use]
    pub fn get_status(&mut self, axis: Axis) -> Result<AxisStatus> {
        if let Some(cached) = &self.cache[axis.index()] {
            if cached.read_at.elapsed() <= self.status_refresh {
                return Ok(cached.status);
            }
        }

        self.read_status(axis)
    }

    /// Reads axis status from the controller.
    #[must_use]
    pub fn read_status(&mut self, axis: Axis) -> Result<AxisStatus> {
        let reply = self.codec.dispatch(axis, Opcode::GetAxisStatus, Argument::None)?;
        let status = decode_status(&reply).ok_or_else(|| malformed(axis, Opcode::GetAxisStatus, &reply))?;
        self.cache[axis.index()] = Some(CachedStatus{ status, read_at: Instant::now() });
        Ok(status)
    }

    #[must_use]
    pub fn axis_state(&mut self, axis: Axis) -> Result<AxisState> {
        let status = self.get_status(axis)?;
        Ok(if !status.running {
            AxisState::FullStop
        } else if status.slew_mode == SlewMode::Slew {
            AxisState::Slewing
        } else {
            AxisState::SlewingTo
        })
    }

    #[must_use]
    pub fn get_encoder(&mut self, axis: Axis) -> Result<u32> {
        let reply = self.codec.dispatch(axis, Opcode::GetAxisPosition, Argument::None)?;
        decode_payload(&reply, "encoder position")
    }

    #[must_use]
    pub fn set_encoder(&mut self, axis: Axis, value: u32) -> Result<()> {
        self.codec.dispatch(axis, Opcode::SetAxisPosition, Argument::Value(value))?;
        Ok(())
    }

    /// Sets motion mode; stops the axis first if it runs in a different mode.
    #[must_use]
    pub fn set_motion_mode(&mut self, axis: Axis, mode: MotionMode) -> Result<()> {
        let status = self.read_status(axis)?;
        let unchanged = status.direction == mode.direction
            && status.speed == mode.speed
            && status.slew_mode == mode.slew_mode;

        if unchanged {
            return Ok(());
        }

        if status.running {
            log::debug!("{} axis: stopping to change motion mode", axis);
            self.stop_and_wait(axis)?;
        }

        let (m, d) = motion_mode_chars(mode.slew_mode, mode.speed, mode.direction);
        log::debug!("{} axis: motion mode {}{}", axis, m, d);
        self.codec.dispatch(axis, Opcode::SetMotionMode, Argument::MotionMode(m, d))?;
        self.cache[axis.index()] = None;
        Ok(())
    }

    /// Sets step period; in high-speed mode it is limited to the axis' minimum.
    #[must_use]
    pub fn set_speed_period(&mut self, axis: Axis, period: u32) -> Result<()> {
        let status = self.read_status(axis)?;
        let min_period = self.params(axis).min_period;
        let period = if status.speed == SpeedMode::High && period < min_period {
            log::warn!("{} axis: period {} raised to minimum {}", axis, period, min_period);
            min_period
        } else {
            period
        };

        self.codec.dispatch(axis, Opcode::SetStepPeriod, Argument::Value(period))?;
        self.periods[axis.index()] = period;
        Ok(())
    }

    #[must_use]
    pub fn set_target_increment(&mut self, axis: Axis, increment: u32) -> Result<()> {
        self.codec.dispatch(axis, Opcode::SetGotoTargetIncrement, Argument::Value(increment))?;
        Ok(())
    }

    #[must_use]
    pub fn set_break_increment(&mut self, axis: Axis, increment: u32) -> Result<()> {
        self.codec.dispatch(axis, Opcode::SetBreakPointIncrement, Argument::Value(increment))?;
        Ok(())
    }

    #[must_use]
    pub fn start(&mut self, axis: Axis) -> Result<()> {
        log::debug!("{} axis: start", axis);
        self.codec.dispatch(axis, Opcode::StartMotion, Argument::None)?;
        self.cache[axis.index()] = None;
        Ok(())
    }

    /// Decelerating stop; does not wait.
    #[must_use]
    pub fn stop_slow(&mut self, axis: Axis) -> Result<()> {
        log::debug!("{} axis: stop", axis);
        self.codec.dispatch(axis, Opcode::NotInstantAxisStop, Argument::None)?;
        self.cache[axis.index()] = None;
        Ok(())
    }

    /// Immediate stop, for emergencies only.
    #[must_use]
    pub fn stop_instant(&mut self, axis: Axis) -> Result<()> {
        log::warn!("{} axis: instant stop", axis);
        self.codec.dispatch(axis, Opcode::InstantAxisStop, Argument::None)?;
        self.cache[axis.index()] = None;
        Ok(())
    }

    /// Decelerating stop; polls until the axis reports it is stopped.
    #[must_use]
    pub fn stop_and_wait(&mut self, axis: Axis) -> Result<()> {
        self.stop_slow(axis)?;

        let tstart = Instant::now();
        while self.read_status(axis)?.running {
            if tstart.elapsed() > AXIS_STOP_MOTION_TIMEOUT {
                log::error!("{} axis did not stop within {:?}", axis, AXIS_STOP_MOTION_TIMEOUT);
                return Err(TransportError::Timeout.into());
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }

        Ok(())
    }

    /// Converts a rate (multiple of sidereal) to speed mode and step period.
    #[must_use]
    pub fn period_for_rate(&self, axis: Axis, rate: f64) -> Result<(SpeedMode, u32)> {
        let mut abs_rate = rate.abs();
        if !(MIN_RATE..=MAX_RATE).contains(&abs_rate) {
            return Err(MountError::Parameter(format!(
                "rate out of limits: {:.2}x sidereal (min {:.2}, max {:.2})", abs_rate, MIN_RATE, MAX_RATE
            )));
        }

        let p = self.params(axis);
        let speed = if abs_rate > LOW_SPEED_MARGIN_RATE {
            abs_rate /= p.high_speed_ratio as f64;
            SpeedMode::High
        } else {
            SpeedMode::Low
        };

        let period = (SIDEREAL_DAY_SECONDS * p.counts_per_worm as f64 / p.counts_per_rev as f64) / abs_rate;

        Ok((speed, period as u32))
    }

    /// Configures a constant-rate slew (multiple of sidereal, signed) without starting the axis.
    #[must_use]
    pub fn set_rate(&mut self, axis: Axis, rate: f64) -> Result<()> {
        let (speed, period) = self.period_for_rate(axis, rate)?;
        let direction = if rate >= 0.0 { Direction::Forward } else { Direction::Backward };
        log::debug!("{} axis: rate {:.4}x sidereal, period {}", axis, rate, period);

        self.set_motion_mode(axis, MotionMode{ slew_mode: SlewMode::Slew, speed, direction })?;
        self.set_speed_period(axis, period)
    }

    /// Slews at a constant rate (multiple of sidereal, signed).
    #[must_use]
    pub fn slew(&mut self, axis: Axis, rate: f64) -> Result<()> {
        let status = self.get_status(axis)?;
        if status.running && status.slew_mode == SlewMode::Goto {
            return Err(MountError::Precondition(format!("{} axis: cannot slew while goto is in progress", axis)));
        }

        self.set_rate(axis, rate)?;
        if !self.read_status(axis)?.running {
            self.start(axis)?;
        }

        Ok(())
    }

    /// Starts a goto by the given encoder deltas; axes with zero delta are left alone.
    #[must_use]
    pub fn slew_to(&mut self, deltas: [i64; 2]) -> Result<()> {
        for axis in &AXES {
            let delta = deltas[axis.index()];
            if delta == 0 {
                continue;
            }

            let direction = if delta > 0 { Direction::Forward } else { Direction::Backward };
            let increment = std::cmp::min(delta.unsigned_abs(), crate::mount::skywatcher::MAX_HEX24 as u64) as u32;
            let high_speed = increment > HIGH_SPEED_GOTO_MARGIN;

            log::debug!("{} axis: goto by {} counts", axis, delta);

            self.set_motion_mode(*axis, MotionMode{
                slew_mode: SlewMode::Goto,
                speed: if high_speed { SpeedMode::High } else { SpeedMode::Low },
                direction
            })?;

            let period = if high_speed { self.params(*axis).min_period } else { LOW_SPEED_GOTO_PERIOD };
            self.set_speed_period(*axis, period)?;
            self.set_target_increment(*axis, increment)?;
            let breaks = if high_speed { std::cmp::min(increment, 3200) } else { std::cmp::min(increment, 200) };
            self.set_break_increment(*axis, breaks)?;
            self.start(*axis)?;
        }

        Ok(())
    }
}

fn malformed(axis: Axis, opcode: Opcode, reply: &str) -> MountError {
    crate::mount::ProtocolError::Malformed{
        command: format!(":{}{}", opcode.as_char(), axis.as_char()),
        response: reply.to_string()
    }.into()
}

fn decode_payload(reply: &str, what: &str) -> Result<u32> {
    decode_hex(reply).ok_or_else(|| crate::mount::ProtocolError::Malformed{
        command: what.to_string(),
        response: reply.to_string()
    }.into())
}
