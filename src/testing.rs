//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Test doubles: simulated motor controller, fixed clock, recording status sink.
//!

use crate::mount::{
    Axis,
    astro::Clock,
    skywatcher::{Codec, CodecSettings, SerialTransport, decode_hex24, encode_hex24},
    status::{MountStatus, StatusSink}
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn timed_out() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "no data")
}

/// Replies to each written frame with the next scripted reply (`None`: no reply).
pub struct ScriptedTransport {
    replies: VecDeque<Option<Vec<u8>>>,
    pending: VecDeque<u8>,
    written: Arc<Mutex<Vec<u8>>>
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Option<Vec<u8>>>) -> ScriptedTransport {
        ScriptedTransport{
            replies: replies.into_iter().collect(),
            pending: VecDeque::new(),
            written: Arc::new(Mutex::new(vec![]))
        }
    }

    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        self.written.clone()
    }
}

impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.pending.pop_front() {
                Some(b) => { buf[n] = b; n += 1; },
                None => break
            }
        }
        if n == 0 { Err(timed_out()) } else { Ok(n) }
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        if buf.last() == Some(&0x0D) {
            if let Some(Some(reply)) = self.replies.pop_front() {
                self.pending.extend(reply);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
}

impl SerialTransport for ScriptedTransport {
    fn discard_input(&mut self) -> std::io::Result<()> {
        self.pending.clear();
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SimAxis {
    position: u32,
    running: bool,
    backward: bool,
    high_speed: bool,
    goto_mode: bool,
    initialized: bool,
    period: u32,
    target_increment: u32,
    break_increment: u32,
    /// Status polls left until a running goto reports completion.
    goto_polls_left: u32
}

struct SimState {
    board_version: u32,
    axes: [SimAxis; 2],
    goto_duration: u32,
    /// Number of steps a finished goto falls short of its target.
    goto_shortfall: u32,
    unresponsive: bool,
    input: Vec<u8>,
    output: VecDeque<u8>,
    log: Vec<String>
}

impl SimState {
    fn process(&mut self, frame: &str) -> String {
        self.log.push(frame.to_string());

        let mut chars = frame.chars().skip(1);
        let opcode = chars.next().unwrap_or(' ');
        let index = match chars.next() {
            Some('1') => 0,
            Some('2') => 1,
            _ => return "!3".into()
        };
        let arg: String = chars.collect();
        let value = decode_hex24(&arg);
        let goto_duration = self.goto_duration;
        let goto_shortfall = self.goto_shortfall;
        let board_version = self.board_version;
        let axis = &mut self.axes[index];

        match opcode {
            'e' => format!("={:06X}", board_version),
            'a' => format!("={}", encode_hex24(SimulatedController::COUNTS_PER_REV)),
            'b' => format!("={}", encode_hex24(SimulatedController::COUNTS_PER_WORM)),
            'g' => format!("={}", encode_hex24(SimulatedController::HIGH_SPEED_RATIO)),
            's' => format!("={}", encode_hex24(0)),
            'j' => format!("={}", encode_hex24(axis.position)),
            'f' => {
                if axis.running && axis.goto_mode {
                    if axis.goto_polls_left == 0 {
                        axis.running = false;
                    } else {
                        axis.goto_polls_left -= 1;
                    }
                }
                format!(
                    "={:X}{:X}{:X}",
                    (if axis.goto_mode { 0 } else { 1 }) | (if axis.backward { 2 } else { 0 }) | (if axis.high_speed { 4 } else { 0 }),
                    if axis.running { 1 } else { 0 },
                    if axis.initialized { 1 } else { 0 }
                )
            },
            'F' => { axis.initialized = true; "=".into() },
            'E' => match value {
                Some(v) => { axis.position = v; "=".into() },
                None => "!3".into()
            },
            'G' => {
                if axis.running { return "!2".into(); }
                let mut mc = arg.chars();
                match (mc.next(), mc.next()) {
                    (Some(m), Some(d)) => {
                        axis.goto_mode = m == '0' || m == '2';
                        axis.high_speed = m == '0' || m == '3';
                        axis.backward = d == '1';
                        "=".into()
                    },
                    _ => "!1".into()
                }
            },
            'H' | 'M' | 'I' => match value {
                Some(v) => {
                    match opcode {
                        'H' => axis.target_increment = v,
                        'M' => axis.break_increment = v,
                        _ => axis.period = v
                    }
                    "=".into()
                },
                None => "!1".into()
            },
            'J' => {
                axis.running = true;
                if axis.goto_mode {
                    let travelled = axis.target_increment.saturating_sub(goto_shortfall);
                    let moved = if axis.backward {
                        axis.position.wrapping_sub(travelled)
                    } else {
                        axis.position.wrapping_add(travelled)
                    };
                    axis.position = moved & 0xFF_FFFF;
                    axis.goto_polls_left = goto_duration;
                    if goto_duration == 0 {
                        axis.running = false;
                    }
                }
                "=".into()
            },
            'K' | 'L' => {
                axis.running = false;
                axis.goto_polls_left = 0;
                "=".into()
            },
            _ => "!0".into()
        }
    }
}

/// In-memory motor controller speaking the serial protocol.
///
/// Gotos complete instantly (optionally after a number of status polls); constant-rate
/// slews do not move the encoders.
#[derive(Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>
}

impl SimulatedController {
    pub const COUNTS_PER_REV: u32 = 9_024_000;
    pub const COUNTS_PER_WORM: u32 = 64_935;
    pub const HIGH_SPEED_RATIO: u32 = 16;

    pub fn new() -> SimulatedController {
        SimulatedController::with_board_version(0x02_0401)
    }

    pub fn with_board_version(board_version: u32) -> SimulatedController {
        let mut axes: [SimAxis; 2] = Default::default();
        for axis in axes.iter_mut() {
            axis.position = 0x80_0000;
        }

        SimulatedController{ state: Arc::new(Mutex::new(SimState{
            board_version,
            axes,
            goto_duration: 0,
            goto_shortfall: 0,
            unresponsive: false,
            input: vec![],
            output: VecDeque::new(),
            log: vec![]
        }))}
    }

    pub fn codec(&self) -> Codec {
        Codec::new(Box::new(self.clone()), CodecSettings{ retries: 3, timeout: Duration::from_millis(20) })
    }

    pub fn log(&self) -> Vec<String> { self.state.lock().unwrap().log.clone() }

    pub fn clear_log(&self) { self.state.lock().unwrap().log.clear(); }

    pub fn encoder(&self, axis: Axis) -> u32 { self.state.lock().unwrap().axes[axis.index()].position }

    pub fn set_encoders(&self, values: [u32; 2]) {
        let mut state = self.state.lock().unwrap();
        state.axes[0].position = values[0];
        state.axes[1].position = values[1];
    }

    pub fn initialized(&self, axis: Axis) -> bool { self.state.lock().unwrap().axes[axis.index()].initialized }

    pub fn set_initialized(&self, value: bool) {
        let mut state = self.state.lock().unwrap();
        for axis in state.axes.iter_mut() { axis.initialized = value; }
    }

    pub fn running(&self, axis: Axis) -> bool { self.state.lock().unwrap().axes[axis.index()].running }

    pub fn backward(&self, axis: Axis) -> bool { self.state.lock().unwrap().axes[axis.index()].backward }

    pub fn period(&self, axis: Axis) -> u32 { self.state.lock().unwrap().axes[axis.index()].period }

    /// Number of status polls a goto keeps reporting "running".
    pub fn set_goto_duration(&self, polls: u32) { self.state.lock().unwrap().goto_duration = polls; }

    pub fn set_goto_shortfall(&self, counts: u32) { self.state.lock().unwrap().goto_shortfall = counts; }

    pub fn set_unresponsive(&self, value: bool) { self.state.lock().unwrap().unresponsive = value; }
}

impl Read for SimulatedController {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        let mut n = 0;
        while n < buf.len() {
            match state.output.pop_front() {
                Some(b) => { buf[n] = b; n += 1; },
                None => break
            }
        }
        if n == 0 { Err(timed_out()) } else { Ok(n) }
    }
}

impl Write for SimulatedController {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        state.input.extend_from_slice(buf);

        while let Some(pos) = state.input.iter().position(|b| *b == 0x0D) {
            let frame: Vec<u8> = state.input.drain(..=pos).collect();
            let frame = String::from_utf8_lossy(&frame[..frame.len() - 1]).to_string();
            let reply = state.process(&frame);
            if !state.unresponsive {
                state.output.extend(reply.bytes());
                state.output.push_back(0x0D);
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
}

impl SerialTransport for SimulatedController {
    fn discard_input(&mut self) -> std::io::Result<()> {
        self.state.lock().unwrap().output.clear();
        Ok(())
    }
}

/// Clock returning a settable time.
#[derive(Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> FixedClock {
        FixedClock{ now: Arc::new(Mutex::new(now)) }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Status sink keeping every published snapshot.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub statuses: Arc<Mutex<Vec<MountStatus>>>
}

impl StatusSink for RecordingSink {
    fn publish(&mut self, status: &MountStatus) {
        self.statuses.lock().unwrap().push(status.clone());
    }
}

/// Asserts two floats differ by at most `eps`.
#[macro_export]
macro_rules! assert_almost_eq {
    ($a:expr, $b:expr, $eps:expr) => {{
        let (a, b, eps): (f64, f64, f64) = ($a, $b, $eps);
        assert!((a - b).abs() <= eps, "{} != {} (eps = {})", a, b, eps);
    }};
}
