//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2020-2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Sky-Watcher motor controller serial protocol.
//!
//! Commands have the form `:<opcode><axis>[argument]<CR>`, replies are
//! `=<payload><CR>` or `!<error code><CR>`. Numeric values travel as hex digit
//! pairs, least significant byte first.
//!

use crate::mount::{Axis, MountError, ProtocolError, Result, TransportError};
use std::time::{Duration, Instant};

mod command {
    pub const START_CHAR_OUT: u8 = ':' as u8;
    pub const END_CHAR: u8       = 0xD;
    pub const START_CHAR_IN: u8  = '=' as u8;
    pub const ERROR_CHAR: u8     = '!' as u8;
}

/// Largest value representable by a 24-bit argument.
pub const MAX_HEX24: u32 = 0xFF_FFFF;

pub const DEFAULT_RETRIES: u32 = 3;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    Initialize,
    InquireMotorBoardVersion,
    InquireGridPerRevolution,
    InquireTimerInterruptFreq,
    InquireHighSpeedRatio,
    InquirePecPeriod,
    InstantAxisStop,
    NotInstantAxisStop,
    SetAxisPosition,
    GetAxisPosition,
    GetAxisStatus,
    SetMotionMode,
    SetGotoTargetIncrement,
    SetBreakPointIncrement,
    SetStepPeriod,
    StartMotion
}

impl Opcode {
    pub fn as_char(&self) -> char {
        match self {
            Opcode::Initialize =>                'F',
            Opcode::InquireMotorBoardVersion =>  'e',
            Opcode::InquireGridPerRevolution =>  'a',
            Opcode::InquireTimerInterruptFreq => 'b',
            Opcode::InquireHighSpeedRatio =>     'g',
            Opcode::InquirePecPeriod =>          's',
            Opcode::InstantAxisStop =>           'L',
            Opcode::NotInstantAxisStop =>        'K',
            Opcode::SetAxisPosition =>           'E',
            Opcode::GetAxisPosition =>           'j',
            Opcode::GetAxisStatus =>             'f',
            Opcode::SetMotionMode =>             'G',
            Opcode::SetGotoTargetIncrement =>    'H',
            Opcode::SetBreakPointIncrement =>    'M',
            Opcode::SetStepPeriod =>             'I',
            Opcode::StartMotion =>               'J'
        }
    }
}

/// Command argument.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Argument {
    None,
    /// Two-character motion mode (mode, direction).
    MotionMode(char, char),
    /// 24-bit value sent as 6 hex digits.
    Value(u32)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction { Forward, Backward }

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpeedMode { Low, High }

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlewMode { Slew, Goto }

/// Decoded reply to the axis status inquiry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AxisStatus {
    pub running: bool,
    pub direction: Direction,
    pub speed: SpeedMode,
    pub slew_mode: SlewMode,
    pub initialized: bool
}

/// Byte stream to the motor controller.
pub trait SerialTransport: std::io::Read + std::io::Write + Send {
    /// Discards any unread input.
    fn discard_input(&mut self) -> std::io::Result<()>;
}

impl SerialTransport for Box<dyn serialport::SerialPort> {
    fn discard_input(&mut self) -> std::io::Result<()> {
        self.clear(serialport::ClearBuffer::Input).map_err(|e| e.into())
    }
}

#[derive(Copy, Clone, Debug)]
pub struct CodecSettings {
    /// Number of send+receive attempts before giving up.
    pub retries: u32,
    /// Deadline for a complete reply.
    pub timeout: Duration
}

impl Default for CodecSettings {
    fn default() -> CodecSettings {
        CodecSettings{ retries: DEFAULT_RETRIES, timeout: DEFAULT_TIMEOUT }
    }
}

/// Opens the serial device with the controller's line settings.
#[must_use]
pub fn open_serial_port(device: &str, baud_rate: u32) -> Result<Box<dyn SerialTransport>> {
    let serial_port = serialport::new(device, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .flow_control(serialport::FlowControl::None)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .timeout(Duration::from_millis(50))
        .open()?;

    Ok(Box::new(serial_port))
}

/// Frames commands, parses replies and retries on timeouts.
pub struct Codec {
    transport: Box<dyn SerialTransport>,
    settings: CodecSettings
}

impl Codec {
    pub fn new(transport: Box<dyn SerialTransport>, settings: CodecSettings) -> Codec {
        Codec{ transport, settings }
    }

    /// Sends a command and returns the reply payload (without the leading `=` and trailing CR).
    #[must_use]
    pub fn dispatch(&mut self, axis: Axis, opcode: Opcode, arg: Argument) -> Result<String> {
        let frame = encode_frame(axis, opcode, arg)?;
        let command_str = String::from_utf8_lossy(&frame[..frame.len() - 1]).to_string();

        let attempts = std::cmp::max(1, self.settings.retries);
        for attempt in 1..=attempts {
            self.send(&frame)?;

            match self.read_response(&command_str) {
                Err(MountError::Transport(TransportError::Timeout)) => {
                    log::warn!("no reply to {} (attempt {} of {})", command_str, attempt, attempts);
                },

                result => return result
            }
        }

        log::error!("mount not responding to {}", command_str);
        Err(TransportError::Disconnected.into())
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.transport.discard_input()?;
        self.transport.write_all(frame)?;
        self.transport.flush()?;
        Ok(())
    }

    /// Reads one reply terminated by CR.
    #[must_use]
    pub fn read_response(&mut self, command_str: &str) -> Result<String> {
        let deadline = Instant::now() + self.settings.timeout;
        let mut buf = vec![];
        let mut byte = [0u8; 1];

        loop {
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout.into());
            }

            match self.transport.read(&mut byte) {
                Ok(0) => std::thread::yield_now(),

                Ok(_) => if byte[0] == command::END_CHAR { break; } else { buf.push(byte[0]); },

                Err(e) => match e.kind() {
                    std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted => (),

                    _ => return Err(TransportError::Io(e).into())
                }
            }
        }

        let reply = parse_reply(command_str, &buf);
        log::trace!("{} -> {}", command_str, String::from_utf8_lossy(&buf));
        reply
    }
}

#[must_use]
fn encode_frame(axis: Axis, opcode: Opcode, arg: Argument) -> Result<Vec<u8>> {
    let params = match arg {
        Argument::None => String::new(),
        Argument::MotionMode(mode, direction) => format!("{}{}", mode, direction),
        Argument::Value(value) => {
            if value > MAX_HEX24 {
                return Err(MountError::Parameter(format!("value {} does not fit in 24 bits", value)));
            }
            encode_hex24(value)
        }
    };

    Ok(format!(
        "{}{}{}{}{}",
        command::START_CHAR_OUT as char,
        opcode.as_char(),
        axis.as_char(),
        params,
        command::END_CHAR as char
    ).into_bytes())
}

pub fn error_message(code: u8) -> &'static str {
    match code {
        0 => "Unknown command",
        1 => "Command length error",
        2 => "Motor not stopped",
        3 => "Invalid character",
        4 => "Not initialized",
        5 => "Driver sleeping",
        _ => "Unknown error"
    }
}

/// Interprets a reply (without the trailing CR).
#[must_use]
fn parse_reply(command_str: &str, reply: &[u8]) -> Result<String> {
    let reply_str = String::from_utf8_lossy(reply).to_string();

    match reply.first() {
        Some(&command::START_CHAR_IN) => Ok(reply_str[1..].to_string()),

        Some(&command::ERROR_CHAR) => {
            let code = reply_str[1..].chars().next()
                .and_then(|c| c.to_digit(16))
                .map(|d| d as u8);

            match code {
                Some(code) => Err(ProtocolError::MountRejected{
                    code,
                    message: error_message(code),
                    command: command_str.to_string(),
                    response: reply_str
                }.into()),

                None => Err(ProtocolError::Malformed{
                    command: command_str.to_string(),
                    response: reply_str
                }.into())
            }
        },

        _ => Err(ProtocolError::Malformed{ command: command_str.to_string(), response: reply_str }.into())
    }
}

/// Formats a 24-bit value as 6 hex digits, least significant byte first.
pub fn encode_hex24(i: u32) -> String {
    format!("{:02X}{:02X}{:02X}", i & 0xFF, (i >> 8) & 0xFF, (i >> 16) & 0xFF)
}

/// Parses an even-length run of hex digit pairs, least significant byte first.
pub fn decode_hex(s: &str) -> Option<u32> {
    let s = s.as_bytes();
    if s.len() == 0 || (s.len() & 1 == 1) || s.len() > 8 {
        return None;
    }

    let mut result: u32 = 0;
    for i in (0..=s.len() - 2).step_by(2) {
        let two_hex_digits = std::str::from_utf8(&s[i..i + 2]).ok()?;
        result += u32::from_str_radix(&two_hex_digits, 16).ok()? << (i / 2 * 8);
    }

    Some(result)
}

/// Parses exactly 6 hex digits, least significant byte first.
pub fn decode_hex24(s: &str) -> Option<u32> {
    if s.len() != 6 { None } else { decode_hex(s) }
}

/// Decodes the payload of `Opcode::GetAxisStatus`.
pub fn decode_status(payload: &str) -> Option<AxisStatus> {
    let digits: Vec<u32> = payload.chars().take(3).map(|c| c.to_digit(16)).collect::<Option<Vec<_>>>()?;
    if digits.len() < 3 {
        return None;
    }

    Some(AxisStatus{
        slew_mode: if digits[0] & 0x01 != 0 { SlewMode::Slew } else { SlewMode::Goto },
        direction: if digits[0] & 0x02 != 0 { Direction::Backward } else { Direction::Forward },
        speed: if digits[0] & 0x04 != 0 { SpeedMode::High } else { SpeedMode::Low },
        running: digits[1] & 0x01 != 0,
        initialized: digits[2] & 0x01 != 0
    })
}

/// Returns the `Opcode::SetMotionMode` argument characters.
pub fn motion_mode_chars(slew_mode: SlewMode, speed: SpeedMode, direction: Direction) -> (char, char) {
    let mode = match (slew_mode, speed) {
        (SlewMode::Slew, SpeedMode::Low) => '1',
        (SlewMode::Slew, SpeedMode::High) => '3',
        (SlewMode::Goto, SpeedMode::Low) => '2',
        (SlewMode::Goto, SpeedMode::High) => '0'
    };

    let dir = match direction {
        Direction::Forward => '0',
        Direction::Backward => '1'
    };

    (mode, dir)
}
