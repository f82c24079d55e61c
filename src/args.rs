//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2023-2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Command-line argument parsing.
//!

use std::path::PathBuf;

mod cmdline {
    pub const ENABLE_LOGGING: &str = "log";
    pub const CONFIG_FILE: &str = "config";
    pub const DEVICE: &str = "device";
}

#[derive(Debug, Default, PartialEq)]
pub struct Args {
    pub logging: bool,
    /// Overrides the default configuration file location.
    pub config: Option<PathBuf>,
    /// Overrides the configured serial device.
    pub device: Option<String>
}

#[derive(Debug, PartialEq)]
pub enum ArgsError {
    UnknownOption(String),
    UnexpectedValue(String),
    MissingValue(String)
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgsError::UnknownOption(s) => write!(f, "unknown command-line option: --{}", s),
            ArgsError::UnexpectedValue(s) => write!(f, "unexpected value: {}", s),
            ArgsError::MissingValue(s) => write!(f, "option --{} requires a value", s),
        }
    }
}

impl std::error::Error for ArgsError {}

pub fn parse_command_line<I: Iterator<Item=String>>(stream: I) -> Result<Args, ArgsError> {
    let allowed_options = [
        cmdline::ENABLE_LOGGING,
        cmdline::CONFIG_FILE,
        cmdline::DEVICE
    ];

    // key: option name
    let mut option_values = std::collections::HashMap::<String, Vec<String>>::new();

    let mut current: Option<&mut Vec<String>> = None;

    for arg in stream.skip(1) /*skip the binary name*/ {
        if let Some(name) = arg.strip_prefix("--") {
            if !allowed_options.contains(&name) {
                return Err(ArgsError::UnknownOption(name.to_string()));
            }
            current = Some(option_values.entry(name.to_string()).or_insert_with(Vec::new));
        } else {
            match current.as_mut() {
                Some(values) => values.push(arg),
                None => return Err(ArgsError::UnexpectedValue(arg))
            }
        }
    }

    let single_value = |name: &str| -> Result<Option<String>, ArgsError> {
        match option_values.get(name) {
            None => Ok(None),
            Some(values) => match values.as_slice() {
                [value] => Ok(Some(value.clone())),
                [] => Err(ArgsError::MissingValue(name.to_string())),
                [_, extra, ..] => Err(ArgsError::UnexpectedValue(extra.clone()))
            }
        }
    };

    if let Some(values) = option_values.get(cmdline::ENABLE_LOGGING) {
        if let Some(value) = values.first() {
            return Err(ArgsError::UnexpectedValue(value.clone()));
        }
    }

    Ok(Args{
        logging: option_values.contains_key(cmdline::ENABLE_LOGGING),
        config: single_value(cmdline::CONFIG_FILE)?.map(PathBuf::from),
        device: single_value(cmdline::DEVICE)?
    })
}
