//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Driver for Sky-Watcher equatorial mounts speaking the motor controller serial protocol.
//!

pub mod config;
pub mod mount;
pub mod timer;

#[cfg(test)]
mod testing;
