//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2020-2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Timer.
//!

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

enum Command<T> {
    Schedule(Instant, T),
    Cancel
}

/// Delivers a value to a channel once, after a delay.
///
/// The timer thread only sends; all handling happens on the receiving side.
pub struct OneShotTimer<T: Send + 'static> {
    sender_main: Sender<Command<T>>
}

impl<T: Send + 'static> OneShotTimer<T> {
    pub fn new(output: Sender<T>) -> OneShotTimer<T> {
        let (sender_main, receiver_timer) = crossbeam::channel::unbounded::<Command<T>>();

        std::thread::spawn(move || timer_thread(receiver_timer, output));

        OneShotTimer{ sender_main }
    }

    /// Sends `value` once after `delay`; any previously scheduled run will be cancelled.
    pub fn run_once(&self, delay: Duration, value: T) {
        if self.sender_main.send(Command::Schedule(Instant::now() + delay, value)).is_err() {
            log::error!("timer thread has terminated");
        }
    }

    pub fn stop(&self) {
        if self.sender_main.send(Command::Cancel).is_err() {
            log::error!("timer thread has terminated");
        }
    }
}

fn timer_thread<T>(receiver: Receiver<Command<T>>, output: Sender<T>) {
    let mut scheduled: Option<(Instant, T)> = None;

    loop {
        let recv_result = match &scheduled {
            Some((t, _)) => receiver.recv_deadline(*t),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected)
        };

        match recv_result {
            Ok(Command::Schedule(t, value)) => scheduled = Some((t, value)),

            Ok(Command::Cancel) => scheduled = None,

            Err(RecvTimeoutError::Timeout) => if let Some((_, value)) = scheduled.take() {
                if output.send(value).is_err() { break; }
            },

            Err(RecvTimeoutError::Disconnected) => break
        }
    }
}
