//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2020-2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Entry point of the `eqmount` executable.
//!

mod args;

use eqmount::config::{Configuration, config_file_path};
use eqmount::mount::{astro::SystemClock, session::MountSession, status::LogSink};
use std::time::Duration;

pub const VERSION_STRING: &'static str = include_str!(concat!(env!("OUT_DIR"), "/version"));

const TICK_INTERVAL: Duration = Duration::from_secs(1);

fn main() {
    let args = match args::parse_command_line(std::env::args()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}.", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = set_up_logging(args.logging) {
        eprintln!("Failed to set up logging: {}.", e);
    }

    log::info!("EQMount ver. {} on {} started", VERSION_STRING, os_info::get());

    let config = match &args.config {
        Some(path) => Configuration::load(path),
        None => Configuration::new()
    };
    let mut config = match config {
        Ok(config) => config,
        Err(e) => {
            log::error!("invalid configuration: {}", e);
            eprintln!(
                "Failed to load configuration from {}: {}.",
                args.config.clone().unwrap_or_else(config_file_path).display(), e
            );
            std::process::exit(1);
        }
    };
    if let Some(device) = args.device {
        config.connection.device = device;
    }

    let mut session = match MountSession::connect(&config, Box::new(SystemClock), Box::new(LogSink)) {
        Ok(session) => session,
        Err(e) => {
            log::error!("failed to connect: {}", e);
            eprintln!("Failed to connect to the mount at {}: {}.", config.connection.device, e);
            std::process::exit(1);
        }
    };

    println!(
        "Connected to {} (firmware {}).",
        session.info().model, session.info().firmware_version()
    );

    if let Err(e) = run(&mut session) {
        log::error!("mount error: {}", e);
        eprintln!("Mount error: {}.", e);
        session.disconnect();
        std::process::exit(1);
    }
}

/// Services ticks and guide timer events on this thread until an error occurs.
fn run(session: &mut MountSession) -> eqmount::mount::Result<()> {
    let ticker = crossbeam::channel::tick(TICK_INTERVAL);
    let timer_events = session.timer_events();

    loop {
        crossbeam::select! {
            recv(ticker) -> _ => session.tick()?,

            recv(timer_events) -> event => if let Ok(event) = event {
                session.handle_timer_event(event)?;
            }
        }
    }
}

fn set_up_logging(to_file: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !to_file {
        simplelog::TermLogger::init(
            simplelog::LevelFilter::Warn,
            simplelog::Config::default(),
            simplelog::TerminalMode::Stderr,
            simplelog::ColorChoice::Auto
        )?;
        return Ok(());
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        log::error!("{}\n\n{}", info, backtrace);
    }));

    let tz_offset = *chrono::Local::now().offset();
    let logfile = dirs::data_dir().unwrap_or_default()
        .join(format!("eqmount_{}.log", chrono::Local::now().format("%Y-%m-%d_%H%M%S")));
    println!("Logging to: {}", logfile.to_string_lossy());
    simplelog::WriteLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::ConfigBuilder::new()
            .set_target_level(simplelog::LevelFilter::Error)
            .set_time_offset(time::UtcOffset::from_whole_seconds(tz_offset.local_minus_utc())?)
            .set_time_format_custom(simplelog::format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
            ))
            .build(),
        std::fs::File::create(logfile)?
    )?;

    Ok(())
}
