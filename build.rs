//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2020-2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Build script.
//!

fn main() {
    let output_dir = std::env::var("OUT_DIR").expect("OUT_DIR not set");
    let version_path = std::path::Path::new(&output_dir).join("version");

    let version_str = match get_commit_hash() {
        Some(hash) => format!("{} ({})", env!("CARGO_PKG_VERSION"), hash),
        None => env!("CARGO_PKG_VERSION").to_string()
    };

    std::fs::write(version_path, version_str).expect("failed to write version file");
}

fn get_commit_hash() -> Option<String> {
    let output = std::process::Command::new("git")
        .arg("log").arg("-1")
        .arg("--pretty=format:%h")
        .arg("--abbrev=8")
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .output()
        .ok()?;

    if output.status.success() && !output.stdout.is_empty() {
        Some(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        None
    }
}
