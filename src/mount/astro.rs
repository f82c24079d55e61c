//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Time and sidereal time.
//!
//! Sidereal time per J. Meeus, "Astronomical Algorithms", ch. 12 and 22
//! (low-precision nutation).
//!

use chrono::{DateTime, Utc};

/// Julian date of the Unix epoch.
const JD_UNIX_EPOCH: f64 = 2440587.5;

const JD_J2000: f64 = 2451545.0;

const DAYS_PER_CENTURY: f64 = 36525.0;

pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn julian_date(t: DateTime<Utc>) -> f64 {
    let seconds = t.timestamp() as f64 + t.timestamp_subsec_nanos() as f64 * 1.0e-9;
    JD_UNIX_EPOCH + seconds / 86400.0
}

fn julian_centuries(jd: f64) -> f64 {
    (jd - JD_J2000) / DAYS_PER_CENTURY
}

/// Greenwich mean sidereal time (hours, [0, 24)).
pub fn mean_sidereal_time(jd: f64) -> f64 {
    let t = julian_centuries(jd);
    let degrees = 280.46061837
        + 360.98564736629 * (jd - JD_J2000)
        + 0.000387933 * t * t
        - t * t * t / 38710000.0;

    degrees.rem_euclid(360.0) / 15.0
}

/// Nutation in longitude and obliquity (arcseconds).
fn nutation(jd: f64) -> (f64, f64) {
    let t = julian_centuries(jd);
    let omega = (125.04452 - 1934.136261 * t).to_radians();
    let l_sun = (280.4665 + 36000.7698 * t).to_radians();
    let l_moon = (218.3165 + 481267.8813 * t).to_radians();

    let d_psi = -17.20 * omega.sin() - 1.32 * (2.0 * l_sun).sin()
        - 0.23 * (2.0 * l_moon).sin() + 0.21 * (2.0 * omega).sin();
    let d_eps = 9.20 * omega.cos() + 0.57 * (2.0 * l_sun).cos()
        + 0.10 * (2.0 * l_moon).cos() - 0.09 * (2.0 * omega).cos();

    (d_psi, d_eps)
}

/// Mean obliquity of the ecliptic (degrees).
fn mean_obliquity(jd: f64) -> f64 {
    let t = julian_centuries(jd);
    23.0 + 26.0 / 60.0 + (21.448 - 46.8150 * t - 0.00059 * t * t + 0.001813 * t * t * t) / 3600.0
}

/// Greenwich apparent sidereal time (hours, [0, 24)).
pub fn apparent_sidereal_time(jd: f64) -> f64 {
    let (d_psi, d_eps) = nutation(jd);
    let eps = (mean_obliquity(jd) + d_eps / 3600.0).to_radians();
    // equation of the equinoxes, in seconds of time
    let eq_equinoxes = d_psi * eps.cos() / 15.0;

    (mean_sidereal_time(jd) + eq_equinoxes / 3600.0).rem_euclid(24.0)
}

/// Local apparent sidereal time (hours, [0, 24]) for longitude in degrees, east positive.
pub fn local_sidereal_time(jd: f64, longitude: f64) -> f64 {
    crate::mount::coords::range_24h(apparent_sidereal_time(jd) + longitude / 15.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;
    use chrono::TimeZone;

    fn hms(h: f64, m: f64, s: f64) -> f64 {
        h + m / 60.0 + s / 3600.0
    }

    #[test]
    fn julian_date_of_epochs() {
        assert_almost_eq!(JD_UNIX_EPOCH, julian_date(Utc.timestamp_opt(0, 0).unwrap()), 1.0e-9);
        assert_almost_eq!(
            JD_J2000,
            julian_date(Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap()),
            1.0e-9
        );
        assert_almost_eq!(
            2446895.5,
            julian_date(Utc.with_ymd_and_hms(1987, 4, 10, 0, 0, 0).unwrap()),
            1.0e-9
        );
    }

    #[test]
    fn sidereal_time_at_j2000() {
        assert_almost_eq!(18.697374558, mean_sidereal_time(JD_J2000), 1.0e-8);
    }

    #[test]
    fn sidereal_time_meeus_example() {
        // Meeus, example 12.a
        let jd = 2446895.5;
        assert_almost_eq!(hms(13.0, 10.0, 46.3668), mean_sidereal_time(jd), 0.001 / 3600.0);
        assert_almost_eq!(hms(13.0, 10.0, 46.1351), apparent_sidereal_time(jd), 0.01 / 3600.0);
    }

    #[test]
    fn local_sidereal_time_adds_longitude() {
        let jd = 2446895.5;
        let gast = apparent_sidereal_time(jd);
        assert_almost_eq!(gast + 1.0, local_sidereal_time(jd, 15.0), 1.0e-9);
        assert_almost_eq!(crate::mount::coords::range_24h(gast - 8.0), local_sidereal_time(jd, -120.0), 1.0e-9);
    }
}
