//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Sync points and two-star polar alignment.
//!
//! The polar axis solve follows T. Taki, "A simple two-star alignment method"
//! (http://www.whim.org/nebula/math/pdf/twostar.pdf).
//!

use crate::mount::{
    coords::{MountGeometry, encoders_to_radec, range_24h, range_ha, select_pier, target_encoders},
    goto::encoder_delta
};
use cgmath::{Matrix3, Rad, Vector3};
use std::f64::consts::{FRAC_PI_2, PI};

/// A star the mount was synced on.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SyncPoint {
    pub lst: f64,
    pub jd: f64,
    /// Commanded (catalog) right ascension, hours.
    pub target_ra: f64,
    /// Commanded (catalog) declination, degrees.
    pub target_dec: f64,
    /// Right ascension computed from the encoders, hours.
    pub telescope_ra: f64,
    /// Declination computed from the encoders, degrees.
    pub telescope_dec: f64,
    pub target_encoders: [u32; 2],
    pub telescope_encoders: [u32; 2],
    pub delta_ra: f64,
    pub delta_dec: f64,
    pub delta_encoders: [i64; 2]
}

impl SyncPoint {
    /// Creates a sync point from the commanded coordinates and the encoders read at `lst`.
    pub fn new(
        lst: f64,
        jd: f64,
        target_ra: f64,
        target_dec: f64,
        telescope_encoders: [u32; 2],
        geometry: &MountGeometry
    ) -> SyncPoint {
        let telescope = encoders_to_radec(telescope_encoders[0], telescope_encoders[1], lst, geometry);

        let (pier, flipped) = select_pier(range_ha(target_ra - lst), geometry.hemisphere, false);
        let target_enc = target_encoders(target_ra, target_dec, lst, pier, flipped, geometry);

        SyncPoint{
            lst,
            jd,
            target_ra,
            target_dec,
            telescope_ra: telescope.ra,
            telescope_dec: telescope.dec,
            target_encoders: target_enc,
            telescope_encoders,
            delta_ra: target_ra - telescope.ra,
            delta_dec: target_dec - telescope.dec,
            delta_encoders: [
                encoder_delta(target_enc[0], telescope_encoders[0]),
                encoder_delta(target_enc[1], telescope_encoders[1])
            ]
        }
    }
}

/// The two most recent sync points.
#[derive(Clone, Debug, Default)]
pub struct SyncStore {
    current: Option<SyncPoint>,
    previous: Option<SyncPoint>
}

impl SyncStore {
    pub fn new() -> SyncStore {
        SyncStore::default()
    }

    pub fn current(&self) -> Option<&SyncPoint> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&SyncPoint> {
        self.previous.as_ref()
    }

    /// Stores a new point; the current one becomes the previous.
    pub fn add(&mut self, point: SyncPoint) {
        self.previous = self.current.take();
        self.current = Some(point);
    }

    /// Offset (RA hours, Dec degrees) of the current sync point, zero if none.
    pub fn delta(&self) -> (f64, f64) {
        match &self.current {
            Some(p) => (p.delta_ra, p.delta_dec),
            None => (0.0, 0.0)
        }
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.previous = None;
    }
}

/// Adds an offset to coordinates, folding declination past the poles.
///
/// Returns RA in [0, 24] and declination in [-90, 90].
pub fn apply_delta(ra: f64, dec: f64, delta_ra: f64, delta_dec: f64) -> (f64, f64) {
    let mut ra = ra + delta_ra;
    let mut dec = dec + delta_dec;

    if dec > 90.0 {
        dec = 180.0 - dec;
        ra += 12.0;
    } else if dec < -90.0 {
        dec = -180.0 - dec;
        ra += 12.0;
    }

    (range_24h(ra), dec)
}

/// Result of the two-star polar alignment.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PolarAlignment {
    /// Altitude of the mount's polar axis (degrees).
    pub altitude: f64,
    /// Azimuth of the mount's polar axis (degrees, positive towards East).
    pub azimuth: f64,
    /// Polar axis altitude minus the site latitude (degrees).
    pub altitude_offset: f64,
    /// Polar axis azimuth relative to the celestial pole's azimuth (degrees, [-180, 180)).
    pub azimuth_offset: f64,
    /// Where to point for the second star to visually verify a correction (RA hours, Dec degrees).
    pub recommended_ra: f64,
    pub recommended_dec: f64
}

fn hour_angle_radians(ra: f64, lst: f64) -> f64 {
    ((ra - lst) * 15.0).to_radians()
}

/// Estimates the misalignment of the mount's polar axis from two sync points.
///
/// Returns `None` if the stars' hour angles coincide (commanded or observed) or the
/// geometry is degenerate.
pub fn polar_alignment(first: &SyncPoint, second: &SyncPoint, latitude: f64) -> Option<PolarAlignment> {
    let alpha1 = hour_angle_radians(first.telescope_ra, first.lst);
    let delta1 = first.telescope_dec.to_radians();
    let alpha2 = hour_angle_radians(second.telescope_ra, second.lst);
    let delta2 = second.telescope_dec.to_radians();

    let calpha1 = hour_angle_radians(first.target_ra, first.lst);
    let cdelta1 = first.target_dec.to_radians();
    let calpha2 = hour_angle_radians(second.target_ra, second.lst);
    let cdelta2 = second.target_dec.to_radians();

    if calpha1 == calpha2 || alpha1 == alpha2 {
        log::debug!("polar alignment skipped: both stars at the same hour angle");
        return None;
    }

    let cos_sep_sky = cdelta1.sin() * cdelta2.sin() + cdelta1.cos() * cdelta2.cos() * (calpha2 - calpha1).cos();
    let cos_sep_mount = delta1.sin() * delta2.sin() + delta1.cos() * delta2.cos() * (alpha2 - alpha1).cos();
    if cos_sep_sky != cos_sep_mount {
        log::debug!(
            "polar alignment: axes not perpendicular; star separation: sky {:.6}, mount {:.6} rad",
            cos_sep_sky.acos(), cos_sep_mount.acos()
        );
    }
    let separation = cos_sep_sky.acos();

    // declinations corrected for the tilt of the polar axis
    let cos_sum = ((delta2 - delta1).cos() * (1.0 + (alpha2 - alpha1).cos()) - 2.0 * cos_sep_mount)
        / (1.0 - (alpha2 - alpha1).cos());
    let mut sum = cos_sum.acos();
    let negative = if delta1 * delta2 > 0.0 {
        delta1 < 0.0
    } else if delta1.abs() > delta2.abs() {
        delta1 < 0.0
    } else {
        delta2 < 0.0
    };
    if negative { sum = -sum; }

    let d2 = (sum + delta2 - delta1) / 2.0;
    let d1 = sum - d2;
    log::debug!("polar alignment: corrected declinations {:.6} ({:.6}), {:.6} ({:.6})", d1, delta1, d2, delta2);

    let sin_pole_dec = (d1.sin() * cdelta1.sin() + d2.sin() * cdelta2.sin()
        - cos_sep_sky * (d1.sin() * cdelta2.sin() + cdelta1.sin() * d2.sin())
        + d1.cos() * d2.cos() * (alpha2 - alpha1).sin() * cdelta1.cos() * cdelta2.cos() * (calpha2 - calpha1).sin())
        / (separation.sin() * separation.sin());
    let pole_dec = sin_pole_dec.asin();

    let cos_ama1 = (d1.sin() - cdelta1.sin() * sin_pole_dec) / (cdelta1.cos() * pole_dec.cos());
    let cos_ama2 = (d2.sin() - cdelta2.sin() * sin_pole_dec) / (cdelta2.cos() * pole_dec.cos());

    let cos_pole_ha = (calpha2.sin() * cos_ama1 - calpha1.sin() * cos_ama2) / (calpha2 - calpha1).sin();
    let sin_pole_ha = (calpha1.cos() * cos_ama2 - calpha2.cos() * cos_ama1) / (calpha2 - calpha1).sin();
    // half-angle form; the pole is too close to (π/2, 0) for a plain atan2
    let pole_ha = 2.0 * sin_pole_ha.atan2(1.0 + cos_pole_ha);
    log::debug!("polar alignment: mount pole at dec {:.8} rad, HA {:.8} rad", pole_dec, pole_ha);

    let beta = latitude.to_radians();
    let alt = (pole_dec.sin() * beta.sin() + pole_dec.cos() * beta.cos() * pole_ha.cos()).asin();
    let cos_az = (pole_dec.sin() - alt.sin() * beta.sin()) / (alt.cos() * beta.cos());
    let sin_az = pole_dec.cos() * pole_ha.sin() / alt.cos();
    let az = sin_az.atan2(cos_az);

    let (seen_ra, seen_dec) = star_through_polar_axis(
        second.lst, second.target_ra, second.target_dec, FRAC_PI_2 - pole_ha, FRAC_PI_2 - pole_dec
    );

    let altitude = alt.to_degrees();
    let azimuth = az.to_degrees();
    let pole_azimuth = if latitude < 0.0 { 180.0 } else { 0.0 };
    let result = PolarAlignment{
        altitude,
        azimuth,
        altitude_offset: altitude - latitude.abs(),
        azimuth_offset: (azimuth - pole_azimuth + 180.0).rem_euclid(360.0) - 180.0,
        recommended_ra: range_24h(second.target_ra + (second.target_ra - seen_ra)),
        recommended_dec: second.target_dec + (second.target_dec - seen_dec)
    };

    let finite = [result.altitude, result.azimuth, result.recommended_ra, result.recommended_dec]
        .iter()
        .all(|v| v.is_finite());

    if finite { Some(result) } else { None }
}

/// Coordinates at which a mount whose polar axis is rotated by `theta` (about the pole)
/// and tilted by `gamma` would see the star at `ra`, `dec`.
fn star_through_polar_axis(lst: f64, ra: f64, dec: f64, theta: f64, gamma: f64) -> (f64, f64) {
    let h = (lst - ra) * PI / 12.0;
    let dec = dec.to_radians();

    let rotation = Matrix3::from_angle_x(Rad(gamma)) * Matrix3::from_angle_z(Rad(theta));
    let v = rotation * Vector3::new(dec.cos() * (-h).cos(), dec.cos() * (-h).sin(), dec.sin());

    let mut ra = v.y.atan2(v.x) * 12.0 / PI + lst;
    while ra < 0.0 { ra += 24.0; }
    while ra > 24.0 { ra -= 24.0; }

    (ra, v.z.asin().to_degrees())
}
