//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Conversions between encoder counts and equatorial coordinates.
//!
//! The RA axis zero position has the counterweight pointing down (hour angle 6h
//! "above" the pole); the Dec axis zero position is 90° away from the pole.
//! Hours are in [0, 24], degrees of the mechanical Dec axis in [0, 360].
//!

use crate::mount::{Hemisphere, PierSide};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AxisGeometry {
    /// Encoder count at the zero position.
    pub zero: u32,
    /// Encoder counts per full revolution.
    pub total: u32
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MountGeometry {
    pub ra: AxisGeometry,
    pub dec: AxisGeometry,
    pub hemisphere: Hemisphere
}

/// Telescope position derived from encoder counts.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EquatorialPosition {
    /// Right ascension (hours).
    pub ra: f64,
    /// Declination (degrees).
    pub dec: f64,
    /// Hour angle (hours, [-12, 12)).
    pub ha: f64
}

/// Wraps an hour angle to [-12, 12).
pub fn range_ha(mut r: f64) -> f64 {
    while r < -12.0 { r += 24.0; }
    while r >= 12.0 { r -= 24.0; }
    r
}

/// Wraps hours to [0, 24]; exactly 24 is kept.
pub fn range_24h(mut r: f64) -> f64 {
    while r < 0.0 { r += 24.0; }
    while r > 24.0 { r -= 24.0; }
    r
}

/// Wraps degrees to [0, 360]; exactly 360 is kept.
pub fn range_360(mut r: f64) -> f64 {
    while r < 0.0 { r += 360.0; }
    while r > 360.0 { r -= 360.0; }
    r
}

/// Maps a mechanical Dec axis angle [0, 360] to declination [-90, 90].
pub fn range_dec(dec: f64) -> f64 {
    if dec >= 270.0 && dec <= 360.0 {
        dec - 360.0
    } else if dec >= 90.0 && dec < 270.0 {
        180.0 - dec
    } else {
        dec
    }
}

/// Returns the pier side for the given mount hour angle (hours).
pub fn side_of_pier(ha: f64) -> PierSide {
    if range_ha(ha - 6.0) >= 0.0 { PierSide::East } else { PierSide::West }
}

/// Inversion flags (RA, Dec) for guiding and manual motion.
pub fn inversion_flags(hemisphere: Hemisphere, pier: PierSide) -> (bool, bool) {
    let ra_inverted = hemisphere == Hemisphere::South;
    let dec_inverted = (hemisphere == Hemisphere::South) ^ (pier == PierSide::West);
    (ra_inverted, dec_inverted)
}

/// Converts RA axis counts to the mount hour angle (hours, [0, 24]).
pub fn encoder_to_hours(step: u32, axis: AxisGeometry, hemisphere: Hemisphere) -> f64 {
    let total = axis.total as f64;
    let result = if step > axis.zero {
        24.0 - ((step - axis.zero) as f64 * 24.0 / total)
    } else {
        (axis.zero - step) as f64 * 24.0 / total
    };

    match hemisphere {
        Hemisphere::North => range_24h(result + 6.0),
        Hemisphere::South => range_24h((24.0 - result) + 6.0)
    }
}

/// Converts Dec axis counts to the mechanical angle (degrees, [0, 360]).
pub fn encoder_to_degrees(step: u32, axis: AxisGeometry, hemisphere: Hemisphere) -> f64 {
    let total = axis.total as f64;
    let result = if step > axis.zero {
        (step - axis.zero) as f64 * 360.0 / total
    } else {
        360.0 - ((axis.zero - step) as f64 * 360.0 / total)
    };

    match hemisphere {
        Hemisphere::North => range_360(result),
        Hemisphere::South => range_360(360.0 - result)
    }
}

/// Rounds to whole counts, wrapping modulo the 24-bit encoder range.
fn to_counts(value: f64) -> u32 {
    (value.round() as i64).rem_euclid(1 << 24) as u32
}

/// Converts a mount hour angle (hours) to RA axis counts.
pub fn encoder_from_hour(hour: f64, axis: AxisGeometry, hemisphere: Hemisphere) -> u32 {
    let zero = axis.zero as f64;
    let total = axis.total as f64;
    let shifted = range_24h(hour - 6.0);

    let result = match hemisphere {
        Hemisphere::North => if shifted < 12.0 {
            zero - (shifted / 24.0) * total
        } else {
            zero + ((24.0 - shifted) / 24.0) * total
        },

        Hemisphere::South => if shifted < 12.0 {
            zero + (shifted / 24.0) * total
        } else {
            zero - ((24.0 - shifted) / 24.0) * total
        }
    };

    to_counts(result)
}

/// Converts right ascension (hours) to RA axis counts.
///
/// `dec` is the mechanical Dec axis angle; past the pole (90°, 270°] the RA axis is turned by 12h.
pub fn encoder_from_ra(ra: f64, dec: f64, lst: f64, axis: AxisGeometry, hemisphere: Hemisphere) -> u32 {
    let mut ha = ra - lst;
    if dec > 90.0 && dec <= 270.0 {
        match hemisphere {
            Hemisphere::North => ha -= 12.0,
            Hemisphere::South => ha += 12.0
        }
    }

    encoder_from_hour(range_24h(ha), axis, hemisphere)
}

/// Converts a mechanical Dec axis angle (degrees) to counts.
pub fn encoder_from_degree(
    degree: f64,
    pier: PierSide,
    axis: AxisGeometry,
    hemisphere: Hemisphere
) -> u32 {
    let zero = axis.zero as f64;
    let total = axis.total as f64;
    let target = match hemisphere {
        Hemisphere::North => degree,
        Hemisphere::South => 360.0 - degree
    };

    let result = if target > 180.0 && pier == PierSide::East {
        zero - ((360.0 - target) / 360.0) * total
    } else {
        zero + (target / 360.0) * total
    };

    to_counts(result)
}

/// Converts declination (degrees) to Dec axis counts for the given pier side.
pub fn encoder_from_dec(dec: f64, pier: PierSide, axis: AxisGeometry, hemisphere: Hemisphere) -> u32 {
    let target = if pier == PierSide::West { 180.0 - dec } else { dec };
    encoder_from_degree(target, pier, axis, hemisphere)
}

/// Computes telescope coordinates from both axes' counts.
pub fn encoders_to_radec(ra_step: u32, dec_step: u32, lst: f64, geometry: &MountGeometry) -> EquatorialPosition {
    let ha = encoder_to_hours(ra_step, geometry.ra, geometry.hemisphere);
    let mut ra = ha + lst;
    let dec = encoder_to_degrees(dec_step, geometry.dec, geometry.hemisphere);

    match geometry.hemisphere {
        Hemisphere::North => if dec > 90.0 && dec <= 270.0 { ra -= 12.0; },
        Hemisphere::South => if dec <= 90.0 || dec > 270.0 { ra += 12.0; }
    }

    EquatorialPosition{ ra: range_24h(ra), dec: range_dec(dec), ha: range_ha(ha) }
}

/// Chooses the pier side for a target at hour angle `ha`.
///
/// Returns the pier side and whether the RA axis is turned by 12h for it.
pub fn select_pier(ha: f64, hemisphere: Hemisphere, force_cw_up: bool) -> (PierSide, bool) {
    let east_of_meridian = range_ha(ha) < 0.0;
    let pier = match (east_of_meridian != force_cw_up, hemisphere) {
        (true, Hemisphere::North) => PierSide::West,
        (true, Hemisphere::South) => PierSide::East,
        (false, Hemisphere::North) => PierSide::East,
        (false, Hemisphere::South) => PierSide::West
    };

    let flipped = match hemisphere {
        Hemisphere::North => pier == PierSide::West,
        Hemisphere::South => pier == PierSide::East
    };

    (pier, flipped)
}

/// Computes target counts for `ra`/`dec` on the given pier side.
pub fn target_encoders(
    ra: f64,
    dec: f64,
    lst: f64,
    pier: PierSide,
    flipped: bool,
    geometry: &MountGeometry
) -> [u32; 2] {
    let tr = if flipped { range_24h(ra - 12.0) } else { ra };
    [
        encoder_from_ra(tr, 0.0, lst, geometry.ra, geometry.hemisphere),
        encoder_from_dec(dec, pier, geometry.dec, geometry.hemisphere)
    ]
}

/// Converts hour angle (hours), declination and latitude (degrees) to altitude and azimuth (degrees).
///
/// Azimuth is measured from North through East.
pub fn equatorial_to_horizontal(ha: f64, dec: f64, latitude: f64) -> (f64, f64) {
    let h = (ha * 15.0).to_radians();
    let dec = dec.to_radians();
    let lat = latitude.to_radians();

    let alt = (dec.sin() * lat.sin() + dec.cos() * lat.cos() * h.cos()).asin();
    let az = (-h.sin() * dec.cos()).atan2(dec.sin() * lat.cos() - dec.cos() * lat.sin() * h.cos());

    (alt.to_degrees(), az.to_degrees().rem_euclid(360.0))
}

/// Converts altitude, azimuth and latitude (degrees) to hour angle (hours) and declination (degrees).
pub fn horizontal_to_equatorial(alt: f64, az: f64, latitude: f64) -> (f64, f64) {
    let alt = alt.to_radians();
    let az = az.to_radians();
    let lat = latitude.to_radians();

    let dec = (alt.sin() * lat.sin() + alt.cos() * lat.cos() * az.cos()).asin();
    let h = (-az.sin() * alt.cos()).atan2(alt.sin() * lat.cos() - alt.cos() * lat.sin() * az.cos());

    (range_ha(h.to_degrees() / 15.0), dec.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;
    use proptest::prelude::*;

    const TOTAL: u32 = 9_024_000;
    const ZERO: u32 = 0x80_0000;

    fn geometry(hemisphere: Hemisphere) -> MountGeometry {
        MountGeometry{
            ra: AxisGeometry{ zero: ZERO, total: TOTAL },
            dec: AxisGeometry{ zero: ZERO, total: TOTAL },
            hemisphere
        }
    }

    /// One encoder count in hours and degrees, with margin.
    const HOUR_EPS: f64 = 24.0 / TOTAL as f64;
    const DEG_EPS: f64 = 360.0 / TOTAL as f64;

    #[test]
    fn range_helpers() {
        assert_eq!(-12.0, range_ha(12.0));
        assert_eq!(11.0, range_ha(-13.0));
        assert_eq!(24.0, range_24h(24.0));
        assert_eq!(1.0, range_24h(25.0));
        assert_eq!(23.0, range_24h(-1.0));
        assert_eq!(360.0, range_360(360.0));
        assert_eq!(10.0, range_360(-350.0));
        assert_eq!(-10.0, range_dec(350.0));
        assert_eq!(80.0, range_dec(100.0));
        assert_eq!(-80.0, range_dec(260.0));
        assert_eq!(45.0, range_dec(45.0));
    }

    #[test]
    fn range_helpers_are_idempotent_at_boundaries() {
        for v in &[-360.0, -24.0, -0.5, 0.0, 24.0, 359.5, 360.0, 721.0] {
            let h = range_24h(*v);
            assert_eq!(h, range_24h(h));
            let d = range_360(*v);
            assert_eq!(d, range_360(d));
        }
        assert_eq!(0.0, range_24h(-24.0));
        assert_eq!(0.0, range_360(-360.0));
    }

    #[test]
    fn hour_angle_of_zero_encoder() {
        let axis = AxisGeometry{ zero: 1_000_000, total: 360_000 };
        assert_eq!(6.0, encoder_to_hours(1_000_000, axis, Hemisphere::North));
        assert_eq!(6.0, encoder_to_hours(1_000_000, axis, Hemisphere::South));
        // a quarter turn each way
        assert_almost_eq!(0.0, range_ha(encoder_to_hours(1_090_000, axis, Hemisphere::North)), 1.0e-9);
        assert_almost_eq!(12.0, encoder_to_hours(910_000, axis, Hemisphere::North), 1.0e-9);
    }

    #[test]
    fn negative_counts_wrap_to_24_bits() {
        let axis = AxisGeometry{ zero: 1000, total: 360_000 };
        // hour 12: a quarter turn below zero
        assert_eq!((1 << 24) - 89_000, encoder_from_hour(12.0, axis, Hemisphere::North));
        assert_eq!(1000 + 90_000, encoder_from_hour(12.0, axis, Hemisphere::South));
        assert_eq!((1 << 24) - 89_000, encoder_from_degree(-90.0 + 360.0, PierSide::East, axis, Hemisphere::North));
    }

    #[test]
    fn home_position() {
        let g = geometry(Hemisphere::North);
        // counterweight down: hour angle 6h
        assert_almost_eq!(6.0, encoder_to_hours(ZERO, g.ra, Hemisphere::North), 1.0e-9);
        assert_almost_eq!(90.0, encoder_to_degrees(ZERO + TOTAL / 4, g.dec, Hemisphere::North), 1.0e-9);

        let pos = encoders_to_radec(ZERO, ZERO + TOTAL / 4, 3.0, &g);
        assert_almost_eq!(90.0, pos.dec, 1.0e-9);
        assert_almost_eq!(9.0, pos.ra, 1.0e-9);
    }

    #[test]
    fn south_home_position() {
        let g = geometry(Hemisphere::South);
        assert_almost_eq!(6.0, encoder_to_hours(ZERO, g.ra, Hemisphere::South), 1.0e-9);
        let pos = encoders_to_radec(ZERO, ZERO - TOTAL / 4, 3.0, &g);
        assert_almost_eq!(90.0, encoder_to_degrees(ZERO - TOTAL / 4, g.dec, Hemisphere::South), 1.0e-9);
        assert_almost_eq!(-90.0, range_dec(270.0), 1.0e-9);
        assert!(pos.dec.abs() > 89.999);
    }

    #[test]
    fn pier_side_from_hour_angle() {
        assert_eq!(PierSide::East, side_of_pier(6.0));
        assert_eq!(PierSide::East, side_of_pier(17.9));
        assert_eq!(PierSide::West, side_of_pier(18.0));
        assert_eq!(PierSide::West, side_of_pier(5.9));
    }

    #[test]
    fn inversion() {
        assert_eq!((false, false), inversion_flags(Hemisphere::North, PierSide::East));
        assert_eq!((false, true), inversion_flags(Hemisphere::North, PierSide::West));
        assert_eq!((true, true), inversion_flags(Hemisphere::South, PierSide::East));
        assert_eq!((true, false), inversion_flags(Hemisphere::South, PierSide::West));
    }

    #[test]
    fn pier_selection() {
        assert_eq!((PierSide::West, true), select_pier(-2.0, Hemisphere::North, false));
        assert_eq!((PierSide::East, false), select_pier(2.0, Hemisphere::North, false));
        assert_eq!((PierSide::East, false), select_pier(-2.0, Hemisphere::North, true));
        assert_eq!((PierSide::West, true), select_pier(2.0, Hemisphere::North, true));

        assert_eq!((PierSide::East, true), select_pier(-2.0, Hemisphere::South, false));
        assert_eq!((PierSide::West, false), select_pier(2.0, Hemisphere::South, false));
        assert_eq!((PierSide::West, false), select_pier(-2.0, Hemisphere::South, true));
        assert_eq!((PierSide::East, true), select_pier(2.0, Hemisphere::South, true));
    }

    #[test]
    fn target_on_meridian_north() {
        let g = geometry(Hemisphere::North);
        let lst = 10.0;
        let (pier, flipped) = select_pier(0.5, Hemisphere::North, false);
        let enc = target_encoders(10.5, 30.0, lst, pier, flipped, &g);
        let pos = encoders_to_radec(enc[0], enc[1], lst, &g);

        assert_almost_eq!(10.5, pos.ra, HOUR_EPS);
        assert_almost_eq!(30.0, pos.dec, DEG_EPS);
    }

    #[test]
    fn hemisphere_symmetry() {
        let north = geometry(Hemisphere::North);
        let south = geometry(Hemisphere::South);

        for &(ra_step, dec_step) in &[
            (ZERO + 1_000_000, ZERO + 500_000),
            (ZERO - 2_000_000, ZERO + 3_000_000),
            (ZERO + 300_000, ZERO - 1_500_000)
        ] {
            let n = encoders_to_radec(ra_step, dec_step, 0.0, &north);
            let s = encoders_to_radec(ra_step, dec_step, 0.0, &south);
            assert_almost_eq!(0.0, range_ha(n.ra - (24.0 - s.ra)), 1.0e-9);
            assert_almost_eq!(n.dec, -s.dec, 1.0e-9);
        }
    }

    #[test]
    fn horizontal_conversions() {
        // on the meridian, south of zenith
        let (alt, az) = equatorial_to_horizontal(0.0, 20.0, 50.0);
        assert_almost_eq!(60.0, alt, 1.0e-9);
        assert_almost_eq!(180.0, az, 1.0e-9);

        // 6h west on the equator: due west, on the horizon
        let (alt, az) = equatorial_to_horizontal(6.0, 0.0, 50.0);
        assert_almost_eq!(0.0, alt, 1.0e-9);
        assert_almost_eq!(270.0, az, 1.0e-9);

        // the pole is at altitude = latitude, due north
        let (alt, az) = equatorial_to_horizontal(3.0, 90.0, 50.0);
        assert_almost_eq!(50.0, alt, 1.0e-9);
        assert!(az < 1.0e-6 || az > 360.0 - 1.0e-6);
    }

    proptest! {
        #[test]
        fn goto_target_round_trips(
            ra in 0.0f64..24.0,
            dec in -89.0f64..89.0,
            lst in 0.0f64..24.0,
            south in any::<bool>(),
            force_cw_up in any::<bool>()
        ) {
            let hemisphere = if south { Hemisphere::South } else { Hemisphere::North };
            let g = geometry(hemisphere);
            let (pier, flipped) = select_pier(range_ha(ra - lst), hemisphere, force_cw_up);
            let enc = target_encoders(ra, dec, lst, pier, flipped, &g);
            let pos = encoders_to_radec(enc[0], enc[1], lst, &g);

            prop_assert!(range_ha(pos.ra - ra).abs() <= 2.0 * HOUR_EPS);
            prop_assert!((pos.dec - dec).abs() <= 2.0 * DEG_EPS);
        }

        #[test]
        fn hour_encoding_round_trips(hour in 0.0f64..24.0, south in any::<bool>()) {
            let hemisphere = if south { Hemisphere::South } else { Hemisphere::North };
            let g = geometry(hemisphere);
            let step = encoder_from_hour(hour, g.ra, hemisphere);
            let back = encoder_to_hours(step, g.ra, hemisphere);
            prop_assert!(range_ha(back - hour).abs() <= 2.0 * HOUR_EPS);
        }

        #[test]
        fn encoder_round_trips_through_hour_angle(step in 0..TOTAL, south in any::<bool>()) {
            let hemisphere = if south { Hemisphere::South } else { Hemisphere::North };
            let g = geometry(hemisphere);
            let back = encoder_from_hour(encoder_to_hours(step, g.ra, hemisphere), g.ra, hemisphere);
            let diff = (back as i64 - step as i64).rem_euclid(TOTAL as i64);
            prop_assert!(diff <= 1 || diff == TOTAL as i64 - 1, "{} -> {}", step, back);
        }

        #[test]
        fn wrapping_is_idempotent(v in -1000.0f64..1000.0) {
            prop_assert_eq!(range_24h(v), range_24h(range_24h(v)));
            prop_assert_eq!(range_360(v), range_360(range_360(v)));
        }

        #[test]
        fn wrapped_values_stay_in_range(v in -1000.0f64..1000.0) {
            let h = range_24h(v);
            prop_assert!(h >= 0.0 && h <= 24.0);
            let d = range_360(v);
            prop_assert!(d >= 0.0 && d <= 360.0);
            let ha = range_ha(v);
            prop_assert!(ha >= -12.0 && ha < 12.0);
        }

        #[test]
        fn horizontal_round_trips(ha in -11.9f64..11.9, dec in -80.0f64..80.0, lat in -70.0f64..70.0) {
            let (alt, az) = equatorial_to_horizontal(ha, dec, lat);
            let (ha2, dec2) = horizontal_to_equatorial(alt, az, lat);
            prop_assert!(range_ha(ha2 - ha).abs() < 1.0e-6);
            prop_assert!((dec2 - dec).abs() < 1.0e-6);
        }
    }
}
