//
// EQMount - Sky-Watcher equatorial mount driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Goto requests: pier selection, target encoders and iterative convergence.
//!

use crate::mount::{
    Hemisphere,
    PierSide,
    TrackState,
    coords::{MountGeometry, range_ha, select_pier, target_encoders}
};

/// Maximum number of corrective slews after the initial one.
pub const GOTO_ITERATIVE_LIMIT: u32 = 5;

/// Accepted residual error (arcseconds).
pub const GOTO_RESOLUTION: f64 = 5.0;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum GotoKind {
    /// Slew to sky coordinates; afterwards track if `resume_tracking`.
    Slew { resume_tracking: bool },
    /// Slew to fixed encoder positions.
    Park
}

#[derive(Clone, Debug, PartialEq)]
pub struct GotoRequest {
    pub kind: GotoKind,
    /// Target right ascension (hours) with the sync offset removed.
    pub target_ra: f64,
    /// Target declination (degrees) with the sync offset removed.
    pub target_dec: f64,
    pub current_ra: f64,
    pub current_dec: f64,
    pub target_encoders: [u32; 2],
    pub current_encoders: [u32; 2],
    pub target_pier: PierSide,
    pub iterations: u32,
    pub limit_east: u32,
    pub limit_west: u32,
    pub force_cw_up: bool,
    pub check_limits: bool,
    pub outside_limits: bool,
    pub completed: bool
}

/// What to do once both axes have stopped.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum GotoStep {
    /// Slew again by the given encoder deltas.
    Iterate { deltas: [i64; 2] },
    /// Goto finished; `converged` is false if the iteration limit was reached first.
    Complete { converged: bool }
}

/// RA travel limits (east, west) one hour past the meridian with counterweight up.
pub fn ra_limits(geometry: &MountGeometry) -> (u32, u32) {
    let zero = geometry.ra.zero;
    let margin = geometry.ra.total / 4 + geometry.ra.total / 24;
    match geometry.hemisphere {
        Hemisphere::North => (zero.saturating_sub(margin), zero + margin),
        Hemisphere::South => (zero + margin, zero.saturating_sub(margin))
    }
}

/// User-defined RA encoder range; the mount may stop when it leaves it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MeridianLimits {
    pub east: u32,
    pub west: u32,
    /// Stop a tracking mount that is outside the limits.
    pub abort_tracking: bool,
    /// Stop a slewing mount that is outside the limits.
    pub abort_slewing: bool
}

impl MeridianLimits {
    pub fn contains(&self, ra_encoder: u32) -> bool {
        self.east <= ra_encoder && ra_encoder <= self.west
    }

    /// Returns true if a mount in `state` at `ra_encoder` must be stopped.
    pub fn should_abort(&self, ra_encoder: u32, state: TrackState) -> bool {
        if self.contains(ra_encoder) {
            return false;
        }
        match state {
            TrackState::Tracking => self.abort_tracking,
            TrackState::Slewing => self.abort_slewing,
            TrackState::Idle | TrackState::Parking | TrackState::Parked => false
        }
    }
}

pub fn encoder_delta(target: u32, current: u32) -> i64 {
    target as i64 - current as i64
}

impl GotoRequest {
    pub fn new_slew(
        ra: f64,
        dec: f64,
        resume_tracking: bool,
        force_cw_up: bool,
        check_limits: bool,
        geometry: &MountGeometry
    ) -> GotoRequest {
        let (limit_east, limit_west) = ra_limits(geometry);
        GotoRequest{
            kind: GotoKind::Slew{ resume_tracking },
            target_ra: ra,
            target_dec: dec,
            current_ra: 0.0,
            current_dec: 0.0,
            target_encoders: [0, 0],
            current_encoders: [0, 0],
            target_pier: PierSide::East,
            iterations: 0,
            limit_east,
            limit_west,
            force_cw_up,
            check_limits,
            outside_limits: false,
            completed: false
        }
    }

    pub fn new_park(park_encoders: [u32; 2], geometry: &MountGeometry) -> GotoRequest {
        let mut request = GotoRequest::new_slew(0.0, 0.0, false, false, false, geometry);
        request.kind = GotoKind::Park;
        request.target_encoders = park_encoders;
        request
    }

    /// Records the telescope position.
    pub fn set_current(&mut self, ra: f64, dec: f64, encoders: [u32; 2]) {
        self.current_ra = ra;
        self.current_dec = dec;
        self.current_encoders = encoders;
    }

    fn is_outside_limits(&self, ra_encoder: u32, hemisphere: Hemisphere) -> bool {
        match hemisphere {
            Hemisphere::North => ra_encoder < self.limit_east || ra_encoder > self.limit_west,
            Hemisphere::South => ra_encoder > self.limit_east || ra_encoder < self.limit_west
        }
    }

    /// Computes target encoders for the given local sidereal time.
    pub fn compute_target(&mut self, lst: f64, geometry: &MountGeometry) {
        if self.kind == GotoKind::Park {
            return;
        }

        let ha = range_ha(self.target_ra - lst);
        let (mut pier, mut flipped) = select_pier(ha, geometry.hemisphere, self.force_cw_up);
        let mut encoders = target_encoders(self.target_ra, self.target_dec, lst, pier, flipped, geometry);

        self.outside_limits = false;
        if self.force_cw_up && self.check_limits {
            if self.is_outside_limits(encoders[0], geometry.hemisphere) {
                log::warn!(
                    "goto with counterweight up would exceed RA limits (target 0x{:06X}, limits 0x{:06X}..0x{:06X}); \
                     using counterweight down",
                    encoders[0], self.limit_east, self.limit_west
                );
                let normal = select_pier(ha, geometry.hemisphere, false);
                pier = normal.0;
                flipped = normal.1;
                encoders = target_encoders(self.target_ra, self.target_dec, lst, pier, flipped, geometry);
                self.outside_limits = self.is_outside_limits(encoders[0], geometry.hemisphere);
            }
        }

        self.target_pier = pier;
        self.target_encoders = encoders;
    }

    /// Encoder deltas from the current to the target position.
    pub fn deltas(&self) -> [i64; 2] {
        [
            encoder_delta(self.target_encoders[0], self.current_encoders[0]),
            encoder_delta(self.target_encoders[1], self.current_encoders[1])
        ]
    }

    /// Residual (RA, Dec) error in arcseconds.
    pub fn error_arcsec(&self) -> (f64, f64) {
        (
            range_ha(self.target_ra - self.current_ra).abs() * 15.0 * 3600.0,
            (self.target_dec - self.current_dec).abs() * 3600.0
        )
    }

    /// Decides the next step once both axes have stopped.
    ///
    /// The current position must have been updated with `set_current`.
    pub fn next_step(&mut self, lst: f64, geometry: &MountGeometry) -> GotoStep {
        self.iterations += 1;

        if self.kind == GotoKind::Park {
            self.completed = true;
            return GotoStep::Complete{ converged: true };
        }

        let (ra_error, dec_error) = self.error_arcsec();
        log::info!(
            "goto iteration {}: RA error {:.2}\", Dec error {:.2}\"", self.iterations, ra_error, dec_error
        );

        let converged = ra_error <= GOTO_RESOLUTION && dec_error <= GOTO_RESOLUTION;
        if !converged && self.iterations <= GOTO_ITERATIVE_LIMIT {
            self.compute_target(lst, geometry);
            GotoStep::Iterate{ deltas: self.deltas() }
        } else {
            if !converged {
                log::warn!("goto iteration limit reached; residual error RA {:.2}\", Dec {:.2}\"", ra_error, dec_error);
            }
            self.completed = true;
            GotoStep::Complete{ converged }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::coords::{AxisGeometry, encoders_to_radec};

    const TOTAL: u32 = 9_024_000;
    const ZERO: u32 = 0x80_0000;

    fn geometry(hemisphere: Hemisphere) -> MountGeometry {
        MountGeometry{
            ra: AxisGeometry{ zero: ZERO, total: TOTAL },
            dec: AxisGeometry{ zero: ZERO, total: TOTAL },
            hemisphere
        }
    }

    #[test]
    fn limits_are_an_hour_past_the_meridian() {
        let (east, west) = ra_limits(&geometry(Hemisphere::North));
        assert_eq!(ZERO - TOTAL / 4 - TOTAL / 24, east);
        assert_eq!(ZERO + TOTAL / 4 + TOTAL / 24, west);

        let (east, west) = ra_limits(&geometry(Hemisphere::South));
        assert_eq!(ZERO + TOTAL / 4 + TOTAL / 24, east);
        assert_eq!(ZERO - TOTAL / 4 - TOTAL / 24, west);
    }

    #[test]
    fn meridian_limits_abort_by_state() {
        let limits = MeridianLimits{ east: ZERO - 1000, west: ZERO + 1000, abort_tracking: true, abort_slewing: false };

        assert!(limits.contains(ZERO - 1000));
        assert!(limits.contains(ZERO + 1000));
        assert!(!limits.contains(ZERO + 1001));

        assert!(!limits.should_abort(ZERO, TrackState::Tracking));
        assert!(limits.should_abort(ZERO + 1001, TrackState::Tracking));
        assert!(!limits.should_abort(ZERO + 1001, TrackState::Slewing));
        assert!(!limits.should_abort(ZERO - 1001, TrackState::Parking));
        assert!(!limits.should_abort(ZERO - 1001, TrackState::Idle));
    }

    #[test]
    fn target_is_recomputed_for_lst() {
        let g = geometry(Hemisphere::North);
        let mut request = GotoRequest::new_slew(10.0, 45.0, true, false, true, &g);

        request.compute_target(9.0, &g);
        let first = request.target_encoders;
        request.compute_target(9.5, &g);
        let second = request.target_encoders;

        assert_ne!(first[0], second[0]);
        assert_eq!(first[1], second[1]);
        let pos = encoders_to_radec(second[0], second[1], 9.5, &g);
        assert!((pos.ra - 10.0).abs() < 1.0e-5);
    }

    #[test]
    fn counterweight_up_near_meridian_is_allowed() {
        let g = geometry(Hemisphere::North);
        // half an hour west of the meridian
        let mut request = GotoRequest::new_slew(10.5, 30.0, true, true, true, &g);
        request.compute_target(10.0, &g);

        assert_eq!(PierSide::West, request.target_pier);
        assert!(!request.outside_limits);
    }

    #[test]
    fn counterweight_up_beyond_limits_falls_back() {
        let g = geometry(Hemisphere::North);
        // three hours east of the meridian
        let mut request = GotoRequest::new_slew(13.0, 30.0, true, true, true, &g);
        request.compute_target(16.0, &g);

        assert_eq!(PierSide::West, request.target_pier);
        assert!(!request.outside_limits);

        let mut normal = GotoRequest::new_slew(13.0, 30.0, true, false, true, &g);
        normal.compute_target(16.0, &g);
        assert_eq!(normal.target_encoders, request.target_encoders);
    }

    #[test]
    fn counterweight_up_without_limit_check() {
        let g = geometry(Hemisphere::North);
        let mut request = GotoRequest::new_slew(13.0, 30.0, true, true, false, &g);
        request.compute_target(16.0, &g);

        assert_eq!(PierSide::East, request.target_pier);
    }

    #[test]
    fn converged_goto_completes() {
        let g = geometry(Hemisphere::North);
        let mut request = GotoRequest::new_slew(10.0, 45.0, true, false, true, &g);
        request.compute_target(9.0, &g);
        request.set_current(10.0 + 1.0 / 3600.0 / 15.0, 45.0 - 2.0 / 3600.0, request.target_encoders);

        assert_eq!(GotoStep::Complete{ converged: true }, request.next_step(9.0, &g));
        assert!(request.completed);
        assert_eq!(1, request.iterations);
    }

    #[test]
    fn residual_error_triggers_iteration() {
        let g = geometry(Hemisphere::North);
        let mut request = GotoRequest::new_slew(10.0, 45.0, true, false, true, &g);
        request.compute_target(9.0, &g);
        let target = request.target_encoders;
        request.set_current(10.0, 45.01, [target[0], target[1] - 250]);

        match request.next_step(9.0, &g) {
            GotoStep::Iterate{ deltas } => assert_eq!([0, 250], deltas),
            other => panic!("unexpected step: {:?}", other)
        }
        assert!(!request.completed);
    }

    #[test]
    fn iterations_are_bounded() {
        let g = geometry(Hemisphere::North);
        let mut request = GotoRequest::new_slew(10.0, 45.0, true, false, true, &g);
        request.compute_target(9.0, &g);
        request.set_current(10.0, 46.0, request.target_encoders);

        for _ in 0..GOTO_ITERATIVE_LIMIT {
            assert!(matches!(request.next_step(9.0, &g), GotoStep::Iterate{ .. }));
        }
        assert_eq!(GotoStep::Complete{ converged: false }, request.next_step(9.0, &g));
        assert_eq!(GOTO_ITERATIVE_LIMIT + 1, request.iterations);
    }

    #[test]
    fn ra_error_wraps_around_zero() {
        let g = geometry(Hemisphere::North);
        let mut request = GotoRequest::new_slew(23.9999, 0.0, true, false, true, &g);
        request.set_current(0.0, 0.0, [0, 0]);
        let (ra_error, _) = request.error_arcsec();
        assert!((ra_error - 0.0001 * 15.0 * 3600.0).abs() < 1.0e-6);
    }

    #[test]
    fn park_completes_without_iteration() {
        let g = geometry(Hemisphere::North);
        let mut request = GotoRequest::new_park([ZERO, ZERO + TOTAL / 4], &g);
        request.compute_target(5.0, &g);
        assert_eq!([ZERO, ZERO + TOTAL / 4], request.target_encoders);
        request.set_current(0.0, 0.0, [ZERO, ZERO]);

        assert_eq!(GotoStep::Complete{ converged: true }, request.next_step(5.0, &g));
    }
}
