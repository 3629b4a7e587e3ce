use tracing::debug;

use crate::doctor::check_guidance;
use crate::sampler::{self, ErrorSampler, ErrorVector};
use crate::sweep::{self, LinearSweep};
use crate::{Axes, Gains, GuidanceConfig, GuidanceError, Position, Profile};

/// Owned by the control loop; `current` is only ever advanced by [`GuidanceLaw::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct GuidanceState {
    pub current: Position,
    pub target: Position,
}

impl GuidanceState {
    pub fn new(current: Position, target: Position) -> Self {
        Self { current, target }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub delta: Position,
    /// Line-of-sight bearing in the x/y plane, radians.
    pub bearing: f64,
    /// Elevation towards the target, radians. Always 0 in planar mode.
    pub elevation: f64,
    /// Zero-distance or non-finite computation; nothing moved.
    pub degenerate: bool,
}

impl Step {
    fn hold() -> Self {
        Self { delta: Position::zeros(), bearing: 0.0, elevation: 0.0, degenerate: true }
    }
}

/// Proportional-navigation guidance.
///
/// The commanded step length is `K * |bearing|`, saturated to
/// `[min_step, max_step]` and never longer than the remaining distance, and
/// points along the line of sight. The vertical axis uses the elevation angle
/// `atan2(dz, hypot(dx, dy))` with its own gain.
#[derive(Debug, Clone)]
pub struct GuidanceLaw {
    profile: Profile,
    gains: Gains,
    min_step: f64,
    max_step: f64,
    tolerance: f64,
    sweep_steps: u32,
    sampler: ErrorSampler,
    sweep: Option<(Position, LinearSweep)>,
}

impl GuidanceLaw {
    pub fn new(cfg: &GuidanceConfig) -> Result<Self, GuidanceError> {
        check_guidance(cfg)?;
        Ok(Self {
            profile: cfg.profile,
            gains: cfg.gains,
            min_step: cfg.min_step,
            max_step: cfg.max_step,
            tolerance: cfg.arrival_tolerance,
            sweep_steps: sweep::steps_for(cfg.sweep_fraction)?,
            sampler: ErrorSampler::new(cfg.axes),
            sweep: None,
        })
    }

    pub fn axes(&self) -> Axes {
        self.sampler.axes()
    }

    pub fn last_error(&self) -> Option<ErrorVector> {
        self.sampler.last()
    }

    /// True when every controlled axis is within the arrival tolerance.
    pub fn arrived(&self, state: &GuidanceState) -> bool {
        let e = sampler::sample(self.axes(), &state.current, &state.target);
        e.iter().all(|c| c.abs() < self.tolerance)
    }

    /// Advances `state.current` by one tick. Degenerate ticks leave it untouched.
    pub fn step(&mut self, state: &mut GuidanceState) -> Step {
        let e = self.sampler.sample(&state.current, &state.target);
        if !e.iter().all(|c| c.is_finite()) || e.iter().all(|c| *c == 0.0) {
            debug!("guidance: degenerate error {:?}, holding", e);
            return Step::hold();
        }

        let step = match self.profile {
            Profile::Pn => self.pn_step(&e),
            Profile::Sweep => self.sweep_step(state),
        };
        if !step.delta.iter().all(|c| c.is_finite()) {
            debug!("guidance: non-finite delta {:?}, holding", step.delta);
            return Step::hold();
        }

        state.current += step.delta;
        step
    }

    fn pn_step(&self, e: &ErrorVector) -> Step {
        let mut delta = Position::zeros();

        let r = e.x.hypot(e.y);
        let bearing = e.y.atan2(e.x);
        if r > 0.0 {
            let s = self.saturate(self.gains.planar * bearing.abs()).min(r);
            delta.x = s * bearing.cos();
            delta.y = s * bearing.sin();
        }

        let mut elevation = 0.0;
        if self.axes() == Axes::Spatial && e.z != 0.0 {
            elevation = e.z.atan2(r);
            let dz = self.saturate(self.gains.vertical * elevation.abs()) * elevation.sin();
            delta.z = if dz.abs() > e.z.abs() { e.z } else { dz };
        }

        Step { delta, bearing, elevation, degenerate: false }
    }

    fn sweep_step(&mut self, state: &GuidanceState) -> Step {
        let stale = match &self.sweep {
            Some((target, _)) => *target != state.target,
            None => true,
        };
        if stale {
            let mut sweep = LinearSweep::with_steps(state.current, state.target, self.sweep_steps);
            // t = 0 is where we already are
            sweep.next();
            self.sweep = Some((state.target, sweep));
        }

        let next = self
            .sweep
            .as_mut()
            .and_then(|(_, s)| s.next())
            .unwrap_or(state.target);
        let delta = sampler::sample(self.axes(), &state.current, &next);

        Step {
            delta,
            bearing: delta.y.atan2(delta.x),
            elevation: delta.z.atan2(delta.x.hypot(delta.y)),
            degenerate: false,
        }
    }

    fn saturate(&self, s: f64) -> f64 {
        s.clamp(self.min_step, self.max_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn law(axes: Axes) -> GuidanceLaw {
        GuidanceLaw::new(&GuidanceConfig::new(axes, &[0.0, 0.0])).unwrap()
    }

    fn run(law: &mut GuidanceLaw, state: &mut GuidanceState, limit: usize) -> Option<usize> {
        for n in 0..limit {
            if law.arrived(state) {
                return Some(n);
            }
            law.step(state);
        }
        None
    }

    #[test]
    fn reference_trace_planar() {
        let mut law = law(Axes::Planar);
        let mut st = GuidanceState::new(Position::zeros(), Position::new(100.0, 50.0, 0.0));

        law.step(&mut st);
        assert_relative_eq!(st.current.x, 0.4146990285324183, epsilon = 1e-12);
        assert_relative_eq!(st.current.y, 0.20734951426620915, epsilon = 1e-12);
        law.step(&mut st);
        law.step(&mut st);
        assert_relative_eq!(st.current.x, 1.2440970855972548, epsilon = 1e-12);
        assert_relative_eq!(st.current.y, 0.6220485427986274, epsilon = 1e-12);

        let mut st = GuidanceState::new(Position::zeros(), Position::new(100.0, 50.0, 0.0));
        let steps = run(&mut law, &mut st, 10_000).unwrap();
        assert_eq!(steps, 239);
        assert_relative_eq!(st.current.x, 99.11306781924849, epsilon = 1e-9);
        assert_relative_eq!(st.current.y, 49.55653390962424, epsilon = 1e-9);
        assert_eq!(st.current.z, 0.0);
    }

    #[test]
    fn reference_trace_spatial() {
        let mut law = law(Axes::Spatial);
        let mut st = GuidanceState::new(Position::zeros(), Position::new(100.0, 50.0, 20.0));
        let steps = run(&mut law, &mut st, 10_000).unwrap();
        assert_eq!(steps, 239);
        assert_relative_eq!(st.current.z, 19.441695532257512, epsilon = 1e-9);
    }

    #[test]
    fn half_gain_doubles_the_tick_count() {
        let mut cfg = GuidanceConfig::new(Axes::Planar, &[0.0, 0.0]);
        cfg.gains.planar = 0.5;
        let mut law = GuidanceLaw::new(&cfg).unwrap();
        let mut st = GuidanceState::new(Position::zeros(), Position::new(100.0, 50.0, 0.0));
        assert_eq!(run(&mut law, &mut st, 10_000), Some(478));
    }

    #[test]
    fn error_never_grows_for_any_direction() {
        let targets = [
            (100.0, 50.0), (100.0, -50.0), (-100.0, 50.0), (-100.0, -50.0),
            (100.0, 0.0), (-100.0, 0.0), (0.0, 80.0), (0.0, -80.0), (0.3, 0.2), (-7.0, 1e-9),
        ];
        for (tx, ty) in targets {
            let mut law = law(Axes::Planar);
            let mut st = GuidanceState::new(Position::zeros(), Position::new(tx, ty, 0.0));
            let bound = ((tx as f64).hypot(ty) / 0.1).ceil() as usize + 1;
            let mut prev = (st.target - st.current).norm();
            let mut ticks = 0;
            while !law.arrived(&st) {
                law.step(&mut st);
                let d = (st.target - st.current).norm();
                assert!(d <= prev, "error grew towards ({}, {}): {} -> {}", tx, ty, prev, d);
                prev = d;
                ticks += 1;
                assert!(ticks <= bound, "no arrival towards ({}, {})", tx, ty);
            }
        }
    }

    #[test]
    fn target_straight_ahead_does_not_stall() {
        let mut law = law(Axes::Planar);
        let mut st = GuidanceState::new(Position::zeros(), Position::new(100.0, 0.0, 0.0));
        let step = law.step(&mut st);
        assert_eq!(step.bearing, 0.0);
        assert_relative_eq!(st.current.x, 0.1);
        assert_eq!(run(&mut law, &mut st, 2_000), Some(990));
    }

    #[test]
    fn step_never_overshoots() {
        let mut law = law(Axes::Planar);
        let mut st = GuidanceState::new(Position::zeros(), Position::new(-0.05, 0.0, 0.0));
        law.step(&mut st);
        assert_relative_eq!(st.current.x, -0.05);
    }

    #[test]
    fn zero_error_is_degenerate() {
        let mut law = law(Axes::Planar);
        let mut st = GuidanceState::new(Position::new(5.0, 5.0, 0.0), Position::new(5.0, 5.0, 0.0));
        let step = law.step(&mut st);
        assert!(step.degenerate);
        assert_eq!(st.current, Position::new(5.0, 5.0, 0.0));
    }

    #[test]
    fn non_finite_target_does_not_move() {
        let mut law = law(Axes::Planar);
        let mut st = GuidanceState::new(Position::zeros(), Position::new(f64::NAN, 1.0, 0.0));
        assert!(law.step(&mut st).degenerate);
        assert_eq!(st.current, Position::zeros());
        assert!(!law.arrived(&st));
    }

    #[test]
    fn sweep_reaches_target_in_ten_ticks() {
        let mut cfg = GuidanceConfig::new(Axes::Planar, &[0.0, 0.0]);
        cfg.profile = Profile::Sweep;
        let mut law = GuidanceLaw::new(&cfg).unwrap();
        let mut st = GuidanceState::new(Position::zeros(), Position::new(100.0, 50.0, 0.0));

        law.step(&mut st);
        assert_relative_eq!(st.current.x, 10.0);
        assert_relative_eq!(st.current.y, 5.0);
        assert_eq!(run(&mut law, &mut st, 100), Some(9));
        assert_relative_eq!(st.current.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(st.current.y, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn sweep_restarts_when_target_moves() {
        let mut cfg = GuidanceConfig::new(Axes::Planar, &[0.0, 0.0]);
        cfg.profile = Profile::Sweep;
        let mut law = GuidanceLaw::new(&cfg).unwrap();
        let mut st = GuidanceState::new(Position::zeros(), Position::new(100.0, 0.0, 0.0));
        law.step(&mut st);
        st.target = Position::new(20.0, 0.0, 0.0);
        law.step(&mut st);
        assert_relative_eq!(st.current.x, 11.0, epsilon = 1e-9);
    }
}
