use tracing::{debug, warn};

use crate::domain::PowerSample;

/// Hysteresis thresholds, all in watts.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Nominal draw of one charger. Net production must exceed this before
    /// the level steps toward charging, so a step always has a full device
    /// worth of surplus behind it.
    pub charger_quantum_w: f64,
    /// Nominal output of one micro-inverter. Not part of the step decision;
    /// carried for the estimated-swing figure in logs.
    pub inverter_quantum_w: f64,
    /// Noise floor on the consumption side. Net draws below this hold the
    /// level instead of pumping it down on sampling jitter.
    pub pump_gap_w: f64,
    /// Maximum tolerated disagreement between the meter's own net figure
    /// and the computed total before the sample is discarded.
    pub mismatch_threshold_w: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            charger_quantum_w: 200.0,
            inverter_quantum_w: 290.0,
            pump_gap_w: 50.0,
            mismatch_threshold_w: 50.0,
        }
    }
}

/// Inclusive run-level bounds, `min <= 0 <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: i32,
    pub max: i32,
}

impl Bounds {
    /// Bounds from device counts: the level can reach one active inverter
    /// per available inverter slot downward, one charger per slot upward.
    pub fn from_counts(max_inverters: u32, max_chargers: u32) -> Self {
        Self {
            min: -(max_inverters as i32),
            max: max_chargers as i32,
        }
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::from_counts(6, 6)
    }
}

/// What one observed sample did to the run level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// The meter's reported net disagreed with the computed total beyond
    /// the mismatch threshold; the sample was dropped whole.
    Discarded {
        reported_net_w: f64,
        computed_net_w: f64,
    },
    Held,
    /// One step toward generating: net consumption above the pump gap.
    SteppedDown,
    /// One step toward charging: net production above one charger quantum.
    SteppedUp,
}

impl Step {
    pub fn is_discarded(&self) -> bool {
        matches!(self, Step::Discarded { .. })
    }
}

/// Single-step hysteresis ramp from noisy power samples to a signed device
/// target. Deliberately not proportional: one level per sample bounds how
/// hard a transient can yank the fleet around.
pub struct RunLevelController {
    level: i32,
    thresholds: Thresholds,
    bounds: Bounds,
    last_sample: Option<PowerSample>,
}

impl RunLevelController {
    pub fn new(thresholds: Thresholds, bounds: Bounds) -> Self {
        Self {
            level: 0,
            thresholds,
            bounds,
            last_sample: None,
        }
    }

    /// Positive: chargers requested. Negative: inverters requested.
    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn last_sample(&self) -> Option<PowerSample> {
        self.last_sample
    }

    /// Replace the bounds, pulling the level back inside the new range if
    /// it no longer fits.
    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.bounds = bounds;
        self.level = self.level.clamp(bounds.min, bounds.max);
    }

    /// Nominal watt swing the current level asks of the fleet, using the
    /// per-kind quantum for the active direction.
    pub fn estimated_swing_w(&self) -> f64 {
        if self.level >= 0 {
            f64::from(self.level) * self.thresholds.charger_quantum_w
        } else {
            f64::from(self.level) * self.thresholds.inverter_quantum_w
        }
    }

    /// Feed one sample through the hysteresis. The mismatch guard compares
    /// the absolute difference, so a meter transient is rejected whichever
    /// side of the computed total it lands on.
    pub fn observe(&mut self, sample: PowerSample) -> Step {
        let total_net = sample.net_w();

        if let Some(reported) = sample.reported_net_w {
            let diff = reported - total_net;
            if diff.abs() > self.thresholds.mismatch_threshold_w {
                warn!(
                    reported_net_w = reported,
                    computed_net_w = total_net,
                    diff_w = diff,
                    "meter mismatch, sample discarded"
                );
                return Step::Discarded {
                    reported_net_w: reported,
                    computed_net_w: total_net,
                };
            }
        }

        self.last_sample = Some(sample);

        let step = if total_net > 0.0
            && total_net > self.thresholds.pump_gap_w
            && self.level > self.bounds.min
        {
            self.level -= 1;
            Step::SteppedDown
        } else if total_net < 0.0
            && total_net < -self.thresholds.charger_quantum_w
            && self.level < self.bounds.max
        {
            self.level += 1;
            Step::SteppedUp
        } else {
            Step::Held
        };

        debug!(net_w = total_net, level = self.level, "sample observed");
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn controller() -> RunLevelController {
        RunLevelController::new(Thresholds::default(), Bounds::default())
    }

    #[rstest]
    #[case::net_draw_steps_down(0.0, 80.0, -1)]
    #[case::surplus_steps_up(-1000.0, 500.0, 1)]
    #[case::inside_pump_gap_holds(0.0, 30.0, 0)]
    #[case::zero_net_holds(-250.0, 250.0, 0)]
    #[case::surplus_below_quantum_holds(-350.0, 200.0, 0)]
    fn first_sample_moves_level(
        #[case] produced_w: f64,
        #[case] consumed_w: f64,
        #[case] expected_level: i32,
    ) {
        let mut rl = controller();
        rl.observe(PowerSample::new(produced_w, consumed_w));
        assert_eq!(rl.level(), expected_level);
    }

    #[test]
    fn mismatched_sample_is_discarded_whole() {
        let mut rl = controller();
        let step = rl.observe(PowerSample::new(-300.0, 200.0).with_reported_net(300.0));
        assert_eq!(
            step,
            Step::Discarded {
                reported_net_w: 300.0,
                computed_net_w: -100.0,
            }
        );
        assert_eq!(rl.level(), 0);
        assert!(rl.last_sample().is_none());
    }

    #[test]
    fn mismatch_guard_is_symmetric() {
        // A reported net far BELOW the computed total must be rejected too;
        // comparing the raw signed difference would wave it through.
        let mut rl = controller();
        let step = rl.observe(PowerSample::new(0.0, 400.0).with_reported_net(-600.0));
        assert!(step.is_discarded());
        assert_eq!(rl.level(), 0);
    }

    #[test]
    fn agreeing_reported_net_is_accepted() {
        let mut rl = controller();
        let step = rl.observe(PowerSample::new(0.0, 80.0).with_reported_net(70.0));
        assert_eq!(step, Step::SteppedDown);
        assert_eq!(rl.level(), -1);
    }

    #[test]
    fn ramp_saturates_at_lower_bound() {
        let mut rl = controller();
        for _ in 0..10 {
            rl.observe(PowerSample::new(0.0, 800.0));
        }
        assert_eq!(rl.level(), -6);
        assert_eq!(rl.observe(PowerSample::new(0.0, 800.0)), Step::Held);
        assert_eq!(rl.level(), -6);
    }

    #[test]
    fn ramp_saturates_at_upper_bound() {
        let mut rl = controller();
        for _ in 0..10 {
            rl.observe(PowerSample::new(-2000.0, 100.0));
        }
        assert_eq!(rl.level(), 6);
    }

    #[test]
    fn ramp_reverses_one_step_at_a_time() {
        let mut rl = controller();
        rl.observe(PowerSample::new(-1000.0, 100.0));
        rl.observe(PowerSample::new(-1000.0, 100.0));
        assert_eq!(rl.level(), 2);
        rl.observe(PowerSample::new(0.0, 600.0));
        assert_eq!(rl.level(), 1);
    }

    #[test]
    fn discarded_sample_is_not_remembered() {
        let mut rl = controller();
        rl.observe(PowerSample::new(0.0, 80.0));
        let kept = rl.last_sample();
        rl.observe(PowerSample::new(0.0, 80.0).with_reported_net(900.0));
        assert_eq!(rl.last_sample(), kept);
    }

    #[test]
    fn estimated_swing_follows_direction() {
        let mut rl = controller();
        rl.observe(PowerSample::new(-1000.0, 100.0));
        assert_eq!(rl.estimated_swing_w(), 200.0);
        let mut rl = controller();
        rl.observe(PowerSample::new(0.0, 300.0));
        assert_eq!(rl.estimated_swing_w(), -290.0);
    }

    #[test]
    fn shrinking_bounds_pull_the_level_back() {
        let mut rl = controller();
        rl.observe(PowerSample::new(-1000.0, 100.0));
        rl.observe(PowerSample::new(-1000.0, 100.0));
        assert_eq!(rl.level(), 2);
        rl.set_bounds(Bounds::from_counts(6, 1));
        assert_eq!(rl.level(), 1);
    }

    fn arb_sample() -> impl Strategy<Value = PowerSample> {
        (
            -3000.0f64..3000.0,
            -3000.0f64..3000.0,
            prop::option::of(-3000.0f64..3000.0),
        )
            .prop_map(|(produced_w, consumed_w, reported)| PowerSample {
                produced_w,
                consumed_w,
                reported_net_w: reported,
            })
    }

    proptest! {
        #[test]
        fn level_stays_bounded_and_ramps_by_one(
            samples in prop::collection::vec(arb_sample(), 1..60)
        ) {
            let mut rl = controller();
            let bounds = rl.bounds();
            for sample in samples {
                let before = rl.level();
                let step = rl.observe(sample);
                let after = rl.level();
                prop_assert!((after - before).abs() <= 1);
                prop_assert!(after >= bounds.min && after <= bounds.max);
                if step.is_discarded() {
                    prop_assert_eq!(before, after);
                }
            }
        }
    }
}
