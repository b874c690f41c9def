use tracing::{info, warn};

use crate::control::{clamp, AdaptivePid};
use crate::instrument::{Actuator, Delay, Sensor};

// ---------------------------------------------------------------------------
// Stage configuration
// ---------------------------------------------------------------------------

/// Parameters for one homing stage (one actuator driven against one sensor).
///
/// The coarse (motor scan) and fine (piezo drive) stages run the same loop,
/// [`run_stage`]; only the numbers differ. Use [`StageConfig::coarse`] /
/// [`StageConfig::fine`] as starting points and override per setup.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Anti-windup clamp on the controller's integral term.
    pub integral_limit: f64,
    /// Convergence tolerance: done when |measurement - target| <= precision.
    pub precision: f64,
    /// Iteration budget. Exhausting it is reported, not raised.
    pub max_iterations: u32,
    /// Settling wait after each actuator command, seconds.
    pub settle_delay: f64,
    /// Physical actuator range; commands are clamped to it.
    pub range_min: f64,
    pub range_max: f64,
    /// Actuator units per unit of controller output (e.g. volts per nm for
    /// a piezo driven against a wavelength error; sign included).
    pub scale: f64,
    /// Quantization of the commanded delta in actuator units, 0 = off.
    pub resolution: f64,
    /// Raw readings averaged per measurement; 1 = single instantaneous read.
    pub samples: u32,
    /// Wait after each raw reading when averaging, seconds.
    pub sample_interval: f64,
    /// Minimum iterations to run even if already within tolerance.
    pub iter_limit: u32,
}

impl StageConfig {
    /// Motor-scan stage: wavelength set point driven directly, range in nm.
    pub fn coarse() -> Self {
        Self {
            kp: 1.13,
            ki: 0.5,
            kd: 0.0,
            integral_limit: 0.5,
            precision: 0.001,
            max_iterations: 30,
            settle_delay: 4.0,
            range_min: 1490.0,
            range_max: 1580.0,
            scale: 1.0,
            resolution: 0.0,
            samples: 1,
            sample_interval: 0.0,
            iter_limit: 0,
        }
    }

    /// Piezo stage: drive voltage against a wavelength error at
    /// -1/0.001338 V per nm, commands quantized to 1 mV, convergence judged
    /// on a 15-sample average.
    pub fn fine() -> Self {
        Self {
            kp: 0.9,
            ki: 0.4,
            kd: 0.0,
            integral_limit: 0.0005,
            precision: 0.00002,
            max_iterations: 30,
            settle_delay: 2.0,
            range_min: 30.0,
            range_max: 110.0,
            scale: -1.0 / 0.001338,
            resolution: 0.001,
            samples: 15,
            sample_interval: 0.2,
            iter_limit: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Converged,
    /// Budget exhausted before the measurement entered tolerance. Non-fatal:
    /// the caller decides whether to proceed.
    IterationLimitExceeded,
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub iterations: u32,
    pub outcome: StageOutcome,
    /// Last (averaged) measurement taken by the stage.
    pub final_value: f64,
}

impl StageReport {
    pub fn converged(&self) -> bool {
        self.outcome == StageOutcome::Converged
    }
}

// ---------------------------------------------------------------------------
// Measurement helpers
// ---------------------------------------------------------------------------

/// Mean of `samples` raw readings, each followed by an `interval` wait.
/// A single instantaneous read when `samples <= 1`.
pub fn averaged_reading(
    sensor: &mut dyn Sensor,
    samples: u32,
    interval: f64,
    delay: &dyn Delay,
) -> f64 {
    if samples <= 1 {
        return sensor.read();
    }
    let mut sum = 0.0;
    for _ in 0..samples {
        sum += sensor.read();
        delay.sleep(interval);
    }
    sum / samples as f64
}

// ---------------------------------------------------------------------------
// Stage loop
// ---------------------------------------------------------------------------

/// Drive one actuator until the measurement sits within `cfg.precision` of
/// `target`, subject to the iteration budget.
///
/// A fresh controller is built per call; nothing persists across stages.
/// Budget exhaustion is logged and reported with exactly
/// `cfg.max_iterations` iterations, never more.
pub fn run_stage(
    sensor: &mut dyn Sensor,
    actuator: &mut dyn Actuator,
    target: f64,
    cfg: &StageConfig,
    delay: &dyn Delay,
) -> StageReport {
    let mut pid =
        AdaptivePid::new(cfg.kp, cfg.ki, cfg.kd, target).with_integral_limit(cfg.integral_limit);

    let mut iterations = 0u32;
    let mut current = averaged_reading(sensor, cfg.samples, cfg.sample_interval, delay);

    while iterations < cfg.iter_limit || (current - target).abs() > cfg.precision {
        if iterations >= cfg.max_iterations {
            warn!(
                iterations,
                current,
                target,
                "iteration budget exhausted before convergence"
            );
            return StageReport {
                iterations,
                outcome: StageOutcome::IterationLimitExceeded,
                final_value: current,
            };
        }
        iterations += 1;

        let setting = actuator.get_setting();
        let correction = pid.compute(current);
        let mut delta = cfg.scale * correction;
        if cfg.resolution > 0.0 {
            delta = (delta / cfg.resolution).round() * cfg.resolution;
        }

        let new_setting = setting + delta;
        let applied = clamp(new_setting, cfg.range_min, cfg.range_max);
        if applied != new_setting {
            warn!(
                commanded = new_setting,
                applied,
                range_min = cfg.range_min,
                range_max = cfg.range_max,
                "actuator command clamped to physical range"
            );
        }
        actuator.set_setting(applied);

        delay.sleep(cfg.settle_delay);
        current = averaged_reading(sensor, cfg.samples, cfg.sample_interval, delay);
        info!(
            iteration = iterations,
            current,
            target,
            diff = current - target,
            setting = applied,
            "homing step"
        );
    }

    StageReport {
        iterations,
        outcome: StageOutcome::Converged,
        final_value: current,
    }
}

// ---------------------------------------------------------------------------
// Two-stage homing
// ---------------------------------------------------------------------------

/// Full homing run: coarse stage then fine stage.
#[derive(Debug, Clone)]
pub struct HomingConfig {
    pub target: f64,
    pub coarse: StageConfig,
    pub fine: StageConfig,
    /// Rest position the fine actuator is re-seated to before homing, so the
    /// fine stage starts mid-range with travel in both directions.
    pub fine_preset: f64,
    /// Re-seat only when the fine actuator sits farther than this from the
    /// preset; `f64::INFINITY` disables re-seating.
    pub preset_tolerance: f64,
    /// Settling wait after re-seating, seconds.
    pub preset_settle: f64,
}

impl HomingConfig {
    pub fn new(target: f64) -> Self {
        Self {
            target,
            coarse: StageConfig::coarse(),
            fine: StageConfig::fine(),
            fine_preset: 70.0,
            preset_tolerance: 2.0,
            preset_settle: 5.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HomingReport {
    /// `None` when the baseline was already inside the coarse tolerance.
    pub coarse: Option<StageReport>,
    pub fine: StageReport,
}

impl HomingReport {
    /// The run converged iff the fine stage did.
    pub fn converged(&self) -> bool {
        self.fine.converged()
    }

    /// Last averaged measurement of the run.
    pub fn final_value(&self) -> f64 {
        self.fine.final_value
    }

    /// (coarse, fine) iteration counts for diagnostics.
    pub fn iterations(&self) -> (u32, u32) {
        (
            self.coarse.as_ref().map_or(0, |r| r.iterations),
            self.fine.iterations,
        )
    }
}

/// Home the measurement onto `cfg.target`: re-seat the fine actuator, run
/// the coarse stage if the baseline violates the coarse tolerance, then
/// always run the fine stage.
///
/// A stage that exhausts its budget is logged and the run continues; the
/// report carries the per-stage outcomes.
pub fn home(
    sensor: &mut dyn Sensor,
    coarse_actuator: &mut dyn Actuator,
    fine_actuator: &mut dyn Actuator,
    cfg: &HomingConfig,
    delay: &dyn Delay,
) -> HomingReport {
    let fine_setting = fine_actuator.get_setting();
    if (fine_setting - cfg.fine_preset).abs() > cfg.preset_tolerance {
        info!(
            from = fine_setting,
            to = cfg.fine_preset,
            "re-seating fine actuator before homing"
        );
        fine_actuator.set_setting(cfg.fine_preset);
        delay.sleep(cfg.preset_settle);
    }

    let baseline = averaged_reading(sensor, cfg.fine.samples, cfg.fine.sample_interval, delay);
    info!(
        baseline,
        target = cfg.target,
        diff = baseline - cfg.target,
        "baseline before homing"
    );

    let coarse = if (baseline - cfg.target).abs() > cfg.coarse.precision {
        Some(run_stage(
            sensor,
            coarse_actuator,
            cfg.target,
            &cfg.coarse,
            delay,
        ))
    } else {
        None
    };

    let fine = run_stage(sensor, fine_actuator, cfg.target, &cfg.fine, delay);

    HomingReport { coarse, fine }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::NoDelay;
    use crate::sim::{SimLaser, StuckActuator};

    /// Pure-P stage config over the simulated motor: measurement equals the
    /// motor setting exactly, so gain 1.0 cancels the error in one step.
    fn pure_p_coarse() -> StageConfig {
        StageConfig {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            ..StageConfig::coarse()
        }
    }

    #[test]
    fn converges_on_noiseless_linear_plant() {
        let laser = SimLaser::new(1545.0, 70.0);
        let mut wm = laser.wavemeter();
        let mut motor = laser.motor();

        let report = run_stage(&mut wm, &mut motor, 1550.0, &pure_p_coarse(), &NoDelay);
        assert!(report.converged(), "gain 1.0 on an identity plant must converge");
        assert!(
            report.iterations <= 30,
            "took {} iterations",
            report.iterations
        );
        assert!((report.final_value - 1550.0).abs() <= 0.001);
    }

    #[test]
    fn iteration_budget_respected_when_stuck() {
        let laser = SimLaser::new(1545.0, 70.0);
        let mut wm = laser.wavemeter();
        let mut stuck = StuckActuator::new(1545.0);

        let cfg = StageConfig {
            max_iterations: 7,
            ..pure_p_coarse()
        };
        let report = run_stage(&mut wm, &mut stuck, 1550.0, &cfg, &NoDelay);
        assert_eq!(report.outcome, StageOutcome::IterationLimitExceeded);
        assert_eq!(
            report.iterations, 7,
            "budget exhaustion must report exactly max_iterations"
        );
    }

    #[test]
    fn fine_stage_runs_minimum_iterations() {
        // Already within tolerance at iteration 0, but iter_limit = 2 keeps
        // the loop alive for exactly two iterations.
        let laser = SimLaser::new(1550.0, 70.0);
        let mut wm = laser.wavemeter();
        let mut piezo = laser.piezo();

        let cfg = StageConfig {
            iter_limit: 2,
            ..StageConfig::fine()
        };
        let report = run_stage(&mut wm, &mut piezo, 1550.0, &cfg, &NoDelay);
        assert!(report.converged());
        assert_eq!(report.iterations, 2, "minimum-iteration floor ignored");
    }

    #[test]
    fn commands_are_clamped_to_actuator_range() {
        // Target far above the motor's upper bound: every correction pushes
        // past 1580 nm and must be truncated there.
        let laser = SimLaser::new(1578.0, 70.0);
        let mut wm = laser.wavemeter();
        let mut motor = laser.motor();

        let cfg = StageConfig {
            max_iterations: 5,
            ..pure_p_coarse()
        };
        let report = run_stage(&mut wm, &mut motor, 1600.0, &cfg, &NoDelay);
        assert!(!report.converged());
        let setting = laser.motor_setting();
        assert!(
            (setting - 1580.0).abs() < 1e-9,
            "motor should sit pinned at the range limit, got {}",
            setting
        );
    }

    #[test]
    fn home_skips_coarse_inside_coarse_tolerance() {
        let laser = SimLaser::new(1550.0, 70.0);
        let mut wm = laser.wavemeter();
        let mut motor = laser.motor();
        let mut piezo = laser.piezo();

        let cfg = HomingConfig::new(1550.0);
        let report = home(&mut wm, &mut motor, &mut piezo, &cfg, &NoDelay);
        assert!(report.coarse.is_none(), "coarse stage should be skipped");
        assert!(report.converged());
    }

    #[test]
    fn home_reseats_fine_actuator() {
        // Piezo parked at 95 V gets pulled back to the 70 V preset before
        // any measurement; with zero error afterwards it stays there.
        let laser = SimLaser::new(1550.0, 95.0);
        let mut wm = laser.wavemeter();
        let mut motor = laser.motor();
        let mut piezo = laser.piezo();

        let cfg = HomingConfig::new(1550.0);
        let report = home(&mut wm, &mut motor, &mut piezo, &cfg, &NoDelay);
        assert!(report.converged());
        assert!(
            (laser.piezo_setting() - 70.0).abs() < 1e-9,
            "piezo should rest at the preset, got {}",
            laser.piezo_setting()
        );
    }

    #[test]
    fn home_two_stage_end_to_end() {
        // 0.5 nm off target: coarse stage walks the motor inside 1 pm, fine
        // stage trims the piezo to within 0.02 pm.
        let laser = SimLaser::new(1549.5, 70.0);
        let mut wm = laser.wavemeter();
        let mut motor = laser.motor();
        let mut piezo = laser.piezo();

        let cfg = HomingConfig::new(1550.0);
        let report = home(&mut wm, &mut motor, &mut piezo, &cfg, &NoDelay);

        let coarse = report.coarse.as_ref().expect("coarse stage should run");
        assert!(coarse.converged(), "coarse stage failed after {} iterations", coarse.iterations);
        assert!(report.converged(), "fine stage failed");
        assert!(
            (report.final_value() - 1550.0).abs() <= cfg.fine.precision,
            "residual {} above fine precision",
            report.final_value() - 1550.0
        );
    }

    #[test]
    fn averaged_reading_single_sample_is_instantaneous() {
        let laser = SimLaser::new(1551.0, 70.0);
        let mut wm = laser.wavemeter();
        let v = averaged_reading(&mut wm, 1, 0.2, &NoDelay);
        assert!((v - 1551.0).abs() < 1e-12);
    }

    #[test]
    fn averaged_reading_averages_noise_down() {
        let laser = SimLaser::new(1550.0, 70.0).with_noise(0.001, 42);
        let mut wm = laser.wavemeter();
        let v = averaged_reading(&mut wm, 200, 0.0, &NoDelay);
        assert!(
            (v - 1550.0).abs() < 0.0005,
            "200-sample mean of +/-1 pm uniform noise should land well inside 0.5 pm, got {}",
            v - 1550.0
        );
    }
}
