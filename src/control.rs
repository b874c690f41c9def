use tracing::debug;

// ---------------------------------------------------------------------------
// Adaptive PID Controller (single channel)
// ---------------------------------------------------------------------------

/// Self-tuning PID controller for homing a measured value onto a set point.
///
/// On top of the conventional PID computation, the gains are periodically
/// retuned from the sign pattern and dispersion of the recent error history
/// (see [`AdaptivePid::compute`]). The retuning is multiplicative (x0.9 or
/// x1.1 per trigger) with no floor or ceiling, so over very long runs the
/// gains can drift; one controller instance is meant to live for a single
/// homing stage and be discarded afterwards.
#[derive(Debug, Clone)]
pub struct AdaptivePid {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    set_point: f64,
    integral: f64,
    previous_error: f64,
    derivative: f64,
    /// Last `n` errors, oldest first. Zero-filled until `n` samples exist.
    error_history: Vec<f64>,
    iteration: u64,
    min_iterations_for_integral: u64,
    integral_limit: f64,
}

impl AdaptivePid {
    /// Controller with default adaptation parameters: 4-sample error
    /// history, integral adaptation enabled after 10 iterations, integral
    /// term clamped to +/-0.5.
    pub fn new(kp: f64, ki: f64, kd: f64, set_point: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            set_point,
            integral: 0.0,
            previous_error: 0.0,
            derivative: 0.0,
            error_history: vec![0.0; 4],
            iteration: 0,
            min_iterations_for_integral: 10,
            integral_limit: 0.5,
        }
    }

    /// Override the anti-windup clamp on the integral term.
    pub fn with_integral_limit(mut self, limit: f64) -> Self {
        self.integral_limit = limit;
        self
    }

    /// Override the error-history length used by the adaptation rules.
    pub fn with_history_len(mut self, n: usize) -> Self {
        self.error_history = vec![0.0; n.max(1)];
        self
    }

    /// Override the iteration count before integral/derivative adaptation
    /// may fire.
    pub fn with_min_iterations(mut self, n: u64) -> Self {
        self.min_iterations_for_integral = n;
        self
    }

    pub fn set_point(&self) -> f64 {
        self.set_point
    }

    /// Compute the correction for the given measurement.
    ///
    /// Updates the integral (clamped to the anti-windup limit), derivative,
    /// and error history, then every time `(2 * iteration)` is a multiple of
    /// the history length the adaptation rules run and may retune the gains.
    pub fn compute(&mut self, current_value: f64) -> f64 {
        let error = self.set_point - current_value;

        self.integral = clamp(
            self.integral + error,
            -self.integral_limit,
            self.integral_limit,
        );
        self.derivative = error - self.previous_error;

        let output = self.kp * error + self.ki * self.integral + self.kd * self.derivative;

        self.previous_error = error;
        self.error_history.rotate_left(1);
        let n = self.error_history.len();
        self.error_history[n - 1] = error;
        self.iteration += 1;

        if (2 * self.iteration) % n as u64 == 0 {
            self.adapt_parameters();
        }

        output
    }

    /// Retune Kp/Ki/Kd from the recent error history.
    ///
    /// Empirical rules carried over verbatim from the tuned hardware setup;
    /// the conditional structure and the 0.9/1.1 factors are load-bearing.
    fn adapt_parameters(&mut self) {
        let avg_error = mean_abs(&self.error_history);
        let rsd = if avg_error != 0.0 {
            std_dev(&self.error_history) / avg_error
        } else {
            0.0
        };
        let relative_derivative = if self.previous_error != 0.0 {
            (self.derivative / self.previous_error).abs()
        } else {
            0.0
        };

        let all_positive = self.error_history.iter().all(|&e| e > 0.0);
        let all_negative = self.error_history.iter().all(|&e| e < 0.0);

        if self
            .error_history
            .iter()
            .all(|&e| (0.9 * e).abs() < self.previous_error.abs())
        {
            // Errors shrinking fast relative to the latest one: back off P
            // before it starts overshooting.
            self.kp *= 0.9;
            debug!(kp = self.kp, "over-tuning detected, reducing Kp");
        } else if all_positive || all_negative {
            // Error has not crossed zero yet, the target is not bracketed.
            self.kp *= 1.1;
            debug!(kp = self.kp, "under-tuning detected, raising Kp");
        }

        if self.iteration >= self.min_iterations_for_integral {
            if all_positive || all_negative {
                if self.integral.abs() >= self.integral_limit {
                    // Persistent bias with a saturated integral term.
                    self.ki *= 1.1;
                    debug!(ki = self.ki, "consistent error, raising Ki");
                }
            } else if positive_count(&self.error_history) == self.error_history.len() / 2
                && self.previous_error.abs() > 0.9 * avg_error
            {
                // Oscillating around zero without damping down.
                self.ki *= 0.9;
                debug!(ki = self.ki, "oscillating error, reducing Ki");
            }

            if relative_derivative < 0.7 {
                self.kd *= 1.1;
                debug!(kd = self.kd, "slow response, raising Kd");
            } else if rsd > 3.5 {
                self.kd *= 0.9;
                debug!(kd = self.kd, "high relative noise, reducing Kd");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Safety clamp
// ---------------------------------------------------------------------------

/// Bound `value` to `[min, max]`.
///
/// Every commanded actuator value goes through this before it reaches
/// hardware; the caller is responsible for logging when the clamp engaged.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.min(max).max(min)
}

fn mean_abs(values: &[f64]) -> f64 {
    values.iter().map(|e| e.abs()).sum::<f64>() / values.len() as f64
}

/// Population standard deviation of the signed values.
fn std_dev(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

fn positive_count(values: &[f64]) -> usize {
    values.iter().filter(|&&e| e > 0.0).count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
