use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::instrument::{Actuator, Sensor};

// ---------------------------------------------------------------------------
// Simulated tunable laser
// ---------------------------------------------------------------------------

/// Piezo tuning slope magnitude, nm per volt. Raising the drive voltage
/// shortens the cavity, so the wavelength moves down by this much per volt
/// (the inverse of the fine stage's negative scale).
pub const PIEZO_SLOPE: f64 = 0.001338;

/// Piezo voltage at which the piezo contributes no wavelength offset.
pub const PIEZO_CENTER: f64 = 70.0;

struct Inner {
    motor: f64, // nm, coarse wavelength setting
    piezo: f64, // V, fine drive voltage
    noise: f64, // uniform read-noise amplitude, nm
    rng: StdRng,
}

impl Inner {
    fn wavelength(&self) -> f64 {
        self.motor - (self.piezo - PIEZO_CENTER) * PIEZO_SLOPE
    }
}

/// Noiseless-by-default plant model: `wavelength = motor - (piezo - 70) *
/// 0.001338`. Hands out one sensor and two actuator views over the shared
/// state, mirroring the wavemeter/motor/piezo split of the real bench.
///
/// Single-threaded by design, like the homing loop itself.
pub struct SimLaser {
    inner: Rc<RefCell<Inner>>,
}

impl SimLaser {
    pub fn new(motor: f64, piezo: f64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                motor,
                piezo,
                noise: 0.0,
                rng: StdRng::seed_from_u64(0),
            })),
        }
    }

    /// Add uniform read noise of the given amplitude (nm), deterministic
    /// for a fixed seed.
    pub fn with_noise(self, amplitude: f64, seed: u64) -> Self {
        {
            let mut inner = self.inner.borrow_mut();
            inner.noise = amplitude;
            inner.rng = StdRng::seed_from_u64(seed);
        }
        self
    }

    pub fn wavemeter(&self) -> Wavemeter {
        Wavemeter(Rc::clone(&self.inner))
    }

    pub fn motor(&self) -> MotorScan {
        MotorScan(Rc::clone(&self.inner))
    }

    pub fn piezo(&self) -> PiezoDrive {
        PiezoDrive(Rc::clone(&self.inner))
    }

    /// True (noiseless) wavelength, for assertions.
    pub fn wavelength(&self) -> f64 {
        self.inner.borrow().wavelength()
    }

    pub fn motor_setting(&self) -> f64 {
        self.inner.borrow().motor
    }

    pub fn piezo_setting(&self) -> f64 {
        self.inner.borrow().piezo
    }
}

/// Sensor view: reads the plant wavelength plus read noise.
pub struct Wavemeter(Rc<RefCell<Inner>>);

impl Sensor for Wavemeter {
    fn read(&mut self) -> f64 {
        let mut inner = self.0.borrow_mut();
        let noise = if inner.noise > 0.0 {
            let amplitude = inner.noise;
            inner.rng.gen_range(-amplitude..amplitude)
        } else {
            0.0
        };
        inner.wavelength() + noise
    }
}

/// Coarse actuator view over the motor scan position (nm).
pub struct MotorScan(Rc<RefCell<Inner>>);

impl Actuator for MotorScan {
    fn get_setting(&mut self) -> f64 {
        self.0.borrow().motor
    }

    fn set_setting(&mut self, value: f64) {
        self.0.borrow_mut().motor = value;
    }
}

/// Fine actuator view over the piezo drive voltage (V).
pub struct PiezoDrive(Rc<RefCell<Inner>>);

impl Actuator for PiezoDrive {
    fn get_setting(&mut self) -> f64 {
        self.0.borrow().piezo
    }

    fn set_setting(&mut self, value: f64) {
        self.0.borrow_mut().piezo = value;
    }
}

/// Fault model: reports a fixed setting and silently drops every command.
pub struct StuckActuator {
    setting: f64,
}

impl StuckActuator {
    pub fn new(setting: f64) -> Self {
        Self { setting }
    }
}

impl Actuator for StuckActuator {
    fn get_setting(&mut self) -> f64 {
        self.setting
    }

    fn set_setting(&mut self, _value: f64) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
