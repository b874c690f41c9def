use std::time::Duration;

// ---------------------------------------------------------------------------
// Instrument capability seams
// ---------------------------------------------------------------------------

/// A scalar measurement source (wavelength meter, power meter).
///
/// Implement this to plug a physical instrument into the homing loop. Reads
/// are blocking and assumed to always succeed; the caller controls the
/// cadence.
pub trait Sensor {
    /// Take one raw reading, in the sensor's physical unit.
    fn read(&mut self) -> f64;
}

/// A scalar actuator (motor scan position, piezo drive voltage).
pub trait Actuator {
    /// Current commanded setting.
    fn get_setting(&mut self) -> f64;

    /// Apply a new setting. Idempotent; the value has already been clamped
    /// to the actuator's physical range by the caller.
    fn set_setting(&mut self, value: f64);
}

/// Settling-time wait between an actuator command and the next measurement.
///
/// Injected so tests can run the homing loops with no real sleeping.
pub trait Delay {
    fn sleep(&self, seconds: f64);
}

/// Blocking wall-clock delay for real hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn sleep(&self, seconds: f64) {
        if seconds > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(seconds));
        }
    }
}

/// No-op delay for tests and simulated plants.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl Delay for NoDelay {
    fn sleep(&self, _seconds: f64) {}
}
