pub mod control;
pub mod homing;
pub mod instrument;
pub mod sim;

pub use control::{clamp, AdaptivePid};
pub use homing::{
    averaged_reading, home, run_stage, HomingConfig, HomingReport, StageConfig, StageOutcome,
    StageReport,
};
pub use instrument::{Actuator, Delay, NoDelay, Sensor, ThreadDelay};
