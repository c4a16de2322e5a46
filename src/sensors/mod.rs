//! Sensor state mirror, alert edge detection and the rig watchdog.

mod mirror;
mod model;

pub use mirror::{SensorMirror, SensorView};
pub use model::{
    Environment, GAS_DANGER_LEVEL, GAS_WARNING_LEVEL, GasSmoke, GasStatus, LOW_VOLTAGE_THRESHOLD,
    Security, SecuritySensor, SensorSnapshot, SensorTree, SystemStatus,
};
