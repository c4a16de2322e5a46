//! Sensor tree data model.
//!
//! Mirrors the `smart_home/sensors` subtree: gas/smoke, environment,
//! door/security and system health categories.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;

/// Gas reading above this is a warning.
pub const GAS_WARNING_LEVEL: u16 = 300;
/// Gas reading above this is dangerous.
pub const GAS_DANGER_LEVEL: u16 = 500;
/// Supply voltage below this raises a low-voltage warning.
pub const LOW_VOLTAGE_THRESHOLD: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GasStatus {
    #[default]
    Normal,
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GasSmoke {
    #[serde(default)]
    pub gas_value: Option<u16>,
    #[serde(default)]
    pub smoke_detected: bool,
    #[serde(default)]
    pub status: GasStatus,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub light_intensity: Option<f64>,
    #[serde(default)]
    pub is_raining: bool,
    #[serde(default)]
    pub is_dark: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecuritySensor {
    #[serde(default)]
    pub detected: bool,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    #[serde(default)]
    pub sensors: BTreeMap<String, SecuritySensor>,
}

impl Default for Security {
    fn default() -> Self {
        let mut sensors = BTreeMap::new();
        for (key, label) in [
            ("front_door", "Front Door"),
            ("back_door", "Back Door"),
            ("garage", "Garage"),
        ] {
            sensors.insert(
                key.to_string(),
                SecuritySensor {
                    detected: false,
                    label: label.to_string(),
                },
            );
        }
        Self { sensors }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    #[serde(default)]
    pub voltage: Option<f64>,
    #[serde(default)]
    pub esp32_uptime_sec: Option<u64>,
    #[serde(default)]
    pub is_connected: bool,
    /// Millisecond timestamp the rig bumps on every publish; the watchdog
    /// watches this for change, not for any absolute value.
    #[serde(default)]
    pub last_update: Option<i64>,
}

/// Full structured mirror of the sensor subtree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorTree {
    #[serde(default)]
    pub gas_smoke: GasSmoke,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub security: Security,
    #[serde(default)]
    pub system: SystemStatus,
}

/// Inbound snapshot; categories are merged whole, absent ones keep their
/// previous values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SensorSnapshot {
    #[serde(default)]
    pub gas_smoke: Option<GasSmoke>,
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub security: Option<Security>,
    #[serde(default)]
    pub system: Option<SystemStatus>,
}
