//! Control tree data model.
//!
//! Mirrors the `smart_home/controls` subtree of the store: a fixed-length
//! LED array plus the gate stepper, rack servo and fan motor blocks.

use super::field::{FanAttr, FieldId, LedAttr};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Number of LEDs on the lighting rig.
pub const LED_COUNT: usize = 10;

/// Speed the fan starts at when toggled on without a slider gesture.
pub const DEFAULT_FAN_SPEED: u8 = 128;

/// Value of a single controllable attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    /// 0-255 level for brightness and fan speed.
    Level(u8),
    /// `#RRGGBB` color, uppercase.
    Color(String),
}

/// Validate a free-text color entry: `#` followed by exactly six hex digits,
/// case-insensitive. Returns the normalized uppercase form.
pub fn normalize_hex(input: &str) -> Option<String> {
    let digits = input.strip_prefix('#')?;
    if digits.len() == 6 && digits.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(format!("#{}", digits.to_ascii_uppercase()))
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedState {
    pub on: bool,
    pub hex: String,
    pub brightness: u8,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateState {
    pub is_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RackState {
    pub is_extended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanState {
    pub is_on: bool,
    pub speed: u8,
}

/// Full structured mirror of the control subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTree {
    pub leds: Vec<LedState>,
    pub gate: GateState,
    pub rack: RackState,
    pub fan: FanState,
}

fn led_label(index: usize) -> String {
    if index < 5 {
        format!("Indoor {}", index + 1)
    } else if index < 8 {
        format!("Outdoor {}", index - 4)
    } else {
        format!("Status {}", index - 7)
    }
}

impl Default for ControlTree {
    /// Fixed-shape default shown before the first snapshot arrives: all LEDs
    /// off and white, gate closed, rack retracted, fan off.
    fn default() -> Self {
        Self {
            leds: (0..LED_COUNT)
                .map(|index| LedState {
                    on: false,
                    hex: "#FFFFFF".to_string(),
                    brightness: 255,
                    label: led_label(index),
                })
                .collect(),
            gate: GateState { is_open: false },
            rack: RackState { is_extended: false },
            fan: FanState {
                is_on: false,
                speed: 0,
            },
        }
    }
}

impl ControlTree {
    /// Read the committed value of one field. An out-of-range LED index
    /// cannot come from a valid control surface; it is logged and answered
    /// with a neutral value.
    pub fn get(&self, field: FieldId) -> FieldValue {
        match field {
            FieldId::Led(index, attr) => {
                let Some(led) = self.leds.get(index) else {
                    warn!("[Controls] Read of out-of-range led {}", index);
                    return match attr {
                        LedAttr::On => FieldValue::Bool(false),
                        LedAttr::Hex => FieldValue::Color("#FFFFFF".to_string()),
                        LedAttr::Brightness => FieldValue::Level(0),
                    };
                };
                match attr {
                    LedAttr::On => FieldValue::Bool(led.on),
                    LedAttr::Hex => FieldValue::Color(led.hex.clone()),
                    LedAttr::Brightness => FieldValue::Level(led.brightness),
                }
            }
            FieldId::Gate => FieldValue::Bool(self.gate.is_open),
            FieldId::Rack => FieldValue::Bool(self.rack.is_extended),
            FieldId::Fan(FanAttr::IsOn) => FieldValue::Bool(self.fan.is_on),
            FieldId::Fan(FanAttr::Speed) => FieldValue::Level(self.fan.speed),
        }
    }

    /// Overwrite the committed value of one field. A kind mismatch or an
    /// out-of-range LED index cannot come out of a validated commit; both
    /// are logged and ignored.
    pub fn set(&mut self, field: FieldId, value: FieldValue) {
        match (field, value) {
            (FieldId::Led(index, attr), value) => {
                let Some(led) = self.leds.get_mut(index) else {
                    warn!("[Controls] Ignoring write to out-of-range led {}", index);
                    return;
                };
                match (attr, value) {
                    (LedAttr::On, FieldValue::Bool(on)) => led.on = on,
                    (LedAttr::Hex, FieldValue::Color(hex)) => led.hex = hex,
                    (LedAttr::Brightness, FieldValue::Level(level)) => led.brightness = level,
                    (attr, value) => warn!(
                        "[Controls] Ignoring mismatched value {:?} for led-{}-{}",
                        value, index, attr
                    ),
                }
            }
            (FieldId::Gate, FieldValue::Bool(open)) => self.gate.is_open = open,
            (FieldId::Rack, FieldValue::Bool(extended)) => self.rack.is_extended = extended,
            (FieldId::Fan(FanAttr::IsOn), FieldValue::Bool(on)) => self.fan.is_on = on,
            (FieldId::Fan(FanAttr::Speed), FieldValue::Level(speed)) => self.fan.speed = speed,
            (field, value) => warn!("[Controls] Ignoring mismatched value {:?} for {}", value, field),
        }
    }

    /// Serialize into the store's subtree shape, for seeding a fresh rig.
    pub fn to_store_value(&self) -> Value {
        json!({
            "lighting": { "leds": self.leds },
            "motors": {
                "stepper_gate": self.gate,
                "servo_rack": self.rack,
                "fan_l298n": self.fan,
            },
        })
    }
}

/// Inbound snapshot of the control subtree. Every level is optional so a
/// partial first-connect payload still deserializes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlSnapshot {
    #[serde(default)]
    pub lighting: Option<LightingSnapshot>,
    #[serde(default)]
    pub motors: Option<MotorsSnapshot>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LightingSnapshot {
    #[serde(default)]
    pub leds: Option<Vec<Option<LedSnapshot>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedSnapshot {
    #[serde(default)]
    pub on: Option<bool>,
    #[serde(default)]
    pub hex: Option<String>,
    #[serde(default)]
    pub brightness: Option<u8>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MotorsSnapshot {
    #[serde(default)]
    pub stepper_gate: Option<GateSnapshot>,
    #[serde(default)]
    pub servo_rack: Option<RackSnapshot>,
    #[serde(default)]
    pub fan_l298n: Option<FanSnapshot>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GateSnapshot {
    #[serde(default)]
    pub is_open: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RackSnapshot {
    #[serde(default)]
    pub is_extended: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FanSnapshot {
    #[serde(default)]
    pub is_on: Option<bool>,
    #[serde(default)]
    pub speed: Option<u8>,
}
