//! Typed control field identifiers.
//!
//! Every controllable attribute on the rig has exactly one [`FieldId`].
//! Using a tagged union instead of concatenated string keys means a typo'd
//! field reference is a compile error, not a silently ignored edit.

use std::fmt;
use strum::Display;

/// LED attribute addressed by a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LedAttr {
    On,
    Hex,
    Brightness,
}

/// Fan attribute addressed by a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FanAttr {
    IsOn,
    Speed,
}

/// Stable identifier for one controllable attribute in the control tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldId {
    /// One attribute of one LED in the lighting array.
    Led(usize, LedAttr),
    /// Gate stepper open/closed.
    Gate,
    /// Rack servo extended/retracted.
    Rack,
    /// One attribute of the fan motor.
    Fan(FanAttr),
}

impl FieldId {
    /// Store path of the subtree a commit to this field patches, relative to
    /// the controls root. Coupled fields (fan speed and power) share one
    /// subtree so they can be written atomically.
    pub fn patch_path(&self) -> String {
        match self {
            FieldId::Led(index, _) => format!("lighting/leds/{index}"),
            FieldId::Gate => "motors/stepper_gate".to_string(),
            FieldId::Rack => "motors/servo_rack".to_string(),
            FieldId::Fan(_) => "motors/fan_l298n".to_string(),
        }
    }

    /// JSON key of this field inside its patch subtree.
    pub fn attr_key(&self) -> &'static str {
        match self {
            FieldId::Led(_, LedAttr::On) => "on",
            FieldId::Led(_, LedAttr::Hex) => "hex",
            FieldId::Led(_, LedAttr::Brightness) => "brightness",
            FieldId::Gate => "is_open",
            FieldId::Rack => "is_extended",
            FieldId::Fan(FanAttr::IsOn) => "is_on",
            FieldId::Fan(FanAttr::Speed) => "speed",
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldId::Led(index, attr) => write!(f, "led-{index}-{attr}"),
            FieldId::Gate => write!(f, "gate"),
            FieldId::Rack => write!(f, "rack"),
            FieldId::Fan(attr) => write!(f, "fan-{attr}"),
        }
    }
}
