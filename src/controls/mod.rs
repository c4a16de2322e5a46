//! Device control state and the live reconciliation engine.
//!
//! The engine owns the editable mirror of the rig's control tree and merges
//! streamed store snapshots with in-flight operator gestures.

mod engine;
mod field;
mod model;

pub use engine::{ControlEngine, ControlView, Gesture};
pub use field::{FanAttr, FieldId, LedAttr};
pub use model::{
    ControlSnapshot, ControlTree, DEFAULT_FAN_SPEED, FanState, FieldValue, GateState, LED_COUNT,
    LedState, RackState, normalize_hex,
};
