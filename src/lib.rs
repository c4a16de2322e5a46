//! Smart Home Panel core library.
//!
//! Keeps a local, editable mirror of rig control and sensor state in sync
//! with an external realtime key-value store. The centerpiece is the control
//! reconciliation engine, which merges streamed snapshots with in-flight
//! operator edits so a slider drag is never clobbered by a server echo.

pub mod auth;
pub mod config;
pub mod controls;
pub mod error;
pub mod notify;
pub mod sensors;
pub mod sim;
pub mod store;
