//! Remote state store contract.
//!
//! The panel never talks to a backend directly; everything goes through
//! [`RemoteStore`], a path-addressable key-value store that supports point
//! reads, live full-subtree feeds and partial writes. [`MemoryStore`] backs
//! tests and simulation, [`MqttStore`] backs the real rig over a broker.

mod memory;
mod mqtt;

pub use memory::MemoryStore;
pub use mqtt::{MqttFeed, MqttStore};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error as ThisError;
use tokio::sync::mpsc;

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Permission denied for {path}")]
    PermissionDenied { path: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out waiting for {path}")]
    Timeout { path: String },

    #[error("Malformed value at {path}: {message}")]
    Malformed { path: String, message: String },
}

impl StoreError {
    /// Whether this failure is an authorization rejection rather than a
    /// transient transport problem. The two are surfaced differently.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, StoreError::PermissionDenied { .. })
    }
}

/// One delivery from a live feed: the full subtree value, or a feed error.
pub type SnapshotResult = std::result::Result<Value, StoreError>;

/// Handle for a live subtree feed.
///
/// Dropping the handle ends the feed; the store prunes the subscriber on the
/// next delivery attempt, so teardown needs no explicit unsubscribe call.
pub struct Subscription {
    rx: mpsc::Receiver<SnapshotResult>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<SnapshotResult>) -> Self {
        Self { rx }
    }

    /// Wait for the next snapshot. `None` means the store side went away.
    pub async fn recv(&mut self) -> Option<SnapshotResult> {
        self.rx.recv().await
    }
}

/// Path-addressable realtime key-value store.
///
/// Paths are `/`-separated segments (`smart_home/controls/lighting/leds/3`);
/// numeric segments index into arrays. Each subscriber gets the last-known
/// value of its subtree on subscribe and the full subtree on every change.
/// A single-subtree patch is atomic; there is no ordering guarantee across
/// different paths.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Point read of the value at `path`, or `None` if nothing is there.
    async fn read_once(&self, path: &str) -> std::result::Result<Option<Value>, StoreError>;

    /// Open a live feed of full-subtree snapshots for `path`.
    async fn subscribe(&self, path: &str) -> std::result::Result<Subscription, StoreError>;

    /// Partial write: merge the keys of `partial` into the subtree at `path`.
    /// Resolves once the write is durably acknowledged.
    async fn patch(&self, path: &str, partial: Value) -> std::result::Result<(), StoreError>;
}

/// Split a store path into its non-empty segments.
pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Whether two paths address the same node or one is an ancestor of the other.
/// A write to either one changes the value observed at the other.
pub(crate) fn paths_overlap(a: &str, b: &str) -> bool {
    segments(a).zip(segments(b)).all(|(x, y)| x == y)
}
