//! User-visible notification events.
//!
//! Every failure the panel surfaces to the operator travels through here as
//! a toast event. Senders never block: if the presentation side is not
//! draining the channel, the toast is dropped and logged instead.

use log::{debug, warn};
use std::time::Duration;
use strum::Display;
use tokio::sync::mpsc;

/// Default toast display duration.
pub const TOAST_DEFAULT: Duration = Duration::from_secs(5);
/// Short toast display duration.
pub const TOAST_SHORT: Duration = Duration::from_secs(3);
/// Long toast display duration.
pub const TOAST_LONG: Duration = Duration::from_secs(7);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ToastKind {
    Error,
    Warning,
    Success,
    Info,
}

/// A single dismissible notification for the presentation layer.
#[derive(Debug, Clone)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
    pub duration: Duration,
}

/// Cloneable handle for raising toasts from any panel task.
#[derive(Clone)]
pub struct ToastSender {
    tx: mpsc::Sender<Toast>,
}

impl ToastSender {
    /// Create a toast channel with the given capacity.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Toast>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(ToastKind::Error, message.into(), TOAST_DEFAULT);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.send(ToastKind::Warning, message.into(), TOAST_DEFAULT);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.send(ToastKind::Success, message.into(), TOAST_SHORT);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(ToastKind::Info, message.into(), TOAST_DEFAULT);
    }

    fn send(&self, kind: ToastKind, message: String, duration: Duration) {
        debug!("[Toast] {}: {}", kind, message);
        let toast = Toast {
            kind,
            message,
            duration,
        };
        if let Err(e) = self.tx.try_send(toast) {
            warn!("[Toast] Dropped {} notification: {}", kind, e);
        }
    }
}
