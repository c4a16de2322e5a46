//! Sensor mirror with alert edges and the rig connection watchdog.
//!
//! Unlike the control tree there is nothing to reconcile here (the panel
//! never writes sensor values), so merging is plain keep-previous. What
//! this adds is edge detection: alerts fire on transitions between
//! snapshots, never on steady state, and a watchdog infers that the rig
//! went offline when its heartbeat stops changing.

use super::model::{GasStatus, LOW_VOLTAGE_THRESHOLD, SensorSnapshot, SensorTree};
use crate::config::WatchdogConfig;
use crate::error::{PanelError, Result};
use crate::notify::ToastSender;
use crate::store::{RemoteStore, StoreError};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Read-only projection for the presentation layer.
#[derive(Debug, Clone)]
pub struct SensorView {
    pub tree: SensorTree,
    pub rig_connected: bool,
}

/// Live mirror of the sensor subtree for one session.
pub struct SensorMirror {
    store: Arc<dyn RemoteStore>,
    sensors_path: String,
    tree: SensorTree,
    /// Alerts compare against the previous snapshot; none fire before one.
    have_snapshot: bool,
    rig_connected: bool,
    last_heartbeat: Option<i64>,
    heartbeat_seen_at: Instant,
    poll_interval: Duration,
    offline_after: Duration,
    toasts: ToastSender,
    view_tx: watch::Sender<SensorView>,
}

impl SensorMirror {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        base_path: &str,
        watchdog: &WatchdogConfig,
        toasts: ToastSender,
    ) -> (Self, watch::Receiver<SensorView>) {
        let tree = SensorTree::default();
        let (view_tx, view_rx) = watch::channel(SensorView {
            tree: tree.clone(),
            rig_connected: false,
        });
        let mirror = Self {
            store,
            sensors_path: format!("{base_path}/sensors"),
            tree,
            have_snapshot: false,
            rig_connected: false,
            last_heartbeat: None,
            heartbeat_seen_at: Instant::now(),
            poll_interval: Duration::from_secs(watchdog.poll_secs),
            offline_after: Duration::from_secs(watchdog.timeout_secs),
            toasts,
            view_tx,
        };
        (mirror, view_rx)
    }

    pub fn tree(&self) -> &SensorTree {
        &self.tree
    }

    pub fn rig_connected(&self) -> bool {
        self.rig_connected
    }

    /// Merge an inbound snapshot category by category, track the heartbeat
    /// and fire alert toasts on transitions.
    pub fn on_snapshot(&mut self, snapshot: SensorSnapshot) {
        let mut next = self.tree.clone();
        if let Some(gas_smoke) = snapshot.gas_smoke {
            next.gas_smoke = gas_smoke;
        }
        if let Some(environment) = snapshot.environment {
            next.environment = environment;
        }
        if let Some(security) = snapshot.security {
            next.security = security;
        }
        if let Some(system) = snapshot.system {
            next.system = system;
        }

        // A changed heartbeat means the rig is alive and publishing.
        let heartbeat = next.system.last_update.unwrap_or(0);
        if heartbeat > 0 && Some(heartbeat) != self.last_heartbeat {
            self.last_heartbeat = Some(heartbeat);
            self.heartbeat_seen_at = Instant::now();
            if !self.rig_connected {
                info!("[Sensors] Rig is online");
                self.rig_connected = true;
            }
        }
        if !self.rig_connected && next.system.esp32_uptime_sec.unwrap_or(0) > 0 {
            next.system.esp32_uptime_sec = Some(0);
        }

        if self.have_snapshot {
            self.raise_alert_edges(&next);
        }

        self.tree = next;
        self.have_snapshot = true;
        self.publish_view();
    }

    /// Feed failure: keep the last-known values on display.
    pub fn on_snapshot_error(&mut self, err: StoreError) {
        warn!("[Sensors] Sensor feed error: {}", err);
        self.toasts
            .error("Could not load sensor data, check the connection");
    }

    /// Watchdog tick: if the heartbeat has not changed for the configured
    /// window, declare the rig offline (once per transition).
    pub fn check_connection(&mut self) {
        if !self.rig_connected {
            return;
        }
        let silence = self.heartbeat_seen_at.elapsed();
        if silence > self.offline_after {
            warn!(
                "[Sensors] Rig went silent ({}s without a heartbeat)",
                silence.as_secs()
            );
            self.rig_connected = false;
            self.tree.system.esp32_uptime_sec = Some(0);
            self.toasts.warning("Rig disconnected!");
            self.publish_view();
        }
    }

    fn raise_alert_edges(&self, next: &SensorTree) {
        let prev = &self.tree;

        if next.gas_smoke.status == GasStatus::Danger && prev.gas_smoke.status != GasStatus::Danger
        {
            self.toasts.error("Dangerous gas levels detected!");
        }

        if next.gas_smoke.smoke_detected && !prev.gas_smoke.smoke_detected {
            self.toasts.error("Smoke detected!");
        }

        if let Some(voltage) = next.system.voltage
            && voltage < LOW_VOLTAGE_THRESHOLD
            && prev.system.voltage.is_none_or(|v| v >= LOW_VOLTAGE_THRESHOLD)
        {
            self.toasts.warning("Low voltage detected!");
        }

        for (key, sensor) in &next.security.sensors {
            let was_detected = prev
                .security
                .sensors
                .get(key)
                .is_some_and(|s| s.detected);
            if sensor.detected && !was_detected {
                self.toasts
                    .warning(format!("{} - intrusion detected!", sensor.label));
            }
        }
    }

    /// Event loop: follow the sensor feed and run the watchdog until
    /// cancelled.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut feed = self.store.subscribe(&self.sensors_path).await?;
        let mut watchdog = tokio::time::interval(self.poll_interval);
        info!("[Sensors] Watching {}", self.sensors_path);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = watchdog.tick() => self.check_connection(),
                delivery = feed.recv() => match delivery {
                    Some(Ok(value)) => match serde_json::from_value::<SensorSnapshot>(value) {
                        Ok(snapshot) => self.on_snapshot(snapshot),
                        Err(e) => warn!("[Sensors] Malformed sensor snapshot: {}", e),
                    },
                    Some(Err(e)) => self.on_snapshot_error(e),
                    None => return Err(PanelError::FeedClosed(self.sensors_path.clone())),
                },
            }
        }

        info!("[Sensors] Stopped watching {}", self.sensors_path);
        Ok(())
    }

    fn publish_view(&self) {
        debug!("[Sensors] View updated");
        self.view_tx.send_replace(SensorView {
            tree: self.tree.clone(),
            rig_connected: self.rig_connected,
        });
    }
}
