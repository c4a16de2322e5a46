//! Rig simulation for running the panel without hardware.
//!
//! Seeds the in-memory store with the default control and sensor trees and
//! then publishes plausible sensor churn on an interval: a wandering gas
//! reading, voltage jitter, heartbeat bumps and the occasional door event.

use crate::controls::ControlTree;
use crate::sensors::{GAS_DANGER_LEVEL, GAS_WARNING_LEVEL};
use crate::store::{MemoryStore, RemoteStore};
use chrono::Utc;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};

const TICK: Duration = Duration::from_secs(2);
const DOOR_EVENT_CHANCE: f64 = 0.03;
const DOORS: [(&str, &str); 3] = [
    ("front_door", "Front Door"),
    ("back_door", "Back Door"),
    ("garage", "Garage"),
];

fn gas_status(value: u16) -> &'static str {
    if value >= GAS_DANGER_LEVEL {
        "danger"
    } else if value >= GAS_WARNING_LEVEL {
        "warning"
    } else {
        "normal"
    }
}

/// Spawn the simulated rig. Returns a handle that can be aborted on
/// shutdown.
pub fn spawn_rig_simulation(store: MemoryStore, base_path: &str, uid: &str) -> JoinHandle<()> {
    let base = base_path.to_string();
    let uid = uid.to_string();

    tokio::spawn(async move {
        let mut rng = StdRng::from_entropy();

        // Seed the allow-list and both subtrees so the panel has something
        // to subscribe to.
        let mut allow_list = serde_json::Map::new();
        allow_list.insert(uid.clone(), json!(true));
        let seed = [
            (
                format!("{base}/authorized_users"),
                serde_json::Value::Object(allow_list),
            ),
            (
                format!("{base}/controls"),
                ControlTree::default().to_store_value(),
            ),
        ];
        for (path, value) in seed {
            if let Err(e) = store.patch(&path, value).await {
                warn!("[Sim] Failed to seed {}: {}", path, e);
                return;
            }
        }
        info!("[Sim] Rig seeded under {}", base);

        let mut gas: i32 = 120;
        let mut uptime: u64 = 0;
        let mut open_door: Option<&str> = None;
        let mut ticker = interval(TICK);

        loop {
            ticker.tick().await;
            uptime += TICK.as_secs();

            gas = (gas + rng.gen_range(-30..=30)).clamp(0, 1000);
            let voltage = 4.6 + rng.gen_range(0.0..0.4);
            let sensors_path = format!("{base}/sensors");

            let gas_value = gas as u16;
            let payload = json!({
                "gas_smoke": {
                    "gas_value": gas_value,
                    "smoke_detected": gas_value >= GAS_DANGER_LEVEL,
                    "status": gas_status(gas_value),
                },
                "environment": {
                    "light_intensity": rng.gen_range(50.0..900.0),
                    "is_raining": false,
                    "is_dark": rng.gen_bool(0.4),
                },
                "security": { "sensors": door_states(open_door) },
                "system": {
                    "voltage": voltage,
                    "esp32_uptime_sec": uptime,
                    "is_connected": true,
                    "last_update": Utc::now().timestamp_millis(),
                },
            });

            if let Err(e) = store.patch(&sensors_path, payload).await {
                warn!("[Sim] Sensor publish failed: {}", e);
            }

            // Door events last one tick.
            open_door = if open_door.is_some() {
                None
            } else if rng.gen_bool(DOOR_EVENT_CHANCE) {
                let (key, _) = DOORS[rng.gen_range(0..DOORS.len())];
                info!("[Sim] Door event at {}", key);
                Some(key)
            } else {
                None
            };
        }
    })
}

fn door_states(open: Option<&str>) -> serde_json::Value {
    let mut sensors = serde_json::Map::new();
    for (key, label) in DOORS {
        sensors.insert(
            key.to_string(),
            json!({ "detected": open == Some(key), "label": label }),
        );
    }
    serde_json::Value::Object(sensors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_status_thresholds() {
        assert_eq!(gas_status(0), "normal");
        assert_eq!(gas_status(299), "normal");
        assert_eq!(gas_status(300), "warning");
        assert_eq!(gas_status(500), "danger");
        assert_eq!(gas_status(1000), "danger");
    }

    #[tokio::test]
    async fn simulation_seeds_and_publishes() {
        let store = MemoryStore::new();
        let handle = spawn_rig_simulation(store.clone(), "smart_home", "tester");

        let mut feed = store
            .subscribe("smart_home/sensors")
            .await
            .expect("subscribe");
        let snapshot = feed.recv().await.expect("delivery").expect("value");
        assert!(snapshot["system"]["last_update"].as_i64().is_some());

        let authorized = store
            .read_once("smart_home/authorized_users/tester")
            .await
            .expect("read");
        assert_eq!(authorized, Some(serde_json::json!(true)));

        let controls = store
            .read_once("smart_home/controls/lighting/leds/9/label")
            .await
            .expect("read");
        assert_eq!(controls, Some(serde_json::json!("Status 2")));

        handle.abort();
    }
}
