use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            // Remove surrounding quotes if present
            if (value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\''))
            {
                value = &value[1..value.len() - 1];
            }

            // Only set if not already set (env vars take precedence)
            if std::env::var(key).is_err() {
                // SAFETY: We're single-threaded at this point (called before any async runtime)
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub panel: PanelConfig,
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Root of the rig's subtrees in the store (`<base>/controls`,
    /// `<base>/sensors`, `<base>/authorized_users`).
    pub base_path: String,
    /// Session user id checked against the allow-list.
    pub uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// How often the rig heartbeat is checked.
    pub poll_secs: u64,
    /// Silence window after which the rig counts as offline.
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_host: "10.0.0.2".to_string(),
                broker_port: 1883,
                client_id: "smart-home-panel".to_string(),
                username: None,
                password: None,
            },
            panel: PanelConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            base_path: "smart_home".to_string(),
            uid: format!("panel-{}", Uuid::new_v4()),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_secs: 3,
            timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MQTT configuration
        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Ok(port) = std::env::var("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            config.mqtt.broker_port = p;
        }
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }

        // Panel configuration
        if let Ok(base_path) = std::env::var("PANEL_BASE_PATH") {
            config.panel.base_path = base_path;
        }
        if let Ok(uid) = std::env::var("PANEL_UID") {
            config.panel.uid = uid;
        }

        // Watchdog configuration
        if let Ok(poll) = std::env::var("WATCHDOG_POLL_SECS")
            && let Ok(p) = poll.parse()
        {
            config.watchdog.poll_secs = p;
        }
        if let Ok(timeout) = std::env::var("WATCHDOG_TIMEOUT_SECS")
            && let Ok(t) = timeout.parse()
        {
            config.watchdog.timeout_secs = t;
        }

        config
    }
}
