use clap::Parser;
use log::{debug, error, info};
use smart_home_panel::auth::{AccessState, AuthSession};
use smart_home_panel::config::{Config, load_dotenv};
use smart_home_panel::controls::{ControlEngine, FieldId, FieldValue, Gesture, LedAttr};
use smart_home_panel::notify::ToastSender;
use smart_home_panel::sensors::SensorMirror;
use smart_home_panel::sim::spawn_rig_simulation;
use smart_home_panel::store::{MemoryStore, MqttStore, RemoteStore};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "smart-home-panel")]
#[command(about = "Control panel core for a smart home rig backed by a realtime store")]
struct Args {
    /// Run against a simulated in-memory rig instead of the MQTT broker
    #[arg(long, env = "PANEL_SIMULATE")]
    simulate: bool,

    /// Session user id checked against the allow-list
    #[arg(long, env = "PANEL_UID")]
    uid: Option<String>,

    /// Store path the rig's subtrees live under
    #[arg(long, env = "PANEL_BASE_PATH")]
    base_path: Option<String>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    load_dotenv();
    init_logger();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(uid) = args.uid {
        config.panel.uid = uid;
    }
    if let Some(base_path) = args.base_path {
        config.panel.base_path = base_path;
    }

    info!("Starting Smart Home Panel");
    info!("  Base path: {}", config.panel.base_path);
    info!("  Session uid: {}", config.panel.uid);

    let cancel = CancellationToken::new();

    let mut sim_handle = None;
    let mut feed_handle = None;
    let store: Arc<dyn RemoteStore> = if args.simulate {
        info!("  Mode: simulated rig");
        let memory = MemoryStore::new();
        sim_handle = Some(spawn_rig_simulation(
            memory.clone(),
            &config.panel.base_path,
            &config.panel.uid,
        ));
        Arc::new(memory)
    } else {
        info!(
            "  Mode: broker at {}:{}",
            config.mqtt.broker_host, config.mqtt.broker_port
        );
        let (store, feed) = MqttStore::new(&config.mqtt);
        feed_handle = Some(tokio::spawn(feed.run(cancel.child_token())));
        Arc::new(store)
    };

    let (toasts, mut toast_rx) = ToastSender::channel(32);

    // Authorization session follows allow-list changes for the whole run.
    let (session, mut access_rx) = AuthSession::new(
        store.clone(),
        &config.panel.base_path,
        &config.panel.uid,
    );
    let auth_handle = tokio::spawn(session.run(cancel.child_token()));

    // The sensor dashboard is readable without authorization.
    let (mirror, mut sensor_view_rx) = SensorMirror::new(
        store.clone(),
        &config.panel.base_path,
        &config.watchdog,
        toasts.clone(),
    );
    let sensor_handle = tokio::spawn(mirror.run(cancel.child_token()));

    // Device control needs an allow-list answer first.
    let access = match access_rx.wait_for(|s| *s != AccessState::Unknown).await {
        Ok(state) => *state,
        Err(_) => AccessState::Denied,
    };

    let mut engine_handle: Option<JoinHandle<_>> = None;
    let mut operator_handle = None;
    if access == AccessState::Granted {
        let (engine, mut control_view_rx) = ControlEngine::new(
            store.clone(),
            &config.panel.base_path,
            toasts.clone(),
        );
        let gestures = engine.gestures();
        engine_handle = Some(tokio::spawn(engine.run(cancel.child_token())));

        tokio::spawn(async move {
            while control_view_rx.changed().await.is_ok() {
                let view = control_view_rx.borrow_and_update().clone();
                debug!(
                    "[View] led0 on={} brightness={} fan speed={} saving={}",
                    view.tree.leds[0].on,
                    view.tree.leds[0].brightness,
                    view.tree.fan.speed,
                    view.saving.len()
                );
            }
        });

        if args.simulate {
            // Periodically walk through a full slider gesture so the panel
            // has something to reconcile against the simulated rig.
            operator_handle = Some(tokio::spawn(run_operator_demo(gestures)));
        }
    } else {
        error!(
            "Access denied for {}; device control stays locked",
            config.panel.uid
        );
    }

    // Presentation stand-in: surface toasts and sensor headlines as logs.
    let presentation = tokio::spawn(async move {
        loop {
            tokio::select! {
                toast = toast_rx.recv() => match toast {
                    Some(toast) => info!("[Toast] {}: {}", toast.kind, toast.message),
                    None => break,
                },
                changed = sensor_view_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = sensor_view_rx.borrow_and_update().clone();
                    debug!(
                        "[View] gas={:?} voltage={:?} connected={}",
                        view.tree.gas_smoke.gas_value,
                        view.tree.system.voltage,
                        view.rig_connected
                    );
                }
            }
        }
    });

    info!("Smart Home Panel is running");
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    cancel.cancel();
    if let Some(handle) = sim_handle {
        handle.abort();
    }
    if let Some(handle) = operator_handle {
        handle.abort();
    }
    presentation.abort();

    if let Err(e) = auth_handle.await.unwrap_or(Ok(())) {
        error!("Auth session ended with error: {}", e);
    }
    if let Err(e) = sensor_handle.await.unwrap_or(Ok(())) {
        error!("Sensor mirror ended with error: {}", e);
    }
    if let Some(handle) = engine_handle
        && let Err(e) = handle.await.unwrap_or(Ok(()))
    {
        error!("Control engine ended with error: {}", e);
    }
    if let Some(handle) = feed_handle {
        let _ = handle.await;
    }

    info!("Smart Home Panel stopped");
}

/// Drive a repeating demo gesture: toggle LED 0, drag its brightness
/// slider and commit the final value.
async fn run_operator_demo(gestures: mpsc::Sender<Gesture>) {
    let power = FieldId::Led(0, LedAttr::On);
    let brightness = FieldId::Led(0, LedAttr::Brightness);
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(30));

    loop {
        ticker.tick().await;
        info!("[Demo] Running a slider gesture on {}", brightness);

        if gestures.send(Gesture::Toggle(power)).await.is_err() {
            break;
        }
        if gestures.send(Gesture::Begin(brightness)).await.is_err() {
            break;
        }
        for level in [40u8, 80, 120, 160, 200] {
            if gestures
                .send(Gesture::Update(brightness, FieldValue::Level(level)))
                .await
                .is_err()
            {
                return;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
        if gestures
            .send(Gesture::Commit(brightness, FieldValue::Level(200)))
            .await
            .is_err()
        {
            break;
        }
    }
}
