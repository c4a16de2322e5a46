//! Broker-backed store implementation.
//!
//! The rig firmware publishes each subtree as a retained JSON payload on a
//! topic named after its store path, and applies partial writes that the
//! panel publishes back on the same topic. From the panel's point of view
//! this gives the usual contract: last-known value on subscribe, full
//! subtree on every change, patch scoped to one subtree.

use super::{RemoteStore, SnapshotResult, StoreError, Subscription};
use crate::config::MqttConfig;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const FEED_CAPACITY: usize = 16;
const READ_ONCE_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

struct Subscriber {
    id: u64,
    path: String,
    tx: mpsc::Sender<SnapshotResult>,
}

struct Inner {
    /// Last retained payload seen per topic.
    retained: RwLock<HashMap<String, Value>>,
    subscribers: RwLock<Vec<Subscriber>>,
    /// One-shot waiters parked by `read_once` until the first delivery.
    waiters: Mutex<Vec<(String, oneshot::Sender<Value>)>>,
    next_id: AtomicU64,
}

/// MQTT-backed [`RemoteStore`]. Create together with its [`MqttFeed`], which
/// must be running for subscriptions and point reads to make progress.
#[derive(Clone)]
pub struct MqttStore {
    client: AsyncClient,
    inner: Arc<Inner>,
}

/// Event-loop half of the broker connection.
pub struct MqttFeed {
    event_loop: EventLoop,
    inner: Arc<Inner>,
}

impl MqttStore {
    /// Build a store and its feed from broker configuration.
    pub fn new(config: &MqttConfig) -> (Self, MqttFeed) {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 100);
        let inner = Arc::new(Inner {
            retained: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            waiters: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        });

        (
            Self {
                client,
                inner: inner.clone(),
            },
            MqttFeed { event_loop, inner },
        )
    }

    async fn ensure_topic(&self, path: &str) -> Result<(), StoreError> {
        self.client
            .subscribe(path, QoS::AtLeastOnce)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for MqttStore {
    async fn read_once(&self, path: &str) -> Result<Option<Value>, StoreError> {
        if let Some(value) = self.inner.retained.read().get(path) {
            return Ok(Some(value.clone()));
        }

        // Not cached yet: subscribe and wait for the retained delivery.
        self.ensure_topic(path).await?;
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().push((path.to_string(), tx));

        match tokio::time::timeout(READ_ONCE_TIMEOUT, rx).await {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(_)) => Err(StoreError::Unavailable("broker feed stopped".into())),
            Err(_) => Ok(None),
        }
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        self.ensure_topic(path).await?;
        info!("[MqttStore] Feed opened for {}", path);

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        if let Some(value) = self.inner.retained.read().get(path) {
            // Known capacity, cannot fail on a fresh channel.
            let _ = tx.try_send(Ok(value.clone()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().push(Subscriber {
            id,
            path: path.to_string(),
            tx,
        });

        Ok(Subscription::new(rx))
    }

    async fn patch(&self, path: &str, partial: Value) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&partial).map_err(|e| StoreError::Malformed {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        debug!("[MqttStore] Patch {}: {}", path, payload);
        self.client
            .publish(path, QoS::AtLeastOnce, false, payload.into_bytes())
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl MqttFeed {
    /// Drive the broker connection until cancelled.
    ///
    /// Incoming publishes refresh the retained cache and fan out to live
    /// feeds; connection errors are reported on every feed and retried
    /// after a delay.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("[MqttStore] Starting broker event loop");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[MqttStore] Broker event loop stopped");
                    return;
                }
                event = self.event_loop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = publish.topic.clone();
                    let value = match serde_json::from_slice::<Value>(&publish.payload) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("[MqttStore] Non-JSON payload on {}: {}", topic, e);
                            continue;
                        }
                    };
                    self.inner.deliver(&topic, value).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[MqttStore] Broker connection error: {:?}", e);
                    self.inner
                        .broadcast_error(StoreError::Unavailable(e.to_string()))
                        .await;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

impl Inner {
    async fn deliver(&self, topic: &str, value: Value) {
        debug!("[MqttStore] Snapshot on {}", topic);
        self.retained.write().insert(topic.to_string(), value.clone());

        // Wake any parked point reads for this topic. Waiters whose caller
        // timed out and dropped the receiver are discarded as we go.
        {
            let mut waiters = self.waiters.lock();
            let mut remaining = Vec::with_capacity(waiters.len());
            for (path, tx) in waiters.drain(..) {
                if path == topic {
                    let _ = tx.send(value.clone());
                } else if !tx.is_closed() {
                    remaining.push((path, tx));
                }
            }
            *waiters = remaining;
        }

        self.fan_out(Some(topic), Ok(value)).await;
    }

    async fn broadcast_error(&self, err: StoreError) {
        self.fan_out(None, Err(err)).await;
    }

    /// Deliver `result` to every feed on `topic`, or to every feed at all
    /// when `topic` is `None`.
    async fn fan_out(&self, topic: Option<&str>, result: SnapshotResult) {
        let deliveries: Vec<(u64, mpsc::Sender<SnapshotResult>)> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| topic.is_none_or(|t| s.path == t))
            .map(|s| (s.id, s.tx.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, tx) in deliveries {
            if tx.send(result.clone()).await.is_err() {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            self.subscribers.write().retain(|s| !dead.contains(&s.id));
            debug!("[MqttStore] Pruned {} closed feed(s)", dead.len());
        }
    }
}
