//! In-process store implementation.
//!
//! Holds the whole tree as one JSON value and fans writes out to live
//! subscribers. Backs unit tests and `--simulate` mode; behaves like the
//! real store from the panel's point of view, minus the network.

use super::{RemoteStore, SnapshotResult, StoreError, Subscription, paths_overlap, segments};
use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

const FEED_CAPACITY: usize = 16;

struct Subscriber {
    id: u64,
    path: String,
    tx: mpsc::Sender<SnapshotResult>,
}

struct Inner {
    tree: RwLock<Value>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// In-memory [`RemoteStore`].
///
/// Cheap to clone; all clones share one tree.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tree: RwLock::new(Value::Object(Map::new())),
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Current number of live feeds, for teardown assertions in tests.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    async fn fan_out(&self, write_path: &str) {
        // Snapshot the deliveries under the lock, send outside of it.
        let deliveries: Vec<(u64, mpsc::Sender<SnapshotResult>, Value)> = {
            let tree = self.inner.tree.read();
            let subscribers = self.inner.subscribers.read();
            subscribers
                .iter()
                .filter(|s| paths_overlap(&s.path, write_path))
                .map(|s| {
                    let value = node_at(&tree, &s.path).cloned().unwrap_or(Value::Null);
                    (s.id, s.tx.clone(), value)
                })
                .collect()
        };

        let mut dead = Vec::new();
        for (id, tx, value) in deliveries {
            if tx.send(Ok(value)).await.is_err() {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            self.inner
                .subscribers
                .write()
                .retain(|s| !dead.contains(&s.id));
            debug!("[MemStore] Pruned {} closed feed(s)", dead.len());
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn read_once(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let tree = self.inner.tree.read();
        Ok(node_at(&tree, path).cloned())
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);

        // Initial read and registration happen under one lock pair, so a
        // concurrent patch lands either in the initial value or in a
        // fan-out delivery, never in between.
        let id = {
            let tree = self.inner.tree.read();
            let mut subscribers = self.inner.subscribers.write();
            if let Some(value) = node_at(&tree, path).cloned() {
                // Fresh channel with known capacity, cannot be full.
                let _ = tx.try_send(Ok(value));
            }
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            subscribers.push(Subscriber {
                id,
                path: path.to_string(),
                tx,
            });
            id
        };
        debug!("[MemStore] Feed {} opened for {}", id, path);

        Ok(Subscription::new(rx))
    }

    async fn patch(&self, path: &str, partial: Value) -> Result<(), StoreError> {
        {
            let mut tree = self.inner.tree.write();
            merge_at(&mut tree, path, partial);
        }
        self.fan_out(path).await;
        Ok(())
    }
}

/// Walk `path` through `root`, or `None` if any segment is missing.
fn node_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in segments(path) {
        cur = match (cur, seg.parse::<usize>()) {
            (Value::Array(items), Ok(index)) => items.get(index)?,
            (Value::Object(map), _) => map.get(seg)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Walk `path` through `root`, materializing containers as needed, and
/// return the addressed node. A numeric segment materializes a null-padded
/// array unless an object already carries that key.
fn node_at_mut<'a>(root: &'a mut Value, path: &str) -> &'a mut Value {
    let mut cur = root;
    for seg in segments(path) {
        let index = seg.parse::<usize>().ok();
        let object_keyed =
            matches!(&cur, Value::Object(map) if index.is_none() || map.contains_key(seg));
        cur = if object_keyed {
            let Value::Object(map) = cur else {
                unreachable!()
            };
            map.entry(seg.to_string()).or_insert(Value::Null)
        } else {
            match (cur, index) {
                (Value::Array(items), Some(i)) => {
                    if items.len() <= i {
                        items.resize(i + 1, Value::Null);
                    }
                    &mut items[i]
                }
                (node, Some(i)) => {
                    *node = Value::Array(vec![Value::Null; i + 1]);
                    let Value::Array(items) = node else {
                        unreachable!()
                    };
                    &mut items[i]
                }
                (node, None) => {
                    *node = Value::Object(Map::new());
                    let Value::Object(map) = node else {
                        unreachable!()
                    };
                    map.entry(seg.to_string()).or_insert(Value::Null)
                }
            }
        };
    }
    cur
}

/// Shallow-merge the keys of an object `partial` into the node at `path`.
/// A non-object partial replaces the node, matching the contract that a
/// patch is scoped to exactly one subtree.
fn merge_at(root: &mut Value, path: &str, partial: Value) {
    let node = node_at_mut(root, path);
    match (node, partial) {
        (Value::Object(existing), Value::Object(updates)) => {
            for (key, value) in updates {
                existing.insert(key, value);
            }
        }
        (node, partial) => *node = partial,
    }
}
