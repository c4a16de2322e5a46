//! Live control reconciliation engine.
//!
//! Owns the editable mirror of the control tree and merges inbound store
//! snapshots with in-flight operator gestures. The rule that makes sliders
//! usable over a chatty backend: while a field is being edited, snapshot
//! values for that field are discarded, so the value under the operator's
//! finger never jumps. Commits write back optimistically and every failure
//! path returns the field to the settled state.

use super::field::{FanAttr, FieldId, LedAttr};
use super::model::{
    ControlSnapshot, ControlTree, DEFAULT_FAN_SPEED, FieldValue, LED_COUNT, normalize_hex,
};
use crate::auth::AccessState;
use crate::error::{PanelError, Result};
use crate::notify::ToastSender;
use crate::store::{RemoteStore, StoreError};
use log::{debug, info, warn};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

const GESTURE_CAPACITY: usize = 64;

const MSG_SAVE_FAILED: &str = "Could not save the change, please try again";
const MSG_ACCESS_DENIED: &str = "You do not have permission to control devices";
const MSG_LOAD_FAILED: &str = "Could not load control data, check the connection";

/// One discrete operator gesture, as emitted by the presentation layer.
#[derive(Debug, Clone)]
pub enum Gesture {
    /// Press/focus on a control; marks the field active.
    Begin(FieldId),
    /// Motion during the gesture; pure local state, zero latency.
    Update(FieldId, FieldValue),
    /// Release/blur/submit with the final value.
    Commit(FieldId, FieldValue),
    /// Instant negation of a boolean field, no pending phase.
    Toggle(FieldId),
}

/// Read-only projection handed to the presentation layer: the committed
/// tree with pending edit values overlaid.
#[derive(Debug, Clone)]
pub struct ControlView {
    pub tree: ControlTree,
    pub access: AccessState,
    pub saving: HashSet<FieldId>,
}

impl ControlView {
    /// Current display value of a field.
    pub fn get(&self, field: FieldId) -> FieldValue {
        self.tree.get(field)
    }

    /// Busy indicator: a commit for this field is in flight.
    pub fn is_saving(&self, field: FieldId) -> bool {
        self.saving.contains(&field)
    }
}

#[derive(Debug, Default)]
struct Edit {
    pending: Option<FieldValue>,
}

/// The reconciliation engine. One instance per session; all operations run
/// on one logical task queue, so no internal locking.
pub struct ControlEngine {
    store: Arc<dyn RemoteStore>,
    controls_path: String,
    tree: ControlTree,
    /// Active edit set: presence of a key means the field is mid-gesture.
    edits: HashMap<FieldId, Edit>,
    saving: HashSet<FieldId>,
    access: AccessState,
    toasts: ToastSender,
    view_tx: watch::Sender<ControlView>,
    gesture_tx: mpsc::Sender<Gesture>,
    gesture_rx: Option<mpsc::Receiver<Gesture>>,
}

impl ControlEngine {
    /// Create an engine rooted at `<base_path>/controls`.
    ///
    /// Returns the engine and a watch handle the presentation layer reads
    /// its view from; the view updates on every visible state change.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        base_path: &str,
        toasts: ToastSender,
    ) -> (Self, watch::Receiver<ControlView>) {
        let tree = ControlTree::default();
        let (view_tx, view_rx) = watch::channel(ControlView {
            tree: tree.clone(),
            access: AccessState::Unknown,
            saving: HashSet::new(),
        });
        let (gesture_tx, gesture_rx) = mpsc::channel(GESTURE_CAPACITY);

        let engine = Self {
            store,
            controls_path: format!("{base_path}/controls"),
            tree,
            edits: HashMap::new(),
            saving: HashSet::new(),
            access: AccessState::Unknown,
            toasts,
            view_tx,
            gesture_tx,
            gesture_rx: Some(gesture_rx),
        };
        (engine, view_rx)
    }

    /// Queue handle for the presentation layer's gesture stream.
    pub fn gestures(&self) -> mpsc::Sender<Gesture> {
        self.gesture_tx.clone()
    }

    /// Current display value: pending edit if one exists, else committed.
    pub fn get_view(&self, field: FieldId) -> FieldValue {
        if let Some(edit) = self.edits.get(&field)
            && let Some(pending) = &edit.pending
        {
            return pending.clone();
        }
        self.tree.get(field)
    }

    pub fn is_active(&self, field: FieldId) -> bool {
        self.edits.contains_key(&field)
    }

    pub fn is_saving(&self, field: FieldId) -> bool {
        self.saving.contains(&field)
    }

    pub fn access(&self) -> AccessState {
        self.access
    }

    /// Merge an inbound snapshot into the mirror.
    ///
    /// Fields in the active edit set are skipped entirely; fields missing
    /// from the snapshot keep their previous values. Each field is judged
    /// on its own, so an active edit on one LED never blocks updates to
    /// its neighbors.
    pub fn on_snapshot(&mut self, snapshot: ControlSnapshot) {
        self.access = AccessState::Granted;

        let edits = &self.edits;
        let active = |field: FieldId| edits.contains_key(&field);
        let tree = &mut self.tree;

        if let Some(leds) = snapshot.lighting.and_then(|l| l.leds) {
            for (index, led) in leds.into_iter().enumerate().take(LED_COUNT) {
                let Some(led) = led else { continue };
                let slot = &mut tree.leds[index];
                if let Some(on) = led.on
                    && !active(FieldId::Led(index, LedAttr::On))
                {
                    slot.on = on;
                }
                if let Some(hex) = led.hex
                    && !active(FieldId::Led(index, LedAttr::Hex))
                {
                    slot.hex = hex;
                }
                if let Some(brightness) = led.brightness
                    && !active(FieldId::Led(index, LedAttr::Brightness))
                {
                    slot.brightness = brightness;
                }
                if let Some(label) = led.label {
                    slot.label = label;
                }
            }
        }

        if let Some(motors) = snapshot.motors {
            if let Some(gate) = motors.stepper_gate
                && let Some(is_open) = gate.is_open
                && !active(FieldId::Gate)
            {
                tree.gate.is_open = is_open;
            }
            if let Some(rack) = motors.servo_rack
                && let Some(is_extended) = rack.is_extended
                && !active(FieldId::Rack)
            {
                tree.rack.is_extended = is_extended;
            }
            if let Some(fan) = motors.fan_l298n {
                if let Some(is_on) = fan.is_on
                    && !active(FieldId::Fan(FanAttr::IsOn))
                {
                    tree.fan.is_on = is_on;
                }
                if let Some(speed) = fan.speed
                    && !active(FieldId::Fan(FanAttr::Speed))
                {
                    tree.fan.speed = speed;
                }
            }
        }

        self.publish_view();
    }

    /// Handle a feed failure. The mirror keeps its last-known values in
    /// every case; there is no reset to defaults.
    pub fn on_snapshot_error(&mut self, err: StoreError) {
        if err.is_permission_denied() {
            warn!("[Engine] Control feed denied: {}", err);
            self.access = AccessState::Denied;
            self.toasts.error(MSG_ACCESS_DENIED);
        } else {
            warn!("[Engine] Control feed error: {}", err);
            self.toasts.error(MSG_LOAD_FAILED);
        }
        self.publish_view();
    }

    /// Gesture start. Idempotent; an existing pending value survives a
    /// repeated begin.
    pub fn begin_edit(&mut self, field: FieldId) {
        self.edits.entry(field).or_default();
        debug!("[Engine] Edit started for {}", field);
    }

    /// Gesture motion. Implicitly begins the edit if needed; local only.
    pub fn update_edit(&mut self, field: FieldId, value: FieldValue) {
        self.edits.entry(field).or_default().pending = Some(value);
        self.publish_view();
    }

    /// Gesture end: validate, write back, settle.
    ///
    /// Invalid values are dropped without a write and without a toast (a
    /// local input problem, not a backend failure). Write failures abandon
    /// the edit and keep the pre-edit committed value. Either way the field
    /// leaves the active set.
    pub async fn commit_edit(&mut self, field: FieldId, value: FieldValue) {
        if self.access == AccessState::Denied {
            debug!("[Engine] Commit for {} dropped, access denied", field);
            self.edits.remove(&field);
            self.publish_view();
            return;
        }

        let Some(value) = validate(field, value) else {
            debug!("[Engine] Rejected invalid value for {}", field);
            self.edits.remove(&field);
            self.publish_view();
            return;
        };

        let (body, applied) = build_patch(field, &value);
        let path = format!("{}/{}", self.controls_path, field.patch_path());

        self.saving.insert(field);
        self.publish_view();

        let result = self.store.patch(&path, body).await;

        self.saving.remove(&field);
        self.edits.remove(&field);

        match result {
            Ok(()) => {
                // Optimistic local update; do not wait for the echo.
                for (applied_field, applied_value) in applied {
                    self.tree.set(applied_field, applied_value);
                }
                info!("[Engine] Saved {}", field);
            }
            Err(e) if e.is_permission_denied() => {
                warn!("[Engine] Write for {} denied: {}", field, e);
                self.access = AccessState::Denied;
                self.toasts.error(MSG_ACCESS_DENIED);
            }
            Err(e) => {
                warn!("[Engine] Write for {} failed: {}", field, e);
                self.toasts.error(MSG_SAVE_FAILED);
            }
        }
        self.publish_view();
    }

    /// Negate a boolean field and commit immediately. There is no
    /// continuous gesture, so no pending phase.
    pub async fn toggle_field(&mut self, field: FieldId) {
        let FieldValue::Bool(current) = self.tree.get(field) else {
            warn!("[Engine] Toggle on non-boolean field {}", field);
            return;
        };
        self.commit_edit(field, FieldValue::Bool(!current)).await;
    }

    /// Dispatch one gesture event.
    pub async fn apply(&mut self, gesture: Gesture) {
        match gesture {
            Gesture::Begin(field) => self.begin_edit(field),
            Gesture::Update(field, value) => self.update_edit(field, value),
            Gesture::Commit(field, value) => self.commit_edit(field, value).await,
            Gesture::Toggle(field) => self.toggle_field(field).await,
        }
    }

    /// Event loop: subscribe to the control subtree and react to snapshots
    /// and gestures until cancelled. The feed is released on every exit
    /// path when the subscription handle drops.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut gestures = self
            .gesture_rx
            .take()
            .ok_or(PanelError::GestureQueueTaken)?;
        let mut feed = self.store.subscribe(&self.controls_path).await?;
        info!("[Engine] Watching {}", self.controls_path);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                gesture = gestures.recv() => {
                    let Some(gesture) = gesture else { break };
                    self.apply(gesture).await;
                }
                delivery = feed.recv() => match delivery {
                    Some(Ok(value)) => match serde_json::from_value::<ControlSnapshot>(value) {
                        Ok(snapshot) => self.on_snapshot(snapshot),
                        Err(e) => warn!("[Engine] Malformed control snapshot: {}", e),
                    },
                    Some(Err(e)) => self.on_snapshot_error(e),
                    None => return Err(PanelError::FeedClosed(self.controls_path.clone())),
                },
            }
        }

        info!("[Engine] Stopped watching {}", self.controls_path);
        Ok(())
    }

    fn publish_view(&self) {
        let mut tree = self.tree.clone();
        for (field, edit) in &self.edits {
            if let Some(pending) = &edit.pending {
                tree.set(*field, pending.clone());
            }
        }
        self.view_tx.send_replace(ControlView {
            tree,
            access: self.access,
            saving: self.saving.clone(),
        });
    }
}

/// Check a commit value against its field's kind. Color entries must match
/// `#RRGGBB` and are normalized to uppercase; anything else of the right
/// kind passes through.
fn validate(field: FieldId, value: FieldValue) -> Option<FieldValue> {
    match (field, value) {
        (FieldId::Led(index, _), _) if index >= LED_COUNT => None,
        (FieldId::Led(_, LedAttr::Hex), FieldValue::Color(text)) => {
            normalize_hex(&text).map(FieldValue::Color)
        }
        (
            FieldId::Led(_, LedAttr::On) | FieldId::Gate | FieldId::Rack | FieldId::Fan(FanAttr::IsOn),
            FieldValue::Bool(b),
        ) => Some(FieldValue::Bool(b)),
        (
            FieldId::Led(_, LedAttr::Brightness) | FieldId::Fan(FanAttr::Speed),
            FieldValue::Level(level),
        ) => Some(FieldValue::Level(level)),
        _ => None,
    }
}

/// Build the patch body for a commit, plus the field values to apply
/// locally once the write succeeds.
///
/// Fan speed and power are coupled: a speed of zero implies off, any
/// positive speed implies on, and toggling power picks a sane speed. Both
/// keys always travel in one patch so the store never observes a torn
/// `speed`/`is_on` pair.
fn build_patch(field: FieldId, value: &FieldValue) -> (Value, Vec<(FieldId, FieldValue)>) {
    match (field, value) {
        (FieldId::Fan(FanAttr::Speed), FieldValue::Level(speed)) => {
            let is_on = *speed > 0;
            (
                json!({ "speed": speed, "is_on": is_on }),
                vec![
                    (FieldId::Fan(FanAttr::Speed), FieldValue::Level(*speed)),
                    (FieldId::Fan(FanAttr::IsOn), FieldValue::Bool(is_on)),
                ],
            )
        }
        (FieldId::Fan(FanAttr::IsOn), FieldValue::Bool(is_on)) => {
            let speed = if *is_on { DEFAULT_FAN_SPEED } else { 0 };
            (
                json!({ "is_on": is_on, "speed": speed }),
                vec![
                    (FieldId::Fan(FanAttr::IsOn), FieldValue::Bool(*is_on)),
                    (FieldId::Fan(FanAttr::Speed), FieldValue::Level(speed)),
                ],
            )
        }
        _ => {
            let mut body = Map::new();
            body.insert(field.attr_key().to_string(), field_value_json(value));
            (Value::Object(body), vec![(field, value.clone())])
        }
    }
}

fn field_value_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Bool(b) => json!(b),
        FieldValue::Level(level) => json!(level),
        FieldValue::Color(hex) => json!(hex),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Toast, ToastKind};
    use crate::store::{MemoryStore, Subscription};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc::Receiver;

    /// Store that acknowledges every patch and records it, without echoing
    /// anything back. Lets tests assert exact patch bodies and verify that
    /// optimistic updates do not depend on a snapshot echo.
    #[derive(Default)]
    struct RecordingStore {
        patches: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingStore {
        fn patches(&self) -> Vec<(String, Value)> {
            self.patches.lock().clone()
        }
    }

    #[async_trait]
    impl RemoteStore for RecordingStore {
        async fn read_once(
            &self,
            _path: &str,
        ) -> std::result::Result<Option<Value>, StoreError> {
            Ok(None)
        }

        async fn subscribe(&self, _path: &str) -> std::result::Result<Subscription, StoreError> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(Subscription::new(rx))
        }

        async fn patch(&self, path: &str, partial: Value) -> std::result::Result<(), StoreError> {
            self.patches.lock().push((path.to_string(), partial));
            Ok(())
        }
    }

    /// Store that rejects every patch.
    struct RejectingStore {
        error: StoreError,
    }

    #[async_trait]
    impl RemoteStore for RejectingStore {
        async fn read_once(
            &self,
            _path: &str,
        ) -> std::result::Result<Option<Value>, StoreError> {
            Ok(None)
        }

        async fn subscribe(&self, _path: &str) -> std::result::Result<Subscription, StoreError> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(Subscription::new(rx))
        }

        async fn patch(&self, _path: &str, _partial: Value) -> std::result::Result<(), StoreError> {
            Err(self.error.clone())
        }
    }

    fn engine_with(store: Arc<dyn RemoteStore>) -> (ControlEngine, Receiver<Toast>) {
        let (toasts, toast_rx) = ToastSender::channel(8);
        let (engine, _view_rx) = ControlEngine::new(store, "smart_home", toasts);
        (engine, toast_rx)
    }

    fn led0_snapshot(on: bool, brightness: u8) -> ControlSnapshot {
        serde_json::from_value(json!({
            "lighting": { "leds": [ { "on": on, "brightness": brightness } ] }
        }))
        .expect("snapshot")
    }

    const LED0_BRIGHTNESS: FieldId = FieldId::Led(0, LedAttr::Brightness);
    const LED0_HEX: FieldId = FieldId::Led(0, LedAttr::Hex);

    #[tokio::test]
    async fn snapshot_never_overwrites_active_edit() {
        let (mut engine, _toasts) = engine_with(Arc::new(MemoryStore::new()));
        engine.on_snapshot(led0_snapshot(true, 200));
        assert_eq!(engine.get_view(LED0_BRIGHTNESS), FieldValue::Level(200));

        engine.begin_edit(LED0_BRIGHTNESS);
        engine.update_edit(LED0_BRIGHTNESS, FieldValue::Level(50));
        assert_eq!(engine.get_view(LED0_BRIGHTNESS), FieldValue::Level(50));

        // Server echo of the stale value arrives mid-drag.
        engine.on_snapshot(led0_snapshot(true, 200));
        assert_eq!(engine.get_view(LED0_BRIGHTNESS), FieldValue::Level(50));

        engine.commit_edit(LED0_BRIGHTNESS, FieldValue::Level(80)).await;
        assert_eq!(engine.get_view(LED0_BRIGHTNESS), FieldValue::Level(80));
        assert!(!engine.is_active(LED0_BRIGHTNESS));
        assert!(!engine.is_saving(LED0_BRIGHTNESS));
    }

    #[tokio::test]
    async fn active_edit_isolates_only_its_field() {
        let (mut engine, _toasts) = engine_with(Arc::new(MemoryStore::new()));
        engine.begin_edit(LED0_BRIGHTNESS);

        let snapshot = serde_json::from_value(json!({
            "lighting": { "leds": [ { "on": true, "brightness": 10, "hex": "#112233" } ] },
            "motors": { "fan_l298n": { "is_on": true, "speed": 42 } }
        }))
        .expect("snapshot");
        engine.on_snapshot(snapshot);

        // The edited field kept its default; everything else merged.
        assert_eq!(engine.get_view(LED0_BRIGHTNESS), FieldValue::Level(255));
        assert_eq!(engine.get_view(FieldId::Led(0, LedAttr::On)), FieldValue::Bool(true));
        assert_eq!(
            engine.get_view(LED0_HEX),
            FieldValue::Color("#112233".to_string())
        );
        assert_eq!(
            engine.get_view(FieldId::Fan(FanAttr::Speed)),
            FieldValue::Level(42)
        );
    }

    #[tokio::test]
    async fn missing_snapshot_fields_keep_previous_values() {
        let (mut engine, _toasts) = engine_with(Arc::new(MemoryStore::new()));
        engine.on_snapshot(led0_snapshot(true, 120));

        let partial = serde_json::from_value(json!({
            "motors": { "stepper_gate": { "is_open": true } }
        }))
        .expect("snapshot");
        engine.on_snapshot(partial);

        assert_eq!(engine.get_view(LED0_BRIGHTNESS), FieldValue::Level(120));
        assert_eq!(engine.get_view(FieldId::Gate), FieldValue::Bool(true));
    }

    #[tokio::test]
    async fn commit_settles_with_committed_value() {
        let store = Arc::new(RecordingStore::default());
        let (mut engine, _toasts) = engine_with(store.clone());

        engine.begin_edit(LED0_BRIGHTNESS);
        engine.update_edit(LED0_BRIGHTNESS, FieldValue::Level(33));
        engine.commit_edit(LED0_BRIGHTNESS, FieldValue::Level(33)).await;

        // No echo from RecordingStore: the view update is purely optimistic.
        assert_eq!(engine.get_view(LED0_BRIGHTNESS), FieldValue::Level(33));
        assert!(!engine.is_active(LED0_BRIGHTNESS));
        assert_eq!(
            store.patches(),
            vec![(
                "smart_home/controls/lighting/leds/0".to_string(),
                json!({ "brightness": 33 })
            )]
        );
    }

    #[tokio::test]
    async fn invalid_hex_is_rejected_without_a_write() {
        let store = Arc::new(RecordingStore::default());
        let (mut engine, mut toast_rx) = engine_with(store.clone());

        engine.begin_edit(LED0_HEX);
        engine.update_edit(LED0_HEX, FieldValue::Color("red".to_string()));
        engine
            .commit_edit(LED0_HEX, FieldValue::Color("red".to_string()))
            .await;

        assert!(store.patches().is_empty());
        assert!(!engine.is_active(LED0_HEX));
        assert_eq!(
            engine.get_view(LED0_HEX),
            FieldValue::Color("#FFFFFF".to_string())
        );
        // Local input problem: no toast.
        assert!(toast_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn valid_hex_is_normalized_to_uppercase() {
        let store = Arc::new(RecordingStore::default());
        let (mut engine, _toasts) = engine_with(store.clone());

        engine
            .commit_edit(LED0_HEX, FieldValue::Color("#a1b2c3".to_string()))
            .await;

        assert_eq!(
            store.patches(),
            vec![(
                "smart_home/controls/lighting/leds/0".to_string(),
                json!({ "hex": "#A1B2C3" })
            )]
        );
        assert_eq!(
            engine.get_view(LED0_HEX),
            FieldValue::Color("#A1B2C3".to_string())
        );
    }

    #[tokio::test]
    async fn fan_speed_commit_couples_power_in_one_patch() {
        let store = Arc::new(RecordingStore::default());
        let (mut engine, _toasts) = engine_with(store.clone());

        engine
            .commit_edit(FieldId::Fan(FanAttr::Speed), FieldValue::Level(200))
            .await;
        engine
            .commit_edit(FieldId::Fan(FanAttr::Speed), FieldValue::Level(0))
            .await;

        let patches = store.patches();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].0, "smart_home/controls/motors/fan_l298n");
        assert_eq!(patches[0].1, json!({ "speed": 200, "is_on": true }));
        assert_eq!(patches[1].1, json!({ "speed": 0, "is_on": false }));

        assert_eq!(engine.get_view(FieldId::Fan(FanAttr::IsOn)), FieldValue::Bool(false));
        assert_eq!(engine.get_view(FieldId::Fan(FanAttr::Speed)), FieldValue::Level(0));
    }

    #[tokio::test]
    async fn fan_power_toggle_picks_coupled_speed() {
        let store = Arc::new(RecordingStore::default());
        let (mut engine, _toasts) = engine_with(store.clone());

        engine.toggle_field(FieldId::Fan(FanAttr::IsOn)).await;
        assert_eq!(
            store.patches()[0].1,
            json!({ "is_on": true, "speed": DEFAULT_FAN_SPEED })
        );
        assert_eq!(
            engine.get_view(FieldId::Fan(FanAttr::Speed)),
            FieldValue::Level(DEFAULT_FAN_SPEED)
        );

        engine.toggle_field(FieldId::Fan(FanAttr::IsOn)).await;
        assert_eq!(store.patches()[1].1, json!({ "is_on": false, "speed": 0 }));
    }

    #[tokio::test]
    async fn out_of_range_field_never_panics_or_writes() {
        let store = Arc::new(RecordingStore::default());
        let (mut engine, _toasts) = engine_with(store.clone());
        let beyond = FieldId::Led(LED_COUNT, LedAttr::Brightness);

        // A malformed field id from the presentation layer must not take
        // down the engine.
        engine.begin_edit(beyond);
        engine.update_edit(beyond, FieldValue::Level(1));
        engine.commit_edit(beyond, FieldValue::Level(1)).await;

        assert!(store.patches().is_empty());
        assert!(!engine.is_active(beyond));
        assert_eq!(engine.get_view(beyond), FieldValue::Level(0));
    }

    #[tokio::test]
    async fn begin_edit_is_idempotent() {
        let (mut engine, _toasts) = engine_with(Arc::new(MemoryStore::new()));
        engine.on_snapshot(led0_snapshot(true, 100));

        engine.begin_edit(LED0_BRIGHTNESS);
        let after_one = engine.get_view(LED0_BRIGHTNESS);
        engine.begin_edit(LED0_BRIGHTNESS);

        assert!(engine.is_active(LED0_BRIGHTNESS));
        assert_eq!(engine.get_view(LED0_BRIGHTNESS), after_one);

        // A repeated begin also keeps an existing pending value.
        engine.update_edit(LED0_BRIGHTNESS, FieldValue::Level(7));
        engine.begin_edit(LED0_BRIGHTNESS);
        assert_eq!(engine.get_view(LED0_BRIGHTNESS), FieldValue::Level(7));
    }

    #[tokio::test]
    async fn update_edit_implicitly_begins() {
        let (mut engine, _toasts) = engine_with(Arc::new(MemoryStore::new()));

        engine.update_edit(LED0_BRIGHTNESS, FieldValue::Level(12));
        assert!(engine.is_active(LED0_BRIGHTNESS));
        assert_eq!(engine.get_view(LED0_BRIGHTNESS), FieldValue::Level(12));
    }

    #[tokio::test]
    async fn write_failure_abandons_edit_and_raises_toast() {
        let store = Arc::new(RejectingStore {
            error: StoreError::Unavailable("broker gone".to_string()),
        });
        let (mut engine, mut toast_rx) = engine_with(store);
        engine.on_snapshot(
            serde_json::from_value(json!({
                "motors": { "stepper_gate": { "is_open": false } }
            }))
            .expect("snapshot"),
        );

        engine.begin_edit(FieldId::Gate);
        engine.commit_edit(FieldId::Gate, FieldValue::Bool(true)).await;

        // Pre-edit committed value is back on display, edit fully settled.
        assert_eq!(engine.get_view(FieldId::Gate), FieldValue::Bool(false));
        assert!(!engine.is_active(FieldId::Gate));
        assert!(!engine.is_saving(FieldId::Gate));

        let toast = toast_rx.try_recv().expect("failure toast");
        assert_eq!(toast.kind, ToastKind::Error);
    }

    #[tokio::test]
    async fn permission_denied_write_blocks_access() {
        let store = Arc::new(RejectingStore {
            error: StoreError::PermissionDenied {
                path: "smart_home/controls".to_string(),
            },
        });
        let (mut engine, mut toast_rx) = engine_with(store);

        engine.commit_edit(FieldId::Rack, FieldValue::Bool(true)).await;
        assert_eq!(engine.access(), AccessState::Denied);
        assert!(toast_rx.try_recv().is_ok());

        // Further commits are dropped locally while denied.
        engine.begin_edit(LED0_BRIGHTNESS);
        engine.commit_edit(LED0_BRIGHTNESS, FieldValue::Level(1)).await;
        assert!(!engine.is_active(LED0_BRIGHTNESS));
        assert_eq!(engine.get_view(LED0_BRIGHTNESS), FieldValue::Level(255));
    }

    #[tokio::test]
    async fn feed_errors_keep_the_mirror() {
        let (mut engine, mut toast_rx) = engine_with(Arc::new(MemoryStore::new()));
        engine.on_snapshot(led0_snapshot(true, 64));

        engine.on_snapshot_error(StoreError::Unavailable("socket reset".to_string()));
        assert_eq!(engine.get_view(LED0_BRIGHTNESS), FieldValue::Level(64));
        assert_eq!(engine.access(), AccessState::Granted);
        assert!(toast_rx.try_recv().is_ok());

        engine.on_snapshot_error(StoreError::PermissionDenied {
            path: "smart_home/controls".to_string(),
        });
        assert_eq!(engine.access(), AccessState::Denied);
        assert_eq!(engine.get_view(LED0_BRIGHTNESS), FieldValue::Level(64));
    }

    #[tokio::test]
    async fn view_watch_tracks_pending_and_saving() {
        let (toasts, _toast_rx) = ToastSender::channel(8);
        let (mut engine, view_rx) =
            ControlEngine::new(Arc::new(MemoryStore::new()), "smart_home", toasts);

        engine.update_edit(LED0_BRIGHTNESS, FieldValue::Level(5));
        {
            let view = view_rx.borrow();
            assert_eq!(view.get(LED0_BRIGHTNESS), FieldValue::Level(5));
            assert!(!view.is_saving(LED0_BRIGHTNESS));
        }

        engine.commit_edit(LED0_BRIGHTNESS, FieldValue::Level(5)).await;
        let view = view_rx.borrow();
        assert_eq!(view.get(LED0_BRIGHTNESS), FieldValue::Level(5));
        assert!(!view.is_saving(LED0_BRIGHTNESS));
        assert_eq!(view.access, AccessState::Unknown);
    }

    #[tokio::test]
    async fn run_loop_end_to_end_over_memory_store() {
        let memory = MemoryStore::new();
        let store: Arc<dyn RemoteStore> = Arc::new(memory.clone());
        let (toasts, _toast_rx) = ToastSender::channel(8);
        let (engine, mut view_rx) = ControlEngine::new(store, "smart_home", toasts);
        let gestures = engine.gestures();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(engine.run(cancel.clone()));

        // Rig publishes its state.
        memory
            .patch(
                "smart_home/controls",
                ControlTree::default().to_store_value(),
            )
            .await
            .expect("seed");
        memory
            .patch(
                "smart_home/controls/lighting/leds/0",
                json!({ "on": true, "brightness": 200 }),
            )
            .await
            .expect("patch");

        view_rx
            .wait_for(|view| view.get(LED0_BRIGHTNESS) == FieldValue::Level(200))
            .await
            .expect("merged view");

        // Operator commits a new brightness through the gesture queue.
        gestures.send(Gesture::Begin(LED0_BRIGHTNESS)).await.expect("send");
        gestures
            .send(Gesture::Update(LED0_BRIGHTNESS, FieldValue::Level(80)))
            .await
            .expect("send");
        gestures
            .send(Gesture::Commit(LED0_BRIGHTNESS, FieldValue::Level(80)))
            .await
            .expect("send");

        view_rx
            .wait_for(|view| {
                view.get(LED0_BRIGHTNESS) == FieldValue::Level(80) && view.saving.is_empty()
            })
            .await
            .expect("committed view");

        let written = memory
            .read_once("smart_home/controls/lighting/leds/0/brightness")
            .await
            .expect("read");
        assert_eq!(written, Some(json!(80)));

        cancel.cancel();
        task.await.expect("join").expect("engine run");
        // Engine teardown released the feed.
        memory
            .patch("smart_home/controls", json!({ "x": 1 }))
            .await
            .expect("patch");
        assert_eq!(memory.subscriber_count(), 0);
    }
}
