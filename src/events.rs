//
// events.rs
// Dicom-Hanging-rs
//
// Lifecycle events broadcast to the renderer and the synchronous publish/subscribe bus that carries them.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::models::ViewportMatch;

pub const NEW_LAYOUT: &str = "event::hanging_protocol_new_layout";
pub const STAGE_CHANGE: &str = "event::hanging_protocol_stage_change";
pub const CUSTOM_IMAGE_LOAD_PERFORMED: &str =
    "event::hanging_protocol_custom_image_load_performed";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewLayout,
    StageChange,
    CustomImageLoadPerformed,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::NewLayout => NEW_LAYOUT,
            EventKind::StageChange => STAGE_CHANGE,
            EventKind::CustomImageLoadPerformed => CUSTOM_IMAGE_LOAD_PERFORMED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLayout {
    pub layout_type: String,
    pub num_rows: u32,
    pub num_cols: u32,
    pub layout_options: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageChange {
    pub match_details: Vec<ViewportMatch>,
    pub hp_already_applied: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HangingProtocolEvent {
    NewLayout(NewLayout),
    StageChange(StageChange),
    /// Payload is whatever the image-load strategy returned.
    CustomImageLoadPerformed(Value),
}

impl HangingProtocolEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HangingProtocolEvent::NewLayout(_) => EventKind::NewLayout,
            HangingProtocolEvent::StageChange(_) => EventKind::StageChange,
            HangingProtocolEvent::CustomImageLoadPerformed(_) => {
                EventKind::CustomImageLoadPerformed
            }
        }
    }
}

pub type Listener = Box<dyn FnMut(&HangingProtocolEvent) + Send>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Listeners run synchronously, in registration order. A panicking listener is not isolated.
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    listeners: Vec<(SubscriptionId, EventKind, Listener)>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventBus {
    pub fn subscribe(&mut self, kind: EventKind, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, kind, listener));
        id
    }

    /// Returns false when the subscription was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sub, _, _)| *sub != id);
        self.listeners.len() != before
    }

    pub fn broadcast(&mut self, event: &HangingProtocolEvent) {
        let kind = event.kind();
        for (_, _, listener) in self.listeners.iter_mut().filter(|(_, k, _)| *k == kind) {
            listener(event);
        }
    }
}
