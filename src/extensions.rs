//
// extensions.rs
// Dicom-Hanging-rs
//
// Process-wide extension points: custom attributes, custom viewport options (apply + store) and
// named image-load strategies.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::attributes::{AttributeFn, AttributeResolver};
use crate::error::{HangingProtocolError, Result};
use crate::models::{AttributeMap, DisplaySetMatchDetails, ViewportMatch};

/// Key inside `viewportOptions` holding the custom options to apply.
pub const CUSTOM_VIEWPORT_OPTIONS: &str = "customViewportOptions";

/// Renderer-side viewport properties a custom option may adjust.
pub type ViewportState = AttributeMap;

pub type ApplyFn = Arc<dyn Fn(&str, &Value, &mut ViewportState) + Send + Sync>;
/// Receives the new viewport options (mutable) and the prior ones.
pub type StoreFn = Arc<dyn Fn(&mut AttributeMap, &AttributeMap) + Send + Sync>;

#[derive(Clone)]
pub struct CustomViewportOption {
    pub id: String,
    pub name: String,
    pub options: Value,
    apply: Option<ApplyFn>,
    store: Option<StoreFn>,
}

impl fmt::Debug for CustomViewportOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomViewportOption")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("apply", &self.apply.is_some())
            .field("store", &self.store.is_some())
            .finish()
    }
}

pub struct ImageLoadRequest<'a> {
    pub data: &'a Value,
    pub display_set_match_details: &'a DisplaySetMatchDetails,
    pub match_details: &'a [ViewportMatch],
}

/// Custom image-loading strategy. Returning a truthy value means the strategy rearranged the
/// load and the value is broadcast to listeners.
pub trait ImageLoadStrategy: Send + Sync {
    fn load(&self, request: &ImageLoadRequest<'_>) -> Option<Value>;
}

impl<F> ImageLoadStrategy for F
where
    F: Fn(&ImageLoadRequest<'_>) -> Option<Value> + Send + Sync,
{
    fn load(&self, request: &ImageLoadRequest<'_>) -> Option<Value> {
        self(request)
    }
}

#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    pub attributes: AttributeResolver,
    viewport_options: Vec<CustomViewportOption>,
    load_strategies: BTreeMap<String, Arc<dyn ImageLoadStrategy>>,
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("attributes", &self.attributes)
            .field("viewport_options", &self.viewport_options)
            .field("load_strategies", &self.load_strategies.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExtensionRegistry {
    pub fn register_attribute(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        callback: AttributeFn,
        options: Value,
    ) {
        self.attributes.register(id, name, callback, options);
    }

    /// Several registrations may share an id; all of them run on apply.
    pub fn register_viewport_option(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        apply: Option<ApplyFn>,
        store: Option<StoreFn>,
        options: Value,
    ) {
        self.viewport_options.push(CustomViewportOption {
            id: id.into(),
            name: name.into(),
            options,
            apply,
            store,
        });
    }

    pub fn viewport_options(&self) -> &[CustomViewportOption] {
        &self.viewport_options
    }

    /// Run every apply callback registered under `id`, in registration order.
    pub fn apply_viewport_option(&self, id: &str, value: &Value, viewport: &mut ViewportState) -> usize {
        let mut calls = 0;
        for option in self.viewport_options.iter().filter(|o| o.id == id) {
            if let Some(apply) = &option.apply {
                apply(id, value, viewport);
                calls += 1;
            }
        }
        if calls == 0 {
            warn!(option = id, "No custom viewport option registered");
        }
        calls
    }

    /// Apply each entry of the `customViewportOptions` mapping found in `viewport_options`.
    pub fn apply_viewport_options(
        &self,
        viewport_options: &AttributeMap,
        viewport: &mut ViewportState,
    ) -> usize {
        let Some(Value::Object(custom)) = viewport_options.get(CUSTOM_VIEWPORT_OPTIONS) else {
            return 0;
        };
        custom
            .iter()
            .map(|(id, value)| self.apply_viewport_option(id, value, viewport))
            .sum()
    }

    /// Carry viewport state forward when the displayed data changes. Every store callback runs,
    /// regardless of id; nothing happens without prior options.
    pub fn apply_viewport_store(
        &self,
        viewport_options: &mut AttributeMap,
        prior: Option<&AttributeMap>,
    ) -> usize {
        let Some(prior) = prior else {
            return 0;
        };
        let mut calls = 0;
        for store in self.viewport_options.iter().filter_map(|o| o.store.as_ref()) {
            store(viewport_options, prior);
            calls += 1;
        }
        calls
    }

    pub fn register_load_strategy(
        &mut self,
        name: impl Into<String>,
        strategy: Arc<dyn ImageLoadStrategy>,
    ) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(HangingProtocolError::InvalidExtension {
                reason: "image load strategy needs a name".into(),
            });
        }
        self.load_strategies.insert(name, strategy);
        Ok(())
    }

    pub fn load_strategy(&self, name: &str) -> Option<&Arc<dyn ImageLoadStrategy>> {
        self.load_strategies.get(name)
    }
}

/// JavaScript-style truthiness, used to decide whether a load strategy did anything.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
