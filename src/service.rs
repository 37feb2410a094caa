//
// service.rs
// Dicom-Hanging-rs
//
// Hanging protocol state machine: owns the registered protocols, the active protocol and stage,
// re-evaluates matches on every transition and broadcasts layout/stage events.
//
// Thales Matheus Mendonça Santos - November 2025

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::attributes::AttributeFn;
use crate::binder;
use crate::engine::MatchEngine;
use crate::error::{HangingProtocolError, Result};
use crate::events::{
    EventBus, EventKind, HangingProtocolEvent, Listener, NewLayout, StageChange, SubscriptionId,
};
use crate::extensions::{
    is_truthy, ApplyFn, ExtensionRegistry, ImageLoadRequest, ImageLoadStrategy, StoreFn,
    ViewportState,
};
use crate::matcher;
use crate::models::{
    AttributeMap, Diagnostic, DisplaySetMatchDetails, HangingData, ViewportMatch,
};
use crate::protocol::{validate_protocol, Protocol, Stage};

/// Snapshot of the current hanging, as handed to the CLI and HTTP callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HangingReport {
    pub protocol_id: String,
    pub protocol_name: String,
    pub stage: usize,
    pub stage_count: usize,
    pub layout: Option<NewLayout>,
    pub match_details: Vec<ViewportMatch>,
    pub display_set_match_details: DisplaySetMatchDetails,
    pub hp_already_applied: Vec<bool>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Default)]
pub struct HangingProtocolService {
    extensions: ExtensionRegistry,
    events: EventBus,
    protocols: Vec<Arc<Protocol>>,
    protocol: Option<Arc<Protocol>>,
    stage: usize,
    data: HangingData,
    match_details: Vec<ViewportMatch>,
    display_set_match_details: DisplaySetMatchDetails,
    hp_already_applied: Vec<bool>,
    diagnostics: Vec<Diagnostic>,
    active_image_load_strategy: Option<String>,
    custom_image_load_performed: bool,
}

impl HangingProtocolService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extensions(extensions: ExtensionRegistry) -> Self {
        Self {
            extensions,
            ..Self::default()
        }
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    pub fn subscribe(&mut self, kind: EventKind, listener: Listener) -> SubscriptionId {
        self.events.subscribe(kind, listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Validate and register protocols. A protocol identical to one already registered is skipped;
    /// distinct protocols sharing an id are all kept.
    pub fn add_protocols(&mut self, protocols: impl IntoIterator<Item = Protocol>) {
        for protocol in protocols {
            let protocol = validate_protocol(protocol);
            if self.protocols.iter().any(|p| **p == protocol) {
                debug!(protocol = %protocol.id, "protocol already registered");
                continue;
            }
            self.protocols.push(Arc::new(protocol));
        }
    }

    pub fn get_protocols(&self) -> &[Arc<Protocol>] {
        &self.protocols
    }

    /// Hang `data`. Without a protocol (or with one lacking an id) the best registered protocol
    /// is selected. Always lands on stage 0.
    pub fn run(&mut self, data: HangingData, protocol: Option<Protocol>) -> Result<()> {
        let protocol = match protocol {
            Some(protocol) if !protocol.id.is_empty() => Arc::new(validate_protocol(protocol)),
            _ => {
                let engine = MatchEngine::new(&self.extensions.attributes);
                engine.select_protocol(
                    &self.protocols,
                    &data.studies,
                    data.active_study(),
                    &data.display_sets,
                )?
            }
        };

        self.data = data;
        self.set_protocol(protocol);
        Ok(())
    }

    /// Hang `data` with the registered protocol `id`.
    pub fn run_protocol(&mut self, data: HangingData, id: &str) -> Result<()> {
        let protocol = self
            .protocols
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| HangingProtocolError::UnknownProtocol { id: id.to_string() })?;
        self.data = data;
        self.set_protocol(protocol);
        Ok(())
    }

    /// Drop all per-run state and registered protocols. Extensions are kept.
    pub fn reset(&mut self) {
        self.protocols.clear();
        self.protocol = None;
        self.stage = 0;
        self.data = HangingData::default();
        self.match_details.clear();
        self.display_set_match_details.clear();
        self.hp_already_applied.clear();
        self.diagnostics.clear();
        self.active_image_load_strategy = None;
        self.custom_image_load_performed = false;
    }

    pub fn active_protocol(&self) -> Option<&Arc<Protocol>> {
        self.protocol.as_ref()
    }

    pub fn current_stage(&self) -> Option<usize> {
        self.protocol.as_ref().map(|_| self.stage)
    }

    pub fn stage_count(&self) -> usize {
        self.protocol.as_ref().map_or(0, |p| p.stages.len())
    }

    pub fn get_state(&self) -> (&[ViewportMatch], &[bool]) {
        (&self.match_details, &self.hp_already_applied)
    }

    pub fn get_display_sets_match_details(&self) -> &DisplaySetMatchDetails {
        &self.display_set_match_details
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Called by the renderer once viewport `index` shows its assignment.
    pub fn set_hanging_protocol_applied_for_viewport(&mut self, index: usize) -> bool {
        match self.hp_already_applied.get_mut(index) {
            Some(applied) => {
                *applied = true;
                true
            }
            None => {
                warn!(viewport = index, "No such viewport in the current stage");
                false
            }
        }
    }

    pub fn next_stage(&mut self) -> bool {
        debug!("nextProtocolStage");
        let moved = self.set_current_stage(1);
        if !moved {
            debug!("nextProtocolStage failed");
        }
        moved
    }

    pub fn previous_stage(&mut self) -> bool {
        debug!("previousProtocolStage");
        let moved = self.set_current_stage(-1);
        if !moved {
            debug!("previousProtocolStage failed");
        }
        moved
    }

    pub fn add_custom_attribute(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        callback: AttributeFn,
        options: Value,
    ) {
        self.extensions.register_attribute(id, name, callback, options);
    }

    pub fn add_custom_viewport_option(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        apply: Option<ApplyFn>,
        store: Option<StoreFn>,
        options: Value,
    ) {
        self.extensions
            .register_viewport_option(id, name, apply, store, options);
    }

    pub fn apply_custom_viewport_options(
        &self,
        viewport_options: &AttributeMap,
        viewport: &mut ViewportState,
    ) -> usize {
        self.extensions.apply_viewport_options(viewport_options, viewport)
    }

    pub fn apply_custom_viewport_store(
        &self,
        viewport_options: &mut AttributeMap,
        prior: Option<&AttributeMap>,
    ) -> usize {
        self.extensions.apply_viewport_store(viewport_options, prior)
    }

    pub fn register_image_load_strategy(
        &mut self,
        name: impl Into<String>,
        strategy: Arc<dyn ImageLoadStrategy>,
    ) -> Result<()> {
        self.extensions.register_load_strategy(name, strategy)
    }

    pub fn has_custom_image_load_strategy(&self) -> bool {
        self.active_image_load_strategy
            .as_deref()
            .is_some_and(|name| self.extensions.load_strategy(name).is_some())
    }

    pub fn custom_image_load_performed(&self) -> bool {
        self.custom_image_load_performed
    }

    /// Hand `data` to the active load strategy. A truthy result is broadcast and recorded.
    pub fn run_image_load_strategy(&mut self, data: &Value) -> bool {
        let Some(strategy) = self
            .active_image_load_strategy
            .as_deref()
            .and_then(|name| self.extensions.load_strategy(name))
            .cloned()
        else {
            return false;
        };

        let loaded = strategy.load(&ImageLoadRequest {
            data,
            display_set_match_details: &self.display_set_match_details,
            match_details: &self.match_details,
        });

        match loaded {
            Some(result) if is_truthy(&result) => {
                self.custom_image_load_performed = true;
                self.events
                    .broadcast(&HangingProtocolEvent::CustomImageLoadPerformed(result));
                true
            }
            _ => false,
        }
    }

    pub fn report(&self) -> Option<HangingReport> {
        let protocol = self.protocol.as_ref()?;
        Some(HangingReport {
            protocol_id: protocol.id.clone(),
            protocol_name: protocol.name.clone(),
            stage: self.stage,
            stage_count: protocol.stages.len(),
            layout: protocol.stages.get(self.stage).and_then(layout_of),
            match_details: self.match_details.clone(),
            display_set_match_details: self.display_set_match_details.clone(),
            hp_already_applied: self.hp_already_applied.clone(),
            diagnostics: self.diagnostics.clone(),
        })
    }

    fn set_protocol(&mut self, protocol: Arc<Protocol>) {
        self.stage = 0;
        self.active_image_load_strategy = protocol
            .image_load_strategy
            .clone()
            .filter(|name| self.extensions.load_strategy(name).is_some());
        info!(protocol = %protocol.id, "hanging protocol applied");
        self.protocol = Some(protocol);
        self.update_viewports();
    }

    fn set_current_stage(&mut self, delta: isize) -> bool {
        let count = self.stage_count();
        let target = self.stage as isize + delta;
        if self.protocol.is_none() || target < 0 || target as usize >= count {
            return false;
        }

        self.stage = target as usize;
        debug!(stage = self.stage, "setCurrentProtocolStage");
        self.update_viewports();

        self.events
            .broadcast(&HangingProtocolEvent::StageChange(StageChange {
                match_details: self.match_details.clone(),
                hp_already_applied: self.hp_already_applied.clone(),
            }));
        true
    }

    /// Rebuild every per-stage result from scratch for the current stage.
    fn update_viewports(&mut self) {
        self.display_set_match_details.clear();
        self.match_details.clear();
        self.hp_already_applied.clear();
        self.diagnostics.clear();

        let Some(protocol) = self.protocol.clone() else {
            return;
        };
        if protocol.stages.is_empty() {
            info!(protocol = %protocol.id, "No protocol stages - nothing to display");
            self.diagnostics.push(Diagnostic::NoProtocolStages {
                protocol: protocol.id.clone(),
            });
            return;
        }

        let stage = &protocol.stages[self.stage];
        let layout = layout_of(stage).filter(|_| stage.is_complete());
        let (Some(layout), Some(viewports)) = (layout, stage.viewports.as_ref()) else {
            warn!(protocol = %protocol.id, stage = self.stage, "Stage cannot be applied");
            self.diagnostics.push(Diagnostic::IncompleteStage {
                protocol: protocol.id.clone(),
                stage: self.stage,
            });
            return;
        };

        self.custom_image_load_performed = false;
        self.events
            .broadcast(&HangingProtocolEvent::NewLayout(layout));

        let engine = MatchEngine::new(&self.extensions.attributes);
        self.display_set_match_details = matcher::match_stage(
            &engine,
            stage,
            &self.data.studies,
            &self.data.display_sets,
        );

        for (index, spec) in viewports.iter().enumerate() {
            let (viewport, diagnostics) =
                binder::bind_viewport(index, spec, &self.display_set_match_details);
            self.match_details.push(viewport);
            self.diagnostics.extend(diagnostics);
        }
        self.hp_already_applied = vec![false; viewports.len()];
    }
}

fn layout_of(stage: &Stage) -> Option<NewLayout> {
    let structure = stage.viewport_structure.as_ref()?;
    let properties = structure.properties.as_ref()?;
    Some(NewLayout {
        layout_type: structure.layout_type.clone(),
        num_rows: properties.rows,
        num_cols: properties.columns,
        layout_options: properties.layout_options.clone(),
    })
}

/// One-shot evaluation used by the CLI and the HTTP API: register `protocols`, hang `data`
/// (with `protocol_id` when given) and advance to `stage`.
pub fn hang(
    protocols: &[Protocol],
    data: HangingData,
    protocol_id: Option<&str>,
    stage: usize,
) -> Result<HangingReport> {
    let mut service = HangingProtocolService::new();
    service.add_protocols(protocols.iter().cloned());
    match protocol_id {
        Some(id) => service.run_protocol(data, id)?,
        None => service.run(data, None)?,
    }
    for _ in 0..stage {
        if !service.next_stage() {
            warn!(requested = stage, "Requested stage is out of range");
            break;
        }
    }
    service
        .report()
        .ok_or(HangingProtocolError::NoProtocolAvailable)
}
