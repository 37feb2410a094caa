//
// hanging_workflows.rs
// Dicom-Hanging-rs
//
// Integration-style tests driving the hanging protocol service end to end: protocol selection,
// display-set matching, viewport binding, stage navigation, events and extension points.
//
// Thales Matheus Mendonça Santos - November 2025

use std::sync::{Arc, Mutex};

use dicom_hanging::attributes::{MatchContext, Subject};
use dicom_hanging::events::{EventKind, HangingProtocolEvent, NewLayout, StageChange};
use dicom_hanging::extensions::{ImageLoadRequest, ImageLoadStrategy, ViewportState};
use dicom_hanging::models::{AttributeMap, Diagnostic, DisplaySet, HangingData, Series, Study};
use dicom_hanging::protocol::{load_protocols, Protocol};
use dicom_hanging::{hang, HangingProtocolError, HangingProtocolService};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::tempdir;

fn attrs(value: Value) -> AttributeMap {
    match value {
        Value::Object(map) => map,
        _ => AttributeMap::new(),
    }
}

fn display_set(study: &str, series: &str, number: i64, modality: &str) -> DisplaySet {
    DisplaySet {
        display_set_instance_uid: format!("ds-{series}"),
        study_instance_uid: study.into(),
        series_instance_uid: series.into(),
        series_number: Some(json!(number)),
        num_image_frames: Some(1),
        attributes: attrs(json!({ "Modality": modality })),
        ..Default::default()
    }
}

fn data(display_sets: Vec<DisplaySet>) -> HangingData {
    let mut studies: Vec<Study> = Vec::new();
    for ds in &display_sets {
        let series = Series {
            series_instance_uid: ds.series_instance_uid.clone(),
            attributes: ds.attributes.clone(),
        };
        match studies
            .iter_mut()
            .find(|s| s.study_instance_uid == ds.study_instance_uid)
        {
            Some(study) => study.series.push(series),
            None => studies.push(Study {
                study_instance_uid: ds.study_instance_uid.clone(),
                series: vec![series],
                ..Default::default()
            }),
        }
    }
    HangingData {
        studies,
        display_sets,
        active_study_instance_uid: None,
    }
}

fn protocol(value: Value) -> Protocol {
    serde_json::from_value(value).expect("protocol json")
}

fn grid_stage(rows: u32, columns: u32, modality: &str, viewports: Value) -> Value {
    json!({
        "viewportStructure": {
            "type": "grid",
            "properties": { "rows": rows, "columns": columns }
        },
        "displaySets": [{
            "id": "primary",
            "seriesMatchingRules": [{
                "attribute": "Modality",
                "constraint": { "equals": { "value": modality } },
                "required": true
            }]
        }],
        "viewports": viewports
    })
}

fn single_viewport(index: usize) -> Value {
    json!([{
        "viewportOptions": { "toolGroupId": "default" },
        "displaySets": [{ "id": "primary", "displaySetIndex": index }]
    }])
}

fn two_stage_protocol() -> Protocol {
    protocol(json!({
        "id": "ct-two-stage",
        "stages": [
            grid_stage(1, 2, "CT", json!([
                { "displaySets": [{ "id": "primary" }] },
                { "displaySets": [{ "id": "primary", "displaySetIndex": 1 }] }
            ])),
            grid_stage(1, 1, "CT", single_viewport(0))
        ]
    }))
}

fn record_events(service: &mut HangingProtocolService) -> Arc<Mutex<Vec<EventKind>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        EventKind::NewLayout,
        EventKind::StageChange,
        EventKind::CustomImageLoadPerformed,
    ] {
        let seen = Arc::clone(&seen);
        service.subscribe(
            kind,
            Box::new(move |event: &HangingProtocolEvent| {
                seen.lock().unwrap().push(event.kind());
            }),
        );
    }
    seen
}

fn record_payloads(service: &mut HangingProtocolService) -> Arc<Mutex<Vec<HangingProtocolEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        EventKind::NewLayout,
        EventKind::StageChange,
        EventKind::CustomImageLoadPerformed,
    ] {
        let seen = Arc::clone(&seen);
        service.subscribe(
            kind,
            Box::new(move |event: &HangingProtocolEvent| {
                seen.lock().unwrap().push(event.clone());
            }),
        );
    }
    seen
}

#[test]
fn required_rule_selects_the_matching_display_set() {
    let mut service = HangingProtocolService::new();
    let ct = protocol(json!({ "id": "ct", "stages": [grid_stage(1, 1, "CT", single_viewport(0))] }));

    service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), Some(ct))
        .expect("run");

    let matches = &service.get_display_sets_match_details()["primary"];
    let best = matches.best_match.as_ref().expect("best match");
    assert_eq!(best.display_set_instance_uid, "ds-1.1.1");
    assert_eq!(best.matching_score, 1.0);
    assert_eq!(best.match_details.passed.len(), 1);

    let (viewports, applied) = service.get_state();
    assert_eq!(viewports.len(), 1);
    assert_eq!(viewports[0].viewport_options["toolGroupId"], json!("default"));
    assert_eq!(applied, &[false]);
    assert!(service.diagnostics().is_empty());
}

#[test]
fn failed_required_rule_leaves_the_viewport_empty() {
    let mut service = HangingProtocolService::new();
    let mr = protocol(json!({ "id": "mr", "stages": [grid_stage(1, 1, "MR", single_viewport(0))] }));

    service
        .run(
            data(vec![
                display_set("1.1", "1.1.1", 1, "CT"),
                display_set("1.1", "1.1.2", 2, "PT"),
            ]),
            Some(mr),
        )
        .expect("run");

    let matches = &service.get_display_sets_match_details()["primary"];
    assert!(matches.best_match.is_none());
    assert!(matches.matching_scores.is_empty());

    let (viewports, _) = service.get_state();
    assert!(viewports[0].display_sets_info.is_empty());
    assert_eq!(
        service.diagnostics(),
        &[Diagnostic::UnmatchedDisplaySet {
            viewport_index: 0,
            rule_set_id: "primary".into(),
            display_set_index: 0,
        }]
    );
}

#[test]
fn grid_without_viewports_gets_empty_slots() {
    let mut service = HangingProtocolService::new();
    let grid = protocol(json!({
        "id": "grid",
        "stages": [{
            "viewportStructure": { "type": "grid", "properties": { "rows": 1, "columns": 2 } },
            "displaySets": []
        }]
    }));

    service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), Some(grid))
        .expect("run");

    let (viewports, applied) = service.get_state();
    assert_eq!(viewports.len(), 2);
    for viewport in viewports {
        assert!(viewport.viewport_options.is_empty());
        assert!(viewport.display_sets_info.is_empty());
    }
    assert_eq!(applied, &[false, false]);
}

#[test]
fn display_set_index_picks_the_second_ranked_candidate() {
    let mut service = HangingProtocolService::new();
    let second = protocol(json!({ "id": "second", "stages": [grid_stage(1, 1, "CT", single_viewport(1))] }));

    service
        .run(
            data(vec![
                display_set("1.1", "1.1.2", 2, "CT"),
                display_set("1.1", "1.1.1", 1, "CT"),
            ]),
            Some(second.clone()),
        )
        .expect("run");
    let (viewports, _) = service.get_state();
    assert_eq!(viewports[0].display_sets_info[0].series_instance_uid, "1.1.2");

    service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), Some(second))
        .expect("run");
    let (viewports, _) = service.get_state();
    assert!(viewports[0].display_sets_info.is_empty());
    assert_eq!(service.diagnostics().len(), 1);
}

#[test]
fn viewport_option_handlers_sharing_an_id_all_run_in_order() {
    let mut service = HangingProtocolService::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second"] {
        let calls = Arc::clone(&calls);
        service.add_custom_viewport_option(
            "syncWindowLevel",
            "Synchronise window level",
            Some(Arc::new(
                move |id: &str, value: &Value, viewport: &mut ViewportState| {
                    calls.lock().unwrap().push(tag);
                    viewport.insert(id.to_string(), value.clone());
                },
            )),
            None,
            Value::Null,
        );
    }

    let options = attrs(json!({ "customViewportOptions": { "syncWindowLevel": true } }));
    let mut viewport = ViewportState::new();
    assert_eq!(service.apply_custom_viewport_options(&options, &mut viewport), 2);
    assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(viewport["syncWindowLevel"], json!(true));
}

#[test]
fn auto_selection_uses_protocol_matching_rules() {
    let mut service = HangingProtocolService::new();
    service.add_protocols([
        protocol(json!({ "id": "default", "stages": [grid_stage(1, 1, "MR", single_viewport(0))] })),
        protocol(json!({
            "id": "ct",
            "protocolMatchingRules": [{
                "attribute": "ModalitiesInStudy",
                "constraint": { "includes": "CT" },
                "required": true
            }],
            "stages": [grid_stage(1, 1, "CT", single_viewport(0))]
        })),
    ]);

    service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), None)
        .expect("run");
    assert_eq!(service.active_protocol().map(|p| p.id.as_str()), Some("ct"));

    service
        .run(data(vec![display_set("2.1", "2.1.1", 1, "US")]), None)
        .expect("run");
    assert_eq!(service.active_protocol().map(|p| p.id.as_str()), Some("default"));
}

#[test]
fn duplicate_registrations_are_ignored() {
    let mut service = HangingProtocolService::new();
    service.add_protocols([two_stage_protocol(), two_stage_protocol()]);
    assert_eq!(service.get_protocols().len(), 1);
}

#[test]
fn run_emits_new_layout_and_navigation_emits_stage_change() {
    let mut service = HangingProtocolService::new();
    let seen = record_events(&mut service);

    service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), Some(two_stage_protocol()))
        .expect("run");
    assert_eq!(*seen.lock().unwrap(), vec![EventKind::NewLayout]);
    assert_eq!(service.current_stage(), Some(0));

    assert!(service.next_stage());
    assert_eq!(service.current_stage(), Some(1));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![EventKind::NewLayout, EventKind::NewLayout, EventKind::StageChange]
    );
}

#[test]
fn navigation_past_either_end_changes_nothing() {
    let mut service = HangingProtocolService::new();
    assert!(!service.next_stage());

    service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), Some(two_stage_protocol()))
        .expect("run");
    let seen = record_events(&mut service);

    assert!(!service.previous_stage());
    assert_eq!(service.current_stage(), Some(0));
    assert!(service.next_stage());
    assert!(!service.next_stage());
    assert_eq!(service.current_stage(), Some(1));
    assert!(service.previous_stage());
    assert_eq!(service.current_stage(), Some(0));

    let stage_changes = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|kind| **kind == EventKind::StageChange)
        .count();
    assert_eq!(stage_changes, 2);
}

#[test]
fn stage_transitions_reset_applied_flags() {
    let mut service = HangingProtocolService::new();
    service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), Some(two_stage_protocol()))
        .expect("run");

    assert!(service.set_hanging_protocol_applied_for_viewport(1));
    assert!(!service.set_hanging_protocol_applied_for_viewport(5));
    assert_eq!(service.get_state().1, &[false, true]);

    assert!(!service.previous_stage());
    assert_eq!(service.get_state().1, &[false, true]);

    assert!(service.next_stage());
    assert_eq!(service.get_state().1, &[false]);
}

#[test]
fn repeated_runs_produce_identical_state() {
    let mut service = HangingProtocolService::new();
    let input = data(vec![
        display_set("1.1", "1.1.1", 1, "CT"),
        display_set("1.1", "1.1.2", 2, "CT"),
    ]);

    service
        .run(input.clone(), Some(two_stage_protocol()))
        .expect("run");
    let first = service.report();
    service.run(input, Some(two_stage_protocol())).expect("run");
    assert_eq!(service.report(), first);
}

#[test]
fn incomplete_and_empty_protocols_are_reported_without_events() {
    let mut service = HangingProtocolService::new();
    let seen = record_events(&mut service);

    let no_layout = protocol(json!({
        "id": "no-layout",
        "stages": [{ "displaySets": [], "viewports": [{ "displaySets": [] }] }]
    }));
    service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), Some(no_layout))
        .expect("run");
    assert_eq!(
        service.diagnostics(),
        &[Diagnostic::IncompleteStage {
            protocol: "no-layout".into(),
            stage: 0,
        }]
    );

    let empty = protocol(json!({ "id": "empty" }));
    service.run(HangingData::default(), Some(empty)).expect("run");
    assert_eq!(
        service.diagnostics(),
        &[Diagnostic::NoProtocolStages {
            protocol: "empty".into(),
        }]
    );
    assert!(seen.lock().unwrap().is_empty());
    assert!(service.get_state().0.is_empty());
}

#[test]
fn reset_clears_protocols_but_keeps_extensions() {
    let mut service = HangingProtocolService::new();
    service.add_protocols([two_stage_protocol()]);
    service.add_custom_attribute(
        "SliceCount",
        "Frames in the display set",
        Arc::new(|_: &Subject<'_>, _: &MatchContext<'_>| Some(json!(1))),
        Value::Null,
    );
    service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), None)
        .expect("run");

    service.reset();

    assert!(service.get_protocols().is_empty());
    assert!(service.active_protocol().is_none());
    assert!(service.get_state().0.is_empty());
    assert!(service.extensions().attributes.custom_attribute("SliceCount").is_some());

    let err = service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), None)
        .unwrap_err();
    assert!(matches!(err, HangingProtocolError::NoProtocolAvailable));
}

#[test]
fn unknown_protocol_id_is_rejected() {
    let mut service = HangingProtocolService::new();
    service.add_protocols([two_stage_protocol()]);

    let err = service
        .run_protocol(HangingData::default(), "missing")
        .unwrap_err();
    assert!(matches!(err, HangingProtocolError::UnknownProtocol { ref id } if id == "missing"));
    assert!(service.active_protocol().is_none());
}

fn interleave(request: &ImageLoadRequest<'_>) -> Option<Value> {
    let viewports = request.match_details.len();
    Some(json!({ "strategy": "interleave", "viewports": viewports, "input": request.data }))
}

fn decline(_: &ImageLoadRequest<'_>) -> Option<Value> {
    Some(json!(false))
}

#[test]
fn image_load_strategy_runs_when_the_protocol_names_it() {
    let mut service = HangingProtocolService::new();
    let strategy: Arc<dyn ImageLoadStrategy> = Arc::new(interleave);
    service
        .register_image_load_strategy("interleave", strategy)
        .expect("register");
    let seen = record_events(&mut service);

    let mut with_strategy = two_stage_protocol();
    with_strategy.image_load_strategy = Some("interleave".into());
    service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), Some(with_strategy))
        .expect("run");

    assert!(service.has_custom_image_load_strategy());
    assert!(!service.custom_image_load_performed());
    assert!(service.run_image_load_strategy(&json!({ "requests": 3 })));
    assert!(service.custom_image_load_performed());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![EventKind::NewLayout, EventKind::CustomImageLoadPerformed]
    );

    service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), Some(two_stage_protocol()))
        .expect("run");
    assert!(!service.has_custom_image_load_strategy());
    assert!(!service.run_image_load_strategy(&Value::Null));
}

#[test]
fn falsy_strategy_results_are_not_broadcast() {
    let mut service = HangingProtocolService::new();
    let strategy: Arc<dyn ImageLoadStrategy> = Arc::new(decline);
    service
        .register_image_load_strategy("decline", strategy)
        .expect("register");
    let seen = record_events(&mut service);

    let mut with_strategy = two_stage_protocol();
    with_strategy.image_load_strategy = Some("decline".into());
    service
        .run(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), Some(with_strategy))
        .expect("run");

    assert!(!service.run_image_load_strategy(&Value::Null));
    assert!(!service.custom_image_load_performed());
    assert_eq!(*seen.lock().unwrap(), vec![EventKind::NewLayout]);

    let unnamed: Arc<dyn ImageLoadStrategy> = Arc::new(decline);
    assert!(matches!(
        service.register_image_load_strategy("", unnamed),
        Err(HangingProtocolError::InvalidExtension { .. })
    ));
}

#[test]
fn hang_reports_the_requested_stage() {
    let protocols = vec![two_stage_protocol()];
    let input = data(vec![
        display_set("1.1", "1.1.1", 1, "CT"),
        display_set("1.1", "1.1.2", 2, "CT"),
    ]);

    let report = hang(&protocols, input.clone(), None, 0).expect("hang");
    assert_eq!(report.protocol_id, "ct-two-stage");
    assert_eq!(report.protocol_name, "ct-two-stage");
    assert_eq!(report.stage_count, 2);
    assert_eq!(report.match_details.len(), 2);
    assert_eq!(
        report.match_details[1].display_sets_info[0].series_instance_uid,
        "1.1.2"
    );
    let layout = report.layout.expect("layout");
    assert_eq!((layout.num_rows, layout.num_cols), (1, 2));

    let report = hang(&protocols, input.clone(), Some("ct-two-stage"), 7).expect("hang");
    assert_eq!(report.stage, 1);
    assert_eq!(report.match_details.len(), 1);

    assert!(matches!(
        hang(&protocols, input, Some("nope"), 0),
        Err(HangingProtocolError::UnknownProtocol { .. })
    ));
}

#[test]
fn protocols_load_from_a_directory_of_json_files() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("a.json"),
        serde_json::to_string(&json!([
            { "id": "one", "stages": [] },
            { "name": "two", "stages": [] }
        ]))
        .unwrap(),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("b.json"),
        serde_json::to_string(&two_stage_protocol()).unwrap(),
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let protocols = load_protocols(dir.path()).expect("load");
    let ids: Vec<_> = protocols.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["one", "", "ct-two-stage"]);

    let mut service = HangingProtocolService::new();
    service.add_protocols(protocols);
    let ids: Vec<_> = service.get_protocols().iter().map(|p| p.id.clone()).collect();
    assert_eq!(ids, vec!["one", "two", "ct-two-stage"]);
}

#[test]
fn event_payloads_describe_the_evaluated_stage() {
    let mut service = HangingProtocolService::new();
    let strategy: Arc<dyn ImageLoadStrategy> = Arc::new(interleave);
    service
        .register_image_load_strategy("interleave", strategy)
        .expect("register");
    let seen = record_payloads(&mut service);

    let mut with_strategy = two_stage_protocol();
    with_strategy.image_load_strategy = Some("interleave".into());
    service
        .run(
            data(vec![
                display_set("1.1", "1.1.1", 1, "CT"),
                display_set("1.1", "1.1.2", 2, "CT"),
            ]),
            Some(with_strategy),
        )
        .expect("run");
    assert_eq!(
        *seen.lock().unwrap(),
        vec![HangingProtocolEvent::NewLayout(NewLayout {
            layout_type: "grid".into(),
            num_rows: 1,
            num_cols: 2,
            layout_options: Vec::new(),
        })]
    );

    assert!(service.set_hanging_protocol_applied_for_viewport(0));
    assert!(service.next_stage());
    {
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            HangingProtocolEvent::NewLayout(NewLayout {
                layout_type: "grid".into(),
                num_rows: 1,
                num_cols: 1,
                layout_options: Vec::new(),
            })
        );
        let (viewports, applied) = service.get_state();
        assert_eq!(
            events[2],
            HangingProtocolEvent::StageChange(StageChange {
                match_details: viewports.to_vec(),
                hp_already_applied: vec![false],
            })
        );
        assert_eq!(applied, &[false]);
    }

    assert!(service.run_image_load_strategy(&json!({ "requests": 3 })));
    let events = seen.lock().unwrap();
    assert_eq!(
        events[3],
        HangingProtocolEvent::CustomImageLoadPerformed(json!({
            "strategy": "interleave",
            "viewports": 1,
            "input": { "requests": 3 }
        }))
    );
}

#[test]
fn oversized_grid_is_reported_as_an_incomplete_stage() {
    let mut service = HangingProtocolService::new();
    service.add_protocols([protocol(json!({
        "id": "wall",
        "stages": [{
            "viewportStructure": {
                "type": "grid",
                "properties": { "rows": 65536, "columns": 65536 }
            },
            "displaySets": []
        }]
    }))]);
    let seen = record_events(&mut service);

    service
        .run_protocol(data(vec![display_set("1.1", "1.1.1", 1, "CT")]), "wall")
        .expect("run");

    assert_eq!(
        service.diagnostics(),
        &[Diagnostic::IncompleteStage {
            protocol: "wall".into(),
            stage: 0,
        }]
    );
    assert!(service.get_state().0.is_empty());
    assert!(seen.lock().unwrap().is_empty());
}
