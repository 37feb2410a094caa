//
// protocol.rs
// Dicom-Hanging-rs
//
// Declarative hanging protocol model (stages, viewports, display-set rule sets, matching rules),
// structural validation on registration and JSON loading from disk.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{HangingProtocolError, Result};
use crate::models::AttributeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Scored against the active study when the protocol is auto-selected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocol_matching_rules: Vec<Rule>,
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_load_strategy: Option<String>,
}

/// One layout configuration within a protocol.
///
/// The three structural parts are optional on the wire: a stage lacking any of them is kept
/// but cannot be hung.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub viewport_structure: Option<ViewportStructure>,
    #[serde(default)]
    pub viewports: Option<Vec<ViewportSpec>>,
    #[serde(default)]
    pub display_sets: Option<Vec<DisplaySetRuleSet>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewportStructure {
    #[serde(rename = "type", default)]
    pub layout_type: String,
    #[serde(default)]
    pub properties: Option<LayoutProperties>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutProperties {
    pub rows: u32,
    pub columns: u32,
    #[serde(default)]
    pub layout_options: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportSpec {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub viewport_options: AttributeMap,
    #[serde(default)]
    pub display_sets: Vec<DisplaySetReference>,
}

/// Points a viewport at a rule set of the same stage; `display_set_index` picks the N-th ranked
/// candidate instead of the best one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySetReference {
    pub id: String,
    #[serde(default)]
    pub display_set_index: usize,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub options: AttributeMap,
}

/// Authored protocols sometimes spell an empty option mapping as `null`.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<AttributeMap, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<AttributeMap>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySetRuleSet {
    pub id: String,
    #[serde(default)]
    pub study_matching_rules: Vec<Rule>,
    #[serde(default)]
    pub series_matching_rules: Vec<Rule>,
    // Carried for protocol compatibility; every surviving candidate is always ranked.
    #[serde(default)]
    pub find_all: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub attribute: String,
    pub constraint: Constraint,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub required: bool,
}

fn default_weight() -> f64 {
    1.0
}

impl Rule {
    pub fn new(attribute: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        let mut constraint = BTreeMap::new();
        constraint.insert(operator, ExpectedValue::Wrapped { value: value.into() });
        Self {
            id: None,
            attribute: attribute.into(),
            constraint: Constraint(constraint),
            weight: default_weight(),
            required: false,
        }
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Operator -> expected value. Every entry must hold for the rule to pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Constraint(pub BTreeMap<Operator, ExpectedValue>);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equals,
    DoesNotEqual,
    Contains,
    DoesNotContain,
    Includes,
    DoesNotInclude,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
}

/// Accepts both `{"equals": {"value": "CT"}}` and the shorthand `{"equals": "CT"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedValue {
    Wrapped { value: Value },
    Bare(Value),
}

impl ExpectedValue {
    pub fn value(&self) -> &Value {
        match self {
            ExpectedValue::Wrapped { value } | ExpectedValue::Bare(value) => value,
        }
    }
}

impl Stage {
    /// Layout structure, viewports and rule sets are all declared and there is a viewport to fill.
    pub fn is_complete(&self) -> bool {
        self.viewport_structure.is_some()
            && self.display_sets.is_some()
            && self.viewports.as_ref().is_some_and(|v| !v.is_empty())
    }
}

/// Upper bound on the viewport slots generated for one stage.
pub const MAX_VIEWPORTS: usize = 1024;

/// Structural defaulting applied when a protocol is registered.
///
/// `id` and `name` fall back to each other, and a stage without declared viewports gets
/// `rows * columns` empty slots. A grid larger than `MAX_VIEWPORTS` gets none and stays
/// incomplete. Missing option mappings are already defaulted by serde.
pub fn validate_protocol(mut protocol: Protocol) -> Protocol {
    if protocol.id.is_empty() {
        protocol.id = protocol.name.clone();
    }
    if protocol.name.is_empty() {
        protocol.name = protocol.id.clone();
    }

    for stage in &mut protocol.stages {
        if stage.viewports.is_some() {
            continue;
        }
        let properties = stage
            .viewport_structure
            .as_ref()
            .and_then(|s| s.properties.as_ref());
        let Some(props) = properties else {
            continue;
        };
        match (props.rows as usize).checked_mul(props.columns as usize) {
            Some(slots) if slots <= MAX_VIEWPORTS => {
                stage.viewports = Some(vec![ViewportSpec::default(); slots]);
            }
            _ => warn!(
                protocol = %protocol.id,
                rows = props.rows,
                columns = props.columns,
                "Viewport grid too large, stage left without viewports"
            ),
        }
    }

    protocol
}

/// Load protocols from a JSON file or, recursively, every `*.json` file under a directory.
///
/// A file may hold a single protocol object or an array of them.
pub fn load_protocols(path: &Path) -> Result<Vec<Protocol>> {
    if path.is_file() {
        return read_protocol_file(path);
    }

    let mut protocols = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| HangingProtocolError::Io(e.into()))?;
        let is_json = entry.path().extension().map_or(false, |ext| ext == "json");
        if entry.file_type().is_file() && is_json {
            protocols.extend(read_protocol_file(entry.path())?);
        }
    }
    Ok(protocols)
}

fn read_protocol_file(path: &Path) -> Result<Vec<Protocol>> {
    let text = fs::read_to_string(path)?;
    let parse_err = |source| HangingProtocolError::ProtocolParse {
        path: path.to_path_buf(),
        source,
    };
    let value: Value = serde_json::from_str(&text).map_err(parse_err)?;
    if value.is_array() {
        serde_json::from_value(value).map_err(parse_err)
    } else {
        serde_json::from_value(value).map(|p| vec![p]).map_err(parse_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn grid(rows: u32, columns: u32) -> ViewportStructure {
        ViewportStructure {
            layout_type: "grid".into(),
            properties: Some(LayoutProperties {
                rows,
                columns,
                layout_options: Vec::new(),
            }),
        }
    }

    #[test]
    fn validation_generates_empty_viewports_from_grid() {
        let protocol = Protocol {
            name: "two-up".into(),
            stages: vec![Stage {
                viewport_structure: Some(grid(1, 2)),
                display_sets: Some(Vec::new()),
                ..Default::default()
            }],
            ..Default::default()
        };

        let validated = validate_protocol(protocol);
        assert_eq!(validated.id, "two-up");
        assert_eq!(validated.name, "two-up");
        let viewports = validated.stages[0].viewports.as_ref().expect("viewports");
        assert_eq!(viewports.len(), 2);
        assert!(viewports
            .iter()
            .all(|v| v.viewport_options.is_empty() && v.display_sets.is_empty()));
    }

    #[test]
    fn validation_keeps_declared_viewports() {
        let protocol: Protocol = serde_json::from_value(json!({
            "id": "mr",
            "stages": [{
                "viewportStructure": { "type": "grid", "properties": { "rows": 2, "columns": 2 } },
                "displaySets": [{ "id": "t1", "seriesMatchingRules": [] }],
                "viewports": [{ "displaySets": [{ "id": "t1" }] }]
            }]
        }))
        .expect("protocol");

        let validated = validate_protocol(protocol);
        assert_eq!(validated.name, "mr");
        let viewports = validated.stages[0].viewports.as_ref().expect("viewports");
        assert_eq!(viewports.len(), 1);
        assert!(viewports[0].viewport_options.is_empty());
        assert_eq!(viewports[0].display_sets[0].display_set_index, 0);
        assert!(viewports[0].display_sets[0].options.is_empty());
    }

    #[test]
    fn oversized_grid_leaves_the_stage_incomplete() {
        let protocol = Protocol {
            id: "wall".into(),
            stages: vec![
                Stage {
                    viewport_structure: Some(grid(65536, 65536)),
                    display_sets: Some(Vec::new()),
                    ..Default::default()
                },
                Stage {
                    viewport_structure: Some(grid(1, MAX_VIEWPORTS as u32 + 1)),
                    display_sets: Some(Vec::new()),
                    ..Default::default()
                },
                Stage {
                    viewport_structure: Some(grid(32, 32)),
                    display_sets: Some(Vec::new()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let validated = validate_protocol(protocol);
        assert!(validated.stages[0].viewports.is_none());
        assert!(!validated.stages[0].is_complete());
        assert!(validated.stages[1].viewports.is_none());
        assert_eq!(
            validated.stages[2].viewports.as_ref().map(Vec::len),
            Some(MAX_VIEWPORTS)
        );
    }

    #[test]
    fn null_option_mappings_default_to_empty() {
        let protocol: Protocol = serde_json::from_value(json!({
            "id": "nulls",
            "stages": [{
                "viewportStructure": { "type": "grid", "properties": { "rows": 1, "columns": 1 } },
                "displaySets": [{ "id": "t1" }],
                "viewports": [{
                    "viewportOptions": null,
                    "displaySets": [{ "id": "t1", "options": null }]
                }]
            }]
        }))
        .expect("protocol");

        let viewport = &protocol.stages[0].viewports.as_ref().expect("viewports")[0];
        assert!(viewport.viewport_options.is_empty());
        assert!(viewport.display_sets[0].options.is_empty());
    }

    #[test]
    fn rule_accepts_wrapped_and_bare_constraints() {
        let wrapped: Rule = serde_json::from_value(json!({
            "attribute": "Modality",
            "constraint": { "equals": { "value": "CT" } },
            "required": true
        }))
        .expect("wrapped");
        let bare: Rule = serde_json::from_value(json!({
            "attribute": "Modality",
            "constraint": { "equals": "CT" },
            "weight": 3
        }))
        .expect("bare");

        assert_eq!(wrapped.weight, 1.0);
        assert!(wrapped.required);
        assert_eq!(bare.weight, 3.0);
        assert_eq!(
            wrapped.constraint.0[&Operator::Equals].value(),
            bare.constraint.0[&Operator::Equals].value()
        );
    }

    #[test]
    fn load_protocols_reads_objects_and_arrays() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.json"), r#"{"id": "one", "stages": []}"#).expect("write a");
        fs::write(
            dir.path().join("b.json"),
            r#"[{"id": "two", "stages": []}, {"name": "three", "stages": []}]"#,
        )
        .expect("write b");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write txt");

        let protocols = load_protocols(dir.path()).expect("load");
        let names: Vec<_> = protocols.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(names, vec!["one", "two", ""]);
        assert_eq!(protocols[2].name, "three");
    }

    #[test]
    fn load_protocols_reports_parse_failures() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write");

        let err = load_protocols(&path).expect_err("should fail");
        assert!(matches!(err, HangingProtocolError::ProtocolParse { .. }));
    }
}
