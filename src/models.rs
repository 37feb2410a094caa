//
// models.rs
// Dicom-Hanging-rs
//
// Defines the serializable subjects fed into matching (studies, series, display sets, instances)
// and the renderer-facing results produced by a hanging evaluation.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::Rule;

/// Free-form attribute bag keyed by DICOM keyword (or any custom name).
pub type AttributeMap = serde_json::Map<String, Value>;

/// Anything a matching rule can read an attribute from.
pub trait Attributes {
    fn attribute(&self, id: &str) -> Option<Value>;
}

/// Series-level summary carried by a study, used by study-level aggregations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: String,
    #[serde(flatten)]
    pub attributes: AttributeMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Study {
    #[serde(rename = "StudyInstanceUID")]
    pub study_instance_uid: String,
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(flatten)]
    pub attributes: AttributeMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(flatten)]
    pub attributes: AttributeMap,
}

/// A renderable grouping of images, normally one per series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplaySet {
    #[serde(rename = "displaySetInstanceUID")]
    pub display_set_instance_uid: String,
    #[serde(rename = "StudyInstanceUID")]
    pub study_instance_uid: String,
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: String,
    #[serde(rename = "SeriesNumber", default, skip_serializing_if = "Option::is_none")]
    pub series_number: Option<Value>,
    #[serde(rename = "numImageFrames", default, skip_serializing_if = "Option::is_none")]
    pub num_image_frames: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Instance>,
    #[serde(flatten)]
    pub attributes: AttributeMap,
}

impl Attributes for Series {
    fn attribute(&self, id: &str) -> Option<Value> {
        match id {
            "SeriesInstanceUID" => Some(Value::from(self.series_instance_uid.as_str())),
            _ => self.attributes.get(id).cloned(),
        }
    }
}

impl Attributes for Study {
    fn attribute(&self, id: &str) -> Option<Value> {
        match id {
            "StudyInstanceUID" => Some(Value::from(self.study_instance_uid.as_str())),
            _ => self.attributes.get(id).cloned(),
        }
    }
}

impl Attributes for Instance {
    fn attribute(&self, id: &str) -> Option<Value> {
        self.attributes.get(id).cloned()
    }
}

impl Attributes for DisplaySet {
    fn attribute(&self, id: &str) -> Option<Value> {
        match id {
            "displaySetInstanceUID" => Some(Value::from(self.display_set_instance_uid.as_str())),
            "StudyInstanceUID" => Some(Value::from(self.study_instance_uid.as_str())),
            "SeriesInstanceUID" => Some(Value::from(self.series_instance_uid.as_str())),
            "SeriesNumber" => self.series_number.clone(),
            "numImageFrames" => self.num_image_frames.map(Value::from),
            _ => self.attributes.get(id).cloned(),
        }
    }
}

impl DisplaySet {
    /// Integer series number, accepting both numeric and IS-string encodings.
    pub fn series_number(&self) -> Option<i64> {
        match self.series_number.as_ref()? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Value::String(s) => parse_leading_int(s),
            _ => None,
        }
    }
}

fn parse_leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(trimmed.len(), |(i, _)| i);
    trimmed[..end].parse().ok()
}

/// Input to a hanging run, as supplied by the metadata provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangingData {
    #[serde(default)]
    pub studies: Vec<Study>,
    #[serde(default)]
    pub display_sets: Vec<DisplaySet>,
    /// Defaults to the first study when absent or unknown.
    #[serde(rename = "activeStudyInstanceUID", default, skip_serializing_if = "Option::is_none")]
    pub active_study_instance_uid: Option<String>,
}

impl HangingData {
    pub fn active_study(&self) -> Option<&Study> {
        self.active_study_instance_uid
            .as_deref()
            .and_then(|uid| self.studies.iter().find(|s| s.study_instance_uid == uid))
            .or_else(|| self.studies.first())
    }
}

/// Outcome of one rule against one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: Rule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Passed/failed rule results accumulated for a candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchDetail {
    pub passed: Vec<RuleResult>,
    pub failed: Vec<RuleResult>,
}

impl MatchDetail {
    pub fn extend(&mut self, other: &MatchDetail) {
        self.passed.extend(other.passed.iter().cloned());
        self.failed.extend(other.failed.iter().cloned());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortingInfo {
    pub score: f64,
    pub study: String,
    pub series: Option<i64>,
}

/// A (study, display set) pair that survived every required rule of a rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateMatch {
    #[serde(rename = "StudyInstanceUID")]
    pub study_instance_uid: String,
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: String,
    #[serde(rename = "displaySetInstanceUID")]
    pub display_set_instance_uid: String,
    pub matching_score: f64,
    pub match_details: MatchDetail,
    pub sorting_info: SortingInfo,
}

/// Ranked candidates for one display-set rule set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySetMatch {
    pub best_match: Option<CandidateMatch>,
    pub matching_scores: Vec<CandidateMatch>,
}

impl DisplaySetMatch {
    pub fn from_ranked(ranked: Vec<CandidateMatch>) -> Self {
        Self {
            best_match: ranked.first().cloned(),
            matching_scores: ranked,
        }
    }

    /// The `index`-th ranked candidate; 0 is the best match.
    pub fn candidate(&self, index: usize) -> Option<&CandidateMatch> {
        if index == 0 {
            self.best_match.as_ref()
        } else {
            self.matching_scores.get(index)
        }
    }
}

/// Rule-set id -> ranked matches for the current stage.
pub type DisplaySetMatchDetails = BTreeMap<String, DisplaySetMatch>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySetInfo {
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: String,
    #[serde(rename = "displaySetInstanceUID")]
    pub display_set_instance_uid: String,
    #[serde(rename = "displaySetOptions")]
    pub display_set_options: AttributeMap,
}

/// Renderer-facing assignment for one viewport position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportMatch {
    pub viewport_options: AttributeMap,
    pub display_sets_info: Vec<DisplaySetInfo>,
}

/// Non-fatal findings from the latest evaluation; affected steps are skipped, never aborted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Diagnostic {
    #[serde(rename_all = "camelCase")]
    NoProtocolStages { protocol: String },
    #[serde(rename_all = "camelCase")]
    IncompleteStage { protocol: String, stage: usize },
    #[serde(rename_all = "camelCase")]
    UnmatchedDisplaySet {
        viewport_index: usize,
        rule_set_id: String,
        display_set_index: usize,
    },
}
