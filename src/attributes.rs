//
// attributes.rs
// Dicom-Hanging-rs
//
// Resolves named attributes from studies, display sets and instances, either straight from the
// subject or through registered custom computations.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::models::{Attributes, DisplaySet, Instance, Series, Study};

/// The object a rule is evaluated against.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    Study(&'a Study),
    DisplaySet(&'a DisplaySet),
    Instance(&'a Instance),
}

impl Attributes for Subject<'_> {
    fn attribute(&self, id: &str) -> Option<Value> {
        match self {
            Subject::Study(study) => study.attribute(id),
            Subject::DisplaySet(ds) => ds.attribute(id),
            Subject::Instance(instance) => instance.attribute(id),
        }
    }
}

/// Broader scope handed through to resolvers untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchContext<'a> {
    pub studies: &'a [Study],
    pub display_sets: &'a [DisplaySet],
    /// First image of the display set under evaluation, when there is one.
    pub instance: Option<&'a Instance>,
}

pub type AttributeFn =
    Arc<dyn Fn(&Subject<'_>, &MatchContext<'_>) -> Option<Value> + Send + Sync>;

#[derive(Clone)]
pub struct CustomAttribute {
    pub id: String,
    pub name: String,
    pub options: Value,
    callback: AttributeFn,
}

impl fmt::Debug for CustomAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAttribute")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Attribute id -> custom computation. Ids without an entry are read directly off the subject.
#[derive(Debug, Clone)]
pub struct AttributeResolver {
    custom: BTreeMap<String, CustomAttribute>,
}

impl Default for AttributeResolver {
    fn default() -> Self {
        let mut resolver = Self {
            custom: BTreeMap::new(),
        };
        resolver.register(
            "NumberOfStudyRelatedSeries",
            "The number of series in the study",
            Arc::new(number_of_study_related_series),
            Value::Null,
        );
        resolver.register(
            "NumberOfSeriesRelatedInstances",
            "The number of instances in the display set",
            Arc::new(|subject: &Subject<'_>, _: &MatchContext<'_>| {
                subject.attribute("numImageFrames")
            }),
            Value::Null,
        );
        resolver.register(
            "ModalitiesInStudy",
            "Gets the array of the modalities for the series",
            Arc::new(modalities_in_study),
            Value::Null,
        );
        resolver
    }
}

impl AttributeResolver {
    /// Register a custom attribute, replacing any previous one with the same id.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        callback: AttributeFn,
        options: Value,
    ) {
        let id = id.into();
        self.custom.insert(
            id.clone(),
            CustomAttribute {
                id,
                name: name.into(),
                options,
                callback,
            },
        );
    }

    pub fn custom_attribute(&self, id: &str) -> Option<&CustomAttribute> {
        self.custom.get(id)
    }

    pub fn custom_attributes(&self) -> impl Iterator<Item = &CustomAttribute> {
        self.custom.values()
    }

    /// `None` means no value could be derived, which is not an error.
    pub fn resolve(&self, id: &str, subject: &Subject<'_>, context: &MatchContext<'_>) -> Option<Value> {
        match self.custom.get(id) {
            Some(custom) => (custom.callback)(subject, context),
            None => subject.attribute(id),
        }
    }
}

fn number_of_study_related_series(subject: &Subject<'_>, _: &MatchContext<'_>) -> Option<Value> {
    if let Some(direct) = subject.attribute("NumberOfStudyRelatedSeries") {
        return Some(direct);
    }
    match subject {
        Subject::Study(study) => Some(Value::from(study.series.len())),
        _ => None,
    }
}

fn modalities_in_study(subject: &Subject<'_>, _: &MatchContext<'_>) -> Option<Value> {
    if let Some(direct) = subject.attribute("ModalitiesInStudy") {
        return Some(direct);
    }
    let series: &[Series] = match subject {
        Subject::Study(study) => &study.series,
        _ => &[],
    };
    let mut modalities: Vec<Value> = Vec::new();
    for series in series {
        if let Some(modality) = series.attribute("Modality") {
            if !modalities.contains(&modality) {
                modalities.push(modality);
            }
        }
    }
    Some(Value::Array(modalities))
}
