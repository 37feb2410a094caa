use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dicom::core::Tag;
use dicom::object::{open_file, DefaultDicomObject};
use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::dicom_access::ElementAccess;
use crate::models::{AttributeMap, DisplaySet, HangingData, Instance, Series, Study};

const STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
const SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);
const SERIES_NUMBER: Tag = Tag(0x0020, 0x0011);
const NUMBER_OF_FRAMES: Tag = Tag(0x0028, 0x0008);

const STUDY_TAGS: &[(&str, Tag)] = &[
    ("PatientName", Tag(0x0010, 0x0010)),
    ("PatientID", Tag(0x0010, 0x0020)),
    ("PatientSex", Tag(0x0010, 0x0040)),
    ("StudyDate", Tag(0x0008, 0x0020)),
    ("StudyTime", Tag(0x0008, 0x0030)),
    ("AccessionNumber", Tag(0x0008, 0x0050)),
    ("StudyDescription", Tag(0x0008, 0x1030)),
    ("StudyID", Tag(0x0020, 0x0010)),
];

const SERIES_TAGS: &[(&str, Tag)] = &[
    ("Modality", Tag(0x0008, 0x0060)),
    ("SeriesDate", Tag(0x0008, 0x0021)),
    ("SeriesDescription", Tag(0x0008, 0x103E)),
    ("BodyPartExamined", Tag(0x0018, 0x0015)),
    ("ProtocolName", Tag(0x0018, 0x1030)),
    ("ViewPosition", Tag(0x0018, 0x5101)),
    ("Laterality", Tag(0x0020, 0x0060)),
];

const INSTANCE_TAGS: &[(&str, Tag)] = &[
    ("ImageType", Tag(0x0008, 0x0008)),
    ("SOPClassUID", Tag(0x0008, 0x0016)),
    ("SOPInstanceUID", Tag(0x0008, 0x0018)),
    ("InstanceNumber", Tag(0x0020, 0x0013)),
    ("ImageLaterality", Tag(0x0020, 0x0062)),
    ("Rows", Tag(0x0028, 0x0010)),
    ("Columns", Tag(0x0028, 0x0011)),
];

/// Header attributes of one DICOM instance, split by information-model level.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub series_number: Option<Value>,
    pub frames: u32,
    pub study: AttributeMap,
    pub series: AttributeMap,
    pub instance: AttributeMap,
}

fn collect<T: ElementAccess>(obj: &T, tags: &[(&str, Tag)]) -> AttributeMap {
    let mut map = AttributeMap::new();
    for (keyword, tag) in tags {
        if let Some(value) = obj.attribute_value(*tag) {
            map.insert(keyword.to_string(), value);
        }
    }
    map
}

fn uid<T: ElementAccess>(obj: &T, tag: Tag) -> Option<String> {
    let value = obj.element_str(tag)?;
    let value = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!value.is_empty()).then(|| value.to_string())
}

/// `None` when the object lacks the study or series UID needed to place it.
pub fn extract_instance<T: ElementAccess>(obj: &T) -> Option<InstanceRecord> {
    let study_instance_uid = uid(obj, STUDY_INSTANCE_UID)?;
    let series_instance_uid = uid(obj, SERIES_INSTANCE_UID)?;
    let frames = obj
        .element_str(NUMBER_OF_FRAMES)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(1);

    Some(InstanceRecord {
        study_instance_uid,
        series_instance_uid,
        series_number: obj.attribute_value(SERIES_NUMBER),
        frames,
        study: collect(obj, STUDY_TAGS),
        series: collect(obj, SERIES_TAGS),
        instance: collect(obj, INSTANCE_TAGS),
    })
}

pub fn read_instance(path: &Path) -> Result<Option<InstanceRecord>> {
    let obj: DefaultDicomObject = open_file(path).context("Failed to open DICOM file")?;
    Ok(extract_instance(&obj))
}

struct SeriesGroup {
    series_number: Option<Value>,
    attributes: AttributeMap,
    frames: u32,
    images: Vec<Instance>,
}

/// Group instances into studies and one display set per series.
///
/// Studies come out ordered by UID; display sets follow their study, then series number.
pub fn group_instances(records: Vec<InstanceRecord>) -> HangingData {
    let mut studies: BTreeMap<String, (AttributeMap, BTreeMap<String, SeriesGroup>)> =
        BTreeMap::new();

    for record in records {
        let (study_attrs, series) = studies
            .entry(record.study_instance_uid.clone())
            .or_insert_with(|| (record.study.clone(), BTreeMap::new()));
        for (key, value) in record.study {
            study_attrs.entry(key).or_insert(value);
        }

        let group = series
            .entry(record.series_instance_uid.clone())
            .or_insert_with(|| SeriesGroup {
                series_number: record.series_number.clone(),
                attributes: record.series.clone(),
                frames: 0,
                images: Vec::new(),
            });
        group.frames += record.frames;
        group.images.push(Instance {
            attributes: record.instance,
        });
    }

    let mut data = HangingData::default();
    for (study_uid, (attributes, series)) in studies {
        let mut display_sets: Vec<DisplaySet> = series
            .into_iter()
            .map(|(series_uid, mut group)| {
                group.images.sort_by_key(instance_number);
                DisplaySet {
                    display_set_instance_uid: series_uid.clone(),
                    study_instance_uid: study_uid.clone(),
                    series_instance_uid: series_uid,
                    series_number: group.series_number,
                    num_image_frames: Some(group.frames),
                    images: group.images,
                    attributes: group.attributes,
                }
            })
            .collect();
        display_sets.sort_by_key(|ds| {
            (
                ds.series_number().unwrap_or(i64::MAX),
                ds.series_instance_uid.clone(),
            )
        });

        let summaries = display_sets
            .iter()
            .map(|ds| {
                let mut attributes = ds.attributes.clone();
                if let Some(number) = &ds.series_number {
                    attributes.insert("SeriesNumber".into(), number.clone());
                }
                Series {
                    series_instance_uid: ds.series_instance_uid.clone(),
                    attributes,
                }
            })
            .collect();

        data.studies.push(Study {
            study_instance_uid: study_uid,
            series: summaries,
            attributes,
        });
        data.display_sets.extend(display_sets);
    }
    data
}

fn instance_number(instance: &Instance) -> i64 {
    instance
        .attributes
        .get("InstanceNumber")
        .and_then(Value::as_str)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(i64::MAX)
}

/// Read every `*.dcm` file below `dir` and build the hanging input from their headers.
/// Files that cannot be read or placed are skipped with a warning.
pub fn load_directory(dir: &Path) -> Result<HangingData> {
    let files: Vec<PathBuf> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "dcm"))
        .map(|e| e.into_path())
        .collect();

    debug!(directory = ?dir, files = files.len(), "scanning DICOM files");

    let records: Vec<InstanceRecord> = files
        .par_iter()
        .filter_map(|path| match read_instance(path) {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                warn!(file = ?path, "Missing study/series UID, skipping");
                None
            }
            Err(e) => {
                warn!(file = ?path, error = %e, "Unreadable DICOM file, skipping");
                None
            }
        })
        .collect();

    Ok(group_instances(records))
}
