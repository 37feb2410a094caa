use dicom::core::Tag;
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{DefaultDicomObject, InMemDicomObject};
use serde_json::Value;

/// Small helper trait to pull attribute values from different DICOM object shapes.
pub trait ElementAccess {
    fn element_str(&self, tag: Tag) -> Option<String>;

    /// Element as a JSON value: a string, or an array for multi-valued (backslash separated) text.
    fn attribute_value(&self, tag: Tag) -> Option<Value> {
        let text = self.element_str(tag)?;
        let text = text.trim_end_matches(['\0', ' ']);
        if text.is_empty() {
            return None;
        }
        if text.contains('\\') {
            let parts = text
                .split('\\')
                .map(|part| Value::from(part.trim()))
                .collect();
            return Some(Value::Array(parts));
        }
        Some(Value::from(text.trim()))
    }
}

impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.into_owned())
    }
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.into_owned())
    }
}
