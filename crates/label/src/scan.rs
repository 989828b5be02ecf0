//! OCR output as handed to the parser.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{EngineKind, WineLabelData};

/// Schema-shaped fields as returned by the vision engine.
///
/// Numeric fields are kept as raw JSON values: engines sometimes answer
/// `"2016"` or `"13.5%"` where a number was asked for, and the parser decides
/// what is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredLabel {
    pub name: Option<String>,
    pub winery: Option<String>,
    pub vintage: Option<Value>,
    pub grape_variety: Option<String>,
    pub region: Option<String>,
    pub sub_region: Option<String>,
    pub appellation: Option<String>,
    pub country: Option<String>,
    pub classification: Option<String>,
    pub alcohol_percentage: Option<Value>,
    pub wine_type: Option<String>,
    pub producer_type: Option<String>,
    pub drink_window: Option<String>,
    pub raw_text: Option<String>,
    pub back_label_text: Option<String>,
}

impl StructuredLabel {
    /// True when the engine returned neither a field nor any text.
    pub fn is_empty(&self) -> bool {
        !self.has_fields() && blank(&self.raw_text) && blank(&self.back_label_text)
    }

    /// True when at least one schema field (not the transcribed text) is set.
    pub fn has_fields(&self) -> bool {
        let blank_value = |v: &Option<Value>| matches!(v, None | Some(Value::Null));

        !(blank(&self.name)
            && blank(&self.winery)
            && blank_value(&self.vintage)
            && blank(&self.grape_variety)
            && blank(&self.region)
            && blank(&self.sub_region)
            && blank(&self.appellation)
            && blank(&self.country)
            && blank(&self.classification)
            && blank_value(&self.alcohol_percentage)
            && blank(&self.wine_type)
            && blank(&self.producer_type)
            && blank(&self.drink_window))
    }
}

fn blank(s: &Option<String>) -> bool {
    s.as_deref().is_none_or(|v| v.trim().is_empty())
}

impl From<&WineLabelData> for StructuredLabel {
    fn from(label: &WineLabelData) -> Self {
        let text = |f: &Option<crate::LabelField<String>>| f.as_ref().map(|f| f.value.clone());
        Self {
            name: text(&label.name),
            winery: text(&label.winery),
            vintage: label.vintage.as_ref().map(|f| Value::from(f.value)),
            grape_variety: text(&label.grape_variety),
            region: text(&label.region),
            sub_region: text(&label.sub_region),
            appellation: text(&label.appellation),
            country: text(&label.country),
            classification: text(&label.classification),
            alcohol_percentage: label
                .alcohol_percentage
                .as_ref()
                .map(|f| Value::from(f.value)),
            wine_type: label.wine_type.as_ref().map(|f| f.value.as_str().to_string()),
            producer_type: label
                .producer_type
                .as_ref()
                .map(|f| f.value.as_str().to_string()),
            drink_window: label.drink_window.as_ref().map(|f| f.value.to_string()),
            raw_text: None,
            back_label_text: None,
        }
    }
}

/// Result of one scan call. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub front_text: String,
    #[serde(default)]
    pub back_text: Option<String>,
    pub engine_used: EngineKind,
    /// Present only when the vision engine answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<StructuredLabel>,
}

impl ScanResult {
    pub fn local(front_text: impl Into<String>, back_text: Option<String>) -> Self {
        Self {
            front_text: front_text.into(),
            back_text,
            engine_used: EngineKind::Local,
            structured: None,
        }
    }

    /// Raw text comes from the structured payload when the engine supplied it.
    pub fn vision(structured: StructuredLabel) -> Self {
        Self {
            front_text: structured.raw_text.clone().unwrap_or_default(),
            back_text: structured.back_label_text.clone(),
            engine_used: EngineKind::Vision,
            structured: Some(structured),
        }
    }

    pub fn has_text(&self) -> bool {
        !self.front_text.trim().is_empty()
            || self.back_text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}
