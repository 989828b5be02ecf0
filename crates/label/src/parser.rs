//! Scan output to validated label fields.

use chrono::Datelike;
use serde::Serialize;
use serde_json::Value;

use crate::extract::TextExtractor;
use crate::lexicon::{COUNTRY_LEXICON, REGION_LEXICON};
use crate::model::{
    DrinkWindow, DropReason, DroppedField, Extraction, FieldName, LabelField, LabelSide,
    ProducerType, Provenance, TextSpan, WineLabelData, WineType,
};
use crate::scan::{ScanResult, StructuredLabel};
use crate::validate::LabelValidator;

/// Everything a parse produced. Partial success is the normal case.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseOutcome {
    pub label: WineLabelData,
    pub dropped: Vec<DroppedField>,
    pub front_text: String,
    pub back_text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LabelParser {
    validator: LabelValidator,
}

impl LabelParser {
    pub fn new() -> Self {
        Self::with_current_year(chrono::Utc::now().year())
    }

    pub fn with_current_year(current_year: i32) -> Self {
        Self {
            validator: LabelValidator::with_current_year(current_year),
        }
    }

    pub fn with_validator(validator: LabelValidator) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &LabelValidator {
        &self.validator
    }

    /// Parse a scan. Never fails; the worst case is an all-null label with
    /// the raw text preserved.
    ///
    /// A vision answer with only transcribed text goes through the text
    /// heuristics like a local scan.
    pub fn parse(&self, scan: &ScanResult) -> ParseOutcome {
        let structured = scan.structured.as_ref().filter(|s| s.has_fields());
        let (candidate, mut dropped) = match structured {
            Some(structured) => structured_candidate(scan, structured),
            None => {
                let out = TextExtractor::new(self.validator.current_year()).extract(
                    &scan.front_text,
                    scan.back_text.as_deref(),
                    scan.engine_used,
                );
                (out.label, out.dropped)
            }
        };

        let validation = self.validator.validate(candidate);
        dropped.extend(validation.dropped);

        tracing::debug!(
            engine = %scan.engine_used,
            structured = structured.is_some(),
            dropped = dropped.len(),
            "label parsed"
        );

        ParseOutcome {
            label: validation.label,
            dropped,
            front_text: scan.front_text.clone(),
            back_text: scan.back_text.clone(),
        }
    }
}

/// Converts schema fields into typed candidates. Absent fields stay null;
/// nothing is re-extracted from the raw text.
fn structured_candidate(
    scan: &ScanResult,
    s: &StructuredLabel,
) -> (WineLabelData, Vec<DroppedField>) {
    let mut reader = FieldReader {
        scan,
        dropped: Vec::new(),
    };

    let label = WineLabelData {
        name: reader.text(&s.name),
        winery: reader.text(&s.winery),
        vintage: reader.typed(
            FieldName::Vintage,
            s.vintage.as_ref().and_then(value_text),
            parse_year,
            DropReason::Unparseable,
        ),
        grape_variety: reader.text(&s.grape_variety),
        region: reader.text(&s.region),
        sub_region: reader.text(&s.sub_region),
        appellation: reader.text(&s.appellation),
        country: reader.text(&s.country).map(|f| f.map(canonical_country)),
        classification: reader.text(&s.classification),
        alcohol_percentage: reader.typed(
            FieldName::AlcoholPercentage,
            s.alcohol_percentage.as_ref().and_then(value_text),
            parse_percentage,
            DropReason::Unparseable,
        ),
        wine_type: reader.typed(
            FieldName::WineType,
            s.wine_type.clone(),
            WineType::parse,
            DropReason::NotInClosedSet,
        ),
        producer_type: reader.typed(
            FieldName::ProducerType,
            s.producer_type.clone(),
            ProducerType::parse,
            DropReason::NotInClosedSet,
        ),
        drink_window: reader.typed(
            FieldName::DrinkWindow,
            s.drink_window.clone(),
            DrinkWindow::parse,
            DropReason::Unparseable,
        ),
    };

    (label, reader.dropped)
}

struct FieldReader<'a> {
    scan: &'a ScanResult,
    dropped: Vec<DroppedField>,
}

impl FieldReader<'_> {
    fn provenance(&self, excerpt: &str) -> Provenance {
        Provenance {
            engine: Some(self.scan.engine_used),
            method: Extraction::VisionField,
            span: locate(self.scan, excerpt),
            excerpt: excerpt.to_string(),
        }
    }

    fn text(&self, value: &Option<String>) -> Option<LabelField<String>> {
        let raw = value.as_deref()?;
        Some(LabelField::new(raw.to_string(), self.provenance(raw)))
    }

    fn typed<T>(
        &mut self,
        field: FieldName,
        raw: Option<String>,
        parse: impl FnOnce(&str) -> Option<T>,
        reason: DropReason,
    ) -> Option<LabelField<T>> {
        let raw = raw.filter(|r| !r.trim().is_empty())?;
        let provenance = self.provenance(&raw);
        match parse(&raw) {
            Some(value) => Some(LabelField::new(value, provenance)),
            None => {
                self.dropped.push(DroppedField {
                    field,
                    raw,
                    reason,
                    provenance,
                });
                None
            }
        }
    }
}

/// Render a JSON scalar as the text the engine "read". Null and containers
/// yield nothing.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn parse_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if let Ok(year) = raw.parse::<i32>() {
        return Some(year);
    }
    // "2016.0" from engines that emit floats
    let float = raw.parse::<f64>().ok()?;
    (float.fract() == 0.0 && float.abs() < 10_000.0).then_some(float as i32)
}

fn parse_percentage(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().trim_end_matches('%').trim().replace(',', ".");
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Known country aliases map to one spelling; US states map to the country.
fn canonical_country(raw: String) -> String {
    if let Some(country) = COUNTRY_LEXICON.lookup(&raw) {
        return country.name.to_string();
    }
    match REGION_LEXICON.lookup(&raw) {
        Some(region) => region.country.to_string(),
        None => raw,
    }
}

fn locate(scan: &ScanResult, needle: &str) -> Option<TextSpan> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    let sides = [
        (LabelSide::Front, Some(scan.front_text.as_str())),
        (LabelSide::Back, scan.back_text.as_deref()),
    ];
    sides.into_iter().find_map(|(side, text)| {
        let text = text?;
        let start = text.find(needle)?;
        Some(TextSpan {
            side,
            line: text[..start].matches('\n').count(),
            start,
            end: start + needle.len(),
        })
    })
}
