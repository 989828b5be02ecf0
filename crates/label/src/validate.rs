//! Field-level validation and normalisation.
//!
//! Validation never fails. A value that breaks its field's rule is removed
//! from the label and reported in `dropped`; over-long text is truncated and
//! kept.

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::model::{DropReason, DroppedField, FieldName, LabelField, WineLabelData};

pub const EARLIEST_VINTAGE: i32 = 1900;

/// Character caps for free-text fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextLimits {
    pub name: usize,
    pub other: usize,
}

impl Default for TextLimits {
    fn default() -> Self {
        Self {
            name: 500,
            other: 200,
        }
    }
}

/// A validated label plus everything that was dropped to get there.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validation {
    pub label: WineLabelData,
    pub dropped: Vec<DroppedField>,
}

impl Validation {
    pub fn into_label(self) -> WineLabelData {
        self.label
    }
}

/// Trim, collapse internal whitespace and cap at `max_chars`.
///
/// Returns `None` when nothing but whitespace remains; the flag is `true`
/// when the value had to be truncated.
pub fn normalize_text(raw: &str, max_chars: usize) -> Option<(String, bool)> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    if collapsed.chars().count() <= max_chars {
        return Some((collapsed, false));
    }
    let capped: String = collapsed.chars().take(max_chars).collect();
    Some((capped.trim_end().to_string(), true))
}

#[derive(Debug, Clone, Copy)]
pub struct LabelValidator {
    current_year: i32,
    limits: TextLimits,
}

impl Default for LabelValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelValidator {
    pub fn new() -> Self {
        Self::with_current_year(chrono::Utc::now().year())
    }

    pub fn with_current_year(current_year: i32) -> Self {
        Self {
            current_year,
            limits: TextLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: TextLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }

    pub fn vintage_window(&self) -> core::ops::RangeInclusive<i32> {
        EARLIEST_VINTAGE..=self.current_year + 1
    }

    pub fn validate(&self, candidate: WineLabelData) -> Validation {
        let mut dropped = Vec::new();
        let limits = self.limits;

        let mut text = |field: FieldName, value: Option<LabelField<String>>, max: usize| {
            let f = value?;
            match normalize_text(&f.value, max) {
                Some((clean, truncated)) => {
                    if truncated {
                        tracing::debug!(field = %field, max, "label text truncated");
                    }
                    Some(LabelField::new(clean, f.provenance))
                }
                None => {
                    dropped.push(DroppedField {
                        field,
                        raw: f.value,
                        reason: DropReason::Empty,
                        provenance: f.provenance,
                    });
                    None
                }
            }
        };

        let name = text(FieldName::Name, candidate.name, limits.name);
        let winery = text(FieldName::Winery, candidate.winery, limits.other);
        let grape_variety = text(FieldName::GrapeVariety, candidate.grape_variety, limits.other);
        let region = text(FieldName::Region, candidate.region, limits.other);
        let sub_region = text(FieldName::SubRegion, candidate.sub_region, limits.other);
        let appellation = text(FieldName::Appellation, candidate.appellation, limits.other);
        let country = text(FieldName::Country, candidate.country, limits.other);
        let classification =
            text(FieldName::Classification, candidate.classification, limits.other);

        let window = self.vintage_window();
        let vintage = keep_if(
            candidate.vintage,
            |v| window.contains(v),
            FieldName::Vintage,
            &mut dropped,
        );
        let alcohol_percentage = keep_if(
            candidate.alcohol_percentage,
            |a| a.is_finite() && (0.0..=100.0).contains(a),
            FieldName::AlcoholPercentage,
            &mut dropped,
        );
        let drink_window = keep_if(
            candidate.drink_window,
            |w| w.is_plausible(),
            FieldName::DrinkWindow,
            &mut dropped,
        );

        Validation {
            label: WineLabelData {
                name,
                winery,
                vintage,
                grape_variety,
                region,
                sub_region,
                appellation,
                country,
                classification,
                alcohol_percentage,
                wine_type: candidate.wine_type,
                producer_type: candidate.producer_type,
                drink_window,
            },
            dropped,
        }
    }
}

fn keep_if<T: core::fmt::Display>(
    value: Option<LabelField<T>>,
    ok: impl FnOnce(&T) -> bool,
    field: FieldName,
    dropped: &mut Vec<DroppedField>,
) -> Option<LabelField<T>> {
    let f = value?;
    if ok(&f.value) {
        return Some(f);
    }
    tracing::debug!(field = %field, value = %f.value, "label field out of range; dropped");
    dropped.push(DroppedField {
        field,
        raw: f.value.to_string(),
        reason: DropReason::OutOfRange,
        provenance: f.provenance,
    });
    None
}
