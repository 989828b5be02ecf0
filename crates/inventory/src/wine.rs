use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use winebox_core::{Entity, WineId};
use winebox_label::{EngineKind, WineLabelData};

/// Shown when a wine has no name (e.g. checked in after a failed scan).
pub const UNKNOWN_WINE_NAME: &str = "Unknown Wine";

/// Catalog entry: identity plus the best-known label fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wine {
    pub id: WineId,
    pub label: WineLabelData,
    pub front_label_text: String,
    pub back_label_text: Option<String>,
    /// Engine of the most recent scan, if the wine was ever scanned.
    pub scan_engine: Option<EngineKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wine {
    pub fn new(label: WineLabelData, at: DateTime<Utc>) -> Self {
        Self::with_id(WineId::new(), label, at)
    }

    pub fn with_id(id: WineId, label: WineLabelData, at: DateTime<Utc>) -> Self {
        Self {
            id,
            label,
            front_label_text: String::new(),
            back_label_text: None,
            scan_engine: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn with_scan_text(
        mut self,
        front: impl Into<String>,
        back: Option<String>,
        engine: Option<EngineKind>,
    ) -> Self {
        self.front_label_text = front.into();
        self.back_label_text = back;
        self.scan_engine = engine;
        self
    }

    pub fn display_name(&self) -> &str {
        self.label.name_value().unwrap_or(UNKNOWN_WINE_NAME)
    }

    /// Replace stored fields with every non-null field of `scanned`.
    ///
    /// Identity and creation time never change.
    pub fn refine(&mut self, scanned: WineLabelData, at: DateTime<Utc>) {
        let current = core::mem::take(&mut self.label);
        self.label = current.overlay(scanned);
        self.updated_at = at;
    }
}

impl Entity for Wine {
    type Id = WineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winebox_label::LabelField;

    #[test]
    fn unnamed_wine_displays_placeholder() {
        let wine = Wine::new(WineLabelData::default(), Utc::now());
        assert_eq!(wine.display_name(), UNKNOWN_WINE_NAME);
    }

    #[test]
    fn refine_keeps_identity_and_unscanned_fields() {
        let created = Utc::now();
        let mut wine = Wine::new(
            WineLabelData {
                name: Some(LabelField::manual("Old Name".to_string(), "Old Name")),
                vintage: Some(LabelField::manual(2015, "2015")),
                ..Default::default()
            },
            created,
        );
        let id = wine.id;

        let later = created + chrono::Duration::seconds(5);
        wine.refine(
            WineLabelData {
                name: Some(LabelField::manual("New Name".to_string(), "New Name")),
                ..Default::default()
            },
            later,
        );

        assert_eq!(*wine.id(), id);
        assert_eq!(wine.display_name(), "New Name");
        assert_eq!(wine.label.vintage.as_ref().map(|v| v.value), Some(2015));
        assert_eq!(wine.created_at, created);
        assert_eq!(wine.updated_at, later);
    }
}
