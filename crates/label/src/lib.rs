//! Wine label parsing and field validation.
//!
//! Turns OCR output (`ScanResult`) into candidate `WineLabelData`, then
//! enforces per-field domain constraints. Nothing here raises on malformed
//! input: rejected values are dropped to null and reported alongside the
//! accepted fields.

pub mod extract;
pub mod lexicon;
pub mod model;
pub mod parser;
pub mod scan;
pub mod validate;

pub use extract::{Extracted, TextExtractor};
pub use model::{
    DropReason, DrinkWindow, DroppedField, EngineKind, Extraction, FieldName, LabelField,
    LabelSide, ProducerType, Provenance, TextSpan, WineLabelData, WineType,
};
pub use parser::{LabelParser, ParseOutcome};
pub use scan::{ScanResult, StructuredLabel};
pub use validate::{normalize_text, LabelValidator, TextLimits, Validation};
