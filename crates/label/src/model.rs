use serde::{Deserialize, Serialize};

/// OCR backend that produced a scan.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Vision,
    Local,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Vision => "vision",
            EngineKind::Local => "local",
        }
    }
}

impl core::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which label image a piece of text was read from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelSide {
    Front,
    Back,
}

/// Location of an excerpt inside the raw label text.
///
/// `start`/`end` are byte offsets into the text of `side`; `line` is 0-based.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub side: LabelSide,
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

/// How a field value was obtained.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extraction {
    /// Returned as a schema field by the vision engine.
    VisionField,
    /// Matched by a token pattern (year, percentage, drink window).
    Pattern,
    /// Matched against a closed lookup table.
    Lexicon,
    /// Chosen as a prominent text line.
    ProminentLine,
    /// Derived from another accepted field (e.g. country from appellation).
    Inferred,
    /// Entered by the caller.
    Manual,
}

/// Audit trail for a single field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// `None` for manually entered values.
    pub engine: Option<EngineKind>,
    pub method: Extraction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<TextSpan>,
    /// The raw text the value was read from.
    pub excerpt: String,
}

impl Provenance {
    pub fn manual(excerpt: impl Into<String>) -> Self {
        Self {
            engine: None,
            method: Extraction::Manual,
            span: None,
            excerpt: excerpt.into(),
        }
    }
}

/// A field value together with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelField<T> {
    pub value: T,
    pub provenance: Provenance,
}

impl<T> LabelField<T> {
    pub fn new(value: T, provenance: Provenance) -> Self {
        Self { value, provenance }
    }

    pub fn manual(value: T, excerpt: impl Into<String>) -> Self {
        Self::new(value, Provenance::manual(excerpt))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LabelField<U> {
        LabelField {
            value: f(self.value),
            provenance: self.provenance,
        }
    }
}

/// Closed set of wine styles.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WineType {
    Red,
    White,
    Rose,
    Sparkling,
    Fortified,
    Dessert,
}

impl WineType {
    pub const ALL: [WineType; 6] = [
        WineType::Red,
        WineType::White,
        WineType::Rose,
        WineType::Sparkling,
        WineType::Fortified,
        WineType::Dessert,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WineType::Red => "red",
            WineType::White => "white",
            WineType::Rose => "rose",
            WineType::Sparkling => "sparkling",
            WineType::Fortified => "fortified",
            WineType::Dessert => "dessert",
        }
    }

    /// Parse a free-form value into the closed set.
    ///
    /// Accepts the canonical names plus a trailing "wine" and the accented
    /// spelling of rosé. Anything else is outside the set.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase().replace('é', "e");
        let key = lowered.strip_suffix(" wine").unwrap_or(&lowered).trim();
        WineType::ALL.into_iter().find(|t| t.as_str() == key)
    }
}

/// How the producer relates to the vineyard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerType {
    Estate,
    Negociant,
    Cooperative,
}

impl ProducerType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProducerType::Estate => "estate",
            ProducerType::Negociant => "negociant",
            ProducerType::Cooperative => "cooperative",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace('é', "e").as_str() {
            "estate" => Some(ProducerType::Estate),
            "negociant" => Some(ProducerType::Negociant),
            "cooperative" | "co-op" | "coop" => Some(ProducerType::Cooperative),
            _ => None,
        }
    }
}

/// Suggested drinking years (inclusive).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrinkWindow {
    pub start: i32,
    pub end: i32,
}

impl DrinkWindow {
    pub const EARLIEST: i32 = 2000;
    pub const LATEST: i32 = 2100;

    pub fn is_plausible(&self) -> bool {
        (Self::EARLIEST..=Self::LATEST).contains(&self.start)
            && (Self::EARLIEST..=Self::LATEST).contains(&self.end)
            && self.start <= self.end
    }

    /// Parse `"2025-2040"` (hyphen or en dash).
    pub fn parse(raw: &str) -> Option<Self> {
        let (start, end) = raw.split_once(['-', '–'])?;
        Some(Self {
            start: start.trim().parse().ok()?,
            end: end.trim().parse().ok()?,
        })
    }
}

impl core::fmt::Display for DrinkWindow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Names of the label fields, used when reporting dropped values.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    Name,
    Winery,
    Vintage,
    GrapeVariety,
    Region,
    SubRegion,
    Appellation,
    Country,
    Classification,
    AlcoholPercentage,
    WineType,
    ProducerType,
    DrinkWindow,
}

impl FieldName {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldName::Name => "name",
            FieldName::Winery => "winery",
            FieldName::Vintage => "vintage",
            FieldName::GrapeVariety => "grape_variety",
            FieldName::Region => "region",
            FieldName::SubRegion => "sub_region",
            FieldName::Appellation => "appellation",
            FieldName::Country => "country",
            FieldName::Classification => "classification",
            FieldName::AlcoholPercentage => "alcohol_percentage",
            FieldName::WineType => "wine_type",
            FieldName::ProducerType => "producer_type",
            FieldName::DrinkWindow => "drink_window",
        }
    }
}

impl core::fmt::Display for FieldName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a candidate value was set to null.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    OutOfRange,
    NotInClosedSet,
    Unparseable,
    Empty,
}

/// A candidate value that was rejected. The field itself stays null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedField {
    pub field: FieldName,
    pub raw: String,
    pub reason: DropReason,
    pub provenance: Provenance,
}

/// Structured wine-label fields. Every field is optional; null is a valid
/// state, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WineLabelData {
    pub name: Option<LabelField<String>>,
    pub winery: Option<LabelField<String>>,
    pub vintage: Option<LabelField<i32>>,
    pub grape_variety: Option<LabelField<String>>,
    pub region: Option<LabelField<String>>,
    pub sub_region: Option<LabelField<String>>,
    pub appellation: Option<LabelField<String>>,
    pub country: Option<LabelField<String>>,
    pub classification: Option<LabelField<String>>,
    pub alcohol_percentage: Option<LabelField<f64>>,
    pub wine_type: Option<LabelField<WineType>>,
    pub producer_type: Option<LabelField<ProducerType>>,
    pub drink_window: Option<LabelField<DrinkWindow>>,
}

fn prefer<T>(top: Option<LabelField<T>>, base: Option<LabelField<T>>) -> Option<LabelField<T>> {
    top.or(base)
}

impl WineLabelData {
    pub fn is_empty(&self) -> bool {
        *self == WineLabelData::default()
    }

    pub fn name_value(&self) -> Option<&str> {
        self.name.as_ref().map(|f| f.value.as_str())
    }

    /// Fields present in `top` replace the corresponding fields of `self`;
    /// fields absent from `top` keep their current value.
    pub fn overlay(self, top: WineLabelData) -> WineLabelData {
        WineLabelData {
            name: prefer(top.name, self.name),
            winery: prefer(top.winery, self.winery),
            vintage: prefer(top.vintage, self.vintage),
            grape_variety: prefer(top.grape_variety, self.grape_variety),
            region: prefer(top.region, self.region),
            sub_region: prefer(top.sub_region, self.sub_region),
            appellation: prefer(top.appellation, self.appellation),
            country: prefer(top.country, self.country),
            classification: prefer(top.classification, self.classification),
            alcohol_percentage: prefer(top.alcohol_percentage, self.alcohol_percentage),
            wine_type: prefer(top.wine_type, self.wine_type),
            producer_type: prefer(top.producer_type, self.producer_type),
            drink_window: prefer(top.drink_window, self.drink_window),
        }
    }
}
