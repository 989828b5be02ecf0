//! Closed lookup tables used by the unstructured extractor.
//!
//! Each table compiles into one alternation regex (longest alias first, so
//! "Cabernet Sauvignon" wins over "Sauvignon" at the same position). Matching
//! tolerates missing accents, case, and hyphen/space variation.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::model::{ProducerType, WineType};

/// Anything that can be looked up by one of several spellings.
pub trait Term: Sync + 'static {
    fn aliases(&self) -> &'static [&'static str];
}

/// A match of a table term inside a piece of text.
#[derive(Debug)]
pub struct Hit<T: 'static> {
    pub term: &'static T,
    pub start: usize,
    pub end: usize,
}

pub struct Lexicon<T: Term> {
    terms: &'static [T],
    pattern: Regex,
    by_key: HashMap<String, usize>,
}

impl<T: Term> Lexicon<T> {
    pub fn new(terms: &'static [T], case_insensitive: bool) -> Result<Self, regex::Error> {
        let mut aliases: Vec<(&'static str, usize)> = terms
            .iter()
            .enumerate()
            .flat_map(|(idx, t)| t.aliases().iter().map(move |a| (*a, idx)))
            .collect();
        aliases.sort_by_key(|(a, _)| core::cmp::Reverse(a.chars().count()));

        let by_key = aliases.iter().map(|(a, idx)| (fold(a), *idx)).collect();
        let alternation = aliases
            .iter()
            .map(|(a, _)| alias_pattern(a))
            .collect::<Vec<_>>()
            .join("|");

        let pattern = RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
            .case_insensitive(case_insensitive)
            .build()?;

        Ok(Self {
            terms,
            pattern,
            by_key,
        })
    }

    /// All non-overlapping hits in reading order.
    pub fn find_all(&self, text: &str) -> Vec<Hit<T>> {
        self.pattern
            .find_iter(text)
            .filter_map(|m| {
                let idx = *self.by_key.get(&fold(m.as_str()))?;
                Some(Hit {
                    term: &self.terms[idx],
                    start: m.start(),
                    end: m.end(),
                })
            })
            .collect()
    }

    /// Resolve a free-form value (e.g. a vision field) to its table entry.
    pub fn lookup(&self, value: &str) -> Option<&'static T> {
        self.by_key.get(&fold(value)).map(|idx| &self.terms[*idx])
    }
}

/// Lowercase, strip accents and apostrophes, treat hyphens as spaces.
pub fn fold(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for ch in s.chars() {
        let mapped: &str = match ch {
            '\'' | '’' | '.' => continue,
            '-' | '–' => " ",
            'à' | 'á' | 'â' | 'ä' | 'À' | 'Á' | 'Â' | 'Ä' => "a",
            'ç' | 'Ç' => "c",
            'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => "e",
            'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => "i",
            'ñ' | 'Ñ' => "n",
            'ò' | 'ó' | 'ô' | 'ö' | 'Ò' | 'Ó' | 'Ô' | 'Ö' => "o",
            'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => "u",
            'ß' => "ss",
            c if c.is_whitespace() => " ",
            _ => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.extend(ch.to_lowercase());
                continue;
            }
        };
        if mapped == " " {
            pending_space = true;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push_str(mapped);
        }
    }
    out
}

fn alias_pattern(alias: &str) -> String {
    let mut out = String::new();
    for ch in alias.chars() {
        match ch {
            ' ' | '-' => out.push_str(r"[\s\-–]+"),
            '\'' | '’' => out.push_str("['’]?"),
            '.' => out.push_str(r"\.?"),
            'a' | 'à' | 'á' | 'â' | 'ä' => out.push_str("[aàáâä]"),
            'c' | 'ç' => out.push_str("[cç]"),
            'e' | 'è' | 'é' | 'ê' | 'ë' => out.push_str("[eèéêë]"),
            'i' | 'ì' | 'í' | 'î' | 'ï' => out.push_str("[iìíîï]"),
            'n' | 'ñ' => out.push_str("[nñ]"),
            'o' | 'ò' | 'ó' | 'ô' | 'ö' => out.push_str("[oòóôö]"),
            'u' | 'ù' | 'ú' | 'û' | 'ü' => out.push_str("[uùúûü]"),
            'ß' => out.push_str("(?:ß|ss)"),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Grapes
// ---------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GrapeColour {
    Red,
    White,
}

#[derive(Debug)]
pub struct Grape {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub colour: GrapeColour,
}

impl Term for Grape {
    fn aliases(&self) -> &'static [&'static str] {
        self.aliases
    }
}

macro_rules! grape {
    ($name:literal, $colour:ident $(, $alias:literal)*) => {
        Grape {
            name: $name,
            aliases: &[$name $(, $alias)*],
            colour: GrapeColour::$colour,
        }
    };
}

pub static GRAPES: &[Grape] = &[
    grape!("Cabernet Sauvignon", Red),
    grape!("Cabernet Franc", Red),
    grape!("Merlot", Red),
    grape!("Pinot Noir", Red, "Spätburgunder"),
    grape!("Syrah", Red),
    grape!("Shiraz", Red),
    grape!("Grenache", Red, "Garnacha", "Cannonau"),
    grape!("Tempranillo", Red, "Tinta Roriz"),
    grape!("Sangiovese", Red),
    grape!("Nebbiolo", Red),
    grape!("Malbec", Red),
    grape!("Zinfandel", Red),
    grape!("Primitivo", Red),
    grape!("Petit Verdot", Red),
    grape!("Petite Sirah", Red),
    grape!("Mourvèdre", Red, "Monastrell"),
    grape!("Carménère", Red),
    grape!("Carignan", Red, "Cariñena"),
    grape!("Barbera", Red),
    grape!("Dolcetto", Red),
    grape!("Gamay", Red),
    grape!("Pinotage", Red),
    grape!("Montepulciano", Red),
    grape!("Aglianico", Red),
    grape!("Corvina", Red),
    grape!("Nero d'Avola", Red),
    grape!("Touriga Nacional", Red),
    grape!("Blaufränkisch", Red),
    grape!("Chardonnay", White),
    grape!("Sauvignon Blanc", White),
    grape!("Riesling", White),
    grape!("Pinot Grigio", White),
    grape!("Pinot Gris", White),
    grape!("Pinot Blanc", White),
    grape!("Gewürztraminer", White),
    grape!("Chenin Blanc", White),
    grape!("Sémillon", White),
    grape!("Viognier", White),
    grape!("Grüner Veltliner", White),
    grape!("Albariño", White, "Alvarinho"),
    grape!("Verdejo", White),
    grape!("Godello", White),
    grape!("Melon de Bourgogne", White),
    grape!("Muscat", White, "Moscato", "Moscatel"),
    grape!("Marsanne", White),
    grape!("Roussanne", White),
    grape!("Vermentino", White),
    grape!("Torrontés", White),
    grape!("Garganega", White),
    grape!("Trebbiano", White),
    grape!("Glera", White),
    grape!("Fiano", White),
    grape!("Assyrtiko", White),
    grape!("Furmint", White),
    grape!("Grenache Blanc", White),
];

// ---------------------------------------------------------------------------
// Geography
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Country {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

impl Term for Country {
    fn aliases(&self) -> &'static [&'static str] {
        self.aliases
    }
}

pub static COUNTRIES: &[Country] = &[
    Country { name: "France", aliases: &["France"] },
    Country { name: "Italy", aliases: &["Italy", "Italia"] },
    Country { name: "Spain", aliases: &["Spain", "España"] },
    Country { name: "Portugal", aliases: &["Portugal"] },
    Country { name: "Germany", aliases: &["Germany", "Deutschland"] },
    Country { name: "Austria", aliases: &["Austria", "Österreich"] },
    Country {
        name: "United States",
        aliases: &["United States", "United States of America", "USA"],
    },
    Country { name: "Australia", aliases: &["Australia"] },
    Country { name: "New Zealand", aliases: &["New Zealand"] },
    Country { name: "Argentina", aliases: &["Argentina"] },
    Country { name: "Chile", aliases: &["Chile"] },
    Country { name: "South Africa", aliases: &["South Africa"] },
    Country { name: "Greece", aliases: &["Greece"] },
    Country { name: "Hungary", aliases: &["Hungary"] },
    Country { name: "Canada", aliases: &["Canada"] },
    Country { name: "Lebanon", aliases: &["Lebanon"] },
    Country { name: "Uruguay", aliases: &["Uruguay"] },
];

/// A region or sub-region, with what it implies higher up.
#[derive(Debug)]
pub struct Place {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// Parent region for sub-regions.
    pub region: Option<&'static str>,
    pub country: &'static str,
}

impl Term for Place {
    fn aliases(&self) -> &'static [&'static str] {
        self.aliases
    }
}

macro_rules! place {
    ($name:literal, $country:literal $(, $alias:literal)*) => {
        Place { name: $name, aliases: &[$name $(, $alias)*], region: None, country: $country }
    };
    ($name:literal in $region:literal, $country:literal $(, $alias:literal)*) => {
        Place { name: $name, aliases: &[$name $(, $alias)*], region: Some($region), country: $country }
    };
}

pub static REGIONS: &[Place] = &[
    place!("Bordeaux", "France"),
    place!("Burgundy", "France", "Bourgogne"),
    place!("Champagne", "France"),
    place!("Rhône", "France", "Rhône Valley", "Côtes du Rhône"),
    place!("Loire", "France", "Loire Valley", "Val de Loire"),
    place!("Alsace", "France"),
    place!("Provence", "France"),
    place!("Languedoc", "France", "Languedoc-Roussillon"),
    place!("Beaujolais", "France"),
    place!("Tuscany", "Italy", "Toscana"),
    place!("Piedmont", "Italy", "Piemonte"),
    place!("Veneto", "Italy"),
    place!("Sicily", "Italy", "Sicilia"),
    place!("Rioja", "Spain"),
    place!("Ribera del Duero", "Spain"),
    place!("Priorat", "Spain"),
    place!("Rías Baixas", "Spain"),
    place!("Douro", "Portugal"),
    place!("Mosel", "Germany"),
    place!("Rheingau", "Germany"),
    place!("Pfalz", "Germany"),
    place!("Wachau", "Austria"),
    place!("California", "United States"),
    place!("Oregon", "United States"),
    place!("Barossa Valley", "Australia"),
    place!("McLaren Vale", "Australia"),
    place!("Marlborough", "New Zealand"),
    place!("Mendoza", "Argentina"),
    place!("Stellenbosch", "South Africa"),
];

pub static SUB_REGIONS: &[Place] = &[
    place!("Médoc" in "Bordeaux", "France"),
    place!("Haut-Médoc" in "Bordeaux", "France"),
    place!("Graves" in "Bordeaux", "France"),
    place!("Côte de Nuits" in "Burgundy", "France"),
    place!("Côte de Beaune" in "Burgundy", "France"),
    place!("Northern Rhône" in "Rhône", "France"),
    place!("Southern Rhône" in "Rhône", "France"),
    place!("Napa Valley" in "California", "United States", "Napa"),
    place!("Sonoma County" in "California", "United States", "Sonoma"),
    place!("Willamette Valley" in "Oregon", "United States"),
    place!("Maipo Valley" in "Central Valley", "Chile", "Valle del Maipo"),
];

#[derive(Debug)]
pub struct Appellation {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub region: &'static str,
    pub sub_region: Option<&'static str>,
    pub country: &'static str,
}

impl Term for Appellation {
    fn aliases(&self) -> &'static [&'static str] {
        self.aliases
    }
}

macro_rules! appellation {
    ($name:literal, $region:literal, $country:literal $(, $alias:literal)*) => {
        Appellation { name: $name, aliases: &[$name $(, $alias)*], region: $region, sub_region: None, country: $country }
    };
    ($name:literal, $region:literal / $sub:literal, $country:literal $(, $alias:literal)*) => {
        Appellation { name: $name, aliases: &[$name $(, $alias)*], region: $region, sub_region: Some($sub), country: $country }
    };
}

pub static APPELLATIONS: &[Appellation] = &[
    appellation!("Margaux", "Bordeaux" / "Médoc", "France"),
    appellation!("Pauillac", "Bordeaux" / "Médoc", "France"),
    appellation!("Saint-Julien", "Bordeaux" / "Médoc", "France", "St-Julien"),
    appellation!("Saint-Estèphe", "Bordeaux" / "Médoc", "France", "St-Estèphe"),
    appellation!("Pessac-Léognan", "Bordeaux" / "Graves", "France"),
    appellation!("Sauternes", "Bordeaux" / "Graves", "France"),
    appellation!("Pomerol", "Bordeaux", "France"),
    appellation!("Saint-Émilion", "Bordeaux", "France", "St-Émilion"),
    appellation!("Chablis", "Burgundy", "France"),
    appellation!("Gevrey-Chambertin", "Burgundy" / "Côte de Nuits", "France"),
    appellation!("Vosne-Romanée", "Burgundy" / "Côte de Nuits", "France"),
    appellation!("Meursault", "Burgundy" / "Côte de Beaune", "France"),
    appellation!("Puligny-Montrachet", "Burgundy" / "Côte de Beaune", "France"),
    appellation!("Châteauneuf-du-Pape", "Rhône" / "Southern Rhône", "France"),
    appellation!("Côte-Rôtie", "Rhône" / "Northern Rhône", "France"),
    appellation!("Hermitage", "Rhône" / "Northern Rhône", "France"),
    appellation!("Sancerre", "Loire", "France"),
    appellation!("Chianti Classico", "Tuscany", "Italy"),
    appellation!("Chianti", "Tuscany", "Italy"),
    appellation!("Brunello di Montalcino", "Tuscany", "Italy"),
    appellation!("Bolgheri", "Tuscany", "Italy"),
    appellation!("Barolo", "Piedmont", "Italy"),
    appellation!("Barbaresco", "Piedmont", "Italy"),
    appellation!("Amarone della Valpolicella", "Veneto", "Italy"),
    appellation!("Prosecco", "Veneto", "Italy"),
    appellation!("Oakville", "California" / "Napa Valley", "United States"),
    appellation!("Rutherford", "California" / "Napa Valley", "United States"),
];

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Classification {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

impl Term for Classification {
    fn aliases(&self) -> &'static [&'static str] {
        self.aliases
    }
}

macro_rules! tier {
    ($name:literal $(, $alias:literal)*) => {
        Classification { name: $name, aliases: &[$name $(, $alias)*] }
    };
}

/// Quality-tier phrases, matched case-insensitively.
pub static CLASSIFICATIONS: &[Classification] = &[
    tier!("Premier Grand Cru Classé", "1er Grand Cru Classé"),
    tier!("Grand Cru Classé"),
    tier!("Cru Classé"),
    tier!("Grand Cru"),
    tier!("Premier Cru", "1er Cru"),
    tier!("Cru Bourgeois"),
    tier!("Gran Reserva"),
    tier!("Reserva"),
    tier!("Crianza"),
    tier!("Riserva"),
    tier!("Gran Selezione"),
    tier!("Kabinett"),
    tier!("Spätlese"),
    tier!("Auslese"),
    tier!("Beerenauslese"),
    tier!("Trockenbeerenauslese"),
    tier!("Eiswein"),
    tier!("Grosses Gewächs", "Großes Gewächs"),
];

/// Regional abbreviations. Matched case-sensitively so that "do" or "doc"
/// inside prose does not count.
pub static CLASSIFICATION_ABBREVIATIONS: &[Classification] = &[
    tier!("AOC", "A.O.C."),
    tier!("AOP", "A.O.P."),
    tier!("DOCG", "D.O.C.G."),
    tier!("DOCa", "DOCA"),
    tier!("DOC", "D.O.C."),
    tier!("DOQ"),
    tier!("DO", "D.O."),
    tier!("IGT"),
    tier!("IGP"),
    tier!("GG"),
    tier!("VDP"),
];

// ---------------------------------------------------------------------------
// Wine type and producer indicators
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Indicator<V: 'static> {
    pub value: V,
    pub aliases: &'static [&'static str],
}

impl<V: Sync + 'static> Term for Indicator<V> {
    fn aliases(&self) -> &'static [&'static str] {
        self.aliases
    }
}

/// Checked in table order: the first style with any hit wins.
pub static WINE_TYPE_INDICATORS: &[Indicator<WineType>] = &[
    Indicator {
        value: WineType::Sparkling,
        aliases: &[
            "sparkling", "champagne", "crémant", "cava", "prosecco", "spumante", "sekt",
            "brut", "méthode traditionnelle", "méthode champenoise",
        ],
    },
    Indicator {
        value: WineType::Rose,
        aliases: &["rosé", "rosado", "rosato"],
    },
    Indicator {
        value: WineType::Fortified,
        aliases: &["port", "porto", "sherry", "jerez", "madeira", "marsala", "fortified", "vin doux naturel"],
    },
    Indicator {
        value: WineType::Dessert,
        aliases: &[
            "dessert wine", "late harvest", "vendanges tardives", "ice wine", "icewine",
            "eiswein", "sauternes", "tokaji", "beerenauslese", "trockenbeerenauslese",
        ],
    },
    Indicator {
        value: WineType::Red,
        aliases: &["red wine", "vin rouge", "vino rosso", "vino tinto", "rotwein"],
    },
    Indicator {
        value: WineType::White,
        aliases: &["white wine", "vin blanc", "vino bianco", "vino blanco", "weisswein", "weißwein"],
    },
];

/// Checked in table order so "estate bottled" wins over "bottled by".
pub static PRODUCER_INDICATORS: &[Indicator<ProducerType>] = &[
    Indicator {
        value: ProducerType::Estate,
        aliases: &[
            "estate bottled", "estate grown", "estate produced",
            "mis en bouteille au château", "mis en bouteille au domaine",
            "mis en bouteille à la propriété", "erzeugerabfüllung", "gutsabfüllung",
            "imbottigliato all'origine", "imbottigliato dal produttore",
        ],
    },
    Indicator {
        value: ProducerType::Negociant,
        aliases: &["négociant", "négociant-éleveur", "selected by", "bottled by", "mis en bouteille par", "élevé par"],
    },
    Indicator {
        value: ProducerType::Cooperative,
        aliases: &["cooperative", "coopérative", "cave coopérative", "cantina sociale", "bodega cooperativa"],
    },
];

fn compile<T: Term>(terms: &'static [T], case_insensitive: bool) -> Lexicon<T> {
    Lexicon::new(terms, case_insensitive).expect("static lexicon")
}

pub static GRAPE_LEXICON: Lazy<Lexicon<Grape>> = Lazy::new(|| compile(GRAPES, true));
pub static COUNTRY_LEXICON: Lazy<Lexicon<Country>> = Lazy::new(|| compile(COUNTRIES, true));
pub static REGION_LEXICON: Lazy<Lexicon<Place>> = Lazy::new(|| compile(REGIONS, true));
pub static SUB_REGION_LEXICON: Lazy<Lexicon<Place>> = Lazy::new(|| compile(SUB_REGIONS, true));
pub static APPELLATION_LEXICON: Lazy<Lexicon<Appellation>> =
    Lazy::new(|| compile(APPELLATIONS, true));
pub static CLASSIFICATION_LEXICON: Lazy<Lexicon<Classification>> =
    Lazy::new(|| compile(CLASSIFICATIONS, true));
pub static ABBREVIATION_LEXICON: Lazy<Lexicon<Classification>> =
    Lazy::new(|| compile(CLASSIFICATION_ABBREVIATIONS, false));

/// One lexicon per indicator row, so table order can act as priority.
pub static WINE_TYPE_LEXICONS: Lazy<Vec<(WineType, Lexicon<Indicator<WineType>>)>> =
    Lazy::new(|| {
        WINE_TYPE_INDICATORS
            .iter()
            .map(|row| (row.value, compile(core::slice::from_ref(row), true)))
            .collect()
    });

pub static PRODUCER_LEXICONS: Lazy<Vec<(ProducerType, Lexicon<Indicator<ProducerType>>)>> =
    Lazy::new(|| {
        PRODUCER_INDICATORS
            .iter()
            .map(|row| (row.value, compile(core::slice::from_ref(row), true)))
            .collect()
    });
