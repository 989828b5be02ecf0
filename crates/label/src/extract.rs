//! Pattern extraction over unstructured label text.
//!
//! Every extractor collects candidates in reading order (front label first,
//! then back, top to bottom) with a cue strength. The winner is the candidate
//! with the strongest cue; ties go to the earliest one.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::lexicon::{
    self, fold, Appellation, GrapeColour, Place, ABBREVIATION_LEXICON, APPELLATION_LEXICON,
    CLASSIFICATION_LEXICON, COUNTRY_LEXICON, GRAPE_LEXICON, PRODUCER_LEXICONS, REGION_LEXICON,
    SUB_REGION_LEXICON, WINE_TYPE_LEXICONS,
};
use crate::model::{
    DrinkWindow, DropReason, DroppedField, EngineKind, Extraction, FieldName, LabelField,
    LabelSide, Provenance, TextSpan, WineLabelData, WineType,
};

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})\b").expect("static regex"));

static VINTAGE_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:vintage|mill[ée]sime|annata|cosecha|jahrgang|ernte)\b")
        .expect("static regex")
});

static FOUNDING_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:since|est|established|founded|fond[ée]e?|depuis|dal|seit|anno)\.?\s*$")
        .expect("static regex")
});

static PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,3}(?:[.,]\d{1,2})?)\s*%").expect("static regex"));

static ALCOHOL_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:alc|alcohol|alcool|alkohol|vol|abv)\b").expect("static regex")
});

static DRINK_WINDOW: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)\b(?:drink|best|optimal|drinking|enjoy)(?:\s+now)?[:\s]+(\d{4})\s*[-–]\s*(\d{4})")
            .expect("static regex"),
        Regex::new(r"(?i)\b(\d{4})\s*[-–]\s*(\d{4})\s*(?:drinking|drink)\b").expect("static regex"),
    ]
});

static APPELLATION_CONTROLEE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bappellation\s+(?:[\p{L}'’\-]+\s+){1,4}contr[oô]l[ée]e\b")
        .expect("static regex")
});

static APPELLATION_PROTEGEE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bappellation\s+d['’]?\s*origine\s+prot[ée]g[ée]e\b").expect("static regex")
});

static BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:product of|produce of|produced by|produced and bottled|bottled by|imported by|distributed by|contains sulfites|contient des sulfites|government warning|mis en bouteille|estate bottled|alc|abv|ml|cl|www|https?)\b",
    )
    .expect("static regex")
});

static GENERIC_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:grand vin|vin de france|red wine|white wine|table wine|wine|vin|vino|wein|\d{4})\b")
        .expect("static regex")
});

const MIN_NAME_LINE: usize = 3;
const MAX_NAME_LINE: usize = 60;

/// A trimmed line of label text and where it sits.
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    side: LabelSide,
    /// Index within its side (0-based, counting blank lines).
    index: usize,
    /// Byte offset of `text` within the side's raw text.
    offset: usize,
    text: &'a str,
}

fn split_lines<'a>(sides: &[(LabelSide, &'a str)]) -> Vec<Line<'a>> {
    let mut out = Vec::new();
    for (side, raw) in sides {
        let mut offset = 0;
        for (index, piece) in raw.split('\n').enumerate() {
            let lead = piece.len() - piece.trim_start().len();
            let text = piece.trim();
            if !text.is_empty() {
                out.push(Line {
                    side: *side,
                    index,
                    offset: offset + lead,
                    text,
                });
            }
            offset += piece.len() + 1;
        }
    }
    out
}

struct Candidate<T> {
    value: T,
    cue: u8,
    method: Extraction,
    span: TextSpan,
    excerpt: String,
}

impl<T> Candidate<T> {
    fn at(line: &Line<'_>, start: usize, end: usize, value: T, cue: u8, method: Extraction) -> Self {
        Self {
            value,
            cue,
            method,
            span: TextSpan {
                side: line.side,
                line: line.index,
                start: line.offset + start,
                end: line.offset + end,
            },
            excerpt: line.text[start..end].to_string(),
        }
    }

    fn provenance(&self, engine: EngineKind) -> Provenance {
        Provenance {
            engine: Some(engine),
            method: self.method,
            span: Some(self.span),
            excerpt: self.excerpt.clone(),
        }
    }

    fn into_field(self, engine: EngineKind) -> LabelField<T> {
        let provenance = self.provenance(engine);
        LabelField::new(self.value, provenance)
    }

    /// Same source span, different value (used for inferred fields).
    fn derive<U>(&self, value: U) -> Candidate<U> {
        Candidate {
            value,
            cue: self.cue,
            method: Extraction::Inferred,
            span: self.span,
            excerpt: self.excerpt.clone(),
        }
    }
}

/// Strongest cue wins; the first candidate in reading order breaks ties.
fn best<T>(candidates: impl IntoIterator<Item = Candidate<T>>) -> Option<Candidate<T>> {
    candidates.into_iter().fold(None, |acc, c| match acc {
        Some(a) if a.cue >= c.cue => Some(a),
        _ => Some(c),
    })
}

fn side_cue(line: &Line<'_>) -> u8 {
    u8::from(line.side == LabelSide::Front)
}

/// Fields pulled out of raw text, plus the candidates rejected on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub label: WineLabelData,
    pub dropped: Vec<DroppedField>,
}

/// Heuristic field extraction for text-only scans.
#[derive(Debug, Clone, Copy)]
pub struct TextExtractor {
    current_year: i32,
}

impl TextExtractor {
    pub fn new(current_year: i32) -> Self {
        Self { current_year }
    }

    pub fn extract(&self, front: &str, back: Option<&str>, engine: EngineKind) -> Extracted {
        let mut sides = vec![(LabelSide::Front, front)];
        if let Some(back) = back {
            sides.push((LabelSide::Back, back));
        }
        let lines = split_lines(&sides);

        let mut dropped = Vec::new();
        let mut label = WineLabelData::default();

        let windows = self.drink_windows(&lines);
        let (window, window_spans) = (
            best(windows.iter().filter_map(|(c, ok)| ok.then(|| c.clone_value()))),
            windows.iter().map(|(c, _)| c.span).collect::<Vec<_>>(),
        );
        for (c, ok) in &windows {
            if !ok {
                dropped.push(drop_field(FieldName::DrinkWindow, c, DropReason::OutOfRange, engine));
            }
        }

        label.vintage = best(self.vintages(&lines, &window_spans)).map(|c| c.into_field(engine));
        label.alcohol_percentage = {
            let mut valid = Vec::new();
            for c in alcohol_candidates(&lines) {
                if (0.0..=100.0).contains(&c.value) {
                    valid.push(c);
                } else {
                    dropped.push(drop_field(FieldName::AlcoholPercentage, &c, DropReason::OutOfRange, engine));
                }
            }
            best(valid).map(|c| c.into_field(engine))
        };
        label.classification = best(classification_candidates(&lines)).map(|c| c.into_field(engine));

        let grape = best(lexicon_candidates(&lines, &*GRAPE_LEXICON));
        self.geography(&lines, engine, &mut label);

        label.wine_type = best(wine_type_candidates(&lines))
            .or_else(|| {
                grape.as_ref().map(|g| {
                    g.derive(match g.value.colour {
                        GrapeColour::Red => WineType::Red,
                        GrapeColour::White => WineType::White,
                    })
                })
            })
            .map(|c| c.into_field(engine));
        label.grape_variety = grape.map(|c| c.map(|g| g.name.to_string()).into_field(engine));

        label.producer_type = PRODUCER_LEXICONS
            .iter()
            .find_map(|(kind, lex)| {
                best(lexicon_candidates(&lines, lex).into_iter().map(|c| c.map(|_| *kind)))
            })
            .map(|c| c.into_field(engine));

        label.drink_window = window.map(|c| c.into_field(engine));

        let (name, winery) = prominent_lines(&lines);
        label.name = name.map(|c| c.into_field(engine));
        label.winery = winery.map(|c| c.into_field(engine));

        Extracted { label, dropped }
    }

    fn vintages(&self, lines: &[Line<'_>], exclude: &[TextSpan]) -> Vec<Candidate<i32>> {
        let window = 1900..=self.current_year + 1;
        let mut out = Vec::new();
        for line in lines {
            let keyword = VINTAGE_CUE.is_match(line.text);
            for m in YEAR.find_iter(line.text) {
                let Ok(year) = m.as_str().parse::<i32>() else {
                    continue;
                };
                if !window.contains(&year) {
                    continue;
                }
                let (abs_start, abs_end) = (line.offset + m.start(), line.offset + m.end());
                let inside_window = exclude.iter().any(|s| {
                    s.side == line.side && s.start <= abs_start && abs_end <= s.end
                });
                if inside_window || FOUNDING_PREFIX.is_match(&line.text[..m.start()]) {
                    continue;
                }
                let standalone = line.text.len() == m.as_str().len();
                let cue = 2 * u8::from(keyword) + 2 * u8::from(standalone) + side_cue(line);
                out.push(Candidate::at(line, m.start(), m.end(), year, cue, Extraction::Pattern));
            }
        }
        out
    }

    /// Every drink-window phrase, flagged with whether its years are plausible.
    fn drink_windows(&self, lines: &[Line<'_>]) -> Vec<(Candidate<DrinkWindow>, bool)> {
        let mut out = Vec::new();
        for line in lines {
            for re in DRINK_WINDOW.iter() {
                for caps in re.captures_iter(line.text) {
                    let (Some(whole), Some(a), Some(b)) = (caps.get(0), caps.get(1), caps.get(2))
                    else {
                        continue;
                    };
                    let (Ok(start), Ok(end)) = (a.as_str().parse(), b.as_str().parse()) else {
                        continue;
                    };
                    let window = DrinkWindow { start, end };
                    let c = Candidate::at(line, whole.start(), whole.end(), window, side_cue(line), Extraction::Pattern);
                    out.push((c, window.is_plausible()));
                }
            }
        }
        out
    }

    fn geography(&self, lines: &[Line<'_>], engine: EngineKind, label: &mut WineLabelData) {
        let appellation: Option<Candidate<&'static Appellation>> =
            best(lexicon_candidates(lines, &*APPELLATION_LEXICON));
        let sub_region: Option<Candidate<&'static Place>> =
            best(lexicon_candidates(lines, &*SUB_REGION_LEXICON));
        let region: Option<Candidate<&'static Place>> =
            best(lexicon_candidates(lines, &*REGION_LEXICON));
        let country = best(lexicon_candidates(lines, &*COUNTRY_LEXICON));

        let sub_region_name = sub_region
            .as_ref()
            .map(|c| c.map_ref(|p| p.name))
            .or_else(|| {
                let a = appellation.as_ref()?;
                a.value.sub_region.map(|s| a.derive(s))
            });

        let region_name = region
            .as_ref()
            .map(|c| c.map_ref(|p| p.name))
            .or_else(|| {
                let s = sub_region.as_ref()?;
                s.value.region.map(|r| s.derive(r))
            })
            .or_else(|| appellation.as_ref().map(|a| a.derive(a.value.region)));

        let country_name = country
            .map(|c| c.map(|c| c.name))
            .or_else(|| region.as_ref().map(|r| r.derive(r.value.country)))
            .or_else(|| sub_region.as_ref().map(|s| s.derive(s.value.country)))
            .or_else(|| appellation.as_ref().map(|a| a.derive(a.value.country)));

        let owned = |c: Candidate<&'static str>| c.map(str::to_string).into_field(engine);
        label.appellation = appellation.map(|c| c.map(|a| a.name)).map(owned);
        label.sub_region = sub_region_name.map(owned);
        label.region = region_name.map(owned);
        label.country = country_name.map(owned);
    }
}

impl<T> Candidate<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Candidate<U> {
        Candidate {
            value: f(self.value),
            cue: self.cue,
            method: self.method,
            span: self.span,
            excerpt: self.excerpt,
        }
    }

    fn map_ref<U>(&self, f: impl FnOnce(&T) -> U) -> Candidate<U> {
        Candidate {
            value: f(&self.value),
            cue: self.cue,
            method: self.method,
            span: self.span,
            excerpt: self.excerpt.clone(),
        }
    }
}

impl<T: Copy> Candidate<T> {
    fn clone_value(&self) -> Candidate<T> {
        self.map_ref(|v| *v)
    }
}

fn drop_field<T>(field: FieldName, c: &Candidate<T>, reason: DropReason, engine: EngineKind) -> DroppedField {
    DroppedField {
        field,
        raw: c.excerpt.clone(),
        reason,
        provenance: c.provenance(engine),
    }
}

fn alcohol_candidates(lines: &[Line<'_>]) -> Vec<Candidate<f64>> {
    let mut out = Vec::new();
    for line in lines {
        let keyword = ALCOHOL_CUE.is_match(line.text);
        for caps in PERCENT.captures_iter(line.text) {
            let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if is_blend_share(line.text, whole.start(), whole.end()) {
                continue;
            }
            let Ok(value) = number.as_str().replace(',', ".").parse::<f64>() else {
                continue;
            };
            let cue = 2 * u8::from(keyword) + side_cue(line);
            out.push(Candidate::at(line, whole.start(), whole.end(), value, cue, Extraction::Pattern));
        }
    }
    out
}

/// "70% Cabernet Sauvignon" or "Merlot 30%" is a blend share, not alcohol.
fn is_blend_share(text: &str, start: usize, end: usize) -> bool {
    let after = text[end..].trim_start();
    let followed = GRAPE_LEXICON.find_all(after).first().is_some_and(|h| h.start == 0);

    let before = text[..start].trim_end();
    let preceded = GRAPE_LEXICON
        .find_all(before)
        .last()
        .is_some_and(|h| h.end == before.len());

    followed || preceded
}

fn classification_candidates(lines: &[Line<'_>]) -> Vec<Candidate<String>> {
    let mut out = Vec::new();
    for line in lines {
        let mut hits: Vec<(usize, usize, &'static str)> = Vec::new();
        hits.extend(
            CLASSIFICATION_LEXICON
                .find_all(line.text)
                .into_iter()
                .map(|h| (h.start, h.end, h.term.name)),
        );
        hits.extend(
            ABBREVIATION_LEXICON
                .find_all(line.text)
                .into_iter()
                .map(|h| (h.start, h.end, h.term.name)),
        );
        hits.extend(APPELLATION_CONTROLEE.find_iter(line.text).map(|m| (m.start(), m.end(), "AOC")));
        hits.extend(APPELLATION_PROTEGEE.find_iter(line.text).map(|m| (m.start(), m.end(), "AOP")));
        hits.sort_by_key(|(start, _, _)| *start);

        for (start, end, name) in hits {
            out.push(Candidate::at(line, start, end, name.to_string(), 0, Extraction::Lexicon));
        }
    }
    out
}

fn lexicon_candidates<T: lexicon::Term>(
    lines: &[Line<'_>],
    lex: &lexicon::Lexicon<T>,
) -> Vec<Candidate<&'static T>> {
    lines
        .iter()
        .flat_map(|line| {
            lex.find_all(line.text).into_iter().map(move |h| {
                Candidate::at(line, h.start, h.end, h.term, side_cue(line), Extraction::Lexicon)
            })
        })
        .collect()
}

/// Indicator rows are checked in table order; the first style with a hit wins.
fn wine_type_candidates(lines: &[Line<'_>]) -> Option<Candidate<WineType>> {
    WINE_TYPE_LEXICONS.iter().find_map(|(kind, lex)| {
        best(lexicon_candidates(lines, lex).into_iter().map(|c| c.map(|_| *kind)))
    })
}

fn letters(s: &str) -> usize {
    s.chars().filter(|c| c.is_alphabetic()).count()
}

/// True when the line says nothing beyond generic label vocabulary.
fn is_generic(text: &str) -> bool {
    let mut residual = GENERIC_PHRASE.replace_all(text, " ").into_owned();
    for lex in [&*CLASSIFICATION_LEXICON, &*ABBREVIATION_LEXICON] {
        let hits = lex.find_all(&residual);
        for h in hits.iter().rev() {
            residual.replace_range(h.start..h.end, " ");
        }
    }
    residual = APPELLATION_CONTROLEE.replace_all(&residual, " ").into_owned();
    letters(&residual) < 2
}

fn is_mostly_uppercase(text: &str) -> bool {
    let total = letters(text);
    let upper = text.chars().filter(|c| c.is_uppercase()).count();
    total >= 3 && upper * 5 >= total * 4
}

/// Name is the most prominent line; winery the next distinct one.
fn prominent_lines(lines: &[Line<'_>]) -> (Option<Candidate<String>>, Option<Candidate<String>>) {
    let mut per_side_rank = [0usize; 2];
    let mut candidates = Vec::new();

    for line in lines {
        let len = line.text.chars().count();
        if !(MIN_NAME_LINE..=MAX_NAME_LINE).contains(&len)
            || letters(line.text) < 2
            || line.text.contains('%')
            || BOILERPLATE.is_match(line.text)
            || is_generic(line.text)
        {
            continue;
        }
        let rank = &mut per_side_rank[line.side as usize];
        let near_top = *rank < 3;
        *rank += 1;

        let cue = 2 * u8::from(is_mostly_uppercase(line.text)) + u8::from(near_top) + side_cue(line);
        candidates.push(Candidate::at(
            line,
            0,
            line.text.len(),
            line.text.to_string(),
            cue,
            Extraction::ProminentLine,
        ));
    }

    let name = best(candidates.iter().map(|c| c.map_ref(String::clone)));
    let winery = name.as_ref().and_then(|n| {
        let key = fold(&n.value);
        best(
            candidates
                .into_iter()
                .filter(|c| fold(&c.value) != key),
        )
    });
    (name, winery)
}
