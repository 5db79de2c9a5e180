//! Brand dictionary and the text heuristics that cross-reference OCR output
//! against it.
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

static VOLUME_ML: OnceLock<Option<Regex>> = OnceLock::new();
static VOLUME_LITRES: OnceLock<Option<Regex>> = OnceLock::new();

fn volume_ml() -> Option<&'static Regex> {
    VOLUME_ML
        .get_or_init(|| Regex::new(r"\b(\d{2,4})\s*ML\b").ok())
        .as_ref()
}

fn volume_litres() -> Option<&'static Regex> {
    VOLUME_LITRES
        .get_or_init(|| Regex::new(r"\b(\d)(?:[.,](\d{1,3}))?\s*(?:L|LT|LITROS?|LITERS?)\b").ok())
        .as_ref()
}

/// Uppercases and keeps `[A-Z0-9]` only.
pub fn normalize_text(text: &str) -> String {
    text.to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Canonical brand name to the spellings OCR is known to produce for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrandDictionary {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl BrandDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a brand; the canonical name always counts as one of its variants.
    pub fn insert<I, S>(&mut self, brand: &str, variants: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = self.entries.entry(brand.to_string()).or_default();
        entry.insert(brand.to_string());
        entry.extend(variants.into_iter().map(|v| v.as_ref().to_string()));
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, Vec<String>> =
            serde_json::from_str(json).context("Failed to parse brand dictionary JSON")?;
        let mut dictionary = Self::new();
        for (brand, variants) in raw {
            dictionary.insert(&brand, variants);
        }
        Ok(dictionary)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read brand dictionary {}", path.as_ref().display()))?;
        Self::from_json_str(&contents)
    }

    /// Common beverage brands and their frequent misreadings.
    pub fn builtin() -> Self {
        let mut dictionary = Self::new();
        dictionary.insert("HEINEKEN", ["HEINEKEN", "HEINKEN", "HEINEKN", "HEIMEKEN", "EINEKEN"]);
        dictionary.insert("BUDWEISER", ["BUDWEISER", "BUDWISER", "BUDWEIS", "BUDVEISER"]);
        dictionary.insert("CORONA", ["CORONA", "C0RONA", "CORONA EXTRA", "CORUNA"]);
        dictionary.insert("STELLA ARTOIS", ["STELLA", "ARTOIS", "STELA ARTOIS"]);
        dictionary.insert("AMSTEL", ["AMSTEL", "AMSTE1", "AMSTEI"]);
        dictionary.insert("BRAHMA", ["BRAHMA", "BRAMA", "BRAHNA"]);
        dictionary.insert("SKOL", ["SKOL", "SK0L"]);
        dictionary.insert("ANTARCTICA", ["ANTARCTICA", "ANTARTICA"]);
        dictionary.insert("ITAIPAVA", ["ITAIPAVA", "ITAIPAV"]);
        dictionary.insert("ORIGINAL", ["ORIGINAL", "0RIGINAL"]);
        dictionary.insert("SPATEN", ["SPATEN", "SPATFN"]);
        dictionary.insert("COCA-COLA", ["COCACOLA", "COCA COLA", "C0CA"]);
        dictionary.insert("GUARANA", ["GUARANA", "GUARAN", "ANTARCTICA GUARANA"]);
        dictionary.insert("PEPSI", ["PEPSI", "PEPS1"]);
        dictionary
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Brands in name order, each with its variants in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.entries
            .iter()
            .map(|(brand, variants)| (brand.as_str(), variants))
    }
}

/// Result of matching OCR text against the dictionary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrandMatch {
    pub brand: String,
    pub variant: String,
    pub confidence: f32,
}

/// Strategy deciding which brand, if any, a piece of OCR text names.
///
/// Implementations must be deterministic: equal inputs give equal outputs.
pub trait BrandMatcher: Send + Sync {
    fn best_match(&self, raw_text: &str, dictionary: &BrandDictionary) -> Option<BrandMatch>;
}

fn better(candidate: &BrandMatch, current: &Option<BrandMatch>) -> bool {
    match current {
        None => true,
        Some(best) => candidate.confidence > best.confidence,
    }
}

/// A brand matches when one of its normalised variants is a substring of the
/// normalised text; confidence is `len(variant) / len(raw_text)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringMatcher;

impl BrandMatcher for SubstringMatcher {
    fn best_match(&self, raw_text: &str, dictionary: &BrandDictionary) -> Option<BrandMatch> {
        let normalized = normalize_text(raw_text);
        let raw_len = raw_text.chars().count();
        if normalized.is_empty() || raw_len == 0 {
            return None;
        }

        let mut best: Option<BrandMatch> = None;
        for (brand, variants) in dictionary.iter() {
            for variant in variants {
                let needle = normalize_text(variant);
                if needle.is_empty() || !normalized.contains(&needle) {
                    continue;
                }
                let candidate = BrandMatch {
                    brand: brand.to_string(),
                    variant: variant.to_string(),
                    confidence: (needle.chars().count() as f32 / raw_len as f32).min(1.0),
                };
                if better(&candidate, &best) {
                    best = Some(candidate);
                }
            }
        }
        best
    }
}

/// Token-wise character overlap: a token matches a variant when the shared
/// characters (as a multiset) reach `min_similarity` of the longer of the two.
#[derive(Debug, Clone, Copy)]
pub struct CharOverlapMatcher {
    pub min_similarity: f32,
    pub min_token_len: usize,
}

impl Default for CharOverlapMatcher {
    fn default() -> Self {
        Self {
            min_similarity: 0.6,
            min_token_len: 3,
        }
    }
}

fn char_overlap(a: &str, b: &str) -> f32 {
    let mut pool: BTreeMap<char, usize> = BTreeMap::new();
    for c in a.chars() {
        *pool.entry(c).or_default() += 1;
    }
    let mut shared = 0usize;
    for c in b.chars() {
        if let Some(count) = pool.get_mut(&c) {
            if *count > 0 {
                *count -= 1;
                shared += 1;
            }
        }
    }
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        0.0
    } else {
        shared as f32 / longest as f32
    }
}

impl BrandMatcher for CharOverlapMatcher {
    fn best_match(&self, raw_text: &str, dictionary: &BrandDictionary) -> Option<BrandMatch> {
        let tokens: Vec<String> = raw_text
            .split(|c: char| !c.is_alphanumeric())
            .map(normalize_text)
            .filter(|t| t.chars().count() >= self.min_token_len)
            .collect();

        let mut best: Option<BrandMatch> = None;
        for (brand, variants) in dictionary.iter() {
            for variant in variants {
                let needle = normalize_text(variant);
                for token in &tokens {
                    let similarity = char_overlap(token, &needle);
                    if similarity < self.min_similarity {
                        continue;
                    }
                    let candidate = BrandMatch {
                        brand: brand.to_string(),
                        variant: variant.to_string(),
                        confidence: similarity,
                    };
                    if better(&candidate, &best) {
                        best = Some(candidate);
                    }
                }
            }
        }
        best
    }
}

/// Container type printed on the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    Can,
    LongNeck,
    Bottle,
    Pet,
}

/// Reads a package volume such as `350ML`, `473 ml`, `1,5L` or `2 LITROS`.
pub fn parse_volume_ml(raw_text: &str) -> Option<u32> {
    let upper = raw_text.to_uppercase();
    if let Some(caps) = volume_ml()?.captures(&upper) {
        return caps[1].parse().ok().filter(|ml| *ml > 0);
    }
    let caps = volume_litres()?.captures(&upper)?;
    let whole: u32 = caps[1].parse().ok()?;
    let fraction = caps.get(2).map_or(0, |m| {
        let digits = m.as_str();
        let value: u32 = digits.parse().unwrap_or(0);
        value * 10u32.pow(3 - digits.len() as u32)
    });
    Some(whole * 1000 + fraction).filter(|ml| *ml > 0)
}

/// Detects package keywords among the words of the text, so `CAN` does not
/// fire inside `AMERICANA`. `LONG NECK` may be written as one word or two.
pub fn parse_package(raw_text: &str) -> Option<PackageKind> {
    let words: Vec<String> = raw_text
        .split(|c: char| !c.is_alphanumeric())
        .map(normalize_text)
        .filter(|w| !w.is_empty())
        .collect();
    let has = |keywords: &[&str]| words.iter().any(|w| keywords.contains(&w.as_str()));

    let long_neck = has(&["LONGNECK", "LONGNECKS"])
        || words.windows(2).any(|pair| pair[0] == "LONG" && matches!(pair[1].as_str(), "NECK" | "NECKS"));
    if long_neck {
        Some(PackageKind::LongNeck)
    } else if has(&["LATA", "LATAS", "CAN", "CANS"]) {
        Some(PackageKind::Can)
    } else if has(&["GARRAFA", "GARRAFAS", "BOTTLE", "BOTTLES"]) {
        Some(PackageKind::Bottle)
    } else if has(&["PET"]) {
        Some(PackageKind::Pet)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heineken_only() -> BrandDictionary {
        let mut dictionary = BrandDictionary::new();
        dictionary.insert("HEINEKEN", ["HEINEKEN", "HEINKEN"]);
        dictionary
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("Heineken Lager, 350ml!"), "HEINEKENLAGER350ML");
        assert_eq!(normalize_text("  \n"), "");
    }

    #[test]
    fn test_substring_match_confidence() {
        // the separator after the text counts toward its length
        let text = "HEINEKEN LAGER 350ML\n";
        let found = SubstringMatcher.best_match(text, &heineken_only()).unwrap();
        assert_eq!(found.brand, "HEINEKEN");
        assert_eq!(found.variant, "HEINEKEN");
        assert!((found.confidence - 8.0 / 21.0).abs() < 1e-6);
        assert!((found.confidence - 0.38).abs() < 0.01);

        // a single Tesseract read carries no trailing newline
        let found = SubstringMatcher.best_match("HEINEKEN LAGER 350ML", &heineken_only()).unwrap();
        assert!((found.confidence - 8.0 / 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_substring_match_garbled_variant() {
        let found = SubstringMatcher
            .best_match("heinken 350", &heineken_only())
            .unwrap();
        assert_eq!(found.brand, "HEINEKEN");
        assert_eq!(found.variant, "HEINKEN");
    }

    #[test]
    fn test_no_match_and_empty_text() {
        assert!(SubstringMatcher.best_match("PILSEN 600ML", &heineken_only()).is_none());
        assert!(SubstringMatcher.best_match("", &heineken_only()).is_none());
        assert!(SubstringMatcher.best_match("--- !!", &heineken_only()).is_none());
    }

    #[test]
    fn test_matching_is_deterministic() {
        let dictionary = BrandDictionary::builtin();
        let text = "STELLA ARTOIS CORONA 330ML";
        let first = SubstringMatcher.best_match(text, &dictionary);
        for _ in 0..10 {
            assert_eq!(SubstringMatcher.best_match(text, &dictionary), first);
        }
        // "STELLA ARTOIS" is the longest variant present
        assert_eq!(first.unwrap().brand, "STELLA ARTOIS");
    }

    #[test]
    fn test_char_overlap_matcher() {
        let matcher = CharOverlapMatcher::default();
        let found = matcher.best_match("HEJNEKEN lager", &heineken_only()).unwrap();
        assert_eq!(found.brand, "HEINEKEN");
        assert!(found.confidence >= 0.6);
        assert!(matcher.best_match("XYZ QQQ", &heineken_only()).is_none());
    }

    #[test]
    fn test_dictionary_from_json() {
        let dictionary =
            BrandDictionary::from_json_str(r#"{"CORONA": ["C0RONA"], "SKOL": []}"#).unwrap();
        assert_eq!(dictionary.len(), 2);
        let corona: Vec<&str> = dictionary
            .iter()
            .find(|(brand, _)| *brand == "CORONA")
            .map(|(_, variants)| variants.iter().map(String::as_str).collect())
            .unwrap();
        assert_eq!(corona, vec!["C0RONA", "CORONA"]);
        assert!(BrandDictionary::from_json_str("[1, 2]").is_err());
    }

    #[test]
    fn test_parse_volume() {
        assert_eq!(parse_volume_ml("HEINEKEN 350ML"), Some(350));
        assert_eq!(parse_volume_ml("lata 473 ml"), Some(473));
        assert_eq!(parse_volume_ml("GUARANA 1,5L"), Some(1500));
        assert_eq!(parse_volume_ml("2 LITROS"), Some(2000));
        assert_eq!(parse_volume_ml("0,6 L"), Some(600));
        assert_eq!(parse_volume_ml("HEINEKEN"), None);
    }

    #[test]
    fn test_parse_package() {
        assert_eq!(parse_package("Long Neck 330ml"), Some(PackageKind::LongNeck));
        assert_eq!(parse_package("LATA 350ML"), Some(PackageKind::Can));
        assert_eq!(parse_package("garrafa 600"), Some(PackageKind::Bottle));
        assert_eq!(parse_package("HEINEKEN"), None);
        assert_eq!(parse_package("longneck"), Some(PackageKind::LongNeck));
        assert_eq!(parse_package("GUARANA PET 2L"), Some(PackageKind::Pet));
    }

    #[test]
    fn test_package_keywords_match_whole_words() {
        assert_eq!(parse_package("AMERICANA"), None);
        assert_eq!(parse_package("CANECA 500ML"), None);
        assert_eq!(parse_package("PETROPOLIS"), None);
        assert_eq!(parse_package("SKOL LATAO / lata 473ml"), Some(PackageKind::Can));
        assert_eq!(parse_package("HEINEKEN\nLONG\nNECK"), Some(PackageKind::LongNeck));
    }
}
