//! Area / size parsing with unit inference from the trailing token.

use super::money::parse_amount;
use rust_decimal::prelude::ToPrimitive;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AreaUnit {
    SquareFeet,
    Acres,
    SquareMeters,
    Hectares,
    /// Passed through verbatim, never converted
    Other(String),
}

const SQFT_PER_ACRE: f64 = 43_560.0;
const SQFT_PER_SQM: f64 = 10.763_910_4;
const SQFT_PER_HECTARE: f64 = 107_639.104;

/// Known spellings, longest first so `sq ft` is not read as `sq`
const UNIT_SPELLINGS: &[(&str, &str)] = &[
    ("square metres", "sqm"),
    ("square meters", "sqm"),
    ("square feet", "sqft"),
    ("square foot", "sqft"),
    ("sq meters", "sqm"),
    ("sq feet", "sqft"),
    ("hectares", "hectares"),
    ("hectare", "hectares"),
    ("acres", "acres"),
    ("acre", "acres"),
    ("sq ft", "sqft"),
    ("sq m", "sqm"),
    ("sqft", "sqft"),
    ("sqm", "sqm"),
    ("kvm", "sqm"),
    ("ft²", "sqft"),
    ("ft2", "sqft"),
    ("m²", "sqm"),
    ("m2", "sqm"),
    ("sf", "sqft"),
    ("ac", "acres"),
    ("ha", "hectares"),
];

impl AreaUnit {
    /// Recognise a unit phrase; unknown phrases become `Other` with their first word
    pub fn parse(raw: &str) -> Option<AreaUnit> {
        let key: String = raw
            .to_lowercase()
            .replace('.', " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if key.is_empty() {
            return None;
        }
        for (spelling, canonical) in UNIT_SPELLINGS {
            if key == *spelling || key.starts_with(&format!("{} ", spelling)) {
                return Some(AreaUnit::from_canonical(canonical));
            }
        }
        let first = key.split_whitespace().next().unwrap_or(&key);
        Some(AreaUnit::Other(first.to_string()))
    }

    fn from_canonical(name: &str) -> AreaUnit {
        match name {
            "sqft" => AreaUnit::SquareFeet,
            "acres" => AreaUnit::Acres,
            "sqm" => AreaUnit::SquareMeters,
            "hectares" => AreaUnit::Hectares,
            other => AreaUnit::Other(other.to_string()),
        }
    }

    pub fn canonical_name(&self) -> &str {
        match self {
            AreaUnit::SquareFeet => "sqft",
            AreaUnit::Acres => "acres",
            AreaUnit::SquareMeters => "sqm",
            AreaUnit::Hectares => "hectares",
            AreaUnit::Other(raw) => raw,
        }
    }

    pub fn is_recognised(&self) -> bool {
        !matches!(self, AreaUnit::Other(_))
    }

    pub fn square_feet_factor(&self) -> Option<f64> {
        match self {
            AreaUnit::SquareFeet => Some(1.0),
            AreaUnit::Acres => Some(SQFT_PER_ACRE),
            AreaUnit::SquareMeters => Some(SQFT_PER_SQM),
            AreaUnit::Hectares => Some(SQFT_PER_HECTARE),
            AreaUnit::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedArea {
    pub magnitude: f64,
    pub unit: Option<AreaUnit>,
}

/// Parse `"1,850 sq ft"`, `"0.25 acres"`, `"172 m²"`, `"5000"`
pub(crate) fn parse_area_str(raw: &str) -> Result<ParsedArea, String> {
    let text = raw.trim().trim_start_matches(['~', '≈']).trim_start();
    let numeric_end = text
        .char_indices()
        .find(|(i, c)| {
            !(c.is_ascii_digit()
                || *c == ','
                || *c == '.'
                || (*c == ' '
                    && text[i + 1..].starts_with(|n: char| n.is_ascii_digit())
                    && text[..*i].ends_with(|p: char| p.is_ascii_digit())))
        })
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    let number = text[..numeric_end].trim_end_matches(['.', ',']);
    let unit_text = &text[number.len()..];
    let magnitude = parse_amount(number)
        .and_then(|d| d.to_f64())
        .ok_or_else(|| format!("no magnitude in {:?}", raw))?;

    Ok(ParsedArea {
        magnitude,
        unit: AreaUnit::parse(unit_text),
    })
}
