//! Normalizer: raw extractor candidates to canonical typed values.
//!
//! Normalization never fails as a whole. Each field ends up with either a
//! canonical value, or no value plus the [`NormalizationError`] explaining why,
//! and the validator decides what that means for the record.

mod area;
mod money;

use crate::error::NormalizationError;
use crate::models::{Field, Measurement, Money, RawFields};
use crate::schema::{FieldKind, SchemaRegistry};
use area::{parse_area_str, AreaUnit, ParsedArea};
use money::parse_money_value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use url::Url;

/// A canonical field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Money(Money),
    Integer(i64),
    Rational(f64),
    Area(Measurement),
    Urls(Vec<String>),
}

impl FieldValue {
    /// Numeric view used for range checks
    pub fn as_f64(&self) -> Option<f64> {
        use rust_decimal::prelude::ToPrimitive;
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Rational(r) => Some(*r),
            FieldValue::Money(m) => m.amount.to_f64(),
            FieldValue::Area(a) => Some(a.magnitude),
            FieldValue::Text(_) | FieldValue::Urls(_) => None,
        }
    }
}

/// Informational markers attached to a normalized field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "flag", content = "count")]
pub enum FieldFlag {
    /// Value was estimated: lower bound of a range, converted or unknown unit
    Approximate,
    /// property_type had no vocabulary match and was kept verbatim
    NotNormalized,
    /// Entries of a list were malformed and dropped
    DroppedEntries(usize),
}

/// Outcome of normalizing one field
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedField {
    pub value: Option<FieldValue>,
    pub error: Option<NormalizationError>,
    pub flags: Vec<FieldFlag>,
}

impl NormalizedField {
    fn value(value: FieldValue) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }

    fn failed(error: NormalizationError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    fn flagged(mut self, flag: FieldFlag) -> Self {
        self.flags.push(flag);
        self
    }

    pub fn is_absent(&self) -> bool {
        self.value.is_none() && self.error.is_none()
    }
}

/// All canonical fields after normalization, in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFields {
    fields: Vec<NormalizedField>,
    unknown_keys: Vec<String>,
}

impl NormalizedFields {
    pub fn get(&self, field: Field) -> &NormalizedField {
        &self.fields[field as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &NormalizedField)> {
        Field::ALL.iter().copied().zip(self.fields.iter())
    }

    /// Extractor keys that matched no field or alias
    pub fn unknown_keys(&self) -> &[String] {
        &self.unknown_keys
    }
}

/// Coerces raw field mappings into canonical values using the schema registry
#[derive(Debug, Clone)]
pub struct Normalizer {
    registry: Arc<SchemaRegistry>,
}

impl Normalizer {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Normalize one extractor mapping. `source_url` resolves relative image URLs.
    pub fn normalize(&self, raw: &RawFields, source_url: Option<&Url>) -> NormalizedFields {
        let mut candidates: Vec<Option<&Value>> = vec![None; Field::ALL.len()];
        let mut unknown_keys = Vec::new();

        // canonical names win over aliases
        for (key, value) in raw {
            if let Some(field) = Field::from_name(key) {
                if !value.is_null() {
                    candidates[field as usize] = Some(value);
                }
            }
        }
        for (key, value) in raw {
            if Field::from_name(key).is_some() {
                continue;
            }
            match self.registry.resolve_key(key) {
                Some(field) => {
                    let slot = &mut candidates[field as usize];
                    if slot.is_none() && !value.is_null() {
                        *slot = Some(value);
                    }
                }
                None => unknown_keys.push(key.clone()),
            }
        }

        let fields = Field::ALL
            .iter()
            .map(|&field| match candidates[field as usize] {
                Some(value) => self.normalize_field(field, value, source_url),
                None => NormalizedField::default(),
            })
            .collect();

        NormalizedFields {
            fields,
            unknown_keys,
        }
    }

    fn normalize_field(&self, field: Field, value: &Value, source_url: Option<&Url>) -> NormalizedField {
        match self.registry.spec(field).kind {
            FieldKind::Text => match normalize_text(value) {
                Ok(Some(text)) => NormalizedField::value(FieldValue::Text(text)),
                Ok(None) => NormalizedField::default(),
                Err(reason) => NormalizedField::failed(NormalizationError::unparsable(field, reason)),
            },
            FieldKind::Money => match parse_money_value(value) {
                Ok(parsed) => {
                    let normalized = NormalizedField::value(FieldValue::Money(parsed.money));
                    if parsed.approximate {
                        normalized.flagged(FieldFlag::Approximate)
                    } else {
                        normalized
                    }
                }
                Err(e) => NormalizedField::failed(e.into_normalization_error(field)),
            },
            FieldKind::Integer => match parse_integer(field, value) {
                Ok(n) => NormalizedField::value(FieldValue::Integer(n)),
                Err(e) => NormalizedField::failed(e),
            },
            FieldKind::Rational => match parse_rational(value) {
                Some(n) => NormalizedField::value(FieldValue::Rational(n)),
                None => NormalizedField::failed(NormalizationError::unparsable(
                    field,
                    format!("not a number: {}", value),
                )),
            },
            FieldKind::Area => match parse_area_value(value) {
                Ok(parsed) if field == Field::SquareFeet => square_feet(field, parsed),
                Ok(parsed) => lot_size(parsed),
                Err(reason) => NormalizedField::failed(NormalizationError::unparsable(field, reason)),
            },
            FieldKind::PropertyType => match normalize_text(value) {
                Ok(Some(text)) => match self.registry.lookup_property_type(&text) {
                    Some(term) => NormalizedField::value(FieldValue::Text(term.to_string())),
                    None => NormalizedField::value(FieldValue::Text(text)).flagged(FieldFlag::NotNormalized),
                },
                Ok(None) => NormalizedField::default(),
                Err(reason) => NormalizedField::failed(NormalizationError::unparsable(field, reason)),
            },
            FieldKind::UrlList => match normalize_urls(value, source_url) {
                Ok((urls, dropped)) => {
                    let normalized = NormalizedField::value(FieldValue::Urls(urls));
                    if dropped > 0 {
                        normalized.flagged(FieldFlag::DroppedEntries(dropped))
                    } else {
                        normalized
                    }
                }
                Err(reason) => NormalizedField::failed(NormalizationError::unparsable(field, reason)),
            },
        }
    }
}

fn normalize_text(value: &Value) -> Result<Option<String>, String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => return Ok(None),
        Value::Object(_) => return Err("expected text, got an object".to_string()),
    };
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok((!collapsed.is_empty()).then_some(collapsed))
}

fn integer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?(?:\d{1,3}(?:,\d{3})+|\d+)$").expect("valid integer regex")
    })
}

/// Strict integer parse: digits with optional sign and thousands commas
fn parse_integer(field: Field, value: &Value) -> Result<i64, NormalizationError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                Some(f) if f.fract() == 0.0 => Err(NormalizationError::OutOfRange {
                    field,
                    value: n.to_string(),
                }),
                _ => Err(NormalizationError::unparsable(field, format!("not a whole number: {}", n))),
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if field == Field::Bedrooms && trimmed.eq_ignore_ascii_case("studio") {
                return Ok(0);
            }
            if !integer_pattern().is_match(trimmed) {
                return Err(NormalizationError::unparsable(field, format!("not an integer: {:?}", s)));
            }
            trimmed
                .replace(',', "")
                .parse::<i64>()
                .map_err(|_| NormalizationError::OutOfRange {
                    field,
                    value: trimmed.to_string(),
                })
        }
        other => Err(NormalizationError::unparsable(field, format!("not an integer: {}", other))),
    }
}

fn bath_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s*(full|half)").expect("valid bath regex")
    })
}

/// Bathrooms: `2.5`, `"2½"`, `"2 full, 1 half"`
fn parse_rational(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let text = s.trim();
            let mut matched = false;
            let mut total = 0.0;
            for cap in bath_pattern().captures_iter(text) {
                let count: f64 = cap[1].parse().ok()?;
                matched = true;
                if cap[2].eq_ignore_ascii_case("full") {
                    total += count;
                } else {
                    total += count * 0.5;
                }
            }
            if matched {
                return Some(total);
            }

            let (whole, half) = match text.strip_suffix('½') {
                Some(rest) => (rest.trim(), 0.5),
                None => (text, 0.0),
            };
            if whole.is_empty() && half > 0.0 {
                return Some(half);
            }
            if !whole.chars().all(|c| c.is_ascii_digit() || c == '.') {
                return None;
            }
            whole.parse::<f64>().ok().map(|n| n + half)
        }
        _ => None,
    }
}

fn parse_area_value(value: &Value) -> Result<ParsedArea, String> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(|magnitude| ParsedArea {
                magnitude,
                unit: None,
            })
            .ok_or_else(|| format!("invalid number {}", n)),
        Value::String(s) => parse_area_str(s),
        Value::Object(map) => {
            let magnitude = map
                .get("magnitude")
                .or_else(|| map.get("value"))
                .and_then(Value::as_f64)
                .ok_or_else(|| "area object without magnitude".to_string())?;
            let unit = map.get("unit").and_then(Value::as_str).and_then(AreaUnit::parse);
            Ok(ParsedArea { magnitude, unit })
        }
        other => Err(format!("unsupported area value: {}", other)),
    }
}

/// Living area in whole square feet. Recognised units are converted; an
/// unrecognised unit keeps its magnitude and is flagged.
fn square_feet(field: Field, parsed: ParsedArea) -> NormalizedField {
    let (magnitude, approximate) = match &parsed.unit {
        None | Some(AreaUnit::SquareFeet) => (parsed.magnitude, parsed.magnitude.fract() != 0.0),
        Some(unit) => match unit.square_feet_factor() {
            Some(factor) => (parsed.magnitude * factor, true),
            None => (parsed.magnitude, true),
        },
    };
    let rounded = magnitude.round();
    if !rounded.is_finite() || rounded.abs() >= i64::MAX as f64 {
        return NormalizedField::failed(NormalizationError::OutOfRange {
            field,
            value: magnitude.to_string(),
        });
    }
    let normalized = NormalizedField::value(FieldValue::Integer(rounded as i64));
    if approximate {
        normalized.flagged(FieldFlag::Approximate)
    } else {
        normalized
    }
}

/// Lot size keeps the unit it was stated in; no unit means square feet
fn lot_size(parsed: ParsedArea) -> NormalizedField {
    let (unit, approximate) = match parsed.unit {
        Some(unit) => {
            let recognised = unit.is_recognised();
            (unit, !recognised)
        }
        None => (AreaUnit::SquareFeet, true),
    };
    let normalized = NormalizedField::value(FieldValue::Area(Measurement::new(
        parsed.magnitude,
        unit.canonical_name(),
    )));
    if approximate {
        normalized.flagged(FieldFlag::Approximate)
    } else {
        normalized
    }
}

/// Keep absolute http(s) URLs, resolving relative ones against the page
fn normalize_urls(value: &Value, base: Option<&Url>) -> Result<(Vec<String>, usize), String> {
    let entries: Vec<Option<&str>> = match value {
        Value::String(s) if s.matches("http").count() > 1 => s
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|part| !part.is_empty())
            .map(Some)
            .collect(),
        Value::String(s) => vec![Some(s.as_str())],
        Value::Array(items) => items.iter().map(Value::as_str).collect(),
        other => return Err(format!("expected URL list, got {}", other)),
    };

    let mut urls: Vec<String> = Vec::with_capacity(entries.len());
    let mut dropped = 0;
    for entry in entries {
        match entry.and_then(|raw| absolute_url(raw.trim(), base)) {
            Some(url) => {
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }
            None => dropped += 1,
        }
    }
    Ok((urls, dropped))
}

fn absolute_url(raw: &str, base: Option<&Url>) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base.join(raw).ok()?,
            None if raw.starts_with("//") => Url::parse(&format!("https:{}", raw)).ok()?,
            None => return None,
        },
        Err(_) => return None,
    };
    let web = matches!(parsed.scheme(), "http" | "https");
    (web && parsed.host_str().is_some_and(|h| !h.is_empty())).then(|| parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn normalizer() -> Normalizer {
        Normalizer::new(Arc::new(SchemaRegistry::new()))
    }

    fn raw(value: Value) -> RawFields {
        value.as_object().unwrap().clone().into_iter().collect()
    }

    #[test]
    fn test_price_scenario() {
        let out = normalizer().normalize(&raw(json!({"price": "$450,000"})), None);
        assert_eq!(
            out.get(Field::Price).value,
            Some(FieldValue::Money(Money::usd(450_000)))
        );
        assert!(out.get(Field::Price).flags.is_empty());
    }

    #[test]
    fn test_price_range_is_flagged_approximate() {
        let out = normalizer().normalize(&raw(json!({"price": "$400K–$450K"})), None);
        let price = out.get(Field::Price);
        assert_eq!(price.value, Some(FieldValue::Money(Money::usd(400_000))));
        assert_eq!(price.flags, vec![FieldFlag::Approximate]);
    }

    #[test]
    fn test_unparsable_price_is_recorded_not_raised() {
        let out = normalizer().normalize(&raw(json!({"price": "Call for price"})), None);
        let price = out.get(Field::Price);
        assert_eq!(price.value, None);
        assert!(matches!(
            price.error,
            Some(NormalizationError::Unparsable { field: Field::Price, .. })
        ));
    }

    #[test]
    fn test_square_feet_scenario() {
        let out = normalizer().normalize(&raw(json!({"square_feet": "1,850 sq ft"})), None);
        assert_eq!(out.get(Field::SquareFeet).value, Some(FieldValue::Integer(1850)));
        assert!(out.get(Field::SquareFeet).flags.is_empty());
    }

    #[test]
    fn test_square_meters_convert_to_square_feet() {
        let out = normalizer().normalize(&raw(json!({"square_feet": "100 m²"})), None);
        assert_eq!(out.get(Field::SquareFeet).value, Some(FieldValue::Integer(1076)));
        assert_eq!(out.get(Field::SquareFeet).flags, vec![FieldFlag::Approximate]);
    }

    #[test]
    fn test_lot_size_keeps_unit() {
        let out = normalizer().normalize(&raw(json!({"lot_size": "0.25 acres"})), None);
        assert_eq!(
            out.get(Field::LotSize).value,
            Some(FieldValue::Area(Measurement::new(0.25, "acres")))
        );
        assert!(out.get(Field::LotSize).flags.is_empty());

        let out = normalizer().normalize(&raw(json!({"lot_size": "3 roods"})), None);
        assert_eq!(
            out.get(Field::LotSize).value,
            Some(FieldValue::Area(Measurement::new(3.0, "roods")))
        );
        assert_eq!(out.get(Field::LotSize).flags, vec![FieldFlag::Approximate]);
    }

    #[test]
    fn test_integer_fields_are_strict() {
        let out = normalizer().normalize(
            &raw(json!({"bedrooms": "N/A", "year_built": "1,998", "days_on_market": 12.0})),
            None,
        );
        assert_eq!(out.get(Field::Bedrooms).value, None);
        assert!(out.get(Field::Bedrooms).error.is_some());
        assert_eq!(out.get(Field::YearBuilt).value, Some(FieldValue::Integer(1998)));
        assert_eq!(out.get(Field::DaysOnMarket).value, Some(FieldValue::Integer(12)));

        let out = normalizer().normalize(&raw(json!({"bedrooms": "3 beds", "days_on_market": "-4"})), None);
        assert_eq!(out.get(Field::Bedrooms).value, None);
        assert_eq!(out.get(Field::DaysOnMarket).value, Some(FieldValue::Integer(-4)));
    }

    #[test]
    fn test_studio_means_zero_bedrooms() {
        let out = normalizer().normalize(&raw(json!({"bedrooms": "Studio"})), None);
        assert_eq!(out.get(Field::Bedrooms).value, Some(FieldValue::Integer(0)));
    }

    #[test]
    fn test_bathroom_forms() {
        assert_eq!(parse_rational(&json!(2.5)), Some(2.5));
        assert_eq!(parse_rational(&json!("2.5")), Some(2.5));
        assert_eq!(parse_rational(&json!("2½")), Some(2.5));
        assert_eq!(parse_rational(&json!("½")), Some(0.5));
        assert_eq!(parse_rational(&json!("2 full, 1 half")), Some(2.5));
        assert_eq!(parse_rational(&json!("several")), None);
    }

    #[test]
    fn test_property_type_lookup() {
        let out = normalizer().normalize(&raw(json!({"property_type": "Single-Family"})), None);
        assert_eq!(
            out.get(Field::PropertyType).value,
            Some(FieldValue::Text("Single Family Home".to_string()))
        );

        let out = normalizer().normalize(&raw(json!({"property_type": "Houseboat"})), None);
        let property_type = out.get(Field::PropertyType);
        assert_eq!(property_type.value, Some(FieldValue::Text("Houseboat".to_string())));
        assert_eq!(property_type.flags, vec![FieldFlag::NotNormalized]);
        assert!(property_type.error.is_none());
    }

    #[test]
    fn test_image_urls_drop_malformed_and_resolve_relative() {
        let base = Url::parse("https://listings.example.com/homes/123").unwrap();
        let out = normalizer().normalize(
            &raw(json!({"image_urls": [
                "https://cdn.example.com/a.jpg",
                "/photos/b.jpg",
                "javascript:void(0)",
                "https://cdn.example.com/a.jpg",
                42
            ]})),
            Some(&base),
        );
        let images = out.get(Field::ImageUrls);
        assert_eq!(
            images.value,
            Some(FieldValue::Urls(vec![
                "https://cdn.example.com/a.jpg".to_string(),
                "https://listings.example.com/photos/b.jpg".to_string(),
            ]))
        );
        assert_eq!(images.flags, vec![FieldFlag::DroppedEntries(2)]);
    }

    #[test]
    fn test_relative_urls_dropped_without_base() {
        let out = normalizer().normalize(&raw(json!({"image_urls": ["/a.jpg", "not a url"]})), None);
        assert_eq!(out.get(Field::ImageUrls).value, Some(FieldValue::Urls(vec![])));
    }

    #[test]
    fn test_aliases_and_unknown_keys() {
        let out = normalizer().normalize(
            &raw(json!({"beds": "3", "bedrooms": "4", "sqft": 1200, "hoa_fee": "$250"})),
            None,
        );
        assert_eq!(out.get(Field::Bedrooms).value, Some(FieldValue::Integer(4)));
        assert_eq!(out.get(Field::SquareFeet).value, Some(FieldValue::Integer(1200)));
        assert_eq!(out.unknown_keys(), &["hoa_fee".to_string()]);
    }

    #[test]
    fn test_text_is_collapsed_and_empty_is_absent() {
        let out = normalizer().normalize(
            &raw(json!({"address": "  12  Oak   Ave\n Springfield ", "neighborhood": "   ", "mls_number": 778899})),
            None,
        );
        assert_eq!(
            out.get(Field::Address).value,
            Some(FieldValue::Text("12 Oak Ave Springfield".to_string()))
        );
        assert!(out.get(Field::Neighborhood).is_absent());
        assert_eq!(out.get(Field::MlsNumber).value, Some(FieldValue::Text("778899".to_string())));
    }

    #[test]
    fn test_overflowing_price_is_out_of_range() {
        let out = normalizer().normalize(&raw(json!({"price": "$79,228,162,514,264,337,593,543,950B"})), None);
        let price = out.get(Field::Price);
        assert_eq!(price.value, None);
        assert!(matches!(
            price.error,
            Some(NormalizationError::OutOfRange { field: Field::Price, .. })
        ));
    }

    #[test]
    fn test_price_object_range_is_flagged_approximate() {
        let out = normalizer().normalize(&raw(json!({"price": {"amount": "$400K–$450K", "unit": "USD"}})), None);
        let price = out.get(Field::Price);
        assert_eq!(price.value, Some(FieldValue::Money(Money::usd(400_000))));
        assert_eq!(price.flags, vec![FieldFlag::Approximate]);
    }

    #[test]
    fn test_money_value_keeps_fraction() {
        let out = normalizer().normalize(&raw(json!({"price": {"amount": 1234.5, "unit": "EUR"}})), None);
        assert_eq!(
            out.get(Field::Price).value,
            Some(FieldValue::Money(Money::new(Decimal::new(12345, 1), "EUR")))
        );
    }
}
