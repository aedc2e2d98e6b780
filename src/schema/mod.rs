//! Schema registry: the canonical field table.
//!
//! Every field's kind, nullability and range lives here, together with the
//! property type vocabulary and the key aliases extractors are allowed to use.
//! Site-specific synonyms and aliases are registered through the `with_*`
//! builders; nothing downstream needs to change when they are added.

use crate::models::{Field, UNKNOWN_PROPERTY_TYPE};
use std::collections::HashMap;

/// How a field's raw value is coerced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Money,
    Integer,
    Rational,
    Area,
    PropertyType,
    UrlList,
}

/// Upper bound of a numeric range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Value(f64),
    /// The calendar year at validation time
    CurrentYear,
}

/// What a range violation does to the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnViolation {
    /// Clear the field and mark the record partial
    Degrade,
    /// Reject the whole record; the value indicates extractor corruption
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<Bound>,
    pub on_violation: OnViolation,
}

impl Range {
    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
            on_violation: OnViolation::Degrade,
        }
    }

    pub fn between(min: f64, max: Bound) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            on_violation: OnViolation::Degrade,
        }
    }

    pub fn rejecting(mut self) -> Self {
        self.on_violation = OnViolation::Reject;
        self
    }

    pub fn contains(&self, value: f64, current_year: i32) -> bool {
        if let Some(min) = self.min {
            if value < min {
                return false;
            }
        }
        match self.max {
            Some(Bound::Value(max)) => value <= max,
            Some(Bound::CurrentYear) => value <= f64::from(current_year),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub field: Field,
    pub kind: FieldKind,
    pub required: bool,
    pub range: Option<Range>,
}

impl FieldSpec {
    fn new(field: Field, kind: FieldKind) -> Self {
        Self {
            field,
            kind,
            required: false,
            range: None,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }
}

const VOCABULARY: &[&str] = &[
    "Single Family Home",
    "Condo",
    "Townhouse",
    "Multi-Family",
    "Apartment",
    "Co-op",
    "Manufactured",
    "Land",
    "Farm",
    "Commercial",
    UNKNOWN_PROPERTY_TYPE,
];

const SYNONYMS: &[(&str, &str)] = &[
    ("single family", "Single Family Home"),
    ("single family residence", "Single Family Home"),
    ("single family residential", "Single Family Home"),
    ("sfh", "Single Family Home"),
    ("sfr", "Single Family Home"),
    ("house", "Single Family Home"),
    ("detached", "Single Family Home"),
    ("residential", "Single Family Home"),
    ("condominium", "Condo"),
    ("condos", "Condo"),
    ("townhome", "Townhouse"),
    ("town house", "Townhouse"),
    ("row house", "Townhouse"),
    ("rowhouse", "Townhouse"),
    ("multi family", "Multi-Family"),
    ("multifamily", "Multi-Family"),
    ("duplex", "Multi-Family"),
    ("triplex", "Multi-Family"),
    ("fourplex", "Multi-Family"),
    ("apartments", "Apartment"),
    ("flat", "Apartment"),
    ("coop", "Co-op"),
    ("cooperative", "Co-op"),
    ("mobile", "Manufactured"),
    ("mobile home", "Manufactured"),
    ("manufactured home", "Manufactured"),
    ("lot", "Land"),
    ("lots land", "Land"),
    ("vacant land", "Land"),
    ("farm ranch", "Farm"),
    ("ranch", "Farm"),
];

const ALIASES: &[(&str, Field)] = &[
    ("street_address", Field::Address),
    ("full_address", Field::Address),
    ("list_price", Field::Price),
    ("listing_price", Field::Price),
    ("asking_price", Field::Price),
    ("beds", Field::Bedrooms),
    ("bedroom", Field::Bedrooms),
    ("bd", Field::Bedrooms),
    ("br", Field::Bedrooms),
    ("baths", Field::Bathrooms),
    ("bathroom", Field::Bathrooms),
    ("ba", Field::Bathrooms),
    ("sqft", Field::SquareFeet),
    ("square_footage", Field::SquareFeet),
    ("living_area", Field::SquareFeet),
    ("floor_size", Field::SquareFeet),
    ("lot", Field::LotSize),
    ("lot_area", Field::LotSize),
    ("year_constructed", Field::YearBuilt),
    ("built", Field::YearBuilt),
    ("home_type", Field::PropertyType),
    ("type", Field::PropertyType),
    ("agent", Field::ListingAgent),
    ("listed_by", Field::ListingAgent),
    ("dom", Field::DaysOnMarket),
    ("days_listed", Field::DaysOnMarket),
    ("time_on_market", Field::DaysOnMarket),
    ("mls", Field::MlsNumber),
    ("mls_id", Field::MlsNumber),
    ("mls_num", Field::MlsNumber),
    ("summary", Field::Description),
    ("remarks", Field::Description),
    ("images", Field::ImageUrls),
    ("photos", Field::ImageUrls),
    ("photo_urls", Field::ImageUrls),
    ("image_url", Field::ImageUrls),
    ("neighbourhood", Field::Neighborhood),
    ("subdivision", Field::Neighborhood),
];

/// Lookup table for canonical fields, vocabulary and key aliases
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    specs: Vec<FieldSpec>,
    vocabulary: Vec<String>,
    synonyms: HashMap<String, String>,
    aliases: HashMap<String, Field>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// The property listing schema, with `address` as the only required field
    pub fn new() -> Self {
        let specs = Field::ALL
            .iter()
            .map(|&field| match field {
                Field::Address => FieldSpec::new(field, FieldKind::Text).required(),
                Field::Price => FieldSpec::new(field, FieldKind::Money)
                    .with_range(Range::at_least(0.0)),
                Field::Bedrooms => FieldSpec::new(field, FieldKind::Integer)
                    .with_range(Range::at_least(0.0)),
                Field::Bathrooms => FieldSpec::new(field, FieldKind::Rational)
                    .with_range(Range::at_least(0.0)),
                Field::SquareFeet => FieldSpec::new(field, FieldKind::Area)
                    .with_range(Range::at_least(1.0)),
                Field::LotSize => FieldSpec::new(field, FieldKind::Area)
                    .with_range(Range::at_least(0.0)),
                Field::YearBuilt => FieldSpec::new(field, FieldKind::Integer)
                    .with_range(Range::between(1600.0, Bound::CurrentYear)),
                Field::PropertyType => FieldSpec::new(field, FieldKind::PropertyType),
                Field::DaysOnMarket => FieldSpec::new(field, FieldKind::Integer)
                    .with_range(Range::at_least(0.0).rejecting()),
                Field::ImageUrls => FieldSpec::new(field, FieldKind::UrlList),
                Field::ListingAgent
                | Field::MlsNumber
                | Field::Description
                | Field::Neighborhood => FieldSpec::new(field, FieldKind::Text),
            })
            .collect();

        let mut synonyms: HashMap<String, String> = VOCABULARY
            .iter()
            .map(|term| (vocabulary_key(term), term.to_string()))
            .collect();
        for (raw, canonical) in SYNONYMS {
            synonyms.insert(vocabulary_key(raw), canonical.to_string());
        }

        let aliases = ALIASES
            .iter()
            .map(|(key, field)| (canonical_key(key), *field))
            .collect();

        Self {
            specs,
            vocabulary: VOCABULARY.iter().map(|t| t.to_string()).collect(),
            synonyms,
            aliases,
        }
    }

    /// Map another spelling of a property type onto a vocabulary term.
    /// The term is added to the vocabulary if it is new.
    pub fn with_synonym(mut self, raw: &str, canonical: &str) -> Self {
        if !self.vocabulary.iter().any(|t| t == canonical) {
            self.vocabulary.push(canonical.to_string());
            self.synonyms
                .insert(vocabulary_key(canonical), canonical.to_string());
        }
        self.synonyms
            .insert(vocabulary_key(raw), canonical.to_string());
        self
    }

    /// Accept an extractor key as a spelling of `field`
    pub fn with_alias(mut self, key: &str, field: Field) -> Self {
        self.aliases.insert(canonical_key(key), field);
        self
    }

    /// Make an optional field required
    pub fn with_required(mut self, field: Field) -> Self {
        if let Some(spec) = self.specs.iter_mut().find(|s| s.field == field) {
            spec.required = true;
        }
        self
    }

    pub fn spec(&self, field: Field) -> &FieldSpec {
        // specs is built from Field::ALL in declaration order
        &self.specs[field as usize]
    }

    pub fn specs(&self) -> impl Iterator<Item = &FieldSpec> {
        self.specs.iter()
    }

    pub fn required_fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.specs.iter().filter(|s| s.required).map(|s| s.field)
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    /// Resolve an extractor key (canonical name or alias) to a field
    pub fn resolve_key(&self, key: &str) -> Option<Field> {
        let key = canonical_key(key);
        Field::from_name(&key).or_else(|| self.aliases.get(&key).copied())
    }

    /// Find the vocabulary term for a raw property type, if any
    pub fn lookup_property_type(&self, raw: &str) -> Option<&str> {
        self.synonyms.get(&vocabulary_key(raw)).map(String::as_str)
    }
}

/// `"Square Feet"` / `"square-feet"` / `"squareFeet"`-ish keys to `square_feet`
fn canonical_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut prev_lower = false;
    for c in key.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c.to_ascii_lowercase());
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Case, whitespace and punctuation insensitive form of a vocabulary term
fn vocabulary_key(term: &str) -> String {
    term.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
