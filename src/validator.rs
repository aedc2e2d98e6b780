//! Validator: normalized fields to a finalized record plus a report.
//!
//! Required fields are checked first and short-circuit to `rejected`. Optional
//! fields degrade the record to `partial`, except where the schema marks a
//! range violation as corruption (negative `days_on_market`).

use crate::error::NormalizationError;
use crate::models::{Field, PropertyRecord, UNKNOWN_PROPERTY_TYPE};
use crate::normalizer::{FieldFlag, FieldValue, NormalizedField, NormalizedFields};
use crate::schema::{FieldKind, FieldSpec, OnViolation, SchemaRegistry};
use chrono::Datelike;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Complete,
    Partial,
    Rejected,
}

impl Status {
    pub fn is_emittable(&self) -> bool {
        matches!(self, Status::Complete | Status::Partial)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Required field absent or unusable
    MissingRequired,
    /// Value that can only come from extractor corruption
    CorruptValue,
    /// Optional field absent
    Missing,
    Unparsable,
    OutOfRange,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::MissingRequired => "missing_required",
            IssueKind::CorruptValue => "corrupt_value",
            IssueKind::Missing => "missing",
            IssueKind::Unparsable => "unparsable",
            IssueKind::OutOfRange => "out_of_range",
        }
    }

    /// Terminal issues reject the record
    pub fn is_terminal(&self) -> bool {
        matches!(self, IssueKind::MissingRequired | IssueKind::CorruptValue)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub field: Field,
    pub kind: IssueKind,
    pub detail: String,
}

impl Issue {
    fn new(field: Field, kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            field,
            kind,
            detail: detail.into(),
        }
    }
}

/// `missing_required:address`
impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.field)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedField {
    pub field: Field,
    #[serde(flatten)]
    pub flag: FieldFlag,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub status: Status,
    pub issues: Vec<Issue>,
    pub flags: Vec<FlaggedField>,
}

impl ValidationReport {
    /// Issues that caused rejection, rendered as `kind:field`
    pub fn rejection_reasons(&self) -> Vec<String> {
        self.issues
            .iter()
            .filter(|i| i.kind.is_terminal())
            .map(ToString::to_string)
            .collect()
    }
}

/// Checks normalized fields against the schema registry
#[derive(Debug, Clone)]
pub struct Validator {
    registry: Arc<SchemaRegistry>,
    current_year: i32,
}

impl Validator {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            current_year: chrono::Utc::now().year(),
        }
    }

    /// Pin the year used for `year_built` bounds
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = year;
        self
    }

    pub fn validate(&self, fields: &NormalizedFields) -> (PropertyRecord, ValidationReport) {
        let mut accepted: Vec<Option<FieldValue>> = vec![None; Field::ALL.len()];
        let mut issues = Vec::new();

        for spec in self.registry.specs().filter(|s| s.required) {
            match self.check(spec, fields.get(spec.field)) {
                Ok(value) => accepted[spec.field as usize] = Some(value),
                Err(issue) => issues.push(issue),
            }
        }

        let rejected_early = !issues.is_empty();
        if !rejected_early {
            for spec in self.registry.specs().filter(|s| !s.required) {
                match self.check(spec, fields.get(spec.field)) {
                    Ok(value) => accepted[spec.field as usize] = Some(value),
                    Err(issue) => issues.push(issue),
                }
            }
        }

        let flags = fields
            .iter()
            .flat_map(|(field, normalized)| {
                normalized.flags.iter().map(move |flag| FlaggedField {
                    field,
                    flag: flag.clone(),
                })
            })
            .collect();

        let status = if issues.iter().any(|i| i.kind.is_terminal()) {
            Status::Rejected
        } else if issues.is_empty() {
            Status::Complete
        } else {
            Status::Partial
        };

        let record = assemble(accepted);
        (record, ValidationReport { status, issues, flags })
    }

    fn check(&self, spec: &FieldSpec, normalized: &NormalizedField) -> Result<FieldValue, Issue> {
        let field = spec.field;

        if let Some(error) = &normalized.error {
            if spec.required {
                return Err(Issue::new(field, IssueKind::MissingRequired, error.to_string()));
            }
            let kind = match error {
                NormalizationError::Unparsable { .. } => IssueKind::Unparsable,
                NormalizationError::OutOfRange { .. } => IssueKind::OutOfRange,
            };
            return Err(Issue::new(field, kind, error.detail()));
        }

        let value = match &normalized.value {
            Some(FieldValue::Text(t)) if field == Field::PropertyType && t == UNKNOWN_PROPERTY_TYPE => None,
            other => other.clone(),
        };
        let value = match value {
            None if spec.kind == FieldKind::UrlList => Some(FieldValue::Urls(Vec::new())),
            other => other,
        };
        let Some(value) = value else {
            let kind = if spec.required {
                IssueKind::MissingRequired
            } else {
                IssueKind::Missing
            };
            return Err(Issue::new(field, kind, "no value extracted"));
        };

        let in_range = match (spec.range, value.as_f64()) {
            (Some(range), Some(n)) => range.contains(n, self.current_year),
            _ => true,
        };
        if !in_range || !fits_record_type(field, &value) {
            let detail = format!("{} outside allowed range", describe(&value));
            let on_violation = spec.range.map(|r| r.on_violation);
            let kind = if spec.required || on_violation == Some(OnViolation::Reject) {
                IssueKind::CorruptValue
            } else {
                IssueKind::OutOfRange
            };
            return Err(Issue::new(field, kind, detail));
        }

        Ok(value)
    }
}

/// Integers must also fit the record's field width
fn fits_record_type(field: Field, value: &FieldValue) -> bool {
    match (field, value) {
        (Field::Bedrooms | Field::DaysOnMarket, FieldValue::Integer(n)) => u32::try_from(*n).is_ok(),
        (Field::YearBuilt, FieldValue::Integer(n)) => i32::try_from(*n).is_ok(),
        (Field::SquareFeet, FieldValue::Integer(n)) => u64::try_from(*n).is_ok(),
        _ => true,
    }
}

fn describe(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(t) => t.clone(),
        FieldValue::Money(m) => m.to_string(),
        FieldValue::Integer(n) => n.to_string(),
        FieldValue::Rational(r) => r.to_string(),
        FieldValue::Area(a) => format!("{} {}", a.magnitude, a.unit),
        FieldValue::Urls(urls) => format!("{} urls", urls.len()),
    }
}

fn assemble(mut accepted: Vec<Option<FieldValue>>) -> PropertyRecord {
    let mut take = |field: Field| accepted[field as usize].take();
    let text = |value: Option<FieldValue>| match value {
        Some(FieldValue::Text(t)) => Some(t),
        _ => None,
    };
    let integer = |value: Option<FieldValue>| match value {
        Some(FieldValue::Integer(n)) => Some(n),
        _ => None,
    };

    PropertyRecord {
        address: text(take(Field::Address)),
        price: match take(Field::Price) {
            Some(FieldValue::Money(m)) => Some(m),
            _ => None,
        },
        bedrooms: integer(take(Field::Bedrooms)).and_then(|n| u32::try_from(n).ok()),
        bathrooms: match take(Field::Bathrooms) {
            Some(FieldValue::Rational(r)) => Some(r),
            _ => None,
        },
        square_feet: integer(take(Field::SquareFeet)).and_then(|n| u64::try_from(n).ok()),
        lot_size: match take(Field::LotSize) {
            Some(FieldValue::Area(a)) => Some(a),
            _ => None,
        },
        year_built: integer(take(Field::YearBuilt)).and_then(|n| i32::try_from(n).ok()),
        property_type: text(take(Field::PropertyType))
            .unwrap_or_else(|| UNKNOWN_PROPERTY_TYPE.to_string()),
        listing_agent: text(take(Field::ListingAgent)),
        days_on_market: integer(take(Field::DaysOnMarket)).and_then(|n| u32::try_from(n).ok()),
        mls_number: text(take(Field::MlsNumber)),
        description: text(take(Field::Description)),
        image_urls: match take(Field::ImageUrls) {
            Some(FieldValue::Urls(urls)) => urls,
            _ => Vec::new(),
        },
        neighborhood: text(take(Field::Neighborhood)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Money, RawFields};
    use crate::normalizer::Normalizer;
    use serde_json::{json, Value};

    fn run(value: Value) -> (PropertyRecord, ValidationReport) {
        let registry = Arc::new(SchemaRegistry::new());
        let raw: RawFields = value.as_object().unwrap().clone().into_iter().collect();
        let normalized = Normalizer::new(registry.clone()).normalize(&raw, None);
        Validator::new(registry).with_current_year(2026).validate(&normalized)
    }

    fn full_listing() -> Value {
        json!({
            "address": "742 Evergreen Terrace, Springfield",
            "price": "$450,000",
            "bedrooms": "4",
            "bathrooms": "2.5",
            "square_feet": "1,850 sq ft",
            "lot_size": "0.25 acres",
            "year_built": 1989,
            "property_type": "Single-Family",
            "listing_agent": "Marge Simpson",
            "days_on_market": 12,
            "mls_number": "SP-100234",
            "description": "Charming family home.",
            "image_urls": ["https://cdn.example.com/1.jpg"],
            "neighborhood": "Evergreen"
        })
    }

    #[test]
    fn test_full_listing_is_complete() {
        let (record, report) = run(full_listing());
        assert_eq!(report.status, Status::Complete, "{:?}", report.issues);
        assert!(report.issues.is_empty());
        assert_eq!(record.price, Some(Money::usd(450_000)));
        assert_eq!(record.square_feet, Some(1850));
        assert_eq!(record.bathrooms, Some(2.5));
        assert_eq!(record.property_type, "Single Family Home");
    }

    #[test]
    fn test_missing_address_is_rejected() {
        let mut listing = full_listing();
        listing.as_object_mut().unwrap().remove("address");
        let (record, report) = run(listing);

        assert_eq!(report.status, Status::Rejected);
        assert_eq!(report.rejection_reasons(), vec!["missing_required:address".to_string()]);
        // optional checks are skipped once a required field fails
        assert_eq!(report.issues.len(), 1);
        assert_eq!(record.address, None);
    }

    #[test]
    fn test_all_missing_required_fields_are_listed() {
        let registry = Arc::new(SchemaRegistry::new().with_required(Field::Price));
        let normalized = Normalizer::new(registry.clone()).normalize(&RawFields::new(), None);
        let (_, report) = Validator::new(registry).validate(&normalized);

        assert_eq!(report.status, Status::Rejected);
        assert_eq!(
            report.rejection_reasons(),
            vec!["missing_required:address".to_string(), "missing_required:price".to_string()]
        );
    }

    #[test]
    fn test_unparsable_optional_degrades_to_partial() {
        let mut listing = full_listing();
        listing["bedrooms"] = json!("N/A");
        let (record, report) = run(listing);

        assert_eq!(report.status, Status::Partial);
        assert_eq!(record.bedrooms, None);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].field, Field::Bedrooms);
        assert_eq!(report.issues[0].kind, IssueKind::Unparsable);
    }

    #[test]
    fn test_missing_optional_fields_make_partial() {
        let (record, report) = run(json!({"address": "1 Main St"}));
        assert_eq!(report.status, Status::Partial);
        assert_eq!(record.property_type, "Unknown");
        assert!(report.issues.iter().all(|i| i.kind == IssueKind::Missing));
        assert!(!report.issues.iter().any(|i| i.field == Field::ImageUrls));
    }

    #[test]
    fn test_studio_and_current_year_are_valid() {
        let mut listing = full_listing();
        listing["bedrooms"] = json!(0);
        listing["year_built"] = json!(2026);
        let (record, report) = run(listing);

        assert_eq!(report.status, Status::Complete);
        assert_eq!(record.bedrooms, Some(0));
        assert_eq!(record.year_built, Some(2026));
    }

    #[test]
    fn test_out_of_range_optional_is_cleared() {
        let mut listing = full_listing();
        listing["year_built"] = json!(1492);
        listing["square_feet"] = json!(0);
        let (record, report) = run(listing);

        assert_eq!(report.status, Status::Partial);
        assert_eq!(record.year_built, None);
        assert_eq!(record.square_feet, None);
        assert!(report
            .issues
            .iter()
            .all(|i| i.kind == IssueKind::OutOfRange));
    }

    #[test]
    fn test_negative_days_on_market_rejects() {
        let mut listing = full_listing();
        listing["days_on_market"] = json!(-3);
        let (record, report) = run(listing);

        assert_eq!(report.status, Status::Rejected);
        assert_eq!(report.rejection_reasons(), vec!["corrupt_value:days_on_market".to_string()]);
        assert_eq!(record.days_on_market, None);
    }

    #[test]
    fn test_flags_are_reported_without_changing_status() {
        let mut listing = full_listing();
        listing["price"] = json!("$400K–$450K");
        let (record, report) = run(listing);

        assert_eq!(report.status, Status::Complete);
        assert_eq!(record.price, Some(Money::usd(400_000)));
        assert_eq!(
            report.flags,
            vec![FlaggedField {
                field: Field::Price,
                flag: FieldFlag::Approximate
            }]
        );
    }

    #[test]
    fn test_never_complete_with_null_required() {
        for listing in [json!({}), json!({"address": ""}), json!({"address": {"street": "x"}})] {
            let (_, report) = run(listing);
            assert_ne!(report.status, Status::Complete);
            assert_eq!(report.status, Status::Rejected);
        }
    }
}
