use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw field candidates as produced by an extractor, keyed by field name
pub type RawFields = BTreeMap<String, serde_json::Value>;

/// Canonical fields of a property record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Address,
    Price,
    Bedrooms,
    Bathrooms,
    SquareFeet,
    LotSize,
    YearBuilt,
    PropertyType,
    ListingAgent,
    DaysOnMarket,
    MlsNumber,
    Description,
    ImageUrls,
    Neighborhood,
}

impl Field {
    pub const ALL: [Field; 14] = [
        Field::Address,
        Field::Price,
        Field::Bedrooms,
        Field::Bathrooms,
        Field::SquareFeet,
        Field::LotSize,
        Field::YearBuilt,
        Field::PropertyType,
        Field::ListingAgent,
        Field::DaysOnMarket,
        Field::MlsNumber,
        Field::Description,
        Field::ImageUrls,
        Field::Neighborhood,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Address => "address",
            Field::Price => "price",
            Field::Bedrooms => "bedrooms",
            Field::Bathrooms => "bathrooms",
            Field::SquareFeet => "square_feet",
            Field::LotSize => "lot_size",
            Field::YearBuilt => "year_built",
            Field::PropertyType => "property_type",
            Field::ListingAgent => "listing_agent",
            Field::DaysOnMarket => "days_on_market",
            Field::MlsNumber => "mls_number",
            Field::Description => "description",
            Field::ImageUrls => "image_urls",
            Field::Neighborhood => "neighborhood",
        }
    }

    /// Look up a field by its canonical name
    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A price: decimal amount plus ISO currency code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    #[serde(with = "amount_format")]
    pub amount: Decimal,
    pub unit: String,
}

impl Money {
    pub fn new(amount: Decimal, unit: impl Into<String>) -> Self {
        Self {
            amount: amount.normalize(),
            unit: unit.into(),
        }
    }

    pub fn usd(amount: impl Into<Decimal>) -> Self {
        Self::new(amount.into(), "USD")
    }

    fn symbol(&self) -> Option<&'static str> {
        match self.unit.as_str() {
            "USD" => Some("$"),
            "EUR" => Some("€"),
            "GBP" => Some("£"),
            "CAD" => Some("CA$"),
            "AUD" => Some("A$"),
            _ => None,
        }
    }
}

/// Renders listing-style prices: `$450,000`, `€1,250,000`, `5,195,000 SEK`
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.amount.normalize().to_string();
        let (sign, unsigned) = match raw.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", raw.as_str()),
        };
        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((i, fr)) => (i, Some(fr)),
            None => (unsigned, None),
        };

        let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
        for (i, c) in int_part.chars().enumerate() {
            if i > 0 && (int_part.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(c);
        }
        if let Some(fr) = frac_part {
            grouped.push('.');
            grouped.push_str(fr);
        }

        match self.symbol() {
            Some(symbol) => write!(f, "{}{}{}", sign, symbol, grouped),
            None => write!(f, "{}{} {}", sign, grouped, self.unit),
        }
    }
}

/// Whole amounts serialize as JSON integers, fractional ones as floats
mod amount_format {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        let amount = amount.normalize();
        if amount.scale() == 0 {
            if let Some(whole) = amount.to_i64() {
                return serializer.serialize_i64(whole);
            }
        }
        match amount.to_f64() {
            Some(value) => serializer.serialize_f64(value),
            None => serializer.serialize_str(&amount.to_string()),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        <Decimal as Deserialize>::deserialize(deserializer)
    }
}

/// A magnitude with the unit it was stated in (`0.25 acres`, `1850 sqft`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub magnitude: f64,
    pub unit: String,
}

impl Measurement {
    pub fn new(magnitude: f64, unit: impl Into<String>) -> Self {
        Self {
            magnitude,
            unit: unit.into(),
        }
    }
}

pub const UNKNOWN_PROPERTY_TYPE: &str = "Unknown";

/// Canonical property record, one per source URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub address: Option<String>,
    pub price: Option<Money>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f64>,
    pub square_feet: Option<u64>,
    pub lot_size: Option<Measurement>,
    pub year_built: Option<i32>,
    pub property_type: String,
    pub listing_agent: Option<String>,
    pub days_on_market: Option<u32>,
    pub mls_number: Option<String>,
    pub description: Option<String>,
    pub image_urls: Vec<String>,
    pub neighborhood: Option<String>,
}

impl Default for PropertyRecord {
    fn default() -> Self {
        Self {
            address: None,
            price: None,
            bedrooms: None,
            bathrooms: None,
            square_feet: None,
            lot_size: None,
            year_built: None,
            property_type: UNKNOWN_PROPERTY_TYPE.to_string(),
            listing_agent: None,
            days_on_market: None,
            mls_number: None,
            description: None,
            image_urls: Vec::new(),
            neighborhood: None,
        }
    }
}

impl PropertyRecord {
    /// The record in extractor shape, so it can be fed back through normalization
    pub fn to_raw_fields(&self) -> RawFields {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => RawFields::new(),
        }
    }
}
