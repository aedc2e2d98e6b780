use crate::error::ExtractError;
use crate::models::RawFields;
use crate::scrapers::traits::{Extractor, Page};
use crate::scrapers::types::HtmlExtractorConfig;
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use std::sync::OnceLock;
use tracing::debug;

/// Selectors tried in order for each field; first non-empty text wins
const FIELD_SELECTORS: &[(&str, &[&str])] = &[
    ("address", &["[data-testid=\"address\"]", "[itemprop=\"address\"]", "address", "h1.address"]),
    ("price", &["[data-testid=\"price\"]", "[itemprop=\"price\"]", ".price"]),
    ("bedrooms", &["[data-testid=\"bed-value\"]", "[data-testid=\"beds\"]"]),
    ("bathrooms", &["[data-testid=\"bath-value\"]", "[data-testid=\"baths\"]"]),
    ("square_feet", &["[data-testid=\"sqft-value\"]", "[data-testid=\"sqft\"]"]),
    ("lot_size", &["[data-testid=\"lot-size\"]"]),
    ("year_built", &["[data-testid=\"year-built\"]"]),
    ("property_type", &["[data-testid=\"property-type\"]"]),
    ("listing_agent", &["[data-testid=\"listing-agent\"]", "[itemprop=\"agent\"]", ".listing-agent"]),
    ("mls_number", &["[data-testid=\"mls-number\"]"]),
    ("description", &["[data-testid=\"home-description-text\"]", "[itemprop=\"description\"]"]),
    ("neighborhood", &["[data-testid=\"neighborhood\"]", ".neighborhood"]),
];

/// schema.org residence types that name a property type
const RESIDENCE_TYPES: &[&str] = &["SingleFamilyResidence", "Apartment", "House", "Condominium", "Townhouse"];

/// Rule-based extractor: JSON-LD first, then known selectors, then text heuristics
pub struct HtmlExtractor {
    config: HtmlExtractorConfig,
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlExtractor {
    pub fn new() -> Self {
        Self::with_config(HtmlExtractorConfig::default())
    }

    pub fn with_config(config: HtmlExtractorConfig) -> Self {
        Self { config }
    }

    /// Parse candidate fields out of a listing page
    pub fn extract_fields(&self, html: &str) -> RawFields {
        let document = Html::parse_document(html);
        let mut fields = RawFields::new();

        for node in json_ld_nodes(&document) {
            merge_json_ld(&node, &mut fields);
        }

        for (key, selectors) in FIELD_SELECTORS {
            if fields.contains_key(*key) {
                continue;
            }
            if let Some(text) = first_text(&document, selectors) {
                fields.insert(key.to_string(), Value::String(text));
            }
        }

        if !fields.contains_key("description") {
            if let Some(content) = meta_content(&document, &["meta[name=\"description\"]", "meta[property=\"og:description\"]"]) {
                fields.insert("description".to_string(), Value::String(content));
            }
        }

        let body_text = visible_text(&document);
        for (key, value) in text_heuristics(&body_text) {
            fields.entry(key.to_string()).or_insert(Value::String(value));
        }

        if !fields.contains_key("image_urls") {
            let images = image_sources(&document, self.config.max_images);
            fields.insert("image_urls".to_string(), json!(images));
        }

        debug!("Extracted {} candidate fields from HTML", fields.len());
        fields
    }
}

#[async_trait]
impl Extractor for HtmlExtractor {
    async fn extract(&self, page: &Page) -> Result<RawFields, ExtractError> {
        Ok(self.extract_fields(&page.content))
    }

    fn name(&self) -> &'static str {
        "html"
    }
}

fn json_ld_nodes(document: &Html) -> Vec<Value> {
    let Ok(selector) = Selector::parse("script[type=\"application/ld+json\"]") else {
        return Vec::new();
    };

    let mut nodes = Vec::new();
    for script in document.select(&selector) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<Value>(raw.trim()) else {
            debug!("Skipping unparsable JSON-LD block");
            continue;
        };
        flatten_json_ld(value, &mut nodes);
    }
    nodes
}

fn flatten_json_ld(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.into_iter().for_each(|item| flatten_json_ld(item, out)),
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten_json_ld(graph, out);
            }
            if let Some(main) = map.remove("mainEntity") {
                flatten_json_ld(main, out);
            }
            out.push(Value::Object(map));
        }
        _ => {}
    }
}

fn merge_json_ld(node: &Value, fields: &mut RawFields) {
    let mut set = |key: &str, value: Value| {
        if !value.is_null() {
            fields.entry(key.to_string()).or_insert(value);
        }
    };

    let types: Vec<&str> = match node.get("@type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    if let Some(residence) = types.iter().find(|t| RESIDENCE_TYPES.contains(*t)) {
        set("property_type", Value::String(split_camel_case(residence)));
    }

    if let Some(address) = node.get("address") {
        set("address", postal_address(address));
    }
    if let Some(offers) = node.get("offers") {
        let offer = match offers {
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        };
        if let Some(price) = offer.get("price") {
            let unit = offer.get("priceCurrency").cloned().unwrap_or(Value::Null);
            let price = if unit.is_null() {
                price.clone()
            } else {
                json!({"amount": price, "unit": unit})
            };
            set("price", price);
        }
    }
    if let Some(bedrooms) = node.get("numberOfBedrooms") {
        set("bedrooms", scalar(bedrooms));
    }
    for key in ["numberOfBathroomsTotal", "numberOfFullBathrooms"] {
        if let Some(v) = node.get(key) {
            set("bathrooms", scalar(v));
        }
    }
    if let Some(floor) = node.get("floorSize") {
        set("square_feet", quantitative_value(floor));
    }
    if let Some(lot) = node.get("lotSize") {
        set("lot_size", quantitative_value(lot));
    }
    if let Some(year) = node.get("yearBuilt") {
        set("year_built", scalar(year));
    }
    if let Some(description) = node.get("description") {
        set("description", description.clone());
    }
    if let Some(image) = node.get("image") {
        let urls: Vec<Value> = match image {
            Value::Array(items) => items.iter().map(image_url).collect(),
            single => vec![image_url(single)],
        };
        set("image_urls", Value::Array(urls));
    }
}

/// `{"value": 1850, "unitText": "sq ft"}` to `"1850 sq ft"`
fn quantitative_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let magnitude = map.get("value").map(scalar).unwrap_or(Value::Null);
            let unit = map
                .get("unitText")
                .or_else(|| map.get("unitCode"))
                .and_then(Value::as_str)
                .map(|u| match u {
                    "FTK" => "sq ft",
                    "MTK" => "sq m",
                    "ACR" => "acres",
                    other => other,
                });
            match (magnitude, unit) {
                (Value::Null, _) => Value::Null,
                (m, Some(unit)) => Value::String(format!("{} {}", value_text(&m), unit)),
                (m, None) => m,
            }
        }
        other => other.clone(),
    }
}

fn postal_address(address: &Value) -> Value {
    match address {
        Value::Object(map) => {
            let parts: Vec<String> = ["streetAddress", "addressLocality", "addressRegion", "postalCode"]
                .iter()
                .filter_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if parts.is_empty() {
                Value::Null
            } else {
                Value::String(parts.join(", "))
            }
        }
        other => other.clone(),
    }
}

fn image_url(value: &Value) -> Value {
    match value {
        Value::Object(map) => map
            .get("url")
            .or_else(|| map.get("contentUrl"))
            .cloned()
            .unwrap_or(Value::Null),
        other => other.clone(),
    }
}

fn scalar(value: &Value) -> Value {
    match value {
        Value::Object(map) => map.get("value").cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn split_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if i > 0 && c.is_uppercase() {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

fn first_text(document: &Html, selectors: &[&str]) -> Option<String> {
    for selector_str in selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = element_text(element);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn element_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn meta_content(document: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|selector_str| {
        let selector = Selector::parse(selector_str).ok()?;
        document
            .select(&selector)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|content| !content.is_empty())
            .map(String::from)
    })
}

fn image_sources(document: &Html, limit: usize) -> Vec<String> {
    let mut sources = Vec::new();
    if let Ok(og) = Selector::parse("meta[property=\"og:image\"]") {
        sources.extend(
            document
                .select(&og)
                .filter_map(|el| el.value().attr("content"))
                .map(String::from),
        );
    }
    if let Ok(img) = Selector::parse("img") {
        sources.extend(
            document
                .select(&img)
                .filter_map(|el| el.value().attr("src").or_else(|| el.value().attr("data-src")))
                .filter(|src| !src.starts_with("data:"))
                .map(String::from),
        );
    }
    sources.dedup();
    sources.truncate(limit);
    sources
}

/// Page text outside scripts and styles, whitespace collapsed
pub(crate) fn visible_text(document: &Html) -> String {
    let mut chunks = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|el| el.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript" | "template"));
        if !hidden {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
        }
    }
    chunks.join(" ")
}

struct Heuristic {
    key: &'static str,
    pattern: Regex,
    /// Template applied to the first capture, `{}` is replaced
    template: &'static str,
}

fn heuristics() -> &'static [Heuristic] {
    static HEURISTICS: OnceLock<Vec<Heuristic>> = OnceLock::new();
    HEURISTICS.get_or_init(|| {
        let table: &[(&'static str, &'static str, &'static str)] = &[
            ("price", r"(\$\s?\d{1,3}(?:,\d{3})+)", "{}"),
            ("bedrooms", r"(?i)\b(\d{1,2})\s*(?:bds?|beds?|bedrooms?)\b", "{}"),
            ("bathrooms", r"(?i)\b(\d{1,2}(?:\.\d)?)\s*(?:ba|baths?|bathrooms?)\b", "{}"),
            ("square_feet", r"(?i)\b(\d{1,3}(?:,\d{3})+|\d{3,6})\s*(?:sq\.?\s*ft|sqft|square\s+feet)\b", "{} sq ft"),
            ("lot_size", r"(?i)\blot(?:\s+size)?:?\s*(\d[\d,.]*\s*(?:acres?|sq\.?\s*ft\.?|sqft))", "{}"),
            ("year_built", r"(?i)\b(?:built\s+in|year\s+built:?)\s*(\d{4})\b", "{}"),
            ("mls_number", r"(?i)\bMLS\s*(?:#|number|no\.?|id)?\s*:?\s*([A-Z0-9-]*\d[A-Z0-9-]*)", "{}"),
            ("days_on_market", r"(?i)\b(\d+)\s+days?\s+on\s+(?:the\s+)?(?:market|\w+)\b", "{}"),
        ];
        table
            .iter()
            .filter_map(|&(key, pattern, template)| {
                Regex::new(pattern).ok().map(|pattern| Heuristic {
                    key,
                    pattern,
                    template,
                })
            })
            .collect()
    })
}

fn text_heuristics(text: &str) -> Vec<(&'static str, String)> {
    heuristics()
        .iter()
        .filter_map(|h| {
            let captures = h.pattern.captures(text)?;
            let value = captures.get(1)?.as_str().trim();
            Some((h.key, h.template.replace("{}", value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html>
        <head>
          <meta name="description" content="Bright craftsman close to the park.">
          <meta property="og:image" content="https://cdn.example.com/hero.jpg">
          <script>var tracking = "99 beds";</script>
        </head>
        <body>
          <h1 data-testid="address">742 Evergreen Terrace, Springfield</h1>
          <span data-testid="price">$450,000</span>
          <ul class="facts">
            <li>4 beds</li><li>2.5 baths</li><li>1,850 sq ft</li>
            <li>Lot size: 0.25 acres</li>
            <li>Built in 1989</li>
            <li>12 days on market</li>
            <li>MLS #: SP-100234</li>
          </ul>
          <img src="/photos/1.jpg">
          <img src="data:image/png;base64,AAAA">
        </body>
        </html>
    "#;

    #[test]
    fn test_extracts_selectors_and_text_heuristics() {
        let fields = HtmlExtractor::new().extract_fields(LISTING);

        assert_eq!(fields["address"], json!("742 Evergreen Terrace, Springfield"));
        assert_eq!(fields["price"], json!("$450,000"));
        assert_eq!(fields["bedrooms"], json!("4"));
        assert_eq!(fields["bathrooms"], json!("2.5"));
        assert_eq!(fields["square_feet"], json!("1,850 sq ft"));
        assert_eq!(fields["lot_size"], json!("0.25 acres"));
        assert_eq!(fields["year_built"], json!("1989"));
        assert_eq!(fields["days_on_market"], json!("12"));
        assert_eq!(fields["mls_number"], json!("SP-100234"));
        assert_eq!(fields["description"], json!("Bright craftsman close to the park."));
        assert_eq!(
            fields["image_urls"],
            json!(["https://cdn.example.com/hero.jpg", "/photos/1.jpg"])
        );
    }

    #[test]
    fn test_json_ld_takes_precedence() {
        let html = r#"
            <html><head>
            <script type="application/ld+json">
            {"@context": "https://schema.org", "@graph": [
              {"@type": ["Product", "RealEstateListing"],
               "offers": {"@type": "Offer", "price": "615000", "priceCurrency": "USD"}},
              {"@type": "SingleFamilyResidence",
               "address": {"streetAddress": "12 Oak Ave", "addressLocality": "Portland", "addressRegion": "OR", "postalCode": "97201"},
               "numberOfBedrooms": 3,
               "numberOfBathroomsTotal": 2,
               "floorSize": {"@type": "QuantitativeValue", "value": 1640, "unitCode": "FTK"},
               "yearBuilt": 1925,
               "image": [{"url": "https://img.example.com/a.jpg"}, "https://img.example.com/b.jpg"]}
            ]}
            </script>
            </head><body><span data-testid="price">$1</span><p>5 beds</p></body></html>
        "#;
        let fields = HtmlExtractor::new().extract_fields(html);

        assert_eq!(fields["address"], json!("12 Oak Ave, Portland, OR, 97201"));
        assert_eq!(fields["price"], json!({"amount": "615000", "unit": "USD"}));
        assert_eq!(fields["bedrooms"], json!(3));
        assert_eq!(fields["bathrooms"], json!(2));
        assert_eq!(fields["square_feet"], json!("1640 sq ft"));
        assert_eq!(fields["year_built"], json!(1925));
        assert_eq!(fields["property_type"], json!("Single Family Residence"));
        assert_eq!(
            fields["image_urls"],
            json!(["https://img.example.com/a.jpg", "https://img.example.com/b.jpg"])
        );
    }

    #[test]
    fn test_total_room_count_is_not_bedrooms() {
        let html = r#"
            <html><head><script type="application/ld+json">
            {"@type": "Apartment", "numberOfRooms": 5, "address": "8 Pine St"}
            </script></head><body></body></html>
        "#;
        let fields = HtmlExtractor::new().extract_fields(html);
        assert_eq!(fields["address"], json!("8 Pine St"));
        assert!(!fields.contains_key("bedrooms"));
    }

    #[test]
    fn test_script_text_is_ignored() {
        let html = r#"<html><body><script>const x = "7 beds";</script><p>Nothing here</p></body></html>"#;
        let fields = HtmlExtractor::new().extract_fields(html);
        assert!(!fields.contains_key("bedrooms"));
    }

    #[test]
    fn test_empty_page_yields_no_address() {
        let fields = HtmlExtractor::new().extract_fields("");
        assert!(!fields.contains_key("address"));
        assert_eq!(fields["image_urls"], json!([]));
    }
}
