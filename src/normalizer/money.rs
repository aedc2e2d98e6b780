//! Currency string parsing.

use crate::error::NormalizationError;
use crate::models::{Field, Money};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// A parsed price and whether it had to be approximated (ranges, `~`)
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedMoney {
    pub money: Money,
    pub approximate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MoneyError {
    Unparsable(String),
    /// Amount does not fit in a `Decimal`
    TooLarge(String),
}

impl MoneyError {
    pub(crate) fn into_normalization_error(self, field: Field) -> NormalizationError {
        match self {
            MoneyError::Unparsable(reason) => NormalizationError::unparsable(field, reason),
            MoneyError::TooLarge(value) => NormalizationError::OutOfRange { field, value },
        }
    }
}

const DEFAULT_CURRENCY: &str = "USD";

const KNOWN_CODES: &[&str] = &[
    "USD", "CAD", "AUD", "NZD", "EUR", "GBP", "CHF", "SEK", "NOK", "DKK", "JPY", "MXN", "INR",
];

/// Symbol prefixes, longest first so `CA$` wins over `$`
const SYMBOLS: &[(&str, &str)] = &[
    ("US$", "USD"),
    ("CA$", "CAD"),
    ("AU$", "AUD"),
    ("NZ$", "NZD"),
    ("C$", "CAD"),
    ("A$", "AUD"),
    ("$", "USD"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₹", "INR"),
];

/// Amount, the currency the text stated (if any), and the approximate marker
struct MoneyParts {
    amount: Decimal,
    currency: Option<&'static str>,
    approximate: bool,
}

pub(crate) fn parse_money_value(value: &Value) -> Result<ParsedMoney, MoneyError> {
    match value {
        Value::Number(n) => {
            let amount = decimal_from_number(n)?;
            Ok(ParsedMoney {
                money: Money::new(amount, DEFAULT_CURRENCY),
                approximate: false,
            })
        }
        Value::String(s) => parse_money_str(s),
        Value::Object(map) => {
            let parts = match map.get("amount") {
                Some(Value::Number(n)) => MoneyParts {
                    amount: decimal_from_number(n)?,
                    currency: None,
                    approximate: false,
                },
                Some(Value::String(s)) => parse_money_parts(s)?,
                _ => return Err(MoneyError::Unparsable("price object without amount".to_string())),
            };
            let unit = map
                .get("unit")
                .or_else(|| map.get("currency"))
                .and_then(Value::as_str)
                .map(currency_code)
                .transpose()?;
            let code = match (parts.currency, unit) {
                (Some(stated), Some(unit)) if stated != unit => {
                    return Err(MoneyError::Unparsable(format!(
                        "amount is in {} but unit says {}",
                        stated, unit
                    )));
                }
                (stated, unit) => unit.or(stated).unwrap_or(DEFAULT_CURRENCY),
            };
            Ok(ParsedMoney {
                money: Money::new(parts.amount, code),
                approximate: parts.approximate,
            })
        }
        other => Err(MoneyError::Unparsable(format!("unsupported price value: {}", other))),
    }
}

/// Parse `"$450,000"`, `"450000"`, `"5 195 000 kr"`, `"$400K–$450K"` and friends
pub(crate) fn parse_money_str(raw: &str) -> Result<ParsedMoney, MoneyError> {
    let parts = parse_money_parts(raw)?;
    Ok(ParsedMoney {
        money: Money::new(parts.amount, parts.currency.unwrap_or(DEFAULT_CURRENCY)),
        approximate: parts.approximate,
    })
}

fn parse_money_parts(raw: &str) -> Result<MoneyParts, MoneyError> {
    let ambiguous = || MoneyError::Unparsable(format!("ambiguous price: {:?}", raw));

    let mut text = raw.trim();
    if let Some((_, after_label)) = text.rsplit_once(':') {
        text = after_label.trim();
    }

    let mut approximate = false;
    for marker in ["~", "≈", "approximately", "approx.", "approx", "about"] {
        if let Some(rest) = strip_prefix_ignore_case(text, marker) {
            text = rest.trim_start();
            approximate = true;
            break;
        }
    }

    let negative = text.starts_with('-');
    let text = text.trim_start_matches('-');

    let unified = text.replace(['–', '—'], "-");
    let unified = replace_word_ignore_case(&unified, "to", "-");
    let parts: Vec<&str> = unified.split('-').map(str::trim).collect();
    if parts.is_empty() || parts.len() > 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(ambiguous());
    }

    let mut currency: Option<&'static str> = None;
    let mut amounts = Vec::with_capacity(parts.len());
    for part in &parts {
        let (code, amount) = parse_single_amount(part).ok_or_else(ambiguous)?;
        let amount = amount.ok_or_else(|| MoneyError::TooLarge(part.to_string()))?;
        if let Some(code) = code {
            match currency {
                Some(seen) if seen != code => {
                    return Err(MoneyError::Unparsable(format!("conflicting currencies in {:?}", raw)));
                }
                _ => currency = Some(code),
            }
        }
        amounts.push(amount);
    }

    // ranges resolve to the lower bound
    let mut amount = amounts.iter().copied().min().unwrap_or_default();
    if amounts.len() > 1 {
        approximate = true;
    }
    if negative {
        amount = -amount;
    }

    Ok(MoneyParts {
        amount,
        currency,
        approximate,
    })
}

/// One side of a price: optional currency marker around a number with an
/// optional K/M multiplier. The inner `None` means the amount overflowed.
fn parse_single_amount(part: &str) -> Option<(Option<&'static str>, Option<Decimal>)> {
    let mut rest = part.trim();
    let mut code = None;

    if let Some((symbol_code, after)) = strip_currency_prefix(rest) {
        code = Some(symbol_code);
        rest = after.trim_start();
    }
    if let Some((suffix_code, before)) = strip_currency_suffix(rest) {
        if code.is_some_and(|c| c != suffix_code) {
            return None;
        }
        code = Some(suffix_code);
        rest = before.trim_end();
    }

    let split_at = rest
        .find(|c: char| c.is_alphabetic())
        .unwrap_or(rest.len());
    let (number, multiplier) = rest.split_at(split_at);
    let factor = match multiplier.trim().to_lowercase().as_str() {
        "" => Decimal::ONE,
        "k" | "thousand" => Decimal::from(1_000),
        "m" | "mm" | "mil" | "million" => Decimal::from(1_000_000),
        "b" | "bn" | "billion" => Decimal::from(1_000_000_000),
        _ => return None,
    };

    let amount = parse_amount(number.trim())?;
    Some((code, amount.checked_mul(factor)))
}

fn strip_currency_prefix(text: &str) -> Option<(&'static str, &str)> {
    for (symbol, code) in SYMBOLS {
        if let Some(rest) = strip_prefix_ignore_case(text, symbol) {
            return Some((*code, rest));
        }
    }
    let head: String = text.chars().take(3).collect();
    let code = KNOWN_CODES.iter().find(|c| c.eq_ignore_ascii_case(&head))?;
    let rest = &text[head.len()..];
    if rest.starts_with(|c: char| c.is_alphabetic()) {
        return None;
    }
    Some((*code, rest))
}

fn strip_currency_suffix(text: &str) -> Option<(&'static str, &str)> {
    for (symbol, code) in SYMBOLS {
        if let Some(rest) = text.strip_suffix(*symbol) {
            return Some((*code, rest));
        }
    }
    for suffix in ["kr.", "kr"] {
        let Some(split) = text.len().checked_sub(suffix.len()) else {
            continue;
        };
        if text
            .get(split..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
        {
            return Some(("SEK", &text[..split]));
        }
    }
    let tail_start = text.char_indices().rev().nth(2).map(|(i, _)| i)?;
    let tail = &text[tail_start..];
    let code = KNOWN_CODES.iter().find(|c| c.eq_ignore_ascii_case(tail))?;
    let rest = &text[..tail_start];
    if rest.ends_with(|c: char| c.is_alphabetic()) {
        return None;
    }
    Some((*code, rest))
}

/// Parse a bare number with thousands grouping (`,` `.` space or `'`) and an
/// optional decimal part. Grouped digits must come in threes.
pub(crate) fn parse_amount(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .chars()
        .map(|c| match c {
            '\u{a0}' | '\u{202f}' | '\'' => ' ',
            other => other,
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty()
        || !cleaned.starts_with(|c: char| c.is_ascii_digit())
        || !cleaned
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | ' '))
    {
        return None;
    }

    let commas = cleaned.matches(',').count();
    let dots = cleaned.matches('.').count();
    let decimal_sep = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(c), Some(d)) => Some(if c > d { ',' } else { '.' }),
        (Some(c), None) if commas == 1 && (1..=2).contains(&(cleaned.len() - c - 1)) => Some(','),
        (None, Some(_)) if dots == 1 => Some('.'),
        _ => None,
    };

    let (int_part, frac_part) = match decimal_sep {
        Some(sep) => {
            let idx = cleaned.rfind(sep)?;
            (&cleaned[..idx], Some(&cleaned[idx + 1..]))
        }
        None => (cleaned, None),
    };

    let groups: Vec<&str> = int_part.split([',', '.', ' ']).collect();
    if groups.len() > 1 {
        let first = groups[0].len();
        if !(1..=3).contains(&first) || groups[1..].iter().any(|g| g.len() != 3) {
            return None;
        }
    }
    if groups.iter().any(|g| g.is_empty() || !g.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }

    let mut digits: String = groups.concat();
    if let Some(frac) = frac_part {
        if frac.is_empty() || !frac.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        digits.push('.');
        digits.push_str(frac);
    }
    Decimal::from_str(&digits).ok()
}

fn decimal_from_number(n: &serde_json::Number) -> Result<Decimal, MoneyError> {
    if let Some(i) = n.as_i64() {
        return Ok(Decimal::from(i));
    }
    let text = n.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| MoneyError::TooLarge(text))
}

fn currency_code(raw: &str) -> Result<&'static str, MoneyError> {
    let trimmed = raw.trim();
    if let Some(code) = KNOWN_CODES.iter().find(|c| c.eq_ignore_ascii_case(trimmed)) {
        return Ok(*code);
    }
    SYMBOLS
        .iter()
        .find(|(symbol, _)| symbol.eq_ignore_ascii_case(trimmed))
        .map(|(_, code)| *code)
        .ok_or_else(|| MoneyError::Unparsable(format!("unknown currency {:?}", raw)))
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

/// Replace ` to ` used as a range separator
fn replace_word_ignore_case(text: &str, word: &str, with: &str) -> String {
    text.split_whitespace()
        .map(|token| if token.eq_ignore_ascii_case(word) { with } else { token })
        .collect::<Vec<_>>()
        .join(" ")
}
