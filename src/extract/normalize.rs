//! Post-extraction normalization. Pure and infallible: it only tightens the
//! representation of what the model returned.

use crate::fields::{
    catalog, DocumentCategory, FieldKind, FieldMap, FieldValue, ReasonedField,
};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<open>\()?\s*(?P<sign>[-+])?\s*(?:[A-Z]{3}\s*)?[$€£¥]?\s*(?P<sign2>-)?\s*(?P<num>\d(?:[\d.,' ]*\d)?)\s*%?\s*(?:[A-Z]{3})?\s*(?P<close>\))?$",
    )
    .expect("static regex")
});

/// Normalizes every field and drops those that do not belong to `category`.
pub fn normalize_fields(
    raw: BTreeMap<String, ReasonedField<Value>>,
    category: DocumentCategory,
) -> FieldMap {
    raw.into_iter()
        .filter_map(|(name, field)| {
            let Some(spec) = catalog::lookup(&name).filter(|s| s.applies(category)) else {
                debug!(field = %name, %category, "dropping field outside category");
                return None;
            };
            Some((name, normalize_field(spec.kind, field)))
        })
        .collect()
}

pub fn normalize_field(kind: FieldKind, field: ReasonedField<Value>) -> ReasonedField<FieldValue> {
    let mut field = field.map_value(|v| normalize_value(kind, v));
    field.evidence_snippet = trim_opt(field.evidence_snippet);
    field.reasoning = trim_opt(field.reasoning);
    field.assumptions = field
        .assumptions
        .into_iter()
        .filter_map(|a| trim_opt(Some(a)))
        .collect();
    field
}

/// Converts one raw value to the field's kind.
///
/// Strings are trimmed and empty strings become `None`. Numeric-looking text
/// in amount fields becomes a number; anything that does not fit the kind is
/// kept as text.
pub fn normalize_value(kind: FieldKind, value: Value) -> Option<FieldValue> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return None;
            }
            Some(match kind {
                FieldKind::Amount => parse_amount(t)
                    .map(FieldValue::Amount)
                    .unwrap_or_else(|| FieldValue::Text(t.to_string())),
                FieldKind::Date => FieldValue::Date(t.to_string()),
                FieldKind::Identifier => FieldValue::Identifier(t.to_string()),
                FieldKind::Text => FieldValue::Text(t.to_string()),
                FieldKind::Boolean => match t.to_ascii_lowercase().as_str() {
                    "true" | "yes" => FieldValue::Boolean(true),
                    "false" | "no" => FieldValue::Boolean(false),
                    _ => FieldValue::Text(t.to_string()),
                },
            })
        }
        Value::Number(n) => match kind {
            FieldKind::Amount => n.as_f64().map(FieldValue::Amount),
            FieldKind::Identifier => Some(FieldValue::Identifier(n.to_string())),
            FieldKind::Date => Some(FieldValue::Date(n.to_string())),
            FieldKind::Text | FieldKind::Boolean => Some(FieldValue::Text(n.to_string())),
        },
        Value::Bool(b) => match kind {
            FieldKind::Boolean => Some(FieldValue::Boolean(b)),
            _ => Some(FieldValue::Text(b.to_string())),
        },
        other @ (Value::Array(_) | Value::Object(_)) => Some(FieldValue::Text(other.to_string())),
    }
}

/// Parses printed amounts such as `$1,234.50`, `1.234,50 EUR`, `(42.00)` or
/// `7.5%`. Returns `None` for anything that is not clearly a number.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let caps = AMOUNT.captures(raw.trim())?;
    let parens = (caps.name("open").is_some(), caps.name("close").is_some());
    if parens.0 != parens.1 {
        return None;
    }
    let negative = parens.0
        || caps.name("sign").is_some_and(|m| m.as_str() == "-")
        || caps.name("sign2").is_some();
    let value = parse_number(caps.name("num")?.as_str())?;
    Some(if negative { -value } else { value })
}

fn parse_number(raw: &str) -> Option<f64> {
    let s: String = raw.chars().filter(|c| !matches!(c, ' ' | '\'')).collect();
    let dots = s.matches('.').count();
    let commas = s.matches(',').count();
    let decimal = match (s.rfind('.'), s.rfind(',')) {
        (Some(d), Some(c)) => Some(if d > c { '.' } else { ',' }),
        (Some(_), None) if dots == 1 => Some('.'),
        // A lone comma followed by exactly three digits is a thousands separator.
        (None, Some(c)) if commas == 1 && s.len() - c - 1 != 3 => Some(','),
        _ => None,
    };
    let cleaned: String = s
        .chars()
        .filter_map(|ch| match ch {
            '0'..='9' => Some(ch),
            c if Some(c) == decimal => Some('.'),
            _ => None,
        })
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn trim_opt(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
