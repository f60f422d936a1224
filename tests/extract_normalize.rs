use invoice_extract::{
    extract::normalize::{normalize_field, normalize_fields, normalize_value, parse_amount},
    fields::{Confidence, DocumentCategory, FieldKind, FieldValue, ReasonedField},
};
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn raw(value: Value) -> ReasonedField<Value> {
    ReasonedField::new(Some(value), Confidence::High)
}

#[test]
fn amount_strings_become_numbers() {
    let cases = [
        ("$1,234.50", 1234.5),
        ("1.234,50 EUR", 1234.5),
        ("USD 99", 99.0),
        ("€ 12,50", 12.5),
        ("1,234", 1234.0),
        ("(42.00)", -42.0),
        ("-7", -7.0),
        ("7.5%", 7.5),
        ("1 234 567.89", 1234567.89),
    ];
    for (input, expected) in cases {
        let got = parse_amount(input).unwrap_or_else(|| panic!("{input} did not parse"));
        assert!((got - expected).abs() < 1e-9, "{input}: {got}");
    }
}

#[test]
fn non_numeric_amounts_are_left_as_text() {
    for input in ["N/A", "see attached", "(42.00", "12-34-56"] {
        assert!(parse_amount(input).is_none(), "{input}");
    }
    assert_eq!(
        normalize_value(FieldKind::Amount, json!("N/A")),
        Some(FieldValue::Text("N/A".into()))
    );
    assert_eq!(
        normalize_value(FieldKind::Amount, json!(12.5)),
        Some(FieldValue::Amount(12.5))
    );
}

#[test]
fn strings_are_trimmed_and_blank_becomes_null() {
    assert_eq!(
        normalize_value(FieldKind::Text, json!("  ACME Corp \n")),
        Some(FieldValue::Text("ACME Corp".into()))
    );
    assert_eq!(normalize_value(FieldKind::Text, json!("   ")), None);
    assert_eq!(normalize_value(FieldKind::Amount, json!("")), None);
    assert_eq!(normalize_value(FieldKind::Date, Value::Null), None);
}

#[test]
fn values_follow_field_kind() {
    assert_eq!(
        normalize_value(FieldKind::Identifier, json!(2023)),
        Some(FieldValue::Identifier("2023".into()))
    );
    assert_eq!(
        normalize_value(FieldKind::Date, json!(" 2024-03-01 ")),
        Some(FieldValue::Date("2024-03-01".into()))
    );
    assert_eq!(
        normalize_value(FieldKind::Boolean, json!("Yes")),
        Some(FieldValue::Boolean(true))
    );
    assert_eq!(
        normalize_value(FieldKind::Boolean, json!(false)),
        Some(FieldValue::Boolean(false))
    );
}

#[test]
fn rationale_is_trimmed_and_confidence_kept() {
    let mut field = raw(json!(" INV-001 "));
    field.evidence_snippet = Some("  Invoice No: INV-001 ".into());
    field.reasoning = Some("   ".into());
    field.assumptions = vec!["  ".into(), " single invoice ".into()];

    let out = normalize_field(FieldKind::Identifier, field);
    assert_eq!(out.value, Some(FieldValue::Identifier("INV-001".into())));
    assert_eq!(out.confidence, Confidence::High);
    assert_eq!(out.evidence_snippet.as_deref(), Some("Invoice No: INV-001"));
    assert!(out.reasoning.is_none());
    assert_eq!(out.assumptions, vec!["single invoice".to_string()]);
}

#[test]
fn fields_outside_category_are_dropped() {
    let fields = BTreeMap::from([
        ("invoice_number".to_string(), raw(json!("A-1"))),
        ("policy_number".to_string(), raw(json!("P-9"))),
        ("document_type".to_string(), raw(json!("general"))),
        ("made_up".to_string(), raw(json!("x"))),
    ]);
    let out = normalize_fields(fields.clone(), DocumentCategory::General);
    assert_eq!(out.keys().collect::<Vec<_>>(), ["invoice_number"]);

    let out = normalize_fields(fields, DocumentCategory::Insurance);
    assert!(out.contains_key("policy_number"));
    assert!(out.contains_key("invoice_number"));
    assert!(!out.contains_key("made_up"));
}
