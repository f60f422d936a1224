use super::{Confidence, DocumentCategory, FieldKind, ReasonCode, WeightClass};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use DocumentCategory::{General, Insurance, Tax, Utility};

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub weight_class: WeightClass,
    /// Empty means every category.
    pub applies_to: &'static [DocumentCategory],
    pub description: &'static str,
}

impl FieldSpec {
    pub fn applies(&self, category: DocumentCategory) -> bool {
        self.applies_to.is_empty() || self.applies_to.contains(&category)
    }
}

const fn field(
    name: &'static str,
    kind: FieldKind,
    weight_class: WeightClass,
    applies_to: &'static [DocumentCategory],
    description: &'static str,
) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        weight_class,
        applies_to,
        description,
    }
}

pub static FIELDS: &[FieldSpec] = &[
    field(
        "invoice_number",
        FieldKind::Identifier,
        WeightClass::Identifier,
        &[],
        "Invoice or bill number as printed",
    ),
    field(
        "invoice_date",
        FieldKind::Date,
        WeightClass::Date,
        &[],
        "Issue date, ISO 8601 (YYYY-MM-DD)",
    ),
    field(
        "due_date",
        FieldKind::Date,
        WeightClass::Date,
        &[],
        "Payment due date, ISO 8601",
    ),
    field(
        "vendor_name",
        FieldKind::Text,
        WeightClass::Name,
        &[],
        "Name of the issuing company",
    ),
    field(
        "vendor_address",
        FieldKind::Text,
        WeightClass::Address,
        &[],
        "Postal address of the issuer",
    ),
    field(
        "customer_name",
        FieldKind::Text,
        WeightClass::Name,
        &[],
        "Name of the billed party",
    ),
    field(
        "customer_address",
        FieldKind::Text,
        WeightClass::Address,
        &[],
        "Postal address of the billed party",
    ),
    field(
        "currency",
        FieldKind::Text,
        WeightClass::Default,
        &[],
        "ISO 4217 currency code",
    ),
    field(
        "subtotal",
        FieldKind::Amount,
        WeightClass::Amount,
        &[],
        "Amount before tax",
    ),
    field(
        "tax_amount",
        FieldKind::Amount,
        WeightClass::Amount,
        &[],
        "Total tax charged",
    ),
    field(
        "total_amount",
        FieldKind::Amount,
        WeightClass::Amount,
        &[],
        "Grand total including tax",
    ),
    field(
        "amount_due",
        FieldKind::Amount,
        WeightClass::Amount,
        &[],
        "Balance still payable",
    ),
    field(
        "totals_reconcile",
        FieldKind::Boolean,
        WeightClass::ValidationFlag,
        &[],
        "Whether subtotal plus tax equals the total",
    ),
    field(
        "purchase_order_number",
        FieldKind::Identifier,
        WeightClass::Identifier,
        &[General],
        "Purchase order reference",
    ),
    field(
        "payment_terms",
        FieldKind::Text,
        WeightClass::Default,
        &[General],
        "Payment terms, e.g. Net 30",
    ),
    field(
        "policy_number",
        FieldKind::Identifier,
        WeightClass::Identifier,
        &[Insurance],
        "Insurance policy number",
    ),
    field(
        "insured_name",
        FieldKind::Text,
        WeightClass::Name,
        &[Insurance],
        "Name of the insured party",
    ),
    field(
        "coverage_start",
        FieldKind::Date,
        WeightClass::Date,
        &[Insurance],
        "Coverage period start, ISO 8601",
    ),
    field(
        "coverage_end",
        FieldKind::Date,
        WeightClass::Date,
        &[Insurance],
        "Coverage period end, ISO 8601",
    ),
    field(
        "premium_amount",
        FieldKind::Amount,
        WeightClass::Amount,
        &[Insurance],
        "Premium billed for the period",
    ),
    field(
        "account_number",
        FieldKind::Identifier,
        WeightClass::Identifier,
        &[Utility],
        "Customer account number",
    ),
    field(
        "service_address",
        FieldKind::Text,
        WeightClass::Address,
        &[Utility],
        "Address where the service is delivered",
    ),
    field(
        "billing_period_start",
        FieldKind::Date,
        WeightClass::Date,
        &[Utility],
        "Billing period start, ISO 8601",
    ),
    field(
        "billing_period_end",
        FieldKind::Date,
        WeightClass::Date,
        &[Utility],
        "Billing period end, ISO 8601",
    ),
    field(
        "meter_number",
        FieldKind::Identifier,
        WeightClass::Identifier,
        &[Utility],
        "Meter identifier",
    ),
    field(
        "usage_quantity",
        FieldKind::Amount,
        WeightClass::Default,
        &[Utility],
        "Metered consumption for the period",
    ),
    field(
        "tax_id",
        FieldKind::Identifier,
        WeightClass::Identifier,
        &[Tax],
        "Taxpayer identification number",
    ),
    field(
        "tax_year",
        FieldKind::Identifier,
        WeightClass::Date,
        &[Tax],
        "Tax year or assessment period",
    ),
    field(
        "tax_rate",
        FieldKind::Amount,
        WeightClass::Default,
        &[Tax],
        "Applied tax rate in percent",
    ),
];

pub fn lookup(name: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.name == name)
}

pub fn fields_for(category: DocumentCategory) -> impl Iterator<Item = &'static FieldSpec> {
    FIELDS.iter().filter(move |f| f.applies(category))
}

pub fn default_required_fields() -> BTreeMap<DocumentCategory, Vec<String>> {
    let sets: [(DocumentCategory, &[&str]); 4] = [
        (
            General,
            &["invoice_number", "invoice_date", "vendor_name", "total_amount"],
        ),
        (
            Insurance,
            &["policy_number", "insured_name", "invoice_date", "premium_amount"],
        ),
        (
            Utility,
            &[
                "account_number",
                "vendor_name",
                "billing_period_start",
                "billing_period_end",
                "total_amount",
            ],
        ),
        (Tax, &["tax_id", "tax_year", "vendor_name", "total_amount"]),
    ];
    sets.into_iter()
        .map(|(c, names)| (c, names.iter().map(|n| n.to_string()).collect()))
        .collect()
}

/// Strict JSON schema for the stage-two response of `category`.
///
/// Only fields applicable to the category are present, every property is
/// required and unknown properties are rejected.
pub fn extraction_schema(category: DocumentCategory) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for spec in fields_for(category) {
        properties.insert(spec.name.to_string(), field_schema(spec));
        required.push(Value::String(spec.name.to_string()));
    }
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": required,
        "properties": properties,
    })
}

fn field_schema(spec: &FieldSpec) -> Value {
    let value_type = match spec.kind {
        FieldKind::Amount => "number",
        FieldKind::Boolean => "boolean",
        FieldKind::Date | FieldKind::Identifier | FieldKind::Text => "string",
    };
    let confidence: Vec<&str> = [Confidence::Low, Confidence::Medium, Confidence::High]
        .iter()
        .map(|c| c.as_str())
        .collect();
    let mut reasons: Vec<Value> = ReasonCode::ALL
        .iter()
        .map(|r| Value::String(r.as_str().to_string()))
        .collect();
    reasons.push(Value::Null);

    json!({
        "type": "object",
        "additionalProperties": false,
        "required": [
            "value",
            "confidence",
            "reason_code",
            "evidence_snippet",
            "reasoning",
            "assumptions",
        ],
        "properties": {
            "value": { "type": [value_type, "null"], "description": spec.description },
            "confidence": { "type": "string", "enum": confidence },
            "reason_code": { "type": ["string", "null"], "enum": reasons },
            "evidence_snippet": { "type": ["string", "null"] },
            "reasoning": { "type": ["string", "null"] },
            "assumptions": { "type": "array", "items": { "type": "string" } },
        },
    })
}
