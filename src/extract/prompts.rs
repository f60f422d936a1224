//! Prompts for the two extraction stages

use crate::fields::{catalog, DocumentCategory};

/// System prompt for document type classification
pub const CLASSIFICATION_SYSTEM_PROMPT: &str = r#"You classify billing documents. Read the OCR text of one document and pick exactly one category.

## Categories

- "insurance": premium notices and insurance invoices (policy number, insured party, coverage period)
- "utility": electricity, gas, water, telecom or internet bills (account number, service address, billing period, metered usage)
- "tax": tax assessments, tax bills and tax payment notices (taxpayer id, tax year)
- "general": any other commercial invoice

## Rules

- Base the decision on the document text only.
- When the text fits more than one category, pick the most specific one.
- When unsure, answer "general".
- Reply with the JSON object required by the schema and nothing else.
"#;

/// System prompt for field extraction
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract structured fields from the OCR text of an invoice.

## Output Requirements

For every field in the schema return an object with:
- "value": the value as printed, normalized as the field description says; null when the document does not contain it
- "confidence": "high", "medium" or "low"
- "reason_code":
  - "explicit_label": the value sits next to a label naming the field
  - "nearby_header": the value sits under or near a section header that implies the field
  - "inferred_layout": the value was inferred from position or layout only
  - "conflict": the document shows more than one candidate value
  - "missing": the document does not contain the field
- "evidence_snippet": the shortest verbatim excerpt supporting the value, or null
- "reasoning": one short factual sentence, or null
- "assumptions": any assumption made, e.g. a date format; empty when none

## Rules

- Never invent values. A field that is not in the document gets value null and reason_code "missing".
- Dates use ISO 8601 (YYYY-MM-DD).
- Amounts are plain numbers without currency symbols or thousands separators.
- "totals_reconcile" is true only when subtotal plus tax equals the total as printed.
"#;

/// Build the classification prompt from OCR text
pub fn build_classification_prompt(text: &str) -> String {
    format!(
        r#"Classify the following document.

## Document Text

{text}

---

Return the category."#
    )
}

/// Build the extraction prompt for a classified document
pub fn build_extraction_prompt(category: DocumentCategory, text: &str) -> String {
    let fields: Vec<String> = catalog::fields_for(category)
        .map(|f| format!("- {}: {}", f.name, f.description))
        .collect();
    format!(
        r#"Extract the fields of this {category} invoice.

## Fields

{}

## Document Text

{text}

---

Return one object per field."#,
        fields.join("\n")
    )
}
