use invoice_extract::{
    confidence::{
        field_score, is_reported_missing, CategoryWeights, ConfidenceAggregator, RequiredFieldSets,
    },
    config::Scoring,
    fields::{Confidence, DocumentCategory, FieldMap, FieldValue, ReasonCode, ReasonedField},
    policy::{decide, QualityGate},
};
use std::collections::BTreeMap;

const LEVELS: [Confidence; 3] = [Confidence::Low, Confidence::Medium, Confidence::High];

fn text(value: &str, confidence: Confidence, reason: ReasonCode) -> ReasonedField<FieldValue> {
    ReasonedField::new(Some(FieldValue::Text(value.into())), confidence).with_reason(reason)
}

fn strong(names: &[&str]) -> FieldMap {
    names
        .iter()
        .map(|n| (n.to_string(), text("x", Confidence::High, ReasonCode::ExplicitLabel)))
        .collect()
}

#[test]
fn field_scores_stay_in_unit_interval() {
    for level in LEVELS {
        for reason in ReasonCode::ALL {
            let s = field_score(Some(&text("x", level, reason)));
            assert!((0.0..=1.0).contains(&s), "{level:?}/{reason:?} -> {s}");
        }
        let s = field_score(Some(&ReasonedField::<FieldValue>::new(None, level)));
        assert!((0.0..=1.0).contains(&s));
    }
}

#[test]
fn missing_reason_code_scores_zero() {
    for level in LEVELS {
        assert_eq!(field_score(Some(&text("x", level, ReasonCode::Missing))), 0.0);
    }
    assert_eq!(field_score::<FieldValue>(None), 0.0);
}

#[test]
fn reason_codes_adjust_base_score() {
    let high = |r| field_score(Some(&text("x", Confidence::High, r)));
    assert!((high(ReasonCode::ExplicitLabel) - 0.945).abs() < 1e-9);
    assert!((high(ReasonCode::NearbyHeader) - 0.9).abs() < 1e-9);
    assert!((high(ReasonCode::InferredLayout) - 0.81).abs() < 1e-9);
    assert!((high(ReasonCode::Conflict) - 0.45).abs() < 1e-9);

    let no_reason = ReasonedField::new(Some(FieldValue::Amount(1.0)), Confidence::Medium);
    assert!((field_score(Some(&no_reason)) - 0.6).abs() < 1e-9);
}

#[test]
fn all_required_fields_strong_scores_high_for_every_category() {
    let agg = ConfidenceAggregator::default();
    for category in DocumentCategory::ALL {
        let names: Vec<&str> = agg.required_fields(category).iter().map(String::as_str).collect();
        let score = agg.score(&strong(&names), category);
        assert!(score.overall >= 0.85, "{category}: {}", score.overall);
        assert!(score.missing_required.is_empty());
    }
}

#[test]
fn all_required_fields_absent_scores_zero() {
    let agg = ConfidenceAggregator::default();
    for category in DocumentCategory::ALL {
        let score = agg.score(&FieldMap::new(), category);
        assert_eq!(score.overall, 0.0);
        assert_eq!(score.missing_required, agg.required_fields(category).to_vec());
        for name in agg.required_fields(category) {
            assert_eq!(score.per_field.get(name), Some(&0.0));
        }
    }
}

#[test]
fn optional_fields_are_scored_but_do_not_move_overall() {
    let agg = ConfidenceAggregator::default();
    let base = strong(&["invoice_number", "invoice_date", "vendor_name", "total_amount"]);
    let before = agg.score(&base, DocumentCategory::General);

    let mut with_optional = base.clone();
    with_optional.insert(
        "payment_terms".into(),
        text("Net 30", Confidence::Low, ReasonCode::InferredLayout),
    );
    let after = agg.score(&with_optional, DocumentCategory::General);

    assert_eq!(before.overall, after.overall);
    assert!((after.per_field["payment_terms"] - 0.27).abs() < 1e-9);
}

#[test]
fn heavier_classes_cost_more_when_missing() {
    let agg = ConfidenceAggregator::default();
    let no_total = strong(&["invoice_number", "invoice_date", "vendor_name"]);
    let no_vendor = strong(&["invoice_number", "invoice_date", "total_amount"]);

    let a = agg.score(&no_total, DocumentCategory::General);
    let b = agg.score(&no_vendor, DocumentCategory::General);

    // amount weighs 3.0, name 1.5, out of 8.5
    assert!((a.overall - 0.945 * 5.5 / 8.5).abs() < 1e-9);
    assert!((b.overall - 0.945 * 7.0 / 8.5).abs() < 1e-9);
    assert_eq!(a.missing_required, vec!["total_amount".to_string()]);
}

#[test]
fn empty_required_set_scores_zero() {
    let sets = BTreeMap::from([(DocumentCategory::General, Vec::new())]);
    let agg = ConfidenceAggregator::new(CategoryWeights::default(), RequiredFieldSets::new(sets));
    let score = agg.score(&strong(&["invoice_number"]), DocumentCategory::General);
    assert_eq!(score.overall, 0.0);
    assert!(score.missing_required.is_empty());
    assert!(score.per_field.contains_key("invoice_number"));
}

#[test]
fn zero_weights_score_zero() {
    let weights = BTreeMap::from([(invoice_extract::fields::WeightClass::Default, 0.0)]);
    let sets = BTreeMap::from([(DocumentCategory::General, vec!["currency".to_string()])]);
    let agg =
        ConfidenceAggregator::new(CategoryWeights::new(weights), RequiredFieldSets::new(sets));
    let score = agg.score(&strong(&["currency"]), DocumentCategory::General);
    assert_eq!(score.overall, 0.0);
}

#[test]
fn unlisted_category_falls_back_to_general_set() {
    let sets = RequiredFieldSets::new(BTreeMap::from([(
        DocumentCategory::General,
        vec!["invoice_number".to_string()],
    )]));
    assert_eq!(sets.for_category(DocumentCategory::Tax), ["invoice_number".to_string()]);

    let empty = RequiredFieldSets::new(BTreeMap::new());
    assert!(empty.for_category(DocumentCategory::Tax).is_empty());
}

fn utility_with_vendor(vendor: ReasonedField<FieldValue>) -> FieldMap {
    let mut fields = strong(&[
        "account_number",
        "billing_period_start",
        "billing_period_end",
        "total_amount",
    ]);
    fields.insert("vendor_name".into(), vendor);
    fields
}

#[test]
fn required_field_reported_missing_counts_as_missing() {
    let agg = ConfidenceAggregator::default();
    let vendor = ReasonedField::new(None, Confidence::High).with_reason(ReasonCode::Missing);
    let score = agg.score(&utility_with_vendor(vendor), DocumentCategory::Utility);

    // name weighs 1.5 out of 10.5
    assert!((score.overall - 0.945 * 9.0 / 10.5).abs() < 1e-9);
    assert_eq!(score.missing_required, vec!["vendor_name".to_string()]);
    assert_eq!(score.per_field["vendor_name"], 0.0);

    let decision = decide(&Scoring::default(), &score);
    assert_eq!(decision.gate, QualityGate::Review);
}

#[test]
fn null_value_without_label_counts_as_missing() {
    let agg = ConfidenceAggregator::default();
    let vendor = ReasonedField::<FieldValue>::new(None, Confidence::Medium);
    let score = agg.score(&utility_with_vendor(vendor), DocumentCategory::Utility);
    assert_eq!(score.missing_required, vec!["vendor_name".to_string()]);
    assert!((score.overall - 0.945 * 9.0 / 10.5).abs() < 1e-9);
}

#[test]
fn labelled_absence_is_not_missing() {
    let agg = ConfidenceAggregator::default();
    let vendor = ReasonedField::new(None, Confidence::High).with_reason(ReasonCode::ExplicitLabel);
    assert!(!is_reported_missing(&vendor));
    let score = agg.score(&utility_with_vendor(vendor), DocumentCategory::Utility);
    assert!(score.missing_required.is_empty());
    assert_eq!(decide(&Scoring::default(), &score).gate, QualityGate::Accept);
}
