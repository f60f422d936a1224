use invoice_extract::config::Config;

fn parse(raw: &str) -> Config {
    toml::from_str(raw).expect("parse TOML")
}

#[test]
fn parse_example_config() {
    let cfg = parse(include_str!("../invoice-extract.example.toml"));
    cfg.validate().expect("example config validates");
    assert!(cfg.model.max_retries >= 1);
    assert!(!cfg.output.out_dir.is_empty());
    assert_eq!(cfg.ingest.allowed_scheme, "https");
}

#[test]
fn defaults_validate() {
    Config::default().validate().unwrap();
}

#[test]
fn partial_sections_fill_in_defaults() {
    let cfg = parse("[model]\nmax_retries = 3\n");
    assert_eq!(cfg.model.max_retries, 3);
    assert_eq!(cfg.model.backoff_ms, vec![500, 1000, 2000, 4000]);
    assert_eq!(cfg.scoring.required_fields.len(), 4);
    cfg.validate().unwrap();
}

#[test]
fn required_set_for_every_category() {
    let mut cfg = Config::default();
    cfg.scoring.required_fields.remove("tax");
    let err = cfg.validate().unwrap_err().to_string();
    assert!(err.contains("tax"), "{err}");
}

#[test]
fn required_fields_must_exist_and_apply() {
    let mut cfg = Config::default();
    cfg.scoring
        .required_fields
        .insert("general".into(), vec!["shoe_size".into()]);
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.scoring
        .required_fields
        .insert("general".into(), vec!["policy_number".into()]);
    let err = cfg.validate().unwrap_err().to_string();
    assert!(err.contains("does not apply"), "{err}");
}

#[test]
fn unknown_weight_class_and_category_are_rejected() {
    let mut cfg = Config::default();
    cfg.scoring.weights.insert("colour".into(), 1.0);
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.scoring
        .required_fields
        .insert("medical".into(), vec!["invoice_number".into()]);
    assert!(cfg.validate().is_err());
}

#[test]
fn thresholds_must_be_ordered() {
    let mut cfg = Config::default();
    cfg.scoring.review_threshold = 0.9;
    cfg.scoring.accept_threshold = 0.6;
    assert!(cfg.validate().is_err());
}

#[test]
fn empty_backoff_schedule_is_rejected() {
    let cfg = parse("[model]\nbackoff_ms = []\n");
    assert!(cfg.validate().is_err());
}

#[test]
fn load_reports_validation_errors_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("invoice-extract.toml");
    std::fs::write(&path, "[scoring]\naccept_threshold = 1.5\n").unwrap();
    let err = format!("{:#}", Config::load(&path).unwrap_err());
    assert!(err.contains("validating config"), "{err}");
    assert!(err.contains("thresholds"), "{err}");

    std::fs::write(&path, "[model]\nmax_retries = 1\n").unwrap();
    assert_eq!(Config::load(&path).unwrap().model.max_retries, 1);
}
