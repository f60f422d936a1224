use crate::fields::{catalog, DocumentCategory, WeightClass};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub ingest: Ingest,
    #[serde(default)]
    pub model: Model,
    #[serde(default)]
    pub ocr: Ocr,
    #[serde(default)]
    pub scoring: Scoring,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()
            .with_context(|| format!("validating config: {}", path.display()))?;
        Ok(cfg)
    }

    /// A stable, normalization-friendly string for hashing.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        let ingest = &self.ingest;
        if ingest.max_document_bytes == 0 {
            bail!("ingest.max_document_bytes must be > 0");
        }
        if ingest.max_url_length == 0 {
            bail!("ingest.max_url_length must be > 0");
        }
        if ingest.allowed_scheme.trim().is_empty() {
            bail!("ingest.allowed_scheme must not be empty");
        }

        let model = &self.model;
        if model.backoff_ms.is_empty() {
            bail!("model.backoff_ms must list at least one delay");
        }
        if model.classification_timeout_seconds == 0 || model.extraction_timeout_seconds == 0 {
            bail!("model timeouts must be > 0");
        }

        let scoring = &self.scoring;
        for (class, weight) in &scoring.weights {
            parse_weight_class(class)?;
            if !weight.is_finite() || *weight < 0.0 {
                bail!("scoring.weights.{class} must be a non-negative number");
            }
        }
        for key in scoring.required_fields.keys() {
            DocumentCategory::from_str(key)
                .map_err(|e| anyhow::anyhow!("scoring.required_fields: {e}"))?;
        }
        for category in DocumentCategory::ALL {
            let Some(names) = scoring.required_fields.get(category.as_str()) else {
                bail!("scoring.required_fields has no entry for category {category}");
            };
            for name in names {
                match catalog::lookup(name) {
                    Some(spec) if spec.applies(category) => {}
                    Some(_) => bail!("required field {name} does not apply to category {category}"),
                    None => bail!("required field {name} is not a known field"),
                }
            }
        }
        if !(0.0..=1.0).contains(&scoring.review_threshold)
            || !(0.0..=1.0).contains(&scoring.accept_threshold)
            || scoring.review_threshold > scoring.accept_threshold
        {
            bail!("scoring thresholds must satisfy 0 <= review_threshold <= accept_threshold <= 1");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: Default::default(),
            ingest: Default::default(),
            model: Default::default(),
            ocr: Default::default(),
            scoring: Default::default(),
            output: Default::default(),
            logging: Default::default(),
        }
    }
}

pub fn parse_weight_class(raw: &str) -> Result<WeightClass> {
    let class = match raw {
        "amount" => WeightClass::Amount,
        "date" => WeightClass::Date,
        "identifier" => WeightClass::Identifier,
        "address" => WeightClass::Address,
        "name" => WeightClass::Name,
        "validation_flag" => WeightClass::ValidationFlag,
        "default" => WeightClass::Default,
        other => bail!("unknown weight class: {other}"),
    };
    Ok(class)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub job_name: String,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            job_name: "default".into(),
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Ingest {
    pub max_document_bytes: u64,
    pub max_url_length: usize,
    pub allowed_scheme: String,
    /// Exact hosts or parent domains. Empty disables the allow-list.
    pub allowed_hosts: Vec<String>,
    pub block_private_addresses: bool,
    pub retry_delay_ms: u64,
    pub envelope_search_bytes: usize,
    pub expected_content_type: String,
    pub expected_extension: String,
    pub request_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub max_redirects: usize,
    pub user_agent: String,
}
impl Default for Ingest {
    fn default() -> Self {
        Self {
            max_document_bytes: 15 * 1024 * 1024,
            max_url_length: 2048,
            allowed_scheme: "https".into(),
            allowed_hosts: Vec::new(),
            block_private_addresses: true,
            retry_delay_ms: 500,
            envelope_search_bytes: 1024,
            expected_content_type: "application/pdf".into(),
            expected_extension: "pdf".into(),
            request_timeout_seconds: 60,
            connect_timeout_seconds: 10,
            max_redirects: 5,
            user_agent: "invoice-extract/0.1".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Model {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub max_retries: u32,
    pub backoff_ms: Vec<u64>,
    pub jitter_ms: u64,
    pub classification_timeout_seconds: u64,
    pub extraction_timeout_seconds: u64,
    pub temperature: f32,
    pub classification_max_chars: usize,
    pub extraction_max_chars: usize,
    pub log_preview_chars: usize,
}
impl Default for Model {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            max_retries: 2,
            backoff_ms: vec![500, 1000, 2000, 4000],
            jitter_ms: 200,
            classification_timeout_seconds: 30,
            extraction_timeout_seconds: 60,
            temperature: 0.0,
            classification_max_chars: 4000,
            extraction_max_chars: 60_000,
            log_preview_chars: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Ocr {
    pub endpoint: String,
    pub api_key_env: String,
    pub timeout_seconds: u64,
    pub normalize_unicode: bool,
}
impl Default for Ocr {
    fn default() -> Self {
        Self {
            endpoint: "".into(),
            api_key_env: "OCR_API_KEY".into(),
            timeout_seconds: 120,
            normalize_unicode: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scoring {
    /// Weight per semantic class (`amount`, `date`, `identifier`, `address`,
    /// `name`, `validation_flag`, `default`).
    pub weights: BTreeMap<String, f64>,
    /// Required field names per category.
    pub required_fields: BTreeMap<String, Vec<String>>,
    pub accept_threshold: f64,
    pub review_threshold: f64,
}
impl Default for Scoring {
    fn default() -> Self {
        let weights = [
            ("amount", 3.0),
            ("date", 2.0),
            ("identifier", 2.0),
            ("name", 1.5),
            ("address", 1.0),
            ("validation_flag", 0.5),
            ("default", 1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let required_fields = catalog::default_required_fields()
            .into_iter()
            .map(|(c, names)| (c.as_str().to_string(), names))
            .collect();
        Self {
            weights,
            required_fields,
            accept_threshold: 0.8,
            review_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub out_dir: String,
    pub write_report_json: bool,
    pub write_result_json: bool,
    pub write_document: bool,
    pub report_filename: String,
    pub result_filename: String,
    pub document_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            write_report_json: true,
            write_result_json: true,
            write_document: false,
            report_filename: "report.json".into(),
            result_filename: "extraction.json".into(),
            document_filename: "document.pdf".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}
