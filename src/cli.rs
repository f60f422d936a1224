use crate::{
    cancel::{cancellation, Cancellation},
    confidence::ConfidenceAggregator,
    config::Config,
    extract::{normalize::normalize_fields, RawFieldMap},
    fields::DocumentCategory,
    ingest::{DocumentGuard, HttpFetcher, UrlPolicy},
    model::OpenAiTransport,
    ocr::HttpOcrClient,
    pipeline::{
        ExtractionResult, Pipeline, PipelineError, TextPipeline, TokensUsed, DOCUMENT_TYPE_FIELD,
    },
    policy, report,
    util::{ensure_dir, redact_url},
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "invoice-extract")]
#[command(about = "Invoice extraction pipeline (document guard + LLM extraction + confidence scoring)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./invoice-extract.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check config, credentials and endpoints without calling them.
    Doctor {},
    /// Fetch and normalize a document URL.
    Fetch {
        #[arg(long)]
        url: String,
        /// Write the normalized bytes here.
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Classify an OCR text file.
    Classify {
        #[arg(long)]
        input: PathBuf,
    },
    /// Classify and extract fields from an OCR text file.
    Extract {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Re-score a saved field map or extraction result offline.
    Score {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        category: Option<String>,
    },
    /// Full job: fetch, OCR, classify, extract, score, write report.
    Run {
        #[arg(long)]
        url: String,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

pub async fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;

    match &args.cmd {
        Command::Doctor {} => {
            let _guard = init_default_logging(&args, &cfg)?;
            doctor(&cfg, &cfg_path)
        }
        Command::Fetch { url, save } => {
            let _guard = init_default_logging(&args, &cfg)?;
            fetch(&cfg, url, save.as_deref()).await
        }
        Command::Classify { input } => {
            let _guard = init_default_logging(&args, &cfg)?;
            classify(&cfg, input).await
        }
        Command::Extract { input, out } => {
            let _guard = init_default_logging(&args, &cfg)?;
            extract(&cfg, input, out.as_deref()).await
        }
        Command::Score { input, category } => {
            let _guard = init_default_logging(&args, &cfg)?;
            score(&cfg, input, category.as_deref())
        }
        Command::Run { url, out_dir } => run(&args, &cfg, url, out_dir.as_deref()).await,
    }
}

fn init_default_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let log_path = resolve_log_path(cfg, None);
    init_logging(args, cfg, log_path.as_deref())
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("invoice-extract.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("invoice-extract.example.toml"))
    }
}

fn init_logging(
    args: &Args,
    cfg: &Config,
    file_path: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

/// Cancels on Ctrl-C so in-flight requests are dropped rather than abandoned.
fn cancel_on_ctrl_c() -> Cancellation {
    let (handle, cancel) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            handle.cancel();
        }
    });
    cancel
}

fn env_present(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !v.trim().is_empty())
}

fn doctor(cfg: &Config, cfg_path: &Path) -> Result<()> {
    let diag = json!({
        "config_path": cfg_path,
        "config_valid": true,
        "model": {
            "provider": cfg.model.provider,
            "model": cfg.model.model,
            "base_url": cfg.model.base_url,
            "api_key_env": cfg.model.api_key_env,
            "api_key_present": env_present(&cfg.model.api_key_env),
        },
        "ocr": {
            "endpoint_configured": !cfg.ocr.endpoint.trim().is_empty(),
            "api_key_env": cfg.ocr.api_key_env,
            "api_key_present": env_present(&cfg.ocr.api_key_env),
        },
        "ingest": {
            "allowed_scheme": cfg.ingest.allowed_scheme,
            "allowed_hosts": cfg.ingest.allowed_hosts,
            "max_document_bytes": cfg.ingest.max_document_bytes,
        },
    });
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

async fn fetch(cfg: &Config, url: &str, save: Option<&Path>) -> Result<()> {
    let guard = DocumentGuard::new(&cfg.ingest, HttpFetcher::new(&cfg.ingest)?);
    let doc = guard
        .fetch_and_normalize_with(url, &cancel_on_ctrl_c())
        .await
        .map_err(|e| anyhow!("fetch failed ({}): {e}", e.kind()))?;

    if let Some(path) = save {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }
        std::fs::write(path, &doc.bytes)
            .with_context(|| format!("writing document: {}", path.display()))?;
        info!(path = %path.display(), "document saved");
    }
    println!("{}", serde_json::to_string_pretty(&doc.summary())?);
    Ok(())
}

fn read_text(input: &Path) -> Result<String> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("reading text: {}", input.display()))?;
    if text.trim().is_empty() {
        bail!("input text is empty: {}", input.display());
    }
    Ok(text)
}

fn pipeline_error(e: PipelineError) -> anyhow::Error {
    anyhow!(
        "{} failed (category={}, status={:?}): {e}",
        e.stage(),
        e.category(),
        e.status_code()
    )
}

async fn classify(cfg: &Config, input: &Path) -> Result<()> {
    let text = read_text(input)?;
    let pipeline = TextPipeline::new(cfg, OpenAiTransport::from_config(&cfg.model)?)?;
    let category = pipeline
        .classify(&text, &cancel_on_ctrl_c())
        .await
        .map_err(pipeline_error)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "input": input, "category": category }))?
    );
    Ok(())
}

async fn extract(cfg: &Config, input: &Path, out: Option<&Path>) -> Result<()> {
    let text = read_text(input)?;
    let pipeline = TextPipeline::new(cfg, OpenAiTransport::from_config(&cfg.model)?)?;
    let outcome = pipeline
        .extract_text(&text, &cancel_on_ctrl_c())
        .await
        .map_err(pipeline_error)?;

    let rendered = serde_json::to_string_pretty(&outcome.result)?;
    if let Some(path) = out {
        std::fs::write(path, &rendered)
            .with_context(|| format!("writing result: {}", path.display()))?;
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "result": outcome.result,
            "decision": outcome.decision,
        }))?
    );
    Ok(())
}

/// Accepts either a bare field map or a serialized [`ExtractionResult`].
fn score(cfg: &Config, input: &Path, category: Option<&str>) -> Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("reading fields: {}", input.display()))?;
    let doc: Value = serde_json::from_str(&raw).with_context(|| "parsing fields JSON")?;

    let fields_value = match doc.get("fields") {
        Some(f) if f.is_object() => f.clone(),
        _ => doc.clone(),
    };
    let category = match category {
        Some(c) => c.to_string(),
        None => doc
            .get("category")
            .or_else(|| fields_value.get(DOCUMENT_TYPE_FIELD).and_then(|f| f.get("value")))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no category given and none found in {}", input.display()))?,
    };
    let category = DocumentCategory::from_str(&category).map_err(|e| anyhow!(e))?;

    let raw_fields: RawFieldMap =
        serde_json::from_value(fields_value).with_context(|| "decoding field map")?;
    let fields = normalize_fields(raw_fields, category);
    let aggregator = ConfidenceAggregator::from_config(&cfg.scoring)?;
    let score = aggregator.score(&fields, category);
    let decision = policy::decide(&cfg.scoring, &score);
    let result = ExtractionResult::new(category, fields, TokensUsed::default(), &score);

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "result": result,
            "missing_required": score.missing_required,
            "decision": decision,
        }))?
    );
    Ok(())
}

async fn run(args: &Args, cfg: &Config, url: &str, out_override: Option<&Path>) -> Result<()> {
    let parsed = UrlPolicy::from_config(&cfg.ingest)
        .validate(url)
        .map_err(|e| anyhow!("rejected document URL ({}): {e}", e.kind()))?;
    let job_id = report::job_id(&cfg.normalized_for_hash(), &redact_url(&parsed));

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.output.out_dir));
    let job_dir = out_root.join(&job_id);
    ensure_dir(&job_dir)?;
    ensure_dir(&job_dir.join("logs"))?;

    let log_path = resolve_log_path(cfg, Some(&job_dir));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    info!(job_id = %job_id, out = %job_dir.display(), "job started");

    let pipeline = Pipeline::new(
        cfg,
        HttpFetcher::new(&cfg.ingest)?,
        OpenAiTransport::from_config(&cfg.model)?,
        HttpOcrClient::from_config(&cfg.ocr)?,
    )?;

    let output = match pipeline.run_job(url, &cancel_on_ctrl_c()).await {
        Ok(output) => output,
        Err(e) => {
            if cfg.global.print_summary {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "job_id": job_id,
                        "status": "failed",
                        "stage": e.stage(),
                        "category": e.category(),
                        "status_code": e.status_code(),
                    }))?
                );
            }
            return Err(pipeline_error(e));
        }
    };

    if cfg.output.write_result_json {
        std::fs::write(
            job_dir.join(&cfg.output.result_filename),
            serde_json::to_string_pretty(&output.result)?,
        )?;
    }

    if cfg.output.write_report_json {
        std::fs::write(
            job_dir.join(&cfg.output.report_filename),
            serde_json::to_string_pretty(&output.report)?,
        )?;
    }

    if cfg.output.write_document {
        std::fs::write(
            job_dir.join(&cfg.output.document_filename),
            &output.document.bytes,
        )?;
    }

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "job_id": job_id,
                "job_dir": job_dir,
                "status": "ok",
                "category": output.result.category,
                "overall_confidence": output.result.overall_confidence,
                "gate": output.report.decision.gate,
            }))?
        );
    }

    Ok(())
}

fn resolve_log_path(cfg: &Config, job_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    if let Some(job_dir) = job_dir {
        return Some(job_dir.join("logs").join("invoice-extract.log"));
    }

    Some(PathBuf::from(&cfg.output.out_dir).join("invoice-extract.log"))
}
