use super::{OcrEngine, OcrError, OcrInput, OcrOutput};
use crate::config::Ocr;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::debug;

/// OCR service reached over HTTP: `POST endpoint` with an [`OcrInput`] body,
/// answering `{text, pages, duration_ms}`.
pub struct HttpOcrClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpOcrClient {
    pub fn from_config(cfg: &Ocr) -> Result<Self> {
        if cfg.endpoint.trim().is_empty() {
            bail!("ocr.endpoint is not configured");
        }
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
            .with_context(|| "building OCR HTTP client")?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.trim().to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcrClient {
    async fn extract(&self, input: &OcrInput) -> Result<OcrOutput, OcrError> {
        let started = Instant::now();
        let mut req = self.client.post(&self.endpoint).json(input);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| OcrError::Transport(e.without_url().to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(OcrError::Upstream {
                status: status.as_u16(),
            });
        }
        let mut out: OcrOutput = resp
            .json()
            .await
            .map_err(|e| OcrError::Decode(e.without_url().to_string()))?;
        if out.duration_ms == 0 {
            out.duration_ms = started.elapsed().as_millis() as u64;
        }
        debug!(
            delivery = ?input.delivery(),
            pages = out.pages,
            chars = out.text.len(),
            duration_ms = out.duration_ms,
            "OCR response"
        );
        Ok(out)
    }
}
