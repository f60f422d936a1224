//! Defensive fetch of untrusted document URLs ahead of OCR.

pub mod http;
pub mod normalize;
pub mod types;

use crate::cancel::Cancellation;
use crate::config::Ingest;
use crate::util::{redact_url, sha256_hex};
use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::{Host, Url};

pub use http::HttpFetcher;
pub use types::{DeliveryMode, IngestError, IngestSummary, NormalizedDocument, Repair};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("redirect rejected: {0}")]
    Redirect(RedirectRejection),
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Transport(String),
}

/// Why a redirect hop was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedirectRejection {
    #[error("scheme not allowed: {0}")]
    Scheme(String),
    #[error("host not allowed: {0}")]
    Host(String),
    #[error("invalid target: {0}")]
    Url(String),
    #[error("more than {0} redirects")]
    TooMany(usize),
}

/// Issues the GET for a document.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Box<dyn FetchResponse>, FetchError>;
}

/// Response head plus an incremental body.
#[async_trait]
pub trait FetchResponse: Send {
    fn status(&self) -> u16;
    fn content_length(&self) -> Option<u64>;
    fn content_type(&self) -> Option<String>;
    /// Next body chunk, `None` at end of stream.
    async fn chunk(&mut self) -> Result<Option<Vec<u8>>, FetchError>;
}

/// Scheme, length and host rules applied before any network call and on
/// every redirect hop.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    scheme: String,
    allowed_hosts: Vec<String>,
    block_private: bool,
    max_len: usize,
}

impl UrlPolicy {
    pub fn from_config(cfg: &Ingest) -> Self {
        Self {
            scheme: cfg.allowed_scheme.to_ascii_lowercase(),
            allowed_hosts: cfg
                .allowed_hosts
                .iter()
                .map(|h| h.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            block_private: cfg.block_private_addresses,
            max_len: cfg.max_url_length,
        }
    }

    pub fn validate(&self, raw: &str) -> Result<Url, IngestError> {
        let raw = raw.trim();
        if raw.len() > self.max_len {
            return Err(IngestError::InvalidUrl(format!(
                "URL is {} characters, limit is {}",
                raw.len(),
                self.max_len
            )));
        }
        let url = Url::parse(raw).map_err(|e| IngestError::InvalidUrl(e.to_string()))?;
        self.check(&url)?;
        Ok(url)
    }

    pub fn check(&self, url: &Url) -> Result<(), IngestError> {
        if url.scheme() != self.scheme {
            return Err(IngestError::InvalidScheme(url.scheme().to_string()));
        }
        let host = url
            .host()
            .ok_or_else(|| IngestError::InvalidUrl("URL has no host".into()))?;

        if self.block_private && is_internal(&host) {
            return Err(IngestError::HostNotAllowed(host.to_string()));
        }

        if !self.allowed_hosts.is_empty() {
            let name = host.to_string().to_ascii_lowercase();
            if !self.allowed_hosts.iter().any(|a| host_matches(&name, a)) {
                return Err(IngestError::HostNotAllowed(name));
            }
        }
        Ok(())
    }

    /// Verdict for one redirect hop. `hops` counts the requests already made
    /// in the chain, the original one included.
    pub fn check_redirect(
        &self,
        target: &Url,
        hops: usize,
        max_redirects: usize,
    ) -> Result<(), RedirectRejection> {
        if hops > max_redirects {
            return Err(RedirectRejection::TooMany(max_redirects));
        }
        self.check(target).map_err(|e| match e {
            IngestError::InvalidScheme(s) => RedirectRejection::Scheme(s),
            IngestError::HostNotAllowed(h) => RedirectRejection::Host(h),
            other => RedirectRejection::Url(other.to_string()),
        })
    }
}

/// Exact match, or `host` is a subdomain of `allowed`.
pub fn host_matches(host: &str, allowed: &str) -> bool {
    host == allowed
        || host
            .strip_suffix(allowed)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn is_internal(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(d) => {
            let d = d.to_ascii_lowercase();
            d == "localhost" || d.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_internal_v4(ip),
        Host::Ipv6(ip) => is_internal_v6(ip),
    }
}

fn is_internal_v4(ip: &Ipv4Addr) -> bool {
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64)
}

fn is_internal_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

struct Fetched {
    body: Vec<u8>,
    content_type: Option<String>,
}

pub struct DocumentGuard<F: DocumentFetcher> {
    cfg: Ingest,
    policy: UrlPolicy,
    fetcher: F,
}

impl<F: DocumentFetcher> DocumentGuard<F> {
    pub fn new(cfg: &Ingest, fetcher: F) -> Self {
        Self {
            cfg: cfg.clone(),
            policy: UrlPolicy::from_config(cfg),
            fetcher,
        }
    }

    pub fn policy(&self) -> &UrlPolicy {
        &self.policy
    }

    pub async fn fetch_and_normalize(&self, url: &str) -> Result<NormalizedDocument, IngestError> {
        self.fetch_and_normalize_with(url, &Cancellation::never())
            .await
    }

    pub async fn fetch_and_normalize_with(
        &self,
        url: &str,
        cancel: &Cancellation,
    ) -> Result<NormalizedDocument, IngestError> {
        let url = self.policy.validate(url)?;
        let source = redact_url(&url);

        let fetched = self.fetch(&url, &source, cancel).await?;
        let content_verified = self.content_matches(&url, fetched.content_type.as_deref());
        if !content_verified {
            warn!(
                source = %source,
                content_type = ?fetched.content_type,
                "document type unverified; normalizing anyway"
            );
        }

        let normalized = normalize::normalize(
            fetched.body,
            self.cfg.max_document_bytes,
            self.cfg.envelope_search_bytes,
        )?;
        let sha256 = sha256_hex(&normalized.bytes);

        info!(
            source = %source,
            bytes = normalized.bytes.len(),
            delivery = ?normalized.delivery,
            repairs = normalized.repairs.len(),
            "document normalized"
        );

        Ok(NormalizedDocument {
            source: url,
            bytes: normalized.bytes,
            delivery: normalized.delivery,
            content_verified,
            content_type: fetched.content_type,
            repairs: normalized.repairs,
            sha256,
        })
    }

    /// One retry after a fixed delay on 5xx; 4xx and transport errors are final.
    async fn fetch(
        &self,
        url: &Url,
        source: &str,
        cancel: &Cancellation,
    ) -> Result<Fetched, IngestError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut resp = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                r = self.fetcher.fetch(url) => r.map_err(map_fetch_error)?,
            };

            let status = resp.status();
            debug!(source = %source, attempt, status, "document response");

            if (500..600).contains(&status) {
                if attempt == 1 {
                    warn!(source = %source, status, "upstream 5xx; retrying once");
                    drop(resp);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_millis(self.cfg.retry_delay_ms)) => {}
                    }
                    continue;
                }
                return Err(IngestError::UpstreamError {
                    status_code: status,
                });
            }
            if !(200..300).contains(&status) {
                return Err(IngestError::UpstreamError {
                    status_code: status,
                });
            }

            let limit = self.cfg.max_document_bytes;
            let declared = resp.content_length();
            if let Some(len) = declared {
                if len > limit {
                    return Err(IngestError::PayloadTooLarge {
                        limit,
                        declared: Some(len),
                    });
                }
            }

            let content_type = resp.content_type();
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                b = read_bounded(resp.as_mut(), limit, declared) => b?,
            };
            return Ok(Fetched { body, content_type });
        }
    }

    fn content_matches(&self, url: &Url, content_type: Option<&str>) -> bool {
        let by_type = content_type
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|ct| ct.trim().eq_ignore_ascii_case(&self.cfg.expected_content_type));
        let ext = format!(".{}", self.cfg.expected_extension.to_ascii_lowercase());
        by_type || url.path().to_ascii_lowercase().ends_with(&ext)
    }
}

/// Reads the body, aborting as soon as the running total passes `limit`.
async fn read_bounded(
    resp: &mut dyn FetchResponse,
    limit: u64,
    declared: Option<u64>,
) -> Result<Vec<u8>, IngestError> {
    let mut body = Vec::with_capacity(declared.unwrap_or(0).min(limit) as usize);
    while let Some(chunk) = resp.chunk().await.map_err(map_fetch_error)? {
        if (body.len() + chunk.len()) as u64 > limit {
            return Err(IngestError::PayloadTooLarge {
                limit,
                declared: None,
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn map_fetch_error(e: FetchError) -> IngestError {
    match e {
        FetchError::Redirect(RedirectRejection::Scheme(s)) => IngestError::InvalidScheme(s),
        FetchError::Redirect(RedirectRejection::Host(h)) => IngestError::HostNotAllowed(h),
        FetchError::Redirect(RedirectRejection::Url(m)) => IngestError::InvalidUrl(m),
        FetchError::Redirect(RedirectRejection::TooMany(max)) => IngestError::TooManyRedirects(max),
        FetchError::Timeout => IngestError::Transport("request timed out".into()),
        FetchError::Transport(msg) => IngestError::Transport(msg),
    }
}
