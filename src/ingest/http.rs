use super::{DocumentFetcher, FetchError, FetchResponse, RedirectRejection, UrlPolicy};
use crate::config::Ingest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, redirect, Client, Response};
use std::time::Duration;
use url::Url;

/// reqwest-backed fetcher. Redirect hops are checked against the same
/// [`UrlPolicy`] as the original URL.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(cfg: &Ingest) -> Result<Self> {
        let policy = UrlPolicy::from_config(cfg);
        let max_redirects = cfg.max_redirects;
        let redirects = redirect::Policy::custom(move |attempt| {
            let verdict =
                policy.check_redirect(attempt.url(), attempt.previous().len(), max_redirects);
            match verdict {
                Ok(()) => attempt.follow(),
                Err(rejection) => attempt.error(rejection),
            }
        });

        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_seconds))
            .timeout(Duration::from_secs(cfg.request_timeout_seconds))
            .redirect(redirects)
            .build()
            .with_context(|| "building document HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Box<dyn FetchResponse>, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(fetch_error)?;
        Ok(Box::new(HttpResponse { inner: resp }))
    }
}

struct HttpResponse {
    inner: Response,
}

#[async_trait]
impl FetchResponse for HttpResponse {
    fn status(&self) -> u16 {
        self.inner.status().as_u16()
    }

    fn content_length(&self) -> Option<u64> {
        self.inner.content_length()
    }

    fn content_type(&self) -> Option<String> {
        self.inner
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    async fn chunk(&mut self) -> Result<Option<Vec<u8>>, FetchError> {
        let chunk = self.inner.chunk().await.map_err(fetch_error)?;
        Ok(chunk.map(|b| b.to_vec()))
    }
}

// Error text must not carry the URL: query strings can hold access tokens.
fn fetch_error(e: reqwest::Error) -> FetchError {
    if let Some(rejection) = redirect_rejection(&e) {
        FetchError::Redirect(rejection)
    } else if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(e.without_url().to_string())
    }
}

/// The policy's verdict, if the redirect closure refused a hop.
fn redirect_rejection(e: &reqwest::Error) -> Option<RedirectRejection> {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(rejection) = err.downcast_ref::<RedirectRejection>() {
            return Some(rejection.clone());
        }
        source = err.source();
    }
    None
}
