//! URL fetching for NZB-by-URL jobs and feed documents
//!
//! Wraps an HTTP client configured the way the download core needs it:
//! `User-Agent: nzbget/<version>`, transparent gzip, up to 5 redirects, and a
//! `Content-Disposition` filename parse. Failures classify into the same
//! taxonomy the article retry loop uses, and the retry policy mirrors it:
//! `retries` download attempts, a higher bound on connect attempts, a
//! jittered sleep between attempts.

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::FetchConfig;
use crate::error::FetchError;

/// Timeout for one HTTP attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// A fetched document with its server-suggested filename.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Response body (gunzipped when the transport compressed it)
    pub content: Vec<u8>,
    /// Filename from `Content-Disposition`, if any
    pub filename: Option<String>,
}

/// HTTP fetcher with the core's retry policy.
pub struct UrlFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl UrlFetcher {
    /// Build a fetcher. Fails only if the TLS backend cannot initialize.
    pub fn new(config: FetchConfig) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("nzbget/{}", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| crate::error::Error::Other(format!("HTTP client init: {e}")))?;
        Ok(Self { client, config })
    }

    /// Fetch a document, retrying per policy. Cancellation reports
    /// [`FetchError::Retry`] so the caller can keep the job queued.
    pub async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedDocument, FetchError> {
        let mut retries_left = self.config.retries.max(1);
        let mut connect_retries_left = self.config.connect_retries.max(1);

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Retry);
            }
            let attempt = tokio::select! {
                result = self.fetch_once(url) => result,
                _ = cancel.cancelled() => return Err(FetchError::Retry),
            };
            let error = match attempt {
                Ok(doc) => return Ok(doc),
                Err(e) => e,
            };

            match &error {
                FetchError::ConnectError(_) => {
                    connect_retries_left = connect_retries_left.saturating_sub(1);
                }
                FetchError::Failed(_) => {
                    retries_left = retries_left.saturating_sub(1);
                }
                // NotFound / Fatal / Retry are terminal here
                _ => return Err(error),
            }
            if retries_left == 0 || connect_retries_left == 0 {
                return Err(error);
            }

            tracing::warn!(url, error = %error, "URL fetch failed, retrying");
            let delay = self.retry_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(FetchError::Retry),
            }
        }
    }

    fn retry_delay(&self) -> Duration {
        let base = self.config.retry_interval;
        if !self.config.jitter {
            return base;
        }
        let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| FetchError::Fatal(format!("invalid URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::Fatal(format!(
                "unsupported protocol '{}'",
                parsed.scheme()
            )));
        }

        let response = self.client.get(parsed).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                FetchError::ConnectError(format!("{e}"))
            } else if e.is_redirect() {
                FetchError::Failed(format!("too many redirects: {e}"))
            } else {
                FetchError::Failed(format!("{e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                404 => FetchError::NotFound(format!("{url}: 404")),
                408 | 429 | 499 | 502 | 503 | 504 => {
                    FetchError::ConnectError(format!("{url}: {status}"))
                }
                _ => FetchError::Failed(format!("{url}: {status}")),
            });
        }

        let filename = filename_from_content_disposition(
            response
                .headers()
                .get(reqwest::header::CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok()),
        );

        let gzipped = response
            .headers()
            .get(reqwest::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("gzip"));
        if response.content_length().is_none() && !gzipped {
            tracing::warn!(url, "response carries no Content-Length");
        }

        let content = response
            .bytes()
            .await
            .map_err(|e| FetchError::Failed(format!("reading body: {e}")))?
            .to_vec();

        Ok(FetchedDocument {
            content,
            filename,
        })
    }
}

/// Parse `filename=` (or `filename*=`-less quoted form) out of a
/// `Content-Disposition` header value.
pub fn filename_from_content_disposition(value: Option<&str>) -> Option<String> {
    let value = value?;
    let lower = value.to_ascii_lowercase();
    let idx = lower.find("filename=")?;
    let raw = value[idx + "filename=".len()..].trim();
    let raw = raw.split(';').next().unwrap_or(raw).trim();
    let cleaned = raw.trim_matches('"').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}
