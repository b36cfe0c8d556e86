use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::RngExt;
use memget_core::models::record::{DownloadRecord, FetchMethod};
use memget_core::models::settings::DownloadSettings;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::models::media::{ContentFormat, FetchedMedia};

const SNIFF_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Worth another attempt: timeouts, dropped connections, 5xx.
    #[error("{0}")]
    Transient(String),
    /// Retrying cannot help: 4xx, malformed URL, unusable payload.
    #[error("{0}")]
    Permanent(String),
    #[error("download cancelled")]
    Cancelled,
}

/// Where media bytes come from. One call is one attempt; retries live in
/// [`fetch_with_retry`].
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Writes the record's payload to `<output_dir>/<stem>.<ext>` and reports
    /// the final path. Nothing but a `.part` file may exist on error.
    async fn fetch(
        &self,
        record: &DownloadRecord,
        output_dir: &Path,
        stem: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedMedia, FetchError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per record, first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &DownloadSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): exponential, capped, plus
    /// up to 50% jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        if base == 0 {
            return Duration::ZERO;
        }
        let exp = base.saturating_mul(1u64 << (retry.saturating_sub(1)).min(16));
        let capped = exp.min(self.max_delay.as_millis() as u64);
        let jitter = rand::rng().random_range(0..=capped / 2);
        Duration::from_millis(capped + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Succeeded { media: FetchedMedia, attempts: u32 },
    /// Every attempt failed transiently.
    TransientFailure { error: String, attempts: u32 },
    PermanentFailure { error: String, attempts: u32 },
    Cancelled,
}

pub async fn fetch_with_retry(
    source: &dyn MediaSource,
    record: &DownloadRecord,
    output_dir: &Path,
    stem: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> FetchOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err = String::new();

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return FetchOutcome::Cancelled;
        }

        if attempt > 1 {
            let delay = policy.delay_for(attempt - 1);
            tokio::select! {
                _ = cancel.cancelled() => return FetchOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match source.fetch(record, output_dir, stem, cancel).await {
            Ok(media) => {
                return FetchOutcome::Succeeded {
                    media,
                    attempts: attempt,
                }
            }
            Err(FetchError::Cancelled) => return FetchOutcome::Cancelled,
            Err(FetchError::Permanent(error)) => {
                return FetchOutcome::PermanentFailure {
                    error,
                    attempts: attempt,
                }
            }
            Err(FetchError::Transient(error)) => {
                tracing::warn!(
                    "[download] {} attempt {}/{} failed: {}",
                    record.id,
                    attempt,
                    max_attempts,
                    error
                );
                last_err = error;
            }
        }
    }

    FetchOutcome::TransientFailure {
        error: last_err,
        attempts: max_attempts,
    }
}

pub fn classify_status(status: reqwest::StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let msg = format!("HTTP {}", status.as_u16());
    let transient = status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
    if transient {
        Some(FetchError::Transient(msg))
    } else {
        Some(FetchError::Permanent(msg))
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_builder() {
        return FetchError::Permanent(format!("invalid request: {}", err));
    }
    if let Some(status) = err.status() {
        if let Some(classified) = classify_status(status) {
            return classified;
        }
    }
    FetchError::Transient(err.to_string())
}

/// Checks the URL before any network activity.
pub fn validate_url(raw: &str) -> Result<url::Url, FetchError> {
    let parsed =
        url::Url::parse(raw).map_err(|e| FetchError::Permanent(format!("malformed URL: {}", e)))?;
    let supported = matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some();
    if !supported {
        return Err(FetchError::Permanent(format!("unsupported URL: {}", raw)));
    }
    Ok(parsed)
}

/// The export's POST links carry their form body in the query string.
pub fn split_post_url(url: &url::Url) -> (String, String) {
    let mut endpoint = url.clone();
    let body = url.query().unwrap_or("").to_string();
    endpoint.set_query(None);
    (endpoint.to_string(), body)
}

fn part_path_for(output_dir: &Path, stem: &str) -> PathBuf {
    output_dir.join(format!("{}.part", stem))
}

/// Picks the payload format: URL extension, then `Content-Type`, then magic
/// bytes. A sniffed archive always wins since bundles are served under media
/// names.
fn resolve_format(url: &str, content_type: Option<&str>, head: &[u8]) -> Option<ContentFormat> {
    let sniffed = ContentFormat::sniff(head);
    if sniffed == Some(ContentFormat::Zip) {
        return sniffed;
    }
    ContentFormat::from_url(url)
        .or_else(|| content_type.and_then(ContentFormat::from_content_type))
        .or(sniffed)
}

pub struct HttpSource {
    client: reqwest::Client,
    request_timeout: Duration,
    stall_timeout: Duration,
}

impl HttpSource {
    pub fn new(client: reqwest::Client, settings: &DownloadSettings) -> Self {
        Self {
            client,
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            stall_timeout: Duration::from_secs(settings.stall_timeout_secs),
        }
    }

    async fn send(
        &self,
        record: &DownloadRecord,
        url: &url::Url,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, FetchError> {
        let request = match record.method {
            FetchMethod::Get => self.client.get(url.as_str()),
            FetchMethod::Post => {
                let (endpoint, body) = split_post_url(url);
                self.client
                    .post(endpoint)
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    )
                    .body(body)
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            res = tokio::time::timeout(self.request_timeout, request.send()) => match res {
                Err(_) => Err(FetchError::Transient(format!(
                    "no response within {}s",
                    self.request_timeout.as_secs()
                ))),
                Ok(Err(e)) => Err(classify_reqwest_error(e)),
                Ok(Ok(resp)) => Ok(resp),
            },
        }
    }

    async fn stream_to_part(
        &self,
        response: reqwest::Response,
        part_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(u64, Vec<u8>), FetchError> {
        let file = tokio::fs::File::create(part_path)
            .await
            .map_err(|e| FetchError::Permanent(format!("cannot create {}: {}", part_path.display(), e)))?;
        let mut file = tokio::io::BufWriter::with_capacity(256 * 1024, file);
        let mut written: u64 = 0;
        let mut head: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                next = tokio::time::timeout(self.stall_timeout, stream.next()) => next,
            };
            match next {
                Ok(Some(Ok(chunk))) => {
                    if head.len() < SNIFF_LEN {
                        let take = (SNIFF_LEN - head.len()).min(chunk.len());
                        head.extend_from_slice(&chunk[..take]);
                    }
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| FetchError::Permanent(format!("write error (disk full?): {}", e)))?;
                    written += chunk.len() as u64;
                }
                Ok(Some(Err(e))) => {
                    return Err(FetchError::Transient(format!("stream error: {}", e)))
                }
                Ok(None) => break,
                Err(_) => {
                    return Err(FetchError::Transient(format!(
                        "no data received for {}s",
                        self.stall_timeout.as_secs()
                    )))
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| FetchError::Permanent(format!("write error: {}", e)))?;
        file.get_ref()
            .sync_all()
            .await
            .map_err(|e| FetchError::Permanent(format!("write error: {}", e)))?;
        Ok((written, head))
    }
}

#[async_trait]
impl MediaSource for HttpSource {
    async fn fetch(
        &self,
        record: &DownloadRecord,
        output_dir: &Path,
        stem: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedMedia, FetchError> {
        let url = validate_url(&record.url)?;
        let response = self.send(record, &url, cancel).await?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        if content_type.as_deref().is_some_and(|ct| ct.contains("text/html")) {
            return Err(FetchError::Permanent(
                "server returned HTML instead of media; the link may have expired".into(),
            ));
        }
        let expected = response.content_length();

        let part_path = part_path_for(output_dir, stem);
        let (written, head) = match self.stream_to_part(response, &part_path, cancel).await {
            Ok(r) => r,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };

        if written == 0 {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(FetchError::Permanent("empty payload".into()));
        }
        if let Some(expected) = expected {
            if expected > 0 && written != expected {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(FetchError::Transient(format!(
                    "truncated body: expected {} bytes, received {}",
                    expected, written
                )));
            }
        }

        let Some(format) = resolve_format(&record.url, content_type.as_deref(), &head) else {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(FetchError::Permanent(format!(
                "unsupported media kind (content-type {})",
                content_type.as_deref().unwrap_or("unknown")
            )));
        };

        let final_path = output_dir.join(format!("{}.{}", stem, format.extension()));
        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| FetchError::Permanent(format!("cannot finalize download: {}", e)))?;

        Ok(FetchedMedia {
            path: final_path,
            format,
            content_type,
            bytes: written,
        })
    }
}
