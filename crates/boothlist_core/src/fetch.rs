use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use sha2::{Digest, Sha256};

use crate::cache::MetadataCache;
use crate::config::Config;
use crate::extract;
use crate::model::{ItemMetadata, is_valid_item_id, item_page_url};

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_JA: &str = "ja,en-US;q=0.9,en;q=0.8";

/// Raw transport result. Non-2xx statuses come back as `Ok`; an `Err` means
/// the request itself failed (timeout, connection reset, DNS).
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
    pub final_url: String,
}

/// Page transport seam. The production implementation is a blocking
/// reqwest client; tests substitute scripted responses.
pub trait PageTransport {
    fn get(&mut self, url: &str) -> Result<PageResponse>;
}

pub struct HttpTransport {
    client: Client,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(timeout_ms: u64, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }
}

impl PageTransport for HttpTransport {
    fn get(&mut self, url: &str) -> Result<PageResponse> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(ACCEPT, ACCEPT_HTML)
            .header(ACCEPT_LANGUAGE, ACCEPT_JA)
            .send()
            .with_context(|| format!("request failed for {url}"))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .with_context(|| format!("failed to read body for {url}"))?;
        Ok(PageResponse {
            status,
            body,
            final_url,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub rate_limit: Duration,
    pub retries: usize,
    pub backoff_base: Duration,
    pub force_refresh: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            rate_limit: Duration::from_millis(1_000),
            retries: 3,
            backoff_base: Duration::from_secs(1),
            force_refresh: false,
        }
    }
}

impl FetchOptions {
    pub fn from_config(config: &Config, force_refresh: bool) -> Self {
        Self {
            rate_limit: Duration::from_millis(config.rate_limit_ms()),
            retries: config.retries(),
            backoff_base: Duration::from_secs(1),
            force_refresh,
        }
    }
}

/// Owns the cache handle, the transport and the rate-limiter clock, so
/// independent runs (and tests) never share ambient state.
pub struct FetchContext {
    transport: Box<dyn PageTransport>,
    cache: MetadataCache,
    options: FetchOptions,
    last_request_at: Option<Instant>,
}

impl FetchContext {
    pub fn new(cache: MetadataCache, transport: Box<dyn PageTransport>, options: FetchOptions) -> Self {
        Self {
            transport,
            cache,
            options,
            last_request_at: None,
        }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Resolve one item id to metadata. Transport failures never surface
    /// as errors; they are encoded into the record's `error` field and
    /// cached. Only an unwritable cache is fatal.
    pub fn resolve(&mut self, item_id: u64) -> Result<ItemMetadata> {
        if !is_valid_item_id(item_id) {
            // Rejected before any cache or network traffic.
            return Ok(ItemMetadata::with_error(
                item_id,
                format!("item id {item_id} outside valid BOOTH range"),
            ));
        }

        if !self.options.force_refresh
            && let Some(hit) = self.cache.lookup(item_id, Utc::now())?
        {
            tracing::debug!(item_id, cached_error = hit.error.is_some(), "cache hit");
            return Ok(hit);
        }

        let url = item_page_url(item_id);
        let metadata = match self.get_with_retry(&url) {
            Ok(response) if response.status == 200 => {
                let mut metadata =
                    extract::extract_metadata(&response.body, item_id, &response.final_url);
                metadata.content_hash = Some(content_hash(&response.body));
                tracing::info!(item_id, name = ?metadata.name, "scraped item");
                metadata
            }
            Ok(response) if response.status == 404 => {
                tracing::warn!(item_id, "item not found");
                ItemMetadata::with_error(item_id, format!("item {item_id} not found (404)"))
            }
            Ok(response) => {
                tracing::warn!(item_id, status = response.status, "unexpected HTTP status");
                ItemMetadata::with_error(
                    item_id,
                    format!("HTTP {} for item {item_id}", response.status),
                )
            }
            Err(error) => {
                tracing::warn!(item_id, error = %error, "fetch failed after retries");
                ItemMetadata::with_error(item_id, format!("fetch failed for item {item_id}: {error:#}"))
            }
        };

        self.cache.put(&metadata)?;
        Ok(metadata)
    }

    fn get_with_retry(&mut self, url: &str) -> Result<PageResponse> {
        let attempts = self.options.retries.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            self.wait_for_rate_limit();
            let result = self.transport.get(url);
            self.last_request_at = Some(Instant::now());

            match result {
                Ok(response) if is_transient_status(response.status) => {
                    if attempt + 1 < attempts {
                        let delay = backoff_delay(self.options.backoff_base, attempt);
                        tracing::debug!(status = response.status, ?delay, "transient status, retrying");
                        sleep(delay);
                        continue;
                    }
                    return Ok(response);
                }
                // 200, 404 and other conclusive statuses are terminal.
                Ok(response) => return Ok(response),
                Err(error) => {
                    if attempt + 1 < attempts {
                        let delay = backoff_delay(self.options.backoff_base, attempt);
                        tracing::debug!(error = %error, ?delay, "request failed, retrying");
                        sleep(delay);
                        last_error = Some(error);
                        continue;
                    }
                    return Err(error);
                }
            }
        }
        // Unreachable with attempts >= 1; keep the last error just in case.
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no fetch attempts made")))
    }

    /// One global minimum interval between outgoing requests, regardless
    /// of item id. Single-threaded, so a plain Option<Instant> is enough.
    fn wait_for_rate_limit(&mut self) {
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < self.options.rate_limit {
                sleep(self.options.rate_limit - elapsed);
            }
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Base delay doubles each attempt (1s, 2s, 4s) with a small random
/// jitter. A zero base disables the wait entirely, which tests rely on.
fn backoff_delay(base: Duration, attempt: usize) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let scaled = base.as_secs_f64() * (1u64 << attempt.min(16)) as f64;
    let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
    Duration::from_secs_f64((scaled + jitter).max(0.0))
}

fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
