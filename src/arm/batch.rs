//! Resilient client for the ARM batch endpoint.
//!
//! Takes an ordered list of logical GET requests, submits them in chunks that
//! respect the API's batch-size ceiling, and returns the complete set of
//! successful responses or a hard error. Handles the three response modes of
//! the endpoint (synchronous 200, asynchronous 202 with `Location` polling
//! and `nextLink` pagination) as well as per-item throttling (429), transient
//! server failures (500/503) and benign misses (404).
//!
//! More info:
//! <https://learn.microsoft.com/en-us/azure/azure-resource-manager/management/request-limits-and-throttling>

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::auth::{Audience, TokenProvider};
use crate::config::{Config, RetryConfig};
use crate::error::ArmError;

/// ARM batch API version.
const API_VERSION_BATCH: &str = "2021-04-01";

/// The batch endpoint rejects payloads with more requests than this.
const BATCH_SIZE_LIMIT: usize = 500;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A single logical GET request within a batch.
///
/// `name` is the correlation id: unique within a submitted chunk, used to map
/// responses back to their originating request regardless of arrival order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest {
    pub name: String,

    #[serde(rename = "httpMethod")]
    pub http_method: String,

    pub url: String,
}

impl BatchRequest {
    /// A GET request with a fresh correlation id.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            name: Uuid::new_v4().to_string(),
            http_method: "GET".to_string(),
            url: url.into(),
        }
    }
}

/// One response envelope produced by the batch endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchResponseItem {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "httpStatusCode")]
    pub http_status_code: u16,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub content: Value,
}

impl BatchResponseItem {
    /// The item's `Retry-After` header in seconds, if present and numeric.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.headers
            .get("Retry-After")
            .and_then(|value| value.parse().ok())
    }
}

/// Classification of a single batch response item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// 200 — accumulate into the result set.
    Success,
    /// 429 — retry after the averaged `Retry-After` interval.
    Throttled,
    /// 500/503 — retry after a fixed backoff.
    ServerError,
    /// 404 — the scope disappeared between enumeration and this call; dropped.
    NotFound,
    /// Anything else — logged for diagnostics, dropped.
    Unhandled,
}

/// Classify a response item. Shared by every collector going through the
/// batch client so status handling stays in one place.
pub fn classify(item: &BatchResponseItem) -> ResponseClass {
    match item.http_status_code {
        200 => ResponseClass::Success,
        429 => ResponseClass::Throttled,
        500 | 503 => ResponseClass::ServerError,
        404 => ResponseClass::NotFound,
        _ => ResponseClass::Unhandled,
    }
}

/// Batch call payload: `{"requests": [...]}`.
#[derive(Debug, Serialize)]
struct BatchPayload<'a> {
    requests: &'a [BatchRequest],
}

/// The three envelope shapes a synchronous 200 can carry.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchEnvelope {
    Multi { responses: Vec<BatchResponseItem> },
    Paged(ResponsePage),
    Single(BatchResponseItem),
}

/// One page of an asynchronous (or already paginated) batch result.
#[derive(Debug, Deserialize)]
struct ResponsePage {
    value: Vec<BatchResponseItem>,

    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

/// Client for the ARM batch endpoint.
pub struct BatchClient<'a> {
    http_client: reqwest::Client,
    tokens: &'a TokenProvider,
    arm_base_url: String,
    retry: RetryConfig,
}

impl<'a> BatchClient<'a> {
    /// Create a new batch client.
    pub fn new(config: &Config, tokens: &'a TokenProvider) -> Result<Self, ArmError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            tokens,
            arm_base_url: config.api.arm_base_url.clone(),
            retry: config.retry.clone(),
        })
    }

    /// Submit the passed requests and return every successful response.
    ///
    /// Requests are partitioned into chunks of at most 500 and processed
    /// sequentially. A fresh token is acquired per chunk — tokens can expire
    /// during long polling/retry sequences. Throttled and server-error items
    /// are resubmitted until they succeed or the retry budget runs out; any
    /// top-level failure aborts the whole call.
    pub async fn send(
        &self,
        requests: Vec<BatchRequest>,
    ) -> Result<Vec<BatchResponseItem>, ArmError> {
        let total = requests.len();
        let mut complete = Vec::with_capacity(total);

        for chunk in chunk_requests(requests, BATCH_SIZE_LIMIT) {
            let token = self.tokens.token(Audience::Arm).await?;

            // Correlation id -> original request, for O(1) retry lookups.
            let by_name: HashMap<String, BatchRequest> = chunk
                .iter()
                .map(|request| (request.name.clone(), request.clone()))
                .collect();

            let mut remaining = chunk;
            let mut rounds: u32 = 0;

            while !remaining.is_empty() {
                let responses = self.submit_chunk(&token, &remaining).await?;
                remaining = self.triage(responses, &by_name, &mut complete).await;

                if !remaining.is_empty() {
                    rounds += 1;
                    if rounds > self.retry.max_rounds {
                        return Err(ArmError::RetryRoundsExhausted {
                            rounds: rounds - 1,
                            remaining: remaining.len(),
                        });
                    }
                }
            }
        }

        debug!("batch complete: {} requests, {} successes", total, complete.len());
        Ok(complete)
    }

    /// POST one chunk and collect its responses, resolving asynchronous
    /// acceptance and pagination.
    async fn submit_chunk(
        &self,
        token: &str,
        requests: &[BatchRequest],
    ) -> Result<Vec<BatchResponseItem>, ArmError> {
        let endpoint = format!(
            "{}/batch?api-version={}",
            self.arm_base_url, API_VERSION_BATCH
        );

        let response = self
            .http_client
            .post(&endpoint)
            .bearer_auth(token)
            .json(&BatchPayload { requests })
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {
                // The response is synchronous and ready.
                let envelope: BatchEnvelope = response
                    .json()
                    .await
                    .map_err(|e| ArmError::Parse(e.to_string()))?;

                Ok(match envelope {
                    BatchEnvelope::Multi { responses } => responses,
                    BatchEnvelope::Paged(page) => {
                        if page.next_link.is_some() {
                            debug!("synchronous batch response carried a nextLink");
                        }
                        page.value
                    }
                    BatchEnvelope::Single(item) => vec![item],
                })
            }
            202 => self.poll_async_response(token, &response).await,
            status => Err(ArmError::UnexpectedBatchStatus { status }),
        }
    }

    /// Resolve a 202 acceptance: poll the `Location` URL on the advertised
    /// interval until it yields 200, then drain all `nextLink` pages.
    async fn poll_async_response(
        &self,
        token: &str,
        accepted: &reqwest::Response,
    ) -> Result<Vec<BatchResponseItem>, ArmError> {
        let interval =
            retry_after_from_headers(accepted.headers()).unwrap_or(self.retry.poll_fallback());
        let location = accepted
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ArmError::MissingLocation)?;
        let location =
            Url::parse(location).map_err(|e| ArmError::Parse(format!("invalid Location: {e}")))?;

        debug!(
            "batch accepted asynchronously; polling {location} every {}s",
            interval.as_secs()
        );

        // Check status periodically until the response is ready.
        let mut response = loop {
            sleep(interval).await;
            let response = self.get_with_retry(location.as_str(), token).await?;
            if response.status().as_u16() != 202 {
                break response;
            }
        };

        let mut all_responses = Vec::new();

        loop {
            let status = response.status().as_u16();
            if status != 200 {
                return Err(ArmError::AsyncResponseFailed { status });
            }

            let page: ResponsePage = response
                .json()
                .await
                .map_err(|e| ArmError::Parse(e.to_string()))?;
            all_responses.extend(page.value);

            let Some(next_link) = page.next_link else {
                break;
            };

            // The next page may itself not be ready yet.
            response = loop {
                let response = self.get_with_retry(&next_link, token).await?;
                if response.status().as_u16() != 202 {
                    break response;
                }
                sleep(interval).await;
            };
        }

        Ok(all_responses)
    }

    /// GET with a single backoff-and-retry on transport failure.
    async fn get_with_retry(&self, url: &str, token: &str) -> Result<reqwest::Response, ArmError> {
        match self.http_client.get(url).bearer_auth(token).send().await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(
                    "transport error while polling asynchronous response: {e}; retrying in {}s",
                    self.retry.server_error_backoff().as_secs()
                );
                sleep(self.retry.server_error_backoff()).await;
                Ok(self.http_client.get(url).bearer_auth(token).send().await?)
            }
        }
    }

    /// Sort a chunk's responses into successes, retries and drops.
    ///
    /// Returns the requests to resubmit, sleeping the appropriate backoff
    /// when retries are pending.
    async fn triage(
        &self,
        responses: Vec<BatchResponseItem>,
        by_name: &HashMap<String, BatchRequest>,
        complete: &mut Vec<BatchResponseItem>,
    ) -> Vec<BatchRequest> {
        let mut throttled = Vec::new();
        let mut server_errors = Vec::new();

        for item in responses {
            match classify(&item) {
                ResponseClass::Success => complete.push(item),
                ResponseClass::Throttled => throttled.push(item),
                ResponseClass::ServerError => server_errors.push(item),
                ResponseClass::NotFound => {
                    // The target scope disappeared between enumeration and
                    // this call; a benign miss.
                    debug!("scope no longer exists, dropping request '{}'", item.name);
                }
                ResponseClass::Unhandled => {
                    warn!(
                        "unhandled batch response status {} for '{}': headers={:?} body={}",
                        item.http_status_code, item.name, item.headers, item.content
                    );
                }
            }
        }

        let mut remaining = Vec::new();

        if !server_errors.is_empty() {
            let backoff = self.retry.server_error_backoff();
            info!(
                "{} server errors - sleeping {}s before retrying",
                server_errors.len(),
                backoff.as_secs()
            );
            collect_retries(&server_errors, by_name, &mut remaining);
            sleep(backoff).await;
        }

        if !throttled.is_empty() {
            let wait = average_retry_after(&throttled, self.retry.throttle_fallback());
            info!(
                "{} throttled requests - sleeping {:.1}s before retrying",
                throttled.len(),
                wait.as_secs_f64()
            );
            collect_retries(&throttled, by_name, &mut remaining);
            sleep(wait).await;
        }

        remaining
    }
}

/// Look up the original request for each failed response by correlation id.
fn collect_retries(
    failed: &[BatchResponseItem],
    by_name: &HashMap<String, BatchRequest>,
    remaining: &mut Vec<BatchRequest>,
) {
    for item in failed {
        match by_name.get(&item.name) {
            Some(request) => remaining.push(request.clone()),
            None => warn!("response '{}' matches no request in this chunk", item.name),
        }
    }
}

/// Partition requests into chunks no larger than `size`.
fn chunk_requests(requests: Vec<BatchRequest>, size: usize) -> Vec<Vec<BatchRequest>> {
    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(size.min(requests.len()));

    for request in requests {
        if current.len() == size {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(request);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Arithmetic mean of the `Retry-After` values present among throttled items,
/// or `fallback` when none carry the header.
fn average_retry_after(throttled: &[BatchResponseItem], fallback: Duration) -> Duration {
    let values: Vec<u64> = throttled
        .iter()
        .filter_map(BatchResponseItem::retry_after_secs)
        .collect();

    if values.is_empty() {
        fallback
    } else {
        Duration::from_secs_f64(values.iter().sum::<u64>() as f64 / values.len() as f64)
    }
}

/// Parse a `Retry-After` header as whole seconds.
fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .map(Duration::from_secs)
}
