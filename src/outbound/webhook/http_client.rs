use reqwest::Client;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_USER_AGENT: &str = "Webhook-Management-Platform/1.0";
pub const DEFAULT_BODY_LIMIT: usize = 1024;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
pub const DELIVERY_HEADER: &str = "X-Webhook-Delivery";

/// Error type for HTTP client operations
///
/// Everything except `InvalidRequest` happened on the way to the receiver and
/// counts as a transport failure.
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpClientError {
    pub fn is_transport(&self) -> bool {
        !matches!(self, HttpClientError::InvalidRequest(_))
    }

    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_builder() {
            HttpClientError::InvalidRequest(err.to_string())
        } else if err.is_timeout() {
            HttpClientError::Timeout(timeout)
        } else if err.is_connect() {
            HttpClientError::Network(err.to_string())
        } else {
            HttpClientError::RequestFailed(err.to_string())
        }
    }
}

/// Everything the receiver needs to see on one attempt.
#[derive(Debug, Clone)]
pub struct OutgoingWebhook<'a> {
    pub url: &'a str,
    pub event_name: &'a str,
    pub delivery_id: String,
    pub timestamp: i64,
    /// `sha256=<hex>` signature over `body`.
    pub signature: String,
    /// Serialized payload, sent verbatim.
    pub body: Vec<u8>,
}

/// Status code and truncated body returned by the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status_code: u16,
    pub body: String,
    pub response_time_ms: u64,
}

/// HTTP client wrapper for webhook delivery
#[derive(Debug, Clone)]
pub struct WebhookHttpClient {
    client: Client,
    timeout: Duration,
    body_limit: usize,
}

impl WebhookHttpClient {
    /// Create a new HTTP client with default timeout (30 seconds)
    pub fn new() -> Result<Self, HttpClientError> {
        Self::with_settings(DEFAULT_TIMEOUT, DEFAULT_USER_AGENT, DEFAULT_BODY_LIMIT)
    }

    pub fn with_settings(
        timeout: Duration,
        user_agent: &str,
        body_limit: usize,
    ) -> Result<Self, HttpClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| HttpClientError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            body_limit,
        })
    }

    /// Send a webhook POST request
    ///
    /// Any response, 2xx or not, is returned as `Ok`; the caller decides what
    /// the status means.
    pub async fn send_webhook(
        &self,
        webhook: OutgoingWebhook<'_>,
    ) -> Result<WebhookResponse, HttpClientError> {
        debug!(url = %webhook.url, delivery_id = %webhook.delivery_id, "Sending webhook");

        let start = Instant::now();

        let response = self
            .client
            .post(webhook.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, webhook.signature)
            .header(EVENT_HEADER, webhook.event_name)
            .header(TIMESTAMP_HEADER, webhook.timestamp.to_string())
            .header(DELIVERY_HEADER, webhook.delivery_id)
            .body(webhook.body)
            .send()
            .await
            .map_err(|e| HttpClientError::from_reqwest(e, self.timeout))?;

        let status_code = response.status().as_u16();

        // The status is already known; a broken body only shortens the excerpt.
        let (bytes, read_error) = read_limited(response, self.body_limit).await;
        let body = match read_error {
            Some(e) if bytes.is_empty() => {
                warn!(
                    url = %webhook.url,
                    status = %status_code,
                    error = %e,
                    "Failed to read webhook response body"
                );
                truncate_excerpt(&e.to_string(), self.body_limit)
            }
            Some(e) => {
                warn!(
                    url = %webhook.url,
                    status = %status_code,
                    error = %e,
                    "Webhook response body cut short"
                );
                truncate_excerpt(&String::from_utf8_lossy(&bytes), self.body_limit)
            }
            None => truncate_excerpt(&String::from_utf8_lossy(&bytes), self.body_limit),
        };

        let response_time_ms = start.elapsed().as_millis() as u64;

        debug!(
            url = %webhook.url,
            status = %status_code,
            response_time_ms = %response_time_ms,
            "Webhook response received"
        );

        Ok(WebhookResponse {
            status_code,
            body,
            response_time_ms,
        })
    }

    /// Get configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn body_limit(&self) -> usize {
        self.body_limit
    }
}

/// Read at most `limit` bytes of the body, chunk by chunk. The rest is never buffered.
async fn read_limited(
    mut response: reqwest::Response,
    limit: usize,
) -> (Vec<u8>, Option<reqwest::Error>) {
    let mut buf = Vec::with_capacity(limit.min(8 * 1024));
    while buf.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => return (buf, Some(e)),
        }
    }
    (buf, None)
}

/// Cut `text` to at most `limit` bytes without splitting a character.
pub fn truncate_excerpt(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
