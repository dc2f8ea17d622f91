// =============================================================================
// portal/http.rs — THE WIRE
// =============================================================================
//
// The lowest layer: one HTTP exchange with the portal, nothing more. It
// knows how to encode form fields, attach cookies, respect the global
// concurrency ceiling, consult the circuit breaker, and turn reqwest's
// transport errors into our Network taxonomy.
//
// It does NOT interpret what came back. A 200 with "Session Expired" in
// the body is a perfectly successful exchange as far as this file is
// concerned. Interpretation is PortalClient's job.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_TYPE, COOKIE, RETRY_AFTER, SET_COOKIE};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot};
use crate::config::Config;
use crate::error::{ErrorKind, NetworkFault, PortalResult};
use crate::metrics::PortalMetrics;
use crate::portal::layout::{Endpoint, PortalLayout};
use crate::portal::session::CookieJar;

/// One outbound exchange.
#[derive(Debug, Clone, Copy)]
pub struct OutboundRequest<'a> {
    pub endpoint: Endpoint,
    pub fields: &'a [(String, String)],
    pub cookies: Option<&'a CookieJar>,
}

/// Whatever the portal sent back, uninterpreted.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub endpoint: Endpoint,
    pub status: u16,
    pub content_type: Option<String>,
    /// `Retry-After` in seconds, when the portal bothered to send one.
    pub retry_after: Option<Duration>,
    pub set_cookies: Vec<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First few hundred characters of the body, for error messages.
    pub fn snippet(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        let trimmed = text.trim();
        match trimmed.char_indices().nth(200) {
            Some((idx, _)) => format!("{}...", &trimmed[..idx]),
            None => trimmed.to_string(),
        }
    }
}

/// Shared HTTP plumbing for every portal-facing component.
pub struct PortalHttp {
    client: reqwest::Client,
    config: Arc<Config>,
    layout: Arc<PortalLayout>,
    permits: Arc<Semaphore>,
    breaker: CircuitBreaker,
    metrics: Arc<PortalMetrics>,
}

impl PortalHttp {
    pub fn new(
        config: Arc<Config>,
        layout: Arc<PortalLayout>,
        permits: Arc<Semaphore>,
        metrics: Arc<PortalMetrics>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        let breaker = CircuitBreaker::new(
            "eCourts portal",
            config.circuit_breaker_failure_threshold,
            config.circuit_breaker_reset_timeout,
            config.circuit_breaker_success_threshold,
        );

        Ok(Self {
            client,
            config,
            layout,
            permits,
            breaker,
            metrics,
        })
    }

    pub fn layout(&self) -> &PortalLayout {
        &self.layout
    }

    pub fn breaker_snapshot(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Perform one exchange. Holds a global concurrency permit for the
    /// duration of the exchange only.
    pub async fn send(&self, request: OutboundRequest<'_>) -> PortalResult<RawResponse> {
        let endpoint = request.endpoint;

        if !self.breaker.allow_request() {
            return Err(ErrorKind::network(
                NetworkFault::CircuitOpen,
                format!("portal circuit open, {} not attempted", endpoint.name()),
            ));
        }

        let _permit = self.permits.acquire().await.map_err(|_| {
            ErrorKind::network(NetworkFault::Connect, "portal request pool is closed")
        })?;

        let url = self.config.portal_url(self.layout.path(endpoint));
        let encoded = encode_fields(request.fields);

        let mut builder = if endpoint.is_get() {
            let full = if encoded.is_empty() {
                url
            } else if url.contains('?') {
                format!("{url}&{encoded}")
            } else {
                format!("{url}?{encoded}")
            };
            self.client.get(full)
        } else {
            self.client
                .post(url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=UTF-8")
                .header("X-Requested-With", "XMLHttpRequest")
                .body(encoded)
        };

        if let Some(cookie) = request.cookies.and_then(CookieJar::header_value) {
            builder = builder.header(COOKIE, cookie);
        }

        debug!(endpoint = endpoint.name(), "Sending portal request");
        self.metrics.increment_requests();

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return Err(self.transport_failure(endpoint, &e)),
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => return Err(self.transport_failure(endpoint, &e)),
        };

        if status >= 500 {
            self.record_breaker_failure();
        } else {
            self.breaker.record_success();
        }

        debug!(
            endpoint = endpoint.name(),
            status,
            bytes = body.len(),
            "Portal responded"
        );

        Ok(RawResponse {
            endpoint,
            status,
            content_type: header_str(&headers, CONTENT_TYPE.as_str()),
            retry_after: parse_retry_after(&headers),
            set_cookies: headers
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::to_string)
                .collect(),
            body,
        })
    }

    fn transport_failure(&self, endpoint: Endpoint, error: &reqwest::Error) -> ErrorKind {
        self.metrics.increment_failures();
        self.record_breaker_failure();

        let fault = if error.is_timeout() {
            NetworkFault::Timeout
        } else if error.is_body() || error.is_decode() {
            NetworkFault::Body
        } else {
            NetworkFault::Connect
        };

        warn!(
            endpoint = endpoint.name(),
            fault = %fault,
            error = %error,
            "Portal transport failure"
        );
        ErrorKind::network(fault, error.to_string())
    }

    fn record_breaker_failure(&self) {
        if self.breaker.record_failure() {
            self.metrics.increment_breaker_trips();
        }
    }
}

/// `application/x-www-form-urlencoded` encoding of field pairs.
pub fn encode_fields(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Only the delta-seconds form. The HTTP-date form is rare enough from this
/// portal that falling back to exponential backoff is fine.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, RETRY_AFTER.as_str())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}
