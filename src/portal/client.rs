// =============================================================================
// portal/client.rs — ASKING THE PORTAL A QUESTION AND UNDERSTANDING THE ANSWER
// =============================================================================
//
// Every higher-level component funnels through PortalClient::submit. It
// attaches the session, sends the request, reads the response for the
// portal's many ways of saying no, solves a CAPTCHA if one shows up,
// retries transient trouble with backoff, and hands back either a response
// whose shape has been checked or exactly one ErrorKind.
//
// Classification order matters and is fixed:
//   1. transport failure          → Network
//   2. 401/419/440 or session text → SessionExpired
//   3. 429 or throttle text        → RateLimited
//   4. captcha text                → solve inline, resubmit once
//   5. envelope/shape failure      → MalformedResponse
//   6. 403, other 4xx, status≠ok   → Unauthorized
//
// A 5xx is a Network failure. Anything that happens after a CAPTCHA
// resubmission is final: a solution is spent once, never retried.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, NetworkFault, PortalResult};
use crate::markers::{is_textual, MarkerScanner};
use crate::metrics::PortalMetrics;
use crate::portal::captcha::{CaptchaChallenge, CaptchaHandler, CaptchaSolution};
use crate::portal::http::{OutboundRequest, PortalHttp, RawResponse};
use crate::portal::layout::{Endpoint, PortalLayout};
use crate::portal::session::{Session, SessionManager};
use crate::retry::RetryPolicy;

/// A logical portal call: an endpoint plus its business fields. Session,
/// CSRF, and static fields are added by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRequest {
    pub endpoint: Endpoint,
    pub fields: Vec<(String, String)>,
}

impl PortalRequest {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// A response that survived classification.
#[derive(Debug, Clone)]
pub struct PortalResponse {
    pub endpoint: Endpoint,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl PortalResponse {
    /// Decode the body as JSON, mapping any failure to `MalformedResponse`.
    pub fn json<T: DeserializeOwned>(&self) -> PortalResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ErrorKind::malformed(self.endpoint.name(), format!("unexpected shape: {e}")))
    }

    pub fn has_content_type(&self, prefix: &str) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with(prefix))
    }
}

/// What one attempt produced, before retry policy is applied.
enum Verdict {
    Accept,
    Captcha,
    Reject(ErrorKind),
}

/// An attempt that failed, and whether the retry loop may try again.
struct Failed {
    error: ErrorKind,
    retryable: bool,
}

impl Failed {
    fn transient(error: ErrorKind) -> Self {
        let retryable = error.is_transient();
        Self { error, retryable }
    }

    fn terminal(error: ErrorKind) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

pub struct PortalClient {
    http: Arc<PortalHttp>,
    sessions: Arc<SessionManager>,
    captcha: Arc<CaptchaHandler>,
    layout: Arc<PortalLayout>,
    markers: MarkerScanner,
    retry: RetryPolicy,
    metrics: Arc<PortalMetrics>,
}

impl PortalClient {
    pub fn new(
        http: Arc<PortalHttp>,
        sessions: Arc<SessionManager>,
        captcha: Arc<CaptchaHandler>,
        layout: Arc<PortalLayout>,
        markers: MarkerScanner,
        retry: RetryPolicy,
        metrics: Arc<PortalMetrics>,
    ) -> Self {
        Self {
            http,
            sessions,
            captcha,
            layout,
            markers,
            retry,
            metrics,
        }
    }

    pub fn layout(&self) -> &PortalLayout {
        &self.layout
    }

    /// Send `request` under a valid session and return a classified,
    /// shape-checked response. Expired sessions are refreshed at most once.
    pub async fn submit(&self, request: &PortalRequest) -> PortalResult<PortalResponse> {
        self.sessions
            .with_session(|session| self.submit_with_retry(request, session))
            .await
    }

    async fn submit_with_retry(
        &self,
        request: &PortalRequest,
        session: Arc<Session>,
    ) -> PortalResult<PortalResponse> {
        let mut attempt = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            attempt += 1;
            let failed = match self.attempt(request, &session, attempt).await {
                Ok(response) => return Ok(response),
                Err(failed) => failed,
            };

            let delay = if failed.retryable {
                self.retry.next_delay(attempt, waited, &failed.error)
            } else {
                None
            };

            match delay {
                Some(delay) => {
                    self.metrics.increment_retries();
                    warn!(
                        endpoint = request.endpoint.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failed.error,
                        "Portal request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    waited += delay;
                }
                None => {
                    if failed.error != ErrorKind::SessionExpired {
                        self.metrics.increment_failures();
                    }
                    debug!(
                        endpoint = request.endpoint.name(),
                        attempt,
                        kind = failed.error.label(),
                        "Portal request failed"
                    );
                    return Err(failed.error);
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: &PortalRequest,
        session: &Session,
        attempt: u32,
    ) -> Result<PortalResponse, Failed> {
        let fields = self.fields_for(request, session, None);
        let raw = self
            .http
            .send(OutboundRequest {
                endpoint: request.endpoint,
                fields: &fields,
                cookies: Some(&session.cookies),
            })
            .await
            .map_err(Failed::transient)?;

        match self.classify(&raw, attempt) {
            Verdict::Accept => self.accept(raw).map_err(Failed::terminal),
            Verdict::Reject(error) => Err(Failed::transient(error)),
            Verdict::Captcha => self
                .pass_captcha(request, session, attempt)
                .await
                .map_err(Failed::terminal),
        }
    }

    /// Solve the challenge and resubmit exactly once.
    async fn pass_captcha(
        &self,
        request: &PortalRequest,
        session: &Session,
        attempt: u32,
    ) -> PortalResult<PortalResponse> {
        let challenge = self.fetch_challenge(request.endpoint, session).await?;
        let solution = self.captcha.solve(&challenge).await.into_result()?;

        let fields = self.fields_for(request, session, Some(solution));
        let raw = self
            .http
            .send(OutboundRequest {
                endpoint: request.endpoint,
                fields: &fields,
                cookies: Some(&session.cookies),
            })
            .await?;

        match self.classify(&raw, attempt) {
            Verdict::Accept => {
                let response = self.accept(raw)?;
                self.captcha.record_accepted();
                info!(endpoint = request.endpoint.name(), "CAPTCHA accepted by portal");
                Ok(response)
            }
            Verdict::Captcha => {
                self.captcha.record_rejected();
                Err(ErrorKind::CaptchaRequired {
                    reason: "portal rejected the captcha answer".to_string(),
                })
            }
            Verdict::Reject(error) => Err(error),
        }
    }

    async fn fetch_challenge(
        &self,
        endpoint: Endpoint,
        session: &Session,
    ) -> PortalResult<CaptchaChallenge> {
        if self.layout.captcha_image_path.is_empty() {
            return Ok(CaptchaChallenge {
                endpoint,
                image: Vec::new(),
                image_content_type: None,
            });
        }

        let raw = self
            .http
            .send(OutboundRequest {
                endpoint: Endpoint::CaptchaImage,
                fields: &[],
                cookies: Some(&session.cookies),
            })
            .await
            .map_err(|e| ErrorKind::CaptchaRequired {
                reason: format!("could not fetch challenge image: {e}"),
            })?;

        if !raw.is_success() || raw.body.is_empty() {
            return Err(ErrorKind::CaptchaRequired {
                reason: format!("challenge image request answered {}", raw.status),
            });
        }

        Ok(CaptchaChallenge {
            endpoint,
            image: raw.body,
            image_content_type: raw.content_type,
        })
    }

    fn fields_for(
        &self,
        request: &PortalRequest,
        session: &Session,
        solution: Option<CaptchaSolution>,
    ) -> Vec<(String, String)> {
        let mut fields = Vec::with_capacity(request.fields.len() + self.layout.static_fields.len() + 2);
        if !request.endpoint.is_get() {
            fields.extend(self.layout.static_fields.iter().cloned());
        }
        fields.extend(request.fields.iter().cloned());
        fields.push((self.layout.csrf_field.clone(), session.csrf_token.clone()));
        if let Some(solution) = solution {
            fields.push((self.layout.captcha_field.clone(), solution.answer));
        }
        fields
    }

    /// Status codes first, then body markers. Shape is checked later, in
    /// [`accept`](Self::accept).
    fn classify(&self, raw: &RawResponse, attempt: u32) -> Verdict {
        let rate_limited = || ErrorKind::RateLimited {
            retry_after: raw
                .retry_after
                .unwrap_or_else(|| self.retry.exponential_delay(attempt)),
        };

        match raw.status {
            401 | 419 | 440 => return Verdict::Reject(ErrorKind::SessionExpired),
            429 => return Verdict::Reject(rate_limited()),
            s if s >= 500 => {
                return Verdict::Reject(ErrorKind::network(
                    NetworkFault::ServerError(s),
                    format!("{} answered {s}", raw.endpoint.name()),
                ))
            }
            s if s >= 400 => {
                return Verdict::Reject(ErrorKind::Unauthorized {
                    status: s,
                    reason: raw.snippet(),
                })
            }
            _ => {}
        }

        if !is_textual(raw.content_type.as_deref()) {
            return Verdict::Accept;
        }

        let hits = self.markers.scan(&raw.body);
        if hits.session_expired || self.bounced_to_landing(raw) {
            Verdict::Reject(ErrorKind::SessionExpired)
        } else if hits.throttle {
            Verdict::Reject(rate_limited())
        } else if hits.captcha {
            Verdict::Captcha
        } else {
            Verdict::Accept
        }
    }

    /// A JSON endpoint that answered with the landing page (CSRF input and
    /// all) has silently dropped our session.
    fn bounced_to_landing(&self, raw: &RawResponse) -> bool {
        if !raw.endpoint.expects_json() || serde_json::from_slice::<Value>(&raw.body).is_ok() {
            return false;
        }
        let needle = format!("name=\"{}\"", self.layout.csrf_field);
        memchr::memmem::find(&raw.body, needle.as_bytes()).is_some()
    }

    /// Check the status envelope of JSON endpoints. Other endpoints pass
    /// through for their consumer to validate.
    fn accept(&self, raw: RawResponse) -> PortalResult<PortalResponse> {
        let endpoint = raw.endpoint;
        if endpoint.expects_json() {
            check_envelope(endpoint, raw.status, &raw.body)?;
        }
        Ok(PortalResponse {
            endpoint,
            status: raw.status,
            content_type: raw.content_type,
            body: raw.body,
        })
    }
}

/// `{"status": "ok", ...}` or bust.
fn check_envelope(endpoint: Endpoint, http_status: u16, body: &[u8]) -> PortalResult<()> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| ErrorKind::malformed(endpoint.name(), "expected a JSON envelope"))?;

    let status = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| ErrorKind::malformed(endpoint.name(), "envelope has no status field"))?;

    if status.eq_ignore_ascii_case("ok") {
        return Ok(());
    }

    let reason = value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("portal status {status:?}"));
    Err(ErrorKind::Unauthorized {
        status: http_status,
        reason,
    })
}
