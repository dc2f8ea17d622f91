// =============================================================================
// portal/captcha.rs — PROVING WE ARE HUMAN (OR KNOW ONE)
// =============================================================================
//
// The portal throws a CAPTCHA at some requests. We cannot solve it
// ourselves, and we do not pretend to. Instead the handler delegates to a
// pluggable solver: an OCR service over HTTP, a human operator answering
// through a channel, or nobody at all.
//
// Solutions are single-use. They are never cached and never replayed: a
// CaptchaSolution is moved into exactly one resubmission and gone.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::error::{ErrorKind, PortalResult};
use crate::metrics::PortalMetrics;
use crate::models::FetchResult;
use crate::portal::layout::Endpoint;

/// A challenge the portal put in front of a request.
#[derive(Debug, Clone)]
pub struct CaptchaChallenge {
    /// The request the challenge blocked.
    pub endpoint: Endpoint,
    pub image: Vec<u8>,
    pub image_content_type: Option<String>,
}

/// An answer to one challenge. Deliberately not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct CaptchaSolution {
    pub answer: String,
}

/// Something that can answer a CAPTCHA.
pub trait CaptchaSolver: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn solve<'a>(
        &'a self,
        challenge: &'a CaptchaChallenge,
    ) -> BoxFuture<'a, PortalResult<CaptchaSolution>>;
}

fn captcha_error(reason: impl Into<String>) -> ErrorKind {
    ErrorKind::CaptchaRequired { reason: reason.into() }
}

// -----------------------------------------------------------------------------
// NoSolver
// -----------------------------------------------------------------------------

/// Gives up immediately. The default when nothing else is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSolver;

impl CaptchaSolver for NoSolver {
    fn name(&self) -> &str {
        "none"
    }

    fn solve<'a>(
        &'a self,
        _challenge: &'a CaptchaChallenge,
    ) -> BoxFuture<'a, PortalResult<CaptchaSolution>> {
        async { Err(captcha_error("no captcha solver configured")) }.boxed()
    }
}

// -----------------------------------------------------------------------------
// OcrServiceSolver
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OcrReply {
    text: String,
}

/// POSTs the challenge image to an OCR endpoint that answers
/// `{"text": "..."}`.
pub struct OcrServiceSolver {
    client: reqwest::Client,
    url: String,
}

impl OcrServiceSolver {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl CaptchaSolver for OcrServiceSolver {
    fn name(&self) -> &str {
        "ocr-service"
    }

    fn solve<'a>(
        &'a self,
        challenge: &'a CaptchaChallenge,
    ) -> BoxFuture<'a, PortalResult<CaptchaSolution>> {
        async move {
            let content_type = challenge
                .image_content_type
                .clone()
                .unwrap_or_else(|| "image/png".to_string());

            let response = self
                .client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(challenge.image.clone())
                .send()
                .await
                .map_err(|e| captcha_error(format!("OCR service unreachable: {e}")))?;

            if !response.status().is_success() {
                return Err(captcha_error(format!(
                    "OCR service answered {}",
                    response.status()
                )));
            }

            let reply: OcrReply = response
                .json()
                .await
                .map_err(|e| captcha_error(format!("OCR service reply unreadable: {e}")))?;

            Ok(CaptchaSolution {
                answer: reply.text,
            })
        }
        .boxed()
    }
}

// -----------------------------------------------------------------------------
// OperatorSolver
// -----------------------------------------------------------------------------

/// A challenge waiting for a human. Answer it by sending on `reply`.
#[derive(Debug)]
pub struct OperatorPrompt {
    pub challenge: CaptchaChallenge,
    pub reply: oneshot::Sender<String>,
}

/// Forwards challenges over a channel to whoever holds the receiver (a
/// terminal prompt, a UI) and waits up to `timeout` for their answer.
#[derive(Debug, Clone)]
pub struct OperatorSolver {
    prompts: mpsc::Sender<OperatorPrompt>,
    timeout: Duration,
}

impl OperatorSolver {
    pub fn channel(capacity: usize, timeout: Duration) -> (Self, mpsc::Receiver<OperatorPrompt>) {
        let (prompts, rx) = mpsc::channel(capacity.max(1));
        (Self { prompts, timeout }, rx)
    }
}

impl CaptchaSolver for OperatorSolver {
    fn name(&self) -> &str {
        "operator"
    }

    fn solve<'a>(
        &'a self,
        challenge: &'a CaptchaChallenge,
    ) -> BoxFuture<'a, PortalResult<CaptchaSolution>> {
        async move {
            let (reply, answer) = oneshot::channel();
            self.prompts
                .send(OperatorPrompt {
                    challenge: challenge.clone(),
                    reply,
                })
                .await
                .map_err(|_| captcha_error("no operator is listening"))?;

            let answer = tokio::time::timeout(self.timeout, answer)
                .await
                .map_err(|_| captcha_error("operator did not answer in time"))?
                .map_err(|_| captcha_error("operator dismissed the challenge"))?;
            Ok(CaptchaSolution { answer })
        }
        .boxed()
    }
}

// -----------------------------------------------------------------------------
// CaptchaHandler
// -----------------------------------------------------------------------------

/// Wraps a solver with a deadline, answer sanity checks, and metrics.
pub struct CaptchaHandler {
    solver: Arc<dyn CaptchaSolver>,
    timeout: Duration,
    metrics: Arc<PortalMetrics>,
}

impl CaptchaHandler {
    pub fn new(solver: Arc<dyn CaptchaSolver>, timeout: Duration, metrics: Arc<PortalMetrics>) -> Self {
        Self {
            solver,
            timeout,
            metrics,
        }
    }

    pub fn solver_name(&self) -> &str {
        self.solver.name()
    }

    /// Ask the solver for an answer. Fails with `CaptchaRequired` if the
    /// solver errors, times out, or comes back with an empty answer.
    pub async fn solve(&self, challenge: &CaptchaChallenge) -> FetchResult<CaptchaSolution> {
        info!(
            solver = self.solver.name(),
            endpoint = challenge.endpoint.name(),
            image_bytes = challenge.image.len(),
            "CAPTCHA challenge, asking solver"
        );

        let outcome = match tokio::time::timeout(self.timeout, self.solver.solve(challenge)).await {
            Ok(result) => result,
            Err(_) => Err(captcha_error(format!(
                "solver {} timed out after {}s",
                self.solver.name(),
                self.timeout.as_secs()
            ))),
        };

        let outcome = outcome.and_then(|solution| {
            let answer = solution.answer.trim();
            if answer.is_empty() {
                Err(captcha_error("solver returned an empty answer"))
            } else {
                Ok(CaptchaSolution {
                    answer: answer.to_string(),
                })
            }
        });

        if let Err(e) = &outcome {
            self.metrics.increment_captchas_failed();
            warn!(solver = self.solver.name(), error = %e, "CAPTCHA not solved");
        }
        outcome.into()
    }

    /// Call after the portal accepted a resubmission carrying a solution.
    pub fn record_accepted(&self) {
        self.metrics.increment_captchas_solved();
    }

    /// Call after the portal rejected a resubmission carrying a solution.
    pub fn record_rejected(&self) {
        self.metrics.increment_captchas_failed();
    }
}
