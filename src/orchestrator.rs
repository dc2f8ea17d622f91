// =============================================================================
// orchestrator.rs — THE FRONT DESK
// =============================================================================
//
// The only thing callers need to hold. It wires every component together
// once (HTTP plumbing, session manager, CAPTCHA handler, client, lookup
// cache, fetchers) and exposes the public operations.
//
// Every operation takes a CancelToken and returns a FetchResult. Nothing
// in here panics and nothing throws: all failures are classified values.
// Cancelling drops the in-flight work, which aborts its HTTP requests, and
// the caller gets Failure(Cancelled) with no partial result.
// =============================================================================

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::info;

use crate::cache::{LevelTtls, LookupCache};
use crate::cancel::CancelToken;
use crate::cause_list::CauseListFetcher;
use crate::circuit_breaker::CircuitBreakerSnapshot;
use crate::config::Config;
use crate::error::SetupError;
use crate::lookup::CascadingLookupService;
use crate::markers::MarkerScanner;
use crate::metrics::{MetricsSnapshot, PortalMetrics};
use crate::models::{
    CauseListEntry, ComplexPath, CourtPath, DistrictPath, FetchResult, LocationNode, PdfDocument,
};
use crate::pdf::PdfRetriever;
use crate::portal::captcha::{CaptchaHandler, CaptchaSolver, NoSolver, OcrServiceSolver};
use crate::portal::client::PortalClient;
use crate::portal::http::PortalHttp;
use crate::portal::layout::PortalLayout;
use crate::portal::session::SessionManager;
use crate::retry::RetryPolicy;

/// Counters plus circuit breaker state, for the CLI and for tests.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub metrics: MetricsSnapshot,
    pub circuit_breaker: CircuitBreakerSnapshot,
    pub cached_lookups: usize,
    pub has_session: bool,
}

pub struct RequestOrchestrator {
    http: Arc<PortalHttp>,
    sessions: Arc<SessionManager>,
    cache: Arc<LookupCache>,
    lookup: Arc<CascadingLookupService>,
    cause_lists: CauseListFetcher,
    pdfs: PdfRetriever,
    metrics: Arc<PortalMetrics>,
}

impl RequestOrchestrator {
    /// Build an engine with an explicit CAPTCHA solver.
    pub fn new(
        config: Config,
        layout: PortalLayout,
        solver: Arc<dyn CaptchaSolver>,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        layout.validate()?;
        let markers = MarkerScanner::new(&layout)?;

        let config = Arc::new(config);
        let layout = Arc::new(layout);
        let metrics = Arc::new(PortalMetrics::new());
        let retry = RetryPolicy::from_config(&config);
        let permits = Arc::new(Semaphore::new(config.global_concurrency));

        let http = Arc::new(PortalHttp::new(
            config.clone(),
            layout.clone(),
            permits,
            metrics.clone(),
        )?);
        let sessions = Arc::new(SessionManager::new(
            http.clone(),
            retry.clone(),
            config.session_ttl,
            config.session_skew,
            metrics.clone(),
        ));
        let captcha = Arc::new(CaptchaHandler::new(
            solver,
            config.captcha_solver_timeout,
            metrics.clone(),
        ));
        let client = Arc::new(PortalClient::new(
            http.clone(),
            sessions.clone(),
            captcha.clone(),
            layout,
            markers,
            retry,
            metrics.clone(),
        ));

        let cache = Arc::new(LookupCache::new(
            config.lookup_cache_capacity,
            LevelTtls::from_config(&config),
        ));
        let lookup = Arc::new(CascadingLookupService::new(
            client.clone(),
            cache.clone(),
            metrics.clone(),
        ));
        let cause_lists =
            CauseListFetcher::new(client.clone(), lookup.clone(), config.complex_fanout_concurrency);
        let pdfs = PdfRetriever::new(
            client,
            lookup.clone(),
            config.max_pdf_bytes,
            config.complex_fanout_concurrency,
            metrics.clone(),
        );

        info!(
            base_url = %config.base_url,
            solver = captcha.solver_name(),
            global_concurrency = config.global_concurrency,
            fanout = config.complex_fanout_concurrency,
            "Cause list engine ready"
        );

        Ok(Self {
            http,
            sessions,
            cache,
            lookup,
            cause_lists,
            pdfs,
            metrics,
        })
    }

    /// Build an engine with the solver the config asks for: the OCR
    /// service when a URL is set, otherwise none.
    pub fn from_config(config: Config, layout: PortalLayout) -> Result<Self, SetupError> {
        let solver: Arc<dyn CaptchaSolver> = match &config.captcha_solver_url {
            Some(url) => Arc::new(OcrServiceSolver::new(url.clone(), config.captcha_solver_timeout)?),
            None => Arc::new(NoSolver),
        };
        Self::new(config, layout, solver)
    }

    pub async fn get_states(&self, cancel: &CancelToken) -> FetchResult<Vec<LocationNode>> {
        cancel.run(self.lookup.get_states()).await.into()
    }

    pub async fn get_districts(
        &self,
        state: &str,
        cancel: &CancelToken,
    ) -> FetchResult<Vec<LocationNode>> {
        cancel.run(self.lookup.get_districts(state)).await.into()
    }

    pub async fn get_complexes(
        &self,
        path: &DistrictPath,
        cancel: &CancelToken,
    ) -> FetchResult<Vec<LocationNode>> {
        cancel.run(self.lookup.get_complexes(path)).await.into()
    }

    pub async fn get_courts(
        &self,
        path: &ComplexPath,
        cancel: &CancelToken,
    ) -> FetchResult<Vec<LocationNode>> {
        cancel.run(self.lookup.get_courts(path)).await.into()
    }

    pub async fn fetch_cause_list(
        &self,
        court: &CourtPath,
        date: NaiveDate,
        cancel: &CancelToken,
    ) -> FetchResult<Vec<CauseListEntry>> {
        cancel.run(self.cause_lists.fetch_one(court, date)).await.into()
    }

    pub async fn fetch_cause_list_for_complex(
        &self,
        complex: &ComplexPath,
        date: NaiveDate,
        cancel: &CancelToken,
    ) -> FetchResult<Vec<CauseListEntry>> {
        let work = async { Ok(self.cause_lists.fetch_all_in_complex(complex, date).await) };
        match cancel.run(work).await {
            Ok(result) => result,
            Err(e) => FetchResult::Failure(e),
        }
    }

    pub async fn fetch_pdf(
        &self,
        court: &CourtPath,
        date: NaiveDate,
        cancel: &CancelToken,
    ) -> FetchResult<PdfDocument> {
        cancel.run(self.pdfs.fetch(court, date)).await.into()
    }

    /// Every court's PDF in a complex, under the same fan-out cap and
    /// partial-success rules as the complex cause list.
    pub async fn fetch_pdfs_for_complex(
        &self,
        complex: &ComplexPath,
        date: NaiveDate,
        cancel: &CancelToken,
    ) -> FetchResult<Vec<PdfDocument>> {
        let work = async { Ok(self.pdfs.fetch_all_in_complex(complex, date).await) };
        match cancel.run(work).await {
            Ok(result) => result,
            Err(e) => FetchResult::Failure(e),
        }
    }

    /// Forget every cached lookup list.
    pub fn invalidate_lookups(&self) {
        self.lookup.invalidate_all();
    }

    /// Force the next portal call to bootstrap a new session.
    pub fn invalidate_session(&self) {
        self.sessions.invalidate();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            metrics: self.metrics.snapshot(),
            circuit_breaker: self.http.breaker_snapshot(),
            cached_lookups: self.cache.len(),
            has_session: self.sessions.current().is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::error::ErrorKind;

    #[test]
    fn test_rejects_invalid_config() {
        let config = Config {
            global_concurrency: 0,
            ..Config::default()
        };
        let err = RequestOrchestrator::new(config, PortalLayout::default(), Arc::new(NoSolver))
            .err()
            .unwrap();
        assert!(matches!(err, SetupError::Config(ConfigError::Zero { .. })));
    }

    #[test]
    fn test_rejects_invalid_layout() {
        let layout = PortalLayout {
            csrf_field: String::new(),
            ..PortalLayout::default()
        };
        let err = RequestOrchestrator::new(Config::default(), layout, Arc::new(NoSolver))
            .err()
            .unwrap();
        assert!(matches!(err, SetupError::Layout(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_sends_nothing() {
        let engine = RequestOrchestrator::from_config(Config::default(), PortalLayout::default()).unwrap();
        let (handle, token) = crate::cancel::cancel_pair();
        handle.cancel();

        let result = engine.get_states(&token).await;
        assert_eq!(result, FetchResult::Failure(ErrorKind::Cancelled));
        assert_eq!(engine.metrics().requests_sent, 0);
        assert!(!engine.status().has_session);
    }
}
