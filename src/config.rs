// =============================================================================
// config.rs — THE KNOBS
// =============================================================================
//
// Every tunable in the engine lives here. Timeouts, retry budgets, cache
// lifetimes, concurrency ceilings, circuit breaker thresholds. All of them
// can be overridden through CAUSE_LIST_* environment variables (or a .env
// file), and all of them have defaults chosen by the time-honoured method
// of "what will the eCourts servers tolerate before they start showing us
// CAPTCHAs".
//
// Portal-shape settings (endpoint paths, field names, markers) are not here.
// They change when the portal changes, not when the operator changes, so
// they live in portal::layout.
// =============================================================================

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Reasons a configuration is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid portal base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("session skew ({skew_secs}s) must be shorter than the session TTL ({ttl_secs}s)")]
    SkewExceedsTtl { skew_secs: u64, ttl_secs: u64 },
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // PORTAL
    // =========================================================================

    /// Root of the portal, without trailing slash.
    /// Default: https://services.ecourts.gov.in/ecourtindia_v6
    pub base_url: String,

    /// We say who we are. Government sysadmins have enough mysteries.
    pub user_agent: String,

    /// Upper bound on a single HTTP exchange. Exceeding it is a
    /// `Network` timeout and goes through the normal retry policy.
    pub request_timeout: Duration,

    // =========================================================================
    // SESSION
    // The portal never tells us how long a session lives, so we guess
    // conservatively and let SessionExpired handling catch the rest.
    // =========================================================================

    /// Assumed session lifetime from bootstrap. Default: 20 minutes.
    pub session_ttl: Duration,

    /// A session is refreshed this long before its assumed expiry.
    /// Default: 30 seconds.
    pub session_skew: Duration,

    // =========================================================================
    // RETRY / BACKOFF
    // =========================================================================

    /// Total attempts per request, first try included. Default: 3.
    pub retry_max_attempts: u32,

    /// First backoff delay; doubles per attempt. Default: 500ms.
    pub retry_base_delay: Duration,

    /// Ceiling on a single backoff delay. Default: 8s.
    pub retry_max_delay: Duration,

    /// Ceiling on the sum of all backoff delays for one request. Default: 30s.
    pub retry_max_total_wait: Duration,

    // =========================================================================
    // LOOKUP CACHE
    // States and districts basically never change. Complexes and courts
    // change rarely, but "rarely" is doing some work there.
    // =========================================================================

    pub states_ttl: Duration,
    pub districts_ttl: Duration,
    pub complexes_ttl: Duration,
    pub courts_ttl: Duration,

    /// Maximum number of cached lookup lists. Default: 1024.
    pub lookup_cache_capacity: usize,

    // =========================================================================
    // CONCURRENCY
    // =========================================================================

    /// Ceiling on simultaneous outbound portal calls, process-wide.
    /// Default: 8.
    pub global_concurrency: usize,

    /// Ceiling on simultaneous per-court fetches inside one complex-wide
    /// cause-list fetch. Default: 4. More than that and the portal starts
    /// asking us to prove we are human.
    pub complex_fanout_concurrency: usize,

    // =========================================================================
    // PDF
    // =========================================================================

    /// Largest PDF we are willing to hold in memory. Default: 20 MiB.
    pub max_pdf_bytes: usize,

    // =========================================================================
    // CAPTCHA
    // =========================================================================

    /// External OCR/solver service. When unset, no automatic solver is
    /// wired and CAPTCHAs are terminal unless an operator solver is injected.
    pub captcha_solver_url: Option<String>,

    /// How long a solver (service or human) gets to answer. Default: 60s.
    pub captcha_solver_timeout: Duration,

    // =========================================================================
    // CIRCUIT BREAKER
    // =========================================================================

    /// Consecutive transport failures before the breaker trips. Default: 5.
    pub circuit_breaker_failure_threshold: u32,

    /// How long the breaker stays open. Default: 30 seconds.
    pub circuit_breaker_reset_timeout: Duration,

    /// Successes in half-open before closing again. Default: 1.
    pub circuit_breaker_success_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    /// Load configuration from the process environment (and `.env`, if
    /// present) with defaults for everything that is not set.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Unparseable
    /// values fall back to the default, same as missing ones.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let secs = |key: &str, default: u64| {
            Duration::from_secs(get(key, &default.to_string()).parse().unwrap_or(default))
        };
        let millis = |key: &str, default: u64| {
            Duration::from_millis(get(key, &default.to_string()).parse().unwrap_or(default))
        };

        Config {
            base_url: get("CAUSE_LIST_BASE_URL", "https://services.ecourts.gov.in/ecourtindia_v6")
                .trim_end_matches('/')
                .to_string(),
            user_agent: get(
                "CAUSE_LIST_USER_AGENT",
                "CauseListEngine/0.1 (cause-list-research; polite-scraper)",
            ),
            request_timeout: secs("CAUSE_LIST_REQUEST_TIMEOUT_SECS", 15),

            session_ttl: secs("CAUSE_LIST_SESSION_TTL_SECS", 20 * 60),
            session_skew: secs("CAUSE_LIST_SESSION_SKEW_SECS", 30),

            retry_max_attempts: get("CAUSE_LIST_RETRY_MAX_ATTEMPTS", "3").parse().unwrap_or(3),
            retry_base_delay: millis("CAUSE_LIST_RETRY_BASE_DELAY_MS", 500),
            retry_max_delay: millis("CAUSE_LIST_RETRY_MAX_DELAY_MS", 8_000),
            retry_max_total_wait: millis("CAUSE_LIST_RETRY_MAX_TOTAL_WAIT_MS", 30_000),

            states_ttl: secs("CAUSE_LIST_STATES_TTL_SECS", 24 * 60 * 60),
            districts_ttl: secs("CAUSE_LIST_DISTRICTS_TTL_SECS", 24 * 60 * 60),
            complexes_ttl: secs("CAUSE_LIST_COMPLEXES_TTL_SECS", 60 * 60),
            courts_ttl: secs("CAUSE_LIST_COURTS_TTL_SECS", 60 * 60),
            lookup_cache_capacity: get("CAUSE_LIST_LOOKUP_CACHE_CAPACITY", "1024")
                .parse()
                .unwrap_or(1024),

            global_concurrency: get("CAUSE_LIST_GLOBAL_CONCURRENCY", "8").parse().unwrap_or(8),
            complex_fanout_concurrency: get("CAUSE_LIST_COMPLEX_FANOUT", "4").parse().unwrap_or(4),

            max_pdf_bytes: get("CAUSE_LIST_MAX_PDF_BYTES", "20971520")
                .parse()
                .unwrap_or(20 * 1024 * 1024),

            captcha_solver_url: lookup("CAUSE_LIST_CAPTCHA_SOLVER_URL").filter(|url| !url.is_empty()),
            captcha_solver_timeout: secs("CAUSE_LIST_CAPTCHA_SOLVER_TIMEOUT_SECS", 60),

            circuit_breaker_failure_threshold: get("CAUSE_LIST_CB_FAILURE_THRESHOLD", "5")
                .parse()
                .unwrap_or(5),
            circuit_breaker_reset_timeout: secs("CAUSE_LIST_CB_RESET_TIMEOUT_SECS", 30),
            circuit_breaker_success_threshold: get("CAUSE_LIST_CB_SUCCESS_THRESHOLD", "1")
                .parse()
                .unwrap_or(1),
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        let counts = [
            ("retry_max_attempts", self.retry_max_attempts as usize),
            ("lookup_cache_capacity", self.lookup_cache_capacity),
            ("global_concurrency", self.global_concurrency),
            ("complex_fanout_concurrency", self.complex_fanout_concurrency),
            ("max_pdf_bytes", self.max_pdf_bytes),
            ("circuit_breaker_failure_threshold", self.circuit_breaker_failure_threshold as usize),
        ];
        if let Some(&(name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { name });
        }

        if self.session_skew >= self.session_ttl {
            return Err(ConfigError::SkewExceedsTtl {
                skew_secs: self.session_skew.as_secs(),
                ttl_secs: self.session_ttl.as_secs(),
            });
        }

        Ok(())
    }

    /// Build the URL for a portal path such as `/cause_list/fillState`.
    pub fn portal_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}
