//! A resilient client for the eCourts cause-list portal.
//!
//! Walks the portal's cascading selection (state → district → court
//! complex → court), fetches daily cause lists, and downloads the cause-list
//! PDF, while dealing with the portal's session cookies, CSRF tokens,
//! CAPTCHAs, throttling, and general unreliability.
//!
//! Start with [`RequestOrchestrator`]. Every public operation takes a
//! [`CancelToken`] and returns a [`FetchResult`].

pub mod cache;
pub mod cancel;
pub mod cause_list;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod lookup;
pub mod markers;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod pdf;
pub mod portal;
pub mod retry;
pub mod single_flight;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use config::{Config, ConfigError};
pub use error::{ErrorKind, NetworkFault, SetupError};
pub use metrics::MetricsSnapshot;
pub use models::{
    CauseListEntry, ComplexPath, CourtPath, DistrictPath, FetchResult, Level, LocationNode,
    PdfDocument,
};
pub use orchestrator::{EngineStatus, RequestOrchestrator};
pub use portal::{
    CaptchaChallenge, CaptchaSolution, CaptchaSolver, NoSolver, OcrServiceSolver, OperatorPrompt,
    OperatorSolver, PortalLayout,
};
