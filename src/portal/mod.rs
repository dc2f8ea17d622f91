//! Everything that talks to the eCourts portal directly.
//!
//! - [`http`]: one raw exchange, under the global concurrency ceiling and
//!   the circuit breaker
//! - [`session`]: cookie + CSRF token lifecycle
//! - [`captcha`]: pluggable CAPTCHA solving
//! - [`client`]: classification, retries, and the CAPTCHA round-trip
//! - [`layout`]: paths, field names, and body markers, all overridable

pub mod captcha;
pub mod client;
pub mod http;
pub mod layout;
pub mod session;

pub use captcha::{
    CaptchaChallenge, CaptchaHandler, CaptchaSolution, CaptchaSolver, NoSolver, OcrServiceSolver,
    OperatorPrompt, OperatorSolver,
};
pub use client::{PortalClient, PortalRequest, PortalResponse};
pub use http::PortalHttp;
pub use layout::{Endpoint, LayoutError, PortalLayout};
pub use session::{CookieJar, Session, SessionManager};
