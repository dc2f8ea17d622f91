// =============================================================================
// portal/session.rs — GETTING PAST THE FRONT DOOR
// =============================================================================
//
// Every portal call needs two things from the landing page: the session
// cookie (PHPSESSID and friends) and the hidden CSRF token. Both expire
// quietly. The portal does not say "your session expired" with a 401 most
// of the time; it just answers with a page that says so.
//
// The manager keeps one live session at a time. When it goes stale, the
// first caller to notice bootstraps a new one and every concurrent caller
// waits for that same bootstrap. A request that finds its session expired
// mid-flight gets exactly one refresh and one retry. A second expiry is
// the caller's problem.
// =============================================================================

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, NetworkFault, PortalResult};
use crate::metrics::PortalMetrics;
use crate::portal::http::{OutboundRequest, PortalHttp, RawResponse};
use crate::portal::layout::Endpoint;
use crate::retry::RetryPolicy;
use crate::single_flight::SingleFlight;

/// Cookies the portal handed us, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `Set-Cookie` header values into the jar. Attributes (Path,
    /// HttpOnly, ...) are ignored. An empty value removes the cookie.
    pub fn absorb<'a>(&mut self, set_cookie_headers: impl IntoIterator<Item = &'a str>) {
        for header in set_cookie_headers {
            let pair = header.split(';').next().unwrap_or_default();
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            let value = value.trim().trim_matches('"');
            if name.is_empty() {
                continue;
            }
            if value.is_empty() {
                self.cookies.remove(name);
            } else {
                self.cookies.insert(name.to_string(), value.to_string());
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Value for a `Cookie` request header, or `None` if the jar is empty.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// One authenticated portal session. Immutable once issued; a refresh
/// replaces the whole thing.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub cookies: CookieJar,
    pub csrf_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Still usable at `now`, with `skew` shaved off the end so we never
    /// hand out a session that dies on the wire.
    pub fn is_fresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero());
        now < self.expires_at - skew
    }
}

/// Owns the current session and serializes its renewal.
pub struct SessionManager {
    http: Arc<PortalHttp>,
    current: Arc<RwLock<Option<Arc<Session>>>>,
    flight: SingleFlight<(), Arc<Session>>,
    retry: RetryPolicy,
    ttl: Duration,
    skew: Duration,
    metrics: Arc<PortalMetrics>,
}

impl SessionManager {
    pub fn new(
        http: Arc<PortalHttp>,
        retry: RetryPolicy,
        ttl: Duration,
        skew: Duration,
        metrics: Arc<PortalMetrics>,
    ) -> Self {
        Self {
            http,
            current: Arc::new(RwLock::new(None)),
            flight: SingleFlight::new(),
            retry,
            ttl,
            skew,
            metrics,
        }
    }

    /// A valid session, bootstrapping one if there is none or the current
    /// one is about to expire. Concurrent callers share one bootstrap.
    pub async fn acquire(&self) -> PortalResult<Arc<Session>> {
        let cached = self.current.read().clone();
        if let Some(session) = cached {
            if session.is_fresh(Utc::now(), self.skew) {
                return Ok(session);
            }
            debug!(session_id = %session.id, "Session near expiry, renewing");
        }
        self.renew().await
    }

    /// Join or start the shared bootstrap.
    async fn renew(&self) -> PortalResult<Arc<Session>> {
        let http = self.http.clone();
        let slot = self.current.clone();
        let retry = self.retry.clone();
        let ttl = self.ttl;
        let skew = self.skew;
        let metrics = self.metrics.clone();

        let (result, joined) = self
            .flight
            .run((), move || {
                async move {
                    // A bootstrap that settled after our caller looked at
                    // the slot may already have left a fresh session.
                    let existing = slot.read().clone();
                    if let Some(session) = existing.filter(|s| s.is_fresh(Utc::now(), skew)) {
                        return Ok(session);
                    }
                    let session = Arc::new(bootstrap(&http, &retry, ttl, &metrics).await?);
                    *slot.write() = Some(session.clone());
                    Ok(session)
                }
                .boxed()
            })
            .await;

        if joined {
            self.metrics.increment_joins();
        }
        result
    }

    /// Drop the current session unconditionally.
    pub fn invalidate(&self) {
        if let Some(old) = self.current.write().take() {
            info!(session_id = %old.id, "Session invalidated");
        }
    }

    /// Drop `stale` only if it is still the current session. A concurrent
    /// caller may already have replaced it with a fresh one.
    fn invalidate_if_current(&self, stale: &Session) {
        let mut current = self.current.write();
        if current.as_ref().is_some_and(|s| s.id == stale.id) {
            *current = None;
        }
    }

    /// The session currently held, if any, without bootstrapping.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.read().clone()
    }

    /// Run `call` with a session. If it fails with `SessionExpired`, refresh
    /// once and run it again. A second expiry propagates.
    pub async fn with_session<T, F, Fut>(&self, call: F) -> PortalResult<T>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = PortalResult<T>>,
    {
        let session = self.acquire().await?;
        match call(session.clone()).await {
            Err(ErrorKind::SessionExpired) => {
                warn!(session_id = %session.id, "Portal says session expired, refreshing once");
                self.invalidate_if_current(&session);
                self.metrics.increment_refreshes();
                let fresh = self.acquire().await?;
                call(fresh).await
            }
            other => other,
        }
    }
}

/// Fetch the landing page and build a session from it. Transient failures
/// are retried with the same policy as every other portal call.
async fn bootstrap(
    http: &PortalHttp,
    retry: &RetryPolicy,
    ttl: Duration,
    metrics: &PortalMetrics,
) -> PortalResult<Session> {
    let mut attempt = 0u32;
    let mut waited = Duration::ZERO;

    loop {
        attempt += 1;
        let error = match try_bootstrap(http, ttl).await {
            Ok(session) => {
                metrics.increment_bootstraps();
                info!(
                    session_id = %session.id,
                    cookies = session.cookies.len(),
                    expires_at = %session.expires_at,
                    "Portal session established"
                );
                return Ok(session);
            }
            Err(e) => e,
        };

        match retry.next_delay(attempt, waited, &error) {
            Some(delay) => {
                metrics.increment_retries();
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Session bootstrap failed, retrying"
                );
                tokio::time::sleep(delay).await;
                waited += delay;
            }
            None => {
                metrics.increment_failures();
                warn!(attempt, error = %error, "Session bootstrap gave up");
                return Err(error);
            }
        }
    }
}

async fn try_bootstrap(http: &PortalHttp, ttl: Duration) -> PortalResult<Session> {
    let raw = http
        .send(OutboundRequest {
            endpoint: Endpoint::Landing,
            fields: &[],
            cookies: None,
        })
        .await?;

    check_landing_status(&raw)?;

    let layout = http.layout();
    let body = String::from_utf8_lossy(&raw.body);
    let csrf_token = extract_hidden_input(&body, &layout.csrf_field).ok_or_else(|| {
        ErrorKind::malformed(
            Endpoint::Landing.name(),
            format!("hidden input {:?} not found on landing page", layout.csrf_field),
        )
    })?;

    let mut cookies = CookieJar::new();
    cookies.absorb(raw.set_cookies.iter().map(String::as_str));
    if cookies.is_empty() {
        warn!("Landing page set no cookies, continuing with token only");
    }

    let issued_at = Utc::now();
    let lifetime = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(20));
    Ok(Session {
        id: Uuid::new_v4(),
        cookies,
        csrf_token,
        issued_at,
        expires_at: issued_at + lifetime,
    })
}

fn check_landing_status(raw: &RawResponse) -> PortalResult<()> {
    match raw.status {
        s if (200..300).contains(&s) => Ok(()),
        429 => Err(ErrorKind::RateLimited {
            retry_after: raw.retry_after.unwrap_or_default(),
        }),
        s if s >= 500 => Err(ErrorKind::network(
            NetworkFault::ServerError(s),
            format!("landing page answered {s}"),
        )),
        s => Err(ErrorKind::Unauthorized {
            status: s,
            reason: format!("landing page answered {s}"),
        }),
    }
}

/// Find `<input ... name="{field}" ... value="...">` and return the value.
/// Attribute order and quote style are not assumed.
pub fn extract_hidden_input(html: &str, field: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let mut cursor = 0;

    while let Some(offset) = lower[cursor..].find("<input") {
        let start = cursor + offset;
        let end = lower[start..].find('>').map(|e| start + e)?;
        let tag = &html[start..end];

        if attribute(tag, "name").as_deref() == Some(field) {
            if let Some(value) = attribute(tag, "value").filter(|v| !v.is_empty()) {
                return Some(value);
            }
        }
        cursor = end;
    }
    None
}

fn attribute(tag: &str, name: &str) -> Option<String> {
    let lower = tag.to_ascii_lowercase();
    let mut search = 0;

    while let Some(offset) = lower[search..].find(name) {
        let at = search + offset;
        search = at + name.len();

        // Must be a whole attribute name, not the tail of another one.
        let preceded_ok = at == 0 || lower.as_bytes()[at - 1].is_ascii_whitespace();
        let rest = tag[search..].trim_start();
        if !preceded_ok || !rest.starts_with('=') {
            continue;
        }

        let rest = rest[1..].trim_start();
        let quote = rest.chars().next()?;
        return if quote == '"' || quote == '\'' {
            let inner = &rest[1..];
            inner.find(quote).map(|close| inner[..close].to_string())
        } else {
            let close = rest
                .find(|c: char| c.is_ascii_whitespace() || c == '/')
                .unwrap_or(rest.len());
            Some(rest[..close].to_string())
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_hidden_input_double_quotes() {
        let html = r#"<form><input type="hidden" name="app_token" value="abc123"></form>"#;
        assert_eq!(extract_hidden_input(html, "app_token"), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_hidden_input_any_attribute_order() {
        let html = r#"<INPUT value='zz9' id=tok name='app_token' type=hidden />"#;
        assert_eq!(extract_hidden_input(html, "app_token"), Some("zz9".to_string()));
    }

    #[test]
    fn test_extract_hidden_input_skips_other_fields() {
        let html = r#"<input name="data_app_token" value="wrong"><input name="other" value="x">"#;
        assert_eq!(extract_hidden_input(html, "app_token"), None);
    }

    #[test]
    fn test_cookie_jar_absorbs_set_cookie() {
        let mut jar = CookieJar::new();
        jar.absorb([
            "PHPSESSID=s3ss10n; path=/; HttpOnly",
            "JSESSION=\"quoted\"; Secure",
            "garbage-without-equals",
        ]);
        assert_eq!(jar.get("PHPSESSID"), Some("s3ss10n"));
        assert_eq!(jar.get("JSESSION"), Some("quoted"));
        assert_eq!(jar.len(), 2);
        assert_eq!(
            jar.header_value().as_deref(),
            Some("JSESSION=quoted; PHPSESSID=s3ss10n")
        );

        jar.absorb(["PHPSESSID=; Max-Age=0"]);
        assert_eq!(jar.get("PHPSESSID"), None);
    }

    #[test]
    fn test_empty_jar_has_no_header() {
        assert_eq!(CookieJar::new().header_value(), None);
    }

    #[test]
    fn test_session_freshness_respects_skew() {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            cookies: CookieJar::new(),
            csrf_token: "t".to_string(),
            issued_at: now,
            expires_at: now + chrono::Duration::seconds(20),
        };
        assert!(session.is_fresh(now, Duration::from_secs(10)));
        assert!(!session.is_fresh(now, Duration::from_secs(30)));
    }

    #[test]
    fn test_landing_status_classification() {
        let raw = |status| RawResponse {
            endpoint: Endpoint::Landing,
            status,
            content_type: Some("text/html".to_string()),
            retry_after: None,
            set_cookies: vec![],
            body: vec![],
        };
        assert!(check_landing_status(&raw(200)).is_ok());
        assert!(matches!(
            check_landing_status(&raw(503)),
            Err(ErrorKind::Network { fault: NetworkFault::ServerError(503), .. })
        ));
        assert!(matches!(
            check_landing_status(&raw(429)),
            Err(ErrorKind::RateLimited { .. })
        ));
        assert!(matches!(
            check_landing_status(&raw(403)),
            Err(ErrorKind::Unauthorized { status: 403, .. })
        ));
    }

    fn manager() -> (SessionManager, Arc<PortalMetrics>) {
        use crate::config::Config;
        use crate::portal::layout::PortalLayout;

        let config = Config {
            // Nothing listens on the discard port.
            base_url: "http://127.0.0.1:9".to_string(),
            ..Config::default()
        };
        let metrics = Arc::new(PortalMetrics::new());
        let http = PortalHttp::new(
            Arc::new(config),
            Arc::new(PortalLayout::default()),
            Arc::new(tokio::sync::Semaphore::new(1)),
            metrics.clone(),
        )
        .unwrap();
        let manager = SessionManager::new(
            Arc::new(http),
            RetryPolicy::default(),
            Duration::from_secs(600),
            Duration::from_secs(30),
            metrics.clone(),
        );
        (manager, metrics)
    }

    #[tokio::test]
    async fn test_renew_reuses_session_left_by_a_settled_bootstrap() {
        let (manager, metrics) = manager();
        let now = Utc::now();
        let fresh = Arc::new(Session {
            id: Uuid::new_v4(),
            cookies: CookieJar::new(),
            csrf_token: "tok".to_string(),
            issued_at: now,
            expires_at: now + chrono::Duration::minutes(10),
        });
        *manager.current.write() = Some(fresh.clone());

        // As if our caller had seen a stale slot just before it was refilled.
        let session = manager.renew().await.unwrap();
        assert_eq!(session.id, fresh.id);
        assert_eq!(metrics.snapshot().session_bootstraps, 0);
        assert_eq!(metrics.snapshot().requests_sent, 0);
    }
}
