//! A fake eCourts portal on wiremock, seeded with the Delhi slice of the
//! hierarchy: Delhi → New Delhi → Patiala House Courts Complex → five courts.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cause_list_engine::portal::captcha::CaptchaSolver;
use cause_list_engine::{Config, NoSolver, PortalLayout, RequestOrchestrator};
use chrono::NaiveDate;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const TOKEN: &str = "tok-abc123";
pub const SESSION_COOKIE: &str = "PHPSESSID=abc123";

pub const STATES_PATH: &str = "/cause_list/fillState";
pub const DISTRICTS_PATH: &str = "/casestatus/fillDistrict";
pub const COMPLEXES_PATH: &str = "/casestatus/fillcomplex";
pub const COURTS_PATH: &str = "/cause_list/fillCauseList";
pub const CAUSE_LIST_PATH: &str = "/cause_list/submitCauseList";
pub const PDF_PATH: &str = "/cause_list/causeListPdf";
pub const CAPTCHA_IMAGE_PATH: &str = "/vendor/securimage/securimage_show.php";

pub const STATES: &[(&str, &str)] = &[
    ("1", "Andhra Pradesh"),
    ("4", "Bihar"),
    ("6", "Delhi"),
    ("15", "Maharashtra"),
    ("24", "Tamil Nadu"),
];

pub const DELHI_DISTRICTS: &[(&str, &str)] = &[
    ("6-1", "Central Delhi"),
    ("6-2", "East Delhi"),
    ("6-3", "New Delhi"),
    ("6-4", "North Delhi"),
    ("6-5", "South Delhi"),
    ("6-6", "West Delhi"),
];

pub const NEW_DELHI_COMPLEXES: &[(&str, &str)] = &[
    ("6-3-1", "Patiala House Courts Complex"),
    ("6-3-2", "Tis Hazari Courts Complex"),
    ("6-3-3", "Saket Courts Complex"),
];

pub const PATIALA_HOUSE_COURTS: &[(&str, &str)] = &[
    ("6-3-1-1", "Court No. 1 - District Judge"),
    ("6-3-1-2", "Court No. 2 - Additional District Judge"),
    ("6-3-1-3", "Court No. 3 - Civil Judge"),
    ("6-3-1-4", "Court No. 4 - Metropolitan Magistrate"),
    ("6-3-1-5", "Court No. 5 - Special Court"),
];

pub fn listing_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

/// Defaults with the portal pointed at `server` and retries shrunk to
/// milliseconds.
pub fn config(server: &MockServer) -> Config {
    Config {
        base_url: server.uri(),
        request_timeout: Duration::from_secs(5),
        retry_base_delay: Duration::from_millis(10),
        retry_max_delay: Duration::from_millis(50),
        retry_max_total_wait: Duration::from_secs(2),
        ..Config::default()
    }
}

pub fn engine(server: &MockServer) -> RequestOrchestrator {
    engine_with(config(server), Arc::new(NoSolver))
}

pub fn engine_with(config: Config, solver: Arc<dyn CaptchaSolver>) -> RequestOrchestrator {
    RequestOrchestrator::new(config, PortalLayout::default(), solver).unwrap()
}

pub fn landing_page() -> ResponseTemplate {
    let html = format!(
        r#"<html><body><form id="frm">
        <input type="hidden" name="{}" value="{TOKEN}">
        <select id="sess_state_code"></select>
        </form></body></html>"#,
        "app_token"
    );
    ResponseTemplate::new(200)
        .insert_header("set-cookie", format!("{SESSION_COOKIE}; path=/; HttpOnly"))
        .set_body_raw(html, "text/html; charset=UTF-8")
}

pub fn lookup_body(items: &[(&str, &str)]) -> Value {
    let items: Vec<Value> = items
        .iter()
        .map(|(code, name)| json!({ "code": code, "name": name }))
        .collect();
    json!({ "status": "ok", "items": items })
}

/// `count` entries with serials 1..=count and case numbers like
/// `CRL/1001/2025`.
pub fn cause_list_body(count: u32) -> Value {
    const TYPES: [&str; 5] = ["CRL", "CIV", "FAM", "ARB", "COM"];
    let entries: Vec<Value> = (1..=count)
        .map(|sr| {
            json!({
                "sr_no": sr,
                "case_no": format!("{}/{}/2025", TYPES[(sr as usize - 1) % TYPES.len()], 1000 + sr),
                "pdf_ref": format!("ref-{sr}"),
            })
        })
        .collect();
    json!({ "status": "ok", "entries": entries })
}

pub fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=UTF-8")
}

pub async fn mount_landing(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(landing_page())
        .mount(server)
        .await;
}

pub async fn mount_states(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(STATES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(lookup_body(STATES)))
        .mount(server)
        .await;
}

pub async fn mount_districts(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(DISTRICTS_PATH))
        .and(body_string_contains("state_code=6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lookup_body(DELHI_DISTRICTS)))
        .mount(server)
        .await;
}

pub async fn mount_complexes(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(COMPLEXES_PATH))
        .and(body_string_contains("dist_code=6-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lookup_body(NEW_DELHI_COMPLEXES)))
        .mount(server)
        .await;
}

pub async fn mount_courts(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(COURTS_PATH))
        .and(body_string_contains("court_complex_code=6-3-1&"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lookup_body(PATIALA_HOUSE_COURTS)))
        .mount(server)
        .await;
}

/// Landing page plus every lookup level down to the Patiala House courts.
pub async fn portal() -> MockServer {
    let server = MockServer::start().await;
    mount_landing(&server).await;
    mount_states(&server).await;
    mount_districts(&server).await;
    mount_complexes(&server).await;
    mount_courts(&server).await;
    server
}

/// Answers with `body` after `delay` and records the most requests it was
/// holding at once.
#[derive(Clone)]
pub struct InFlightGauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay: Duration,
    body: Value,
}

impl InFlightGauge {
    pub fn new(delay: Duration, body: Value) -> Self {
        Self {
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            delay,
            body,
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Respond for InFlightGauge {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        // Release the slot a little before the delayed response goes out,
        // so a follow-up request is never counted against it.
        let current = self.current.clone();
        let hold = self.delay.saturating_sub(Duration::from_millis(20));
        std::thread::spawn(move || {
            std::thread::sleep(hold);
            current.fetch_sub(1, Ordering::SeqCst);
        });

        ResponseTemplate::new(200)
            .set_body_json(self.body.clone())
            .set_delay(self.delay)
    }
}
