// =============================================================================
// portal/layout.rs — WHERE THE PORTAL KEEPS ITS DOORS
// =============================================================================
//
// Everything we know about the portal's shape that we learned by squinting
// at browser dev tools: which path serves which dropdown, what the hidden
// CSRF input is called, what the CAPTCHA field is called, and which phrases
// in a response body mean "your session died" or "prove you are human".
//
// None of this is contractual. The portal changes it whenever it likes.
// Keeping it in one swappable struct means the next redesign is a config
// change, not a code change. Every field can be overridden from the
// environment (CAUSE_LIST_LAYOUT_*).
// =============================================================================

use std::env;

use chrono::format::{Item, StrftimeItems};
use thiserror::Error;

/// The portal endpoints this engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Landing page: hands out the session cookie and the CSRF token.
    Landing,
    States,
    Districts,
    Complexes,
    Courts,
    CauseList,
    Pdf,
    /// The image half of a CAPTCHA challenge.
    CaptchaImage,
}

impl Endpoint {
    pub fn name(self) -> &'static str {
        match self {
            Endpoint::Landing => "landing",
            Endpoint::States => "states",
            Endpoint::Districts => "districts",
            Endpoint::Complexes => "complexes",
            Endpoint::Courts => "courts",
            Endpoint::CauseList => "cause_list",
            Endpoint::Pdf => "pdf",
            Endpoint::CaptchaImage => "captcha_image",
        }
    }

    /// GET endpoints carry their fields in the query string; the AJAX
    /// endpoints are form POSTs.
    pub fn is_get(self) -> bool {
        matches!(self, Endpoint::Landing | Endpoint::Pdf | Endpoint::CaptchaImage)
    }

    /// Endpoints that answer with the JSON status envelope.
    pub fn expects_json(self) -> bool {
        matches!(
            self,
            Endpoint::States
                | Endpoint::Districts
                | Endpoint::Complexes
                | Endpoint::Courts
                | Endpoint::CauseList
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("layout field {0} must not be empty")]
    Empty(&'static str),
    #[error("invalid date format {0:?}")]
    BadDateFormat(String),
    #[error("could not build marker automaton: {0}")]
    Markers(String),
}

/// The portal adapter: paths, field names, and body markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalLayout {
    pub landing_path: String,
    pub states_path: String,
    pub districts_path: String,
    pub complexes_path: String,
    pub courts_path: String,
    pub cause_list_path: String,
    pub pdf_path: String,
    pub captcha_image_path: String,

    /// Hidden input on the landing page, echoed back on every call.
    pub csrf_field: String,
    /// Field the CAPTCHA answer is submitted in.
    pub captcha_field: String,
    pub state_field: String,
    pub district_field: String,
    pub complex_field: String,
    pub court_field: String,
    pub date_field: String,
    /// strftime format the portal expects dates in.
    pub date_format: String,
    /// Fields the portal wants on every AJAX call for no reason it has
    /// ever explained.
    pub static_fields: Vec<(String, String)>,

    pub session_expired_markers: Vec<String>,
    pub captcha_markers: Vec<String>,
    pub throttle_markers: Vec<String>,
}

impl Default for PortalLayout {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl PortalLayout {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, default: &str| {
            lookup(&format!("CAUSE_LIST_LAYOUT_{key}")).unwrap_or_else(|| default.to_string())
        };
        let list = |key: &str, defaults: &[&str]| -> Vec<String> {
            match lookup(&format!("CAUSE_LIST_LAYOUT_{key}")) {
                Some(raw) => raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                None => defaults.iter().map(|s| s.to_string()).collect(),
            }
        };

        PortalLayout {
            landing_path: get("LANDING_PATH", "/"),
            states_path: get("STATES_PATH", "/cause_list/fillState"),
            districts_path: get("DISTRICTS_PATH", "/casestatus/fillDistrict"),
            complexes_path: get("COMPLEXES_PATH", "/casestatus/fillcomplex"),
            courts_path: get("COURTS_PATH", "/cause_list/fillCauseList"),
            cause_list_path: get("CAUSE_LIST_PATH", "/cause_list/submitCauseList"),
            pdf_path: get("PDF_PATH", "/cause_list/causeListPdf"),
            captcha_image_path: get("CAPTCHA_IMAGE_PATH", "/vendor/securimage/securimage_show.php"),

            csrf_field: get("CSRF_FIELD", "app_token"),
            captcha_field: get("CAPTCHA_FIELD", "fcaptcha_code"),
            state_field: get("STATE_FIELD", "state_code"),
            district_field: get("DISTRICT_FIELD", "dist_code"),
            complex_field: get("COMPLEX_FIELD", "court_complex_code"),
            court_field: get("COURT_FIELD", "court_no"),
            date_field: get("DATE_FIELD", "causelist_date"),
            date_format: get("DATE_FORMAT", "%d-%m-%Y"),
            static_fields: vec![("ajax_req".to_string(), "true".to_string())],

            session_expired_markers: list(
                "SESSION_MARKERS",
                &["session expired", "session has expired", "invalid token"],
            ),
            captcha_markers: list(
                "CAPTCHA_MARKERS",
                &["captcha_image", "invalid captcha", "enter captcha"],
            ),
            throttle_markers: list(
                "THROTTLE_MARKERS",
                &["too many requests", "please try after some time"],
            ),
        }
    }

    pub fn path(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Landing => &self.landing_path,
            Endpoint::States => &self.states_path,
            Endpoint::Districts => &self.districts_path,
            Endpoint::Complexes => &self.complexes_path,
            Endpoint::Courts => &self.courts_path,
            Endpoint::CauseList => &self.cause_list_path,
            Endpoint::Pdf => &self.pdf_path,
            Endpoint::CaptchaImage => &self.captcha_image_path,
        }
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        let required = [
            ("landing_path", &self.landing_path),
            ("states_path", &self.states_path),
            ("districts_path", &self.districts_path),
            ("complexes_path", &self.complexes_path),
            ("courts_path", &self.courts_path),
            ("cause_list_path", &self.cause_list_path),
            ("pdf_path", &self.pdf_path),
            ("csrf_field", &self.csrf_field),
            ("captcha_field", &self.captcha_field),
            ("date_field", &self.date_field),
        ];
        if let Some(&(name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(LayoutError::Empty(name));
        }

        // chrono panics when Display-ing a date with a broken format string,
        // so catch it here instead of mid-request.
        if StrftimeItems::new(&self.date_format).any(|item| matches!(item, Item::Error)) {
            return Err(LayoutError::BadDateFormat(self.date_format.clone()));
        }

        Ok(())
    }
}
