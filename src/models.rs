// =============================================================================
// models.rs — THE SHAPES OF A COURT'S DAY
// =============================================================================
//
// States contain districts. Districts contain court complexes. Complexes
// contain courts. Courts publish a cause list every working day, and
// sometimes a PDF of it. Everything in this file is a value: built once,
// handed around, never mutated.
//
// The bottom half of the file holds the wire types: what the portal sends
// us before we trust it. They are deliberately strict. A missing field is
// a malformed response, not an invitation to guess.
// =============================================================================

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// The four levels of the portal's location hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    State,
    District,
    Complex,
    Court,
}

impl Level {
    /// The level a selection at this level hangs under.
    pub fn parent(self) -> Option<Level> {
        match self {
            Level::State => None,
            Level::District => Some(Level::State),
            Level::Complex => Some(Level::District),
            Level::Court => Some(Level::Complex),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::State => write!(f, "state"),
            Level::District => write!(f, "district"),
            Level::Complex => write!(f, "court complex"),
            Level::Court => write!(f, "court"),
        }
    }
}

/// One entry in a cascading dropdown. `code` is portal-assigned and only
/// unique among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationNode {
    pub code: String,
    pub name: String,
    pub level: Level,
}

impl LocationNode {
    pub fn new(code: impl Into<String>, name: impl Into<String>, level: Level) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            level,
        }
    }
}

/// A selected state + district.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistrictPath {
    pub state: String,
    pub district: String,
}

impl DistrictPath {
    pub fn new(state: impl Into<String>, district: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            district: district.into(),
        }
    }

    pub fn complex(&self, complex: impl Into<String>) -> ComplexPath {
        ComplexPath {
            state: self.state.clone(),
            district: self.district.clone(),
            complex: complex.into(),
        }
    }
}

/// A selected state + district + court complex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComplexPath {
    pub state: String,
    pub district: String,
    pub complex: String,
}

impl ComplexPath {
    pub fn new(
        state: impl Into<String>,
        district: impl Into<String>,
        complex: impl Into<String>,
    ) -> Self {
        Self {
            state: state.into(),
            district: district.into(),
            complex: complex.into(),
        }
    }

    pub fn district_path(&self) -> DistrictPath {
        DistrictPath::new(self.state.clone(), self.district.clone())
    }

    pub fn court(&self, court: impl Into<String>) -> CourtPath {
        CourtPath {
            state: self.state.clone(),
            district: self.district.clone(),
            complex: self.complex.clone(),
            court: court.into(),
        }
    }
}

/// A fully selected court. Every cause-list and PDF request needs the
/// whole path because the portal wants every parent code on every call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourtPath {
    pub state: String,
    pub district: String,
    pub complex: String,
    pub court: String,
}

impl CourtPath {
    pub fn new(
        state: impl Into<String>,
        district: impl Into<String>,
        complex: impl Into<String>,
        court: impl Into<String>,
    ) -> Self {
        Self {
            state: state.into(),
            district: district.into(),
            complex: complex.into(),
            court: court.into(),
        }
    }

    pub fn complex_path(&self) -> ComplexPath {
        ComplexPath::new(self.state.clone(), self.district.clone(), self.complex.clone())
    }
}

/// A single listed case on a court's cause list for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CauseListEntry {
    /// 1-based position on the list. Strictly increasing within one
    /// (court, date) result.
    pub serial_number: u32,
    pub case_number: String,
    /// Code of the court this entry came from.
    pub court_code: String,
    pub court_name: String,
    pub listing_date: NaiveDate,
    /// Opaque locator the portal hands out for the listing. Not a URL we
    /// promise to be able to open.
    pub pdf_ref: Option<String>,
}

/// A downloaded cause-list PDF. Created per request, never cached.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct PdfDocument {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub suggested_file_name: String,
    pub size_bytes: usize,
}

impl fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfDocument")
            .field("content_type", &self.content_type)
            .field("suggested_file_name", &self.suggested_file_name)
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

/// The result contract every public operation returns.
///
/// `Success(vec![])` means "the portal genuinely had nothing". A failed
/// fetch is never dressed up as an empty success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FetchResult<T> {
    Success(T),
    /// Fan-out operations where some keys failed. Carries what did succeed
    /// plus one `(key, error)` pair per failed key.
    PartialSuccess(T, Vec<(String, ErrorKind)>),
    Failure(ErrorKind),
}

impl<T> FetchResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FetchResult::Failure(_))
    }

    /// The payload, if any. Present for both full and partial success.
    pub fn payload(&self) -> Option<&T> {
        match self {
            FetchResult::Success(value) | FetchResult::PartialSuccess(value, _) => Some(value),
            FetchResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorKind> {
        match self {
            FetchResult::Failure(err) => Some(err),
            _ => None,
        }
    }

    /// Per-key failures of a partial success. Empty otherwise.
    pub fn partial_errors(&self) -> &[(String, ErrorKind)] {
        match self {
            FetchResult::PartialSuccess(_, errors) => errors,
            _ => &[],
        }
    }

    /// Collapse into a plain `Result`. Partial errors are dropped, so only
    /// use this for single-key operations that never produce them.
    pub fn into_result(self) -> Result<T, ErrorKind> {
        match self {
            FetchResult::Success(value) | FetchResult::PartialSuccess(value, _) => Ok(value),
            FetchResult::Failure(err) => Err(err),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchResult<U> {
        match self {
            FetchResult::Success(value) => FetchResult::Success(f(value)),
            FetchResult::PartialSuccess(value, errors) => FetchResult::PartialSuccess(f(value), errors),
            FetchResult::Failure(err) => FetchResult::Failure(err),
        }
    }
}

impl<T> From<Result<T, ErrorKind>> for FetchResult<T> {
    fn from(result: Result<T, ErrorKind>) -> Self {
        match result {
            Ok(value) => FetchResult::Success(value),
            Err(err) => FetchResult::Failure(err),
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================
// What the portal sends back from its AJAX endpoints. The envelope's
// "status" field is checked by the client before these are decoded.
// =============================================================================

/// `{"status":"ok","items":[{"code":"6","name":"Delhi"}, ...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct LookupEnvelope {
    pub items: Vec<WireNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireNode {
    pub code: String,
    pub name: String,
}

/// `{"status":"ok","entries":[{"sr_no":1,"case_no":"CRL/1234/2025","pdf_ref":"..."}]}`
#[derive(Debug, Clone, Deserialize)]
pub struct CauseListEnvelope {
    pub entries: Vec<WireEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireEntry {
    pub sr_no: u32,
    pub case_no: String,
    #[serde(default)]
    pub pdf_ref: Option<String>,
}
