// =============================================================================
// markers.rs — READING THE PORTAL'S BODY LANGUAGE
// =============================================================================
//
// The portal rarely tells us what went wrong with a status code. It answers
// 200 OK and then, somewhere in the body, says "Session Expired" or slips
// in a CAPTCHA image or asks us to "please try after some time".
//
// So we read the body. All configured markers (session, captcha, throttle)
// are compiled into a single Aho-Corasick automaton and matched in one
// case-insensitive pass. Binary bodies (PDFs) are never scanned: a PDF that
// happens to contain the words "enter captcha" is still a PDF.
// =============================================================================

use aho_corasick::AhoCorasick;
use tracing::debug;

use crate::portal::layout::{LayoutError, PortalLayout};

/// Which family a matched marker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    SessionExpired,
    Captcha,
    Throttle,
}

/// What a body scan found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerHits {
    pub session_expired: bool,
    pub captcha: bool,
    pub throttle: bool,
}

impl MarkerHits {
    pub fn any(&self) -> bool {
        self.session_expired || self.captcha || self.throttle
    }
}

/// Compiled marker automaton for one portal layout.
#[derive(Debug, Clone)]
pub struct MarkerScanner {
    automaton: AhoCorasick,
    kinds: Vec<MarkerKind>,
}

impl MarkerScanner {
    pub fn new(layout: &PortalLayout) -> Result<Self, LayoutError> {
        let mut patterns: Vec<&str> = Vec::new();
        let mut kinds = Vec::new();

        let families = [
            (MarkerKind::SessionExpired, &layout.session_expired_markers),
            (MarkerKind::Captcha, &layout.captcha_markers),
            (MarkerKind::Throttle, &layout.throttle_markers),
        ];
        for (kind, markers) in families {
            for marker in markers.iter().filter(|m| !m.is_empty()) {
                patterns.push(marker.as_str());
                kinds.push(kind);
            }
        }

        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&patterns)
            .map_err(|e| LayoutError::Markers(e.to_string()))?;

        Ok(Self { automaton, kinds })
    }

    /// Scan a response body. Overlapping markers of different families are
    /// all reported; the client decides precedence.
    pub fn scan(&self, body: &[u8]) -> MarkerHits {
        let mut hits = MarkerHits::default();
        for m in self.automaton.find_overlapping_iter(body) {
            match self.kinds[m.pattern().as_usize()] {
                MarkerKind::SessionExpired => hits.session_expired = true,
                MarkerKind::Captcha => hits.captcha = true,
                MarkerKind::Throttle => hits.throttle = true,
            }
        }
        if hits.any() {
            debug!(?hits, "Portal body markers matched");
        }
        hits
    }
}

/// Whether a content type is something we should read for markers.
/// Missing content type counts as textual: the portal forgets it often.
pub fn is_textual(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("text/") || ct.contains("json") || ct.contains("html") || ct.contains("xml")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> MarkerScanner {
        MarkerScanner::new(&PortalLayout::default()).unwrap()
    }

    #[test]
    fn test_clean_body_has_no_hits() {
        let hits = scanner().scan(br#"{"status":"ok","items":[]}"#);
        assert!(!hits.any());
    }

    #[test]
    fn test_session_marker_case_insensitive() {
        let hits = scanner().scan(b"<h1>SESSION EXPIRED</h1> please reload");
        assert!(hits.session_expired);
        assert!(!hits.captcha);
    }

    #[test]
    fn test_captcha_and_throttle_markers() {
        let hits = scanner().scan(br#"{"status":"captcha","captcha_image":"/img"}"#);
        assert!(hits.captcha);

        let hits = scanner().scan(b"Too Many Requests. Please try after some time.");
        assert!(hits.throttle);
    }

    #[test]
    fn test_empty_marker_lists_never_match() {
        let layout = PortalLayout {
            session_expired_markers: vec![],
            captcha_markers: vec![],
            throttle_markers: vec![],
            ..PortalLayout::default()
        };
        let scanner = MarkerScanner::new(&layout).unwrap();
        assert!(!scanner.scan(b"session expired enter captcha").any());
    }

    #[test]
    fn test_overlapping_markers_all_reported() {
        let layout = PortalLayout {
            session_expired_markers: vec!["session expired".to_string()],
            captcha_markers: vec!["expired captcha".to_string()],
            throttle_markers: vec![],
            ..PortalLayout::default()
        };
        let scanner = MarkerScanner::new(&layout).unwrap();
        let hits = scanner.scan(b"your session expired captcha required");
        assert!(hits.session_expired);
        assert!(hits.captcha);
    }

    #[test]
    fn test_is_textual() {
        assert!(is_textual(None));
        assert!(is_textual(Some("text/html; charset=UTF-8")));
        assert!(is_textual(Some("application/json")));
        assert!(!is_textual(Some("application/pdf")));
        assert!(!is_textual(Some("image/png")));
    }
}
