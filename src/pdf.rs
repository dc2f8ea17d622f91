//! Cause-list PDF download.
//!
//! The portal serves the PDF from a GET endpoint keyed by the full court
//! path and the date. When there is no list, or the session died, it
//! happily answers `200 text/html` instead. Anything that is not a
//! non-empty, size-bounded `application/pdf` body starting with the
//! `%PDF-` signature is reported as a malformed response, never handed
//! out as a document.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use crate::cause_list::{assemble, court_request, for_each_court};
use crate::error::{ErrorKind, PortalResult};
use crate::lookup::CascadingLookupService;
use crate::metrics::PortalMetrics;
use crate::models::{ComplexPath, CourtPath, FetchResult, LocationNode, PdfDocument};
use crate::portal::client::{PortalClient, PortalResponse};
use crate::portal::layout::Endpoint;

const PDF_CONTENT_TYPE: &str = "application/pdf";
const PDF_SIGNATURE: &[u8] = b"%PDF-";
/// Some generators put junk before the header; readers accept it within
/// the first KiB.
const SIGNATURE_WINDOW: usize = 1024;

pub struct PdfRetriever {
    client: Arc<PortalClient>,
    lookup: Arc<CascadingLookupService>,
    max_bytes: usize,
    fanout: usize,
    metrics: Arc<PortalMetrics>,
}

impl PdfRetriever {
    pub fn new(
        client: Arc<PortalClient>,
        lookup: Arc<CascadingLookupService>,
        max_bytes: usize,
        fanout: usize,
        metrics: Arc<PortalMetrics>,
    ) -> Self {
        Self {
            client,
            lookup,
            max_bytes,
            fanout: fanout.max(1),
            metrics,
        }
    }

    pub async fn fetch(&self, court: &CourtPath, date: NaiveDate) -> PortalResult<PdfDocument> {
        let node = self.lookup.find_court(court).await?;
        self.fetch_for_node(court, &node, date).await
    }

    /// One PDF per court in the complex, in court order, fanned out like
    /// the complex cause list. Courts without a usable PDF are reported
    /// as partial failures.
    pub async fn fetch_all_in_complex(
        &self,
        complex: &ComplexPath,
        date: NaiveDate,
    ) -> FetchResult<Vec<PdfDocument>> {
        let courts = match self.lookup.get_courts(complex).await {
            Ok(courts) => courts,
            Err(e) => return FetchResult::Failure(e),
        };
        if courts.is_empty() {
            return FetchResult::Success(Vec::new());
        }

        let outcomes = for_each_court(&courts, self.fanout, |node| async move {
            let path = complex.court(node.code.clone());
            self.fetch_for_node(&path, node, date).await.map(|document| vec![document])
        })
        .await;
        assemble("PDF", complex, date, outcomes)
    }

    async fn fetch_for_node(
        &self,
        court: &CourtPath,
        node: &LocationNode,
        date: NaiveDate,
    ) -> PortalResult<PdfDocument> {
        let request = court_request(self.client.layout(), Endpoint::Pdf, court, date);
        let response = self.client.submit(&request).await?;
        check_pdf(&response, self.max_bytes)?;

        let document = PdfDocument {
            size_bytes: response.body.len(),
            content_type: PDF_CONTENT_TYPE.to_string(),
            suggested_file_name: suggested_file_name(&node.name, date),
            bytes: response.body,
        };

        self.metrics.increment_pdfs();
        info!(
            court = %court.court,
            %date,
            size_bytes = document.size_bytes,
            file = %document.suggested_file_name,
            "Cause list PDF downloaded"
        );
        Ok(document)
    }
}

fn check_pdf(response: &PortalResponse, max_bytes: usize) -> PortalResult<()> {
    let endpoint = response.endpoint.name();

    if !response.has_content_type(PDF_CONTENT_TYPE) {
        return Err(ErrorKind::malformed(
            endpoint,
            format!(
                "expected {PDF_CONTENT_TYPE}, got {}",
                response.content_type.as_deref().unwrap_or("no content type")
            ),
        ));
    }
    if response.body.is_empty() {
        return Err(ErrorKind::malformed(endpoint, "empty PDF body"));
    }
    if response.body.len() > max_bytes {
        return Err(ErrorKind::malformed(
            endpoint,
            format!("PDF is {} bytes, limit is {max_bytes}", response.body.len()),
        ));
    }

    let window = &response.body[..response.body.len().min(SIGNATURE_WINDOW)];
    if memchr::memmem::find(window, PDF_SIGNATURE).is_none() {
        return Err(ErrorKind::malformed(endpoint, "body does not carry a PDF signature"));
    }
    Ok(())
}

/// `CauseList_<court name, whitespace runs as underscores>_<YYYY-MM-DD>.pdf`.
/// Path separators and other characters filesystems choke on are dropped.
pub fn suggested_file_name(court_name: &str, date: NaiveDate) -> String {
    let court: String = court_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    format!("CauseList_{}_{}.pdf", court, date.format("%Y-%m-%d"))
}
