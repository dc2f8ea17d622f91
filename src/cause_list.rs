// =============================================================================
// cause_list.rs — WHO IS IN FRONT OF WHICH JUDGE TODAY
// =============================================================================
//
// One court's cause list for one date is a single portal call. A whole
// complex is one call per court, fanned out with a bounded concurrency
// limit and stitched back together in the order the portal lists the
// courts. One court failing does not sink the others: the caller gets a
// partial success with the failed court codes attached.
//
// Cause lists are never cached. They change during the day.
// =============================================================================

use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::error::{ErrorKind, PortalResult};
use crate::lookup::CascadingLookupService;
use crate::models::{CauseListEntry, CauseListEnvelope, ComplexPath, CourtPath, FetchResult, LocationNode};
use crate::portal::client::{PortalClient, PortalRequest, PortalResponse};
use crate::portal::layout::{Endpoint, PortalLayout};

pub struct CauseListFetcher {
    client: Arc<PortalClient>,
    lookup: Arc<CascadingLookupService>,
    fanout: usize,
}

impl CauseListFetcher {
    pub fn new(client: Arc<PortalClient>, lookup: Arc<CascadingLookupService>, fanout: usize) -> Self {
        Self {
            client,
            lookup,
            fanout: fanout.max(1),
        }
    }

    /// Entries for one court on one date, ordered by serial number.
    pub async fn fetch_one(&self, court: &CourtPath, date: NaiveDate) -> PortalResult<Vec<CauseListEntry>> {
        let node = self.lookup.find_court(court).await?;
        self.fetch_for_node(court, &node, date).await
    }

    /// Entries for every court in a complex, concatenated in court order.
    /// No courts is `Success(vec![])`; otherwise see [`assemble`].
    pub async fn fetch_all_in_complex(
        &self,
        complex: &ComplexPath,
        date: NaiveDate,
    ) -> FetchResult<Vec<CauseListEntry>> {
        let courts = match self.lookup.get_courts(complex).await {
            Ok(courts) => courts,
            Err(e) => return FetchResult::Failure(e),
        };
        if courts.is_empty() {
            info!(complex = %complex.complex, "Complex has no courts, nothing to fetch");
            return FetchResult::Success(Vec::new());
        }

        let outcomes = for_each_court(&courts, self.fanout, |node| async move {
            let path = complex.court(node.code.clone());
            self.fetch_for_node(&path, node, date).await
        })
        .await;
        assemble("Cause list", complex, date, outcomes)
    }

    async fn fetch_for_node(
        &self,
        path: &CourtPath,
        node: &LocationNode,
        date: NaiveDate,
    ) -> PortalResult<Vec<CauseListEntry>> {
        let layout = self.client.layout();
        let request = court_request(layout, Endpoint::CauseList, path, date);
        let response = self.client.submit(&request).await?;
        parse_entries(&response, node, date)
    }
}

/// Run `fetch` for every court, at most `fanout` at a time. Outcomes come
/// back in court order, keyed by court code.
pub(crate) async fn for_each_court<'a, T, F, Fut>(
    courts: &'a [LocationNode],
    fanout: usize,
    fetch: F,
) -> Vec<(String, PortalResult<T>)>
where
    F: Fn(&'a LocationNode) -> Fut,
    Fut: Future<Output = PortalResult<T>>,
{
    stream::iter(courts)
        .map(|node| {
            let work = fetch(node);
            async move { (node.code.clone(), work.await) }
        })
        .buffered(fanout.max(1))
        .collect()
        .await
}

/// Fold per-court outcomes into one result, in court order.
///
/// - every court fetched → `Success`
/// - some courts failed → `PartialSuccess` with `(court_code, error)` pairs
/// - every court failed → `Failure` with the first court's error
pub(crate) fn assemble<T>(
    what: &str,
    complex: &ComplexPath,
    date: NaiveDate,
    outcomes: Vec<(String, PortalResult<Vec<T>>)>,
) -> FetchResult<Vec<T>> {
    let court_count = outcomes.len();
    let mut items = Vec::new();
    let mut failures = Vec::new();
    for (code, outcome) in outcomes {
        match outcome {
            Ok(mut court_items) => items.append(&mut court_items),
            Err(e) => {
                warn!(what, court = %code, error = %e, "Court fetch failed");
                failures.push((code, e));
            }
        }
    }

    info!(
        what,
        complex = %complex.complex,
        %date,
        courts = court_count,
        failed = failures.len(),
        items = items.len(),
        "Complex fan-out assembled"
    );

    if failures.is_empty() {
        FetchResult::Success(items)
    } else if failures.len() == court_count {
        let (_, first) = failures.swap_remove(0);
        FetchResult::Failure(first)
    } else {
        FetchResult::PartialSuccess(items, failures)
    }
}

/// A request carrying the full court path and the date in portal format.
pub(crate) fn court_request(
    layout: &PortalLayout,
    endpoint: Endpoint,
    path: &CourtPath,
    date: NaiveDate,
) -> PortalRequest {
    PortalRequest::new(endpoint)
        .field(&layout.state_field, &path.state)
        .field(&layout.district_field, &path.district)
        .field(&layout.complex_field, &path.complex)
        .field(&layout.court_field, &path.court)
        .field(&layout.date_field, date.format(&layout.date_format).to_string())
}

/// Decode and validate. Serial numbers must start at 1 or above and
/// strictly increase; case numbers must not be blank.
fn parse_entries(
    response: &PortalResponse,
    court: &LocationNode,
    date: NaiveDate,
) -> PortalResult<Vec<CauseListEntry>> {
    let envelope: CauseListEnvelope = response.json()?;
    let endpoint = response.endpoint.name();

    let mut previous = 0u32;
    let mut entries = Vec::with_capacity(envelope.entries.len());
    for wire in envelope.entries {
        if wire.sr_no == 0 || wire.sr_no <= previous {
            return Err(ErrorKind::malformed(
                endpoint,
                format!("serial number {} out of order after {previous}", wire.sr_no),
            ));
        }
        previous = wire.sr_no;

        let case_number = wire.case_no.trim();
        if case_number.is_empty() {
            return Err(ErrorKind::malformed(
                endpoint,
                format!("entry {} has a blank case number", wire.sr_no),
            ));
        }

        entries.push(CauseListEntry {
            serial_number: wire.sr_no,
            case_number: case_number.to_string(),
            court_code: court.code.clone(),
            court_name: court.name.clone(),
            listing_date: date,
            pdf_ref: wire.pdf_ref.filter(|r| !r.trim().is_empty()),
        });
    }
    Ok(entries)
}
