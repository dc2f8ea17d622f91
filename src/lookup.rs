// =============================================================================
// lookup.rs — STATE, DISTRICT, COMPLEX, COURT
// =============================================================================
//
// The four cascading dropdowns. Each level is fetched with its parent
// codes, cached per (level, parent path), and collapsed through
// single-flight so a burst of identical lookups costs one portal request.
//
// Before asking the portal for the children of something, we check that
// the something exists in its own parent's (usually cached) list. The
// portal's answer to an unknown code is an empty list or an error page,
// neither of which tells the caller "you passed a bad code". We do.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info};

use crate::cache::{CacheKey, LookupCache};
use crate::error::{ErrorKind, PortalResult};
use crate::metrics::PortalMetrics;
use crate::models::{ComplexPath, CourtPath, DistrictPath, Level, LocationNode, LookupEnvelope};
use crate::portal::client::{PortalClient, PortalRequest, PortalResponse};
use crate::portal::layout::Endpoint;
use crate::single_flight::SingleFlight;

type NodeList = Arc<Vec<LocationNode>>;

pub struct CascadingLookupService {
    client: Arc<PortalClient>,
    cache: Arc<LookupCache>,
    flight: SingleFlight<CacheKey, NodeList>,
    metrics: Arc<PortalMetrics>,
}

impl CascadingLookupService {
    pub fn new(client: Arc<PortalClient>, cache: Arc<LookupCache>, metrics: Arc<PortalMetrics>) -> Self {
        Self {
            client,
            cache,
            flight: SingleFlight::new(),
            metrics,
        }
    }

    pub async fn get_states(&self) -> PortalResult<Vec<LocationNode>> {
        Ok(self.states().await?.to_vec())
    }

    pub async fn get_districts(&self, state: &str) -> PortalResult<Vec<LocationNode>> {
        Ok(self.districts(state).await?.to_vec())
    }

    pub async fn get_complexes(&self, path: &DistrictPath) -> PortalResult<Vec<LocationNode>> {
        Ok(self.complexes(path).await?.to_vec())
    }

    pub async fn get_courts(&self, path: &ComplexPath) -> PortalResult<Vec<LocationNode>> {
        Ok(self.courts(path).await?.to_vec())
    }

    /// Resolve a full court path to its node, validating every level.
    pub async fn find_court(&self, path: &CourtPath) -> PortalResult<LocationNode> {
        require_code(Level::Court, &path.court)?;
        let courts = self.courts(&path.complex_path()).await?;
        find(&courts, Level::Court, &path.court).cloned()
    }

    /// Drop every cached list. In-flight lookups still complete and may
    /// repopulate their own keys.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
        info!("Lookup cache invalidated");
    }

    async fn states(&self) -> PortalResult<NodeList> {
        self.lookup(CacheKey::new(Level::State, &[]), PortalRequest::new(Endpoint::States))
            .await
    }

    async fn districts(&self, state: &str) -> PortalResult<NodeList> {
        require_code(Level::State, state)?;
        let states = self.states().await?;
        find(&states, Level::State, state)?;

        let layout = self.client.layout();
        let request = PortalRequest::new(Endpoint::Districts).field(&layout.state_field, state);
        self.lookup(CacheKey::new(Level::District, &[state]), request)
            .await
    }

    async fn complexes(&self, path: &DistrictPath) -> PortalResult<NodeList> {
        require_code(Level::District, &path.district)?;
        let districts = self.districts(&path.state).await?;
        find(&districts, Level::District, &path.district)?;

        let layout = self.client.layout();
        let request = PortalRequest::new(Endpoint::Complexes)
            .field(&layout.state_field, &path.state)
            .field(&layout.district_field, &path.district);
        self.lookup(
            CacheKey::new(Level::Complex, &[path.state.as_str(), path.district.as_str()]),
            request,
        )
        .await
    }

    async fn courts(&self, path: &ComplexPath) -> PortalResult<NodeList> {
        require_code(Level::Complex, &path.complex)?;
        let complexes = self.complexes(&path.district_path()).await?;
        find(&complexes, Level::Complex, &path.complex)?;

        let layout = self.client.layout();
        let request = PortalRequest::new(Endpoint::Courts)
            .field(&layout.state_field, &path.state)
            .field(&layout.district_field, &path.district)
            .field(&layout.complex_field, &path.complex);
        self.lookup(
            CacheKey::new(Level::Court, &[path.state.as_str(), path.district.as_str(), path.complex.as_str()]),
            request,
        )
        .await
    }

    /// Cache, then single-flight, then the portal.
    async fn lookup(&self, key: CacheKey, request: PortalRequest) -> PortalResult<NodeList> {
        if let Some(hit) = self.cache.get(&key) {
            self.metrics.increment_cache_hits();
            debug!(level = %key.level, parent = ?key.parent_path, "Lookup cache hit");
            return Ok(hit);
        }
        self.metrics.increment_cache_misses();

        let client = self.client.clone();
        let cache = self.cache.clone();
        let flight_key = key.clone();

        let (result, joined) = self
            .flight
            .run(key, move || {
                async move {
                    // A flight that finished just before we started may
                    // have filled the cache already.
                    if let Some(hit) = cache.get(&flight_key) {
                        return Ok(hit);
                    }
                    let response = client.submit(&request).await?;
                    let nodes = parse_nodes(&response, flight_key.level)?;
                    info!(
                        level = %flight_key.level,
                        parent = ?flight_key.parent_path,
                        count = nodes.len(),
                        "Lookup fetched from portal"
                    );
                    Ok(cache.insert_if_absent(flight_key, nodes))
                }
                .boxed()
            })
            .await;

        if joined {
            self.metrics.increment_joins();
        }
        result
    }
}

fn require_code(level: Level, code: &str) -> PortalResult<()> {
    if code.trim().is_empty() {
        return Err(ErrorKind::invalid_selection(level, code));
    }
    Ok(())
}

fn find<'a>(nodes: &'a [LocationNode], level: Level, code: &str) -> PortalResult<&'a LocationNode> {
    nodes
        .iter()
        .find(|n| n.code == code)
        .ok_or_else(|| ErrorKind::invalid_selection(level, code))
}

/// Decode a lookup envelope into nodes, in portal order. Blank codes or
/// names and duplicate codes make the whole response malformed.
fn parse_nodes(response: &PortalResponse, level: Level) -> PortalResult<Vec<LocationNode>> {
    let envelope: LookupEnvelope = response.json()?;
    let endpoint = response.endpoint.name();

    let mut seen = HashSet::with_capacity(envelope.items.len());
    let mut nodes = Vec::with_capacity(envelope.items.len());
    for item in envelope.items {
        let code = item.code.trim();
        let name = item.name.trim();
        if code.is_empty() || name.is_empty() {
            return Err(ErrorKind::malformed(endpoint, "item with blank code or name"));
        }
        if !seen.insert(code.to_string()) {
            return Err(ErrorKind::malformed(endpoint, format!("duplicate code {code:?}")));
        }
        nodes.push(LocationNode::new(code, name, level));
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> PortalResponse {
        PortalResponse {
            endpoint: Endpoint::Districts,
            status: 200,
            content_type: Some("application/json".to_string()),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_parse_nodes_preserves_order() {
        let body = r#"{"status":"ok","items":[
            {"code":"6-1","name":"Central Delhi"},
            {"code":"6-3","name":" New Delhi "},
            {"code":"6-2","name":"East Delhi"}]}"#;
        let nodes = parse_nodes(&response(body), Level::District).unwrap();
        let codes: Vec<_> = nodes.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, ["6-1", "6-3", "6-2"]);
        assert_eq!(nodes[1].name, "New Delhi");
        assert!(nodes.iter().all(|n| n.level == Level::District));
    }

    #[test]
    fn test_parse_nodes_rejects_duplicates() {
        let body = r#"{"status":"ok","items":[{"code":"6-1","name":"A"},{"code":"6-1","name":"B"}]}"#;
        assert!(matches!(
            parse_nodes(&response(body), Level::District),
            Err(ErrorKind::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_parse_nodes_rejects_blank_fields() {
        let body = r#"{"status":"ok","items":[{"code":"","name":"Nowhere"}]}"#;
        assert!(parse_nodes(&response(body), Level::District).is_err());
    }

    #[test]
    fn test_parse_nodes_empty_list_is_ok() {
        let nodes = parse_nodes(&response(r#"{"status":"ok","items":[]}"#), Level::Court).unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn test_find_reports_level() {
        let nodes = vec![LocationNode::new("6", "Delhi", Level::State)];
        assert!(find(&nodes, Level::State, "6").is_ok());
        assert_eq!(
            find(&nodes, Level::State, "99").unwrap_err(),
            ErrorKind::invalid_selection(Level::State, "99")
        );
        assert!(require_code(Level::District, "  ").is_err());
    }
}
