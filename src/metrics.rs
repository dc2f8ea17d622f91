// ═══════════════════════════════════════════════════════════════
// METRICS - counting every knock on the portal's door
// ═══════════════════════════════════════════════════════════════
//
// Lock-free counters for everything the engine does to the portal:
// requests sent, retries, session bootstraps and refreshes, CAPTCHAs,
// cache hits, single-flight joins, breaker trips. A snapshot is a plain
// serializable struct the CLI can print and tests can assert on.

use portable_atomic::{AtomicU64, Ordering};
use serde::Serialize;
use std::time::Instant;

/// A point-in-time copy of every counter.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_sent: u64,
    pub request_failures: u64,
    pub retries: u64,
    pub session_bootstraps: u64,
    pub session_refreshes: u64,
    pub captchas_solved: u64,
    pub captchas_failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub single_flight_joins: u64,
    pub circuit_breaker_trips: u64,
    pub pdfs_downloaded: u64,
    pub uptime_seconds: u64,
}

pub struct PortalMetrics {
    requests_sent: AtomicU64,
    request_failures: AtomicU64,
    retries: AtomicU64,
    session_bootstraps: AtomicU64,
    session_refreshes: AtomicU64,
    captchas_solved: AtomicU64,
    captchas_failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    single_flight_joins: AtomicU64,
    circuit_breaker_trips: AtomicU64,
    pdfs_downloaded: AtomicU64,
    start_time: Instant,
}

impl Default for PortalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PortalMetrics {
    pub fn new() -> Self {
        Self {
            requests_sent: AtomicU64::new(0),
            request_failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            session_bootstraps: AtomicU64::new(0),
            session_refreshes: AtomicU64::new(0),
            captchas_solved: AtomicU64::new(0),
            captchas_failed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            single_flight_joins: AtomicU64::new(0),
            circuit_breaker_trips: AtomicU64::new(0),
            pdfs_downloaded: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_requests(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failures(&self) {
        self.request_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_bootstraps(&self) {
        self.session_bootstraps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refreshes(&self) {
        self.session_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_captchas_solved(&self) {
        self.captchas_solved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_captchas_failed(&self) {
        self.captchas_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_joins(&self) {
        self.single_flight_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_breaker_trips(&self) {
        self.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_pdfs(&self) {
        self.pdfs_downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            request_failures: self.request_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            session_bootstraps: self.session_bootstraps.load(Ordering::Relaxed),
            session_refreshes: self.session_refreshes.load(Ordering::Relaxed),
            captchas_solved: self.captchas_solved.load(Ordering::Relaxed),
            captchas_failed: self.captchas_failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            single_flight_joins: self.single_flight_joins.load(Ordering::Relaxed),
            circuit_breaker_trips: self.circuit_breaker_trips.load(Ordering::Relaxed),
            pdfs_downloaded: self.pdfs_downloaded.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}
