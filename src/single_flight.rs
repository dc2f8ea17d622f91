// =============================================================================
// single_flight.rs — ONE REQUEST, MANY WAITERS
// =============================================================================
//
// Ten UI widgets ask for the districts of Delhi at the same instant. The
// portal should see one request, not ten. Same story for session bootstrap:
// five concurrent calls discover the session is stale, and exactly one of
// them should go fetch a new one while the other four wait for it.
//
// Each key maps to a shared future. The first caller creates it; everyone
// who shows up while it is still running clones it and awaits the same
// result (success or failure). The entry is removed once the call settles,
// so the next caller after that starts fresh. If every waiter walks away
// first, the call is dropped: its HTTP request is aborted and its global
// concurrency permit goes back to the pool.
// =============================================================================

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::ErrorKind;

type SharedCall<V> = Shared<BoxFuture<'static, Result<V, ErrorKind>>>;

struct Call<V>
where
    V: Clone,
{
    id: u64,
    shared: SharedCall<V>,
    waiters: usize,
}

/// Collapses concurrent identical calls into one.
pub struct SingleFlight<K, V>
where
    V: Clone,
{
    in_flight: Mutex<HashMap<K, Call<V>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V>
where
    V: Clone,
{
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` for `key`, or join the call already in flight for it.
    ///
    /// Returns the shared result and whether this caller joined an existing
    /// call (`true`) rather than starting one. `make` is only invoked by the
    /// caller that starts the call; it must build the future without
    /// borrowing from the caller.
    ///
    /// When the last waiter is dropped before the call settles, the call is
    /// dropped with it, along with any request and permit it holds.
    pub async fn run<F>(&self, key: K, make: F) -> (Result<V, ErrorKind>, bool)
    where
        F: FnOnce() -> BoxFuture<'static, Result<V, ErrorKind>>,
    {
        let (shared, joined, mut waiter) = {
            let mut in_flight = self.in_flight.lock();
            let (id, shared, joined) = match in_flight.get_mut(&key) {
                Some(call) => {
                    call.waiters += 1;
                    (call.id, call.shared.clone(), true)
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let shared = make().shared();
                    in_flight.insert(
                        key.clone(),
                        Call {
                            id,
                            shared: shared.clone(),
                            waiters: 1,
                        },
                    );
                    (id, shared, false)
                }
            };
            let waiter = Waiter {
                flight: self,
                key,
                id,
                settled: false,
            };
            (shared, joined, waiter)
        };

        let result = shared.await;
        waiter.settled = true;
        (result, joined)
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// One caller's stake in a call. Dropping it, by completion or by
/// cancellation, releases the stake.
struct Waiter<'a, K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    flight: &'a SingleFlight<K, V>,
    key: K,
    id: u64,
    settled: bool,
}

impl<K, V> Drop for Waiter<'_, K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn drop(&mut self) {
        let released = {
            let mut in_flight = self.flight.in_flight.lock();
            // Only touch our own call; a newer one may already sit under the key.
            let last = match in_flight.get_mut(&self.key) {
                Some(call) if call.id == self.id => {
                    call.waiters = call.waiters.saturating_sub(1);
                    self.settled || call.waiters == 0
                }
                _ => false,
            };
            if last {
                in_flight.remove(&self.key)
            } else {
                None
            }
        };

        if released.is_some() && !self.settled {
            debug!(call = self.id, "Every waiter left, dropping the call");
        }
        // The abandoned future is dropped here, outside the lock.
        drop(released);
    }
}
