//! Per-key single-flight registry.
//!
//! [`SingleFlight`] collapses concurrent requests for the same key into one
//! underlying computation whose outcome every caller observes.
//!
//! # Lifecycle
//!
//! ```text
//! get_or_create(key) ──► registered? ──yes──► join (factory not invoked)
//!                            │
//!                            no
//!                            ▼
//!                  invoke factory once, spawn it, register slot
//!                            │
//!                  computation settles (value, or panic)
//!                            ▼
//!                  slot removed ──► joiners observe the outcome
//! ```
//!
//! Insert-if-absent happens under one lock acquisition, so exactly one
//! factory runs per key per generation. The computation runs on its own
//! Tokio task: a caller that stops waiting does not cancel it, and its slot
//! is removed the moment it settles, before any joiner sees the result. A
//! later request for the same key therefore always starts a fresh call.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

/// The computation backing a flight panicked or its task was cancelled.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct FlightAborted(pub String);

impl From<FlightAborted> for crate::error::AuthError {
    fn from(err: FlightAborted) -> Self {
        crate::error::AuthError::FlightAborted(err.0)
    }
}

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, FlightAborted>>>;

struct Slot<T: Clone> {
    id: u64,
    outcome: SharedOutcome<T>,
}

struct Registry<T: Clone> {
    name: &'static str,
    slots: Mutex<HashMap<String, Slot<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone> Registry<T> {
    /// Removes the slot for `key` only if it still belongs to flight `id`.
    fn release(&self, key: &str, id: u64) -> bool {
        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|slot| slot.id == id) {
            slots.remove(key);
            return true;
        }
        false
    }
}

/// Registry of in-flight computations keyed by string.
///
/// Cloning is cheap and clones share the same registry.
pub struct SingleFlight<T: Clone> {
    registry: Arc<Registry<T>>,
}

impl<T: Clone> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self { registry: Arc::clone(&self.registry) }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry. `name` labels trace events.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            registry: Arc::new(Registry {
                name,
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the in-flight computation for `key`, creating it if absent.
    ///
    /// When a computation is already registered the caller joins it and
    /// `factory` is not invoked. Otherwise `factory` is invoked exactly once
    /// and its future is spawned onto the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn get_or_create<F, Fut>(&self, key: &str, factory: F) -> Flight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut slots = self.registry.slots.lock();

        if let Some(slot) = slots.get(key) {
            tracing::trace!(registry = self.registry.name, "joined in-flight call");
            return Flight {
                registry: Arc::downgrade(&self.registry),
                key: key.to_owned(),
                id: slot.id,
                leader: false,
                outcome: slot.outcome.clone(),
            };
        }

        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let work = factory();
        let release = SlotRelease {
            registry: Arc::downgrade(&self.registry),
            key: key.to_owned(),
            id,
        };
        // The slot is inserted below while the lock is still held, so the
        // task's release cannot run before the insert.
        let task = tokio::spawn(async move {
            let _release = release;
            work.await
        });
        let outcome: SharedOutcome<T> = task
            .map(|joined| joined.map_err(|err| FlightAborted(err.to_string())))
            .boxed()
            .shared();

        slots.insert(key.to_owned(), Slot { id, outcome: outcome.clone() });
        tracing::trace!(registry = self.registry.name, "started new call");

        Flight {
            registry: Arc::downgrade(&self.registry),
            key: key.to_owned(),
            id,
            leader: true,
            outcome,
        }
    }

    /// Unconditionally drops the entry for `key`, settled or not.
    ///
    /// Removing an absent key is a no-op.
    pub fn remove(&self, key: &str) {
        self.registry.slots.lock().remove(key);
    }

    /// Returns `true` if a computation for `key` is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.registry.slots.lock().contains_key(key)
    }

    /// Returns the number of registered computations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.slots.lock().len()
    }

    /// Returns `true` if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes a slot when the spawned computation finishes, including by panic.
struct SlotRelease<T: Clone> {
    registry: Weak<Registry<T>>,
    key: String,
    id: u64,
}

impl<T: Clone> Drop for SlotRelease<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.key, self.id);
        }
    }
}

/// A caller's handle on one flight.
pub struct Flight<T: Clone> {
    registry: Weak<Registry<T>>,
    key: String,
    id: u64,
    leader: bool,
    outcome: SharedOutcome<T>,
}

impl<T> Flight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Waits for the shared outcome.
    ///
    /// Dropping this future stops waiting without cancelling the computation.
    pub async fn wait(&self) -> Result<T, FlightAborted> {
        self.outcome.clone().await
    }

    /// Returns `true` if this caller invoked the factory.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    /// Returns a guard that releases this flight's slot when dropped.
    ///
    /// Release is scoped to this flight: it never removes a newer flight
    /// registered under the same key, and it leaves a flight that has not
    /// settled yet in place so that it keeps deduplicating callers.
    #[must_use]
    pub fn release_guard(&self) -> FlightGuard<T> {
        FlightGuard {
            registry: self.registry.clone(),
            key: self.key.clone(),
            id: self.id,
            outcome: self.outcome.clone(),
        }
    }
}

/// Cleanup guard returned by [`Flight::release_guard`].
pub struct FlightGuard<T: Clone> {
    registry: Weak<Registry<T>>,
    key: String,
    id: u64,
    outcome: SharedOutcome<T>,
}

impl<T: Clone> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        if self.outcome.peek().is_none() {
            return;
        }
        if let Some(registry) = self.registry.upgrade()
            && registry.release(&self.key, self.id)
        {
            tracing::trace!(registry = registry.name, "released settled call");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tokio::sync::watch;

    use super::*;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let flights: SingleFlight<u32> = SingleFlight::new("test");
        let invocations = Arc::new(AtomicUsize::new(0));
        let (open_tx, open_rx) = watch::channel(false);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let invocations = Arc::clone(&invocations);
            let mut open_rx = open_rx.clone();
            let flight = flights.get_or_create("k", move || {
                invocations.fetch_add(1, Ordering::SeqCst);
                async move {
                    open_rx.wait_for(|open| *open).await.unwrap();
                    42
                }
            });
            handles.push(flight);
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(handles.iter().filter(|f| f.is_leader()).count(), 1);
        assert!(flights.contains("k"));

        open_tx.send(true).unwrap();
        for flight in &handles {
            assert_eq!(flight.wait().await, Ok(42));
        }
        assert!(flights.is_empty(), "slot must be gone once the call settles");
    }

    #[tokio::test]
    async fn test_settled_flight_is_not_reused() {
        let flights: SingleFlight<u32> = SingleFlight::new("test");
        let invocations = Arc::new(AtomicUsize::new(0));

        for expected in 1..=3 {
            let counter = Arc::clone(&invocations);
            let flight = flights.get_or_create("k", move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) as u32 + 1;
                async move { n }
            });
            assert!(flight.is_leader());
            assert_eq!(flight.wait().await, Ok(expected));
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let flights: SingleFlight<&'static str> = SingleFlight::new("test");
        let a = flights.get_or_create("a", || async { "a" });
        let b = flights.get_or_create("b", || async { "b" });

        assert!(a.is_leader());
        assert!(b.is_leader());
        assert_eq!(a.wait().await, Ok("a"));
        assert_eq!(b.wait().await, Ok("b"));
    }

    #[tokio::test]
    async fn test_panic_is_observed_by_all_joiners_and_slot_removed() {
        let flights: SingleFlight<u32> = SingleFlight::new("test");
        let (open_tx, open_rx) = watch::channel(false);

        let mut rx = open_rx.clone();
        let leader = flights.get_or_create("k", move || async move {
            let open = *rx.wait_for(|open| *open).await.unwrap();
            assert!(!open, "remote client blew up");
            0
        });
        let joiner = flights.get_or_create("k", || async { 7 });
        assert!(!joiner.is_leader());

        open_tx.send(true).unwrap();
        assert!(leader.wait().await.is_err());
        assert!(joiner.wait().await.is_err());
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_flight_still_completes_and_cleans_up() {
        let flights: SingleFlight<u32> = SingleFlight::new("test");
        let completed = Arc::new(AtomicUsize::new(0));

        {
            let completed = Arc::clone(&completed);
            let flight = flights.get_or_create("k", move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                1
            });
            // The caller gives up immediately.
            let _ = tokio::time::timeout(Duration::from_millis(1), flight.wait()).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1, "computation must not be cancelled");
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn test_guard_keeps_unsettled_flight_registered() {
        let flights: SingleFlight<u32> = SingleFlight::new("test");
        let (open_tx, open_rx) = watch::channel(false);

        let mut rx = open_rx.clone();
        let flight = flights.get_or_create("k", move || async move {
            rx.wait_for(|open| *open).await.unwrap();
            5
        });
        drop(flight.release_guard());
        assert!(flights.contains("k"), "an unsettled flight keeps deduplicating");

        open_tx.send(true).unwrap();
        assert_eq!(flight.wait().await, Ok(5));
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn test_stale_guard_never_removes_newer_flight() {
        let flights: SingleFlight<u32> = SingleFlight::new("test");

        let first = flights.get_or_create("k", || async { 1 });
        assert_eq!(first.wait().await, Ok(1));
        let stale_guard = first.release_guard();

        let (open_tx, open_rx) = watch::channel(false);
        let mut rx = open_rx.clone();
        let second = flights.get_or_create("k", move || async move {
            rx.wait_for(|open| *open).await.unwrap();
            2
        });
        assert!(second.is_leader());

        drop(stale_guard);
        assert!(flights.contains("k"));

        open_tx.send(true).unwrap();
        assert_eq!(second.wait().await, Ok(2));
    }

    #[tokio::test]
    async fn test_remove_is_unconditional_and_idempotent() {
        let flights: SingleFlight<u32> = SingleFlight::new("test");
        let (_open_tx, open_rx) = watch::channel(false);

        let mut rx = open_rx.clone();
        let _flight = flights.get_or_create("k", move || async move {
            let _ = rx.wait_for(|open| *open).await;
            0
        });
        flights.remove("k");
        assert!(!flights.contains("k"));
        flights.remove("k");
        flights.remove("never-registered");
        assert!(flights.is_empty());
    }
}
