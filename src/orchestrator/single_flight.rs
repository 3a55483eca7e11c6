//! Single-flight coalescing.
//!
//! Concurrent callers with the same key share one execution and all
//! receive a clone of its result. The work runs in its own task, so a
//! caller that stops waiting does not stop the work for the others. Once
//! the last waiter has gone, the flight is cancelled after the abandon
//! grace period unless somebody joins again in the meantime.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

enum FlightState<T> {
    Pending,
    Done(T),
    Abandoned,
}

impl<T> FlightState<T> {
    fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

struct Flight<T> {
    id: u64,
    state: watch::Sender<FlightState<T>>,
    waiters: AtomicUsize,
    cancel: CancellationToken,
}

type FlightMap<T> = DashMap<String, Arc<Flight<T>>>;

/// The flight ended without a result (cancelled or panicked).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("in-flight call was abandoned before producing a result")]
pub struct FlightAbandoned;

/// A result delivered to one waiter.
#[derive(Debug, Clone)]
pub struct Shared<T> {
    pub value: T,
    /// Whether this waiter started the flight
    pub leader: bool,
}

/// Coalesces concurrent executions by key.
pub struct SingleFlight<T> {
    flights: Arc<FlightMap<T>>,
    next_id: AtomicU64,
    abandon_grace: Duration,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(abandon_grace: Duration) -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            abandon_grace,
        }
    }

    /// Number of flights currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Run `work` for `key`, or join the flight already running for it.
    ///
    /// `work` is only invoked by the leader. Dropping the returned future
    /// detaches this caller.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> Result<Shared<T>, FlightAbandoned>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (flight, leader) = self.join(key);
        let mut rx = flight.state.subscribe();
        let _waiter = Waiter {
            flights: Arc::clone(&self.flights),
            flight: Arc::clone(&flight),
            key: key.to_string(),
            grace: self.abandon_grace,
        };

        if leader {
            self.launch(key, Arc::clone(&flight), work());
        } else {
            tracing::debug!(key, "Joined in-flight call");
        }

        let state = rx
            .wait_for(|state| !state.is_pending())
            .await
            .map_err(|_| FlightAbandoned)?;
        match &*state {
            FlightState::Done(value) => Ok(Shared {
                value: value.clone(),
                leader,
            }),
            _ => Err(FlightAbandoned),
        }
    }

    fn join(&self, key: &str) -> (Arc<Flight<T>>, bool) {
        match self.flights.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().cancel.is_cancelled() {
                    let flight = occupied.get();
                    flight.waiters.fetch_add(1, Ordering::AcqRel);
                    return (Arc::clone(flight), false);
                }
                let flight = self.new_flight();
                occupied.insert(Arc::clone(&flight));
                (flight, true)
            }
            Entry::Vacant(vacant) => {
                let flight = self.new_flight();
                vacant.insert(Arc::clone(&flight));
                (flight, true)
            }
        }
    }

    fn new_flight(&self) -> Arc<Flight<T>> {
        let (state, _) = watch::channel(FlightState::Pending);
        Arc::new(Flight {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            state,
            waiters: AtomicUsize::new(1),
            cancel: CancellationToken::new(),
        })
    }

    fn launch<Fut>(&self, key: &str, flight: Arc<Flight<T>>, work: Fut)
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let flights = Arc::clone(&self.flights);
        let key = key.to_string();

        tokio::spawn(async move {
            let mut task = tokio::spawn(work);
            let state = tokio::select! {
                _ = flight.cancel.cancelled() => {
                    task.abort();
                    tracing::debug!(key = %key, "Abandoned flight cancelled");
                    FlightState::Abandoned
                }
                joined = &mut task => match joined {
                    Ok(value) => FlightState::Done(value),
                    Err(e) => {
                        tracing::error!(key = %key, error = %e, "Flight task failed");
                        FlightState::Abandoned
                    }
                },
            };

            // Publish before removal so a late joiner still sees the result
            flight.state.send_replace(state);
            flights.remove_if(&key, |_, current| current.id == flight.id);
        });
    }
}

struct Waiter<T: Send + Sync + 'static> {
    flights: Arc<FlightMap<T>>,
    flight: Arc<Flight<T>>,
    key: String,
    grace: Duration,
}

impl<T: Send + Sync + 'static> Drop for Waiter<T> {
    fn drop(&mut self) {
        if self.flight.waiters.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if !self.flight.state.borrow().is_pending() {
            return;
        }

        let handle = tokio::runtime::Handle::try_current();
        match handle {
            Ok(handle) if !self.grace.is_zero() => {
                let flights = Arc::clone(&self.flights);
                let flight = Arc::clone(&self.flight);
                let key = std::mem::take(&mut self.key);
                let grace = self.grace;
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    abandon_if_unwatched(&flights, &key, &flight);
                });
            }
            _ => abandon_if_unwatched(&self.flights, &self.key, &self.flight),
        }
    }
}

fn abandon_if_unwatched<T>(flights: &FlightMap<T>, key: &str, flight: &Flight<T>) {
    // Holding the shard lock keeps joiners out while we decide
    let Some(current) = flights.get(key) else {
        return;
    };
    if current.id != flight.id
        || flight.waiters.load(Ordering::Acquire) != 0
        || !flight.state.borrow().is_pending()
    {
        return;
    }
    flight.cancel.cancel();
    tracing::debug!(key, "Last waiter left, cancelling flight");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_execution() {
        let flights = Arc::new(SingleFlight::<u32>::new(Duration::from_secs(5)));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let flights = Arc::clone(&flights);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                flights
                    .run("k", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        42
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for h in handles {
            let shared = h.await.unwrap().unwrap();
            assert_eq!(shared.value, 42);
            if shared.leader {
                leaders += 1;
            }
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_completed_flight_is_not_reused() {
        let flights = SingleFlight::<u32>::new(Duration::ZERO);
        let first = flights.run("k", || async { 1 }).await.unwrap();
        settle().await;
        let second = flights.run("k", || async { 2 }).await.unwrap();

        assert_eq!(first.value, 1);
        assert_eq!(second.value, 2);
        assert!(second.leader);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flights = SingleFlight::<&'static str>::new(Duration::ZERO);
        let (a, b) = tokio::join!(
            flights.run("a", || async { "a" }),
            flights.run("b", || async { "b" })
        );
        assert_eq!(a.unwrap().value, "a");
        assert_eq!(b.unwrap().value, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_waiter_leaving_cancels_work() {
        let flights = SingleFlight::<u32>::new(Duration::ZERO);
        let dropped = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let guard = Arc::clone(&dropped);
        let done = Arc::clone(&finished);
        let result = tokio::time::timeout(
            Duration::from_millis(10),
            flights.run("k", move || async move {
                let _guard = SetOnDrop(guard);
                tokio::time::sleep(Duration::from_secs(60)).await;
                done.store(true, Ordering::SeqCst);
                1
            }),
        )
        .await;
        assert!(result.is_err());

        settle().await;
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_within_grace_keeps_flight() {
        let flights = SingleFlight::<u32>::new(Duration::from_secs(5));
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let work = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(2)).await;
            7
        };

        let early = tokio::time::timeout(Duration::from_millis(10), flights.run("k", work)).await;
        assert!(early.is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let late = flights.run("k", || async { 0 }).await.unwrap();

        // A fresh flight would have produced 0
        assert_eq!(late.value, 7);
        assert!(!late.leader);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_surviving_waiter_keeps_flight_alive() {
        let flights = Arc::new(SingleFlight::<u32>::new(Duration::ZERO));

        let patient = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        9
                    })
                    .await
            })
        };
        settle().await;

        let impatient =
            tokio::time::timeout(Duration::from_millis(10), flights.run("k", || async { 0 })).await;
        assert!(impatient.is_err());

        assert_eq!(patient.await.unwrap().unwrap().value, 9);
    }

    async fn explode() -> u32 {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panicking_work_reports_abandoned() {
        let flights = SingleFlight::<u32>::new(Duration::ZERO);
        let result = flights.run("k", explode).await;
        assert_eq!(result.unwrap_err(), FlightAbandoned);
    }
}
