use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

type Pending<T> = Shared<BoxFuture<'static, T>>;

/// Collapses concurrent invocations of an async operation into one execution.
///
/// While an operation is pending, every [`run`](SingleFlight::run) call awaits the same shared
/// future and receives a clone of its output. The slot is released once the shared future has
/// completed, so the next call starts a fresh operation. A caller that is dropped mid-flight
/// leaves the pending future in place for the others to finish.
pub struct SingleFlight<T: Clone> {
    slot: Mutex<Option<Pending<T>>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Join the pending operation, or start one with `start` when none is pending.
    pub async fn run<F, Fut>(&self, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let pending = {
            let mut slot = self.lock();
            match slot.as_ref() {
                Some(pending) if pending.peek().is_none() => pending.clone(),
                _ => {
                    let pending = start().boxed().shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        let _release = Release {
            flight: self,
            pending: pending.clone(),
        };
        pending.await
    }

    /// Whether an operation is currently pending.
    pub fn is_in_flight(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|pending| pending.peek().is_none())
            .unwrap_or(false)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Pending<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// Clears the slot on drop, but only once the operation it holds has finished.
struct Release<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    flight: &'a SingleFlight<T>,
    pending: Pending<T>,
}

impl<T> Drop for Release<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.pending.peek().is_none() {
            return;
        }
        let mut slot = self.flight.lock();
        let same = slot
            .as_ref()
            .map(|current| Shared::ptr_eq(current, &self.pending))
            .unwrap_or(false);
        if same {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::join_all;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let flight = Arc::new(SingleFlight::<usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let callers = (0..5).map(|_| {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            async move {
                flight
                    .run(move || async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        calls.fetch_add(1, Ordering::SeqCst) + 100
                    })
                    .await
            }
        });

        let results = join_all(callers).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|value| *value == 100));
        assert!(!flight.is_in_flight());
    }

    #[tokio::test]
    async fn completed_flight_is_not_reused() {
        let flight = SingleFlight::<u32>::new();
        assert_eq!(flight.run(|| async { 1 }).await, 1);
        assert_eq!(flight.run(|| async { 2 }).await, 2);
    }

    #[tokio::test]
    async fn dropped_leader_does_not_start_second_execution() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let leader = {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                flight
                    .run(move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = release_rx.await;
                        7
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        while !flight.is_in_flight() {
            tokio::task::yield_now().await;
        }
        leader.abort();
        let _ = leader.await;
        assert!(flight.is_in_flight());

        let follower = {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                flight
                    .run(move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        99
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        release_tx.send(()).unwrap();

        assert_eq!(follower.await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!flight.is_in_flight());
    }
}
