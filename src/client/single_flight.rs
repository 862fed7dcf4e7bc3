//! Single-flight execution: concurrent callers share one in-flight operation.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

struct Slot<T> {
    generation: u64,
    pending: Option<(u64, Shared<BoxFuture<'static, T>>)>,
}

/// Runs at most one instance of an operation at a time.
///
/// A caller arriving while the operation is pending joins it instead of
/// starting another; every caller of that round observes the same result.
/// The slot clears when the round settles, so the next call starts fresh.
/// Dropping one caller does not cancel the operation for the others.
pub struct SingleFlight<T: Clone> {
    slot: Mutex<Slot<T>>,
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                generation: 0,
                pending: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the pending round, or start one with `op`.
    pub async fn run<F, Fut>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (generation, round) = {
            let mut slot = self.lock();
            // A settled round nobody cleared (all its callers were dropped) is stale.
            let joinable = slot
                .pending
                .as_ref()
                .filter(|(_, round)| round.peek().is_none())
                .map(|(generation, round)| (*generation, round.clone()));
            match joinable {
                Some(pending) => pending,
                None => {
                    slot.generation += 1;
                    let generation = slot.generation;
                    let round = op().boxed().shared();
                    slot.pending = Some((generation, round.clone()));
                    (generation, round)
                }
            }
        };

        let result = round.await;

        let mut slot = self.lock();
        if matches!(&slot.pending, Some((current, _)) if *current == generation) {
            slot.pending = None;
        }
        result
    }

    /// Whether a round is in flight.
    pub fn is_pending(&self) -> bool {
        matches!(&self.lock().pending, Some((_, round)) if round.peek().is_none())
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}
