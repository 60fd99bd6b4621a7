//! Fetch coordination: dedupe, supersession, and optimistic mutation.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::FetchError;
use crate::fetcher::Fetcher;
use crate::focus::FocusSignal;
use crate::key::ResourceKey;
use crate::store::{CacheEntry, CacheStore, InflightTask, SharedFetch, Snapshot};

/// How a revalidation interacts with work already in flight for the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchIntent {
    /// Join an in-flight task and honor the dedupe window.
    Join,
    /// Start a replacement task, superseding anything in flight.
    Replace,
}

/// A local write applied to a key's cached data.
pub enum Mutation<T> {
    /// Replace the cached data with a value.
    Value(T),
    /// Compute the next data from the previous (if any).
    Update(Box<dyn FnOnce(Option<T>) -> T + Send>),
}

impl<T> Mutation<T> {
    /// Mutation that replaces the cached data with `value`.
    pub fn value(value: T) -> Self {
        Self::Value(value)
    }

    /// Mutation that derives the next data from the previous.
    pub fn update(f: impl FnOnce(Option<T>) -> T + Send + 'static) -> Self {
        Self::Update(Box::new(f))
    }

    fn apply(self, previous: Option<T>) -> T {
        match self {
            Self::Value(value) => value,
            Self::Update(f) => f(previous),
        }
    }
}

/// Mediates between consumers and the [`CacheStore`], enforcing the
/// dedupe/revalidation contract. Cheap to clone; all clones share the same
/// store and focus signal.
pub struct Coordinator<T> {
    store: Arc<CacheStore<T>>,
    focus: FocusSignal,
}

impl<T> Clone for Coordinator<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            focus: self.focus.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Coordinator<T> {
    /// Create a coordinator over an explicitly-owned store.
    pub fn new(store: Arc<CacheStore<T>>) -> Self {
        Self {
            store,
            focus: FocusSignal::new(),
        }
    }

    /// The underlying store (shared by all clones).
    pub fn store(&self) -> &Arc<CacheStore<T>> {
        &self.store
    }

    /// The focus signal the UI shell fires on window focus / page
    /// visibility events.
    pub fn focus_signal(&self) -> &FocusSignal {
        &self.focus
    }

    /// Fetch the key's resource, joining any in-flight task for the key and
    /// suppressing calls inside the dedupe window.
    ///
    /// For all concurrent callers of the same key within the lifetime of one
    /// in-flight task, exactly one `fetcher` invocation occurs and every
    /// caller resolves to its result. Within `dedupe_window` of the last
    /// settlement the call resolves immediately to the settled outcome
    /// without invoking `fetcher`.
    pub async fn fetch_or_join(
        &self,
        key: &ResourceKey,
        fetcher: &Arc<dyn Fetcher<T>>,
        dedupe_window: Duration,
    ) -> Result<T, FetchError> {
        self.revalidate(key, fetcher, dedupe_window, FetchIntent::Join).await
    }

    /// Forced revalidation: always starts a fresh task, superseding any
    /// in-flight one. A manual refresh must hit the network; the superseded
    /// task's late settlement is discarded.
    pub async fn refetch(
        &self,
        key: &ResourceKey,
        fetcher: &Arc<dyn Fetcher<T>>,
    ) -> Result<T, FetchError> {
        self.revalidate(key, fetcher, Duration::ZERO, FetchIntent::Replace).await
    }

    /// Synchronous local write with immediate notification. The optimistic
    /// value is visible to every bound consumer before any network
    /// round-trip; reconciliation is the caller's follow-up (see
    /// [`Binding::mutate_and_revalidate`](crate::Binding::mutate_and_revalidate)).
    ///
    /// A mutate does not advance the key's task ordering: if a fetch is in
    /// flight, its settlement still wins over the optimistic value (the
    /// server is authoritative). No rollback is attempted on a later fetch
    /// failure beyond surfacing the error.
    pub fn mutate(&self, key: &ResourceKey, mutation: Mutation<T>) -> Snapshot<T> {
        let snapshot = self.store.with_entry(key, |entry| {
            let next = mutation.apply(entry.data.clone());
            entry.data = Some(next);
            entry.error = None;
            entry.updated_at = Some(Instant::now());
            entry.snapshot()
        });
        trace!(key = %key, "mutated");
        self.store.notify(key, snapshot.clone());
        snapshot
    }

    pub(crate) async fn revalidate(
        &self,
        key: &ResourceKey,
        fetcher: &Arc<dyn Fetcher<T>>,
        dedupe_window: Duration,
        intent: FetchIntent,
    ) -> Result<T, FetchError> {
        enum Plan<T> {
            Task(SharedFetch<T>),
            Settled(Result<T, FetchError>),
        }

        // Steps 1-3 run under one lock acquisition: two calls racing for the
        // same key cannot both miss the in-flight registration.
        let plan = self.store.with_entry(key, |entry| {
            if intent == FetchIntent::Join {
                if let Some(inflight) = &entry.inflight {
                    trace!(key = %key, seq = inflight.seq, "joining in-flight fetch");
                    return Plan::Task(inflight.shared.clone());
                }
                if entry.settled_within(dedupe_window) {
                    trace!(key = %key, "dedupe window hit");
                    if let Some(data) = &entry.data {
                        return Plan::Settled(Ok(data.clone()));
                    }
                    if let Some(error) = &entry.error {
                        return Plan::Settled(Err(error.clone()));
                    }
                }
            }
            Plan::Task(self.start_task(entry, key, fetcher))
        });

        match plan {
            Plan::Task(task) => task.await,
            Plan::Settled(result) => result,
        }
    }

    /// Start a new fetch task for the key. Called with the entry locked;
    /// the task records its start sequence so a later-started task always
    /// wins over it on settlement, regardless of completion order.
    fn start_task(
        &self,
        entry: &mut CacheEntry<T>,
        key: &ResourceKey,
        fetcher: &Arc<dyn Fetcher<T>>,
    ) -> SharedFetch<T> {
        entry.start_seq += 1;
        let seq = entry.start_seq;
        debug!(key = %key, seq, "starting fetch");

        let store = self.store.clone();
        let key_owned = key.clone();
        let fetcher = fetcher.clone();
        let task: SharedFetch<T> = async move {
            let result = fetcher.fetch().await;
            settle(&store, &key_owned, seq, &result);
            result
        }
        .boxed()
        .shared();

        entry.inflight = Some(InflightTask {
            shared: task.clone(),
            seq,
        });
        // Driver: the task settles and updates the shared cache even after
        // every interested consumer detaches.
        tokio::spawn(task.clone().map(|_| ()));
        task
    }
}

/// Apply a settled fetch result to the store, unless a newer task for the
/// key has started since (last-started-writer coherency).
fn settle<T: Clone + Send + Sync + 'static>(
    store: &Arc<CacheStore<T>>,
    key: &ResourceKey,
    seq: u64,
    result: &Result<T, FetchError>,
) {
    let snapshot = store.with_entry(key, |entry| {
        if entry.start_seq != seq {
            debug!(key = %key, seq, newest = entry.start_seq, "discarding superseded result");
            return None;
        }
        entry.inflight = None;
        match result {
            Ok(value) => {
                entry.data = Some(value.clone());
                entry.error = None;
            }
            Err(error) => {
                debug!(key = %key, %error, "fetch failed");
                entry.error = Some(error.clone());
            }
        }
        entry.updated_at = Some(Instant::now());
        Some(entry.snapshot())
    });
    if let Some(snapshot) = snapshot {
        store.notify(key, snapshot);
    }
}
