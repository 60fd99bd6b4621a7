//! Process-wide cache store with per-key subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;

use crate::error::FetchError;
use crate::key::ResourceKey;

/// The shared handle to one in-flight fetch task. Every concurrent caller
/// for the key awaits a clone of the same future and resolves to the same
/// settled result.
pub(crate) type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

/// Callback invoked with a fresh snapshot whenever a key settles or mutates.
pub type ChangeListener<T> = Arc<dyn Fn(Snapshot<T>) + Send + Sync>;

/// Handle for removing a subscription on consumer detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Consumer-facing view of one key's state.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    /// Last successfully fetched (or mutated) value, if any.
    pub data: Option<T>,
    /// Last fetch failure, if any. A failure never evicts `data`.
    pub error: Option<FetchError>,
    /// True exactly while neither data nor error has ever resolved for the
    /// key. Later revalidations update `data`/`error` in place and never
    /// toggle this back on.
    pub loading: bool,
}

impl<T> Snapshot<T> {
    /// Snapshot of a key that has never been touched.
    pub fn empty() -> Self {
        Self {
            data: None,
            error: None,
            loading: true,
        }
    }
}

/// The single in-flight task registered for a key, tagged with its start
/// sequence for supersession ordering.
pub(crate) struct InflightTask<T> {
    pub(crate) shared: SharedFetch<T>,
    pub(crate) seq: u64,
}

/// Cached state for one key.
pub(crate) struct CacheEntry<T> {
    pub(crate) data: Option<T>,
    pub(crate) error: Option<FetchError>,
    /// Time of the last settlement or mutation. Seeds leave this unset so
    /// they never engage the dedupe window.
    pub(crate) updated_at: Option<Instant>,
    pub(crate) inflight: Option<InflightTask<T>>,
    /// Sequence of the most recently started task for the key. A settling
    /// task may only write if its own sequence still matches.
    pub(crate) start_seq: u64,
}

impl<T: Clone> CacheEntry<T> {
    fn new() -> Self {
        Self {
            data: None,
            error: None,
            updated_at: None,
            inflight: None,
            start_seq: 0,
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot<T> {
        Snapshot {
            data: self.data.clone(),
            error: self.error.clone(),
            loading: self.data.is_none() && self.error.is_none(),
        }
    }

    pub(crate) fn settled_within(&self, window: Duration) -> bool {
        match self.updated_at {
            Some(at) => at.elapsed() < window,
            None => false,
        }
    }
}

/// Process-wide mapping from resource key to cache entry.
///
/// Entries are created lazily on first touch and live for the process
/// lifetime; they persist after every binding detaches so a later rebind can
/// show stale-but-present data instantly. All compound read/write sequences
/// run under one mutex acquisition, so the at-most-one-in-flight-per-key
/// invariant holds on a multi-threaded runtime.
///
/// Instantiate one store per application (or per test) and pass it into the
/// coordinator; there is no ambient singleton.
pub struct CacheStore<T> {
    entries: Mutex<HashMap<ResourceKey, CacheEntry<T>>>,
    subscribers: Mutex<HashMap<ResourceKey, Vec<(SubscriptionId, ChangeListener<T>)>>>,
    next_subscription: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> CacheStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Current view of a key. Pure read, no side effects.
    pub fn snapshot(&self, key: &ResourceKey) -> Snapshot<T> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .map(CacheEntry::snapshot)
            .unwrap_or_else(Snapshot::empty)
    }

    /// Time of the key's last settlement or mutation.
    pub fn updated_at(&self, key: &ResourceKey) -> Option<Instant> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).and_then(|entry| entry.updated_at)
    }

    /// Record a successful value for a key: sets `data`, clears `error`,
    /// stamps the update time, and notifies every subscriber.
    pub fn put_data(&self, key: &ResourceKey, value: T) {
        let snapshot = self.with_entry(key, |entry| {
            entry.data = Some(value);
            entry.error = None;
            entry.updated_at = Some(Instant::now());
            entry.snapshot()
        });
        self.notify(key, snapshot);
    }

    /// Record a fetch failure for a key: sets `error`, stamps the update
    /// time, leaves any cached `data` untouched, and notifies every
    /// subscriber.
    pub fn put_error(&self, key: &ResourceKey, error: FetchError) {
        let snapshot = self.with_entry(key, |entry| {
            entry.error = Some(error);
            entry.updated_at = Some(Instant::now());
            entry.snapshot()
        });
        self.notify(key, snapshot);
    }

    /// Seed a key with initial data, without an update timestamp (a seed is
    /// not a network settlement and must not engage the dedupe window).
    /// Ignored when the entry already holds data, so a seed never clobbers a
    /// previously cached value. Returns whether the seed was applied.
    pub fn seed(&self, key: &ResourceKey, value: T) -> bool {
        let snapshot = self.with_entry(key, |entry| {
            if entry.data.is_some() {
                return None;
            }
            entry.data = Some(value);
            Some(entry.snapshot())
        });
        match snapshot {
            Some(snapshot) => {
                self.notify(key, snapshot);
                true
            }
            None => false,
        }
    }

    /// Register a listener for a key. The listener is called synchronously
    /// with the fresh snapshot on every settlement or mutation of that key.
    pub fn subscribe(&self, key: &ResourceKey, listener: ChangeListener<T>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers
            .entry(key.clone())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener. Pending notifications for a removed listener are
    /// not delivered.
    pub fn unsubscribe(&self, key: &ResourceKey, id: SubscriptionId) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(listeners) = subscribers.get_mut(key) {
            listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }

    /// Run a compound read/write sequence against a key's entry under a
    /// single lock acquisition.
    pub(crate) fn with_entry<R>(
        &self,
        key: &ResourceKey,
        f: impl FnOnce(&mut CacheEntry<T>) -> R,
    ) -> R {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::new);
        f(entry)
    }

    /// Deliver a snapshot to every subscriber of a key. Listeners are
    /// invoked outside the store locks, so a listener may re-enter the
    /// store (e.g. mutate another key).
    pub(crate) fn notify(&self, key: &ResourceKey, snapshot: Snapshot<T>) {
        let listeners: Vec<ChangeListener<T>> = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers
                .get(key)
                .map(|listeners| listeners.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for listener in listeners {
            listener(snapshot.clone());
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for CacheStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
