//! Per-consumer binding lifecycle: attach, triggers, detach.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::coordinator::{Coordinator, FetchIntent, Mutation};
use crate::error::FetchError;
use crate::fetcher::Fetcher;
use crate::key::ResourceKey;
use crate::store::{ChangeListener, Snapshot, SubscriptionId};

/// Default window during which redundant triggers for a key are collapsed
/// into the previous settlement (e.g. mount and focus firing together).
pub const DEFAULT_DEDUPE_WINDOW: Duration = Duration::from_secs(2);

/// Trigger configuration for one binding.
#[derive(Debug)]
pub struct BindingOptions<T> {
    /// Revalidate on a recurring timer while attached.
    pub poll_interval: Option<Duration>,
    /// Revalidate when the window regains focus or the page becomes
    /// visible.
    pub revalidate_on_focus: bool,
    /// Minimum interval between redundant fetches for the key.
    pub dedupe_window: Duration,
    /// Seed the entry without an initial network call.
    pub initial_data: Option<T>,
}

impl<T> Default for BindingOptions<T> {
    fn default() -> Self {
        Self {
            poll_interval: None,
            revalidate_on_focus: false,
            dedupe_window: DEFAULT_DEDUPE_WINDOW,
            initial_data: None,
        }
    }
}

impl<T> BindingOptions<T> {
    /// Options with no triggers and the default dedupe window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the polling trigger.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Enable the focus/visibility trigger.
    pub fn with_revalidate_on_focus(mut self) -> Self {
        self.revalidate_on_focus = true;
        self
    }

    /// Set the dedupe window.
    pub fn with_dedupe_window(mut self, window: Duration) -> Self {
        self.dedupe_window = window;
        self
    }

    /// Seed the entry and skip the initial fetch.
    pub fn with_initial_data(mut self, data: T) -> Self {
        self.initial_data = Some(data);
        self
    }
}

impl<T: Clone + Send + Sync + 'static> Coordinator<T> {
    /// Attach a consumer to a key. The consumer's `on_change` listener is
    /// called with a fresh snapshot on every settlement or mutation of the
    /// key until the binding is dropped.
    pub fn bind(
        &self,
        key: ResourceKey,
        fetcher: Arc<dyn Fetcher<T>>,
        options: BindingOptions<T>,
        on_change: impl Fn(Snapshot<T>) + Send + Sync + 'static,
    ) -> Binding<T> {
        Binding::new(self.clone(), key, fetcher, options, Arc::new(on_change))
    }
}

/// The association between one UI consumer and one key.
///
/// Holds the consumer's subscription and its trigger tasks; dropping the
/// binding detaches the consumer (timers cleared, listeners removed) without
/// cancelling any in-flight fetch other consumers may be joined to.
pub struct Binding<T: Clone + Send + Sync + 'static> {
    coordinator: Coordinator<T>,
    key: ResourceKey,
    fetcher: Arc<dyn Fetcher<T>>,
    options: BindingOptions<T>,
    listener: ChangeListener<T>,
    subscription: Option<SubscriptionId>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T: Clone + Send + Sync + 'static> Binding<T> {
    pub(crate) fn new(
        coordinator: Coordinator<T>,
        key: ResourceKey,
        fetcher: Arc<dyn Fetcher<T>>,
        options: BindingOptions<T>,
        listener: ChangeListener<T>,
    ) -> Self {
        let mut binding = Self {
            coordinator,
            key,
            fetcher,
            options,
            listener,
            subscription: None,
            tasks: Vec::new(),
        };
        binding.attach();
        binding
    }

    /// The key this binding is attached to.
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Current view of the bound key.
    pub fn snapshot(&self) -> Snapshot<T> {
        self.coordinator.store().snapshot(&self.key)
    }

    /// Manual refresh: always hits the network, superseding any in-flight
    /// task for the key.
    pub async fn refetch(&self) -> Result<T, FetchError> {
        self.coordinator.refetch(&self.key, &self.fetcher).await
    }

    /// Optimistic local write, visible to all bound consumers immediately.
    pub fn mutate(&self, mutation: Mutation<T>) -> Snapshot<T> {
        self.coordinator.mutate(&self.key, mutation)
    }

    /// Optimistic local write with reconciliation. The write and its
    /// notifications happen synchronously at call time; the returned future
    /// revalidates against the server, whose response overwrites the
    /// optimistic value once it lands. If a fetch is already in flight for
    /// the key, its settlement is awaited instead of starting another call.
    pub fn mutate_and_revalidate(
        &self,
        mutation: Mutation<T>,
    ) -> impl Future<Output = Result<T, FetchError>> + Send + 'static {
        self.coordinator.mutate(&self.key, mutation);
        let coordinator = self.coordinator.clone();
        let key = self.key.clone();
        let fetcher = self.fetcher.clone();
        async move {
            coordinator
                .revalidate(&key, &fetcher, Duration::ZERO, FetchIntent::Join)
                .await
        }
    }

    /// Rebind this consumer to a different key: detach-then-reattach. The
    /// old key's in-flight work continues for any other consumer bound to
    /// it; a fresh bind cycle (initial fetch, triggers) runs for the new
    /// key.
    pub fn rebind(&mut self, key: ResourceKey) {
        debug!(from = %self.key, to = %key, "rebinding");
        self.detach();
        self.key = key;
        self.attach();
    }

    fn attach(&mut self) {
        self.subscription = Some(
            self.coordinator
                .store()
                .subscribe(&self.key, self.listener.clone()),
        );

        // An initial_data seed replaces the initial fetch; it is consumed by
        // the first attach, so a rebind always revalidates.
        match self.options.initial_data.take() {
            Some(seed) => {
                self.coordinator.store().seed(&self.key, seed);
            }
            None => {
                let coordinator = self.coordinator.clone();
                let key = self.key.clone();
                let fetcher = self.fetcher.clone();
                let window = self.options.dedupe_window;
                self.tasks.push(tokio::spawn(async move {
                    let _ = coordinator.fetch_or_join(&key, &fetcher, window).await;
                }));
            }
        }

        if let Some(period) = self.options.poll_interval {
            let coordinator = self.coordinator.clone();
            let key = self.key.clone();
            let fetcher = self.fetcher.clone();
            let window = self.options.dedupe_window;
            self.tasks.push(tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    trace!(key = %key, "poll tick");
                    let _ = coordinator.fetch_or_join(&key, &fetcher, window).await;
                }
            }));
        }

        if self.options.revalidate_on_focus {
            let coordinator = self.coordinator.clone();
            let key = self.key.clone();
            let fetcher = self.fetcher.clone();
            let window = self.options.dedupe_window;
            let mut events = self.coordinator.focus_signal().subscribe();
            self.tasks.push(tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => {
                            trace!(key = %key, ?event, "focus revalidation");
                            let _ = coordinator.fetch_or_join(&key, &fetcher, window).await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }
    }

    fn detach(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(id) = self.subscription.take() {
            self.coordinator.store().unsubscribe(&self.key, id);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for Binding<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetcher::fetcher_fn;
    use crate::resource_key;
    use crate::store::CacheStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct AttemptRow {
        id: &'static str,
        score: u32,
    }

    fn coordinator() -> Coordinator<Vec<AttemptRow>> {
        Coordinator::new(Arc::new(CacheStore::new()))
    }

    /// Fetcher serving `pages[n]` on the n-th call (last page repeats).
    fn paged_fetcher(
        calls: &Arc<AtomicUsize>,
        pages: Vec<Vec<AttemptRow>>,
    ) -> Arc<dyn Fetcher<Vec<AttemptRow>>> {
        let calls = calls.clone();
        fetcher_fn(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let page = pages[n.min(pages.len() - 1)].clone();
            async move { Ok(page) }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_fetches_and_clears_loading() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = paged_fetcher(&calls, vec![vec![AttemptRow { id: "a1", score: 80 }]]);

        let binding = coordinator.bind(
            resource_key!["attempts", "dashboard"],
            fetcher,
            BindingOptions::new(),
            |_| {},
        );
        assert!(binding.snapshot().loading);

        tokio::task::yield_now().await;
        let snapshot = binding.snapshot();
        assert!(!snapshot.loading);
        assert_eq!(snapshot.data, Some(vec![AttemptRow { id: "a1", score: 80 }]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_data_skips_fetch() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = paged_fetcher(&calls, vec![vec![]]);
        let seed = vec![AttemptRow { id: "a1", score: 80 }];

        let binding = coordinator.bind(
            resource_key!["attempts", "dashboard"],
            fetcher,
            BindingOptions::new().with_initial_data(seed.clone()),
            |_| {},
        );
        tokio::task::yield_now().await;

        let snapshot = binding.snapshot();
        assert!(!snapshot.loading);
        assert_eq!(snapshot.data, Some(seed));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_tick_picks_up_new_rows() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = paged_fetcher(
            &calls,
            vec![
                vec![AttemptRow { id: "a1", score: 80 }],
                vec![AttemptRow { id: "a1", score: 80 }, AttemptRow { id: "a2", score: 55 }],
            ],
        );

        let binding = coordinator.bind(
            resource_key!["attempts", "dashboard"],
            fetcher,
            BindingOptions::new().with_poll_interval(Duration::from_secs(60)),
            |_| {},
        );
        tokio::task::yield_now().await;
        assert_eq!(binding.snapshot().data.unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(binding.snapshot().data.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_event_revalidates() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = paged_fetcher(&calls, vec![vec![AttemptRow { id: "a1", score: 80 }]]);

        let _binding = coordinator.bind(
            resource_key!["attempts", "dashboard"],
            fetcher,
            BindingOptions::new().with_revalidate_on_focus(),
            |_| {},
        );
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Within the dedupe window the focus firing is suppressed.
        coordinator.focus_signal().window_focused();
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(DEFAULT_DEDUPE_WINDOW + Duration::from_millis(1)).await;
        coordinator.focus_signal().page_visible();
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_does_not_cancel_shared_fetch() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = {
            let calls = calls.clone();
            fetcher_fn(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(vec![AttemptRow { id: "a1", score: 80 }])
                }
            })
        };
        let a_updates = Arc::new(AtomicUsize::new(0));
        let b_updates = Arc::new(AtomicUsize::new(0));

        let binding_a = {
            let a_updates = a_updates.clone();
            coordinator.bind(
                resource_key!["attempts", "dashboard"],
                fetcher.clone(),
                BindingOptions::new(),
                move |_| {
                    a_updates.fetch_add(1, Ordering::SeqCst);
                },
            )
        };
        let binding_b = {
            let b_updates = b_updates.clone();
            coordinator.bind(
                resource_key!["attempts", "dashboard"],
                fetcher.clone(),
                BindingOptions::new(),
                move |_| {
                    b_updates.fetch_add(1, Ordering::SeqCst);
                },
            )
        };
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A detaches mid-fetch; the shared task still settles for B.
        drop(binding_a);
        tokio::time::advance(Duration::from_millis(101)).await;
        tokio::task::yield_now().await;

        assert_eq!(a_updates.load(Ordering::SeqCst), 0);
        assert_eq!(b_updates.load(Ordering::SeqCst), 1);
        assert_eq!(binding_b.snapshot().data.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutate_and_revalidate_reconciles_with_server() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let server_rows = vec![AttemptRow { id: "a1", score: 80 }];
        let fetcher = paged_fetcher(&calls, vec![server_rows.clone()]);

        let binding = coordinator.bind(
            resource_key!["attempts", "dashboard"],
            fetcher,
            BindingOptions::new(),
            |_| {},
        );
        tokio::task::yield_now().await;

        let optimistic = vec![
            AttemptRow { id: "a1", score: 80 },
            AttemptRow { id: "pending", score: 0 },
        ];
        let reconcile = binding.mutate_and_revalidate(Mutation::value(optimistic.clone()));
        // The local write is applied before the future is awaited.
        assert_eq!(binding.snapshot().data, Some(optimistic));

        let settled = reconcile.await.unwrap();
        assert_eq!(settled, server_rows);
        assert_eq!(binding.snapshot().data, Some(server_rows));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebind_switches_keys_and_keeps_old_entry() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = paged_fetcher(
            &calls,
            vec![
                vec![AttemptRow { id: "a1", score: 80 }],
                vec![AttemptRow { id: "q1", score: 0 }],
            ],
        );
        let updates = Arc::new(Mutex::new(Vec::new()));

        let mut binding = {
            let updates = updates.clone();
            coordinator.bind(
                resource_key!["attempts", "frontend"],
                fetcher,
                BindingOptions::new(),
                move |snapshot: Snapshot<Vec<AttemptRow>>| {
                    updates.lock().unwrap().push(snapshot.data);
                },
            )
        };
        tokio::task::yield_now().await;
        assert_eq!(updates.lock().unwrap().len(), 1);

        binding.rebind(resource_key!["questions", "frontend"]);
        tokio::task::yield_now().await;

        assert_eq!(binding.snapshot().data, Some(vec![AttemptRow { id: "q1", score: 0 }]));
        // The old key's entry persists for a later rebind.
        let old = coordinator.store().snapshot(&resource_key!["attempts", "frontend"]);
        assert_eq!(old.data, Some(vec![AttemptRow { id: "a1", score: 80 }]));
        // Updates for the old key stop after detach.
        coordinator
            .store()
            .put_data(&resource_key!["attempts", "frontend"], vec![]);
        assert_eq!(updates.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_reaches_listener() {
        let coordinator = coordinator();
        let fetcher = fetcher_fn(|| async {
            Err::<Vec<AttemptRow>, _>(FetchError::Connection("refused".into()))
        });
        let errors = Arc::new(Mutex::new(Vec::new()));

        let binding = {
            let errors = errors.clone();
            coordinator.bind(
                resource_key!["attempts", "dashboard"],
                fetcher,
                BindingOptions::new(),
                move |snapshot: Snapshot<Vec<AttemptRow>>| {
                    errors.lock().unwrap().push(snapshot.error);
                },
            )
        };
        tokio::task::yield_now().await;

        assert_eq!(
            *errors.lock().unwrap(),
            vec![Some(FetchError::Connection("refused".into()))]
        );
        assert!(!binding.snapshot().loading);
    }
}
