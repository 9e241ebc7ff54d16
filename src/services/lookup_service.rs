//! Lookup service façade
//!
//! Owns the result cache and the listener registry, runs the provider only
//! while at least one observer is active, coalesces concurrent requests for
//! the same key and fans results out to listeners on the delivery context.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, info, warn};

use crate::config::LookupConfig;
use crate::errors::{AppError, AppResult, TransportResult};
use crate::models::{
    LifecycleState, LookupKey, LookupResponse, LookupServiceStats, RefreshPolicy,
};
use crate::services::delivery::DeliveryQueue;
use crate::services::fetch_executor::FetchExecutor;
use crate::services::key_normalizer::KeyNormalizer;
use crate::services::listener_registry::{ListenerHandle, ListenerRegistry};
use crate::services::result_cache::ResultCache;
use crate::services::traits::PhoneLookupTransport;

const EXECUTOR_NAME: &str = "phone-lookup";

/// Tunables for [`LookupService`]
#[derive(Debug, Clone, Default)]
pub struct LookupServiceSettings {
    pub refresh_policy: RefreshPolicy,
    pub max_fetch_workers: Option<usize>,
}

impl From<&LookupConfig> for LookupServiceSettings {
    fn from(config: &LookupConfig) -> Self {
        Self {
            refresh_policy: config.refresh_policy,
            max_fetch_workers: config.max_fetch_workers,
        }
    }
}

/// Mutable lifecycle state, always accessed under one lock
struct Lifecycle {
    state: LifecycleState,
    /// Bumped on every successful start; completions from an older
    /// generation are discarded
    generation: u64,
    executor: Option<FetchExecutor>,
    /// Closed executors whose tasks may still be running
    retired: Vec<FetchExecutor>,
    in_flight: HashSet<LookupKey>,
}

struct Inner {
    normalizer: KeyNormalizer,
    transport: Arc<dyn PhoneLookupTransport>,
    settings: LookupServiceSettings,
    cache: ResultCache,
    registry: ListenerRegistry,
    delivery: DeliveryQueue,
    observers: AtomicUsize,
    lifecycle: Mutex<Lifecycle>,
}

/// Caller-identity lookup service.
///
/// Cloning yields another handle to the same service. Construct one at the
/// composition root and hand clones to whatever raises observer events.
#[derive(Clone)]
pub struct LookupService {
    inner: Arc<Inner>,
}

impl LookupService {
    pub fn new(
        normalizer: KeyNormalizer,
        transport: Arc<dyn PhoneLookupTransport>,
        delivery: DeliveryQueue,
        settings: LookupServiceSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                normalizer,
                transport,
                settings,
                cache: ResultCache::new(),
                registry: ListenerRegistry::new(),
                delivery,
                observers: AtomicUsize::new(0),
                lifecycle: Mutex::new(Lifecycle {
                    state: LifecycleState::Stopped,
                    generation: 0,
                    executor: None,
                    retired: Vec::new(),
                    in_flight: HashSet::new(),
                }),
            }),
        }
    }

    /// An observer became active. The first one starts the service.
    ///
    /// Returns the new observer count.
    pub fn on_observer_arrive(&self) -> usize {
        let count = self.inner.observers.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Observer arrived ({} active)", count);
        if count == 1 {
            let mut lifecycle = self.inner.lifecycle.lock();
            if self.inner.observers.load(Ordering::SeqCst) > 0
                && lifecycle.state == LifecycleState::Stopped
            {
                self.inner.start(&mut lifecycle);
            }
        }
        count
    }

    /// An observer went away. The last one stops a running service.
    ///
    /// A departure with no active observers is reported as
    /// [`AppError::ObserverUnderflow`] and leaves the count at zero.
    pub fn on_observer_depart(&self) -> AppResult<usize> {
        let previous = self
            .inner
            .observers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            })
            .map_err(|_| {
                error!("Observer departure reported with no active observers");
                AppError::ObserverUnderflow
            })?;

        let count = previous - 1;
        debug!("Observer departed ({} active)", count);
        if count == 0 {
            let mut lifecycle = self.inner.lifecycle.lock();
            if self.inner.observers.load(Ordering::SeqCst) == 0
                && lifecycle.state == LifecycleState::Running
            {
                self.inner.stop(&mut lifecycle);
            }
        }
        Ok(count)
    }

    /// Drop every cached result. Lifecycle and listeners are untouched.
    pub fn on_low_memory(&self) {
        let dropped = self.inner.cache.len();
        self.inner.cache.clear();
        info!("Low memory: dropped {} cached lookup result(s)", dropped);
    }

    /// Stop the service regardless of the observer count
    pub fn shutdown(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state == LifecycleState::Running {
            self.inner.stop(&mut lifecycle);
        }
    }

    /// Wait for work handed to executors that have since been stopped.
    ///
    /// Fetches and spam reports keep running after the last observer
    /// departs; a caller about to exit awaits this so they are not cut off.
    pub async fn drain(&self) {
        let pending: Vec<_> = {
            let lifecycle = self.inner.lifecycle.lock();
            lifecycle.retired.iter().map(FetchExecutor::idle).collect()
        };
        for idle in pending {
            idle.await;
        }
    }

    /// Register `listener` for the canonical form of `raw`
    pub fn subscribe(&self, raw: &str, listener: &ListenerHandle) -> AppResult<LookupKey> {
        let key = self.inner.normalizer.normalize(raw)?;
        self.inner.registry.subscribe(&key, listener);
        Ok(key)
    }

    /// Remove one registration; unknown listeners are ignored
    pub fn unsubscribe(&self, raw: &str, listener: &ListenerHandle) -> AppResult<bool> {
        let key = self.inner.normalizer.normalize(raw)?;
        Ok(self.inner.registry.unsubscribe(&key, listener))
    }

    /// Remove every registration for the canonical form of `raw`
    pub fn unsubscribe_all(&self, raw: &str) -> AppResult<usize> {
        let key = self.inner.normalizer.normalize(raw)?;
        Ok(self.inner.registry.unsubscribe_all(&key))
    }

    /// Request caller information for `raw`.
    ///
    /// A cached result is delivered to the key's listeners on the calling
    /// thread unless `requery` is set. If the service is running a provider
    /// request is then dispatched (subject to the refresh policy and to
    /// coalescing with a request already in flight). Results surface only
    /// through listeners.
    pub fn lookup(&self, raw: &str, requery: bool) -> AppResult<()> {
        let key = self.inner.normalizer.normalize(raw)?;
        self.lookup_normalized(&key, requery);
        Ok(())
    }

    /// [`lookup`](Self::lookup) for a key that is already canonical
    pub fn lookup_normalized(&self, key: &LookupKey, requery: bool) {
        debug!("Lookup requested for {} (requery: {})", key, requery);

        let cached = if requery { None } else { self.inner.cache.get(key) };
        if let Some(cached) = &cached {
            let notified = self.inner.registry.notify_all(key, cached);
            debug!("Served {} from cache to {} listener(s)", key, notified);
            if self.inner.settings.refresh_policy == RefreshPolicy::WhenMissing {
                return;
            }
        }

        Inner::dispatch_fetch(&self.inner, key);
    }

    /// Report `raw` as spam to the provider.
    ///
    /// The cached result for the number is kept so the report can be undone
    /// without another lookup. A stopped service ignores the call.
    pub fn mark_as_spam(&self, raw: &str) -> AppResult<()> {
        let key = self.inner.normalizer.normalize(raw)?;
        self.mark_as_spam_normalized(&key);
        Ok(())
    }

    /// [`mark_as_spam`](Self::mark_as_spam) for a key that is already canonical
    pub fn mark_as_spam_normalized(&self, key: &LookupKey) {
        let lifecycle = self.inner.lifecycle.lock();
        let executor = match (&lifecycle.state, &lifecycle.executor) {
            (LifecycleState::Running, Some(executor)) => executor,
            _ => {
                debug!("Spam report for {} ignored: service not running", key);
                return;
            }
        };

        let transport = Arc::clone(&self.inner.transport);
        let key = key.clone();
        let submitted = executor.submit(async move {
            match transport.report_spam(&key).await {
                Ok(()) => info!("Reported {} as spam", key),
                Err(e) => warn!("Spam report for {} failed: {}", key, e),
            }
        });
        if !submitted {
            warn!("Spam report dropped: fetch executor closed");
        }
    }

    /// Whether the running provider accepts spam reports
    pub fn has_spam_reporting_capability(&self) -> bool {
        self.is_running() && self.inner.transport.supports_spam_reporting()
    }

    /// Provider name for attribution, `None` while stopped
    pub fn provider_display_name(&self) -> Option<String> {
        self.is_running()
            .then(|| self.inner.transport.provider_name())
    }

    /// Cached result for `raw`, without notifying anyone
    pub fn cached(&self, raw: &str) -> AppResult<Option<Arc<LookupResponse>>> {
        let key = self.inner.normalizer.normalize(raw)?;
        Ok(self.inner.cache.get(&key))
    }

    pub fn normalize(&self, raw: &str) -> AppResult<LookupKey> {
        self.inner.normalizer.normalize(raw)
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> LookupServiceStats {
        let lifecycle = self.inner.lifecycle.lock();
        LookupServiceStats {
            state: lifecycle.state,
            observers: self.inner.observers.load(Ordering::SeqCst),
            cached_results: self.inner.cache.len(),
            listener_keys: self.inner.registry.key_count(),
            listeners: self.inner.registry.listener_count(),
            in_flight: lifecycle.in_flight.len(),
            generation: lifecycle.generation,
        }
    }
}

impl Inner {
    /// Stopped -> Starting -> Running, or back to Stopped on failure
    fn start(&self, lifecycle: &mut Lifecycle) -> bool {
        lifecycle.state = LifecycleState::Starting;
        info!("Starting lookup service");

        let executor = match FetchExecutor::new(EXECUTOR_NAME, self.settings.max_fetch_workers) {
            Ok(executor) => executor,
            Err(e) => {
                warn!("Lookup service failed to start: {}", e);
                lifecycle.state = LifecycleState::Stopped;
                return false;
            }
        };

        if let Err(e) = self.transport.start() {
            warn!(
                "Lookup provider '{}' failed to start: {}",
                self.transport.provider_name(),
                e
            );
            executor.abort();
            lifecycle.state = LifecycleState::Stopped;
            return false;
        }

        lifecycle.generation += 1;
        lifecycle.executor = Some(executor);
        lifecycle.state = LifecycleState::Running;
        info!(
            "Lookup service running with provider '{}' (generation {})",
            self.transport.provider_name(),
            lifecycle.generation
        );
        true
    }

    /// Running -> Stopped. Requests already handed to the provider are not
    /// cancelled; their results are discarded on arrival.
    fn stop(&self, lifecycle: &mut Lifecycle) {
        info!("Stopping lookup service");
        lifecycle.retired.retain(|executor| executor.outstanding() > 0);
        if let Some(executor) = lifecycle.executor.take() {
            executor.close();
            lifecycle.retired.push(executor);
        }
        self.transport.stop();

        let cached = self.cache.len();
        let listeners = self.registry.listener_count();
        self.cache.clear();
        self.registry.clear();
        lifecycle.in_flight.clear();
        lifecycle.state = LifecycleState::Stopped;
        info!(
            "Lookup service stopped (dropped {} cached result(s), {} listener(s))",
            cached, listeners
        );
    }

    fn dispatch_fetch(this: &Arc<Self>, key: &LookupKey) {
        let mut lifecycle = this.lifecycle.lock();
        if lifecycle.state != LifecycleState::Running {
            debug!("Not dispatching {}: service {}", key, lifecycle.state);
            return;
        }
        if lifecycle.in_flight.contains(key) {
            debug!("Request for {} already in flight; coalescing", key);
            return;
        }
        let generation = lifecycle.generation;
        let Some(executor) = lifecycle.executor.as_ref() else {
            return;
        };

        let inner = Arc::clone(this);
        let task_key = key.clone();
        // The guard is built when the task first runs; a task dropped
        // unsubmitted must not touch the lifecycle lock held here
        let submitted = executor.submit(async move {
            let mut guard = InFlightGuard {
                inner,
                key: task_key,
                generation,
                armed: true,
            };
            let outcome = guard.inner.transport.fetch(&guard.key).await;
            guard.armed = false;
            Inner::complete_fetch(&guard.inner, guard.key.clone(), generation, outcome);
        });

        if submitted {
            lifecycle.in_flight.insert(key.clone());
            debug!("Dispatched provider request for {}", key);
        } else {
            warn!("Provider request for {} dropped: fetch executor closed", key);
        }
    }

    /// Runs on a fetch worker when the provider answers
    fn complete_fetch(
        this: &Arc<Self>,
        key: LookupKey,
        generation: u64,
        outcome: TransportResult<LookupResponse>,
    ) {
        let response = match outcome {
            Ok(response) => Arc::new(response),
            Err(e) => {
                warn!("Provider request for {} failed: {}", key, e);
                this.release_in_flight(&key, generation);
                return;
            }
        };

        let inner = Arc::clone(this);
        let delivery_key = key.clone();
        let posted = this
            .delivery
            .post(move || inner.deliver(delivery_key, generation, response));
        if !posted {
            warn!("Result for {} dropped: delivery context is gone", key);
            this.release_in_flight(&key, generation);
        }
    }

    /// Runs on the delivery context: store, then notify current listeners
    fn deliver(&self, key: LookupKey, generation: u64, response: Arc<LookupResponse>) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.generation != generation || lifecycle.state != LifecycleState::Running {
                debug!(
                    "Ignoring late result for {} from generation {} (service {}, generation {})",
                    key, generation, lifecycle.state, lifecycle.generation
                );
                return;
            }
            lifecycle.in_flight.remove(&key);
            self.cache.put(key.clone(), Arc::clone(&response));
        }

        let notified = self.registry.notify_all(&key, &response);
        debug!("Delivered result for {} to {} listener(s)", key, notified);
    }

    fn release_in_flight(&self, key: &LookupKey, generation: u64) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation == generation {
            lifecycle.in_flight.remove(key);
        }
    }
}

/// Frees the in-flight slot when a fetch task ends without an outcome,
/// whether the provider panicked or the task was cancelled
struct InFlightGuard {
    inner: Arc<Inner>,
    key: LookupKey,
    generation: u64,
    armed: bool,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!("Provider request for {} ended without a result", self.key);
            self.inner.release_in_flight(&self.key, self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::services::traits::MockPhoneLookupTransport;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn service_with(mock: MockPhoneLookupTransport, delivery: DeliveryQueue) -> LookupService {
        LookupService::new(
            KeyNormalizer::new("US").unwrap(),
            Arc::new(mock),
            delivery,
            LookupServiceSettings::default(),
        )
    }

    fn permissive_mock() -> MockPhoneLookupTransport {
        let mut mock = MockPhoneLookupTransport::new();
        mock.expect_start().returning(|| Ok(()));
        mock.expect_stop().return_const(());
        mock.expect_provider_name()
            .returning(|| "Mock Directory".to_string());
        mock
    }

    #[tokio::test]
    async fn capability_queries_follow_the_lifecycle() {
        let (delivery, _loop) = DeliveryQueue::spawn();
        let mut mock = permissive_mock();
        mock.expect_supports_spam_reporting().return_const(true);
        let service = service_with(mock, delivery);

        assert!(!service.has_spam_reporting_capability());
        assert_eq!(service.provider_display_name(), None);

        service.on_observer_arrive();
        assert!(service.has_spam_reporting_capability());
        assert_eq!(
            service.provider_display_name().as_deref(),
            Some("Mock Directory")
        );

        service.on_observer_depart().unwrap();
        assert!(!service.has_spam_reporting_capability());
        assert_eq!(service.provider_display_name(), None);
    }

    #[tokio::test]
    async fn failed_provider_start_leaves_service_stopped() {
        let (delivery, _loop) = DeliveryQueue::spawn();
        let mut mock = MockPhoneLookupTransport::new();
        mock.expect_start()
            .returning(|| Err(TransportError::unavailable("mock", "offline")));
        mock.expect_provider_name().returning(|| "mock".to_string());
        mock.expect_fetch().never();
        let service = service_with(mock, delivery);

        assert_eq!(service.on_observer_arrive(), 1);
        assert_eq!(service.state(), LifecycleState::Stopped);
        service.lookup("5551234567", false).unwrap();
        assert_eq!(service.stats().in_flight, 0);

        // Bookkeeping still applies, and stop is not attempted
        assert_eq!(service.on_observer_depart().unwrap(), 0);
    }

    #[tokio::test]
    async fn spam_reports_are_forwarded_only_while_running() {
        let (delivery, _loop) = DeliveryQueue::spawn();
        let mut mock = permissive_mock();
        mock.expect_report_spam()
            .withf(|key: &LookupKey| key.as_str() == "+15551234567")
            .times(1)
            .returning(|_| Ok(()));
        let service = service_with(mock, delivery);

        service.mark_as_spam("555-123-4567").unwrap();

        service.on_observer_arrive();
        service.mark_as_spam("555-123-4567").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        service.on_observer_depart().unwrap();
    }

    #[tokio::test]
    async fn empty_keys_are_rejected_synchronously() {
        let (delivery, _loop) = DeliveryQueue::spawn();
        let service = service_with(permissive_mock(), delivery);

        assert!(matches!(
            service.lookup("", false),
            Err(AppError::InvalidArgument { .. })
        ));
        assert!(matches!(
            service.mark_as_spam(""),
            Err(AppError::InvalidArgument { .. })
        ));
        let listener: ListenerHandle = Arc::new(|_: &LookupResponse| {});
        assert!(service.subscribe("", &listener).is_err());
    }

    #[tokio::test]
    async fn provider_failures_release_the_key_for_a_retry() {
        let (delivery, _loop) = DeliveryQueue::spawn();
        let mut mock = permissive_mock();
        let mut calls = 0;
        mock.expect_fetch().times(2).returning(move |key: &LookupKey| {
            calls += 1;
            if calls == 1 {
                Err(TransportError::Timeout {
                    target: key.to_string(),
                })
            } else {
                Ok(LookupResponse::new(key.as_str()).with_name("Second Try"))
            }
        });
        let service = service_with(mock, delivery.clone());
        service.on_observer_arrive();

        service.lookup("5551234567", false).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(service.stats().in_flight, 0);
        assert!(service.cached("5551234567").unwrap().is_none());

        service.lookup("5551234567", false).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        delivery.flush().await;
        assert_eq!(
            service.cached("5551234567").unwrap().unwrap().name.as_deref(),
            Some("Second Try")
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn results_from_an_earlier_generation_are_discarded() {
        let (delivery, _loop) = DeliveryQueue::spawn();
        let service = service_with(permissive_mock(), delivery);
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let listener: ListenerHandle = Arc::new(move |_: &LookupResponse| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        service.on_observer_arrive();
        service.on_observer_depart().unwrap();
        service.on_observer_arrive();
        assert_eq!(service.stats().generation, 2);

        let key = service.subscribe("5551234567", &listener).unwrap();
        let stale = Arc::new(LookupResponse::new(key.as_str()).with_name("Stale"));
        service.inner.deliver(key.clone(), 1, stale);

        assert!(service.cached("5551234567").unwrap().is_none());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert!(logs_contain("Ignoring late result"));
    }

    #[tokio::test]
    #[traced_test]
    async fn departure_without_arrival_is_an_error() {
        let (delivery, _loop) = DeliveryQueue::spawn();
        let service = service_with(permissive_mock(), delivery);

        assert!(matches!(
            service.on_observer_depart(),
            Err(AppError::ObserverUnderflow)
        ));
        assert_eq!(service.observer_count(), 0);
        assert_eq!(service.state(), LifecycleState::Stopped);
        assert!(logs_contain("no active observers"));

        // The count recovers normally afterwards
        assert_eq!(service.on_observer_arrive(), 1);
        assert_eq!(service.on_observer_depart().unwrap(), 0);
    }
}
