use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::derived_values;
use crate::snapshot::{RawPayload, Snapshot};
use crate::sunthalpy_client::{ApiError, SunthalpyClient};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Failed polls back off geometrically from the poll interval up to this
/// cap, then hold steady until the next success.
const BACKOFF_CAP: Duration = Duration::from_secs(900);

/// Anything the coordinator can poll for a full status payload.
pub trait StatusSource: Send {
    fn fetch(&mut self) -> impl Future<Output = Result<RawPayload, ApiError>> + Send;
}

impl StatusSource for SunthalpyClient {
    fn fetch(&mut self) -> impl Future<Output = Result<RawPayload, ApiError>> + Send {
        self.fetch_status()
    }
}

/// Receives every new snapshot, synchronously, on the poll turn. All
/// consumers of one cycle see the same snapshot reference.
pub trait SnapshotConsumer: Send + Sync {
    fn on_snapshot(&mut self, snapshot: &Snapshot);
}

/// Host-visible condition of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Ok,
    /// Retrying under backoff; the previous snapshot stays visible.
    Unavailable,
    /// Credentials were rejected. Automatic polling stops until an explicit
    /// refresh (i.e. until the host reconfigures).
    NeedsReauthentication,
}

#[derive(Debug)]
struct SharedState {
    snapshot: Option<Arc<Snapshot>>,
    health: Health,
    last_update_success: bool,
}

/// Cheap cloneable view of the coordinator for the host: latest snapshot,
/// health, and an immediate-refresh trigger.
#[derive(Clone)]
pub struct CoordinatorHandle {
    shared: Arc<Mutex<SharedState>>,
    refresh_requested: Arc<AtomicBool>,
    refresh_notify: Arc<Notify>,
}

impl CoordinatorHandle {
    /// Asks for a poll as soon as possible. Requests arriving while a poll
    /// is already in flight are satisfied by that poll and add no request.
    pub fn request_refresh(&self) {
        self.refresh_requested.store(true, Ordering::SeqCst);
        self.refresh_notify.notify_one();
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.lock().snapshot.clone()
    }

    pub fn health(&self) -> Health {
        self.lock().health
    }

    pub fn last_update_success(&self) -> bool {
        self.lock().last_update_success
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SharedState> {
        self.shared.lock().expect("coordinator state lock poisoned")
    }
}

/// Token returned by consumer registration, for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerId(usize);

/// Owns the single shared poll cycle: fetches on a timer, classifies
/// failures, and fans each successful snapshot out to every consumer
/// exactly once.
pub struct UpdateCoordinator<S: StatusSource> {
    source: S,
    poll_interval: Duration,
    backoff_cap: Duration,
    consumers: Vec<(ConsumerId, Box<dyn SnapshotConsumer>)>,
    next_consumer_id: usize,
    consecutive_failures: u32,
    handle: CoordinatorHandle,
}

impl<S: StatusSource> UpdateCoordinator<S> {
    pub fn new(source: S, poll_interval: Duration) -> Self {
        Self {
            source,
            poll_interval,
            backoff_cap: BACKOFF_CAP,
            consumers: Vec::new(),
            next_consumer_id: 0,
            consecutive_failures: 0,
            handle: CoordinatorHandle {
                shared: Arc::new(Mutex::new(SharedState {
                    snapshot: None,
                    health: Health::Unavailable,
                    last_update_success: false,
                })),
                refresh_requested: Arc::new(AtomicBool::new(false)),
                refresh_notify: Arc::new(Notify::new()),
            },
        }
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    pub fn register_consumer(&mut self, consumer: Box<dyn SnapshotConsumer>) -> ConsumerId {
        let id = ConsumerId(self.next_consumer_id);
        self.next_consumer_id += 1;
        self.consumers.push((id, consumer));
        id
    }

    pub fn unregister_consumer(&mut self, id: ConsumerId) -> bool {
        let before = self.consumers.len();
        self.consumers.retain(|(existing, _)| *existing != id);
        self.consumers.len() != before
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay before the next automatic poll: the plain interval after a
    /// success, the capped geometric backoff while failing.
    pub fn next_delay(&self) -> Duration {
        backoff_delay(self.poll_interval, self.consecutive_failures, self.backoff_cap)
    }

    /// Runs one full poll cycle. Returns whether it succeeded.
    pub async fn poll_once(&mut self) -> bool {
        debug!("polling remote service");
        match self.source.fetch().await {
            Ok(payload) => {
                let previous = self.handle.latest();
                let mut snapshot = Snapshot::new(Utc::now(), payload);
                derived_values::enrich(&mut snapshot, previous.as_deref());
                let snapshot = Arc::new(snapshot);
                {
                    let mut shared = self.handle.lock();
                    shared.snapshot = Some(Arc::clone(&snapshot));
                    shared.health = Health::Ok;
                    shared.last_update_success = true;
                }
                if self.consecutive_failures > 0 {
                    info!(
                        failures = self.consecutive_failures,
                        "recovered after failed polls"
                    );
                }
                self.consecutive_failures = 0;
                for (_, consumer) in &mut self.consumers {
                    consumer.on_snapshot(&snapshot);
                }
                true
            }
            Err(err) => {
                self.consecutive_failures += 1;
                let health = if err.is_retryable() {
                    Health::Unavailable
                } else {
                    Health::NeedsReauthentication
                };
                {
                    // the previous snapshot stays visible: stale but available
                    let mut shared = self.handle.lock();
                    shared.health = health;
                    shared.last_update_success = false;
                }
                warn!(
                    failures = self.consecutive_failures,
                    "poll failed: {err}"
                );
                false
            }
        }
    }

    /// Drives the poll cycle until shutdown. An in-flight request is
    /// abandoned when shutdown arrives; nothing from it is committed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.poll_interval.as_secs(), "update coordinator starting");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.poll_once() => {}
            }
            // refresh requests that arrived while that poll was in flight
            // are satisfied by it; they do not queue another request
            self.handle.refresh_requested.store(false, Ordering::SeqCst);

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.wait_for_trigger() => {}
            }
        }
        info!("update coordinator stopped");
    }

    async fn wait_for_trigger(&self) {
        let refresh = async {
            loop {
                self.handle.refresh_notify.notified().await;
                if self.handle.refresh_requested.swap(false, Ordering::SeqCst) {
                    break;
                }
            }
        };
        if self.handle.health() == Health::NeedsReauthentication {
            // bad credentials: the timer stops, only an explicit refresh
            // (after reconfiguration) resumes polling
            refresh.await;
        } else {
            tokio::select! {
                _ = sleep(self.next_delay()) => {}
                _ = refresh => {
                    debug!("immediate refresh requested");
                }
            }
        }
    }
}

/// Geometric backoff from `base`, capped. Zero failures means the regular
/// interval.
pub fn backoff_delay(base: Duration, failures: u32, cap: Duration) -> Duration {
    if failures == 0 {
        return base;
    }
    let exponent = failures.saturating_sub(1).min(10);
    base.saturating_mul(1 << exponent).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor_catalog::fields;
    use crate::snapshot::DeviceGroup;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use tokio::time::timeout;

    fn payload_with_power(kw: f64) -> RawPayload {
        let mut payload = RawPayload::new();
        for group in DeviceGroup::REMOTE {
            payload.insert(group, Default::default());
        }
        payload
            .get_mut(&DeviceGroup::OtherData)
            .unwrap()
            .insert("133".to_string(), json!(kw));
        payload
    }

    struct ScriptedSource {
        responses: VecDeque<Result<RawPayload, ApiError>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<RawPayload, ApiError>>) -> Self {
            Self {
                responses: responses.into(),
            }
        }
    }

    impl StatusSource for ScriptedSource {
        fn fetch(&mut self) -> impl Future<Output = Result<RawPayload, ApiError>> + Send {
            let next = self
                .responses
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::Transient("script exhausted".to_string())));
            async move { next }
        }
    }

    /// Source that takes a while and tracks how many requests overlap.
    struct SlowSource {
        active: Arc<AtomicU32>,
        max_active: Arc<AtomicU32>,
        calls: Arc<AtomicU32>,
    }

    impl StatusSource for SlowSource {
        fn fetch(&mut self) -> impl Future<Output = Result<RawPayload, ApiError>> + Send {
            let active = Arc::clone(&self.active);
            let max_active = Arc::clone(&self.max_active);
            let calls = Arc::clone(&self.calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(150)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(payload_with_power(1.0))
            }
        }
    }

    struct CountingConsumer {
        seen: Arc<AtomicU32>,
    }

    impl SnapshotConsumer for CountingConsumer {
        fn on_snapshot(&mut self, _snapshot: &Snapshot) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_backoff_sequence_is_nondecreasing_and_capped() {
        let base = Duration::from_secs(30);
        let cap = Duration::from_secs(900);

        assert_eq!(backoff_delay(base, 0, cap), base);
        assert_eq!(backoff_delay(base, 1, cap), Duration::from_secs(30));
        assert_eq!(backoff_delay(base, 2, cap), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, 3, cap), Duration::from_secs(120));

        let mut previous = Duration::ZERO;
        for failures in 1..64 {
            let delay = backoff_delay(base, failures, cap);
            assert!(delay >= previous);
            assert!(delay <= cap);
            previous = delay;
        }
        assert_eq!(previous, cap);
    }

    #[tokio::test]
    async fn test_success_swaps_snapshot_and_notifies_consumers() {
        let seen = Arc::new(AtomicU32::new(0));
        let mut coordinator = UpdateCoordinator::new(
            ScriptedSource::new(vec![Ok(payload_with_power(2.0))]),
            Duration::from_secs(60),
        );
        coordinator.register_consumer(Box::new(CountingConsumer {
            seen: Arc::clone(&seen),
        }));
        let handle = coordinator.handle();

        assert!(handle.latest().is_none());
        assert!(coordinator.poll_once().await);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(handle.health(), Health::Ok);
        assert!(handle.last_update_success());
        let snapshot = handle.latest().unwrap();
        assert_eq!(snapshot.numeric(fields::HEATING_POWER), Some(2.0));
        // the calculated group was added before fan-out
        assert!(snapshot.raw(fields::AERO_MODE).is_some());
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_snapshot_visible() {
        let mut coordinator = UpdateCoordinator::new(
            ScriptedSource::new(vec![
                Ok(payload_with_power(2.0)),
                Err(ApiError::Transient("connection reset".to_string())),
            ]),
            Duration::from_secs(60),
        );
        let handle = coordinator.handle();

        assert!(coordinator.poll_once().await);
        let before = handle.latest().unwrap();

        assert!(!coordinator.poll_once().await);
        assert_eq!(coordinator.consecutive_failures(), 1);
        assert_eq!(handle.health(), Health::Unavailable);
        assert!(!handle.last_update_success());
        assert!(Arc::ptr_eq(&handle.latest().unwrap(), &before));
    }

    #[tokio::test]
    async fn test_failure_counter_resets_on_success() {
        let mut coordinator = UpdateCoordinator::new(
            ScriptedSource::new(vec![
                Err(ApiError::Transient("timeout".to_string())),
                Err(ApiError::Transient("timeout".to_string())),
                Err(ApiError::Protocol("truncated body".to_string())),
                Ok(payload_with_power(1.0)),
            ]),
            Duration::from_secs(30),
        );

        let mut delays = Vec::new();
        for _ in 0..3 {
            coordinator.poll_once().await;
            delays.push(coordinator.next_delay());
        }
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));

        assert!(coordinator.poll_once().await);
        assert_eq!(coordinator.consecutive_failures(), 0);
        assert_eq!(coordinator.next_delay(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_auth_rejection_surfaces_needs_reauthentication() {
        let mut coordinator = UpdateCoordinator::new(
            ScriptedSource::new(vec![Err(ApiError::AuthRejected)]),
            Duration::from_secs(60),
        );
        let handle = coordinator.handle();

        assert!(!coordinator.poll_once().await);
        assert_eq!(handle.health(), Health::NeedsReauthentication);
    }

    #[tokio::test]
    async fn test_unregistered_consumer_is_not_notified() {
        let seen = Arc::new(AtomicU32::new(0));
        let mut coordinator = UpdateCoordinator::new(
            ScriptedSource::new(vec![
                Ok(payload_with_power(1.0)),
                Ok(payload_with_power(1.0)),
            ]),
            Duration::from_secs(60),
        );
        let id = coordinator.register_consumer(Box::new(CountingConsumer {
            seen: Arc::clone(&seen),
        }));

        coordinator.poll_once().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        assert!(coordinator.unregister_consumer(id));
        assert!(!coordinator.unregister_consumer(id));
        coordinator.poll_once().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_poll_in_flight() {
        let active = Arc::new(AtomicU32::new(0));
        let max_active = Arc::new(AtomicU32::new(0));
        let calls = Arc::new(AtomicU32::new(0));
        let coordinator = UpdateCoordinator::new(
            SlowSource {
                active: Arc::clone(&active),
                max_active: Arc::clone(&max_active),
                calls: Arc::clone(&calls),
            },
            Duration::from_secs(60),
        );
        let handle = coordinator.handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(coordinator.run(shutdown_rx));

        // hammer refresh requests while the first poll is still in flight
        for _ in 0..20 {
            handle.request_refresh();
            sleep(Duration::from_millis(5)).await;
        }

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_refresh_requests_coalesce_during_poll() {
        let active = Arc::new(AtomicU32::new(0));
        let max_active = Arc::new(AtomicU32::new(0));
        let calls = Arc::new(AtomicU32::new(0));
        let coordinator = UpdateCoordinator::new(
            SlowSource {
                active: Arc::clone(&active),
                max_active: Arc::clone(&max_active),
                calls: Arc::clone(&calls),
            },
            Duration::from_secs(60),
        );
        let handle = coordinator.handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(coordinator.run(shutdown_rx));

        // several requests inside one in-flight poll window
        sleep(Duration::from_millis(10)).await;
        for _ in 0..5 {
            handle.request_refresh();
        }
        sleep(Duration::from_millis(300)).await;

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();

        // the burst coalesced: only the initial poll happened, the requests
        // were satisfied by the poll already in flight
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
