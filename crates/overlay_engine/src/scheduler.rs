//! Decides when the snapshot for a scrub position is fetched.
//!
//! Every scrub change is reduced to a cache key (snapped hour plus mode).
//! Changes that keep the key never reach the network; the record already
//! held for that key is redrawn at the new instant. New keys go through a
//! trailing throttle: at most one fetch per interval while scrubbing
//! continues and always one more for the position the user stopped on.
//!
//! Results are cached under the key they were requested for, whether or
//! not anyone still wants them. They are only handed to the sink if that
//! key is still the latest one requested, drawn at the latest instant.
//! A key is never fetched twice concurrently.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{DataService, TemporalMode};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::data_cache::{cache_key, CacheRecord, OverlayDataCache};
use crate::throttle::{ThrottleDecision, TrailingThrottle};
use crate::time_snap::snap_to_hour;

/// Receives every snapshot that should be drawn.
///
/// Called with identical arguments whether the record came from the
/// network or from the cache.
pub trait SnapshotSink: Send + Sync {
    fn apply(&self, record: Arc<CacheRecord>, instant: DateTime<Utc>, mode: TemporalMode);
}

/// One resolved scrub position.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub key: String,
    pub instant: DateTime<Utc>,
    pub mode: TemporalMode,
    /// Past, but inside the current hour: served by the latest-flow query.
    pub live: bool,
}

impl FetchRequest {
    pub fn resolve(instant: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let mode = TemporalMode::classify(instant, now);
        Self {
            key: cache_key(instant, mode),
            instant,
            mode,
            live: mode == TemporalMode::Past && snap_to_hour(instant) == snap_to_hour(now),
        }
    }

    /// Whether flows come from the latest-flow query rather than history.
    fn uses_latest_flows(&self) -> bool {
        self.live || self.mode == TemporalMode::Forecast
    }
}

/// The position the user is currently on.
#[derive(Debug, Clone)]
struct LatestRequest {
    key: String,
    instant: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub fetches: u64,
    pub failed_fetches: u64,
    pub cache_hits: u64,
    pub short_circuits: u64,
}

#[derive(Debug, Default)]
struct Counters {
    fetches: AtomicU64,
    failed_fetches: AtomicU64,
    cache_hits: AtomicU64,
    short_circuits: AtomicU64,
}

struct Shared {
    service: Arc<dyn DataService>,
    cache: Arc<OverlayDataCache>,
    sink: Arc<dyn SnapshotSink>,
    throttle: Mutex<TrailingThrottle>,
    latest: Mutex<Option<LatestRequest>>,
    /// Keys with a fetch on the wire.
    fetching: Mutex<HashSet<String>>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    counters: Counters,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct FetchScheduler {
    shared: Arc<Shared>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl FetchScheduler {
    pub fn new(
        service: Arc<dyn DataService>,
        cache: Arc<OverlayDataCache>,
        sink: Arc<dyn SnapshotSink>,
        interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                service,
                cache,
                sink,
                throttle: Mutex::new(TrailingThrottle::new(interval)),
                latest: Mutex::new(None),
                fetching: Mutex::new(HashSet::new()),
                in_flight: Mutex::new(Vec::new()),
                counters: Counters::default(),
                closed: AtomicBool::new(false),
            }),
            pending: Mutex::new(None),
        }
    }

    /// React to a new scrub position. Must be called within a Tokio runtime.
    pub fn on_scrub(&self, instant: DateTime<Utc>, now: DateTime<Utc>) {
        if self.shared.closed.load(Ordering::SeqCst) {
            return;
        }
        let request = FetchRequest::resolve(instant, now);

        let same_key = {
            let mut latest = lock(&self.shared.latest);
            let same_key = latest.as_ref().is_some_and(|l| l.key == request.key);
            *latest = Some(LatestRequest {
                key: request.key.clone(),
                instant: request.instant,
            });
            same_key
        };
        if same_key {
            self.shared.counters.short_circuits.fetch_add(1, Ordering::Relaxed);
            self.shared.redraw(&request);
            return;
        }

        let mut pending = lock(&self.pending);
        if let Some(deferred) = pending.take() {
            deferred.abort();
        }

        let decision = lock(&self.shared.throttle).decide(Instant::now());
        match decision {
            ThrottleDecision::FireNow => {
                lock(&self.shared.throttle).mark_fired(Instant::now());
                Shared::launch(&self.shared, request);
            }
            ThrottleDecision::Defer(delay) => {
                debug!("deferring {} by {:?}", request.key, delay);
                let shared = Arc::clone(&self.shared);
                *pending = Some(tokio::spawn(async move {
                    sleep(delay).await;
                    lock(&shared.throttle).mark_fired(Instant::now());
                    // Spawned separately so a later abort of this timer
                    // never cancels a fetch that already started.
                    Shared::launch(&shared, request);
                }));
            }
        }
    }

    /// The most recently requested cache key.
    pub fn latest_key(&self) -> Option<String> {
        lock(&self.shared.latest).as_ref().map(|l| l.key.clone())
    }

    /// Timers and fetches that have not finished yet.
    pub fn pending_tasks(&self) -> usize {
        let deferred = lock(&self.pending)
            .as_ref()
            .map_or(0, |h| usize::from(!h.is_finished()));
        let in_flight = lock(&self.shared.in_flight)
            .iter()
            .filter(|h| !h.is_finished())
            .count();
        deferred + in_flight
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.shared.counters;
        SchedulerStats {
            fetches: c.fetches.load(Ordering::Relaxed),
            failed_fetches: c.failed_fetches.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            short_circuits: c.short_circuits.load(Ordering::Relaxed),
        }
    }

    /// Cancel the deferred timer and every in-flight fetch. Idempotent.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(deferred) = lock(&self.pending).take() {
            deferred.abort();
        }
        for handle in lock(&self.shared.in_flight).drain(..) {
            handle.abort();
        }
    }
}

impl Drop for FetchScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn launch(shared: &Arc<Self>, request: FetchRequest) {
        if shared.closed.load(Ordering::SeqCst) {
            return;
        }
        let task = tokio::spawn(Self::process(Arc::clone(shared), request));
        let mut in_flight = lock(&shared.in_flight);
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(task);
    }

    async fn process(shared: Arc<Self>, request: FetchRequest) {
        let record = match shared.cache.get(&request.key) {
            Some(record) => {
                shared.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!("cache hit for {}", request.key);
                record
            }
            None => {
                if !lock(&shared.fetching).insert(request.key.clone()) {
                    debug!("{} already on the wire; joining that fetch", request.key);
                    return;
                }
                let record = shared.fetch(&request).await;
                let record = shared.cache.put(record);
                lock(&shared.fetching).remove(&request.key);
                record
            }
        };

        if shared.closed.load(Ordering::SeqCst) {
            return;
        }
        let instant = match lock(&shared.latest).as_ref() {
            Some(latest) if latest.key == request.key => latest.instant,
            _ => {
                debug!("{} superseded; cached without drawing", request.key);
                return;
            }
        };
        shared.sink.apply(record, instant, request.mode);
    }

    /// Redraw what is already held for the request's key at its instant.
    /// Expired records still qualify: they are what is on screen.
    fn redraw(&self, request: &FetchRequest) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(record) = self.cache.peek(&request.key) {
            debug!("redrawing {} at {}", request.key, request.instant);
            self.sink.apply(record, request.instant, request.mode);
        }
    }

    /// Flows, prices and generator output for the request's hour. Each part
    /// may fail on its own.
    async fn fetch(&self, request: &FetchRequest) -> CacheRecord {
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let hour = snap_to_hour(request.instant);
        let service = &self.service;

        let flows = async {
            if request.uses_latest_flows() {
                service.fetch_flow_now().await
            } else {
                service.fetch_flow_at_time(hour).await
            }
        };
        let (flows, prices, generators) = tokio::join!(
            flows,
            service.fetch_prices_at_time(hour),
            service.fetch_generators_at_time(hour),
        );

        let flows = flows
            .map_err(|e| warn!("flow fetch for {} failed: {}", request.key, e))
            .ok();
        let prices = prices
            .map_err(|e| warn!("price fetch for {} failed: {}", request.key, e))
            .ok();
        let generators = generators
            .map_err(|e| warn!("generator fetch for {} failed: {}", request.key, e))
            .ok();
        if flows.is_none() || prices.is_none() || generators.is_none() {
            self.counters.failed_fetches.fetch_add(1, Ordering::Relaxed);
        }

        CacheRecord::from_fetch(request.key.clone(), request.instant, request.mode, flows, prices)
            .with_generators(request.instant, generators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDataService, ServiceCall};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use common::FlowEntry;

    #[derive(Default)]
    struct RecordingSink {
        applied: Mutex<Vec<(String, DateTime<Utc>, usize)>>,
    }

    impl RecordingSink {
        fn keys(&self) -> Vec<String> {
            self.applied.lock().unwrap().iter().map(|(k, _, _)| k.clone()).collect()
        }
    }

    impl SnapshotSink for RecordingSink {
        fn apply(&self, record: Arc<CacheRecord>, instant: DateTime<Utc>, _mode: TemporalMode) {
            self.applied
                .lock()
                .unwrap()
                .push((record.key.clone(), instant, record.flow_by_group.len()));
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 14, 20, 0).unwrap()
    }

    fn hours_ago(h: i64) -> DateTime<Utc> {
        now() - ChronoDuration::hours(h)
    }

    fn quebec(mw: f64) -> FlowEntry {
        FlowEntry {
            group_key: "QUEBEC".into(),
            megawatts: mw,
            observed_at: now(),
        }
    }

    struct Harness {
        service: Arc<MockDataService>,
        cache: Arc<OverlayDataCache>,
        sink: Arc<RecordingSink>,
        scheduler: FetchScheduler,
    }

    fn harness() -> Harness {
        let service = Arc::new(MockDataService::with_flows(vec![quebec(500.0)]));
        let cache = Arc::new(OverlayDataCache::new(Duration::from_secs(60), 64));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = FetchScheduler::new(
            service.clone(),
            cache.clone(),
            sink.clone(),
            Duration::from_millis(500),
        );
        Harness {
            service,
            cache,
            sink,
            scheduler,
        }
    }

    #[test]
    fn test_resolve_live_past_and_forecast() {
        let live = FetchRequest::resolve(now() - ChronoDuration::minutes(5), now());
        assert!(live.live);
        assert_eq!(live.mode, TemporalMode::Past);
        assert!(live.uses_latest_flows());

        let past = FetchRequest::resolve(hours_ago(2), now());
        assert!(!past.live);
        assert!(!past.uses_latest_flows());
        assert!(past.key.ends_with(":p"));

        let at_now = FetchRequest::resolve(now(), now());
        assert_eq!(at_now.mode, TemporalMode::Past);

        let forecast = FetchRequest::resolve(now() + ChronoDuration::hours(3), now());
        assert_eq!(forecast.mode, TemporalMode::Forecast);
        assert!(forecast.uses_latest_flows());
        assert!(forecast.key.ends_with(":f"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fetches_first_and_last_only() {
        let h = harness();
        for i in 0..50 {
            h.scheduler.on_scrub(hours_ago(i + 1), now());
            sleep(Duration::from_millis(10)).await;
        }
        sleep(Duration::from_millis(600)).await;

        assert_eq!(
            h.service.flow_calls(),
            vec![
                ServiceCall::FlowAt(snap_to_hour(hours_ago(1))),
                ServiceCall::FlowAt(snap_to_hour(hours_ago(50))),
            ]
        );
        assert_eq!(h.scheduler.stats().fetches, 2);
        assert_eq!(
            h.sink.keys().last(),
            Some(&cache_key(hours_ago(50), TemporalMode::Past))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_motion_is_not_starved() {
        let h = harness();
        // 2 seconds of motion: a debounce would fetch once, at the end.
        for i in 0..200 {
            h.scheduler.on_scrub(hours_ago(i + 1), now());
            sleep(Duration::from_millis(10)).await;
        }
        let during = h.scheduler.stats().fetches;
        assert!(during >= 4, "fetched {during} times while scrubbing");
        sleep(Duration::from_millis(600)).await;
        assert!(h.scheduler.stats().fetches <= 2000 / 500 + 1);
        assert_eq!(
            h.service.flow_calls().last(),
            Some(&ServiceCall::FlowAt(snap_to_hour(hours_ago(200))))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_short_circuits() {
        let h = harness();
        let base = snap_to_hour(hours_ago(3));
        h.scheduler.on_scrub(base + ChronoDuration::minutes(5), now());
        h.scheduler.on_scrub(base + ChronoDuration::minutes(35), now());
        h.scheduler.on_scrub(base + ChronoDuration::minutes(55), now());
        sleep(Duration::from_millis(50)).await;

        let stats = h.scheduler.stats();
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.short_circuits, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_redraws_at_new_instant() {
        let h = harness();
        let base = snap_to_hour(hours_ago(3));
        h.scheduler.on_scrub(base + ChronoDuration::minutes(5), now());
        sleep(Duration::from_millis(50)).await;
        h.scheduler.on_scrub(base + ChronoDuration::minutes(50), now());

        let applied = h.sink.applied.lock().unwrap().clone();
        assert_eq!(applied.len(), 2, "redrawn synchronously from the cache");
        assert_eq!(applied[0].0, applied[1].0);
        assert_eq!(applied[1].1, base + ChronoDuration::minutes(50));
        assert_eq!(h.service.flow_calls().len(), 1);
        assert_eq!(h.scheduler.stats().cache_hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_lands_at_latest_instant_of_its_key() {
        let h = harness();
        h.service.set_latency(Duration::from_millis(300));
        let base = snap_to_hour(hours_ago(3));
        h.scheduler.on_scrub(base + ChronoDuration::minutes(5), now());
        sleep(Duration::from_millis(10)).await;
        h.scheduler.on_scrub(base + ChronoDuration::minutes(50), now());
        assert!(h.sink.keys().is_empty(), "nothing held for the key yet");

        sleep(Duration::from_millis(400)).await;
        let applied = h.sink.applied.lock().unwrap().clone();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].1, base + ChronoDuration::minutes(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_already_on_the_wire_is_not_fetched_again() {
        let h = harness();
        h.service.set_latency(Duration::from_millis(800));
        let a = hours_ago(2);
        h.scheduler.on_scrub(a, now());
        sleep(Duration::from_millis(10)).await;
        h.scheduler.on_scrub(hours_ago(5), now());
        sleep(Duration::from_millis(10)).await;
        // Back to `a` while its first fetch is still running.
        h.scheduler.on_scrub(a, now());
        sleep(Duration::from_secs(2)).await;

        assert_eq!(
            h.service.flow_calls(),
            vec![ServiceCall::FlowAt(snap_to_hour(a))]
        );
        assert_eq!(h.scheduler.stats().fetches, 1);
        assert_eq!(h.sink.keys(), vec![cache_key(a, TemporalMode::Past)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_includes_generators() {
        let h = harness();
        h.scheduler.on_scrub(hours_ago(2), now());
        sleep(Duration::from_millis(50)).await;

        assert!(h
            .service
            .calls()
            .contains(&ServiceCall::GeneratorsAt(snap_to_hour(hours_ago(2)))));
        let record = h
            .cache
            .get(&cache_key(hours_ago(2), TemporalMode::Past))
            .expect("fetched record is cached");
        assert!(record.generators.as_ref().is_some_and(|g| g.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_reaches_sink_like_fetch() {
        let h = harness();
        h.scheduler.on_scrub(hours_ago(2), now());
        sleep(Duration::from_millis(600)).await;
        h.scheduler.on_scrub(hours_ago(5), now());
        sleep(Duration::from_millis(600)).await;
        h.scheduler.on_scrub(hours_ago(2), now());
        sleep(Duration::from_millis(600)).await;

        let stats = h.scheduler.stats();
        assert_eq!(stats.fetches, 2);
        assert_eq!(stats.cache_hits, 1);

        let applied = h.sink.applied.lock().unwrap().clone();
        assert_eq!(applied.len(), 3);
        assert_eq!(applied[0].0, applied[2].0);
        assert_eq!(applied[0].2, applied[2].2, "hit and fetch draw the same flows");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_caches_no_data_without_retry() {
        let h = harness();
        h.service.set_failing(true);
        h.scheduler.on_scrub(hours_ago(2), now());
        sleep(Duration::from_secs(5)).await;

        let stats = h.scheduler.stats();
        assert_eq!(stats.fetches, 1, "no automatic retry");
        assert_eq!(stats.failed_fetches, 1);
        let applied = h.sink.applied.lock().unwrap().clone();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].2, 0, "failed fetch draws no flows");

        let record = h
            .cache
            .get(&cache_key(hours_ago(2), TemporalMode::Past))
            .expect("failure is cached");
        assert!(record.day_ahead_prices.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_result_is_cached_but_not_drawn() {
        let h = harness();
        h.service.set_latency(Duration::from_millis(300));

        h.scheduler.on_scrub(hours_ago(2), now());
        sleep(Duration::from_millis(100)).await;
        h.scheduler.on_scrub(hours_ago(6), now());

        // First response lands at 300ms, after the user moved on.
        sleep(Duration::from_millis(250)).await;
        assert!(h.sink.keys().is_empty());
        assert!(h
            .cache
            .get(&cache_key(hours_ago(2), TemporalMode::Past))
            .is_some());

        // Deferred fetch fires at 500ms and lands at 800ms.
        sleep(Duration::from_millis(500)).await;
        assert_eq!(h.sink.keys(), vec![cache_key(hours_ago(6), TemporalMode::Past)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_and_forecast_use_latest_flows() {
        let h = harness();
        h.scheduler.on_scrub(now() - ChronoDuration::minutes(10), now());
        sleep(Duration::from_millis(600)).await;
        let forecast = now() + ChronoDuration::hours(4);
        h.scheduler.on_scrub(forecast, now());
        sleep(Duration::from_millis(600)).await;

        let calls = h.service.calls();
        assert_eq!(calls.iter().filter(|c| **c == ServiceCall::FlowNow).count(), 2);
        assert!(calls.contains(&ServiceCall::PricesAt(snap_to_hour(forecast))));
        assert!(!calls.iter().any(|c| matches!(c, ServiceCall::FlowAt(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_timer_and_fetches() {
        let h = harness();
        h.service.set_latency(Duration::from_millis(300));
        h.scheduler.on_scrub(hours_ago(2), now());
        sleep(Duration::from_millis(10)).await;
        h.scheduler.on_scrub(hours_ago(4), now());
        assert_eq!(h.scheduler.pending_tasks(), 2);

        h.scheduler.shutdown();
        assert_eq!(h.scheduler.pending_tasks(), 0);
        sleep(Duration::from_secs(2)).await;
        assert!(h.sink.keys().is_empty());
        assert_eq!(h.service.flow_calls().len(), 1);

        h.scheduler.on_scrub(hours_ago(8), now());
        sleep(Duration::from_secs(1)).await;
        assert_eq!(h.service.flow_calls().len(), 1, "closed scheduler ignores input");
    }
}
