//! TTL cache of fetched overlay snapshots.
//!
//! Records are keyed by snapped hour plus temporal mode, so a response
//! that arrives late simply fills a slot for the position it was asked
//! for. Expired records stay in the map but read as misses; the map is
//! bounded by pruning expired records first and then the oldest ones.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{FlowEntry, GeneratorEntry, PriceEntry, PriceMarket, TemporalMode};
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::time_snap::{iso_step, snap_to_hour};

/// Cache key for a scrub position: `<snapped hour ISO>:p` or `...:f`.
pub fn cache_key(instant: DateTime<Utc>, mode: TemporalMode) -> String {
    format!("{}{}", iso_step(snap_to_hour(instant)), mode.key_suffix())
}

/// One fetched snapshot of flows, prices and generator output for an hour.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub key: String,
    /// Latest flow per corridor group within the hour.
    pub flow_by_group: HashMap<String, FlowEntry>,
    /// Hourly day-ahead price per zone; `None` when prices could not be fetched.
    pub day_ahead_prices: Option<HashMap<String, PriceEntry>>,
    /// Realtime samples per zone in time order; `None` when unavailable.
    pub realtime_prices: Option<HashMap<String, Vec<PriceEntry>>>,
    /// Output per generator for the hour; `None` when unavailable.
    pub generators: Option<HashMap<String, GeneratorEntry>>,
    pub fetched_at: Instant,
}

impl CacheRecord {
    /// Build a record from whatever the fetch produced. A failed half is `None`.
    pub fn from_fetch(
        key: String,
        instant: DateTime<Utc>,
        mode: TemporalMode,
        flows: Option<Vec<FlowEntry>>,
        prices: Option<Vec<PriceEntry>>,
    ) -> Self {
        let mut flow_by_group: HashMap<String, FlowEntry> = HashMap::new();
        for entry in flows.unwrap_or_default() {
            match flow_by_group.get(&entry.group_key) {
                Some(existing) if existing.observed_at >= entry.observed_at => {}
                _ => {
                    flow_by_group.insert(entry.group_key.clone(), entry);
                }
            }
        }

        let (day_ahead_prices, realtime_prices) = match prices {
            Some(prices) => {
                let (day_ahead, realtime): (Vec<_>, Vec<_>) = prices
                    .into_iter()
                    .partition(|p| p.market == PriceMarket::DayAhead);
                let realtime = match mode {
                    TemporalMode::Past => Some(group_realtime(realtime)),
                    TemporalMode::Forecast => None,
                };
                (Some(pick_day_ahead(day_ahead, instant)), realtime)
            }
            None => (None, None),
        };

        Self {
            key,
            flow_by_group,
            day_ahead_prices,
            realtime_prices,
            generators: None,
            fetched_at: Instant::now(),
        }
    }

    /// Attach generator output, keeping per unit the reading nearest the hour.
    pub fn with_generators(
        mut self,
        instant: DateTime<Utc>,
        generators: Option<Vec<GeneratorEntry>>,
    ) -> Self {
        self.generators = generators.map(|entries| {
            pick_nearest_hour(entries, instant, |g: &GeneratorEntry| {
                (g.generator.clone(), g.observed_at)
            })
        });
        self
    }

    /// A record for a failed fetch: every overlay falls back to "no data".
    pub fn no_data(key: String) -> Self {
        Self {
            key,
            flow_by_group: HashMap::new(),
            day_ahead_prices: None,
            realtime_prices: None,
            generators: None,
            fetched_at: Instant::now(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

fn group_realtime(samples: Vec<PriceEntry>) -> HashMap<String, Vec<PriceEntry>> {
    let mut by_zone: HashMap<String, Vec<PriceEntry>> = HashMap::new();
    for sample in samples {
        by_zone.entry(sample.zone.clone()).or_default().push(sample);
    }
    for samples in by_zone.values_mut() {
        samples.sort_by_key(|s| s.observed_at);
    }
    by_zone
}

/// Per zone, the day-ahead entry for the snapped hour, else the nearest one.
fn pick_day_ahead(
    entries: Vec<PriceEntry>,
    instant: DateTime<Utc>,
) -> HashMap<String, PriceEntry> {
    pick_nearest_hour(entries, instant, |p: &PriceEntry| (p.zone.clone(), p.observed_at))
}

/// Per key, the entry whose snapped hour is closest to `instant`'s.
fn pick_nearest_hour<T>(
    entries: Vec<T>,
    instant: DateTime<Utc>,
    key_of: impl Fn(&T) -> (String, DateTime<Utc>),
) -> HashMap<String, T> {
    let hour = snap_to_hour(instant);
    let distance = |at: DateTime<Utc>| (snap_to_hour(at) - hour).num_seconds().abs();
    let mut picked: HashMap<String, (i64, T)> = HashMap::new();
    for entry in entries {
        let (key, observed_at) = key_of(&entry);
        let d = distance(observed_at);
        let better = picked.get(&key).map_or(true, |(current, _)| d < *current);
        if better {
            picked.insert(key, (d, entry));
        }
    }
    picked.into_iter().map(|(k, (_, entry))| (k, entry)).collect()
}

/// Snapshot cache owned by one mounted engine.
#[derive(Debug)]
pub struct OverlayDataCache {
    entries: DashMap<String, Arc<CacheRecord>>,
    ttl: Duration,
    max_entries: usize,
}

impl OverlayDataCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// A record younger than the TTL, or `None`.
    pub fn get(&self, key: &str) -> Option<Arc<CacheRecord>> {
        let record = self.entries.get(key)?;
        if record.is_fresh(self.ttl) {
            Some(Arc::clone(record.value()))
        } else {
            debug!("cache entry {} expired", key);
            None
        }
    }

    /// The record under `key` regardless of age.
    pub fn peek(&self, key: &str) -> Option<Arc<CacheRecord>> {
        self.entries.get(key).map(|record| Arc::clone(record.value()))
    }

    /// Insert or replace the record under its own key.
    pub fn put(&self, record: CacheRecord) -> Arc<CacheRecord> {
        let record = Arc::new(record);
        self.entries.insert(record.key.clone(), Arc::clone(&record));
        if self.entries.len() > self.max_entries {
            self.evict();
        }
        record
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn evict(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, record| record.is_fresh(ttl));

        let excess = self.entries.len().saturating_sub(self.max_entries);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(Instant, String)> = self
            .entries
            .iter()
            .map(|e| (e.value().fetched_at, e.key().clone()))
            .collect();
        by_age.sort();
        for (_, key) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        debug!("cache evicted down to {} entries", self.entries.len());
    }
}
