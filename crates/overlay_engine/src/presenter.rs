//! Vector overlays driven by fetched snapshots: corridor lines, zonal
//! price polygons, generator markers and the indicator set handed to the
//! animator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::config::{AnimationConfig, CorridorConfig};
use common::{OverlayConfig, TemporalMode};
use tracing::{debug, info};

use crate::animator::{FlowAnimator, FrameTiming};
use crate::canvas::{LayerId, LayerIdAllocator, LayerSource, MapCanvas};
use crate::data_cache::CacheRecord;
use crate::indicators::{build_indicators, IndicatorFeed};
use crate::scheduler::SnapshotSink;
use crate::styling::{corridor_style, generator_style, zone_price, zone_style};

const CORRIDOR_OPACITY: f32 = 0.9;
const ZONE_OPACITY: f32 = 1.0;
const GENERATOR_OPACITY: f32 = 1.0;

struct AppliedSnapshot {
    record: Arc<CacheRecord>,
    instant: DateTime<Utc>,
    mode: TemporalMode,
}

/// Owns the corridor, zone and generator layers and the indicator feed.
pub struct OverlayPresenter {
    canvas: Arc<dyn MapCanvas>,
    corridors: Vec<CorridorConfig>,
    corridor_layers: Vec<LayerId>,
    zones: Vec<(String, LayerId)>,
    generators: Vec<(String, LayerId)>,
    feed: IndicatorFeed,
    animator: FlowAnimator,
    animation: AnimationConfig,
    realtime_tolerance: ChronoDuration,
    flows_visible: AtomicBool,
    last_applied: Mutex<Option<AppliedSnapshot>>,
    torn_down: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl OverlayPresenter {
    /// Attach corridor, zone and generator layers in their "no data" style.
    ///
    /// Must be called from within a Tokio runtime; the animator spawns its
    /// frame loop there once indicators arrive.
    pub fn mount(
        canvas: Arc<dyn MapCanvas>,
        ids: Arc<LayerIdAllocator>,
        config: &OverlayConfig,
    ) -> Self {
        let corridor_opacity = if config.flows_visible { CORRIDOR_OPACITY } else { 0.0 };
        let noise = config.animation.noise_threshold_mw;

        let corridor_layers: Vec<LayerId> = config
            .corridors
            .iter()
            .map(|corridor| {
                let id = ids.next_id();
                canvas.add_layer(
                    id,
                    &LayerSource::Corridor {
                        group_key: corridor.group_key.clone(),
                        path: vec![corridor.local, corridor.remote],
                    },
                );
                canvas.set_style(id, &corridor_style(None, noise));
                canvas.set_opacity(id, corridor_opacity);
                id
            })
            .collect();

        let zones: Vec<(String, LayerId)> = config
            .zones
            .iter()
            .map(|zone| {
                let id = ids.next_id();
                canvas.add_layer(id, &LayerSource::Zone { zone: zone.clone() });
                canvas.set_style(id, &zone_style(None));
                canvas.set_opacity(id, ZONE_OPACITY);
                (zone.clone(), id)
            })
            .collect();

        let generators: Vec<(String, LayerId)> = config
            .generators
            .iter()
            .map(|site| {
                let id = ids.next_id();
                canvas.add_layer(
                    id,
                    &LayerSource::Generator {
                        name: site.name.clone(),
                        position: site.position,
                    },
                );
                canvas.set_style(id, &generator_style(None));
                canvas.set_opacity(id, GENERATOR_OPACITY);
                (site.name.clone(), id)
            })
            .collect();

        let feed = IndicatorFeed::new();
        let animator = FlowAnimator::new(
            Arc::clone(&canvas),
            ids,
            feed.subscribe(),
            FrameTiming::from_config(&config.animation, config.constrained_device),
            config.flows_visible,
        );

        info!(
            "presenter mounted: {} corridors, {} zones, {} generators",
            corridor_layers.len(),
            zones.len(),
            generators.len()
        );

        Self {
            canvas,
            corridors: config.corridors.clone(),
            corridor_layers,
            zones,
            generators,
            feed,
            animator,
            animation: config.animation.clone(),
            realtime_tolerance: ChronoDuration::minutes(config.fetch.realtime_tolerance_minutes),
            flows_visible: AtomicBool::new(config.flows_visible),
            last_applied: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn flows_visible(&self) -> bool {
        self.flows_visible.load(Ordering::SeqCst)
    }

    /// Show or hide corridor lines and their indicators.
    ///
    /// Showing again re-applies the last snapshot so lines and indicators
    /// match the current position without waiting for a fetch.
    pub fn set_flows_visible(&self, visible: bool) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        if self.flows_visible.swap(visible, Ordering::SeqCst) == visible {
            return;
        }

        let opacity = if visible { CORRIDOR_OPACITY } else { 0.0 };
        for id in &self.corridor_layers {
            self.canvas.set_opacity(*id, opacity);
        }

        if visible {
            self.animator.set_enabled(true);
            let last = lock(&self.last_applied)
                .as_ref()
                .map(|s| (Arc::clone(&s.record), s.instant, s.mode));
            if let Some((record, instant, mode)) = last {
                self.render(&record, instant, mode);
            }
        } else {
            self.feed.clear();
            self.animator.set_enabled(false);
        }
        info!("transmission flows {}", if visible { "shown" } else { "hidden" });
    }

    pub fn animator(&self) -> &FlowAnimator {
        &self.animator
    }

    /// Key of the snapshot currently on screen.
    pub fn applied_key(&self) -> Option<String> {
        lock(&self.last_applied).as_ref().map(|s| s.record.key.clone())
    }

    /// Remove every layer this presenter added and stop the animator. Idempotent.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.animator.shutdown();
        self.feed.clear();
        for id in &self.corridor_layers {
            self.canvas.remove_layer(*id);
        }
        for (_, id) in self.zones.iter().chain(&self.generators) {
            self.canvas.remove_layer(*id);
        }
        lock(&self.last_applied).take();
        debug!("presenter torn down");
    }

    fn render(&self, record: &CacheRecord, instant: DateTime<Utc>, mode: TemporalMode) {
        let noise = self.animation.noise_threshold_mw;

        for (corridor, id) in self.corridors.iter().zip(&self.corridor_layers) {
            let flow = record.flow_by_group.get(&corridor.group_key);
            self.canvas.set_style(*id, &corridor_style(flow, noise));
        }

        self.render_zones(record, instant, mode);

        for (name, id) in &self.generators {
            let entry = record.generators.as_ref().and_then(|by_name| by_name.get(name));
            self.canvas.set_style(*id, &generator_style(entry));
        }

        if self.flows_visible() {
            self.feed.publish(build_indicators(
                &record.flow_by_group,
                &self.corridors,
                self.animation.indicators_per_corridor,
                noise,
            ));
            self.animator.reconcile();
        }
    }

    /// Zone fills are the only overlay that changes within an hour.
    fn render_zones(&self, record: &CacheRecord, instant: DateTime<Utc>, mode: TemporalMode) {
        for (zone, id) in &self.zones {
            let price = zone_price(record, zone, instant, mode, self.realtime_tolerance);
            self.canvas.set_style(*id, &zone_style(price));
        }
    }
}

impl SnapshotSink for OverlayPresenter {
    fn apply(&self, record: Arc<CacheRecord>, instant: DateTime<Utc>, mode: TemporalMode) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        let on_screen = lock(&self.last_applied)
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(&s.record, &record));
        if on_screen {
            self.render_zones(&record, instant, mode);
        } else {
            self.render(&record, instant, mode);
        }
        debug!(
            "applied {} ({} corridor flows)",
            record.key,
            record.flow_by_group.len()
        );
        *lock(&self.last_applied) = Some(AppliedSnapshot {
            record,
            instant,
            mode,
        });
    }
}
