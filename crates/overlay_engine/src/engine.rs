//! The imperative surface exposed to the enclosing view.
//!
//! `OverlayEngine` owns every cache, timer and layer for one mounted map.
//! Nothing is shared between engine instances; unmounting (explicitly or
//! by dropping the engine) cancels all tasks and detaches every layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{DataService, OverlayConfig, RasterTileProvider, RasterType};
use serde::Serialize;
use tracing::{debug, info};

use crate::animator::AnimatorState;
use crate::canvas::{LayerIdAllocator, MapCanvas};
use crate::clock::WallClock;
use crate::data_cache::OverlayDataCache;
use crate::presenter::OverlayPresenter;
use crate::raster_cache::RasterLayerCache;
use crate::scheduler::{FetchScheduler, SchedulerStats};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    #[serde(flatten)]
    pub scheduler: SchedulerStats,
    pub cached_records: usize,
    pub resident_raster_layers: usize,
    pub pending_tasks: usize,
    pub animator: AnimatorState,
    pub latest_key: Option<String>,
    pub mounted: bool,
}

pub struct OverlayEngine {
    clock: Arc<dyn WallClock>,
    cache: Arc<OverlayDataCache>,
    scheduler: FetchScheduler,
    presenter: Arc<OverlayPresenter>,
    rasters: RasterLayerCache,
    scrub_instant: Mutex<Option<DateTime<Utc>>>,
    mounted: AtomicBool,
}

impl OverlayEngine {
    /// Attach all overlays to `canvas` and start raster preloading.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(
        config: &OverlayConfig,
        canvas: Arc<dyn MapCanvas>,
        service: Arc<dyn DataService>,
        tiles: Arc<dyn RasterTileProvider>,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        let now = clock.now();
        let ids = Arc::new(LayerIdAllocator::new());

        let cache = Arc::new(OverlayDataCache::new(
            Duration::from_secs(config.fetch.cache_ttl_secs),
            config.fetch.cache_max_entries,
        ));
        let rasters = RasterLayerCache::mount(
            Arc::clone(&canvas),
            Arc::clone(&ids),
            tiles,
            &config.raster,
            config.constrained_device,
            now,
        );
        rasters.apply(now);

        let presenter = Arc::new(OverlayPresenter::mount(canvas, ids, config));
        let scheduler = FetchScheduler::new(
            service,
            Arc::clone(&cache),
            presenter.clone(),
            Duration::from_millis(config.fetch.throttle_ms),
        );

        info!(
            "overlay engine mounted (throttle {}ms, cache ttl {}s, constrained={})",
            config.fetch.throttle_ms, config.fetch.cache_ttl_secs, config.constrained_device
        );

        Self {
            clock,
            cache,
            scheduler,
            presenter,
            rasters,
            scrub_instant: Mutex::new(None),
            mounted: AtomicBool::new(true),
        }
    }

    /// Move the timeline to `instant`.
    pub fn set_scrub_instant(&self, instant: DateTime<Utc>) {
        if !self.is_mounted() {
            return;
        }
        *self.scrub_instant.lock().unwrap_or_else(|p| p.into_inner()) = Some(instant);
        self.rasters.apply(instant);
        self.scheduler.on_scrub(instant, self.clock.now());
    }

    pub fn toggle_raster(&self, raster_type: RasterType, visible: bool) {
        if !self.is_mounted() {
            return;
        }
        let instant = self.current_instant();
        self.rasters.set_visible(raster_type, visible, instant);
    }

    pub fn toggle_flows(&self, visible: bool) {
        if !self.is_mounted() {
            return;
        }
        self.presenter.set_flows_visible(visible);
    }

    /// Cancel every timer and task and detach every layer. Idempotent.
    pub fn unmount(&self) {
        if !self.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        self.scheduler.shutdown();
        self.rasters.teardown();
        self.presenter.teardown();
        self.cache.clear();
        info!("overlay engine unmounted");
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            scheduler: self.scheduler.stats(),
            cached_records: self.cache.len(),
            resident_raster_layers: self.rasters.resident_count(),
            pending_tasks: self.scheduler.pending_tasks()
                + usize::from(self.rasters.preloading()),
            animator: self.presenter.animator().state(),
            latest_key: self.scheduler.latest_key(),
            mounted: self.is_mounted(),
        }
    }

    /// The scrub position, or now if the view has not set one yet.
    fn current_instant(&self) -> DateTime<Utc> {
        let current = *self.scrub_instant.lock().unwrap_or_else(|p| p.into_inner());
        current.unwrap_or_else(|| self.clock.now())
    }
}

impl Drop for OverlayEngine {
    fn drop(&mut self) {
        debug!("dropping overlay engine");
        self.unmount();
    }
}
