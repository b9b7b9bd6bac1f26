//! Double-buffered weather raster layers.
//!
//! One canvas layer exists per (raster type, 3-hour step). Layers are
//! created at opacity 0 and stay attached; moving the scrub position only
//! changes opacities. For each raster type every other layer is zeroed
//! and the target raised in one synchronous pass, so at most one layer
//! per type is ever visible and the next image is already resident.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::RasterConfig;
use common::{RasterTileProvider, RasterType};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::canvas::{LayerId, LayerIdAllocator, LayerSource, MapCanvas};
use crate::time_snap::{iso_step, snap_to_three_hour_utc, three_hour_steps};

#[derive(Debug, Clone, Copy)]
struct RasterHandle {
    id: LayerId,
    opacity: f32,
}

#[derive(Default)]
struct RasterState {
    handles: HashMap<RasterType, BTreeMap<DateTime<Utc>, RasterHandle>>,
    /// Step currently shown per visible type.
    applied: HashMap<RasterType, DateTime<Utc>>,
    visible: BTreeSet<RasterType>,
    torn_down: bool,
}

struct RasterInner {
    canvas: Arc<dyn MapCanvas>,
    ids: Arc<LayerIdAllocator>,
    tiles: Arc<dyn RasterTileProvider>,
    config: RasterConfig,
    state: Mutex<RasterState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RasterInner {
    /// The handle for `(raster_type, step)`, creating it transparent if missing.
    fn ensure(
        &self,
        state: &mut RasterState,
        raster_type: RasterType,
        step: DateTime<Utc>,
    ) -> Option<LayerId> {
        if state.torn_down {
            return None;
        }
        let steps = state.handles.entry(raster_type).or_default();
        if let Some(handle) = steps.get(&step) {
            return Some(handle.id);
        }

        let id = self.ids.next_id();
        let source = self.tiles.layer_source(raster_type, step);
        self.canvas.add_layer(
            id,
            &LayerSource::Raster {
                raster_type,
                time_step: step,
                source,
            },
        );
        self.canvas.set_opacity(id, 0.0);
        steps.insert(step, RasterHandle { id, opacity: 0.0 });
        debug!("created {} layer for {} as {}", raster_type, iso_step(step), id);
        Some(id)
    }

    /// Make `target` the only visible layer of `raster_type`.
    fn show(&self, state: &mut RasterState, raster_type: RasterType, target: DateTime<Utc>) {
        let Some(target_id) = self.ensure(state, raster_type, target) else {
            return;
        };
        let opacity = self.config.opacity(raster_type);
        let Some(steps) = state.handles.get_mut(&raster_type) else {
            return;
        };

        // Zero the others before raising the target; both happen before
        // control returns to the canvas, so no frame sees zero or two.
        for handle in steps.values_mut() {
            if handle.id != target_id && handle.opacity > 0.0 {
                self.canvas.set_opacity(handle.id, 0.0);
                handle.opacity = 0.0;
            }
        }
        if let Some(handle) = steps.get_mut(&target) {
            self.canvas.set_opacity(handle.id, opacity);
            handle.opacity = opacity;
        }
        state.applied.insert(raster_type, target);
    }

    fn hide(&self, state: &mut RasterState, raster_type: RasterType) {
        if let Some(steps) = state.handles.get_mut(&raster_type) {
            for handle in steps.values_mut().filter(|h| h.opacity > 0.0) {
                self.canvas.set_opacity(handle.id, 0.0);
                handle.opacity = 0.0;
            }
        }
        state.applied.remove(&raster_type);
    }
}

/// Owns every raster layer for one mounted engine.
pub struct RasterLayerCache {
    inner: Arc<RasterInner>,
    preload: Mutex<Option<JoinHandle<()>>>,
}

impl RasterLayerCache {
    /// Create the first steps for every raster type now and the rest progressively.
    ///
    /// Steps are ordered closest to `now` first. Constrained devices only
    /// preload the current step. Must be called within a Tokio runtime.
    pub fn mount(
        canvas: Arc<dyn MapCanvas>,
        ids: Arc<LayerIdAllocator>,
        tiles: Arc<dyn RasterTileProvider>,
        config: &RasterConfig,
        constrained_device: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let steps = if constrained_device {
            vec![snap_to_three_hour_utc(now)]
        } else {
            three_hour_steps(now, config.window_hours)
        };
        let split = config.eager_steps.max(1).min(steps.len());
        let (eager, deferred) = steps.split_at(split);

        let inner = Arc::new(RasterInner {
            canvas,
            ids,
            tiles,
            config: config.clone(),
            state: Mutex::new(RasterState {
                visible: config.initially_visible.iter().copied().collect(),
                ..RasterState::default()
            }),
        });

        {
            let mut state = lock(&inner.state);
            for step in eager {
                for raster_type in RasterType::ALL {
                    inner.ensure(&mut state, raster_type, *step);
                }
            }
        }

        let preload = (!deferred.is_empty()).then(|| {
            let inner = Arc::clone(&inner);
            let deferred = deferred.to_vec();
            let stagger = Duration::from_millis(config.stagger_ms);
            tokio::spawn(async move {
                for step in deferred {
                    sleep(stagger).await;
                    let mut state = lock(&inner.state);
                    for raster_type in RasterType::ALL {
                        if inner.ensure(&mut state, raster_type, step).is_none() {
                            return;
                        }
                    }
                }
                debug!("raster preload complete");
            })
        });

        info!(
            "raster cache mounted: {} steps now, {} progressively",
            eager.len(),
            deferred.len()
        );

        Self {
            inner,
            preload: Mutex::new(preload),
        }
    }

    /// Show the step nearest `instant` for every visible raster type.
    ///
    /// Types whose target step is already shown are left untouched.
    pub fn apply(&self, instant: DateTime<Utc>) {
        let target = snap_to_three_hour_utc(instant);
        let mut state = lock(&self.inner.state);
        let visible: Vec<RasterType> = state.visible.iter().copied().collect();
        for raster_type in visible {
            if state.applied.get(&raster_type) == Some(&target) {
                continue;
            }
            self.inner.show(&mut state, raster_type, target);
        }
    }

    pub fn set_visible(&self, raster_type: RasterType, visible: bool, instant: DateTime<Utc>) {
        let mut state = lock(&self.inner.state);
        if state.torn_down {
            return;
        }
        if visible {
            if state.visible.insert(raster_type) {
                self.inner
                    .show(&mut state, raster_type, snap_to_three_hour_utc(instant));
            }
        } else if state.visible.remove(&raster_type) {
            self.inner.hide(&mut state, raster_type);
        }
        info!("{} raster {}", raster_type, if visible { "shown" } else { "hidden" });
    }

    pub fn is_visible(&self, raster_type: RasterType) -> bool {
        lock(&self.inner.state).visible.contains(&raster_type)
    }

    /// Layers currently attached to the canvas.
    pub fn resident_count(&self) -> usize {
        lock(&self.inner.state).handles.values().map(BTreeMap::len).sum()
    }

    pub fn preloading(&self) -> bool {
        lock(&self.preload).as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop preloading and remove every layer. Idempotent.
    pub fn teardown(&self) {
        if let Some(preload) = lock(&self.preload).take() {
            preload.abort();
        }
        let mut state = lock(&self.inner.state);
        if state.torn_down {
            return;
        }
        state.torn_down = true;
        let mut removed = 0;
        for (_, steps) in state.handles.drain() {
            for handle in steps.values() {
                self.inner.canvas.remove_layer(handle.id);
                removed += 1;
            }
        }
        state.applied.clear();
        debug!("raster cache removed {} layers", removed);
    }
}
