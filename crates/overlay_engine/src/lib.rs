//! Temporal map-overlay engine.
//!
//! Keeps zonal prices, transmission flows, generator markers, animated flow
//! indicators and gridded weather rasters in step with a single scrub
//! instant, against an abstract map canvas and data service.

pub mod animator;
pub mod canvas;
pub mod clock;
pub mod data_cache;
pub mod engine;
pub mod indicators;
pub mod presenter;
pub mod raster_cache;
pub mod scheduler;
pub mod styling;
pub mod throttle;
pub mod time_snap;

#[cfg(test)]
mod testing;

pub use animator::{AnimatorState, FlowAnimator, FrameTiming};
pub use canvas::{LayerId, LayerIdAllocator, LayerSource, LayerStyle, MapCanvas};
pub use clock::{FixedClock, SystemClock, WallClock};
pub use data_cache::{cache_key, CacheRecord, OverlayDataCache};
pub use engine::{EngineStats, OverlayEngine};
pub use indicators::{AnimatedIndicator, IndicatorFeed, IndicatorReader};
pub use raster_cache::RasterLayerCache;
pub use scheduler::{FetchRequest, FetchScheduler, SchedulerStats, SnapshotSink};
