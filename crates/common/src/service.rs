//! Contracts for the collaborators the overlay engine consumes.
//!
//! The engine only ever talks to these traits; the HTTP and WMS
//! implementations live in `grid_data_client`, and tests plug in mocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{FlowEntry, GeneratorEntry, PriceEntry, RasterType};
use crate::Result;

/// Upstream time-series queries for flows, zonal prices and generator output.
///
/// Every call returns within a bounded time or fails; callers treat a
/// failure as "no data" rather than retrying.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Interconnection flows for the hour containing `at`.
    async fn fetch_flow_at_time(&self, at: DateTime<Utc>) -> Result<Vec<FlowEntry>>;

    /// Most recent interconnection flows.
    async fn fetch_flow_now(&self) -> Result<Vec<FlowEntry>>;

    /// Day-ahead and realtime zonal prices around `at`.
    async fn fetch_prices_at_time(&self, at: DateTime<Utc>) -> Result<Vec<PriceEntry>>;

    /// Per-unit generator output and capability for the hour containing `at`.
    async fn fetch_generators_at_time(&self, at: DateTime<Utc>) -> Result<Vec<GeneratorEntry>>;
}

/// Where a raster layer's imagery comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RasterSource {
    pub url: String,
}

/// Produces the imagery source for one `(raster type, time step)` pair.
///
/// Image loading itself is the canvas' business: a tile that never loads
/// simply stays transparent.
pub trait RasterTileProvider: Send + Sync {
    fn layer_source(&self, raster_type: RasterType, time_step: DateTime<Utc>) -> RasterSource;
}
