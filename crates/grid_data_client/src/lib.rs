//! Concrete collaborators for the overlay engine.
//!
//! `GridDataClient` speaks to the dashboard's time-series query service and
//! `WmsTileProvider` builds weather imagery requests for the raster layers.

pub mod rate_limit;
pub mod rest;
pub mod wms;

pub use rate_limit::RequestBudget;
pub use rest::GridDataClient;
pub use wms::WmsTileProvider;
