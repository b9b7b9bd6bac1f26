//! WMS imagery for the weather raster layers.
//!
//! The global forecast model behind these layers publishes a sample every
//! three hours, so the engine only ever asks for 3-hour UTC steps.

use chrono::{DateTime, SecondsFormat, Utc};
use common::config::RasterConfig;
use common::{RasterSource, RasterTileProvider, RasterType};
use tracing::warn;
use url::Url;

/// Builds `GetMap` requests with a `TIME` dimension per raster step.
#[derive(Debug, Clone)]
pub struct WmsTileProvider {
    base_url: String,
    width: u32,
    height: u32,
    bbox: [f64; 4],
}

impl WmsTileProvider {
    pub fn new(config: &RasterConfig) -> Self {
        Self {
            base_url: config.wms_base_url.clone(),
            width: config.image_width,
            height: config.image_height,
            bbox: config.bbox,
        }
    }

    /// Model layer name for a raster type.
    pub fn layer_name(raster_type: RasterType) -> &'static str {
        match raster_type {
            RasterType::Temperature => "GDPS.ETA_TT",
            RasterType::Precipitation => "GDPS.ETA_PR",
            RasterType::CloudCover => "GDPS.ETA_NT",
        }
    }

    fn params(
        &self,
        raster_type: RasterType,
        time_step: DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        // WMS 1.3.0 with EPSG:4326 expects lat,lon axis order.
        let [min_lon, min_lat, max_lon, max_lat] = self.bbox;
        vec![
            ("SERVICE", "WMS".into()),
            ("VERSION", "1.3.0".into()),
            ("REQUEST", "GetMap".into()),
            ("LAYERS", Self::layer_name(raster_type).into()),
            ("STYLES", String::new()),
            ("CRS", "EPSG:4326".into()),
            ("BBOX", format!("{min_lat},{min_lon},{max_lat},{max_lon}")),
            ("WIDTH", self.width.to_string()),
            ("HEIGHT", self.height.to_string()),
            ("FORMAT", "image/png".into()),
            ("TRANSPARENT", "TRUE".into()),
            ("TIME", time_step.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ]
    }
}

impl RasterTileProvider for WmsTileProvider {
    fn layer_source(&self, raster_type: RasterType, time_step: DateTime<Utc>) -> RasterSource {
        let params = self.params(raster_type, time_step);
        match Url::parse_with_params(&self.base_url, &params) {
            Ok(url) => RasterSource { url: url.into() },
            Err(e) => {
                // The canvas will fail to load this and leave the layer transparent.
                warn!("Invalid WMS base URL {}: {}", self.base_url, e);
                RasterSource {
                    url: self.base_url.clone(),
                }
            }
        }
    }
}
