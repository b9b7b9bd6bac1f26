//! Overlay configuration types.

use serde::{Deserialize, Serialize};

use crate::types::{GeoPoint, RasterType};

/// Top-level overlay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Upstream time-series service.
    #[serde(default)]
    pub data_service: DataServiceConfig,

    /// Fetch throttling and caching.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Weather raster layers.
    #[serde(default)]
    pub raster: RasterConfig,

    /// Flow indicator animation.
    #[serde(default)]
    pub animation: AnimationConfig,

    /// Low-power device: preload only the current raster step and cap frame rate.
    #[serde(default)]
    pub constrained_device: bool,

    /// Whether transmission flows are drawn on mount.
    #[serde(default = "default_true")]
    pub flows_visible: bool,

    /// Interconnection corridors drawn as polylines.
    #[serde(default = "default_corridors")]
    pub corridors: Vec<CorridorConfig>,

    /// Pricing zones drawn as polygons.
    #[serde(default = "default_zones")]
    pub zones: Vec<String>,

    /// Generating stations drawn as markers.
    #[serde(default = "default_generators")]
    pub generators: Vec<GeneratorSiteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataServiceConfig {
    #[serde(default = "default_data_url")]
    pub base_url: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Client-side cap on outgoing requests.
    #[serde(default = "default_max_rps")]
    pub max_requests_per_sec: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Minimum spacing between fetches while scrubbing (ms).
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// Age after which a cached snapshot is treated as a miss.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Upper bound on cached snapshots.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// How far a realtime price sample may sit from the scrub instant.
    #[serde(default = "default_rt_tolerance")]
    pub realtime_tolerance_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterConfig {
    #[serde(default = "default_wms_url")]
    pub wms_base_url: String,

    /// Preload window on each side of now (hours).
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,

    /// Steps per raster type created synchronously on mount, closest to now first.
    #[serde(default = "default_eager_steps")]
    pub eager_steps: usize,

    /// Delay between progressively created layers (ms).
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,

    #[serde(default = "default_temperature_opacity")]
    pub temperature_opacity: f32,

    #[serde(default = "default_precipitation_opacity")]
    pub precipitation_opacity: f32,

    #[serde(default = "default_cloud_opacity")]
    pub cloud_cover_opacity: f32,

    #[serde(default = "default_visible_rasters")]
    pub initially_visible: Vec<RasterType>,

    #[serde(default = "default_image_width")]
    pub image_width: u32,

    #[serde(default = "default_image_height")]
    pub image_height: u32,

    /// `[min_lon, min_lat, max_lon, max_lat]` of the requested imagery.
    #[serde(default = "default_bbox")]
    pub bbox: [f64; 4],
}

impl RasterConfig {
    /// Opacity a visible layer of this type is shown at.
    pub fn opacity(&self, raster_type: RasterType) -> f32 {
        match raster_type {
            RasterType::Temperature => self.temperature_opacity,
            RasterType::Precipitation => self.precipitation_opacity,
            RasterType::CloudCover => self.cloud_cover_opacity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationConfig {
    /// Time for one indicator to travel the full corridor (ms).
    #[serde(default = "default_cycle_ms")]
    pub cycle_ms: u64,

    #[serde(default = "default_indicators_per_corridor")]
    pub indicators_per_corridor: usize,

    /// Flows below this magnitude get no indicators.
    #[serde(default = "default_noise_threshold")]
    pub noise_threshold_mw: f64,

    #[serde(default = "default_display_fps")]
    pub display_fps: u32,

    #[serde(default = "default_constrained_fps")]
    pub constrained_max_fps: u32,
}

/// One interconnection group and the two ends of its drawn path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorridorConfig {
    /// Key matching `FlowEntry::group_key`.
    pub group_key: String,
    pub label: String,
    /// Endpoint inside the modeled grid.
    pub local: GeoPoint,
    /// Endpoint in the neighbouring jurisdiction.
    pub remote: GeoPoint,
}

/// Where the marker for one generating unit is drawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSiteConfig {
    /// Key matching `GeneratorEntry::generator`.
    pub name: String,
    pub position: GeoPoint,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_data_url() -> String {
    "http://localhost:8080".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_max_rps() -> u32 {
    8
}

fn default_throttle_ms() -> u64 {
    500
}
fn default_cache_ttl() -> u64 {
    60
}
fn default_cache_max_entries() -> usize {
    256
}
fn default_rt_tolerance() -> i64 {
    5
}

fn default_wms_url() -> String {
    "https://geo.weather.gc.ca/geomet".into()
}
fn default_window_hours() -> i64 {
    12
}
fn default_eager_steps() -> usize {
    3
}
fn default_stagger_ms() -> u64 {
    120
}
fn default_temperature_opacity() -> f32 {
    0.55
}
fn default_precipitation_opacity() -> f32 {
    0.7
}
fn default_cloud_opacity() -> f32 {
    0.5
}
fn default_visible_rasters() -> Vec<RasterType> {
    vec![RasterType::Temperature]
}
fn default_image_width() -> u32 {
    1024
}
fn default_image_height() -> u32 {
    768
}
fn default_bbox() -> [f64; 4] {
    [-95.2, 41.6, -74.3, 56.9]
}

fn default_cycle_ms() -> u64 {
    2400
}
fn default_indicators_per_corridor() -> usize {
    3
}
fn default_noise_threshold() -> f64 {
    10.0
}
fn default_display_fps() -> u32 {
    60
}
fn default_constrained_fps() -> u32 {
    20
}

fn corridor(group_key: &str, label: &str, local: (f64, f64), remote: (f64, f64)) -> CorridorConfig {
    CorridorConfig {
        group_key: group_key.into(),
        label: label.into(),
        local: GeoPoint::new(local.0, local.1),
        remote: GeoPoint::new(remote.0, remote.1),
    }
}

fn default_corridors() -> Vec<CorridorConfig> {
    vec![
        corridor("MANITOBA", "Manitoba", (49.77, -94.49), (49.90, -97.14)),
        corridor("MINNESOTA", "Minnesota", (48.61, -93.40), (48.08, -93.95)),
        corridor("MICHIGAN", "Michigan", (42.97, -82.40), (42.58, -83.24)),
        corridor("NEW-YORK", "New York", (43.11, -79.06), (43.09, -78.45)),
        corridor("QUEBEC", "Quebec", (45.42, -75.70), (45.51, -73.57)),
    ]
}

fn default_zones() -> Vec<String> {
    [
        "BRUCE",
        "EAST",
        "ESSA",
        "NIAGARA",
        "NORTHEAST",
        "NORTHWEST",
        "OTTAWA",
        "SOUTHWEST",
        "TORONTO",
        "WEST",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn generator(name: &str, lat: f64, lon: f64) -> GeneratorSiteConfig {
    GeneratorSiteConfig {
        name: name.into(),
        position: GeoPoint::new(lat, lon),
    }
}

fn default_generators() -> Vec<GeneratorSiteConfig> {
    vec![
        generator("BRUCEA-G1", 44.33, -81.60),
        generator("DARLINGTON-G1", 43.87, -78.72),
        generator("PICKERINGB-G5", 43.81, -79.07),
        generator("BECK2-G1", 43.15, -79.05),
        generator("LENNOX-G1", 44.15, -76.85),
        generator("PORTLANDS-G1", 43.65, -79.33),
        generator("HENVEY INLET-LT.AG_T1", 45.87, -80.57),
    ]
}

impl Default for DataServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_data_url(),
            timeout_secs: default_timeout(),
            max_requests_per_sec: default_max_rps(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_cache_max_entries(),
            realtime_tolerance_minutes: default_rt_tolerance(),
        }
    }
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            wms_base_url: default_wms_url(),
            window_hours: default_window_hours(),
            eager_steps: default_eager_steps(),
            stagger_ms: default_stagger_ms(),
            temperature_opacity: default_temperature_opacity(),
            precipitation_opacity: default_precipitation_opacity(),
            cloud_cover_opacity: default_cloud_opacity(),
            initially_visible: default_visible_rasters(),
            image_width: default_image_width(),
            image_height: default_image_height(),
            bbox: default_bbox(),
        }
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            cycle_ms: default_cycle_ms(),
            indicators_per_corridor: default_indicators_per_corridor(),
            noise_threshold_mw: default_noise_threshold(),
            display_fps: default_display_fps(),
            constrained_max_fps: default_constrained_fps(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            data_service: DataServiceConfig::default(),
            fetch: FetchConfig::default(),
            raster: RasterConfig::default(),
            animation: AnimationConfig::default(),
            constrained_device: false,
            flows_visible: true,
            corridors: default_corridors(),
            zones: default_zones(),
            generators: default_generators(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: OverlayConfig = toml::from_str(
            r#"
            constrained_device = true

            [fetch]
            throttle_ms = 250

            [raster]
            initially_visible = ["precipitation", "cloud_cover"]
            "#,
        )
        .expect("partial config should parse");

        assert!(cfg.constrained_device);
        assert_eq!(cfg.fetch.throttle_ms, 250);
        assert_eq!(cfg.fetch.cache_ttl_secs, 60);
        assert_eq!(
            cfg.raster.initially_visible,
            vec![RasterType::Precipitation, RasterType::CloudCover]
        );
        assert_eq!(cfg.corridors.len(), 5);
        assert_eq!(cfg.zones.len(), 10);
        assert_eq!(cfg.generators.len(), 7);
    }

    #[test]
    fn test_generator_sites_from_toml() {
        let cfg: OverlayConfig = toml::from_str(
            r#"
            [[generators]]
            name = "NANTICOKE-SOLAR"
            position = { lat = 42.80, lon = -80.05 }
            "#,
        )
        .expect("generator list should parse");

        assert_eq!(cfg.generators.len(), 1);
        assert_eq!(cfg.generators[0].position, GeoPoint::new(42.80, -80.05));
    }

    #[test]
    fn test_opacity_per_type() {
        let raster = RasterConfig::default();
        assert!((raster.opacity(RasterType::Precipitation) - 0.7).abs() < f32::EPSILON);
        assert!(raster.opacity(RasterType::CloudCover) > 0.0);
    }
}
