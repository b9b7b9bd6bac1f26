//! Domain types shared across the overlay.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Timeline ──────────────────────────────────────────────────────────

/// Which side of "now" the scrub instant sits on.
///
/// Derived on every scrub, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalMode {
    Past,
    Forecast,
}

impl TemporalMode {
    /// `Forecast` strictly after `now`, `Past` otherwise.
    pub fn classify(instant: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if instant > now {
            TemporalMode::Forecast
        } else {
            TemporalMode::Past
        }
    }

    /// Suffix appended to cache keys so the live boundary always changes the key.
    pub fn key_suffix(self) -> &'static str {
        match self {
            TemporalMode::Past => ":p",
            TemporalMode::Forecast => ":f",
        }
    }
}

// ── Flows ─────────────────────────────────────────────────────────────

/// Net flow on one interconnection group.
///
/// Positive megawatts are exports out of the modeled grid, negative are imports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub group_key: String,
    pub megawatts: f64,
    pub observed_at: DateTime<Utc>,
}

impl FlowEntry {
    pub fn direction(&self, noise_threshold_mw: f64) -> FlowDirection {
        if self.megawatts.abs() < noise_threshold_mw {
            FlowDirection::Idle
        } else if self.megawatts > 0.0 {
            FlowDirection::Export
        } else {
            FlowDirection::Import
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    Export,
    Import,
    Idle,
}

// ── Prices ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceMarket {
    #[serde(rename = "da")]
    DayAhead,
    #[serde(rename = "rt")]
    Realtime,
}

/// One zonal price sample in $/MWh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub zone: String,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
    pub market: PriceMarket,
}

// ── Generators ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelType {
    Nuclear,
    Hydro,
    Gas,
    Wind,
    Solar,
    Biofuel,
    Other,
}

impl FuelType {
    /// Lenient parse of the operator's fuel labels; unknown labels are `Other`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NUCLEAR" => FuelType::Nuclear,
            "HYDRO" | "WATER" => FuelType::Hydro,
            "GAS" | "NATURAL GAS" => FuelType::Gas,
            "WIND" => FuelType::Wind,
            "SOLAR" => FuelType::Solar,
            "BIOFUEL" | "BIOMASS" => FuelType::Biofuel,
            _ => FuelType::Other,
        }
    }
}

/// Hourly output of one generating unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorEntry {
    pub generator: String,
    pub fuel_type: FuelType,
    pub output_mw: f64,
    pub capability_mw: f64,
    pub observed_at: DateTime<Utc>,
}

impl GeneratorEntry {
    /// Output as a share of capability in [0, 1]; `None` without capability.
    pub fn utilization(&self) -> Option<f64> {
        if self.capability_mw > 0.0 {
            Some((self.output_mw / self.capability_mw).clamp(0.0, 1.0))
        } else {
            None
        }
    }
}

// ── Rasters ───────────────────────────────────────────────────────────

/// Gridded weather layers drawn under the vector overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterType {
    Temperature,
    Precipitation,
    CloudCover,
}

impl RasterType {
    pub const ALL: [RasterType; 3] = [
        RasterType::Temperature,
        RasterType::Precipitation,
        RasterType::CloudCover,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RasterType::Temperature => "temperature",
            RasterType::Precipitation => "precipitation",
            RasterType::CloudCover => "cloud_cover",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "temperature" | "temp" => Some(RasterType::Temperature),
            "precipitation" | "precip" => Some(RasterType::Precipitation),
            "cloud_cover" | "cloud" | "clouds" => Some(RasterType::CloudCover),
            _ => None,
        }
    }
}

impl fmt::Display for RasterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Geometry ──────────────────────────────────────────────────────────

/// A map position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Straight-line interpolation in degree space; `t` is clamped to [0, 1].
    pub fn lerp(self, to: GeoPoint, t: f64) -> GeoPoint {
        let t = t.clamp(0.0, 1.0);
        GeoPoint {
            lat: self.lat + (to.lat - self.lat) * t,
            lon: self.lon + (to.lon - self.lon) * t,
        }
    }
}
