//! Styling rules for corridor lines, zonal price polygons and generator markers.

use chrono::{DateTime, Duration, Utc};
use common::{FlowDirection, FlowEntry, FuelType, GeneratorEntry, PriceEntry, TemporalMode};

use crate::canvas::LayerStyle;
use crate::data_cache::CacheRecord;
use crate::time_snap::snap_to_five_minute;

// ── Palette ───────────────────────────────────────────────────────────

pub const NO_DATA_COLOR: &str = "#8a8f98";
pub const IDLE_COLOR: &str = "#c3c7cf";
pub const EXPORT_COLOR: &str = "#22c55e";
pub const IMPORT_COLOR: &str = "#f97316";
pub const INDICATOR_COLOR: &str = "#f8fafc";

const MIN_WEIGHT: f32 = 2.0;
const MAX_WEIGHT: f32 = 8.0;
/// Flow at which a corridor line reaches full weight.
const FULL_WEIGHT_MW: f64 = 2000.0;

/// $/MWh upper bounds and fill colours, cheapest first.
const PRICE_RAMP: [(f64, &str); 5] = [
    (0.0, "#3b82f6"),
    (25.0, "#10b981"),
    (50.0, "#eab308"),
    (100.0, "#f97316"),
    (250.0, "#ef4444"),
];
const EXTREME_PRICE_COLOR: &str = "#7f1d1d";
const ZONE_FILL_OPACITY: f32 = 0.35;
const NO_DATA_FILL_OPACITY: f32 = 0.12;

// ── Corridors ─────────────────────────────────────────────────────────

/// Line style for a corridor. A missing flow draws the dashed "no data" line.
pub fn corridor_style(flow: Option<&FlowEntry>, noise_threshold_mw: f64) -> LayerStyle {
    let Some(flow) = flow else {
        return LayerStyle::Corridor {
            color: NO_DATA_COLOR,
            weight: MIN_WEIGHT,
            dashed: true,
        };
    };

    let color = match flow.direction(noise_threshold_mw) {
        FlowDirection::Export => EXPORT_COLOR,
        FlowDirection::Import => IMPORT_COLOR,
        FlowDirection::Idle => IDLE_COLOR,
    };
    let share = (flow.megawatts.abs() / FULL_WEIGHT_MW).clamp(0.0, 1.0) as f32;
    LayerStyle::Corridor {
        color,
        weight: MIN_WEIGHT + (MAX_WEIGHT - MIN_WEIGHT) * share,
        dashed: false,
    }
}

// ── Zones ─────────────────────────────────────────────────────────────

pub fn price_color(price: f64) -> &'static str {
    PRICE_RAMP
        .iter()
        .find(|(upper, _)| price < *upper)
        .map(|(_, color)| *color)
        .unwrap_or(EXTREME_PRICE_COLOR)
}

pub fn zone_style(price: Option<f64>) -> LayerStyle {
    match price {
        Some(price) => LayerStyle::Zone {
            fill_color: price_color(price),
            fill_opacity: ZONE_FILL_OPACITY,
        },
        None => LayerStyle::Zone {
            fill_color: NO_DATA_COLOR,
            fill_opacity: NO_DATA_FILL_OPACITY,
        },
    }
}

/// The realtime sample closest to `instant` on the 5-minute grid, if within tolerance.
pub fn match_realtime(
    samples: &[PriceEntry],
    instant: DateTime<Utc>,
    tolerance: Duration,
) -> Option<&PriceEntry> {
    let target = snap_to_five_minute(instant);
    let tolerance_secs = tolerance.num_seconds();
    samples
        .iter()
        .map(|s| (s, (snap_to_five_minute(s.observed_at) - target).num_seconds().abs()))
        .filter(|(_, distance)| *distance <= tolerance_secs)
        .min_by_key(|(_, distance)| *distance)
        .map(|(s, _)| s)
}

/// Price shown for a zone at `instant`.
///
/// Past positions prefer a matching realtime sample and fall back to the
/// day-ahead price for the hour; forecast positions only have day-ahead.
pub fn zone_price(
    record: &CacheRecord,
    zone: &str,
    instant: DateTime<Utc>,
    mode: TemporalMode,
    tolerance: Duration,
) -> Option<f64> {
    if mode == TemporalMode::Past {
        let realtime = record
            .realtime_prices
            .as_ref()
            .and_then(|by_zone| by_zone.get(zone))
            .and_then(|samples| match_realtime(samples, instant, tolerance));
        if let Some(sample) = realtime {
            return Some(sample.price);
        }
    }
    record
        .day_ahead_prices
        .as_ref()
        .and_then(|by_zone| by_zone.get(zone))
        .map(|entry| entry.price)
}

// ── Generators ────────────────────────────────────────────────────────

const MIN_MARKER_RADIUS: f32 = 4.0;
const MAX_MARKER_RADIUS: f32 = 14.0;
/// Capability at which a marker reaches full size.
const FULL_MARKER_MW: f64 = 1500.0;
const OFFLINE_FILL_OPACITY: f32 = 0.15;

pub fn fuel_color(fuel: FuelType) -> &'static str {
    match fuel {
        FuelType::Nuclear => "#a855f7",
        FuelType::Hydro => "#0ea5e9",
        FuelType::Gas => "#f59e0b",
        FuelType::Wind => "#14b8a6",
        FuelType::Solar => "#facc15",
        FuelType::Biofuel => "#84cc16",
        FuelType::Other => "#94a3b8",
    }
}

/// Marker style for a generator. Size follows capability, fill follows
/// output as a share of capability.
pub fn generator_style(entry: Option<&GeneratorEntry>) -> LayerStyle {
    let Some(entry) = entry else {
        return LayerStyle::Generator {
            color: NO_DATA_COLOR,
            radius: MIN_MARKER_RADIUS,
            fill_opacity: NO_DATA_FILL_OPACITY,
        };
    };

    let share = (entry.capability_mw / FULL_MARKER_MW).clamp(0.0, 1.0) as f32;
    let fill_opacity = match entry.utilization() {
        Some(u) => OFFLINE_FILL_OPACITY + (1.0 - OFFLINE_FILL_OPACITY) * u as f32,
        None => OFFLINE_FILL_OPACITY,
    };
    LayerStyle::Generator {
        color: fuel_color(entry.fuel_type),
        radius: MIN_MARKER_RADIUS + (MAX_MARKER_RADIUS - MIN_MARKER_RADIUS) * share,
        fill_opacity,
    }
}
