//! The map canvas contract.
//!
//! The engine never touches a rendering library directly. Every overlay
//! is a layer identified by an opaque `LayerId`; subsystems own disjoint
//! sets of ids and only add, remove, restyle or fade them. All operations
//! are synchronous and idempotent per id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use common::{GeoPoint, RasterSource, RasterType};
use serde::Serialize;

/// Opaque handle to one layer on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LayerId(u64);

impl LayerId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Hands out unique ids for every layer created by one engine instance.
#[derive(Debug, Default)]
pub struct LayerIdAllocator {
    next: AtomicU64,
}

impl LayerIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> LayerId {
        LayerId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// What a layer draws. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSource {
    Raster {
        raster_type: RasterType,
        time_step: DateTime<Utc>,
        source: RasterSource,
    },
    Corridor {
        group_key: String,
        path: Vec<GeoPoint>,
    },
    Zone {
        zone: String,
    },
    Generator {
        name: String,
        position: GeoPoint,
    },
    Indicator,
}

/// How a vector layer is drawn. Changes freely after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerStyle {
    Corridor {
        color: &'static str,
        weight: f32,
        dashed: bool,
    },
    Zone {
        fill_color: &'static str,
        fill_opacity: f32,
    },
    Generator {
        color: &'static str,
        radius: f32,
        fill_opacity: f32,
    },
    Indicator {
        position: GeoPoint,
        radius: f32,
        color: &'static str,
    },
}

/// The rendering surface. Shared by every overlay subsystem.
pub trait MapCanvas: Send + Sync {
    fn add_layer(&self, id: LayerId, source: &LayerSource);
    fn remove_layer(&self, id: LayerId);
    fn set_opacity(&self, id: LayerId, opacity: f32);
    fn set_style(&self, id: LayerId, style: &LayerStyle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let ids = LayerIdAllocator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "layer#1");
    }
}
