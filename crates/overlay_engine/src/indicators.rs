//! Animated flow indicators and the cell they are published through.
//!
//! The fetch path is the only writer: every new flow snapshot replaces the
//! whole indicator set. The animator only ever reads the latest set at the
//! top of a frame and never mutates it.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

use common::config::CorridorConfig;
use common::{FlowDirection, FlowEntry, GeoPoint};
use tokio::sync::watch;

/// One marker travelling along a corridor.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimatedIndicator {
    pub group_key: String,
    pub from_point: GeoPoint,
    pub to_point: GeoPoint,
    /// Fraction of a cycle this marker is ahead of its siblings, in [0, 1).
    pub phase_offset: f64,
}

/// Where and how visible an indicator is on a given frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorFrame {
    pub position: GeoPoint,
    pub opacity: f32,
}

impl AnimatedIndicator {
    /// Position and fade at `elapsed_ms` into the animation.
    ///
    /// Opacity follows `sin(πt)`: zero at both endpoints, full at mid-corridor.
    pub fn frame_at(&self, elapsed_ms: f64, cycle_ms: f64) -> IndicatorFrame {
        let cycle_ms = cycle_ms.max(1.0);
        let t = (elapsed_ms / cycle_ms + self.phase_offset).rem_euclid(1.0);
        IndicatorFrame {
            position: self.from_point.lerp(self.to_point, t),
            opacity: (PI * t).sin().max(0.0) as f32,
        }
    }
}

/// Immutable indicator set shared between the fetch path and the animator.
pub type IndicatorSnapshot = Arc<Vec<AnimatedIndicator>>;

/// Build the full indicator set for a flow snapshot.
///
/// Exports travel local → remote, imports remote → local. Corridors below
/// the noise threshold or without data get no indicators.
pub fn build_indicators(
    flows: &HashMap<String, FlowEntry>,
    corridors: &[CorridorConfig],
    per_corridor: usize,
    noise_threshold_mw: f64,
) -> Vec<AnimatedIndicator> {
    let mut indicators = Vec::with_capacity(corridors.len() * per_corridor);
    for corridor in corridors {
        let Some(flow) = flows.get(&corridor.group_key) else {
            continue;
        };
        let (from_point, to_point) = match flow.direction(noise_threshold_mw) {
            FlowDirection::Export => (corridor.local, corridor.remote),
            FlowDirection::Import => (corridor.remote, corridor.local),
            FlowDirection::Idle => continue,
        };
        for i in 0..per_corridor {
            indicators.push(AnimatedIndicator {
                group_key: corridor.group_key.clone(),
                from_point,
                to_point,
                phase_offset: i as f64 / per_corridor as f64,
            });
        }
    }
    indicators
}

/// Single-writer side of the indicator cell.
#[derive(Debug)]
pub struct IndicatorFeed {
    tx: watch::Sender<IndicatorSnapshot>,
}

impl IndicatorFeed {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self { tx }
    }

    /// Replace the published set wholesale.
    pub fn publish(&self, indicators: Vec<AnimatedIndicator>) {
        self.tx.send_replace(Arc::new(indicators));
    }

    pub fn clear(&self) {
        self.publish(Vec::new());
    }

    /// A reader handle for the animator.
    pub fn subscribe(&self) -> IndicatorReader {
        IndicatorReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn current(&self) -> IndicatorSnapshot {
        Arc::clone(&self.tx.borrow())
    }
}

impl Default for IndicatorFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the indicator cell.
#[derive(Debug, Clone)]
pub struct IndicatorReader {
    rx: watch::Receiver<IndicatorSnapshot>,
}

impl IndicatorReader {
    /// The latest published set. Cheap: clones an `Arc`.
    pub fn latest(&self) -> IndicatorSnapshot {
        Arc::clone(&self.rx.borrow())
    }
}
