//! Test doubles for the engine's collaborators.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    DataService, Error, FlowEntry, GeneratorEntry, PriceEntry, RasterSource, RasterTileProvider,
    RasterType,
};

use crate::canvas::{LayerId, LayerSource, LayerStyle, MapCanvas};

// ── Canvas ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum CanvasCall {
    Add(LayerId),
    Remove(LayerId),
    Opacity(LayerId, f32),
    Style(LayerId, LayerStyle),
}

#[derive(Default)]
struct CanvasState {
    log: Vec<CanvasCall>,
    attached: BTreeMap<LayerId, LayerSource>,
    opacity: HashMap<LayerId, f32>,
    styles: HashMap<LayerId, LayerStyle>,
}

/// Canvas that records every call and tracks the resulting layer state.
#[derive(Default)]
pub struct RecordingCanvas {
    state: Mutex<CanvasState>,
}

impl RecordingCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<CanvasCall> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn attached_count(&self) -> usize {
        self.state.lock().unwrap().attached.len()
    }

    /// Attached raster layers of one type with their opacity.
    pub fn raster_layers(&self, raster_type: RasterType) -> Vec<(DateTime<Utc>, f32)> {
        let state = self.state.lock().unwrap();
        state
            .attached
            .iter()
            .filter_map(|(id, source)| match source {
                LayerSource::Raster {
                    raster_type: rt,
                    time_step,
                    ..
                } if *rt == raster_type => {
                    Some((*time_step, state.opacity.get(id).copied().unwrap_or(1.0)))
                }
                _ => None,
            })
            .collect()
    }

    /// Attached layers of one raster type currently drawn with nonzero opacity.
    pub fn visible_rasters(&self, raster_type: RasterType) -> Vec<DateTime<Utc>> {
        self.raster_layers(raster_type)
            .into_iter()
            .filter(|(_, opacity)| *opacity > 0.0)
            .map(|(step, _)| step)
            .collect()
    }

    pub fn nonzero_opacity_layers(&self) -> Vec<LayerId> {
        let state = self.state.lock().unwrap();
        state
            .attached
            .keys()
            .filter(|id| state.opacity.get(*id).copied().unwrap_or(1.0) > 0.0)
            .copied()
            .collect()
    }

    /// Current style of the attached corridor layer for `group_key`.
    pub fn corridor_style(&self, group_key: &str) -> Option<LayerStyle> {
        let state = self.state.lock().unwrap();
        state.attached.iter().find_map(|(id, source)| match source {
            LayerSource::Corridor { group_key: key, .. } if key == group_key => {
                state.styles.get(id).cloned()
            }
            _ => None,
        })
    }

    pub fn corridor_opacity(&self, group_key: &str) -> Option<f32> {
        let state = self.state.lock().unwrap();
        state.attached.iter().find_map(|(id, source)| match source {
            LayerSource::Corridor { group_key: key, .. } if key == group_key => {
                Some(state.opacity.get(id).copied().unwrap_or(1.0))
            }
            _ => None,
        })
    }

    pub fn zone_style(&self, zone: &str) -> Option<LayerStyle> {
        let state = self.state.lock().unwrap();
        state.attached.iter().find_map(|(id, source)| match source {
            LayerSource::Zone { zone: name } if name == zone => state.styles.get(id).cloned(),
            _ => None,
        })
    }

    pub fn generator_style(&self, name: &str) -> Option<LayerStyle> {
        let state = self.state.lock().unwrap();
        state.attached.iter().find_map(|(id, source)| match source {
            LayerSource::Generator { name: key, .. } if key == name => {
                state.styles.get(id).cloned()
            }
            _ => None,
        })
    }

    pub fn indicator_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .attached
            .values()
            .filter(|source| matches!(source, LayerSource::Indicator))
            .count()
    }
}

impl MapCanvas for RecordingCanvas {
    fn add_layer(&self, id: LayerId, source: &LayerSource) {
        let mut state = self.state.lock().unwrap();
        state.log.push(CanvasCall::Add(id));
        state.attached.insert(id, source.clone());
    }

    fn remove_layer(&self, id: LayerId) {
        let mut state = self.state.lock().unwrap();
        state.log.push(CanvasCall::Remove(id));
        state.attached.remove(&id);
        state.opacity.remove(&id);
        state.styles.remove(&id);
    }

    fn set_opacity(&self, id: LayerId, opacity: f32) {
        let mut state = self.state.lock().unwrap();
        state.log.push(CanvasCall::Opacity(id, opacity));
        state.opacity.insert(id, opacity);
    }

    fn set_style(&self, id: LayerId, style: &LayerStyle) {
        let mut state = self.state.lock().unwrap();
        state.log.push(CanvasCall::Style(id, style.clone()));
        state.styles.insert(id, style.clone());
    }
}

// ── Data service ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    FlowAt(DateTime<Utc>),
    FlowNow,
    PricesAt(DateTime<Utc>),
    GeneratorsAt(DateTime<Utc>),
}

/// Data service returning canned flows, prices and generator output.
#[derive(Default)]
pub struct MockDataService {
    calls: Mutex<Vec<ServiceCall>>,
    flows: Mutex<Vec<FlowEntry>>,
    prices: Mutex<Vec<PriceEntry>>,
    generators: Mutex<Vec<GeneratorEntry>>,
    failing: AtomicBool,
    latency: Mutex<Duration>,
}

impl MockDataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flows(flows: Vec<FlowEntry>) -> Self {
        let service = Self::new();
        service.set_flows(flows);
        service
    }

    pub fn set_flows(&self, flows: Vec<FlowEntry>) {
        *self.flows.lock().unwrap() = flows;
    }

    pub fn set_prices(&self, prices: Vec<PriceEntry>) {
        *self.prices.lock().unwrap() = prices;
    }

    pub fn set_generators(&self, generators: Vec<GeneratorEntry>) {
        *self.generators.lock().unwrap() = generators;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Flow requests only (at-time and now), in order.
    pub fn flow_calls(&self) -> Vec<ServiceCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, ServiceCall::FlowAt(_) | ServiceCall::FlowNow))
            .collect()
    }

    async fn respond<T: Clone>(
        &self,
        call: ServiceCall,
        data: &Mutex<Vec<T>>,
    ) -> Result<Vec<T>, Error> {
        self.calls.lock().unwrap().push(call);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Http("connection refused".into()));
        }
        Ok(data.lock().unwrap().clone())
    }
}

#[async_trait]
impl DataService for MockDataService {
    async fn fetch_flow_at_time(&self, at: DateTime<Utc>) -> Result<Vec<FlowEntry>, Error> {
        self.respond(ServiceCall::FlowAt(at), &self.flows).await
    }

    async fn fetch_flow_now(&self) -> Result<Vec<FlowEntry>, Error> {
        self.respond(ServiceCall::FlowNow, &self.flows).await
    }

    async fn fetch_prices_at_time(&self, at: DateTime<Utc>) -> Result<Vec<PriceEntry>, Error> {
        self.respond(ServiceCall::PricesAt(at), &self.prices).await
    }

    async fn fetch_generators_at_time(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Vec<GeneratorEntry>, Error> {
        self.respond(ServiceCall::GeneratorsAt(at), &self.generators).await
    }
}

// ── Tiles ─────────────────────────────────────────────────────────────

pub struct StaticTileProvider;

impl RasterTileProvider for StaticTileProvider {
    fn layer_source(&self, raster_type: RasterType, time_step: DateTime<Utc>) -> RasterSource {
        RasterSource {
            url: format!("tiles://{}/{}", raster_type, time_step.timestamp()),
        }
    }
}
