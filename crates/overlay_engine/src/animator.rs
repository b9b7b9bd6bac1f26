//! Frame loop that moves flow indicators along their corridors.
//!
//! Two states: `Idle` (no loop) and `Running` (one frame task). The loop
//! reads the latest indicator snapshot at the top of every frame, so the
//! set can be swapped between frames at any time, and it never waits on
//! fetches or re-renders. On constrained devices a frame-budget check
//! skips interpolation until the minimum frame interval has passed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use common::config::AnimationConfig;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::canvas::{LayerId, LayerIdAllocator, LayerSource, LayerStyle, MapCanvas};
use crate::indicators::{AnimatedIndicator, IndicatorReader};
use crate::styling::INDICATOR_COLOR;

const INDICATOR_RADIUS: f32 = 3.5;
/// Tolerance for tick jitter when comparing against the frame budget.
const FRAME_SLACK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimatorState {
    Idle,
    Running,
}

/// Frame pacing for the animation loop.
#[derive(Debug, Clone, Copy)]
pub struct FrameTiming {
    /// One full traversal of a corridor.
    pub cycle: Duration,
    /// Display refresh interval the loop wakes on.
    pub tick: Duration,
    /// Minimum spacing between rendered frames, if capped.
    pub min_frame_interval: Option<Duration>,
}

impl FrameTiming {
    pub fn from_config(config: &AnimationConfig, constrained_device: bool) -> Self {
        let fps_interval = |fps: u32| Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        Self {
            cycle: Duration::from_millis(config.cycle_ms.max(1)),
            tick: fps_interval(config.display_fps),
            min_frame_interval: constrained_device
                .then(|| fps_interval(config.constrained_max_fps)),
        }
    }
}

/// Canvas markers drawn for one running loop.
struct MarkerPool {
    canvas: Arc<dyn MapCanvas>,
    ids: Arc<LayerIdAllocator>,
    markers: Vec<LayerId>,
    closed: bool,
}

impl MarkerPool {
    fn new(canvas: Arc<dyn MapCanvas>, ids: Arc<LayerIdAllocator>) -> Self {
        Self {
            canvas,
            ids,
            markers: Vec::new(),
            closed: false,
        }
    }

    /// Draw one frame. Returns false once the pool has been closed.
    fn render(&mut self, indicators: &[AnimatedIndicator], elapsed_ms: f64, cycle_ms: f64) -> bool {
        if self.closed {
            return false;
        }

        while self.markers.len() < indicators.len() {
            let id = self.ids.next_id();
            self.canvas.add_layer(id, &LayerSource::Indicator);
            self.markers.push(id);
        }
        while self.markers.len() > indicators.len() {
            if let Some(id) = self.markers.pop() {
                self.canvas.remove_layer(id);
            }
        }

        for (indicator, id) in indicators.iter().zip(&self.markers) {
            let frame = indicator.frame_at(elapsed_ms, cycle_ms);
            self.canvas.set_style(
                *id,
                &LayerStyle::Indicator {
                    position: frame.position,
                    radius: INDICATOR_RADIUS,
                    color: INDICATOR_COLOR,
                },
            );
            self.canvas.set_opacity(*id, frame.opacity);
        }
        true
    }

    fn close(&mut self) {
        for id in self.markers.drain(..) {
            self.canvas.remove_layer(id);
        }
        self.closed = true;
    }
}

struct RunningLoop {
    handle: JoinHandle<()>,
    pool: Arc<Mutex<MarkerPool>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drives the indicator markers independently of the fetch cadence.
pub struct FlowAnimator {
    canvas: Arc<dyn MapCanvas>,
    ids: Arc<LayerIdAllocator>,
    reader: IndicatorReader,
    timing: FrameTiming,
    enabled: AtomicBool,
    running: Mutex<Option<RunningLoop>>,
    frames: Arc<AtomicU64>,
}

impl FlowAnimator {
    pub fn new(
        canvas: Arc<dyn MapCanvas>,
        ids: Arc<LayerIdAllocator>,
        reader: IndicatorReader,
        timing: FrameTiming,
        enabled: bool,
    ) -> Self {
        Self {
            canvas,
            ids,
            reader,
            timing,
            enabled: AtomicBool::new(enabled),
            running: Mutex::new(None),
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.reconcile();
    }

    /// Move to `Running` when enabled with indicators to draw, `Idle` otherwise.
    pub fn reconcile(&self) {
        let wanted = self.enabled.load(Ordering::SeqCst) && !self.reader.latest().is_empty();
        let mut running = lock(&self.running);
        let active = running
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished());

        match (active, wanted) {
            (false, true) => {
                if let Some(stale) = running.take() {
                    lock(&stale.pool).close();
                }
                *running = Some(self.start());
                info!("flow animation running");
            }
            (true, false) => {
                if let Some(current) = running.take() {
                    Self::stop(current);
                }
                info!("flow animation idle");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> AnimatorState {
        let running = lock(&self.running);
        match running.as_ref() {
            Some(r) if !r.handle.is_finished() => AnimatorState::Running,
            _ => AnimatorState::Idle,
        }
    }

    /// Frames that actually interpolated and drew markers.
    pub fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Cancel the loop and remove every marker. Idempotent.
    pub fn shutdown(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        if let Some(current) = lock(&self.running).take() {
            Self::stop(current);
        }
    }

    fn start(&self) -> RunningLoop {
        let pool = Arc::new(Mutex::new(MarkerPool::new(
            Arc::clone(&self.canvas),
            Arc::clone(&self.ids),
        )));
        let handle = tokio::spawn(run_frames(
            self.reader.clone(),
            self.timing,
            Arc::clone(&pool),
            Arc::clone(&self.frames),
        ));
        RunningLoop { handle, pool }
    }

    fn stop(current: RunningLoop) {
        current.handle.abort();
        lock(&current.pool).close();
    }
}

async fn run_frames(
    reader: IndicatorReader,
    timing: FrameTiming,
    pool: Arc<Mutex<MarkerPool>>,
    frames: Arc<AtomicU64>,
) {
    let started = Instant::now();
    let cycle_ms = timing.cycle.as_secs_f64() * 1000.0;
    let mut ticker = interval(timing.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_frame: Option<Instant> = None;

    loop {
        ticker.tick().await;
        let now = Instant::now();

        if let (Some(min), Some(last)) = (timing.min_frame_interval, last_frame) {
            if now.saturating_duration_since(last) + FRAME_SLACK < min {
                continue;
            }
        }
        last_frame = Some(now);

        let indicators = reader.latest();
        let elapsed_ms = now.saturating_duration_since(started).as_secs_f64() * 1000.0;
        if !lock(&pool).render(&indicators, elapsed_ms, cycle_ms) {
            debug!("marker pool closed; frame loop exiting");
            return;
        }
        frames.fetch_add(1, Ordering::Relaxed);
    }
}
