//! A headless `MapCanvas` that tracks layer state and optionally appends
//! every command to a JSONL journal.

use std::collections::HashMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::warn;

use overlay_engine::{LayerId, LayerSource, LayerStyle, MapCanvas};

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

struct CommandJournal {
    path: PathBuf,
    file: File,
}

impl CommandJournal {
    fn open(path: PathBuf) -> std::io::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    fn write_event(&mut self, event: Value) {
        let result = (|| -> std::io::Result<()> {
            let line = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            writeln!(self.file, "{}", line)?;
            self.file.flush()?;
            Ok(())
        })();

        if let Err(e) = result {
            warn!("canvas journal write failed: {}", e);
        }
    }
}

#[derive(Default)]
struct CanvasState {
    attached: HashMap<LayerId, LayerSource>,
    opacity: HashMap<LayerId, f32>,
    commands: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanvasSummary {
    pub attached: usize,
    pub visible: usize,
    pub rasters: usize,
    pub commands: u64,
}

pub struct JournalCanvas {
    state: Mutex<CanvasState>,
    journal: Option<Mutex<CommandJournal>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl JournalCanvas {
    /// A canvas that only tracks state.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(CanvasState::default()),
            journal: None,
        }
    }

    /// A canvas that also appends every command to `path`.
    pub fn with_journal(path: PathBuf) -> std::io::Result<Self> {
        Ok(Self {
            state: Mutex::new(CanvasState::default()),
            journal: Some(Mutex::new(CommandJournal::open(path)?)),
        })
    }

    pub fn journal_path(&self) -> Option<PathBuf> {
        self.journal.as_ref().map(|j| lock(j).path.clone())
    }

    pub fn summary(&self) -> CanvasSummary {
        let state = lock(&self.state);
        CanvasSummary {
            attached: state.attached.len(),
            visible: state
                .attached
                .keys()
                .filter(|id| state.opacity.get(*id).copied().unwrap_or(1.0) > 0.0)
                .count(),
            rasters: state
                .attached
                .values()
                .filter(|s| matches!(s, LayerSource::Raster { .. }))
                .count(),
            commands: state.commands,
        }
    }

    fn record(&self, op: &str, id: LayerId, payload: Value) {
        lock(&self.state).commands += 1;
        if let Some(journal) = &self.journal {
            lock(journal).write_event(json!({
                "ts": now_iso(),
                "op": op,
                "layer": id.raw(),
                "payload": payload,
            }));
        }
    }
}

impl MapCanvas for JournalCanvas {
    fn add_layer(&self, id: LayerId, source: &LayerSource) {
        lock(&self.state).attached.insert(id, source.clone());
        self.record("add", id, serde_json::to_value(source).unwrap_or(Value::Null));
    }

    fn remove_layer(&self, id: LayerId) {
        {
            let mut state = lock(&self.state);
            state.attached.remove(&id);
            state.opacity.remove(&id);
        }
        self.record("remove", id, Value::Null);
    }

    fn set_opacity(&self, id: LayerId, opacity: f32) {
        lock(&self.state).opacity.insert(id, opacity);
        self.record("opacity", id, json!(opacity));
    }

    fn set_style(&self, id: LayerId, style: &LayerStyle) {
        self.record("style", id, serde_json::to_value(style).unwrap_or(Value::Null));
    }
}
