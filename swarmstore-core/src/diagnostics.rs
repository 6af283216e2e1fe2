use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::store::LayoutState;

/// Significant things that happen inside a store.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    LayoutDetected { layout: LayoutState },
    ManifestHeader { declared_size: u64 },
    SliceCreated { path: String, start: u64, size: u64 },
    SliceUnavailable { path: String, reason: String },
    ResizePostponed { size: u64 },
    ResizeDiscarded { size: u64 },
    Resized { size: u64 },
    ResizeIgnored { requested: u64, current: u64 },
    Failed { op: String, reason: String },
}

/// Sink for store events, handed to the store at construction.
pub trait Diagnostics: Send + Sync {
    fn event(&self, ev: &StoreEvent);
}

/// Forwards events to `tracing`, tagged with the swarm they belong to.
pub struct TracingDiagnostics {
    swarm: String,
}

impl TracingDiagnostics {
    pub fn new(swarm: impl Into<String>) -> Self {
        Self { swarm: swarm.into() }
    }

    pub fn shared(swarm: impl Into<String>) -> Arc<dyn Diagnostics> {
        Arc::new(Self::new(swarm))
    }
}

impl Diagnostics for TracingDiagnostics {
    fn event(&self, ev: &StoreEvent) {
        let swarm = self.swarm.as_str();
        let at = Utc::now().to_rfc3339();
        match ev {
            StoreEvent::LayoutDetected { layout } => {
                tracing::info!(swarm, %at, %layout, "storage: layout detected")
            }
            StoreEvent::ManifestHeader { declared_size } => {
                tracing::debug!(swarm, %at, declared_size, "storage: manifest header parsed")
            }
            StoreEvent::SliceCreated { path, start, size } => {
                tracing::debug!(swarm, %at, path = %path, start, size, "storage: slice created")
            }
            StoreEvent::SliceUnavailable { path, reason } => {
                tracing::warn!(swarm, %at, path = %path, reason = %reason, "storage: cannot open slice")
            }
            StoreEvent::ResizePostponed { size } => {
                tracing::debug!(swarm, %at, size, "storage: postpone resize")
            }
            StoreEvent::ResizeDiscarded { size } => {
                tracing::debug!(swarm, %at, size, "storage: postponed resize dropped for multi-file layout")
            }
            StoreEvent::Resized { size } => tracing::info!(swarm, %at, size, "storage: resized"),
            StoreEvent::ResizeIgnored { requested, current } => {
                tracing::debug!(swarm, %at, requested, current, "storage: resize to smaller ignored")
            }
            StoreEvent::Failed { op, reason } => {
                tracing::warn!(swarm, %at, op = %op, reason = %reason, "storage: operation failed")
            }
        }
    }
}

/// Discards everything.
pub struct NoopDiagnostics;

impl Diagnostics for NoopDiagnostics {
    fn event(&self, _ev: &StoreEvent) {}
}

/// Keeps every event in memory with the time it was recorded.
#[derive(Default)]
pub struct RecordingDiagnostics {
    events: Mutex<Vec<(DateTime<Utc>, StoreEvent)>>,
}

impl RecordingDiagnostics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.timestamped().into_iter().map(|(_, ev)| ev).collect()
    }

    pub fn timestamped(&self) -> Vec<(DateTime<Utc>, StoreEvent)> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn event(&self, ev: &StoreEvent) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).push((Utc::now(), ev.clone()));
    }
}
