use serde::Serialize;
use windowcore::loading::DatasetBounds;
use windowcore::prelude::{Interval, TimedEvent};
use windowcore::telemetry::LoaderMetrics;
use windowcore::LoaderSnapshot;

/// JSON summary of a loader snapshot served to the chart.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SnapshotModel {
    pub patient: Option<String>,
    pub phase: String,
    /// True until the first window of the session is resident.
    pub initial_load: bool,
    pub events: usize,
    pub bounds: Option<DatasetBounds>,
    pub outer: Option<Interval>,
    pub coverage: Vec<Interval>,
    pub pending: Option<Interval>,
    pub last_error: Option<String>,
    pub metrics: LoaderMetrics,
}

impl SnapshotModel {
    pub fn from_snapshot<E: TimedEvent>(snapshot: &LoaderSnapshot<E>, metrics: LoaderMetrics) -> Self {
        Self {
            patient: snapshot.patient.clone(),
            phase: snapshot.phase.to_string(),
            initial_load: snapshot.phase.is_initial(),
            events: snapshot.dataset.len(),
            bounds: snapshot.dataset.bounds(),
            outer: snapshot.outer,
            coverage: snapshot.coverage.clone(),
            pending: snapshot.pending,
            last_error: snapshot.last_error.as_ref().map(ToString::to_string),
            metrics,
        }
    }
}
