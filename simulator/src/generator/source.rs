use crate::generator::profile::{build_history, PatientProfile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use windowcore::patient_interface::RawRecord;
use windowcore::prelude::{DataSource, Interval, LoaderError, LoaderResult};

/// Failures and latency injected into the synthetic API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultPlan {
    /// 1-based numbers of the record fetches that fail.
    pub fail_fetches: Vec<usize>,
    pub latency_ms: u64,
}

struct SourceState {
    patient: String,
    outer: Option<Interval>,
    records: Vec<RawRecord>,
    messages: Vec<RawRecord>,
    faults: FaultPlan,
    fetches: AtomicUsize,
    fetched: Mutex<Vec<Interval>>,
}

/// In-memory patient API backed by a generated history.
#[derive(Clone)]
pub struct SyntheticSource {
    state: Arc<SourceState>,
}

fn slice_of(records: &[RawRecord], range: Interval) -> Vec<RawRecord> {
    let from = records.partition_point(|record| record.time < range.start());
    let to = records.partition_point(|record| record.time < range.end());
    records[from..to].to_vec()
}

impl SyntheticSource {
    pub fn new(profile: &PatientProfile, faults: FaultPlan) -> anyhow::Result<Self> {
        let history = build_history(profile)?;
        let first = history.records.first().map(|record| record.time);
        let last = history.records.last().map(|record| record.time);
        let outer = match (first, last) {
            (Some(first), Some(last)) => Some(Interval::new(first, last + 1)?),
            _ => None,
        };
        log::info!(
            "generated {} records for patient {} (outer {:?})",
            history.len(),
            profile.patient,
            outer
        );
        Ok(Self {
            state: Arc::new(SourceState {
                patient: profile.patient.clone(),
                outer,
                records: history.records,
                messages: history.messages,
                faults,
                fetches: AtomicUsize::new(0),
                fetched: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn outer(&self) -> Option<Interval> {
        self.state.outer
    }

    /// Ranges passed to `fetch_records`, in call order.
    pub fn fetched_ranges(&self) -> Vec<Interval> {
        self.state
            .fetched
            .lock()
            .map(|fetched| fetched.clone())
            .unwrap_or_default()
    }

    pub fn fetch_count(&self) -> usize {
        self.state.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for SyntheticSource {
    async fn outer_range(&self, patient: &str) -> LoaderResult<Option<Interval>> {
        if patient != self.state.patient {
            return Ok(None);
        }
        Ok(self.state.outer)
    }

    async fn fetch_records(&self, patient: &str, range: Interval) -> LoaderResult<Vec<RawRecord>> {
        let number = self.state.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut fetched) = self.state.fetched.lock() {
            fetched.push(range);
        }
        if self.state.faults.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.state.faults.latency_ms)).await;
        }
        if self.state.faults.fail_fetches.contains(&number) {
            log::warn!("injecting failure into fetch {} of {}", number, range);
            return Err(LoaderError::Fetch(format!(
                "injected failure on fetch {}",
                number
            )));
        }
        if patient != self.state.patient {
            return Ok(Vec::new());
        }
        Ok(slice_of(&self.state.records, range))
    }

    async fn fetch_messages(&self, patient: &str, range: Interval) -> LoaderResult<Vec<RawRecord>> {
        if patient != self.state.patient {
            return Ok(Vec::new());
        }
        Ok(slice_of(&self.state.messages, range))
    }
}
