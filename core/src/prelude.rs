use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::patient_interface::RawRecord;

pub const MS_PER_HOUR: i64 = 60 * 60 * 1000;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Half-open `[start, end)` range of epoch-millisecond timestamps.
///
/// The constructor rejects empty or inverted ranges, so every value in
/// circulation satisfies `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "IntervalRepr", into = "IntervalRepr")]
pub struct Interval {
    start: i64,
    end: i64,
}

#[derive(Serialize, Deserialize)]
struct IntervalRepr {
    start: i64,
    end: i64,
}

impl TryFrom<IntervalRepr> for Interval {
    type Error = LoaderError;

    fn try_from(repr: IntervalRepr) -> Result<Self, Self::Error> {
        Interval::new(repr.start, repr.end)
    }
}

impl From<Interval> for IntervalRepr {
    fn from(interval: Interval) -> Self {
        IntervalRepr {
            start: interval.start,
            end: interval.end,
        }
    }
}

impl Interval {
    pub fn new(start: i64, end: i64) -> LoaderResult<Self> {
        if start >= end {
            return Err(LoaderError::InvalidRange(format!(
                "interval start {} must be before end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn contains_point(&self, at: i64) -> bool {
        self.start <= at && at < self.end
    }

    /// Common part of both intervals, `None` when they do not overlap.
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Interval { start, end })
    }

    pub fn overlaps_or_touches(&self, other: &Interval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Smallest interval covering both inputs.
    pub fn span(&self, other: &Interval) -> Interval {
        Interval {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn expand(&self, margin_ms: i64) -> Interval {
        let margin = margin_ms.max(0);
        Interval {
            start: self.start.saturating_sub(margin),
            end: self.end.saturating_add(margin),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Viewport requested by the chart: a center timestamp and a radius around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayWindow {
    pub center: i64,
    pub radius: i64,
}

impl DisplayWindow {
    pub fn new(center: i64, radius: i64) -> Self {
        Self { center, radius }
    }

    pub fn to_interval(&self) -> LoaderResult<Interval> {
        if self.radius <= 0 {
            return Err(LoaderError::InvalidRange(format!(
                "display window radius must be positive, got {}",
                self.radius
            )));
        }
        Interval::new(
            self.center.saturating_sub(self.radius),
            self.center.saturating_add(self.radius),
        )
    }
}

/// Tuning knobs for the window loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Added on both sides of a requested window whenever a fetch is needed.
    pub overfetch_margin_ms: i64,
    /// Widen requested windows to whole UTC days.
    pub align_to_days: bool,
    /// Whole weeks fetched before the week holding the newest datum on first load.
    pub initial_lookback_weeks: u32,
    pub fetch_timeout_ms: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            overfetch_margin_ms: 3 * MS_PER_DAY,
            align_to_days: true,
            initial_lookback_weeks: 2,
            fetch_timeout_ms: None,
        }
    }
}

impl LoaderConfig {
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }
}

/// Common error type for the loader and its collaborators.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("processing failed: {0}")]
    Process(String),
    #[error("no data: {0}")]
    NoData(String),
    #[error("loader has no active patient session")]
    NotInitialized,
    #[error("request abandoned by a session reset")]
    SessionReset,
    #[error("loader task has stopped")]
    Shutdown,
}

impl LoaderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoaderError::Fetch(_) | LoaderError::Process(_) | LoaderError::NoData(_)
        )
    }
}

pub type LoaderResult<T> = Result<T, LoaderError>;

/// Processed event held in the resident dataset.
pub trait TimedEvent: Clone + Send + Sync + 'static {
    /// Natural identity used for de-duplication across overlapping fetches.
    fn event_id(&self) -> &str;
    fn epoch_ms(&self) -> i64;
}

/// Remote patient data API.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Full historical span for the patient, `None` when nothing was ever uploaded.
    async fn outer_range(&self, patient: &str) -> LoaderResult<Option<Interval>>;

    async fn fetch_records(&self, patient: &str, range: Interval) -> LoaderResult<Vec<RawRecord>>;

    async fn fetch_messages(
        &self,
        _patient: &str,
        _range: Interval,
    ) -> LoaderResult<Vec<RawRecord>> {
        Ok(Vec::new())
    }
}

/// Turns raw API records into typed events.
#[async_trait]
pub trait Reshaper: Send + Sync {
    type Event: TimedEvent;

    async fn reshape(&self, raw: Vec<RawRecord>) -> LoaderResult<Vec<Self::Event>>;
}
