use std::sync::Mutex;

use serde::Serialize;

use crate::loading::dataset::MergeStats;

pub struct MetricsRecorder {
    inner: Mutex<LoaderMetrics>,
}

/// Counters accumulated over the lifetime of a loader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoaderMetrics {
    pub fetches: usize,
    pub windows_from_memory: usize,
    pub records_merged: usize,
    pub duplicates_dropped: usize,
    pub errors: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LoaderMetrics::default()),
        }
    }

    pub fn record_fetch(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.fetches += 1;
        }
    }

    pub fn record_memory_hit(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.windows_from_memory += 1;
        }
    }

    pub fn record_merge(&self, stats: MergeStats) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.records_merged += stats.added;
            metrics.duplicates_dropped += stats.duplicates;
        }
    }

    pub fn record_error(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.errors += 1;
        }
    }

    pub fn snapshot(&self) -> LoaderMetrics {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            LoaderMetrics::default()
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_stats_accumulate() {
        let recorder = MetricsRecorder::new();
        recorder.record_fetch();
        recorder.record_merge(MergeStats {
            added: 3,
            duplicates: 1,
        });
        recorder.record_merge(MergeStats {
            added: 2,
            duplicates: 0,
        });
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.fetches, 1);
        assert_eq!(snapshot.records_merged, 5);
        assert_eq!(snapshot.duplicates_dropped, 1);
    }
}
