use std::collections::HashSet;

use serde::Serialize;

use crate::prelude::{DisplayWindow, Interval, TimedEvent, MS_PER_DAY};

/// Outcome of merging one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub added: usize,
    pub duplicates: usize,
}

/// Earliest and latest event timestamps, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetBounds {
    pub start: i64,
    pub end: i64,
}

/// De-duplicated, time-ordered events resident for the current patient.
///
/// Append-only: batches are merged in and nothing is evicted.
#[derive(Debug, Clone)]
pub struct ResidentDataset<E> {
    events: Vec<E>,
    seen: HashSet<String>,
    bounds: Option<DatasetBounds>,
}

impl<E: TimedEvent> ResidentDataset<E> {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            seen: HashSet::new(),
            bounds: None,
        }
    }

    /// Merges `batch`, keeping the first-seen instance of every event id.
    pub fn merge(&mut self, batch: Vec<E>) -> MergeStats {
        let mut stats = MergeStats::default();
        for event in batch {
            if self.seen.insert(event.event_id().to_owned()) {
                self.events.push(event);
                stats.added += 1;
            } else {
                stats.duplicates += 1;
            }
        }
        if stats.added > 0 {
            // stable, so equal timestamps keep arrival order
            self.events.sort_by_key(|event| event.epoch_ms());
            self.bounds = match (self.events.first(), self.events.last()) {
                (Some(first), Some(last)) => Some(DatasetBounds {
                    start: first.epoch_ms(),
                    end: last.epoch_ms(),
                }),
                _ => None,
            };
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[E] {
        &self.events
    }

    pub fn bounds(&self) -> Option<DatasetBounds> {
        self.bounds
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Events whose timestamp falls inside `range`.
    pub fn events_in(&self, range: Interval) -> &[E] {
        let from = self
            .events
            .partition_point(|event| event.epoch_ms() < range.start());
        let to = self
            .events
            .partition_point(|event| event.epoch_ms() < range.end());
        &self.events[from..to]
    }

    /// Half a day before the newest event.
    pub fn default_center(&self) -> Option<i64> {
        self.bounds.map(|bounds| bounds.end - MS_PER_DAY / 2)
    }

    /// One-day window around [`default_center`](Self::default_center), the
    /// view shown right after the first load.
    pub fn default_window(&self) -> Option<DisplayWindow> {
        self.default_center()
            .map(|center| DisplayWindow::new(center, MS_PER_DAY / 2))
    }
}

impl<E: TimedEvent> Default for ResidentDataset<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Point {
        id: &'static str,
        at: i64,
        label: &'static str,
    }

    impl TimedEvent for Point {
        fn event_id(&self) -> &str {
            self.id
        }

        fn epoch_ms(&self) -> i64 {
            self.at
        }
    }

    fn point(id: &'static str, at: i64) -> Point {
        Point { id, at, label: "" }
    }

    #[test]
    fn overlapping_batches_are_deduplicated() {
        let mut dataset = ResidentDataset::new();
        dataset.merge(vec![point("A", 10), point("B", 20)]);
        let stats = dataset.merge(vec![point("B", 20), point("C", 30)]);
        assert_eq!(stats, MergeStats { added: 1, duplicates: 1 });
        assert_eq!(dataset.len(), 3);
        let ids: Vec<_> = dataset.events().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn merging_same_batch_twice_is_idempotent() {
        let batch = vec![point("A", 10), point("B", 5)];
        let mut once = ResidentDataset::new();
        once.merge(batch.clone());
        let mut twice = once.clone();
        twice.merge(batch);
        assert_eq!(once.events(), twice.events());
        assert_eq!(once.bounds(), twice.bounds());
    }

    #[test]
    fn first_seen_instance_wins() {
        let mut dataset = ResidentDataset::new();
        dataset.merge(vec![Point { id: "A", at: 10, label: "first" }]);
        dataset.merge(vec![Point { id: "A", at: 10, label: "second" }]);
        assert_eq!(dataset.events()[0].label, "first");
    }

    #[test]
    fn bounds_follow_extrema_and_window_slices() {
        let mut dataset = ResidentDataset::new();
        assert!(dataset.bounds().is_none());
        dataset.merge(vec![point("B", 200), point("A", 100)]);
        dataset.merge(vec![point("C", 50)]);
        assert_eq!(dataset.bounds(), Some(DatasetBounds { start: 50, end: 200 }));
        let slice = dataset.events_in(Interval::new(60, 200).unwrap());
        assert_eq!(slice, &[point("A", 100)]);
    }

    #[test]
    fn default_view_is_the_last_day() {
        let mut dataset = ResidentDataset::new();
        assert_eq!(dataset.default_window(), None);
        dataset.merge(vec![point("A", 0), point("B", 3 * MS_PER_DAY)]);
        assert_eq!(dataset.default_center(), Some(3 * MS_PER_DAY - MS_PER_DAY / 2));
        let window = dataset.default_window().unwrap().to_interval().unwrap();
        assert_eq!(window, Interval::new(2 * MS_PER_DAY, 3 * MS_PER_DAY).unwrap());
    }
}
