use crate::prelude::{Interval, LoaderError, LoaderResult};

/// Records which parts of a patient's history are resident and computes the
/// single fetch needed to cover a requested window.
///
/// `coverage` is kept sorted with no two intervals overlapping or touching,
/// and every interval lies inside `outer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTracker {
    outer: Interval,
    coverage: Vec<Interval>,
}

impl RangeTracker {
    pub fn new(outer: Interval, initially_loaded: Option<Interval>) -> LoaderResult<Self> {
        let mut tracker = Self {
            outer,
            coverage: Vec::new(),
        };
        if let Some(initial) = initially_loaded {
            let clamped = tracker.clamp(initial).ok_or_else(|| {
                LoaderError::InvalidRange(format!(
                    "initial range {} lies outside outer bound {}",
                    initial, outer
                ))
            })?;
            tracker.coverage.push(clamped);
        }
        Ok(tracker)
    }

    pub fn outer(&self) -> Interval {
        self.outer
    }

    pub fn coverage(&self) -> &[Interval] {
        &self.coverage
    }

    fn clamp(&self, range: Interval) -> Option<Interval> {
        range.intersect(&self.outer)
    }

    /// Parts of `range` not covered yet, in order.
    fn gaps_within(&self, range: Interval) -> Vec<Interval> {
        let mut gaps = Vec::new();
        let mut cursor = range.start();
        for covered in &self.coverage {
            if covered.end() <= cursor {
                continue;
            }
            if covered.start() >= range.end() {
                break;
            }
            if covered.start() > cursor {
                gaps.extend(Interval::new(cursor, covered.start()).ok());
            }
            cursor = cursor.max(covered.end());
            if cursor >= range.end() {
                return gaps;
            }
        }
        gaps.extend(Interval::new(cursor, range.end()).ok());
        gaps
    }

    /// Covered interval holding `at` strictly inside its bounds.
    fn covering(&self, at: i64) -> Option<&Interval> {
        self.coverage
            .iter()
            .find(|covered| covered.start() < at && at < covered.end())
    }

    /// Single interval to fetch so that `requested` (clamped to the outer
    /// bound) becomes fully resident, or `None` when nothing is missing.
    ///
    /// A start falling inside an already covered interval is pushed back to
    /// that interval's start. The end stops at the last gap, so resident data
    /// after the request is never fetched again.
    pub fn get_range_to_load(&self, requested: Interval) -> Option<Interval> {
        let clamped = self.clamp(requested)?;
        let gaps = self.gaps_within(clamped);
        let first_gap = gaps.first()?;
        let last_gap = gaps.last()?;

        let mut start = clamped.start().min(first_gap.start());
        if let Some(covered) = self.covering(start) {
            start = covered.start();
        }
        Interval::new(start, last_gap.end()).ok()?.intersect(&self.outer)
    }

    /// Adds `loaded` to the coverage, fusing it with every interval it
    /// overlaps or touches. Ranges outside the outer bound are ignored.
    pub fn mark_loaded(&mut self, loaded: Interval) {
        let Some(mut merged) = self.clamp(loaded) else {
            return;
        };
        let mut kept = Vec::with_capacity(self.coverage.len() + 1);
        let mut inserted = false;
        for covered in self.coverage.drain(..) {
            if covered.overlaps_or_touches(&merged) {
                merged = merged.span(&covered);
            } else if covered.end() < merged.start() {
                kept.push(covered);
            } else {
                if !inserted {
                    kept.push(merged);
                    inserted = true;
                }
                kept.push(covered);
            }
        }
        if !inserted {
            kept.push(merged);
        }
        self.coverage = kept;
    }

    pub fn is_covered(&self, range: Interval) -> bool {
        self.get_range_to_load(range).is_none()
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.coverage == [self.outer]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn iv(start: i64, end: i64) -> Interval {
        Interval::new(start, end).unwrap()
    }

    fn tracker() -> RangeTracker {
        RangeTracker::new(iv(0, 1000), None).unwrap()
    }

    #[test]
    fn covered_request_needs_no_fetch() {
        let mut tracker = tracker();
        tracker.mark_loaded(iv(100, 200));
        assert_eq!(tracker.get_range_to_load(iv(150, 180)), None);
    }

    #[test]
    fn partially_covered_request_extends_from_coverage_start() {
        let mut tracker = tracker();
        tracker.mark_loaded(iv(100, 200));
        assert_eq!(tracker.get_range_to_load(iv(150, 400)), Some(iv(100, 400)));
    }

    #[test]
    fn adjacent_ranges_are_merged() {
        let mut tracker = tracker();
        tracker.mark_loaded(iv(100, 200));
        tracker.mark_loaded(iv(200, 300));
        assert_eq!(tracker.coverage(), &[iv(100, 300)]);
    }

    #[test]
    fn request_before_outer_start_is_clamped() {
        assert_eq!(tracker().get_range_to_load(iv(-50, 50)), Some(iv(0, 50)));
    }

    #[test]
    fn request_outside_outer_bound_needs_no_fetch() {
        let tracker = tracker();
        assert_eq!(tracker.get_range_to_load(iv(-500, -100)), None);
        assert_eq!(tracker.get_range_to_load(iv(1000, 2000)), None);
    }

    #[test]
    fn whole_history_request_never_exceeds_outer_bound() {
        let mut tracker = tracker();
        tracker.mark_loaded(iv(300, 400));
        assert_eq!(tracker.get_range_to_load(iv(-10, 5000)), Some(iv(0, 1000)));
    }

    #[test]
    fn request_spanning_several_gaps_is_one_fetch() {
        let mut tracker = tracker();
        tracker.mark_loaded(iv(100, 200));
        tracker.mark_loaded(iv(400, 500));
        assert_eq!(tracker.get_range_to_load(iv(50, 450)), Some(iv(50, 400)));
    }

    #[test]
    fn request_ending_inside_coverage_stops_at_the_gap() {
        let mut tracker = tracker();
        tracker.mark_loaded(iv(100, 900));
        assert_eq!(tracker.get_range_to_load(iv(50, 150)), Some(iv(50, 100)));
        assert_eq!(tracker.get_range_to_load(iv(850, 950)), Some(iv(100, 950)));
    }

    #[test]
    fn marking_loaded_is_idempotent() {
        let mut tracker = tracker();
        tracker.mark_loaded(iv(100, 200));
        tracker.mark_loaded(iv(120, 180));
        tracker.mark_loaded(iv(100, 200));
        assert_eq!(tracker.coverage(), &[iv(100, 200)]);
    }

    #[test]
    fn bridging_range_fuses_neighbours() {
        let mut tracker = tracker();
        tracker.mark_loaded(iv(600, 700));
        tracker.mark_loaded(iv(100, 200));
        tracker.mark_loaded(iv(900, 950));
        tracker.mark_loaded(iv(150, 650));
        assert_eq!(tracker.coverage(), &[iv(100, 700), iv(900, 950)]);
    }

    #[test]
    fn fully_loaded_once_coverage_matches_outer() {
        let mut tracker = RangeTracker::new(iv(0, 1000), Some(iv(-100, 400))).unwrap();
        assert_eq!(tracker.coverage(), &[iv(0, 400)]);
        assert!(!tracker.is_fully_loaded());
        tracker.mark_loaded(iv(400, 2000));
        assert!(tracker.is_fully_loaded());
    }

    #[test]
    fn initial_range_outside_outer_is_rejected() {
        let result = RangeTracker::new(iv(0, 1000), Some(iv(2000, 3000)));
        assert!(matches!(result, Err(LoaderError::InvalidRange(_))));
    }

    fn covered_points(tracker: &RangeTracker, probes: &[i64]) -> Vec<bool> {
        probes
            .iter()
            .map(|&at| tracker.coverage().iter().any(|c| c.contains_point(at)))
            .collect()
    }

    proptest! {
        #[test]
        fn prop_coverage_only_grows(ranges in prop::collection::vec((-200i64..1200, 1i64..300), 1..20)) {
            let mut tracker = tracker();
            let probes: Vec<i64> = (-10..1010).step_by(7).collect();
            let mut before = covered_points(&tracker, &probes);
            for (start, len) in ranges {
                tracker.mark_loaded(iv(start, start + len));
                let after = covered_points(&tracker, &probes);
                for (was, is) in before.iter().zip(&after) {
                    prop_assert!(!was || *is);
                }
                for pair in tracker.coverage().windows(2) {
                    prop_assert!(pair[0].end() < pair[1].start());
                }
                before = after;
            }
        }

        #[test]
        fn prop_fetch_target_contains_every_gap(
            loaded in prop::collection::vec((0i64..1000, 1i64..200), 0..8),
            start in -300i64..1100,
            len in 1i64..600,
        ) {
            let mut tracker = tracker();
            for (s, l) in loaded {
                tracker.mark_loaded(iv(s, s + l));
            }
            let requested = iv(start, start + len);
            match tracker.get_range_to_load(requested) {
                None => {
                    if let Some(clamped) = requested.intersect(&tracker.outer()) {
                        prop_assert!(tracker.gaps_within(clamped).is_empty());
                    }
                }
                Some(target) => {
                    prop_assert!(tracker.outer().contains(&target));
                    let clamped = requested.intersect(&tracker.outer()).unwrap();
                    for gap in tracker.gaps_within(clamped) {
                        prop_assert!(target.contains(&gap));
                    }
                    tracker.mark_loaded(target);
                    prop_assert_eq!(tracker.get_range_to_load(requested), None);
                }
            }
        }
    }
}
