use crate::calendar;
use crate::prelude::{DisplayWindow, Interval, LoaderConfig, LoaderResult};
use crate::tracking::RangeTracker;

/// Fetch decided for a display window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    pub requested: Interval,
    pub target: Interval,
}

/// Interval the chart actually needs for `window`.
pub fn requested_interval(window: DisplayWindow, config: &LoaderConfig) -> LoaderResult<Interval> {
    let raw = window.to_interval()?;
    if config.align_to_days {
        calendar::align_to_days(raw)
    } else {
        Ok(raw)
    }
}

/// Decides whether `window` needs I/O and, when it does, the over-fetched
/// range to request. The margin only widens a fetch that is already needed.
pub fn plan_fetch(
    tracker: &RangeTracker,
    window: DisplayWindow,
    config: &LoaderConfig,
) -> LoaderResult<Option<FetchPlan>> {
    let requested = requested_interval(window, config)?;
    if tracker.is_fully_loaded() || tracker.is_covered(requested) {
        return Ok(None);
    }
    let widened = requested.expand(config.overfetch_margin_ms);
    Ok(tracker
        .get_range_to_load(widened)
        .map(|target| FetchPlan { requested, target }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::LoaderError;

    fn iv(start: i64, end: i64) -> Interval {
        Interval::new(start, end).unwrap()
    }

    fn raw_config(margin: i64) -> LoaderConfig {
        LoaderConfig {
            overfetch_margin_ms: margin,
            align_to_days: false,
            ..LoaderConfig::default()
        }
    }

    #[test]
    fn covered_window_plans_nothing() {
        let tracker = RangeTracker::new(iv(0, 1000), Some(iv(100, 500))).unwrap();
        let plan = plan_fetch(&tracker, DisplayWindow::new(300, 50), &raw_config(100)).unwrap();
        assert_eq!(plan, None);
    }

    #[test]
    fn gap_is_widened_by_margin_within_outer_bound() {
        let tracker = RangeTracker::new(iv(0, 1000), Some(iv(500, 1000))).unwrap();
        let plan = plan_fetch(&tracker, DisplayWindow::new(450, 100), &raw_config(400))
            .unwrap()
            .unwrap();
        assert_eq!(plan.requested, iv(350, 550));
        assert_eq!(plan.target, iv(0, 1000));
    }

    #[test]
    fn margin_does_not_trigger_fetch_by_itself() {
        let tracker = RangeTracker::new(iv(0, 1000), Some(iv(200, 800))).unwrap();
        let plan = plan_fetch(&tracker, DisplayWindow::new(500, 100), &raw_config(10_000)).unwrap();
        assert_eq!(plan, None);
    }

    #[test]
    fn window_outside_history_plans_nothing() {
        let tracker = RangeTracker::new(iv(0, 1000), Some(iv(500, 1000))).unwrap();
        let plan = plan_fetch(&tracker, DisplayWindow::new(-5000, 100), &raw_config(100)).unwrap();
        assert_eq!(plan, None);
    }

    #[test]
    fn invalid_window_is_reported() {
        let tracker = RangeTracker::new(iv(0, 1000), None).unwrap();
        let err = plan_fetch(&tracker, DisplayWindow::new(10, -1), &raw_config(0)).unwrap_err();
        assert!(matches!(err, LoaderError::InvalidRange(_)));
    }
}
