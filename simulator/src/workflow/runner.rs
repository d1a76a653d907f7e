use crate::generator::source::SyntheticSource;
use crate::workflow::config::{NavigationStep, ReplayConfig};
use anyhow::Context;
use serde::Serialize;
use windowcore::patient_interface::{BasicReshaper, MedicalEvent};
use windowcore::prelude::{DisplayWindow, Interval, LoaderResult, MS_PER_DAY, MS_PER_HOUR};
use windowcore::{LoaderHandle, LoadingPhase, TimeWindowLoader};

#[derive(Debug, Clone, Serialize)]
pub struct ReplayResult {
    pub patient: String,
    pub fetches: usize,
    pub fetched_ranges: Vec<Interval>,
    pub windows_from_memory: usize,
    pub duplicates_dropped: usize,
    pub retries: u32,
    pub events: usize,
    pub coverage: Vec<Interval>,
    pub final_window: DisplayWindow,
    /// Distinct phases seen on the snapshot channel, in order.
    pub phases: Vec<LoadingPhase>,
}

#[derive(Clone)]
pub struct Runner {
    config: ReplayConfig,
}

/// Applies `step` to `window`; `newest` is the end of the patient's history.
pub fn navigate(window: DisplayWindow, step: &NavigationStep, newest: i64) -> DisplayWindow {
    match step {
        NavigationStep::Pan { hours } => {
            DisplayWindow::new(window.center + hours * MS_PER_HOUR, window.radius)
        }
        NavigationStep::Zoom { factor } => {
            let radius = (window.radius as f64 * factor).round() as i64;
            DisplayWindow::new(window.center, radius.max(1))
        }
        NavigationStep::Jump { days_back } => {
            DisplayWindow::new(newest - days_back * MS_PER_DAY, window.radius)
        }
    }
}

impl Runner {
    pub fn new(config: ReplayConfig) -> Self {
        Self { config }
    }

    /// Resolves `outcome`, re-issuing the failed fetch while retries remain.
    async fn settle(
        &self,
        handle: &LoaderHandle<MedicalEvent>,
        outcome: LoaderResult<bool>,
        retries: &mut u32,
        budget: &mut u32,
    ) -> anyhow::Result<bool> {
        let mut outcome = outcome;
        loop {
            match outcome {
                Ok(loaded) => return Ok(loaded),
                Err(err) if err.is_retryable() && *budget > 0 => {
                    log::warn!("replay step failed: {}; retrying", err);
                    *budget -= 1;
                    *retries += 1;
                    outcome = handle.retry().await;
                }
                Err(err) => return Err(err).context("replay step failed"),
            }
        }
    }

    pub async fn execute(&self) -> anyhow::Result<ReplayResult> {
        let source = SyntheticSource::new(&self.config.patient, self.config.faults.clone())?;
        let handle = TimeWindowLoader::spawn(
            source.clone(),
            BasicReshaper::new(),
            self.config.loader.clone(),
        );

        let mut updates = handle.subscribe();
        let mut seen = vec![updates.borrow_and_update().phase];
        let recorder = tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let phase = updates.borrow_and_update().phase;
                if seen.last() != Some(&phase) {
                    seen.push(phase);
                }
            }
            seen
        });

        let mut retries = 0;
        let patient = self.config.patient.patient.clone();
        let mut budget = self.config.max_retries;
        let first = handle.initialize(patient.as_str()).await.map(|_| true);
        self.settle(&handle, first, &mut retries, &mut budget)
            .await
            .with_context(|| format!("initializing patient {}", patient))?;

        let snapshot = handle.snapshot();
        let newest = snapshot
            .outer
            .map(|outer| outer.end())
            .context("loader is ready without an outer range")?;
        let mut window = snapshot
            .dataset
            .default_window()
            .context("initial window produced no events")?;

        for (index, step) in self.config.steps.iter().enumerate() {
            window = navigate(window, step, newest);
            let mut budget = self.config.max_retries;
            let first = handle.request_window(window).await;
            let loaded = self
                .settle(&handle, first, &mut retries, &mut budget)
                .await
                .with_context(|| format!("replay step {} ({:?})", index + 1, step))?;
            log::info!(
                "step {} {:?} -> center {} radius {} ({})",
                index + 1,
                step,
                window.center,
                window.radius,
                if loaded { "fetched" } else { "resident" }
            );
        }

        let snapshot = handle.snapshot();
        let metrics = handle.metrics();
        handle.shutdown();
        drop(handle);
        let phases = recorder.await.context("phase recorder panicked")?;

        Ok(ReplayResult {
            patient,
            fetches: source.fetch_count(),
            fetched_ranges: source.fetched_ranges(),
            windows_from_memory: metrics.windows_from_memory,
            duplicates_dropped: metrics.duplicates_dropped,
            retries,
            events: snapshot.dataset.len(),
            coverage: snapshot.coverage,
            final_window: window,
            phases,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::source::FaultPlan;
    use windowcore::prelude::LoaderConfig;

    fn quiet_config() -> ReplayConfig {
        ReplayConfig {
            loader: LoaderConfig {
                overfetch_margin_ms: MS_PER_DAY,
                ..Default::default()
            },
            ..ReplayConfig::from_args(45, 1, Vec::new())
        }
    }

    #[test]
    fn navigation_steps_move_the_window() {
        let window = DisplayWindow::new(10 * MS_PER_DAY, MS_PER_DAY);
        let newest = 40 * MS_PER_DAY;
        assert_eq!(
            navigate(window, &NavigationStep::Pan { hours: -24 }, newest).center,
            9 * MS_PER_DAY
        );
        assert_eq!(
            navigate(window, &NavigationStep::Zoom { factor: 0.5 }, newest).radius,
            MS_PER_DAY / 2
        );
        assert_eq!(
            navigate(window, &NavigationStep::Jump { days_back: 5 }, newest).center,
            35 * MS_PER_DAY
        );
    }

    #[tokio::test]
    async fn runner_replays_default_script() {
        let result = Runner::new(quiet_config()).execute().await.unwrap();

        assert!(result.fetches >= 2);
        assert_eq!(result.fetches, result.fetched_ranges.len());
        assert!(result.windows_from_memory >= 1);
        assert_eq!(result.retries, 0);
        assert!(result.events > 0);
        assert!(result.coverage.windows(2).all(|w| w[0].end() < w[1].start()));
        assert_eq!(result.phases.first(), Some(&LoadingPhase::Idle));
        assert_eq!(result.phases.last(), Some(&LoadingPhase::Ready));
    }

    #[tokio::test]
    async fn runner_retries_injected_failure() {
        let mut config = quiet_config();
        config.faults = FaultPlan {
            fail_fetches: vec![2],
            latency_ms: 0,
        };
        let result = Runner::new(config).execute().await.unwrap();

        assert_eq!(result.retries, 1);
        assert_eq!(result.fetched_ranges[1], result.fetched_ranges[2]);
    }

    #[tokio::test]
    async fn runner_gives_up_after_retry_budget() {
        let mut config = quiet_config();
        config.max_retries = 1;
        config.faults.fail_fetches = vec![1, 2];
        assert!(Runner::new(config).execute().await.is_err());
    }
}
