use crate::generator::profile::PatientProfile;
use crate::generator::source::FaultPlan;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use windowcore::prelude::LoaderConfig;

/// One scripted chart navigation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NavigationStep {
    /// Shift the window center; negative hours move back in time.
    Pan { hours: i64 },
    /// Scale the window radius.
    Zoom { factor: f64 },
    /// Center the window `days_back` days before the newest datum.
    Jump { days_back: i64 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub patient: PatientProfile,
    pub loader: LoaderConfig,
    pub faults: FaultPlan,
    /// Retries allowed per step before the replay gives up.
    pub max_retries: u32,
    pub steps: Vec<NavigationStep>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            patient: PatientProfile::default(),
            loader: LoaderConfig::default(),
            faults: FaultPlan::default(),
            max_retries: 2,
            steps: default_script(),
        }
    }
}

/// Scroll back through recent history, zoom out, then return to today.
pub fn default_script() -> Vec<NavigationStep> {
    vec![
        NavigationStep::Pan { hours: -24 },
        NavigationStep::Jump { days_back: 20 },
        NavigationStep::Pan { hours: -48 },
        NavigationStep::Zoom { factor: 3.0 },
        NavigationStep::Jump { days_back: 1 },
    ]
}

impl ReplayConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading replay config {}", path_ref.display()))?;
        let config: ReplayConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing replay config {}", path_ref.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_args(days: u32, seed: u64, fail_fetches: Vec<usize>) -> Self {
        Self {
            patient: PatientProfile {
                days,
                seed,
                ..Default::default()
            },
            faults: FaultPlan {
                fail_fetches,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.patient.days == 0 {
            bail!("patient history must span at least one day");
        }
        if self.loader.overfetch_margin_ms < 0 {
            bail!("over-fetch margin cannot be negative");
        }
        for step in &self.steps {
            if let NavigationStep::Zoom { factor } = step {
                if !(factor.is_finite() && *factor > 0.0) {
                    bail!("zoom factor must be positive, got {}", factor);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_from_args_sets_patient_and_faults() {
        let cfg = ReplayConfig::from_args(30, 9, vec![2]);
        assert_eq!(cfg.patient.days, 30);
        assert_eq!(cfg.patient.seed, 9);
        assert_eq!(cfg.faults.fail_fetches, vec![2]);
        assert_eq!(cfg.steps, default_script());
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"patient:\n  days: 14\n  seed: 3\nloader:\n  align_to_days: false\n\
              steps:\n  - action: pan\n    hours: -12\n  - action: zoom\n    factor: 0.5\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = ReplayConfig::load(&path).unwrap();
        assert_eq!(cfg.patient.days, 14);
        assert!(!cfg.loader.align_to_days);
        assert_eq!(cfg.loader.initial_lookback_weeks, 2);
        assert_eq!(
            cfg.steps,
            vec![
                NavigationStep::Pan { hours: -12 },
                NavigationStep::Zoom { factor: 0.5 }
            ]
        );
    }

    #[test]
    fn config_load_rejects_bad_zoom() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"steps:\n  - action: zoom\n    factor: 0.0\n")
            .unwrap();
        let path = temp.into_temp_path();
        assert!(ReplayConfig::load(&path).is_err());
    }
}
