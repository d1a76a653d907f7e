use log::{debug, info, warn};

use crate::loading::phase::LoadingPhase;
use crate::prelude::{Interval, LoaderError};

/// Thin wrapper over the `log` facade with the loader's message shapes.
pub struct LogManager {
    target: &'static str,
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            target: "windowcore::loader",
        }
    }

    pub fn record(&self, message: &str) {
        info!(target: self.target, "{}", message);
    }

    pub fn phase_change(&self, from: LoadingPhase, to: LoadingPhase) {
        if from != to {
            info!(target: self.target, "phase {} -> {}", from, to);
        }
    }

    pub fn fetch_issued(&self, patient: &str, requested: Option<Interval>, target: Interval) {
        match requested {
            Some(requested) => info!(
                target: self.target,
                "fetching {} for patient {} (requested {})", target, patient, requested
            ),
            None => info!(target: self.target, "fetching {} for patient {}", target, patient),
        }
    }

    pub fn served_from_memory(&self, requested: Interval) {
        debug!(target: self.target, "window {} already resident", requested);
    }

    pub fn superseded(&self, requested: Interval) {
        debug!(target: self.target, "queued window {} superseded", requested);
    }

    pub fn failure(&self, error: &LoaderError) {
        warn!(target: self.target, "load failed: {}", error);
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
