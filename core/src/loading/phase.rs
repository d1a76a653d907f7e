use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the loader is in its fetch/process cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoadingPhase {
    #[default]
    Idle,
    InitialFetch,
    InitialProcess,
    Ready,
    IncrementalFetch,
    IncrementalProcess,
    Error,
}

/// Triggers that can move the loader between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Initialize,
    FetchResolved,
    FetchRejected,
    ProcessResolved,
    ProcessRejected,
    GapFound,
    WindowCovered,
    Retry { initial: bool },
}

impl LoadingPhase {
    /// Next phase for `event`, or `None` when the pair is ignored.
    pub fn on(self, event: PhaseEvent) -> Option<LoadingPhase> {
        use LoadingPhase::*;
        use PhaseEvent::*;

        match (self, event) {
            (_, Initialize) => Some(InitialFetch),
            (InitialFetch, FetchResolved) => Some(InitialProcess),
            (InitialFetch, FetchRejected) => Some(Error),
            (InitialProcess, ProcessResolved) => Some(Ready),
            (InitialProcess, ProcessRejected) => Some(Error),
            (Ready, GapFound) => Some(IncrementalFetch),
            (Ready, WindowCovered) => Some(Ready),
            (IncrementalFetch, FetchResolved) => Some(IncrementalProcess),
            (IncrementalFetch, FetchRejected) => Some(Error),
            (IncrementalProcess, ProcessResolved) => Some(Ready),
            (IncrementalProcess, ProcessRejected) => Some(Error),
            (Error, Retry { initial: true }) => Some(InitialFetch),
            (Error, Retry { initial: false }) => Some(IncrementalFetch),
            _ => None,
        }
    }

    /// A fetch or process step is outstanding.
    pub fn is_initial(&self) -> bool {
        matches!(self, LoadingPhase::InitialFetch | LoadingPhase::InitialProcess)
    }
}

impl fmt::Display for LoadingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadingPhase::Idle => "idle",
            LoadingPhase::InitialFetch => "initial-fetch",
            LoadingPhase::InitialProcess => "initial-process",
            LoadingPhase::Ready => "ready",
            LoadingPhase::IncrementalFetch => "incremental-fetch",
            LoadingPhase::IncrementalProcess => "incremental-process",
            LoadingPhase::Error => "error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHASES: [LoadingPhase; 7] = [
        LoadingPhase::Idle,
        LoadingPhase::InitialFetch,
        LoadingPhase::InitialProcess,
        LoadingPhase::Ready,
        LoadingPhase::IncrementalFetch,
        LoadingPhase::IncrementalProcess,
        LoadingPhase::Error,
    ];

    const EVENTS: [PhaseEvent; 9] = [
        PhaseEvent::Initialize,
        PhaseEvent::FetchResolved,
        PhaseEvent::FetchRejected,
        PhaseEvent::ProcessResolved,
        PhaseEvent::ProcessRejected,
        PhaseEvent::GapFound,
        PhaseEvent::WindowCovered,
        PhaseEvent::Retry { initial: true },
        PhaseEvent::Retry { initial: false },
    ];

    #[test]
    fn initial_cycle_reaches_ready() {
        let phase = LoadingPhase::Idle
            .on(PhaseEvent::Initialize)
            .and_then(|p| p.on(PhaseEvent::FetchResolved))
            .and_then(|p| p.on(PhaseEvent::ProcessResolved));
        assert_eq!(phase, Some(LoadingPhase::Ready));
    }

    #[test]
    fn retry_returns_to_the_failed_fetch_phase() {
        assert_eq!(
            LoadingPhase::Error.on(PhaseEvent::Retry { initial: false }),
            Some(LoadingPhase::IncrementalFetch)
        );
        assert_eq!(
            LoadingPhase::Error.on(PhaseEvent::Retry { initial: true }),
            Some(LoadingPhase::InitialFetch)
        );
    }

    #[test]
    fn unlisted_pairs_are_ignored() {
        let mut listed = 0;
        for phase in PHASES {
            for event in EVENTS {
                if phase.on(event).is_some() {
                    listed += 1;
                }
            }
        }
        // seven phases accept Initialize, plus twelve table rows
        assert_eq!(listed, 7 + 12);
        assert_eq!(LoadingPhase::Ready.on(PhaseEvent::FetchResolved), None);
        assert_eq!(LoadingPhase::Idle.on(PhaseEvent::Retry { initial: true }), None);
        assert_eq!(LoadingPhase::IncrementalFetch.on(PhaseEvent::GapFound), None);
    }
}
