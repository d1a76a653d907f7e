pub mod dataset;
pub mod handle;
pub mod loader;
pub mod phase;
pub mod planner;

pub use dataset::{DatasetBounds, MergeStats, ResidentDataset};
pub use handle::LoaderHandle;
pub use loader::{LoaderSnapshot, TimeWindowLoader};
pub use phase::{LoadingPhase, PhaseEvent};
pub use planner::FetchPlan;
