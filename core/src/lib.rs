//! Incremental time-window loading for the patient chart viewer.
//!
//! [`RangeTracker`] records which parts of a patient's history are resident
//! and computes the single fetch a new window needs; [`TimeWindowLoader`]
//! drives the fetch/process/merge cycle behind a [`LoaderHandle`] so the
//! chart never waits on data it already has.

pub mod calendar;
pub mod loading;
pub mod patient_interface;
pub mod prelude;
pub mod telemetry;
pub mod tracking;

pub use loading::{LoaderHandle, LoaderSnapshot, LoadingPhase, ResidentDataset, TimeWindowLoader};
pub use prelude::{
    DataSource, DisplayWindow, Interval, LoaderConfig, LoaderError, LoaderResult, Reshaper,
    TimedEvent,
};
pub use tracking::RangeTracker;
