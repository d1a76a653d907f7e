pub mod range_tracker;

pub use range_tracker::RangeTracker;
