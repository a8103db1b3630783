pub mod anomaly;
pub mod charts;
pub mod comparison;
pub mod correlation;
pub mod filters;
pub mod profiler;
pub mod scenario;
