//! Statistics for monitors

pub mod metrics;

pub use metrics::{MonitorStats, StatsSnapshot};
