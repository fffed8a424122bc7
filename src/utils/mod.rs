//! Utilities
//!
//! - [`metrics`]: counters, gauges and histograms shared by the loops
//! - [`errors`]: terminal-friendly error reports with troubleshooting hints

pub mod errors;
pub mod metrics;

pub use errors::format_user_error;
pub use metrics::{metric_names, HistogramStats, MetricsCollector, MetricsSnapshot, Timer};
