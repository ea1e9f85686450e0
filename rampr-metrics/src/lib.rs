mod collector;
mod error;
pub mod metrics;
pub mod trend;

pub use collector::{Collector, Snapshot};
pub use error::{Error, Result};
pub use metrics::{
    MetricHandle, MetricKind, MetricSeriesSummary, MetricValue, RateSample, Sample, TrendSummary,
};
pub use trend::nearest_rank;
