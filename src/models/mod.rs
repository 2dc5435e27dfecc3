// Domain models for the metrics pipeline

mod derived;
mod rollup;
mod sample;
mod snapshot;
mod upload;

pub use derived::{DashboardStats, DerivedMetrics, GaugeTrend, Intensity, Trend};
pub use rollup::HourlyRollup;
pub use sample::RawSample;
pub use snapshot::{CounterValue, PreviousCounters, ProcessedSnapshot};
pub use upload::{
    CompletedEvent, CompletedMetadata, FailedEvent, FailureData, PreparedEvent, PreparedMetadata,
    UploadEventRow, UploadSummary,
};
