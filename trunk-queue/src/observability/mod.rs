pub mod metrics;
pub mod analytics;

#[cfg(feature = "tracing-basic")]
pub mod tracing;

pub use metrics::{ExecutionTimes, GlobalMetrics, JobTypeMetrics, LiveMetrics, MetricsSnapshot, PerformanceMetrics};
pub use analytics::ObservabilityLayer;

#[cfg(feature = "tracing-basic")]
pub use self::tracing::init_tracing;
