//! Observability for the dropout forecasting pipeline.

pub mod audit;
pub mod logging;
pub mod metrics;
pub mod observer;

pub use logging::{init_logging, LogGuard};
pub use metrics::Metrics;
pub use observer::{EntityContext, RunObserver, TelemetryObserver};
