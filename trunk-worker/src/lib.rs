pub mod app;
pub mod config;
pub mod jobs;
pub mod periodic;

pub use app::{RunningWorker, WorkerApp};
pub use config::WorkerConfig;
pub use jobs::{LoggingServices, PlatformJob, PlatformServices};
