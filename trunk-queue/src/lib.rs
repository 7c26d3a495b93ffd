//! # trunk-queue: background jobs for the trunk VoIP admin platform
//!
//! A durable job queue with a polling processor, typed handlers, a stuck-job
//! reclaimer and a distributed lock for singleton periodic work.
//!
//! - **Job store**: one [`JobStore`] contract with an in-process backend and a
//!   PostgreSQL backend (`postgres` feature) that claims with `SKIP LOCKED`
//! - **Queue façade**: [`JobQueue`] validates submissions, applies defaults and
//!   serves the admin queries (by status, type, tags, stats)
//! - **Handlers**: async functions keyed by job type, or typed [`Job`]s and
//!   serde-tagged [`JobSet`] enums with exhaustive dispatch
//! - **Processor**: fixed-interval scheduler feeding a bounded worker pool;
//!   attempts, retries, timeouts and cooperative cancellation
//! - **Reclaimer**: returns jobs abandoned by crashed workers to pending
//! - **Distributed lock**: `SET NX EX` leases (in-process or Redis with the
//!   `redis` feature)
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use trunk_queue::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> QueueResult<()> {
//! let queue = JobQueue::open(QueueConfig::from_env()).await?;
//!
//! let mut handlers = HandlerRegistry::new();
//! handlers.register_fn("carrier_sync", |payload, _token| async move {
//!     tracing::info!(?payload, "syncing carrier");
//!     Ok::<(), JobError>(())
//! })?;
//!
//! queue
//!     .add_job("carrier_sync", json!({ "carrier_id": 42 }), EnqueueOptions::default())
//!     .await?;
//!
//! let worker = Processor::new(queue.clone(), handlers)
//!     .with_config(ProcessorConfig::from_env())
//!     .start();
//!
//! // ... later
//! worker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod backend;
pub mod job;
pub mod queue;
pub mod processor;
pub mod reclaimer;
pub mod lock;
pub mod observability;

pub use types::{
    EnqueueOptions, JobEvent, JobFilter, JobId, JobPatch, JobRecord, JobStatus, LeaseToken, NewJob,
    Page, QueueStats, StatusCounts, TagMatch,
};
pub use error::{BoxError, JobError, QueueError, QueueResult};
pub use config::{LockConfig, ProcessorConfig, QueueConfig, ReclaimerConfig, RetryPolicy};
pub use backend::{open_store, FailDisposition, JobStore};
pub use backend::memory::MemoryJobStore;
#[cfg(feature = "postgres")]
pub use backend::postgres::PostgresJobStore;
pub use job::{HandlerFn, HandlerRegistry, Job, JobHandler, JobSet};
pub use queue::JobQueue;
pub use processor::{Processor, WorkerHandle};
pub use reclaimer::{ReclaimerHandle, StuckJobReclaimer};
pub use lock::{DistributedLock, LockBackend, MemoryLockBackend};
#[cfg(feature = "redis")]
pub use lock::redis::RedisLockBackend;
pub use observability::{LiveMetrics, ObservabilityLayer};

/// Re-exports for applications defining and running jobs
pub mod prelude {
    pub use crate::{
        DistributedLock, EnqueueOptions, HandlerRegistry, Job, JobError, JobHandler, JobId,
        JobQueue, JobRecord, JobSet, JobStatus, LockConfig, Processor, ProcessorConfig,
        QueueConfig, QueueError, QueueResult, ReclaimerConfig, RetryPolicy, StuckJobReclaimer,
        TagMatch,
    };
    pub use async_trait::async_trait;
    pub use tokio_util::sync::CancellationToken;
}
