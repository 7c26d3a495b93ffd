use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use trunk_queue::{
    DistributedLock, HandlerRegistry, JobQueue, JobSet, Processor, ReclaimerHandle, StuckJobReclaimer,
    WorkerHandle,
};

use crate::config::WorkerConfig;
use crate::jobs::{LoggingServices, PlatformJob, PlatformServices};
use crate::periodic::{self, PeriodicTasks};

/// The wired-up worker process: queue, lock and handlers, not yet running
pub struct WorkerApp {
    config: WorkerConfig,
    queue: JobQueue,
    lock: DistributedLock,
    processor: Processor,
}

impl WorkerApp {
    /// Open the configured store and lock service and register every platform job
    pub async fn build(config: WorkerConfig, services: Arc<dyn PlatformServices>) -> Result<Self> {
        let queue = JobQueue::open(config.queue.clone()).await?;
        let lock = DistributedLock::open(&config.lock).await?;

        let mut registry = HandlerRegistry::new();
        registry.register_set::<PlatformJob>(services)?;
        info!(job_types = ?PlatformJob::JOB_TYPES, "Registered platform jobs");

        let processor = Processor::new(queue.clone(), registry).with_config(config.processor.clone());

        Ok(Self {
            config,
            queue,
            lock,
            processor,
        })
    }

    /// Build with the logging stand-in services
    pub async fn from_env() -> Result<Self> {
        Self::build(WorkerConfig::from_env(), Arc::new(LoggingServices)).await
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Start processing, reclaiming and the periodic tasks
    pub async fn start(&self) -> Result<RunningWorker> {
        if self.config.startup_sync {
            periodic::startup_sync(&self.queue, &self.lock).await?;
        }

        let processor = self.processor.start();
        let reclaimer = StuckJobReclaimer::from_config(self.queue.clone(), &self.config.reclaimer).start();
        let periodic = PeriodicTasks::start(
            self.queue.clone(),
            self.lock.clone(),
            self.config.balance_sync_interval,
            self.config.cleanup_interval,
        );

        info!(backend = self.queue.store().name(), "Worker started");
        Ok(RunningWorker {
            queue: self.queue.clone(),
            processor,
            reclaimer,
            periodic,
        })
    }
}

/// Background tasks of a started [`WorkerApp`]
pub struct RunningWorker {
    queue: JobQueue,
    processor: WorkerHandle,
    reclaimer: ReclaimerHandle,
    periodic: PeriodicTasks,
}

impl RunningWorker {
    /// Stop scheduling new work, then wait for in-flight jobs to finish
    pub async fn shutdown(self) -> Result<()> {
        self.periodic.shutdown().await;
        self.reclaimer.shutdown().await?;
        self.processor.shutdown().await?;
        self.queue.observability().metrics().snapshot().log_summary();
        info!("Worker shutdown complete");
        Ok(())
    }
}
