//! Polling processor: claims eligible jobs, runs their handlers and records the outcome.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    JobError, QueueError, QueueResult,
    backend::FailDisposition,
    config::{ProcessorConfig, RetryPolicy},
    job::{HandlerRegistry, JobHandler},
    queue::JobQueue,
    types::{JobRecord, JobStatus},
};

/// Handle for a running processor
pub struct WorkerHandle {
    token: CancellationToken,
    scheduler: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Token cancelled on shutdown; handlers receive children of it
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished() && self.workers.iter().all(JoinHandle::is_finished)
    }

    /// Stop claiming, signal in-flight handlers and wait for every task to exit
    pub async fn shutdown(self) -> QueueResult<()> {
        self.token.cancel();

        self.scheduler
            .await
            .map_err(|e| QueueError::Internal(format!("Scheduler join error: {e}")))?;
        for worker in self.workers {
            worker
                .await
                .map_err(|e| QueueError::Internal(format!("Worker join error: {e}")))?;
        }

        info!("Processor stopped");
        Ok(())
    }
}

/// Claims pending jobs and runs them through the handler registry.
pub struct Processor {
    queue: JobQueue,
    registry: Arc<RwLock<HandlerRegistry>>,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(queue: JobQueue, registry: HandlerRegistry) -> Self {
        Self {
            queue,
            registry: Arc::new(RwLock::new(registry)),
            config: ProcessorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Add a handler while the processor may already be running
    pub async fn register_handler(
        &self,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> QueueResult<()> {
        let job_type = job_type.into();
        self.registry.write().await.register_handler(job_type.clone(), handler)?;
        info!(job_type = %job_type, "Registered job handler");
        Ok(())
    }

    pub async fn registered_types(&self) -> Vec<String> {
        self.registry.read().await.registered_types()
    }

    fn dispatcher(&self, token: CancellationToken) -> Dispatcher {
        Dispatcher {
            queue: self.queue.clone(),
            registry: self.registry.clone(),
            retry_policy: self.config.retry_policy,
            token,
        }
    }

    /// One tick: claim up to `concurrency` jobs, run them, wait for all outcomes.
    ///
    /// Returns the number of jobs processed.
    pub async fn run_once(&self) -> QueueResult<usize> {
        let dispatcher = self.dispatcher(CancellationToken::new());

        let mut claimed = Vec::with_capacity(self.config.concurrency);
        while claimed.len() < self.config.concurrency {
            match dispatcher.claim().await? {
                Some(job) => claimed.push(job),
                None => break,
            }
        }

        let count = claimed.len();
        join_all(claimed.into_iter().map(|job| dispatcher.execute(job))).await;
        Ok(count)
    }

    /// Run the scheduler and worker pool in background tasks
    pub fn start(&self) -> WorkerHandle {
        let token = CancellationToken::new();
        let dispatcher = self.dispatcher(token.clone());
        let concurrency = self.config.concurrency.max(1);

        let (tx, rx) = mpsc::channel::<(JobRecord, OwnedSemaphorePermit)>(concurrency);
        let rx = Arc::new(Mutex::new(rx));
        let slots = Arc::new(Semaphore::new(concurrency));

        let workers = (0..concurrency)
            .map(|worker_id| {
                let rx = rx.clone();
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some((job, _permit)) = next else { break };

                        if dispatcher.token.is_cancelled() {
                            dispatcher.release(job).await;
                        } else {
                            dispatcher.execute(job).await;
                        }
                    }
                    debug!(worker_id, "Worker exited");
                })
            })
            .collect();

        let poll_interval = self.config.poll_interval;
        let scheduler = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(?poll_interval, concurrency, "Processor started");

            loop {
                tokio::select! {
                    _ = dispatcher.token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // Claim only as many jobs as there are idle workers
                while let Ok(permit) = slots.clone().try_acquire_owned() {
                    if dispatcher.token.is_cancelled() {
                        break;
                    }
                    match dispatcher.claim().await {
                        Ok(Some(job)) => {
                            if let Err(mpsc::error::SendError((job, _))) = tx.send((job, permit)).await {
                                dispatcher.release(job).await;
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            error!("Error claiming job: {}", e);
                            break;
                        }
                    }
                }
            }
            debug!("Scheduler exited");
        });

        WorkerHandle {
            token,
            scheduler,
            workers,
        }
    }
}

/// Per-job execution shared by the worker pool and `run_once`
#[derive(Clone)]
struct Dispatcher {
    queue: JobQueue,
    registry: Arc<RwLock<HandlerRegistry>>,
    retry_policy: RetryPolicy,
    token: CancellationToken,
}

impl Dispatcher {
    async fn claim(&self) -> QueueResult<Option<JobRecord>> {
        let job = self.queue.store().claim_next(Utc::now()).await?;
        if let Some(job) = &job {
            self.queue.observability().record_job_claimed(job);
            debug!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts, "Claimed job");
        }
        Ok(job)
    }

    /// Hand a claimed job back untouched (shutdown raced the claim)
    async fn release(&self, job: JobRecord) {
        let Some(claimed_at) = job.locked_at else { return };

        match self.queue.store().unclaim(job.id, claimed_at, Utc::now()).await {
            Ok(Some(_)) => debug!(job_id = %job.id, "Released unstarted job"),
            Ok(None) => {}
            Err(e) => error!(job_id = %job.id, "Failed to release job: {}", e),
        }
    }

    /// Run one claimed job to an outcome. Never fails; errors are logged.
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts))]
    async fn execute(&self, job: JobRecord) {
        let handler = self.registry.read().await.get(&job.job_type);
        let Some(handler) = handler else {
            self.fail_unhandled(job).await;
            return;
        };

        let started = Instant::now();
        let result = self.run_handler(handler, &job).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => self.complete(&job, elapsed).await,
            Err(e) => self.fail(&job, e).await,
        }
    }

    async fn run_handler(&self, handler: Arc<dyn JobHandler>, job: &JobRecord) -> Result<(), JobError> {
        let token = self.token.child_token();
        let run = AssertUnwindSafe(handler.handle(job.payload.clone(), token.clone())).catch_unwind();

        let outcome = match job.timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    token.cancel();
                    return Err(JobError::retryable(format!("Job timed out after {ms}ms")));
                }
            },
            None => run.await,
        };

        outcome.unwrap_or_else(|panic| {
            Err(JobError::retryable(format!("Handler panicked: {}", panic_message(&*panic))))
        })
    }

    async fn complete(&self, job: &JobRecord, elapsed: Duration) {
        match self.queue.store().ack_complete(job.id, Utc::now()).await {
            Ok(Some(done)) => {
                self.queue.observability().record_job_completed(&done, elapsed);
                info!(?elapsed, "Job completed");
            }
            Ok(None) => info!("Job left processing while running, outcome discarded"),
            Err(e) => error!("Failed to record job completion: {}", e),
        }
    }

    async fn fail(&self, job: &JobRecord, err: JobError) {
        let message = err.message().to_string();
        let retryable = err.is_retryable();
        let failure = QueueError::from(err);
        let disposition = if retryable {
            FailDisposition::Retry {
                run_at: self.retry_policy.retry_at(job.attempts, Utc::now()),
            }
        } else {
            FailDisposition::Permanent
        };

        let stored = self
            .queue
            .store()
            .ack_fail(job.id, message.clone(), disposition, Utc::now())
            .await;

        match stored {
            Ok(Some(updated)) if updated.status == JobStatus::Pending => {
                self.queue
                    .observability()
                    .record_job_retrying(&updated, &message, updated.run_at);
                warn!(attempts = updated.attempts, max_attempts = updated.max_attempts, "Job failed, will retry: {}", failure);
            }
            Ok(Some(updated)) => {
                self.queue.observability().record_job_failed(&updated, &message);
                error!(attempts = updated.attempts, "Job failed permanently: {}", failure);
            }
            Ok(None) => info!("Job left processing while running, outcome discarded"),
            Err(e) => error!("Failed to record job failure: {}", e),
        }
    }

    /// No handler: fail at once without spending an attempt
    async fn fail_unhandled(&self, job: JobRecord) {
        let message = QueueError::HandlerMissing(job.job_type.clone()).to_string();

        match self
            .queue
            .store()
            .ack_fail(job.id, message.clone(), FailDisposition::Unhandled, Utc::now())
            .await
        {
            Ok(Some(failed)) => {
                self.queue.observability().record_job_failed(&failed, &message);
                error!("{}", message);
            }
            Ok(None) => {}
            Err(e) => error!("Failed to record missing handler: {}", e),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
