use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{Job, JobSet};
use crate::{JobError, QueueError, QueueResult};

/// Type-erased job handler for runtime dispatch
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: Value, token: CancellationToken) -> Result<(), JobError>;
}

/// Adapter turning an async closure into a [`JobHandler`]
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F, Fut> JobHandler for HandlerFn<F>
where
    F: Fn(Value, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send,
{
    async fn handle(&self, payload: Value, token: CancellationToken) -> Result<(), JobError> {
        (self.0)(payload, token).await
    }
}

struct TypedHandler<J: Job> {
    ctx: J::Context,
    _job: PhantomData<fn() -> J>,
}

#[async_trait]
impl<J: Job> JobHandler for TypedHandler<J> {
    async fn handle(&self, payload: Value, token: CancellationToken) -> Result<(), JobError> {
        let job: J = serde_json::from_value(payload)
            .map_err(|e| JobError::permanent(format!("Failed to decode {} payload: {e}", J::JOB_TYPE)))?;
        job.execute(self.ctx.clone(), token).await
    }
}

struct SetHandler<S: JobSet> {
    job_type: &'static str,
    ctx: S::Context,
    _set: PhantomData<fn() -> S>,
}

#[async_trait]
impl<S: JobSet> JobHandler for SetHandler<S> {
    async fn handle(&self, payload: Value, token: CancellationToken) -> Result<(), JobError> {
        let job = S::from_parts(self.job_type, payload)
            .map_err(|e| JobError::permanent(format!("Failed to decode {} payload: {e}", self.job_type)))?;
        job.dispatch(self.ctx.clone(), token).await
    }
}

/// Job type → handler mapping consulted by the processor at dispatch time
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_new(&self, job_type: &str) -> QueueResult<()> {
        if job_type.trim().is_empty() {
            return Err(QueueError::Validation("job type must not be empty".to_string()));
        }
        if self.handlers.contains_key(job_type) {
            return Err(QueueError::Validation(format!(
                "Job type '{job_type}' already registered"
            )));
        }
        Ok(())
    }

    /// Register a handler; fails if the job type already has one
    pub fn register_handler(
        &mut self,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> QueueResult<()> {
        let job_type = job_type.into();
        self.check_new(&job_type)?;
        self.handlers.insert(job_type, handler);
        Ok(())
    }

    pub fn register_fn<F, Fut>(&mut self, job_type: impl Into<String>, f: F) -> QueueResult<()>
    where
        F: Fn(Value, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        self.register_handler(job_type, Arc::new(HandlerFn(f)))
    }

    /// Register a typed job; its payload is decoded into `J` before execution
    pub fn register<J: Job>(&mut self, ctx: J::Context) -> QueueResult<()> {
        let handler = TypedHandler::<J> {
            ctx,
            _job: PhantomData,
        };
        self.register_handler(J::JOB_TYPE, Arc::new(handler))
    }

    /// Register every job type of a [`JobSet`]. Nothing is registered if any
    /// of them is already taken.
    pub fn register_set<S: JobSet>(&mut self, ctx: S::Context) -> QueueResult<()> {
        for &job_type in S::JOB_TYPES {
            self.check_new(job_type)?;
        }

        for &job_type in S::JOB_TYPES {
            let handler = SetHandler::<S> {
                job_type,
                ctx: ctx.clone(),
                _set: PhantomData,
            };
            self.handlers.insert(job_type.to_string(), Arc::new(handler));
        }
        Ok(())
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
