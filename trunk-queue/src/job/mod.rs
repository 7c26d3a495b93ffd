pub mod registry;

pub use registry::{HandlerFn, HandlerRegistry, JobHandler};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{JobError, QueueResult};

/// A typed job: payload struct plus the code that runs it.
///
/// The struct is stored as the job's JSON payload and decoded again at dispatch.
#[async_trait]
pub trait Job: Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Shared services handed to every execution
    type Context: Send + Sync + Clone + 'static;

    /// Job type identifier for dispatch
    const JOB_TYPE: &'static str;

    const PRIORITY: i32 = 0;

    const MAX_ATTEMPTS: u32 = 3;

    /// Run one attempt. Long-running work should check `token` and return early
    /// once it is cancelled.
    async fn execute(&self, ctx: Self::Context, token: CancellationToken) -> Result<(), JobError>;

    /// Tags stored with the job when the caller supplies none
    fn tags(&self) -> Vec<String> {
        vec![Self::JOB_TYPE.to_string()]
    }
}

/// A closed set of jobs as one serde-tagged enum.
///
/// Implementors must serialize as
/// `#[serde(tag = "job_type", content = "payload", rename_all = "snake_case")]`
/// so that each variant's tag is its job type and its content is the stored payload.
/// `dispatch` is an exhaustive match, so adding a variant without a handler
/// does not compile.
#[async_trait]
pub trait JobSet: Send + Sync + Serialize + DeserializeOwned + 'static {
    type Context: Send + Sync + Clone + 'static;

    /// Every tag the enum can carry
    const JOB_TYPES: &'static [&'static str];

    fn job_type(&self) -> &'static str;

    async fn dispatch(self, ctx: Self::Context, token: CancellationToken) -> Result<(), JobError>;

    /// Priority used when enqueued without an explicit one
    fn priority(&self) -> Option<i32> {
        None
    }

    /// Split into the stored `(job_type, payload)` pair
    fn into_parts(&self) -> QueueResult<(String, Value)> {
        let mut value = serde_json::to_value(self)?;
        let payload = value
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok((self.job_type().to_string(), payload))
    }

    /// Rebuild the enum from a stored `(job_type, payload)` pair
    fn from_parts(job_type: &str, payload: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "job_type": job_type,
            "payload": payload,
        }))
    }
}
