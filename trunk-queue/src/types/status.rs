use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job status lifecycle
///
/// ```text
/// pending --claim--> processing --ok--> completed
/// processing --error, attempts left--> pending
/// processing --error, exhausted--> failed
/// processing --reclaim--> pending
/// any non-completed --cancel--> cancelled
/// failed | cancelled --retry--> pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be claimed by a worker
    Pending,

    /// Claimed by a worker; `locked_at` is set
    Processing,

    /// Handler resolved without error (terminal)
    Completed,

    /// Attempts exhausted or a permanent error occurred
    Failed,

    /// Cancelled by an operator
    Cancelled,
}

impl JobStatus {
    /// Every status, in lifecycle order
    pub const ALL: [JobStatus; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Get the status name as a string
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Explicit retry is only legal from failed or cancelled
    pub fn can_retry(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }

    /// Completed jobs are immutable
    pub fn can_cancel(self) -> bool {
        !matches!(self, Self::Completed)
    }

    /// No further processing happens without operator action
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}
