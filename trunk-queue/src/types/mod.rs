pub mod ids;
pub mod status;
pub mod options;
pub mod record;
pub mod stats;
pub mod events;

pub use ids::{JobId, LeaseToken};
pub use status::JobStatus;
pub use options::{EnqueueOptions, JobFilter, JobPatch, NewJob, Page, TagMatch};
pub use record::JobRecord;
pub use stats::{QueueStats, StatusCounts};
pub use events::JobEvent;
