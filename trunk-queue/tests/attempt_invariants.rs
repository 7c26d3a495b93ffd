use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value};

use trunk_queue::prelude::*;

/// Handler that replays a scripted sequence of outcomes, succeeding once the script runs out
fn scripted_registry(script: Vec<bool>) -> HandlerRegistry {
    let script = Arc::new(Mutex::new(VecDeque::from(script)));
    let mut registry = HandlerRegistry::new();
    registry
        .register_fn("carrier_sync", move |_: Value, _| {
            let script = script.clone();
            async move {
                match script.lock().pop_front() {
                    Some(false) => Err(JobError::retryable("carrier API unavailable")),
                    _ => Ok::<(), JobError>(()),
                }
            }
        })
        .unwrap();
    registry
}

#[derive(Debug, Clone, Copy)]
enum Step {
    /// One processor tick
    Process,
    /// A worker claims the job long ago and dies; the reclaimer returns it
    CrashAndReclaim,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![3 => Just(Step::Process), 1 => Just(Step::CrashAndReclaim)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn attempts_stay_within_budget(
        max_attempts in 1u32..6,
        script in prop::collection::vec(any::<bool>(), 0..10),
        steps in prop::collection::vec(step(), 1..16),
    ) {
        tokio_test::block_on(async {
            let queue = JobQueue::in_memory();
            let processor = Processor::new(queue.clone(), scripted_registry(script));
            let id = queue
                .add_job("carrier_sync", json!({}), EnqueueOptions::new().with_max_attempts(max_attempts))
                .await
                .unwrap();

            let mut completed_seen = false;
            for step in steps {
                match step {
                    Step::Process => {
                        processor.run_once().await.unwrap();
                    }
                    Step::CrashAndReclaim => {
                        let claimed = queue
                            .store()
                            .claim_next(Utc::now() - Duration::minutes(30))
                            .await
                            .unwrap();
                        if let Some(job) = claimed {
                            assert!(job.attempts <= job.max_attempts);
                        }
                        queue.reclaim_stuck_jobs(15).await.unwrap();
                    }
                }

                let job = queue.get_job_by_id(id).await.unwrap();
                assert!(job.attempts <= job.max_attempts);
                assert_ne!(job.status, JobStatus::Processing);
                if completed_seen {
                    assert_eq!(job.status, JobStatus::Completed);
                }
                completed_seen = job.status == JobStatus::Completed;
            }
        });
    }
}
