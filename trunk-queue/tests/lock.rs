use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use trunk_queue::{DistributedLock, LockBackend, MemoryLockBackend};

fn shared_backend() -> Arc<dyn LockBackend> {
    Arc::new(MemoryLockBackend::new())
}

/// L1. Concurrent Acquire Has One Winner
#[tokio::test]
async fn concurrent_acquire_has_one_winner() {
    let backend = shared_backend();
    let first = DistributedLock::new(backend.clone());
    let second = DistributedLock::new(backend);

    let (a, b) = tokio::join!(first.acquire("balance_sync", 10), second.acquire("balance_sync", 10));
    let winners = [a.unwrap(), b.unwrap()].iter().filter(|won| **won).count();
    assert_eq!(winners, 1);
}

/// L2. Many Instances Racing On Separate Tasks
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_instances_have_one_winner() {
    let backend = shared_backend();
    let winners = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let lock = DistributedLock::new(backend.clone());
            let winners = winners.clone();
            tokio::spawn(async move {
                if lock.acquire("startup_sync", 30).await.unwrap() {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(winners.load(Ordering::SeqCst), 1);
}

/// L3. Prefixes Namespace Keys
#[tokio::test]
async fn prefixes_namespace_keys() {
    let backend = shared_backend();
    let billing = DistributedLock::new(backend.clone()).with_prefix("billing:");
    let crm = DistributedLock::new(backend).with_prefix("crm:");

    assert!(billing.acquire("nightly", 10).await.unwrap());
    assert!(crm.acquire("nightly", 10).await.unwrap());
}

/// L4. Expired Leases Can Be Taken Over
#[tokio::test(start_paused = true)]
async fn expired_lease_is_taken_over() {
    let backend = shared_backend();
    let crashed = DistributedLock::new(backend.clone());
    let survivor = DistributedLock::new(backend);

    assert!(crashed.acquire("cleanup", 5).await.unwrap());
    assert!(!survivor.acquire("cleanup", 5).await.unwrap());

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(survivor.acquire("cleanup", 5).await.unwrap());

    // The stale holder cannot release the survivor's lease
    assert!(!crashed.release("cleanup").await.unwrap());
    assert!(survivor.release("cleanup").await.unwrap());
}
