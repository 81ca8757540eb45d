mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use buildorch::engine::WorkerPool;
use buildorch::errors::BuildError;
use common::with_timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_runs_more_than_capacity_at_once() {
    const CAPACITY: usize = 3;
    const UNITS: usize = CAPACITY + 5;

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let mut pool = WorkerPool::new(CAPACITY).with_retry_interval(Duration::from_millis(2));
    for _ in 0..UNITS {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        let done = Arc::clone(&done);
        with_timeout(pool.submit(async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .await;
        assert!(pool.busy() <= CAPACITY);
    }
    with_timeout(pool.join()).await.unwrap();

    assert_eq!(done.load(Ordering::SeqCst), UNITS);
    assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
    assert!(peak.load(Ordering::SeqCst) >= 2, "work should overlap");
}

#[tokio::test]
async fn failure_is_reported_after_all_work_finished() {
    let done = Arc::new(AtomicUsize::new(0));
    let mut pool = WorkerPool::new(2);

    pool.submit(async {
        Err(BuildError::ConfigError("unit failed".into()))
    })
    .await;
    for _ in 0..3 {
        let done = Arc::clone(&done);
        pool.submit(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    }

    let err = with_timeout(pool.join()).await.unwrap_err();
    assert!(matches!(err, BuildError::ConfigError(msg) if msg == "unit failed"));
    assert_eq!(done.load(Ordering::SeqCst), 3);
}
