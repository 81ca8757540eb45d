#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use buildorch::engine::{CoreConfig, RunContext};
use buildorch::types::CleanFlags;

pub use buildorch_test_utils::{LogCapture, init_tracing, with_timeout};

/// A run context rooted at `prefix` with a fast poll interval.
pub fn context(prefix: &Path) -> RunContext {
    context_with(prefix, CleanFlags::NONE, 2)
}

pub fn context_with(prefix: &Path, clean: CleanFlags, max_jobs: usize) -> RunContext {
    RunContext::new(CoreConfig {
        prefix: prefix.to_path_buf(),
        clean,
        max_jobs,
        poll_interval: Duration::from_millis(5),
        ..CoreConfig::default()
    })
}

/// Poll `cond` every 5ms until it holds or `limit` elapses.
pub async fn wait_for(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
