pub mod builders;
pub mod fakes;
pub mod logs;

use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

pub use logs::{CapturedEvent, LogCapture};

static INIT: Once = Once::new();

/// Upper bound for any single awaited step in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a global fmt subscriber writing through the test harness.
///
/// Reads `BUILDORCH_LOG` like the binary does; without it only this crate's
/// own events at info and anything at warn are shown.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("BUILDORCH_LOG")
            .unwrap_or_else(|_| EnvFilter::new("warn,buildorch=info"));

        // Keep any subscriber a test installed first.
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(false)
            .try_init();
    });
}

/// Await `f`, panicking if it takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .unwrap_or_else(|_| panic!("test step did not finish within {TEST_TIMEOUT:?}"))
}
