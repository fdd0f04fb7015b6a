//! Panic supervision for long-running loops.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::infrastructure::metrics;

/// Pause before restarting a panicked loop.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Run the future built by `make` until it returns normally or `cancel`
/// fires. A panic is logged and the loop is rebuilt.
///
/// Returns the number of restarts.
pub async fn supervise<F, Fut>(name: &str, cancel: CancellationToken, make: F) -> u32
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut restarts = 0;

    loop {
        match tokio::spawn(make()).await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                restarts += 1;
                metrics::record_consumer_restart(name);
                tracing::error!(task = name, restarts, error = ?e, "Task panicked, restarting");
            }
            Err(e) => {
                tracing::warn!(task = name, error = ?e, "Task aborted");
                break;
            }
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(RESTART_DELAY) => {}
        }
    }

    restarts
}
