//! Throughput Monitor
//!
//! The consumer dispatch signals each processed record on a small channel;
//! the monitor counts signals and logs the total once per interval. Signals
//! are best-effort: a full channel drops them.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the signal channel.
pub const SIGNAL_CAPACITY: usize = 100;

/// How often throughput is logged.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Sending half, held by the consumer dispatch.
#[derive(Debug, Clone)]
pub struct ProcessedSignal {
    tx: mpsc::Sender<()>,
}

impl ProcessedSignal {
    /// Record one processed message without waiting.
    pub fn signal(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Receiving half.
#[derive(Debug)]
pub struct ThroughputMonitor {
    rx: mpsc::Receiver<()>,
    interval: Duration,
}

impl ThroughputMonitor {
    /// Create a monitor reporting every [`REPORT_INTERVAL`].
    #[must_use]
    pub fn channel() -> (ProcessedSignal, Self) {
        Self::with_interval(REPORT_INTERVAL)
    }

    /// Create a monitor with a custom report interval.
    #[must_use]
    pub fn with_interval(interval: Duration) -> (ProcessedSignal, Self) {
        let (tx, rx) = mpsc::channel(SIGNAL_CAPACITY);
        (ProcessedSignal { tx }, Self { rx, interval })
    }

    /// Count signals until cancelled. Returns the total seen.
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;

        let mut window: u64 = 0;
        let mut total: u64 = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                signal = self.rx.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    window += 1;
                    total += 1;
                }
                _ = ticker.tick() => {
                    if window > 0 {
                        tracing::info!(processed_messages = window, "Bridge throughput");
                        window = 0;
                    }
                }
            }
        }

        total
    }
}
