//! Cooperative cancellation
//!
//! An interrupt only sets a flag. Loops check it between crawls, between
//! files and while cooling down; a registration call in flight always runs to
//! completion.

use std::future::Future;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    token: CancellationToken,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Sleep for `duration` unless cancelled first. Returns `true` when the
    /// sleep was cut short by cancellation.
    pub async fn sleep_or_cancelled(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    /// Cancel on Ctrl+C, or SIGTERM on unix. The task keeps listening after
    /// the first signal until it is aborted.
    pub fn install_signal_handlers(&self) -> JoinHandle<()> {
        tokio::spawn(watch_signals(self.token.clone(), shutdown_signal))
    }
}

async fn watch_signals<F, Fut>(token: CancellationToken, mut next_signal: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::select! {
        _ = next_signal() => {
            info!("Interrupt received, stopping after the current operation");
            token.cancel();
        },
        _ = token.cancelled() => return,
    }

    loop {
        next_signal().await;
        warn!("Already stopping, waiting for the request in flight to finish");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancellation() {
        let controller = CancellationController::new();
        assert!(!controller.sleep_or_cancelled(Duration::from_secs(60)).await);
        assert!(!controller.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let controller = CancellationController::new();
        let canceller = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        assert!(controller.sleep_or_cancelled(Duration::from_secs(3600)).await);
        assert!(started.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let controller = CancellationController::new();
        controller.cancel();
        assert!(controller.sleep_or_cancelled(Duration::from_secs(3600)).await);
    }

    #[tokio::test]
    async fn test_repeated_signals_are_still_received() {
        let token = CancellationToken::new();
        let signals = Arc::new(Notify::new());
        let source = signals.clone();
        let handle = tokio::spawn(watch_signals(token.clone(), move || {
            let source = source.clone();
            async move { source.notified().await }
        }));

        signals.notify_one();
        token.cancelled().await;

        signals.notify_one();
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn test_signal_task_ends_on_cancel() {
        let controller = CancellationController::new();
        let handle = controller.install_signal_handlers();
        controller.cancel();
        handle.await.unwrap();
    }
}
