//! Cooperative cancellation for background loops.
//!
//! Every long-running task owns a `watch::Receiver<bool>`; `true` means stop.
//! A dropped sender is treated the same as an explicit stop.

use std::time::Duration;

use tokio::sync::watch;

/// Create a cancellation channel in the running state.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Whether a stop has been requested.
pub fn is_cancelled(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Resolve once a stop is requested or the sender is gone.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `duration` unless cancelled first.
///
/// Returns `true` when the sleep was cut short by cancellation.
pub async fn sleep_or_cancelled(duration: Duration, rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancelled(rx) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancel() {
        let (_tx, mut rx) = channel();
        assert!(!sleep_or_cancelled(Duration::from_secs(5), &mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let (tx, mut rx) = channel();
        let handle =
            tokio::spawn(async move { sleep_or_cancelled(Duration::from_secs(3600), &mut rx).await });

        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_cancel() {
        let (tx, mut rx) = channel();
        drop(tx);
        cancelled(&mut rx).await;
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let (tx, mut rx) = channel();
        tx.send(true).unwrap();
        assert!(is_cancelled(&rx));
        assert!(sleep_or_cancelled(Duration::from_secs(3600), &mut rx).await);
    }
}
