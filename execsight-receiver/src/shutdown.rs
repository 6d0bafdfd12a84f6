//! Cooperative shutdown signalling.

use std::time::Duration;

use tokio::sync::watch;

/// Resolve once shutdown was requested or the sender is gone.
pub async fn requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `delay` unless shutdown is requested first.
///
/// Returns `false` when interrupted.
pub async fn sleep(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = requested(shutdown) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_completes() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(sleep(Duration::from_millis(10), &mut rx).await);
    }

    #[tokio::test]
    async fn test_sleep_interrupted() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });

        let started = tokio::time::Instant::now();
        assert!(!sleep(Duration::from_secs(30), &mut rx).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_requested() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert!(!sleep(Duration::from_secs(30), &mut rx).await);
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), requested(&mut rx))
            .await
            .expect("should resolve");
    }
}
