//! Cooperative cancellation shared between the CLI signal handler, the worker
//! pool, and the retry layer.

use tokio::sync::watch;

/// Clonable one-way flag: once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelFlag {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the flag is tripped. Safe to race in `select!` arms.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Error means the sender dropped, which cannot outlive self.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());

        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move {
                flag.cancelled().await;
            })
        };
        flag.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve after cancel")
            .unwrap();
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_tripped() {
        let flag = CancelFlag::new();
        flag.cancel();
        flag.cancelled().await;
    }
}
