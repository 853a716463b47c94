//! Process-wide cancellation signal.
//!
//! One [`ShutdownHandle`] is created in `main`; every loop and every blocking
//! wait holds a cloned [`Shutdown`] and selects against it.

use tokio::sync::watch;

/// Trigger side of the signal.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Listener side of the signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Shutdown { rx })
    }

    /// Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    /// A signal that never fires, for one-shot runs and tests.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive for the lifetime of the process so `wait` pends forever.
        std::mem::forget(tx);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&mut self) {
        if self.is_triggered() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
        // Sender dropped without triggering: nothing will ever fire.
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_after_trigger() {
        let (handle, mut shutdown) = ShutdownHandle::new();
        assert!(!shutdown.is_triggered());

        let waiter = tokio::spawn(async move {
            shutdown.wait().await;
        });
        handle.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[test]
    fn wait_pends_until_triggered() {
        let (handle, mut shutdown) = ShutdownHandle::new();
        let mut wait = tokio_test::task::spawn(shutdown.wait());
        tokio_test::assert_pending!(wait.poll());

        handle.trigger();
        assert!(wait.is_woken());
        tokio_test::assert_ready!(wait.poll());
    }

    #[tokio::test]
    async fn never_does_not_fire() {
        let mut shutdown = Shutdown::never();
        let res = tokio::time::timeout(Duration::from_millis(20), shutdown.wait()).await;
        assert!(res.is_err());
    }
}
