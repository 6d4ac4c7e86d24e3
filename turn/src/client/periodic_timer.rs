
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

/// Which refresh clock fired.
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub enum TimerIdRefresh {
    #[default]
    Alloc,
    Perms,
}

#[async_trait]
pub trait PeriodicTimerTimeoutHandler {
    async fn on_timeout(&mut self, id: TimerIdRefresh);
}

/// Fires a handler at a fixed interval until stopped. Used for the
/// allocation refresh (at LIFETIME/2) and the permission refresh.
pub struct PeriodicTimer {
    id: TimerIdRefresh,
    interval: Duration,
    close_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl PeriodicTimer {
    pub fn new(id: TimerIdRefresh, interval: Duration) -> Self {
        PeriodicTimer {
            id,
            interval,
            close_tx: Mutex::new(None),
        }
    }

    /// Starts ticking; returns false when already running.
    pub async fn start<T: 'static + PeriodicTimerTimeoutHandler + Send>(
        &self,
        handler: Arc<Mutex<T>>,
    ) -> bool {
        let mut close_tx = self.close_tx.lock().await;
        if close_tx.is_some() {
            return false;
        }

        let (tx, mut rx) = mpsc::channel(1);
        *close_tx = Some(tx);
        let (id, interval) = (self.id, self.interval);

        tokio::spawn(async move {
            loop {
                let timer = tokio::time::sleep(interval);
                tokio::pin!(timer);

                tokio::select! {
                    _ = timer.as_mut() => {
                        let mut h = handler.lock().await;
                        h.on_timeout(id).await;
                    }
                    _ = rx.recv() => break,
                }
            }
        });

        true
    }

    pub async fn stop(&self) {
        let mut close_tx = self.close_tx.lock().await;
        close_tx.take();
    }

    pub async fn is_running(&self) -> bool {
        let close_tx = self.close_tx.lock().await;
        close_tx.is_some()
    }
}
