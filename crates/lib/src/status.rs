//! Connectivity status prober.
//!
//! A background task probes the model service once at start and then on a fixed interval,
//! publishing `checking | online | offline` on a watch channel. Probe failures never
//! propagate; they only move the state to `offline`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::llm::OllamaClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Checking,
    Online,
    Offline,
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectivityState::Checking => "checking",
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("probe failed: {0}")]
    Failed(String),
}

/// A service that can answer a bounded health request.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, timeout: Duration) -> Result<(), ProbeError>;
}

#[async_trait]
impl HealthCheck for OllamaClient {
    async fn check(&self, timeout: Duration) -> Result<(), ProbeError> {
        self.version(timeout)
            .await
            .map(|_| ())
            .map_err(|e| ProbeError::Failed(e.to_string()))
    }
}

/// Run one probe bounded by `timeout`; any failure maps to `Offline`.
pub async fn probe_once(target: &dyn HealthCheck, timeout: Duration) -> ConnectivityState {
    let result = match tokio::time::timeout(timeout, target.check(timeout)).await {
        Ok(r) => r,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };
    match result {
        Ok(()) => ConnectivityState::Online,
        Err(e) => {
            log::debug!("status probe: {}", e);
            ConnectivityState::Offline
        }
    }
}

/// Periodic prober. Stops when [`StatusProber::stop`] is called or the prober is dropped.
pub struct StatusProber {
    state_rx: watch::Receiver<ConnectivityState>,
    handle: JoinHandle<()>,
}

impl StatusProber {
    /// Spawn the probe loop: one probe immediately, then one per `interval`.
    pub fn start(target: Arc<dyn HealthCheck>, interval: Duration, timeout: Duration) -> Self {
        let (tx, state_rx) = watch::channel(ConnectivityState::Checking);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let state = probe_once(target.as_ref(), timeout).await;
                tx.send_if_modified(|current| {
                    if *current == state {
                        return false;
                    }
                    log::info!("model service is {}", state);
                    *current = state;
                    true
                });
            }
        });
        Self { state_rx, handle }
    }

    pub fn current(&self) -> ConnectivityState {
        *self.state_rx.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_rx.clone()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for StatusProber {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Toggle {
        up: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthCheck for Toggle {
        async fn check(&self, _timeout: Duration) -> Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ProbeError::Failed("connection refused".to_string()))
            }
        }
    }

    struct Hang;

    #[async_trait]
    impl HealthCheck for Hang {
        async fn check(&self, _timeout: Duration) -> Result<(), ProbeError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_probe_then_interval() {
        let target = Arc::new(Toggle {
            up: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        let prober = StatusProber::start(
            target.clone(),
            Duration::from_secs(30),
            Duration::from_secs(3),
        );
        let mut rx = prober.subscribe();
        assert_eq!(*rx.borrow(), ConnectivityState::Checking);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectivityState::Online);
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);

        target.up.store(false, Ordering::SeqCst);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectivityState::Offline);
        assert_eq!(target.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_times_out_to_offline() {
        let start = tokio::time::Instant::now();
        let state = probe_once(&Hang, Duration::from_secs(3)).await;
        assert_eq!(state, ConnectivityState::Offline);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_probing() {
        let target = Arc::new(Toggle {
            up: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        let prober = StatusProber::start(
            target.clone(),
            Duration::from_secs(30),
            Duration::from_secs(3),
        );
        let mut rx = prober.subscribe();
        rx.changed().await.unwrap();
        prober.stop();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
    }
}
