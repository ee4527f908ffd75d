//! Periodic eviction of expired sessions
//!
//! Lazy eviction on lookup only reclaims sessions somebody asks about again. The
//! sweeper guarantees memory is reclaimed for the rest.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::sessions::SessionStore;

/// How often the sweeper scans the store
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct ExpirySweeper;

impl ExpirySweeper {
    /// Start the sweep loop on the current runtime
    ///
    /// The loop stops when `cancel` is cancelled; await the returned handle to
    /// wait for it to finish.
    pub fn spawn(
        store: Arc<SessionStore>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "Session expiry sweeper started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Session expiry sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        Self::sweep(&store);
                    }
                }
            }
        })
    }

    /// Run one eviction pass, returning how many sessions were removed
    pub fn sweep(store: &SessionStore) -> usize {
        let evicted = store.purge_expired();
        for token in &evicted {
            tracing::debug!(token_prefix = %token.prefix(), "Session expired");
        }
        if !evicted.is_empty() {
            tracing::info!(
                evicted = evicted.len(),
                remaining = store.len(),
                "Expired sessions swept"
            );
        }
        evicted.len()
    }
}
