//! Periodic eviction of expired gateway state.
//!
//! Elapsed rate-limit counters and expired cache entries are removed on a
//! fixed interval. Each pass walks the stores one shard at a time, so live
//! requests only ever wait on a single entry's check-and-delete.

use crate::application::dispatcher::Dispatcher;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "async")]
use tokio::sync::watch;
#[cfg(feature = "async")]
use tokio::task::JoinHandle;
#[cfg(feature = "async")]
use tokio::time::{interval, MissedTickBehavior};

/// Interval used when none is configured.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Error returned when sweeper configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SweepConfigError {
    #[error("sweep interval must be greater than 0")]
    ZeroInterval,
}

/// Error returned when the sweeper task does not stop cleanly.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("sweeper task panicked")]
    TaskPanicked,
    #[error("sweeper task was cancelled")]
    TaskCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl SweepConfig {
    /// # Errors
    /// Returns `SweepConfigError::ZeroInterval` if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self, SweepConfigError> {
        if interval.is_zero() {
            return Err(SweepConfigError::ZeroInterval);
        }
        Ok(Self { interval })
    }
}

/// Entries removed by one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub counters_evicted: usize,
    pub cache_entries_evicted: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.counters_evicted + self.cache_entries_evicted
    }
}

/// Drives [`Dispatcher::sweep`] on an interval.
#[derive(Debug)]
pub struct Sweeper {
    dispatcher: Arc<Dispatcher>,
    config: SweepConfig,
}

impl Sweeper {
    pub fn new(dispatcher: Arc<Dispatcher>, config: SweepConfig) -> Self {
        Self { dispatcher, config }
    }

    pub fn sweep_once(&self) -> SweepStats {
        self.dispatcher.sweep()
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// The first pass runs one full interval after start.
    #[cfg(feature = "async")]
    pub fn start(self) -> SweepHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.config.interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once();
                    }
                    changed = shutdown_rx.changed() => {
                        // A dropped sender also means stop
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("sweeper stopped");
        });

        tracing::info!(interval_ms = period.as_millis() as u64, "sweeper started");
        SweepHandle { shutdown_tx, task }
    }
}

/// Handle to a running sweep loop.
#[cfg(feature = "async")]
#[derive(Debug)]
pub struct SweepHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[cfg(feature = "async")]
impl SweepHandle {
    /// Signal the loop to stop and wait for it to exit.
    ///
    /// # Errors
    /// Returns an error if the task panicked or was aborted.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        let _ = self.shutdown_tx.send(true);
        self.task.await.map_err(|err| {
            if err.is_panic() {
                ShutdownError::TaskPanicked
            } else {
                ShutdownError::TaskCancelled
            }
        })
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
