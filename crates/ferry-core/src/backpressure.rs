//! Enumeration throttling.
//!
//! The enumeration driver consults the governor between batches. While the
//! number of outstanding transfer tasks is above the ceiling, enumeration
//! waits for the transfer side to signal freed capacity. A wait that sees no
//! signal for longer than the stuck timeout fails the job instead of letting
//! the backlog grow without bound.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::buffer::BufferPool;
use crate::config::TransferLimits;
use crate::errors::{ConfigError, StuckTransferError};

#[derive(Debug)]
pub struct BackpressureGovernor {
    limit: usize,
    signal: Notify,
    poll_interval: Duration,
    stuck_timeout: Option<Duration>,
}

impl BackpressureGovernor {
    pub fn new(
        limit: usize,
        poll_interval: Duration,
        stuck_timeout: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::InvalidCapacity(limit));
        }
        Ok(Self {
            limit,
            signal: Notify::new(),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            stuck_timeout,
        })
    }

    pub fn from_limits(limits: &TransferLimits) -> Result<Self, ConfigError> {
        Self::new(
            limits.max_outstanding_tasks,
            limits.poll_interval(),
            limits.stuck_timeout(),
        )
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Called by the transfer side whenever a task finishes. Only a wait
    /// already in progress is woken; nothing is remembered for later waits.
    pub fn notify_capacity(&self) {
        self.signal.notify_waiters();
    }

    /// Return immediately when `outstanding` is within the limit; otherwise
    /// wait until capacity is signalled or `cancel` fires.
    ///
    /// Cancellation is not an error: the caller checks the token itself.
    pub async fn check_and_pause_enumeration(
        &self,
        outstanding: usize,
        pool: &BufferPool,
        cancel: &CancellationToken,
    ) -> Result<(), StuckTransferError> {
        if outstanding <= self.limit {
            return Ok(());
        }
        log::debug!(
            "pausing enumeration: {} outstanding tasks exceed limit {}",
            outstanding,
            self.limit
        );
        self.wait_for_signal(|| outstanding, pool, cancel).await
    }

    /// Keep pausing until the live `outstanding` count is back within the
    /// limit. Every completion signal restarts the stuck timer, and the
    /// count is re-read on each poll so a signal that raced the first read
    /// is never needed.
    pub async fn pause_until_within_limit(
        &self,
        outstanding: &AtomicUsize,
        pool: &BufferPool,
        cancel: &CancellationToken,
    ) -> Result<(), StuckTransferError> {
        let current = || outstanding.load(Ordering::SeqCst);
        if current() <= self.limit {
            return Ok(());
        }
        log::debug!(
            "pausing enumeration: {} outstanding tasks exceed limit {}",
            current(),
            self.limit
        );
        while current() > self.limit && !cancel.is_cancelled() {
            self.wait_for_signal(current, pool, cancel).await?;
        }
        Ok(())
    }

    async fn wait_for_signal(
        &self,
        current: impl Fn() -> usize,
        pool: &BufferPool,
        cancel: &CancellationToken,
    ) -> Result<(), StuckTransferError> {
        // Register before looking at the count so no signal slips between.
        let signal = self.signal.notified();
        tokio::pin!(signal);
        signal.as_mut().enable();

        let started = Instant::now();
        loop {
            let outstanding = current();
            if outstanding <= self.limit {
                return Ok(());
            }
            let mut wait = self.poll_interval;
            if let Some(timeout) = self.stuck_timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    let stats = pool.stats();
                    let err = StuckTransferError {
                        waited,
                        outstanding,
                        limit: self.limit,
                        buffers_in_use: stats.in_use,
                        buffers_total: stats.capacity_buffers,
                    };
                    log::warn!("{err}");
                    return Err(err);
                }
                wait = wait.min(timeout - waited);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = signal.as_mut() => {
                    log::debug!("resuming enumeration after {:?}", started.elapsed());
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
