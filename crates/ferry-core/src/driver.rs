//! Drives one location's enumeration into the transfer pipeline.
//!
//! Entries go downstream through a bounded channel. Every item handed over
//! counts as one outstanding task until the consumer reports it finished
//! through a [`TaskCompletion`]. Before each batch the driver waits on the
//! [`BackpressureGovernor`] until the outstanding count is back within its
//! limit, so the backlog never exceeds the limit plus one batch. After each
//! entry it records that entry's token in the job checkpoint so a restart
//! picks up right after the last entry the pipeline actually received.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use eyre::{eyre, Result, WrapErr};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backpressure::BackpressureGovernor;
use crate::buffer::BufferPool;
use crate::entry::TransferEntry;
use crate::enumeration::{EnumerateOptions, Location};
use crate::token::{ContinuationToken, JobCheckpoint};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Handle the transfer side uses to report a finished task.
#[derive(Clone)]
pub struct TaskCompletion {
    outstanding: Arc<AtomicUsize>,
    governor: Arc<BackpressureGovernor>,
}

impl TaskCompletion {
    pub fn complete(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.governor.notify_capacity();
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DriveSummary {
    /// Items handed downstream.
    pub entries: u64,
    /// Error entries handed downstream.
    pub errors: u64,
    pub cancelled: bool,
    /// Token of the last item handed downstream, if any.
    pub last_token: Option<ContinuationToken>,
}

pub struct EnumerationDriver {
    governor: Arc<BackpressureGovernor>,
    pool: Arc<BufferPool>,
    batch_size: usize,
    outstanding: Arc<AtomicUsize>,
}

impl EnumerationDriver {
    pub fn new(governor: Arc<BackpressureGovernor>, pool: Arc<BufferPool>) -> Self {
        Self {
            governor,
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn completion(&self) -> TaskCompletion {
        TaskCompletion {
            outstanding: Arc::clone(&self.outstanding),
            governor: Arc::clone(&self.governor),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Enumerate `location` from wherever `checkpoint` left it and forward
    /// every entry to `tx`.
    ///
    /// A location that runs to the end without an error entry is removed
    /// from the checkpoint. A stuck pipeline comes back as an error that
    /// downcasts to [`StuckTransferError`](crate::errors::StuckTransferError).
    pub async fn run(
        &self,
        location_id: &str,
        location: &Location,
        options: &EnumerateOptions,
        checkpoint: &mut JobCheckpoint,
        tx: &mpsc::Sender<TransferEntry>,
        cancel: &CancellationToken,
    ) -> Result<DriveSummary> {
        let resume = checkpoint.token(location_id).cloned();
        if resume.is_some() {
            log::debug!("resuming {location_id} from saved token");
        }
        let mut entries = location
            .enumerate(options, resume.as_ref(), cancel.clone())
            .wrap_err_with(|| format!("starting enumeration of {location_id}"))?;

        let mut summary = DriveSummary::default();
        // Start with a check so a backlog left by an earlier run counts.
        let mut in_batch = self.batch_size;
        loop {
            if in_batch >= self.batch_size {
                in_batch = 0;
                self.governor
                    .pause_until_within_limit(&self.outstanding, &self.pool, cancel)
                    .await?;
            }
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let Some(entry) = entries.next().await else {
                break;
            };
            in_batch += 1;

            let token = entry.continuation_token().cloned();
            let is_error = entry.is_error();
            if !is_error {
                self.outstanding.fetch_add(1, Ordering::SeqCst);
            }
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                sent = tx.send(entry) => Some(sent),
            };
            match sent {
                None => {
                    if !is_error {
                        self.outstanding.fetch_sub(1, Ordering::SeqCst);
                    }
                    summary.cancelled = true;
                    break;
                }
                Some(Err(_)) => {
                    if !is_error {
                        self.outstanding.fetch_sub(1, Ordering::SeqCst);
                    }
                    return Err(eyre!("transfer entry receiver dropped"));
                }
                Some(Ok(())) => {}
            }

            if is_error {
                summary.errors += 1;
            } else if let Some(token) = token {
                summary.entries += 1;
                checkpoint.record(location_id, token.clone());
                summary.last_token = Some(token);
            }
        }

        if cancel.is_cancelled() {
            summary.cancelled = true;
        }
        if !summary.cancelled && summary.errors == 0 {
            checkpoint.complete(location_id);
        }
        log::debug!(
            "{location_id}: {} entries, {} errors{}",
            summary.entries,
            summary.errors,
            if summary.cancelled { ", cancelled" } else { "" }
        );
        Ok(summary)
    }
}
