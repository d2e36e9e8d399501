//! Fixed-size buffer pool shared by every job in the process.
//!
//! The pool hands out buffers of one size under a global byte budget and
//! accounts for them per job. It never blocks: when the budget is spent the
//! request comes back empty and the caller retries later. Contents are not
//! tracked, only counts, so a buffer may be reused once its job has given it
//! back.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::chunked_stream::ChunkedBufferStream;
use crate::config::TransferLimits;
use crate::errors::ConfigError;

/// Accounting unit for buffer checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Point-in-time view of pool usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub buffer_size: usize,
    pub capacity_buffers: usize,
    pub in_use: usize,
    pub free_list: usize,
    pub per_job: HashMap<JobId, usize>,
}

impl PoolStats {
    pub fn available(&self) -> usize {
        self.capacity_buffers.saturating_sub(self.in_use)
    }
}

pub struct BufferPool {
    buffer_size: usize,
    state: Mutex<PoolState>,
}

struct PoolState {
    capacity_buffers: usize,
    in_use: usize,
    per_job: HashMap<JobId, usize>,
    free: Vec<Vec<u8>>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, capacity_bytes: usize) -> Result<Self, ConfigError> {
        if buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize(buffer_size));
        }
        Ok(Self {
            buffer_size,
            state: Mutex::new(PoolState {
                capacity_buffers: capacity_bytes / buffer_size,
                in_use: 0,
                per_job: HashMap::new(),
                free: Vec::new(),
            }),
        })
    }

    pub fn from_limits(limits: &TransferLimits) -> Result<Self, ConfigError> {
        Self::new(limits.buffer_size, limits.memory_capacity)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Change the byte budget. Shrinking below current usage only stops new
    /// checkouts until enough buffers come back.
    pub fn set_capacity(&self, capacity_bytes: usize) {
        let mut state = self.state.lock();
        state.capacity_buffers = capacity_bytes / self.buffer_size;
        let keep = state.capacity_buffers.saturating_sub(state.in_use);
        state.free.truncate(keep);
    }

    pub fn require_buffer(&self, job: JobId) -> Option<Vec<u8>> {
        self.require_buffers(job, 1).pop()
    }

    /// Check out up to `count` buffers; fewer (possibly none) come back when
    /// the budget does not stretch that far.
    pub fn require_buffers(&self, job: JobId, count: usize) -> Vec<Vec<u8>> {
        let mut state = self.state.lock();
        let granted = count.min(state.capacity_buffers.saturating_sub(state.in_use));
        if granted < count {
            log::trace!(
                "{job}: pool exhausted, granted {granted} of {count} buffers ({} in use)",
                state.in_use
            );
        }
        self.take(&mut state, job, granted)
    }

    /// All-or-nothing checkout of enough buffers to hold `length` bytes,
    /// presented as one stream.
    pub fn require_stream(&self, job: JobId, length: usize) -> Option<ChunkedBufferStream> {
        let needed = length.div_ceil(self.buffer_size).max(1);
        let buffers = {
            let mut state = self.state.lock();
            if state.capacity_buffers.saturating_sub(state.in_use) < needed {
                return None;
            }
            self.take(&mut state, job, needed)
        };
        match ChunkedBufferStream::new(buffers, 0, length) {
            Ok(stream) => Some(stream),
            Err(err) => {
                // The buffers are dropped with the failed view; give back
                // their accounting as well.
                log::warn!("{job}: {err}");
                Self::debit(&mut self.state.lock(), job, needed);
                None
            }
        }
    }

    /// Hand specific buffers back so their memory is reused.
    pub fn recycle(&self, job: JobId, buffers: Vec<Vec<u8>>) {
        let mut state = self.state.lock();
        let returned = buffers.len();
        let held = state.per_job.get(&job).copied().unwrap_or(0);
        let counted = returned.min(held);
        Self::debit(&mut state, job, counted);

        let room = state.capacity_buffers.saturating_sub(state.in_use + state.free.len());
        state.free.extend(
            buffers
                .into_iter()
                .filter(|buf| buf.len() == self.buffer_size)
                .take(room),
        );
    }

    /// Release every buffer checked out by `job`. Returns how many were
    /// released. Other jobs' accounting is untouched.
    pub fn release_buffers(&self, job: JobId) -> usize {
        let mut state = self.state.lock();
        let held = state.per_job.remove(&job).unwrap_or(0);
        state.in_use -= held;
        held
    }

    /// Forget all checkouts and drop the free list.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.in_use = 0;
        state.per_job.clear();
        state.free.clear();
    }

    pub fn in_use(&self) -> usize {
        self.state.lock().in_use
    }

    pub fn capacity_buffers(&self) -> usize {
        self.state.lock().capacity_buffers
    }

    pub fn held_by(&self, job: JobId) -> usize {
        self.state.lock().per_job.get(&job).copied().unwrap_or(0)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            buffer_size: self.buffer_size,
            capacity_buffers: state.capacity_buffers,
            in_use: state.in_use,
            free_list: state.free.len(),
            per_job: state.per_job.clone(),
        }
    }

    fn take(&self, state: &mut PoolState, job: JobId, count: usize) -> Vec<Vec<u8>> {
        if count == 0 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(state.free.pop().unwrap_or_else(|| vec![0u8; self.buffer_size]));
        }
        state.in_use += count;
        *state.per_job.entry(job).or_insert(0) += count;
        out
    }

    fn debit(state: &mut PoolState, job: JobId, count: usize) {
        if count == 0 {
            return;
        }
        state.in_use -= count;
        if let Some(held) = state.per_job.get_mut(&job) {
            *held -= count;
            if *held == 0 {
                state.per_job.remove(&job);
            }
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("capacity_buffers", &state.capacity_buffers)
            .field("in_use", &state.in_use)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB_A: JobId = JobId(1);
    const JOB_B: JobId = JobId(2);

    #[test]
    fn exhaustion_returns_none_instead_of_blocking() {
        let pool = BufferPool::new(8, 32).unwrap();
        let got = pool.require_buffers(JOB_A, 3);
        assert_eq!(got.len(), 3);
        assert!(got.iter().all(|b| b.len() == 8));

        let partial = pool.require_buffers(JOB_B, 3);
        assert_eq!(partial.len(), 1);
        assert!(pool.require_buffer(JOB_B).is_none());
        assert_eq!(pool.in_use(), 4);
    }

    #[test]
    fn release_frees_only_that_jobs_share() {
        let pool = BufferPool::new(4, 16).unwrap();
        let _a = pool.require_buffers(JOB_A, 3);
        let _b = pool.require_buffers(JOB_B, 1);
        assert!(pool.require_buffer(JOB_B).is_none());

        assert_eq!(pool.release_buffers(JOB_B), 1);
        assert_eq!(pool.held_by(JOB_A), 3);
        assert!(pool.require_buffer(JOB_B).is_some());
        assert!(pool.require_buffer(JOB_B).is_none());

        assert_eq!(pool.release_buffers(JOB_A), 3);
        assert_eq!(pool.require_buffers(JOB_B, 5).len(), 3);
    }

    #[test]
    fn recycled_buffers_are_reused() {
        let pool = BufferPool::new(4, 8).unwrap();
        let mut bufs = pool.require_buffers(JOB_A, 2);
        bufs[0][0] = 0xAB;
        pool.recycle(JOB_A, bufs);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.stats().free_list, 2);

        let again = pool.require_buffers(JOB_B, 2);
        assert_eq!(again.len(), 2);
        assert_eq!(pool.stats().free_list, 0);
    }

    #[test]
    fn shrinking_capacity_blocks_new_checkouts() {
        let pool = BufferPool::new(4, 16).unwrap();
        let held = pool.require_buffers(JOB_A, 3);
        pool.set_capacity(8);
        assert!(pool.require_buffer(JOB_B).is_none());
        pool.recycle(JOB_A, held);
        assert_eq!(pool.require_buffers(JOB_B, 4).len(), 2);
    }

    #[test]
    fn stream_checkout_is_all_or_nothing() {
        let pool = BufferPool::new(10, 30).unwrap();
        assert!(pool.require_stream(JOB_A, 45).is_none());
        assert_eq!(pool.in_use(), 0);

        let stream = pool.require_stream(JOB_A, 25).unwrap();
        assert_eq!(stream.len(), 25);
        assert_eq!(pool.held_by(JOB_A), 3);
        pool.recycle(JOB_A, stream.into_buffers());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn stream_checkout_accounts_exactly_the_buffers_it_covers() {
        let pool = BufferPool::new(10, 100).unwrap();
        for (length, buffers) in [(0, 1), (10, 1), (11, 2), (30, 3)] {
            let stream = pool.require_stream(JOB_A, length).unwrap();
            assert_eq!(stream.len(), length);
            assert_eq!(pool.held_by(JOB_A), buffers);
            pool.recycle(JOB_A, stream.into_buffers());
            assert_eq!(pool.in_use(), 0);
        }
    }

    #[test]
    fn reset_clears_everything() {
        let pool = BufferPool::new(4, 16).unwrap();
        let _ = pool.require_buffers(JOB_A, 2);
        let _ = pool.require_buffers(JOB_B, 2);
        pool.reset();
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert!(stats.per_job.is_empty());
        assert_eq!(stats.available(), 4);
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        assert!(matches!(
            BufferPool::new(0, 1024),
            Err(ConfigError::InvalidBufferSize(0))
        ));
    }
}
