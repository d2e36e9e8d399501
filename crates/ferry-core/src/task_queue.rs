//! Bounded concurrent task queue with FIFO results.
//!
//! Work starts as soon as it is enqueued, but results come back strictly in
//! submission order no matter which unit finishes first. Each unit holds a
//! semaphore permit from the moment it is enqueued until its result has been
//! handed out, so `enqueue` waits once `capacity` units are running or
//! holding unread results.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use eyre::{eyre, Result};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::errors::ConfigError;

struct Slot<T> {
    handle: JoinHandle<T>,
    _permit: OwnedSemaphorePermit,
}

struct Pending<T> {
    slots: VecDeque<Slot<T>>,
    closed: bool,
}

pub struct BoundedTaskQueue<T> {
    capacity: usize,
    permits: Arc<Semaphore>,
    pending: Mutex<Pending<T>>,
    /// Oldest unit, parked here while a consumer waits on it.
    head: AsyncMutex<Option<Slot<T>>>,
    added: Notify,
    outstanding: AtomicUsize,
}

impl<T: Send + 'static> BoundedTaskQueue<T> {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            pending: Mutex::new(Pending {
                slots: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            head: AsyncMutex::new(None),
            added: Notify::new(),
            outstanding: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Units enqueued whose results have not been dequeued yet.
    pub fn len(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn is_adding_completed(&self) -> bool {
        self.pending.lock().closed
    }

    /// Start `work` once a slot is free. Waits while the queue is full and
    /// fails if `complete_adding` has been called.
    pub async fn enqueue<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| eyre!("task queue no longer accepts work"))?;
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(eyre!("task queue no longer accepts work"));
            }
            pending.slots.push_back(Slot {
                handle: tokio::spawn(work),
                _permit: permit,
            });
            self.outstanding.fetch_add(1, Ordering::SeqCst);
        }
        self.added.notify_waiters();
        Ok(())
    }

    /// Close the queue to new work. Results already enqueued stay available
    /// and callers blocked in `enqueue` fail.
    pub fn complete_adding(&self) {
        self.pending.lock().closed = true;
        self.permits.close();
        self.added.notify_waiters();
    }

    /// Wait for the oldest outstanding unit and return its result.
    ///
    /// Returns `Ok(None)` once adding is complete and every result has been
    /// drained. A unit that panicked or was aborted surfaces as an error.
    /// Cancel safe: dropping the future leaves the oldest unit at the head,
    /// and the next call waits on it again.
    pub async fn dequeue_result(&self) -> Result<Option<T>> {
        let mut head = self.head.lock().await;
        if head.is_none() {
            *head = match self.next_slot().await {
                Some(slot) => Some(slot),
                None => return Ok(None),
            };
        }
        let Some(slot) = head.as_mut() else {
            return Ok(None);
        };
        let result = (&mut slot.handle).await;

        // Dropping the slot hands its permit back.
        head.take();
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        result
            .map(Some)
            .map_err(|err| eyre!("queued task failed: {err}"))
    }

    async fn next_slot(&self) -> Option<Slot<T>> {
        loop {
            let added = self.added.notified();
            tokio::pin!(added);
            added.as_mut().enable();
            {
                let mut pending = self.pending.lock();
                if let Some(slot) = pending.slots.pop_front() {
                    return Some(slot);
                }
                if pending.closed {
                    return None;
                }
            }
            added.await;
        }
    }
}

impl<T> Drop for BoundedTaskQueue<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.head.get_mut().take() {
            slot.handle.abort();
        }
        for slot in self.pending.get_mut().slots.drain(..) {
            slot.handle.abort();
        }
    }
}
