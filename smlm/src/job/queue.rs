//! Bounded blocking FIFO shared by the driver and the workers.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use super::FitJob;
use crate::error::{Error, Result};

/// Queue item: a job, or the signal for one worker to exit.
#[derive(Debug)]
pub enum Work {
    Job(Box<FitJob>),
    Stop,
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<Work>,
    closed: bool,
}

#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Append `work`, blocking while the queue is full.
    pub fn put(&self, work: Work) -> Result<()> {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(Error::QueueClosed);
        }
        state.items.push_back(work);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Append `work` regardless of capacity. Used for shutdown signals, which
    /// must not block behind a full queue.
    pub(crate) fn force_put(&self, work: Work) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::QueueClosed);
        }
        state.items.push_back(work);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking while the queue is empty.
    ///
    /// Fails once the queue is closed and drained.
    pub fn take(&self) -> Result<Work> {
        let mut state = self.state.lock();
        loop {
            if let Some(work) = state.items.pop_front() {
                self.not_full.notify_one();
                return Ok(work);
            }
            if state.closed {
                return Err(Error::QueueClosed);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Remove every queued item.
    pub fn drain(&self) -> Vec<Work> {
        let mut state = self.state.lock();
        let items = state.items.drain(..).collect();
        self.not_full.notify_all();
        items
    }

    /// Reject further puts and wake every blocked caller.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
