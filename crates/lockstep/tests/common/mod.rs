//! Blocking subjects shared by the integration tests.
//!
//! Both block through the worker's instrumented points, so the monitor sees
//! a worker parked in them as blocked rather than running.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use lockstep::{ConductorError, Worker};

/// Fixed-capacity FIFO whose `put` blocks while full and `take` blocks
/// while empty.
pub struct BoundedBuffer<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn put(&self, w: &Worker, value: T) -> Result<(), ConductorError> {
        let items = w.lock(&self.items)?;
        let mut items = w.wait_while(&self.not_full, items, |q| q.len() >= self.capacity)?;
        items.push_back(value);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Puts `value` unless the buffer stays full for `timeout`. Returns
    /// whether the value was added.
    pub fn offer(&self, w: &Worker, value: T, timeout: Duration) -> Result<bool, ConductorError> {
        let items = w.lock(&self.items)?;
        let (mut items, timed_out) =
            w.wait_timeout_while(&self.not_full, items, timeout, |q| q.len() >= self.capacity)?;
        if timed_out {
            return Ok(false);
        }
        items.push_back(value);
        self.not_empty.notify_all();
        Ok(true)
    }

    pub fn take(&self, w: &Worker) -> Result<T, ConductorError> {
        let items = w.lock(&self.items)?;
        let mut items = w.wait_while(&self.not_empty, items, |q| q.is_empty())?;
        let value = items.pop_front().expect("woken with an item available");
        self.not_full.notify_all();
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One-shot countdown latch.
pub struct Latch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    pub fn count_down(&self, w: &Worker) -> Result<(), ConductorError> {
        let mut count = w.lock(&self.count)?;
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
        Ok(())
    }

    pub fn wait(&self, w: &Worker) -> Result<(), ConductorError> {
        let count = w.lock(&self.count)?;
        let _count = w.wait_while(&self.zero, count, |c| *c > 0)?;
        Ok(())
    }

    pub fn count(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
