//! Fixed-capacity rolling history for one metric stream.
//!
//! Storage is allocated once at construction. `push` overwrites the oldest
//! slot once the ring is full, so a push never reallocates or shifts.

use crate::error::{MonitorError, Result};
use crate::metrics::MetricKind;

pub const DEFAULT_HISTORY_CAPACITY: usize = 40;

#[derive(Debug, Clone)]
pub struct HistoryRing {
    metric: MetricKind,
    slots: Vec<f64>,
    /// Index of the oldest value.
    head: usize,
    len: usize,
}

impl HistoryRing {
    pub fn new(metric: MetricKind, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(MonitorError::invalid(
                "history_capacity",
                "capacity must be greater than 0",
            ));
        }

        Ok(Self {
            metric,
            slots: vec![0.0; capacity],
            head: 0,
            len: 0,
        })
    }

    pub fn with_default_capacity(metric: MetricKind) -> Self {
        Self {
            metric,
            slots: vec![0.0; DEFAULT_HISTORY_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    pub fn metric(&self) -> MetricKind {
        self.metric
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: f64) {
        let capacity = self.slots.len();
        if self.len < capacity {
            self.slots[(self.head + self.len) % capacity] = value;
            self.len += 1;
        } else {
            // Full: the oldest slot becomes the newest.
            self.slots[self.head] = value;
            self.head = (self.head + 1) % capacity;
        }
    }

    pub fn latest(&self) -> Option<f64> {
        if self.len == 0 {
            return None;
        }
        let capacity = self.slots.len();
        Some(self.slots[(self.head + self.len - 1) % capacity])
    }

    /// Values from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let capacity = self.slots.len();
        (0..self.len).map(move |i| self.slots[(self.head + i) % capacity])
    }

    pub fn snapshot(&self) -> Vec<f64> {
        self.iter().collect()
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
