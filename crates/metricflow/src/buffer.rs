// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity FIFO of metrics that drops the oldest entry on overflow.

use crate::metric::Metric;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bounded metric buffer shared between producers and the flusher.
///
/// `add` never blocks on capacity and never rejects data: when the buffer is full the single
/// oldest metric is evicted to admit the new one. Every operation runs under one lock so the
/// length and the storage never disagree.
#[derive(Debug)]
pub struct Buffer {
    metrics: Mutex<VecDeque<Metric>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl Buffer {
    /// Creates a buffer holding up to `capacity` metrics. A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            metrics: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Metric>> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, metric: Metric) {
        let mut metrics = self.lock();
        self.push(&mut metrics, metric);
    }

    /// Appends every metric in order, under a single critical section.
    pub fn add_batch(&self, batch: Vec<Metric>) {
        let mut metrics = self.lock();
        for metric in batch {
            self.push(&mut metrics, metric);
        }
    }

    fn push(&self, metrics: &mut VecDeque<Metric>, metric: Metric) {
        if metrics.len() >= self.capacity {
            metrics.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        metrics.push_back(metric);
    }

    /// Removes and returns up to `batch_size` metrics, oldest first.
    pub fn batch(&self, batch_size: usize) -> Vec<Metric> {
        let mut metrics = self.lock();
        let n = metrics.len().min(batch_size);
        metrics.drain(..n).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of metrics evicted since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
