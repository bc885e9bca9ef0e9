// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-output buffering, batching and retry.
//!
//! Each [`DeliveryUnit`] owns two [`Buffer`]s. New metrics land in the primary buffer, which
//! is sized to one batch; filling it triggers an eager write. Batches that fail to write move
//! whole into the failed buffer, which is sized to the buffer limit and drained before any new
//! batch on every flush so the output sees metrics in arrival order.

use crate::buffer::Buffer;
use crate::constants::{DEFAULT_METRIC_BATCH_SIZE, DEFAULT_METRIC_BUFFER_LIMIT};
use crate::errors::FilterError;
use crate::filter::{Filter, FilterConfig};
use crate::metric::Metric;
use crate::plugin::Output;
use crate::serializer::SerializerConfig;
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error};

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    pub name: String,
    pub filter: FilterConfig,
    /// 0 falls back to the agent setting
    pub metric_batch_size: usize,
    /// 0 falls back to the agent setting
    pub metric_buffer_limit: usize,
    /// Installed on outputs that accept a serializer
    pub serializer: SerializerConfig,
}

impl OutputConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Not connected yet
    Idle,
    /// Connected and not writing; a successful write returns here
    Connected,
    Writing,
    /// The last write attempt failed
    Degraded,
    Closed,
}

pub struct DeliveryUnit {
    name: String,
    output: tokio::sync::Mutex<Box<dyn Output>>,
    filter: Filter,
    batch_size: usize,
    buffer_limit: usize,
    metrics: Buffer,
    failed: Buffer,
    /// Held while batches move into or through the failed buffer
    retry: tokio::sync::Mutex<()>,
    state: Mutex<DeliveryState>,
}

fn pick(values: [usize; 2], default: usize) -> usize {
    values.into_iter().find(|v| *v > 0).unwrap_or(default)
}

impl DeliveryUnit {
    /// Builds a delivery unit. Sizes set on `config` win over the agent's, and zero means
    /// unset at both levels.
    pub fn new(
        output: Box<dyn Output>,
        config: &OutputConfig,
        agent_batch_size: usize,
        agent_buffer_limit: usize,
    ) -> Result<Self, FilterError> {
        let batch_size = pick(
            [config.metric_batch_size, agent_batch_size],
            DEFAULT_METRIC_BATCH_SIZE,
        );
        let buffer_limit = pick(
            [config.metric_buffer_limit, agent_buffer_limit],
            DEFAULT_METRIC_BUFFER_LIMIT,
        )
        .max(batch_size);

        Ok(Self {
            name: format!("outputs.{}", config.name),
            output: tokio::sync::Mutex::new(output),
            filter: Filter::new(&config.filter)?,
            batch_size,
            buffer_limit,
            metrics: Buffer::new(batch_size),
            failed: Buffer::new(buffer_limit),
            retry: tokio::sync::Mutex::new(()),
            state: Mutex::new(DeliveryState::Idle),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn buffer_limit(&self) -> usize {
        self.buffer_limit
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.metrics.len()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.len()
    }

    /// Metrics evicted from the failed buffer because it was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.failed.dropped()
    }

    #[must_use]
    pub fn state(&self) -> DeliveryState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: DeliveryState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub async fn connect(&self) -> anyhow::Result<()> {
        let mut output = self.output.lock().await;
        output.connect().await?;
        if let Some(service) = output.as_service() {
            service.start().await?;
        }
        self.set_state(DeliveryState::Connected);
        Ok(())
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        let mut output = self.output.lock().await;
        if let Some(service) = output.as_service() {
            service.stop().await;
        }
        let result = output.close().await;
        self.set_state(DeliveryState::Closed);
        result
    }

    /// Buffers one metric, writing a full batch right away.
    pub async fn add_metric(&self, mut metric: Metric) {
        if self.filter.is_active() {
            let (name, fields, tags) = metric.parts_mut();
            if !self.filter.apply(name, fields, tags) {
                return;
            }
        }

        self.metrics.add(metric);
        if self.metrics.len() == self.batch_size {
            let batch = self.metrics.batch(self.batch_size);
            if let Err(e) = self.write_batch(&batch).await {
                error!("Error writing to output [{}]: {e:#}", self.name);
                let _retry = self.retry.lock().await;
                self.failed.add_batch(batch);
            }
        }
    }

    /// Writes previously failed batches, then one batch of new metrics.
    ///
    /// The first failure stops further write attempts for this call. Every batch pulled from
    /// the failed buffer is still pushed back behind the ones not yet pulled, so order is kept.
    /// Eager batches failing meanwhile are queued once this pass is over.
    pub async fn write(&self) -> anyhow::Result<()> {
        let _retry = self.retry.lock().await;
        let n_failed = self.failed.len();
        debug!(
            "Output [{}] buffer fullness: {} / {} metrics",
            self.name,
            n_failed + self.metrics.len(),
            self.buffer_limit
        );

        let mut result = Ok(());
        let mut pulled = 0;
        while pulled < n_failed {
            let batch = self.failed.batch((n_failed - pulled).min(self.batch_size));
            if batch.is_empty() {
                break;
            }
            pulled += batch.len();
            if result.is_ok() {
                result = self.write_batch(&batch).await;
            }
            if result.is_err() {
                self.failed.add_batch(batch);
            }
        }

        let batch = self.metrics.batch(self.batch_size);
        if result.is_ok() {
            result = self.write_batch(&batch).await;
        }
        if result.is_err() {
            self.failed.add_batch(batch);
        }
        result
    }

    async fn write_batch(&self, metrics: &[Metric]) -> anyhow::Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }

        let mut output = self.output.lock().await;
        self.set_state(DeliveryState::Writing);
        let start = Instant::now();
        let result = output.write(metrics).await;
        if result.is_ok() {
            self.set_state(DeliveryState::Connected);
            debug!(
                "Output [{}] wrote batch of {} metrics in {:?}",
                self.name,
                metrics.len(),
                start.elapsed()
            );
        } else {
            self.set_state(DeliveryState::Degraded);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{FieldValue, Fields, Tags, ValueKind};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Recorder {
        fail: AtomicBool,
        delay: Mutex<Duration>,
        attempts: AtomicUsize,
        batches: Mutex<Vec<Vec<i64>>>,
    }

    struct RecordingOutput(Arc<Recorder>);

    #[async_trait]
    impl Output for RecordingOutput {
        async fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()> {
            self.0.attempts.fetch_add(1, Ordering::SeqCst);
            let delay = *self.0.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.0.fail.load(Ordering::SeqCst) {
                anyhow::bail!("sink unavailable");
            }
            self.0.batches.lock().unwrap().push(values(metrics));
            Ok(())
        }
    }

    fn metric(value: i64) -> Metric {
        Metric::new(
            "test",
            Tags::from([("host".to_string(), "a".to_string())]),
            Fields::from([
                ("value".to_string(), FieldValue::Integer(value)),
                ("extra".to_string(), FieldValue::Integer(0)),
            ]),
            Utc::now(),
            ValueKind::Untyped,
        )
        .unwrap()
    }

    fn values(metrics: &[Metric]) -> Vec<i64> {
        metrics
            .iter()
            .map(|m| match m.fields()["value"] {
                FieldValue::Integer(v) => v,
                _ => panic!("unexpected field type"),
            })
            .collect()
    }

    fn unit(recorder: &Arc<Recorder>, batch_size: usize, buffer_limit: usize) -> DeliveryUnit {
        DeliveryUnit::new(
            Box::new(RecordingOutput(Arc::clone(recorder))),
            &OutputConfig::new("recorder"),
            batch_size,
            buffer_limit,
        )
        .unwrap()
    }

    #[test]
    fn test_sizes_fall_back_to_defaults() {
        let recorder = Arc::new(Recorder::default());
        let defaults = unit(&recorder, 0, 0);
        assert_eq!(defaults.batch_size(), DEFAULT_METRIC_BATCH_SIZE);
        assert_eq!(defaults.buffer_limit(), DEFAULT_METRIC_BUFFER_LIMIT);
        assert_eq!(defaults.name(), "outputs.recorder");
        assert_eq!(defaults.state(), DeliveryState::Idle);

        let config = OutputConfig {
            metric_batch_size: 50,
            ..OutputConfig::new("recorder")
        };
        let overridden = DeliveryUnit::new(
            Box::new(RecordingOutput(Arc::clone(&recorder))),
            &config,
            10,
            20,
        )
        .unwrap();
        assert_eq!(overridden.batch_size(), 50);
        assert_eq!(overridden.buffer_limit(), 50);
    }

    #[tokio::test]
    async fn test_full_batch_is_written_eagerly() {
        let recorder = Arc::new(Recorder::default());
        let unit = unit(&recorder, 2, 10);
        unit.add_metric(metric(1)).await;
        assert!(recorder.batches.lock().unwrap().is_empty());
        unit.add_metric(metric(2)).await;
        assert_eq!(*recorder.batches.lock().unwrap(), vec![vec![1, 2]]);
        assert_eq!(unit.pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_eager_write_is_kept() {
        let recorder = Arc::new(Recorder::default());
        recorder.fail.store(true, Ordering::SeqCst);
        let unit = unit(&recorder, 2, 10);
        for i in 0..4 {
            unit.add_metric(metric(i)).await;
        }
        assert_eq!(unit.failed(), 4);
        assert_eq!(unit.state(), DeliveryState::Degraded);
    }

    #[tokio::test]
    async fn test_write_of_nothing_is_a_noop() {
        let recorder = Arc::new(Recorder::default());
        let unit = unit(&recorder, 2, 10);
        unit.write().await.unwrap();
        assert_eq!(recorder.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_retries_preserve_order() {
        let recorder = Arc::new(Recorder::default());
        let unit = unit(&recorder, 3, 30);
        recorder.fail.store(true, Ordering::SeqCst);

        // Three failed eager batches and one pending metric
        for i in 0..10 {
            unit.add_metric(metric(i)).await;
        }
        assert_eq!(unit.failed(), 9);
        assert_eq!(unit.pending(), 1);

        // Failing flush: one attempt only, nothing lost or reordered
        let attempts = recorder.attempts.load(Ordering::SeqCst);
        assert!(unit.write().await.is_err());
        assert_eq!(recorder.attempts.load(Ordering::SeqCst), attempts + 1);
        assert_eq!(unit.failed(), 10);
        assert_eq!(unit.pending(), 0);

        unit.add_metric(metric(10)).await;
        recorder.fail.store(false, Ordering::SeqCst);
        unit.write().await.unwrap();

        assert_eq!(
            *recorder.batches.lock().unwrap(),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8], vec![9], vec![10]]
        );
        assert_eq!(unit.failed(), 0);
        assert_eq!(unit.state(), DeliveryState::Connected);
        assert!(logs_contain("Error writing to output [outputs.recorder]"));
        assert!(logs_contain("buffer fullness: 11 / 30 metrics"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eager_failure_during_retry_keeps_order() {
        let recorder = Arc::new(Recorder::default());
        let unit = Arc::new(unit(&recorder, 1, 10));
        recorder.fail.store(true, Ordering::SeqCst);
        for i in 1..=3 {
            unit.add_metric(metric(i)).await;
        }
        assert_eq!(unit.failed(), 3);

        // The eager write holds the sink while the flush waits for it
        *recorder.delay.lock().unwrap() = Duration::from_secs(1);
        let eager = tokio::spawn({
            let unit = Arc::clone(&unit);
            async move { unit.add_metric(metric(4)).await }
        });
        tokio::task::yield_now().await;
        assert!(unit.write().await.is_err());
        eager.await.unwrap();
        assert_eq!(unit.failed(), 4);

        recorder.fail.store(false, Ordering::SeqCst);
        *recorder.delay.lock().unwrap() = Duration::ZERO;
        unit.write().await.unwrap();
        assert_eq!(
            *recorder.batches.lock().unwrap(),
            vec![vec![1], vec![2], vec![3], vec![4]]
        );
    }

    #[tokio::test]
    async fn test_failed_buffer_evicts_oldest() {
        let recorder = Arc::new(Recorder::default());
        recorder.fail.store(true, Ordering::SeqCst);
        let unit = unit(&recorder, 2, 4);
        for i in 0..8 {
            unit.add_metric(metric(i)).await;
        }
        assert_eq!(unit.failed(), 4);
        assert_eq!(unit.dropped(), 4);

        recorder.fail.store(false, Ordering::SeqCst);
        unit.write().await.unwrap();
        assert_eq!(*recorder.batches.lock().unwrap(), vec![vec![4, 5], vec![6, 7]]);
    }

    #[tokio::test]
    async fn test_output_filter_prunes_and_drops() {
        let recorder = Arc::new(Recorder::default());
        let config = OutputConfig {
            filter: FilterConfig {
                field_drop: vec!["extra".to_string()],
                tag_exclude: vec!["host".to_string()],
                name_drop: vec!["other".to_string()],
                ..FilterConfig::default()
            },
            ..OutputConfig::new("filtered")
        };
        let unit = DeliveryUnit::new(
            Box::new(RecordingOutput(Arc::clone(&recorder))),
            &config,
            1,
            10,
        )
        .unwrap();

        let other = Metric::new(
            "other",
            Tags::new(),
            Fields::from([("value".to_string(), FieldValue::Integer(9))]),
            Utc::now(),
            ValueKind::Gauge,
        )
        .unwrap();
        unit.add_metric(other).await;
        assert_eq!(recorder.attempts.load(Ordering::SeqCst), 0);

        unit.add_metric(metric(1)).await;
        assert_eq!(*recorder.batches.lock().unwrap(), vec![vec![1]]);
    }

    #[tokio::test]
    async fn test_connect_and_close_update_state() {
        let recorder = Arc::new(Recorder::default());
        let unit = unit(&recorder, 2, 10);
        unit.connect().await.unwrap();
        assert_eq!(unit.state(), DeliveryState::Connected);
        unit.close().await.unwrap();
        assert_eq!(unit.state(), DeliveryState::Closed);
    }
}
