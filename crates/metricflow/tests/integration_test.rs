// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use metricflow::{
    accumulator::{Accumulator, RawFields, RawValue},
    agent::Agent,
    collector::InputConfig,
    config::{AgentConfig, Config},
    delivery::OutputConfig,
    metric::{FieldValue, Fields, Metric, Tags, ValueKind},
    plugin::{Input, Output},
};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Capture {
    fail: AtomicBool,
    batches: Mutex<Vec<Vec<Metric>>>,
}

struct CaptureOutput(Arc<Capture>);

#[async_trait]
impl Output for CaptureOutput {
    async fn connect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()> {
        if self.0.fail.load(Ordering::SeqCst) {
            anyhow::bail!("sink down");
        }
        self.0.batches.lock().unwrap().push(metrics.to_vec());
        Ok(())
    }
}

/// Reports a single cpu usage sample on its first gather.
#[derive(Default)]
struct OneShotCpu {
    done: AtomicBool,
}

#[async_trait]
impl Input for OneShotCpu {
    async fn gather(&self, acc: &Accumulator) -> anyhow::Result<()> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let fields = RawFields::from([("usage".to_string(), RawValue::from(42.0))]);
        let tags = Tags::from([("cpu".to_string(), "cpu0".to_string())]);
        acc.add_fields("cpu", fields, Some(tags), None).await;
        Ok(())
    }
}

/// Reports an increasing sequence number on every gather.
#[derive(Default)]
struct Sequence {
    next: AtomicI64,
}

#[async_trait]
impl Input for Sequence {
    async fn gather(&self, acc: &Accumulator) -> anyhow::Result<()> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let fields = RawFields::from([("n".to_string(), RawValue::from(n))]);
        acc.add_counter("seq", fields, None, None).await;
        Ok(())
    }
}

fn config(batch_size: usize, input: Arc<dyn Input>, capture: &Arc<Capture>) -> Config {
    let mut config = Config::new(AgentConfig {
        interval: Duration::from_secs(1),
        flush_interval: Duration::from_secs(1),
        metric_batch_size: batch_size,
        omit_hostname: true,
        ..AgentConfig::default()
    });
    config
        .add_input_plugin(input, InputConfig::new("test"))
        .expect("failed to add input");
    config
        .add_output_plugin(
            Box::new(CaptureOutput(Arc::clone(capture))),
            OutputConfig::new("capture"),
        )
        .expect("failed to add output");
    config
}

#[tokio::test(start_paused = true)]
async fn single_metric_reaches_the_sink_unmodified() {
    let capture = Arc::new(Capture::default());
    let agent = Arc::new(
        Agent::new(config(1, Arc::new(OneShotCpu::default()), &capture))
            .expect("failed to create agent"),
    );
    agent.connect().await.expect("failed to connect");

    let shutdown = CancellationToken::new();
    let run = tokio::spawn({
        let agent = Arc::clone(&agent);
        let shutdown = shutdown.clone();
        async move { agent.run(shutdown).await }
    });

    sleep(Duration::from_millis(1500)).await;
    {
        let batches = capture.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        let metric = &batches[0][0];
        assert_eq!(metric.name(), "cpu");
        assert_eq!(metric.kind(), ValueKind::Untyped);
        assert_eq!(
            metric.tags(),
            &Tags::from([("cpu".to_string(), "cpu0".to_string())])
        );
        assert_eq!(
            metric.fields(),
            &Fields::from([("usage".to_string(), FieldValue::Float(42.0))])
        );
    }

    shutdown.cancel();
    run.await.unwrap().expect("agent run failed");
}

#[tokio::test(start_paused = true)]
async fn failed_batches_are_delivered_in_order_after_recovery() {
    let capture = Arc::new(Capture::default());
    capture.fail.store(true, Ordering::SeqCst);
    let agent = Arc::new(
        Agent::new(config(10, Arc::new(Sequence::default()), &capture))
            .expect("failed to create agent"),
    );
    agent.connect().await.expect("failed to connect");

    let shutdown = CancellationToken::new();
    let run = tokio::spawn({
        let agent = Arc::clone(&agent);
        let shutdown = shutdown.clone();
        async move { agent.run(shutdown).await }
    });

    sleep(Duration::from_millis(2500)).await;
    assert!(capture.batches.lock().unwrap().is_empty());
    assert!(agent.outputs()[0].failed() > 0);
    capture.fail.store(false, Ordering::SeqCst);

    sleep(Duration::from_secs(3)).await;
    shutdown.cancel();
    run.await.unwrap().expect("agent run failed");

    let seen: Vec<i64> = capture
        .batches
        .lock()
        .unwrap()
        .iter()
        .flatten()
        .map(|m| match m.fields()["n"] {
            FieldValue::Integer(n) => n,
            _ => panic!("unexpected field type"),
        })
        .collect();
    assert_eq!(seen, (0..6).collect::<Vec<_>>());
    assert_eq!(agent.outputs()[0].failed(), 0);
}
