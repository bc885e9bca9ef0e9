// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Orchestration of collectors and delivery units.
//!
//! [`Agent::run`] wires the pipeline:
//!
//! ```text
//! Collector(s) -> metric channel -> flusher -> bridging queue -> bridge -> DeliveryUnit(s)
//! ```
//!
//! The flusher also drives the periodic flush. A flush is skipped rather than queued when the
//! previous one is still running. On shutdown every queued metric is handed to the delivery
//! units before one last flush, and outputs are closed once it completes.

use crate::accumulator::{Accumulator, MetricMaker};
use crate::collector::{Collector, RunningInput};
use crate::config::{AgentConfig, Config};
use crate::constants::{CONNECT_RETRY_DELAY, HOST_TAG, METRIC_CHANNEL_CAPACITY};
use crate::delivery::DeliveryUnit;
use crate::errors::AgentError;
use crate::hostname;
use crate::metric::{Metric, Tags};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct Agent {
    config: AgentConfig,
    global_tags: Arc<Tags>,
    inputs: Vec<Arc<RunningInput>>,
    outputs: Arc<[Arc<DeliveryUnit>]>,
}

impl Agent {
    pub fn new(config: Config) -> Result<Self, AgentError> {
        let Config {
            mut agent,
            mut tags,
            inputs,
            outputs,
        } = config;

        if inputs.is_empty() {
            return Err(AgentError::NoInputs);
        }
        if outputs.is_empty() {
            return Err(AgentError::NoOutputs);
        }
        agent.validate()?;

        if !agent.omit_hostname {
            let hostname = hostname::resolve(agent.hostname.as_deref())?;
            tags.insert(HOST_TAG.to_string(), hostname.clone());
            agent.hostname = Some(hostname);
        }

        let global_tags = Arc::new(tags);
        let inputs = inputs
            .into_iter()
            .map(|mut input| {
                input.set_global_tags(Arc::clone(&global_tags));
                Arc::new(input)
            })
            .collect();

        Ok(Self {
            config: agent,
            global_tags,
            inputs,
            outputs: outputs.into_iter().map(Arc::new).collect(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[must_use]
    pub fn global_tags(&self) -> &Tags {
        &self.global_tags
    }

    #[must_use]
    pub fn inputs(&self) -> &[Arc<RunningInput>] {
        &self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &[Arc<DeliveryUnit>] {
        &self.outputs
    }

    /// Connects every output in order, retrying each once after a fixed delay.
    pub async fn connect(&self) -> Result<(), AgentError> {
        for output in self.outputs.iter() {
            debug!("Attempting connection to output: {}", output.name());
            if let Err(e) = output.connect().await {
                error!(
                    "Failed to connect to output {}, retrying in {:?}, error was '{e:#}'",
                    output.name(),
                    CONNECT_RETRY_DELAY
                );
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                output
                    .connect()
                    .await
                    .map_err(|source| AgentError::Connect {
                        name: output.name().to_string(),
                        source,
                    })?;
            }
            debug!("Successfully connected to output: {}", output.name());
        }
        Ok(())
    }

    /// Closes every output. All outputs are attempted, the first failure is returned.
    pub async fn close(&self) -> Result<(), AgentError> {
        let mut result = Ok(());
        for output in self.outputs.iter() {
            if let Err(source) = output.close().await {
                error!("Error closing output [{}]: {source:#}", output.name());
                if result.is_ok() {
                    result = Err(AgentError::Close {
                        name: output.name().to_string(),
                        source,
                    });
                }
            }
        }
        result
    }

    /// Runs collection and delivery until `shutdown` is cancelled, then drains, flushes and
    /// closes every output.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), AgentError> {
        let (metric_tx, metric_rx) = mpsc::channel(METRIC_CHANNEL_CAPACITY);

        let mut started = Vec::new();
        for input in &self.inputs {
            let Some(service) = input.input().as_service() else {
                continue;
            };
            let maker: Arc<dyn MetricMaker> = input.clone();
            let acc =
                Accumulator::new(maker, metric_tx.clone()).with_precision(self.config.precision);
            if let Err(source) = service.start(acc).await {
                error!("Service for input {} failed to start", input.name());
                self.stop_services(&started).await;
                return Err(AgentError::ServiceStart {
                    name: input.name().to_string(),
                    source,
                });
            }
            started.push(Arc::clone(input));
        }

        let drain = CancellationToken::new();
        let flusher = tokio::spawn(flusher(
            FlushGate::new(Arc::clone(&self.outputs)),
            metric_rx,
            self.config.flush_interval,
            drain.clone(),
        ));

        let mut collectors = JoinSet::new();
        for input in &self.inputs {
            let collector = Collector::new(
                Arc::clone(input),
                self.config.interval,
                self.config.precision,
            );
            collectors.spawn(collector.run(metric_tx.clone(), shutdown.clone()));
        }
        drop(metric_tx);

        while let Some(result) = collectors.join_next().await {
            if let Err(e) = result {
                error!("Collector task failed: {e}");
            }
        }
        self.stop_services(&started).await;

        drain.cancel();
        if let Err(e) = flusher.await {
            error!("Flusher task failed: {e}");
        }

        self.close().await
    }

    async fn stop_services(&self, inputs: &[Arc<RunningInput>]) {
        for input in inputs {
            if let Some(service) = input.input().as_service() {
                service.stop().await;
            }
        }
    }
}

/// Flushes every delivery unit, allowing one periodic flush at a time.
#[derive(Clone)]
pub struct FlushGate {
    outputs: Arc<[Arc<DeliveryUnit>]>,
    semaphore: Arc<Semaphore>,
}

impl FlushGate {
    #[must_use]
    pub fn new(outputs: Arc<[Arc<DeliveryUnit>]>) -> Self {
        Self {
            outputs,
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Flushes unless another gated flush is in progress. Returns whether it flushed.
    pub async fn try_flush(&self) -> bool {
        let Ok(_permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            info!("Skipping a scheduled flush because there is already a flush ongoing.");
            return false;
        };
        self.flush().await;
        true
    }

    /// Writes to every output concurrently, bypassing the gate.
    pub async fn flush(&self) {
        let mut writes = JoinSet::new();
        for output in self.outputs.iter() {
            let output = Arc::clone(output);
            writes.spawn(async move {
                if let Err(e) = output.write().await {
                    error!("Error writing to output [{}]: {e:#}", output.name());
                }
            });
        }
        while let Some(result) = writes.join_next().await {
            if let Err(e) = result {
                error!("Output write task failed: {e}");
            }
        }
    }

    async fn fan_out(&self, metric: Metric) {
        let Some((last, rest)) = self.outputs.split_last() else {
            return;
        };
        for output in rest {
            output.add_metric(metric.clone()).await;
        }
        last.add_metric(metric).await;
    }
}

async fn bridge(gate: FlushGate, mut metrics: mpsc::Receiver<Metric>) {
    while let Some(metric) = metrics.recv().await {
        gate.fan_out(metric).await;
    }
}

async fn flusher(
    gate: FlushGate,
    mut metrics: mpsc::Receiver<Metric>,
    flush_interval: Duration,
    drain: CancellationToken,
) {
    let (out_tx, out_rx) = mpsc::channel(METRIC_CHANNEL_CAPACITY);
    let bridging = tokio::spawn(bridge(gate.clone(), out_rx));

    let mut ticker = interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // discard first tick, which is instantaneous

    let mut flushes = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            () = drain.cancelled() => break,
            _ = ticker.tick() => {
                let gate = gate.clone();
                flushes.spawn(async move {
                    gate.try_flush().await;
                });
            }
            Some(metric) = metrics.recv() => {
                if out_tx.send(metric).await.is_err() {
                    error!("Bridging task stopped, no more metrics can be delivered");
                    break;
                }
            }
        }
        while flushes.try_join_next().is_some() {}
    }

    info!("Hang on, flushing any cached metrics before shutdown");
    while let Ok(metric) = metrics.try_recv() {
        if out_tx.send(metric).await.is_err() {
            break;
        }
    }
    drop(out_tx);
    if let Err(e) = bridging.await {
        error!("Bridging task failed: {e}");
    }
    while flushes.join_next().await.is_some() {}
    gate.flush().await;
}
