// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-input scheduling.
//!
//! Every input runs on its own ticker. A gather call is spawned on a dedicated task and watched
//! by a hang guard whose period equals the collection interval: each time the guard fires a
//! timeout is reported, but the call is never cancelled. The loop keeps waiting for the real
//! completion so a stuck input is never invoked a second time.

use crate::accumulator::{make_metric, Accumulator, MetricMaker, RawFields};
use crate::errors::FilterError;
use crate::filter::{Filter, FilterConfig};
use crate::metric::{Metric, Tags, ValueKind};
use crate::plugin::Input;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InputConfig {
    pub name: String,
    pub name_override: Option<String>,
    pub measurement_prefix: String,
    pub measurement_suffix: String,
    pub tags: Tags,
    /// Overrides the agent collection interval for this input
    #[serde(deserialize_with = "crate::config::deserialize_optional_duration")]
    pub interval: Option<Duration>,
    pub filter: FilterConfig,
}

impl InputConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// An input plugin together with its configuration and counters.
pub struct RunningInput {
    input: Arc<dyn Input>,
    config: InputConfig,
    display_name: String,
    filter: Filter,
    global_tags: Arc<Tags>,
    errors: AtomicU64,
    gathered: AtomicU64,
}

impl RunningInput {
    pub fn new(input: Arc<dyn Input>, config: InputConfig) -> Result<Self, FilterError> {
        Ok(Self {
            input,
            display_name: format!("inputs.{}", config.name),
            filter: Filter::new(&config.filter)?,
            config,
            global_tags: Arc::default(),
            errors: AtomicU64::new(0),
            gathered: AtomicU64::new(0),
        })
    }

    /// Tags added to every metric of this input unless it already carries the key.
    pub fn set_global_tags(&mut self, tags: Arc<Tags>) {
        self.global_tags = tags;
    }

    #[must_use]
    pub fn input(&self) -> &Arc<dyn Input> {
        &self.input
    }

    #[must_use]
    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    /// Number of errors reported, timeouts included.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn metrics_gathered(&self) -> u64 {
        self.gathered.load(Ordering::Relaxed)
    }

    fn measurement_name(&self, measurement: &str) -> String {
        let base = self.config.name_override.as_deref().unwrap_or(measurement);
        format!(
            "{}{base}{}",
            self.config.measurement_prefix, self.config.measurement_suffix
        )
    }
}

impl MetricMaker for RunningInput {
    fn name(&self) -> &str {
        &self.display_name
    }

    fn make_metric(
        &self,
        measurement: &str,
        mut fields: RawFields,
        mut tags: Tags,
        kind: ValueKind,
        timestamp: DateTime<Utc>,
    ) -> Option<Metric> {
        let name = self.measurement_name(measurement);

        for (key, value) in self.config.tags.iter().chain(self.global_tags.iter()) {
            tags.entry(key.clone()).or_insert_with(|| value.clone());
        }

        if !self.filter.apply(&name, &mut fields, &mut tags) {
            return None;
        }

        let metric = make_metric(&name, fields, tags, kind, timestamp)?;
        self.gathered.fetch_add(1, Ordering::Relaxed);
        Some(metric)
    }

    fn report_error(&self, err: anyhow::Error) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        error!("Error in plugin [{}]: {err:#}", self.display_name);
    }
}

/// Drives one [`RunningInput`] on its interval until shutdown.
pub struct Collector {
    input: Arc<RunningInput>,
    interval: Duration,
    precision: Duration,
}

impl Collector {
    #[must_use]
    pub fn new(input: Arc<RunningInput>, interval: Duration, precision: Duration) -> Self {
        let interval = input
            .config()
            .interval
            .filter(|d| !d.is_zero())
            .unwrap_or(interval)
            .max(Duration::from_millis(1));
        Self {
            input,
            interval,
            precision,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn run(self, metrics: mpsc::Sender<Metric>, shutdown: CancellationToken) {
        let maker: Arc<dyn MetricMaker> = self.input.clone();
        let acc = Accumulator::new(maker, metrics).with_precision(self.precision);
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(
            "Starting collection of [{}] every {:?}",
            self.input.name(),
            self.interval
        );
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !gather_with_timeout(&self.input, &acc, self.interval, &shutdown).await {
                break;
            }
        }
        debug!("Collection of [{}] stopped", self.input.name());
    }
}

/// Runs one gather call. Returns false if shutdown was observed before the call completed; the
/// call itself keeps running on its own task in that case.
async fn gather_with_timeout(
    input: &RunningInput,
    acc: &Accumulator,
    timeout: Duration,
    shutdown: &CancellationToken,
) -> bool {
    let plugin = Arc::clone(input.input());
    let task_acc = acc.clone();
    let mut gather = tokio::spawn(async move { plugin.gather(&task_acc).await });

    let mut guard = interval_at(Instant::now() + timeout, timeout);
    guard.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = &mut gather => {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => acc.add_error(e),
                    Err(e) => acc.add_error(anyhow::anyhow!("gather task failed: {e}")),
                }
                return true;
            }
            _ = guard.tick() => {
                acc.add_error(anyhow::anyhow!(
                    "took longer to collect than collection interval ({timeout:?})"
                ));
            }
            () = shutdown.cancelled() => return false,
        }
    }
}
