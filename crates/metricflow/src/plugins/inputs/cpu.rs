// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CPU usage from `/proc/stat`
//!
//! Usage percentages are computed from the difference between two consecutive samples, so the
//! first gather only records state. Raw times are reported in seconds.

use crate::accumulator::{Accumulator, RawFields, RawValue};
use crate::metric::Tags;
use crate::plugin::Input;
use crate::plugins::decode_options;
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::fs;

const PROC_STAT_PATH: &str = "/proc/stat";

/// Kernel clock ticks per second used by `/proc/stat`
const USER_HZ: f64 = 100.0;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CpuOptions {
    pub percpu: bool,
    pub totalcpu: bool,
    pub collect_cpu_time: bool,
    pub report_active: bool,
    pub proc_stat_path: String,
}

impl Default for CpuOptions {
    fn default() -> Self {
        Self {
            percpu: false,
            totalcpu: true,
            collect_cpu_time: false,
            report_active: false,
            proc_stat_path: PROC_STAT_PATH.to_string(),
        }
    }
}

/// Times spent in each mode, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CpuTimes {
    user: f64,
    nice: f64,
    system: f64,
    idle: f64,
    iowait: f64,
    irq: f64,
    softirq: f64,
    steal: f64,
    guest: f64,
    guest_nice: f64,
}

impl CpuTimes {
    fn total(&self) -> f64 {
        self.user
            + self.system
            + self.nice
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
            + self.idle
    }

    fn active(&self) -> f64 {
        self.total() - self.idle
    }
}

fn parse_proc_stat(
    contents: &str,
    percpu: bool,
    totalcpu: bool,
) -> anyhow::Result<Vec<(String, CpuTimes)>> {
    let mut times = Vec::new();
    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let Some(label) = parts.next().filter(|l| l.starts_with("cpu")) else {
            continue;
        };
        let name = if label == "cpu" {
            if !totalcpu {
                continue;
            }
            "cpu-total".to_string()
        } else {
            if !percpu {
                continue;
            }
            label.to_string()
        };

        let values = parts
            .map(|v| v.parse::<f64>().map(|ticks| ticks / USER_HZ))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("invalid line in /proc/stat: {line:?}"))?;
        if values.len() < 4 {
            anyhow::bail!("invalid line in /proc/stat: {line:?}");
        }
        let at = |i: usize| values.get(i).copied().unwrap_or_default();
        times.push((
            name,
            CpuTimes {
                user: at(0),
                nice: at(1),
                system: at(2),
                idle: at(3),
                iowait: at(4),
                irq: at(5),
                softirq: at(6),
                steal: at(7),
                guest: at(8),
                guest_nice: at(9),
            },
        ));
    }
    Ok(times)
}

enum Sample {
    Counter(Tags, RawFields),
    Gauge(Tags, RawFields),
}

fn fields(pairs: impl IntoIterator<Item = (&'static str, f64)>) -> RawFields {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), RawValue::from(v)))
        .collect()
}

pub struct CpuStats {
    options: CpuOptions,
    last: Mutex<HashMap<String, CpuTimes>>,
}

pub fn create(options: &Value) -> anyhow::Result<Box<dyn Input>> {
    Ok(Box::new(CpuStats::new(decode_options(options)?)))
}

impl CpuStats {
    #[must_use]
    pub fn new(options: CpuOptions) -> Self {
        Self {
            options,
            last: Mutex::new(HashMap::new()),
        }
    }

    fn samples(&self, times: Vec<(String, CpuTimes)>) -> anyhow::Result<Vec<Sample>> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let mut samples = Vec::new();
        let mut result = Ok(());

        for (cpu, cts) in &times {
            let tags = Tags::from([("cpu".to_string(), cpu.clone())]);

            if self.options.collect_cpu_time {
                let mut counter = fields([
                    ("time_user", cts.user),
                    ("time_system", cts.system),
                    ("time_idle", cts.idle),
                    ("time_nice", cts.nice),
                    ("time_iowait", cts.iowait),
                    ("time_irq", cts.irq),
                    ("time_softirq", cts.softirq),
                    ("time_steal", cts.steal),
                    ("time_guest", cts.guest),
                    ("time_guest_nice", cts.guest_nice),
                ]);
                if self.options.report_active {
                    counter.insert("time_active".to_string(), RawValue::from(cts.active()));
                }
                samples.push(Sample::Counter(tags.clone(), counter));
            }

            let Some(prev) = last.get(cpu) else {
                continue;
            };
            let total_delta = cts.total() - prev.total();
            if total_delta < 0.0 {
                result = Err(anyhow::anyhow!(
                    "current total CPU time is less than previous total CPU time"
                ));
                break;
            }
            if total_delta == 0.0 {
                continue;
            }

            let pct = |now: f64, before: f64| 100.0 * (now - before) / total_delta;
            let mut gauge = fields([
                (
                    "usage_user",
                    pct(cts.user - cts.guest, prev.user - prev.guest),
                ),
                ("usage_system", pct(cts.system, prev.system)),
                ("usage_idle", pct(cts.idle, prev.idle)),
                (
                    "usage_nice",
                    pct(cts.nice - cts.guest_nice, prev.nice - prev.guest_nice),
                ),
                ("usage_iowait", pct(cts.iowait, prev.iowait)),
                ("usage_irq", pct(cts.irq, prev.irq)),
                ("usage_softirq", pct(cts.softirq, prev.softirq)),
                ("usage_steal", pct(cts.steal, prev.steal)),
                ("usage_guest", pct(cts.guest, prev.guest)),
                ("usage_guest_nice", pct(cts.guest_nice, prev.guest_nice)),
            ]);
            if self.options.report_active {
                gauge.insert(
                    "usage_active".to_string(),
                    RawValue::from(pct(cts.active(), prev.active())),
                );
            }
            samples.push(Sample::Gauge(tags, gauge));
        }

        *last = times.into_iter().collect();
        result.map(|()| samples)
    }
}

#[async_trait]
impl Input for CpuStats {
    async fn gather(&self, acc: &Accumulator) -> anyhow::Result<()> {
        let path = &self.options.proc_stat_path;
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("error getting CPU info from {path}"))?;
        let times = parse_proc_stat(&contents, self.options.percpu, self.options.totalcpu)?;
        let now = Some(Utc::now());

        for sample in self.samples(times)? {
            match sample {
                Sample::Counter(tags, fields) => {
                    acc.add_counter("cpu", fields, Some(tags), now).await
                }
                Sample::Gauge(tags, fields) => {
                    acc.add_gauge("cpu", fields, Some(tags), now).await
                }
            }
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Read metrics about cpu usage"
    }

    fn sample_config(&self) -> &'static str {
        r#"{"percpu": true, "totalcpu": true, "collect_cpu_time": false, "report_active": false}"#
    }
}
