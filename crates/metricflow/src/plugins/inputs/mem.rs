// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::accumulator::{Accumulator, RawFields, RawValue};
use crate::plugin::Input;
use crate::plugins::decode_options;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::fs;

const PROC_MEMINFO_PATH: &str = "/proc/meminfo";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemOptions {
    pub proc_meminfo_path: String,
}

impl Default for MemOptions {
    fn default() -> Self {
        Self {
            proc_meminfo_path: PROC_MEMINFO_PATH.to_string(),
        }
    }
}

/// Memory figures in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MemInfo {
    total: u64,
    free: u64,
    available: u64,
    buffers: u64,
    cached: u64,
}

impl MemInfo {
    fn used(&self) -> u64 {
        self.total
            .saturating_sub(self.free)
            .saturating_sub(self.buffers)
            .saturating_sub(self.cached)
    }
}

/// Parses `/proc/meminfo`, where values are given in kB.
fn parse_meminfo(contents: &str) -> anyhow::Result<MemInfo> {
    let values: HashMap<&str, u64> = contents
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse::<u64>().ok()?;
            Some((key.trim(), value.saturating_mul(1024)))
        })
        .collect();

    let get = |key: &str| values.get(key).copied();
    let total = get("MemTotal").context("MemTotal missing from /proc/meminfo")?;
    let free = get("MemFree").unwrap_or_default();
    let buffers = get("Buffers").unwrap_or_default();
    let cached = get("Cached").unwrap_or_default();
    let available = get("MemAvailable").unwrap_or(free + buffers + cached);

    Ok(MemInfo {
        total,
        free,
        available,
        buffers,
        cached,
    })
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * part as f64 / total as f64
}

pub struct MemStats {
    options: MemOptions,
}

pub fn create(options: &Value) -> anyhow::Result<Box<dyn Input>> {
    Ok(Box::new(MemStats {
        options: decode_options(options)?,
    }))
}

#[async_trait]
impl Input for MemStats {
    async fn gather(&self, acc: &Accumulator) -> anyhow::Result<()> {
        let path = &self.options.proc_meminfo_path;
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("error getting virtual memory info from {path}"))?;
        let info = parse_meminfo(&contents)?;

        let fields = RawFields::from([
            ("total".to_string(), RawValue::from(info.total)),
            ("available".to_string(), RawValue::from(info.available)),
            ("used".to_string(), RawValue::from(info.used())),
            ("free".to_string(), RawValue::from(info.free)),
            (
                "used_percent".to_string(),
                RawValue::from(percent(info.used(), info.total)),
            ),
            (
                "available_percent".to_string(),
                RawValue::from(percent(info.available, info.total)),
            ),
        ]);
        acc.add_gauge("mem", fields, None, None).await;
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Read metrics about memory usage"
    }
}
