// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::metric::Metric;
use crate::plugin::Output;
use async_trait::async_trait;
use serde_json::Value;

/// Accepts every batch and drops it.
#[derive(Debug, Default)]
pub struct Discard;

pub fn create(_options: &Value) -> anyhow::Result<Box<dyn Output>> {
    Ok(Box::new(Discard))
}

#[async_trait]
impl Output for Discard {
    async fn connect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn write(&mut self, _metrics: &[Metric]) -> anyhow::Result<()> {
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Send metrics to nowhere at all"
    }
}
