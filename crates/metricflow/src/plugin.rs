// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Capability contracts implemented by input and output plugins.
//!
//! A plugin is a plain [`Input`] or [`Output`]. Optional capabilities (long running services,
//! configurable serialization) are discovered through the `as_*` queries, which return `None`
//! unless the plugin overrides them.

use crate::accumulator::Accumulator;
use crate::metric::Metric;
use crate::serializer::Serializer;
use async_trait::async_trait;

#[async_trait]
pub trait Input: Send + Sync {
    /// Collects one round of measurements into `acc`. Errors are reported and never stop the
    /// collection loop.
    async fn gather(&self, acc: &Accumulator) -> anyhow::Result<()>;

    fn description(&self) -> &'static str {
        ""
    }

    fn sample_config(&self) -> &'static str {
        ""
    }

    fn as_service(&self) -> Option<&dyn ServiceInput> {
        None
    }
}

/// Input that produces metrics on its own schedule between `start` and `stop`.
#[async_trait]
pub trait ServiceInput: Send + Sync {
    async fn start(&self, acc: Accumulator) -> anyhow::Result<()>;
    async fn stop(&self);
}

/// Sink for batches of metrics. All calls are serialized by the owning delivery unit, so an
/// implementation never sees two concurrent calls.
#[async_trait]
pub trait Output: Send {
    async fn connect(&mut self) -> anyhow::Result<()>;
    async fn close(&mut self) -> anyhow::Result<()>;
    async fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()>;

    fn description(&self) -> &'static str {
        ""
    }

    fn sample_config(&self) -> &'static str {
        ""
    }

    fn as_service(&mut self) -> Option<&mut dyn ServiceOutput> {
        None
    }

    fn as_serializer_output(&mut self) -> Option<&mut dyn SerializerOutput> {
        None
    }
}

#[async_trait]
pub trait ServiceOutput: Send {
    async fn start(&mut self) -> anyhow::Result<()>;
    async fn stop(&mut self);
}

pub trait SerializerOutput: Send {
    fn set_serializer(&mut self, serializer: Box<dyn Serializer>);
}
