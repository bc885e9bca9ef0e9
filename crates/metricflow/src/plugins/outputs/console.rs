// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::metric::Metric;
use crate::plugin::{Output, SerializerOutput};
use crate::serializer::{JsonSerializer, Serializer};
use async_trait::async_trait;
use serde_json::Value;
use std::io::{self, Write};
use std::time::Duration;

/// Writes serialized metrics to stdout, or to any writer given to [`Console::with_writer`].
pub struct Console {
    writer: Box<dyn Write + Send>,
    serializer: Box<dyn Serializer>,
}

pub fn create(_options: &Value) -> anyhow::Result<Box<dyn Output>> {
    Ok(Box::new(Console::with_writer(Box::new(io::stdout()))))
}

impl Console {
    #[must_use]
    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer,
            serializer: Box::new(JsonSerializer::new(Duration::from_secs(1))),
        }
    }
}

#[async_trait]
impl Output for Console {
    async fn connect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    async fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()> {
        let buf = self.serializer.serialize_batch(metrics)?;
        self.writer.write_all(&buf)?;
        self.writer.flush()?;
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Send metrics to stdout"
    }

    fn as_serializer_output(&mut self) -> Option<&mut dyn SerializerOutput> {
        Some(self)
    }
}

impl SerializerOutput for Console {
    fn set_serializer(&mut self, serializer: Box<dyn Serializer>) {
        self.serializer = serializer;
    }
}
