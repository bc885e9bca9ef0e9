// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Encoders turning metrics into bytes for outputs that need a wire format.

use crate::config::deserialize_duration;
use crate::errors::SerializeError;
use crate::metric::Metric;
use serde::Deserialize;
use std::time::Duration;

pub mod influx;
pub mod json;

pub use influx::InfluxSerializer;
pub use json::JsonSerializer;

pub trait Serializer: Send + Sync {
    /// Encodes one metric. The output ends with a newline.
    fn serialize(&self, metric: &Metric) -> Result<Vec<u8>, SerializeError>;

    /// Encodes a batch as newline separated records.
    fn serialize_batch(&self, metrics: &[Metric]) -> Result<Vec<u8>, SerializeError> {
        let mut buf = Vec::new();
        for metric in metrics {
            buf.extend(self.serialize(metric)?);
        }
        Ok(buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// One of `json` or `influx`
    pub data_format: String,
    /// Unit of the JSON `timestamp` field
    #[serde(deserialize_with = "deserialize_duration")]
    pub timestamp_units: Duration,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            data_format: "json".to_string(),
            timestamp_units: Duration::from_secs(1),
        }
    }
}

pub fn new_serializer(config: &SerializerConfig) -> Result<Box<dyn Serializer>, SerializeError> {
    match config.data_format.as_str() {
        "json" => Ok(Box::new(JsonSerializer::new(config.timestamp_units))),
        "influx" => Ok(Box::new(InfluxSerializer)),
        other => Err(SerializeError::InvalidFormat(other.to_string())),
    }
}
