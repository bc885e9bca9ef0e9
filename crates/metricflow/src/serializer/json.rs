// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::Serializer;
use crate::errors::SerializeError;
use crate::metric::{Fields, Metric, Tags};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct JsonMetric<'a> {
    name: &'a str,
    tags: &'a Tags,
    fields: &'a Fields,
    timestamp: i64,
}

/// One JSON object per line, with the timestamp expressed in `timestamp_units`.
#[derive(Debug, Clone)]
pub struct JsonSerializer {
    timestamp_units: Duration,
}

impl JsonSerializer {
    #[must_use]
    pub fn new(timestamp_units: Duration) -> Self {
        let units = if timestamp_units.is_zero() {
            Duration::from_secs(1)
        } else {
            timestamp_units
        };
        Self {
            timestamp_units: units,
        }
    }

    fn timestamp(&self, metric: &Metric) -> i64 {
        let units = i64::try_from(self.timestamp_units.as_nanos()).unwrap_or(i64::MAX);
        metric.unix_nanos() / units
    }
}

impl Serializer for JsonSerializer {
    fn serialize(&self, metric: &Metric) -> Result<Vec<u8>, SerializeError> {
        let record = JsonMetric {
            name: metric.name(),
            tags: metric.tags(),
            fields: metric.fields(),
            timestamp: self.timestamp(metric),
        };
        let mut buf = serde_json::to_vec(&record)?;
        buf.push(b'\n');
        Ok(buf)
    }
}
