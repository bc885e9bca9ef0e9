// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns raw measurement submissions from inputs into validated metrics.
//!
//! Inputs submit loosely typed [`RawValue`] fields. Before a [`Metric`] is built:
//! - tags whose key or value ends with the line protocol escape character are dropped
//! - fields whose key ends with the escape character, null fields and NaN/Inf floats are dropped
//! - every integer width becomes an `i64`, with `u64` values above `i64::MAX` clamped
//! - `f32` becomes `f64`
//!
//! A submission left without fields is silently ignored. None of these rules reject the call
//! as an error: the pipeline keeps going.

use crate::constants::{DEFAULT_PRECISION, ESCAPE_CHAR};
use crate::metric::{FieldValue, Fields, Metric, Tags, ValueKind};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Field value as submitted by an input, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Isize(isize),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Usize(usize),
    F32(f32),
    F64(f64),
    Bool(bool),
    Str(String),
}

pub type RawFields = HashMap<String, RawValue>;

macro_rules! raw_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for RawValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

raw_value_from! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64, isize => Isize,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64, usize => Usize,
    f32 => F32, f64 => F64, bool => Bool, String => Str,
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Why a raw value was pruned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejected {
    Null,
    NotFinite,
}

impl RawValue {
    fn normalize(self) -> Result<FieldValue, Rejected> {
        let value = match self {
            Self::Null => return Err(Rejected::Null),
            Self::I8(v) => FieldValue::Integer(v.into()),
            Self::I16(v) => FieldValue::Integer(v.into()),
            Self::I32(v) => FieldValue::Integer(v.into()),
            Self::I64(v) => FieldValue::Integer(v),
            Self::Isize(v) => FieldValue::Integer(i64::try_from(v).unwrap_or(i64::MAX)),
            Self::U8(v) => FieldValue::Integer(v.into()),
            Self::U16(v) => FieldValue::Integer(v.into()),
            Self::U32(v) => FieldValue::Integer(v.into()),
            Self::U64(v) => FieldValue::Integer(i64::try_from(v).unwrap_or(i64::MAX)),
            Self::Usize(v) => FieldValue::Integer(i64::try_from(v).unwrap_or(i64::MAX)),
            Self::F32(v) => finite(f64::from(v))?,
            Self::F64(v) => finite(v)?,
            Self::Bool(v) => FieldValue::Boolean(v),
            Self::Str(v) => FieldValue::String(v),
        };
        Ok(value)
    }
}

fn finite(value: f64) -> Result<FieldValue, Rejected> {
    if value.is_finite() {
        Ok(FieldValue::Float(value))
    } else {
        Err(Rejected::NotFinite)
    }
}

/// Validates and normalizes a submission. Returns `None` when no metric should be emitted.
#[must_use]
pub fn make_metric(
    measurement: &str,
    fields: RawFields,
    mut tags: Tags,
    kind: ValueKind,
    timestamp: DateTime<Utc>,
) -> Option<Metric> {
    if fields.is_empty() || measurement.is_empty() {
        return None;
    }

    tags.retain(|key, value| {
        if key.ends_with(ESCAPE_CHAR) {
            debug!("Measurement [{measurement}] tag [{key}] ends with a backslash, skipping");
            false
        } else if value.ends_with(ESCAPE_CHAR) {
            debug!(
                "Measurement [{measurement}] tag [{key}] has a value ending with a backslash, skipping"
            );
            false
        } else {
            true
        }
    });

    let mut normalized = Fields::with_capacity(fields.len());
    for (key, value) in fields {
        if key.ends_with(ESCAPE_CHAR) {
            debug!("Measurement [{measurement}] field [{key}] ends with a backslash, skipping");
            continue;
        }
        match value.normalize() {
            Ok(value) => {
                normalized.insert(key, value);
            }
            Err(Rejected::NotFinite) => {
                debug!(
                    "Measurement [{measurement}] field [{key}] has a NaN or Inf field, skipping"
                );
            }
            Err(Rejected::Null) => {}
        }
    }

    if normalized.is_empty() {
        return None;
    }

    match Metric::new(measurement, tags, normalized, timestamp, kind) {
        Ok(metric) => Some(metric),
        Err(e) => {
            error!("Error adding point [{measurement}]: {e}");
            None
        }
    }
}

/// Builds metrics on behalf of one input and reports its errors.
pub trait MetricMaker: Send + Sync {
    /// Identity used when logging on behalf of the input, e.g. `inputs.cpu`.
    fn name(&self) -> &str;

    fn make_metric(
        &self,
        measurement: &str,
        fields: RawFields,
        tags: Tags,
        kind: ValueKind,
        timestamp: DateTime<Utc>,
    ) -> Option<Metric>;

    fn report_error(&self, err: anyhow::Error) {
        error!("Error in plugin [{}]: {err:#}", self.name());
    }
}

/// Handle given to inputs to submit measurements. Cheap to clone.
#[derive(Clone)]
pub struct Accumulator {
    metrics: mpsc::Sender<Metric>,
    maker: Arc<dyn MetricMaker>,
    precision: Duration,
}

impl Accumulator {
    #[must_use]
    pub fn new(maker: Arc<dyn MetricMaker>, metrics: mpsc::Sender<Metric>) -> Self {
        Self {
            metrics,
            maker,
            precision: DEFAULT_PRECISION,
        }
    }

    /// Rounds timestamps to this precision. Values below one nanosecond are ignored.
    #[must_use]
    pub fn with_precision(mut self, precision: Duration) -> Self {
        self.precision = precision.max(DEFAULT_PRECISION);
        self
    }

    pub async fn add_fields(
        &self,
        measurement: &str,
        fields: RawFields,
        tags: Option<Tags>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.add(measurement, fields, tags, ValueKind::Untyped, timestamp)
            .await;
    }

    pub async fn add_gauge(
        &self,
        measurement: &str,
        fields: RawFields,
        tags: Option<Tags>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.add(measurement, fields, tags, ValueKind::Gauge, timestamp)
            .await;
    }

    pub async fn add_counter(
        &self,
        measurement: &str,
        fields: RawFields,
        tags: Option<Tags>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.add(measurement, fields, tags, ValueKind::Counter, timestamp)
            .await;
    }

    pub async fn add_summary(
        &self,
        measurement: &str,
        fields: RawFields,
        tags: Option<Tags>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.add(measurement, fields, tags, ValueKind::Summary, timestamp)
            .await;
    }

    pub async fn add_histogram(
        &self,
        measurement: &str,
        fields: RawFields,
        tags: Option<Tags>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.add(measurement, fields, tags, ValueKind::Histogram, timestamp)
            .await;
    }

    async fn add(
        &self,
        measurement: &str,
        fields: RawFields,
        tags: Option<Tags>,
        kind: ValueKind,
        timestamp: Option<DateTime<Utc>>,
    ) {
        let timestamp = self.get_time(timestamp);
        let Some(metric) = self.maker.make_metric(
            measurement,
            fields,
            tags.unwrap_or_default(),
            kind,
            timestamp,
        ) else {
            return;
        };
        if self.metrics.send(metric).await.is_err() {
            debug!(
                "Metric channel closed, dropping [{measurement}] from [{}]",
                self.maker.name()
            );
        }
    }

    /// Reports a runtime error of the input. The error is logged with the input's identity and
    /// never stops collection.
    pub fn add_error(&self, err: impl Into<anyhow::Error>) {
        self.maker.report_error(err.into());
    }

    /// Reports the error held by `result`, if any.
    pub fn add_result<E: Into<anyhow::Error>>(&self, result: Result<(), E>) {
        if let Err(err) = result {
            self.add_error(err);
        }
    }

    fn get_time(&self, timestamp: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        if self.precision <= DEFAULT_PRECISION {
            return timestamp;
        }
        TimeDelta::from_std(self.precision)
            .ok()
            .and_then(|precision| timestamp.duration_round(precision).ok())
            .unwrap_or(timestamp)
    }
}
