// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Immutable metric records.
//!
//! A [`Metric`] can only be built through [`Metric::new`], which refuses an empty name or an
//! empty field set. Field values are already normalized at that point: the accumulator turns
//! every raw integer width into [`FieldValue::Integer`] and every float into
//! [`FieldValue::Float`] before construction.

use crate::errors::CreationError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

pub type Tags = HashMap<String, String>;
pub type Fields = HashMap<String, FieldValue>;

/// Logical kind of the values carried by a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    Untyped,
    Gauge,
    Counter,
    Summary,
    Histogram,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Untyped => "untyped",
            Self::Gauge => "gauge",
            Self::Counter => "counter",
            Self::Summary => "summary",
            Self::Histogram => "histogram",
        };
        f.write_str(kind)
    }
}

/// Normalized field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}i"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
        }
    }
}

/// One named, timestamped observation.
///
/// `Clone` is a deep copy: the tag and field maps are owned by each copy, so a metric handed
/// to several outputs never shares mutable state between them.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    name: String,
    tags: Tags,
    fields: Fields,
    timestamp: DateTime<Utc>,
    kind: ValueKind,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        tags: Tags,
        fields: Fields,
        timestamp: DateTime<Utc>,
        kind: ValueKind,
    ) -> Result<Self, CreationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CreationError::EmptyName);
        }
        if fields.is_empty() {
            return Err(CreationError::NoFields(name));
        }
        Ok(Self {
            name,
            tags,
            fields,
            timestamp,
            kind,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Nanoseconds since the Unix epoch, saturating outside the representable range.
    #[must_use]
    pub fn unix_nanos(&self) -> i64 {
        self.timestamp
            .timestamp_nanos_opt()
            .unwrap_or(if self.timestamp.timestamp() < 0 {
                i64::MIN
            } else {
                i64::MAX
            })
    }

    /// Gives an owner mutable access to fields and tags so output filters can prune them.
    /// Callers must drop the metric if this leaves the field set empty.
    pub(crate) fn parts_mut(&mut self) -> (&str, &mut Fields, &mut Tags) {
        (&self.name, &mut self.fields, &mut self.tags)
    }

    #[must_use]
    pub fn into_parts(self) -> (String, Tags, Fields, DateTime<Utc>, ValueKind) {
        (self.name, self.tags, self.fields, self.timestamp, self.kind)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.tags.iter().collect();
        tags.sort();
        let mut fields: Vec<_> = self.fields.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));

        f.write_str(&self.name)?;
        for (k, v) in tags {
            write!(f, ",{k}={v}")?;
        }
        for (i, (k, v)) in fields.into_iter().enumerate() {
            let sep = if i == 0 { ' ' } else { ',' };
            write!(f, "{sep}{k}={v}")?;
        }
        write!(f, " {}", self.unix_nanos())
    }
}
