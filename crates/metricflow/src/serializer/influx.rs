// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Influx line protocol: `measurement,tag=v field=1i,other="s" <nanos>`.
//! Tags and fields are written in key order.

use super::Serializer;
use crate::errors::SerializeError;
use crate::metric::{FieldValue, Metric};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, Default)]
pub struct InfluxSerializer;

fn escape(out: &mut String, value: &str, special: &[char]) {
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

fn escape_measurement(out: &mut String, value: &str) {
    escape(out, value, &[',', ' ']);
}

fn escape_key(out: &mut String, value: &str) {
    escape(out, value, &[',', '=', ' ']);
}

fn write_field_value(out: &mut String, value: &FieldValue) {
    match value {
        FieldValue::String(s) => {
            out.push('"');
            escape(out, s, &['"', '\\']);
            out.push('"');
        }
        // Display already renders integers with the `i` suffix
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

impl Serializer for InfluxSerializer {
    fn serialize(&self, metric: &Metric) -> Result<Vec<u8>, SerializeError> {
        let mut line = String::with_capacity(64);
        escape_measurement(&mut line, metric.name());

        let mut tags: Vec<_> = metric.tags().iter().collect();
        tags.sort_unstable();
        for (key, value) in tags {
            if key.is_empty() || value.is_empty() {
                continue;
            }
            line.push(',');
            escape_key(&mut line, key);
            line.push('=');
            escape_key(&mut line, value);
        }

        let mut fields: Vec<_> = metric.fields().iter().collect();
        fields.sort_unstable_by(|a, b| a.0.cmp(b.0));
        for (i, (key, value)) in fields.into_iter().enumerate() {
            line.push(if i == 0 { ' ' } else { ',' });
            escape_key(&mut line, key);
            line.push('=');
            write_field_value(&mut line, value);
        }

        let _ = writeln!(line, " {}", metric.unix_nanos());
        Ok(line.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Fields, Tags, ValueKind};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_line_protocol_escaping() {
        let metric = Metric::new(
            "disk io",
            Tags::from([
                ("path".to_string(), "/a b,c".to_string()),
                ("empty".to_string(), String::new()),
            ]),
            Fields::from([
                ("reads".to_string(), FieldValue::Integer(12)),
                ("label".to_string(), FieldValue::String("say \"hi\"".to_string())),
                ("ok".to_string(), FieldValue::Boolean(true)),
                ("util=pct".to_string(), FieldValue::Float(0.5)),
            ]),
            Utc.timestamp_opt(2, 3).unwrap(),
            ValueKind::Untyped,
        )
        .unwrap();

        let line = String::from_utf8(InfluxSerializer.serialize(&metric).unwrap()).unwrap();
        assert_eq!(
            line,
            "disk\\ io,path=/a\\ b\\,c label=\"say \\\"hi\\\"\",ok=true,reads=12i,util\\=pct=0.5 2000000003\n"
        );
    }

    #[test]
    fn test_batch_is_newline_separated() {
        let metric = |v| {
            Metric::new(
                "m",
                Tags::new(),
                Fields::from([("v".to_string(), FieldValue::Integer(v))]),
                Utc.timestamp_opt(0, 0).unwrap(),
                ValueKind::Counter,
            )
            .unwrap()
        };
        let bytes = InfluxSerializer
            .serialize_batch(&[metric(1), metric(2)])
            .unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "m v=1i 0\nm v=2i 0\n");
    }
}
