// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! POSTs each batch, serialized as newline separated records, to a URL.

use crate::config::deserialize_duration;
use crate::metric::Metric;
use crate::plugin::{Output, SerializerOutput};
use crate::plugins::decode_options;
use crate::serializer::{JsonSerializer, Serializer};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpOptions {
    pub url: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    pub headers: HashMap<String, String>,
    pub content_type: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/metrics".to_string(),
            timeout: Duration::from_secs(5),
            headers: HashMap::new(),
            content_type: "application/json".to_string(),
        }
    }
}

pub struct Http {
    options: HttpOptions,
    client: Option<reqwest::Client>,
    serializer: Box<dyn Serializer>,
}

pub fn create(options: &Value) -> anyhow::Result<Box<dyn Output>> {
    Ok(Box::new(Http::new(decode_options(options)?)))
}

impl Http {
    #[must_use]
    pub fn new(options: HttpOptions) -> Self {
        Self {
            options,
            client: None,
            serializer: Box::new(JsonSerializer::new(Duration::from_secs(1))),
        }
    }
}

#[async_trait]
impl Output for Http {
    async fn connect(&mut self) -> anyhow::Result<()> {
        reqwest::Url::parse(&self.options.url)
            .with_context(|| format!("invalid url {:?}", self.options.url))?;
        let client = reqwest::Client::builder()
            .timeout(self.options.timeout)
            .build()
            .context("failed to create http client")?;
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.client = None;
        Ok(())
    }

    async fn write(&mut self, metrics: &[Metric]) -> anyhow::Result<()> {
        let Some(client) = &self.client else {
            anyhow::bail!("not connected to {}", self.options.url);
        };
        let body = self.serializer.serialize_batch(metrics)?;

        let mut request = client
            .post(&self.options.url)
            .header("Content-Type", &self.options.content_type)
            .body(body);
        for (key, value) in &self.options.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("error sending metrics to {}", self.options.url))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(
                "when writing to [{}] received status code: {}",
                self.options.url,
                status.as_u16()
            );
        }
        debug!("Sent {} metrics to {}", metrics.len(), self.options.url);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "A plugin that can transmit metrics over HTTP"
    }

    fn sample_config(&self) -> &'static str {
        r#"{"url": "http://127.0.0.1:8080/metrics", "timeout": "5s", "headers": {}}"#
    }

    fn as_serializer_output(&mut self) -> Option<&mut dyn SerializerOutput> {
        Some(self)
    }
}

impl SerializerOutput for Http {
    fn set_serializer(&mut self, serializer: Box<dyn Serializer>) {
        self.serializer = serializer;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{FieldValue, Fields, Tags, ValueKind};
    use crate::serializer::InfluxSerializer;
    use chrono::{TimeZone, Utc};
    use mockito::Server;

    fn metric() -> Metric {
        Metric::new(
            "cpu",
            Tags::from([("cpu".to_string(), "cpu0".to_string())]),
            Fields::from([("usage".to_string(), FieldValue::Float(42.5))]),
            Utc.timestamp_opt(1, 0).unwrap(),
            ValueKind::Gauge,
        )
        .unwrap()
    }

    fn http(server: &Server) -> Http {
        Http::new(HttpOptions {
            url: format!("{}/write", server.url()),
            headers: HashMap::from([("X-Token".to_string(), "secret".to_string())]),
            ..HttpOptions::default()
        })
    }

    #[tokio::test]
    async fn test_write_posts_serialized_batch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_header("X-Token", "secret")
            .match_header("Content-Type", "text/plain")
            .match_body("cpu,cpu=cpu0 usage=42.5 1000000000\n")
            .with_status(204)
            .create_async()
            .await;

        let mut output = http(&server);
        output.options.content_type = "text/plain".to_string();
        output.set_serializer(Box::new(InfluxSerializer));
        output.connect().await.unwrap();
        output.write(&[metric()]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_fails_write() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .with_status(503)
            .create_async()
            .await;

        let mut output = http(&server);
        output.connect().await.unwrap();
        let err = output.write(&[metric()]).await.unwrap_err();
        assert!(err.to_string().contains("received status code: 503"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_before_connect_fails() {
        let mut output = Http::new(HttpOptions::default());
        assert!(output.write(&[metric()]).await.is_err());
    }

    #[test]
    fn test_options_decode() {
        let options: HttpOptions = decode_options(&serde_json::json!({
            "url": "http://example.com",
            "timeout": "250ms",
        }))
        .unwrap();
        assert_eq!(options.timeout, Duration::from_millis(250));
        assert_eq!(options.content_type, "application/json");
    }
}
