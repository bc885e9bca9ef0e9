// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::collector::{InputConfig, RunningInput};
use crate::constants::{
    DEFAULT_FLUSH_INTERVAL, DEFAULT_GATHER_INTERVAL, DEFAULT_METRIC_BATCH_SIZE,
    DEFAULT_METRIC_BUFFER_LIMIT, DEFAULT_PRECISION,
};
use crate::delivery::{DeliveryUnit, OutputConfig};
use crate::errors::ConfigError;
use crate::metric::Tags;
use crate::plugin::{Input, Output};
use crate::registry;
use crate::serializer::new_serializer;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Text(String),
    Seconds(u64),
}

impl RawDuration {
    fn into_duration<E: serde::de::Error>(self) -> Result<Duration, E> {
        match self {
            Self::Text(text) => humantime::parse_duration(&text).map_err(E::custom),
            Self::Seconds(secs) => Ok(Duration::from_secs(secs)),
        }
    }
}

/// Decodes a humantime string such as `"10s"` or `"1m 30s"`, or an integer number of seconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    RawDuration::deserialize(deserializer)?.into_duration()
}

pub fn deserialize_optional_duration<'de, D>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawDuration>::deserialize(deserializer)?
        .map(RawDuration::into_duration)
        .transpose()
}

/// Agent-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Default collection interval of every input
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub flush_interval: Duration,
    pub metric_batch_size: usize,
    pub metric_buffer_limit: usize,
    /// Timestamps are rounded to this precision
    #[serde(deserialize_with = "deserialize_duration")]
    pub precision: Duration,
    pub hostname: Option<String>,
    pub omit_hostname: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_GATHER_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            metric_batch_size: DEFAULT_METRIC_BATCH_SIZE,
            metric_buffer_limit: DEFAULT_METRIC_BUFFER_LIMIT,
            precision: DEFAULT_PRECISION,
            hostname: None,
            omit_hostname: false,
        }
    }
}

fn env_duration(key: &str) -> Result<Option<Duration>, ConfigError> {
    env::var(key)
        .ok()
        .map(|val| {
            humantime::parse_duration(&val)
                .map_err(|e| ConfigError::Invalid(format!("{key}={val:?}: {e}")))
        })
        .transpose()
}

fn env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    env::var(key)
        .ok()
        .map(|val| {
            val.parse::<usize>()
                .map_err(|e| ConfigError::Invalid(format!("{key}={val:?}: {e}")))
        })
        .transpose()
}

impl AgentConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            interval: env_duration("METRICFLOW_INTERVAL")?.unwrap_or(defaults.interval),
            flush_interval: env_duration("METRICFLOW_FLUSH_INTERVAL")?
                .unwrap_or(defaults.flush_interval),
            metric_batch_size: env_usize("METRICFLOW_METRIC_BATCH_SIZE")?
                .unwrap_or(defaults.metric_batch_size),
            metric_buffer_limit: env_usize("METRICFLOW_METRIC_BUFFER_LIMIT")?
                .unwrap_or(defaults.metric_buffer_limit),
            precision: env_duration("METRICFLOW_PRECISION")?.unwrap_or(defaults.precision),
            hostname: env::var("METRICFLOW_HOSTNAME")
                .ok()
                .filter(|h| !h.is_empty()),
            omit_hostname: env::var("METRICFLOW_OMIT_HOSTNAME")
                .map(|val| val.to_lowercase() == "true")
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "interval must be greater than 0".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "flush_interval must be greater than 0".to_string(),
            ));
        }
        if self.metric_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "metric_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.metric_buffer_limit < self.metric_batch_size {
            return Err(ConfigError::Invalid(format!(
                "metric_buffer_limit ({}) must not be smaller than metric_batch_size ({})",
                self.metric_buffer_limit, self.metric_batch_size
            )));
        }
        Ok(())
    }
}

/// Everything an [`crate::agent::Agent`] runs: settings, global tags and instantiated plugins.
pub struct Config {
    pub agent: AgentConfig,
    pub tags: Tags,
    pub inputs: Vec<RunningInput>,
    pub outputs: Vec<DeliveryUnit>,
}

impl Config {
    #[must_use]
    pub fn new(agent: AgentConfig) -> Self {
        Self {
            agent,
            tags: Tags::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(AgentConfig::from_env()?))
    }

    /// Instantiates the registered input `name` with plugin specific `options`.
    pub fn add_input(
        &mut self,
        name: &str,
        mut config: InputConfig,
        options: &Value,
    ) -> Result<(), ConfigError> {
        let input = registry::create_input(name, options)?;
        if config.name.is_empty() {
            config.name = name.to_string();
        }
        self.add_input_plugin(Arc::from(input), config)
    }

    /// Instantiates the registered output `name` and installs its serializer if it takes one.
    pub fn add_output(
        &mut self,
        name: &str,
        mut config: OutputConfig,
        options: &Value,
    ) -> Result<(), ConfigError> {
        let mut output = registry::create_output(name, options)?;
        if let Some(serializer_output) = output.as_serializer_output() {
            serializer_output.set_serializer(new_serializer(&config.serializer)?);
        }
        if config.name.is_empty() {
            config.name = name.to_string();
        }
        self.add_output_plugin(output, config)
    }

    /// Adds an already constructed input.
    pub fn add_input_plugin(
        &mut self,
        input: Arc<dyn Input>,
        config: InputConfig,
    ) -> Result<(), ConfigError> {
        debug!("Adding input {}", config.name);
        self.inputs.push(RunningInput::new(input, config)?);
        Ok(())
    }

    /// Adds an already constructed output. Its serializer, if any, is left untouched.
    pub fn add_output_plugin(
        &mut self,
        output: Box<dyn Output>,
        config: OutputConfig,
    ) -> Result<(), ConfigError> {
        debug!("Adding output {}", config.name);
        self.outputs.push(DeliveryUnit::new(
            output,
            &config,
            self.agent.metric_batch_size,
            self.agent.metric_buffer_limit,
        )?);
        Ok(())
    }

    #[must_use]
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|i| i.config().name.as_str()).collect()
    }

    #[must_use]
    pub fn output_names(&self) -> Vec<&str> {
        self.outputs
            .iter()
            .map(|o| o.name().trim_start_matches("outputs."))
            .collect()
    }
}
