// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Error constructing a metric record
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CreationError {
    #[error("metric name must not be empty")]
    EmptyName,
    #[error("metric {0} has no fields")]
    NoFields(String),
}

/// Error compiling a filter pattern
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Serializer(#[from] SerializeError),
}

/// Error looking up or instantiating a registered plugin
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Undefined but requested {kind}: {name}")]
    Undefined { kind: &'static str, name: String },
    #[error("Failed to create {kind} {name}: {source:#}")]
    Creation {
        kind: &'static str,
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
    #[error("failed to encode metric: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors surfaced to the process boundary. Everything else is recovered where it happens.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("no inputs found, did you provide a valid config?")]
    NoInputs,
    #[error("no outputs found, did you provide a valid config?")]
    NoOutputs,
    #[error("failed to resolve hostname: {0}")]
    Hostname(String),
    #[error("failed to connect to output {name}: {source:#}")]
    Connect {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to close output {name}: {source:#}")]
    Close {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to start service input {name}: {source:#}")]
    ServiceStart {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error: ConfigError = RegistryError::Undefined {
            kind: "input",
            name: "nope".to_string(),
        }
        .into();
        assert_eq!(error.to_string(), "Undefined but requested input: nope");
        assert_eq!(
            CreationError::NoFields("cpu".to_string()).to_string(),
            "metric cpu has no fields"
        );
    }

    #[test]
    fn test_agent_error_from_config() {
        let error: AgentError = ConfigError::Invalid("bad".to_string()).into();
        assert_eq!(error.to_string(), "Invalid configuration: bad");
    }
}
