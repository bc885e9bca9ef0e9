// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hostname detection

use crate::errors::AgentError;
use std::env;

/// Resolves the hostname added to every metric as the `host` tag.
///
/// Tries, in order:
/// 1. the configured override
/// 2. the `HOSTNAME` environment variable
/// 3. the system hostname via `nix::unistd::gethostname()`
pub fn resolve(configured: Option<&str>) -> Result<String, AgentError> {
    resolve_from(configured, env::var("HOSTNAME").ok(), system_hostname)
}

fn system_hostname() -> Result<String, AgentError> {
    let hostname =
        nix::unistd::gethostname().map_err(|e| AgentError::Hostname(e.to_string()))?;
    Ok(hostname.to_string_lossy().into_owned())
}

fn resolve_from(
    configured: Option<&str>,
    from_env: Option<String>,
    system: impl FnOnce() -> Result<String, AgentError>,
) -> Result<String, AgentError> {
    if let Some(hostname) = configured.filter(|h| !h.is_empty()) {
        return Ok(hostname.to_string());
    }
    if let Some(hostname) = from_env.filter(|h| !h.is_empty()) {
        return Ok(hostname);
    }
    let hostname = system()?;
    if hostname.is_empty() {
        return Err(AgentError::Hostname("system hostname is empty".to_string()));
    }
    Ok(hostname)
}
