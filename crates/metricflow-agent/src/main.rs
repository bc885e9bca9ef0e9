// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::Context;
use metricflow::{
    agent::Agent, collector::InputConfig, config::Config, delivery::OutputConfig, registry,
};
use serde_json::Value;
use std::env;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_INPUTS: &str = "cpu,mem";
const DEFAULT_OUTPUTS: &str = "console";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("METRICFLOW_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");
    debug!("Available inputs: {}", registry::input_names().join(", "));
    debug!("Available outputs: {}", registry::output_names().join(", "));

    loop {
        let shutdown = CancellationToken::new();
        let signals = tokio::spawn(wait_for_signal(shutdown.clone()));

        if let Err(e) = run_agent(shutdown).await {
            error!("{e:#}");
            signals.abort();
            std::process::exit(1);
        }

        match signals.await {
            Ok(true) => {}
            _ => break,
        }
    }
    info!("metricflow agent stopped");
}

async fn run_agent(shutdown: CancellationToken) -> anyhow::Result<()> {
    let config = build_config()?;
    info!(
        "Loaded inputs: {} / outputs: {}",
        config.input_names().join(" "),
        config.output_names().join(" ")
    );

    let agent = Agent::new(config)?;
    agent.connect().await?;
    info!(
        "Agent Config: Interval:{:?}, Hostname:{:?}, Flush Interval:{:?}",
        agent.config().interval,
        agent.config().hostname.as_deref().unwrap_or_default(),
        agent.config().flush_interval
    );
    agent.run(shutdown).await?;
    Ok(())
}

fn plugin_list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads `METRICFLOW_<KIND>_<NAME>_OPTIONS` as JSON plugin options.
fn plugin_options(kind: &str, name: &str) -> anyhow::Result<Value> {
    let key = format!(
        "METRICFLOW_{}_{}_OPTIONS",
        kind.to_uppercase(),
        name.to_uppercase()
    );
    match env::var(&key) {
        Ok(raw) => serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {key}")),
        Err(_) => Ok(Value::Null),
    }
}

fn build_config() -> anyhow::Result<Config> {
    let mut config = Config::from_env()?;

    if let Ok(tags) = env::var("METRICFLOW_TAGS") {
        for pair in tags.split(',').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("invalid tag {pair:?} in METRICFLOW_TAGS"))?;
            config
                .tags
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    for name in plugin_list("METRICFLOW_INPUTS", DEFAULT_INPUTS) {
        let options = plugin_options("input", &name)?;
        config.add_input(&name, InputConfig::new(name.as_str()), &options)?;
    }
    for name in plugin_list("METRICFLOW_OUTPUTS", DEFAULT_OUTPUTS) {
        let options = plugin_options("output", &name)?;
        config.add_output(&name, OutputConfig::new(name.as_str()), &options)?;
    }
    Ok(config)
}

/// Cancels `shutdown` on the first termination or reload signal. Returns true on reload.
async fn wait_for_signal(shutdown: CancellationToken) -> bool {
    let reload = next_signal().await;
    if reload {
        info!("Reloading metricflow config");
    } else {
        info!("Shutting down metricflow agent");
    }
    shutdown.cancel();
    reload
}

#[cfg(unix)]
async fn next_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut terminate), Ok(mut hangup)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) else {
        error!("Failed to install signal handlers, only Ctrl-C is handled");
        let _ = tokio::signal::ctrl_c().await;
        return false;
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => false,
        _ = terminate.recv() => false,
        _ = hangup.recv() => true,
    }
}

#[cfg(not(unix))]
async fn next_signal() -> bool {
    let _ = tokio::signal::ctrl_c().await;
    false
}
