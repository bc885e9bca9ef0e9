// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide name to constructor tables for input and output plugins.
//!
//! The tables are created on first use with the built-in plugins already registered. Further
//! plugins can be added with [`register_input`] and [`register_output`] during startup.

use crate::errors::RegistryError;
use crate::plugin::{Input, Output};
use crate::plugins::{inputs, outputs};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{OnceLock, PoisonError, RwLock};
use tracing::debug;

pub type InputCreator = fn(&Value) -> anyhow::Result<Box<dyn Input>>;
pub type OutputCreator = fn(&Value) -> anyhow::Result<Box<dyn Output>>;

struct Registry {
    inputs: RwLock<BTreeMap<String, InputCreator>>,
    outputs: RwLock<BTreeMap<String, OutputCreator>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let inputs: BTreeMap<String, InputCreator> = BTreeMap::from([
            ("cpu".to_string(), inputs::cpu::create as InputCreator),
            ("mem".to_string(), inputs::mem::create as InputCreator),
        ]);
        let outputs: BTreeMap<String, OutputCreator> = BTreeMap::from([
            ("console".to_string(), outputs::console::create as OutputCreator),
            ("discard".to_string(), outputs::discard::create as OutputCreator),
            ("http".to_string(), outputs::http::create as OutputCreator),
        ]);
        Registry {
            inputs: RwLock::new(inputs),
            outputs: RwLock::new(outputs),
        }
    })
}

/// Registers an input constructor, replacing any previous one with the same name.
pub fn register_input(name: &str, creator: InputCreator) {
    debug!("Registering input {name}");
    registry()
        .inputs
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.to_string(), creator);
}

/// Registers an output constructor, replacing any previous one with the same name.
pub fn register_output(name: &str, creator: OutputCreator) {
    debug!("Registering output {name}");
    registry()
        .outputs
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.to_string(), creator);
}

#[must_use]
pub fn input_names() -> Vec<String> {
    registry()
        .inputs
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect()
}

#[must_use]
pub fn output_names() -> Vec<String> {
    registry()
        .outputs
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect()
}

pub fn create_input(name: &str, options: &Value) -> Result<Box<dyn Input>, RegistryError> {
    let creator = registry()
        .inputs
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .copied()
        .ok_or_else(|| RegistryError::Undefined {
            kind: "input",
            name: name.to_string(),
        })?;
    creator(options).map_err(|source| RegistryError::Creation {
        kind: "input",
        name: name.to_string(),
        source,
    })
}

pub fn create_output(name: &str, options: &Value) -> Result<Box<dyn Output>, RegistryError> {
    let creator = registry()
        .outputs
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .copied()
        .ok_or_else(|| RegistryError::Undefined {
            kind: "output",
            name: name.to_string(),
        })?;
    creator(options).map_err(|source| RegistryError::Creation {
        kind: "output",
        name: name.to_string(),
        source,
    })
}
