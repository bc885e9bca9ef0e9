// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Built-in plugins, registered by name in [`crate::registry`].

pub mod inputs;
pub mod outputs;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decodes plugin options, treating `null` as "all defaults".
pub(crate) fn decode_options<T: DeserializeOwned + Default>(options: &Value) -> anyhow::Result<T> {
    if options.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(options.clone())?)
}
