// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collection-and-delivery pipeline for a pluggable metrics agent.
//!
//! Inputs are gathered on independent schedules by [`collector::Collector`]s, turned into
//! validated [`metric::Metric`]s by the [`accumulator::Accumulator`], and fanned out by the
//! [`agent::Agent`] to one [`delivery::DeliveryUnit`] per output, which batches, writes and
//! retries them in arrival order.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod agent;
pub mod buffer;
pub mod collector;
pub mod config;
pub mod constants;
pub mod delivery;
pub mod errors;
pub mod filter;
pub mod hostname;
pub mod metric;
pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod serializer;
