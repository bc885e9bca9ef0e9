// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Number of metrics written to an output in one call.
pub const DEFAULT_METRIC_BATCH_SIZE: usize = 1000;

/// Number of metrics each output keeps for retries. Should be a multiple of the batch size.
pub const DEFAULT_METRIC_BUFFER_LIMIT: usize = 10_000;

pub const DEFAULT_GATHER_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PRECISION: Duration = Duration::from_nanos(1);

/// Capacity of the channel shared by every collector, and of the bridging queue.
pub const METRIC_CHANNEL_CAPACITY: usize = 100;

/// Delay before the single connection retry of an output.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(15);

/// Line protocol escape character. Tags and field keys ending with it are dropped.
pub const ESCAPE_CHAR: char = '\\';

pub const HOST_TAG: &str = "host";
