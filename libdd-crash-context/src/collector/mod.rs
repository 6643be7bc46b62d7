// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod api;
mod counters;
mod crash_handler;
mod emitters;
mod receiver_manager;
mod signal_handler_manager;

pub use api::*;
pub use counters::{
    begin_op, end_op, reset_counters, snapshot, CounterError, CounterSnapshot, ProfilingOp,
};
pub use crash_handler::{disable, enable, update_config, update_metadata};
