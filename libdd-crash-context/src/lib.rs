// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Crash context capture for the Rust profiler, based on catching fatal UNIX
//! signals and relaying what the profiler was doing to an out-of-process
//! receiver.
//!
//! Architecturally, there are two halves:
//! 1. An in-process signal handler, registered for the signals associated
//!    with a crash (SIGSEGV, SIGBUS).  The handler runs in a constrained
//!    environment where many ordinary operations are illegal
//!    (<https://man7.org/linux/man-pages/man7/signal-safety.7.html>); in
//!    particular, heap allocation and synchronization such as mutexes are
//!    potentially UB.  Everything the handler needs is therefore prepared
//!    when the tracker is armed: configuration and metadata are serialized
//!    up front and published through atomic pointers, the channel to the
//!    receiver is established up front, and the only state read live at
//!    crash time is a set of atomic counters describing the profiler's
//!    activities.  The handler writes the report down the channel, waits a
//!    bounded amount of time for the receiver to acknowledge by hanging up,
//!    and then chains to whatever signal disposition was installed before
//!    ours, preserving the host application's termination semantics.
//! 2. A receiver process, spawned when the tracker is armed, which sits on
//!    the other end of the channel.  It performs the work that is unsafe in
//!    signal context: parsing the report, resolving symbols, formatting,
//!    and uploading.  The receiver exits when the channel is closed without
//!    a report, so superseded receivers clean themselves up when the
//!    tracker is re-armed.
//!
//! Forking requires explicit handling: the child inherits the parent's
//! signal registration and configuration data, but not a usable receiver
//! (the channel leads to a process that belongs to the parent), and the
//! counters describe parent threads that do not exist in the child.
//! [`Crashtracker::atfork_child`] resets the counters and re-runs the arming
//! sequence to give the child its own receiver.
#![cfg(unix)]

mod collector;
mod common;
mod crash_info;
mod shared;
mod tracker;

pub use collector::{
    begin_op, disable, enable, end_op, init, on_fork, reset_counters, shutdown_crash_handler,
    snapshot, update_config, update_metadata, CounterError, CounterSnapshot, ProfilingOp,
};
pub use common::{tag::Tag, Endpoint};
pub use crash_info::{Metadata, SignalNames};
pub use shared::configuration::{
    ConfigError, CrashtrackerConfiguration, CrashtrackerReceiverConfig, StacktraceCollection,
};
pub use shared::constants::*;
pub use tracker::{Crashtracker, FAMILY, LIBRARY_NAME};
