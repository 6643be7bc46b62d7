// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Constants for the stream protocol between the crash handler and the
//! receiver process.
//!
//! The crash report is written as delimited sections so the receiver can
//! parse it incrementally: each section is bracketed by a BEGIN/END marker
//! line, and the final [`DD_CRASHTRACK_DONE`] line tells the receiver that
//! the whole report arrived (anything less means the handler died partway
//! through and the report should be flagged incomplete).

use std::time::Duration;

/// Marks the metadata section: one line of JSON-serialized [`crate::Metadata`].
pub const DD_CRASHTRACK_BEGIN_METADATA: &str = "DD_CRASHTRACK_BEGIN_METADATA";
pub const DD_CRASHTRACK_END_METADATA: &str = "DD_CRASHTRACK_END_METADATA";

/// Marks the configuration section: one line of JSON-serialized
/// [`crate::CrashtrackerConfiguration`], carrying the endpoint and
/// processing options the receiver needs.
pub const DD_CRASHTRACK_BEGIN_CONFIG: &str = "DD_CRASHTRACK_BEGIN_CONFIG";
pub const DD_CRASHTRACK_END_CONFIG: &str = "DD_CRASHTRACK_END_CONFIG";

/// Marks the signal information section: JSON with the signal number, its
/// name, and the faulting address when the signal provides one.
pub const DD_CRASHTRACK_BEGIN_SIGINFO: &str = "DD_CRASHTRACK_BEGIN_SIGINFO";
pub const DD_CRASHTRACK_END_SIGINFO: &str = "DD_CRASHTRACK_END_SIGINFO";

/// Marks the process information section: JSON with the crashing PID.
pub const DD_CRASHTRACK_BEGIN_PROCINFO: &str = "DD_CRASHTRACK_BEGIN_PROCESSINFO";
pub const DD_CRASHTRACK_END_PROCINFO: &str = "DD_CRASHTRACK_END_PROCESSINFO";

/// Marks the profiler activity counters section, one JSON object per line.
pub const DD_CRASHTRACK_BEGIN_COUNTERS: &str = "DD_CRASHTRACK_BEGIN_COUNTERS";
pub const DD_CRASHTRACK_END_COUNTERS: &str = "DD_CRASHTRACK_END_COUNTERS";

/// Marks an embedded text file section (e.g. `/proc/self/maps` on Linux,
/// which the receiver cannot read itself for permissions reasons).
pub const DD_CRASHTRACK_BEGIN_FILE: &str = "DD_CRASHTRACK_BEGIN_FILE";
pub const DD_CRASHTRACK_END_FILE: &str = "DD_CRASHTRACK_END_FILE";

/// Marks the stack trace section: one frame per line, with addresses and,
/// depending on the resolution mode, symbol information.
pub const DD_CRASHTRACK_BEGIN_STACKTRACE: &str = "DD_CRASHTRACK_BEGIN_STACKTRACE";
pub const DD_CRASHTRACK_END_STACKTRACE: &str = "DD_CRASHTRACK_END_STACKTRACE";

/// Final marker: the entire report has been transmitted.
pub const DD_CRASHTRACK_DONE: &str = "DD_CRASHTRACK_DONE";

/// Default bound on the crash-time wait for the receiver's acknowledgment.
pub const DD_CRASHTRACK_DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
