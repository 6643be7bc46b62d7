// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The facade the embedding profiler drives: accumulate identity and
//! configuration through setters, arm with [`Crashtracker::start`], re-arm in
//! fork children with [`Crashtracker::atfork_child`], and bracket profiler
//! activities with the `*_start`/`*_stop` pairs so crash reports can say
//! what the profiler was doing.

use crate::collector::{begin_op, end_op, init, on_fork, ProfilingOp};
use crate::common::tag::Tag;
use crate::common::Endpoint;
use crate::crash_info::Metadata;
use crate::shared::configuration::{
    check_receiver_binary, ConfigError, CrashtrackerConfiguration, CrashtrackerReceiverConfig,
    StacktraceCollection,
};
use crate::shared::constants::DD_CRASHTRACK_DEFAULT_TIMEOUT;
use std::time::Duration;

/// Fixed identity of the reporting library, attached to every crash report.
pub const LIBRARY_NAME: &str = "dd-trace-rs";
/// Fixed language family of the reporting library.
pub const FAMILY: &str = "rust";

/// Process-wide crash tracking state: the session identity and handler
/// configuration accumulated before arming, and the entry points for the
/// profiler's activity notifications.
///
/// One instance per process, constructed at profiler initialization and kept
/// for the process lifetime.  Setters may be called at any time, but only
/// [`Crashtracker::start`] and [`Crashtracker::atfork_child`] publish a
/// snapshot to the armed handler: changes made after arming sit here,
/// inert, until the next arm.
#[derive(Debug, Clone)]
pub struct Crashtracker {
    create_alt_stack: bool,
    stderr_filename: Option<String>,
    stdout_filename: Option<String>,
    path_to_receiver_binary: String,
    resolve_frames: StacktraceCollection,
    timeout: Duration,

    env: String,
    service: String,
    version: String,
    runtime: String,
    runtime_version: String,
    library_version: String,
    url: String,
    runtime_id: String,
}

impl Default for Crashtracker {
    fn default() -> Self {
        Self {
            create_alt_stack: false,
            stderr_filename: None,
            stdout_filename: None,
            path_to_receiver_binary: String::new(),
            resolve_frames: StacktraceCollection::WithoutSymbols,
            timeout: DD_CRASHTRACK_DEFAULT_TIMEOUT,
            env: String::new(),
            service: String::new(),
            version: String::new(),
            runtime: String::new(),
            runtime_version: "0.0.0".to_string(),
            library_version: String::new(),
            url: String::new(),
            runtime_id: String::new(),
        }
    }
}

impl Crashtracker {
    pub fn new() -> Self {
        Self::default()
    }

    // Session identity.  Plain assignments; last write before an arm wins.

    pub fn set_env(&mut self, env: impl Into<String>) {
        self.env = env.into();
    }

    pub fn set_service(&mut self, service: impl Into<String>) {
        self.service = service.into();
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    pub fn set_runtime(&mut self, runtime: impl Into<String>) {
        self.runtime = runtime.into();
    }

    pub fn set_runtime_version(&mut self, runtime_version: impl Into<String>) {
        self.runtime_version = runtime_version.into();
    }

    pub fn set_library_version(&mut self, library_version: impl Into<String>) {
        self.library_version = library_version.into();
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn set_runtime_id(&mut self, runtime_id: impl Into<String>) {
        self.runtime_id = runtime_id.into();
    }

    // Handler configuration.

    pub fn set_create_alt_stack(&mut self, create_alt_stack: bool) {
        self.create_alt_stack = create_alt_stack;
    }

    /// An empty filename clears the redirection (receiver output goes to
    /// /dev/null).
    pub fn set_stderr_filename(&mut self, filename: impl Into<String>) {
        let filename = filename.into();
        self.stderr_filename = (!filename.is_empty()).then_some(filename);
    }

    pub fn set_stdout_filename(&mut self, filename: impl Into<String>) {
        let filename = filename.into();
        self.stdout_filename = (!filename.is_empty()).then_some(filename);
    }

    /// Accepts `path` as the receiver binary if it names an existing
    /// executable file; otherwise reports why and keeps the previously
    /// accepted path.
    pub fn set_receiver_binary_path(&mut self, path: impl Into<String>) -> Result<(), ConfigError> {
        let path = path.into();
        check_receiver_binary(&path)?;
        self.path_to_receiver_binary = path;
        Ok(())
    }

    pub fn set_resolve_frames(&mut self, resolve_frames: StacktraceCollection) {
        self.resolve_frames = resolve_frames;
    }

    pub fn set_timeout_secs(&mut self, timeout_secs: u64) {
        self.timeout = if timeout_secs == 0 {
            DD_CRASHTRACK_DEFAULT_TIMEOUT
        } else {
            Duration::from_secs(timeout_secs)
        };
    }

    // Profiler activity notifications.  These run on profiler hot paths and
    // inside holds of arbitrary runtime state, so they are fire-and-forget:
    // a bookkeeping error (unmatched stop, overflow) is a caller bug the
    // registry records but the profiler must not branch on.

    pub fn sampling_start(&self) {
        let _ = begin_op(ProfilingOp::Sampling);
    }

    pub fn sampling_stop(&self) {
        let _ = end_op(ProfilingOp::Sampling);
    }

    pub fn unwinding_start(&self) {
        let _ = begin_op(ProfilingOp::Unwinding);
    }

    pub fn unwinding_stop(&self) {
        let _ = end_op(ProfilingOp::Unwinding);
    }

    pub fn serializing_start(&self) {
        let _ = begin_op(ProfilingOp::Serializing);
    }

    pub fn serializing_stop(&self) {
        let _ = end_op(ProfilingOp::Serializing);
    }

    // Lifecycle.

    /// Arms crash tracking from the current state: builds the tag set,
    /// configuration, metadata and receiver-config snapshots, spawns the
    /// receiver, and registers the signal handlers.  On error the process
    /// simply runs without crash contextualization; nothing is torn down.
    ///
    /// Calling this again replaces the published snapshots and the receiver
    /// (superseding is best-effort; the old receiver exits on EOF).
    pub fn start(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.path_to_receiver_binary.is_empty(),
            "No receiver binary path was set"
        );
        init(
            self.build_config()?,
            self.build_receiver_config()?,
            self.build_metadata(),
        )
    }

    /// Re-arms crash tracking in a fork child.  Call exactly once per fork,
    /// before any other use of this type in the child: the inherited
    /// receiver belongs to the parent, and the inherited activity counters
    /// describe parent threads that do not exist here.
    pub fn atfork_child(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.path_to_receiver_binary.is_empty(),
            "No receiver binary path was set"
        );
        on_fork(
            self.build_config()?,
            self.build_receiver_config()?,
            self.build_metadata(),
        )
    }

    // Snapshot builders.  Value semantics: what these return is frozen at
    // the moment of the call, which is what makes post-arm setter calls
    // inert until the next arm.

    fn build_tags(&self) -> Vec<Tag> {
        let mut tags = Vec::new();
        let mut push = |key: &str, value: &str| {
            if !value.is_empty() {
                if let Ok(tag) = Tag::new(key, value) {
                    tags.push(tag);
                }
            }
        };
        push("service", &self.service);
        push("env", &self.env);
        push("version", &self.version);
        push("language", FAMILY);
        push("runtime", &self.runtime);
        push("runtime_version", &self.runtime_version);
        push("runtime-id", &self.runtime_id);
        push("library_version", &self.library_version);
        tags
    }

    pub(crate) fn build_config(&self) -> anyhow::Result<CrashtrackerConfiguration> {
        let endpoint = if self.url.is_empty() {
            None
        } else {
            Some(Endpoint::from_slice(&self.url)?)
        };
        CrashtrackerConfiguration::new(
            self.create_alt_stack,
            endpoint,
            self.resolve_frames,
            Some(self.timeout),
        )
    }

    pub(crate) fn build_receiver_config(&self) -> anyhow::Result<CrashtrackerReceiverConfig> {
        CrashtrackerReceiverConfig::new(
            vec![],
            vec![],
            self.path_to_receiver_binary.clone(),
            self.stderr_filename.clone(),
            self.stdout_filename.clone(),
        )
    }

    pub(crate) fn build_metadata(&self) -> Metadata {
        Metadata::new(
            LIBRARY_NAME.to_string(),
            self.library_version.clone(),
            FAMILY.to_string(),
            self.build_tags(),
        )
    }
}
