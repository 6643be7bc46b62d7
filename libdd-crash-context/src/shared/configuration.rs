// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::common::Endpoint;
use crate::shared::constants;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stacktrace collection occurs in the context of a crashing process.
/// If the stack is sufficiently corrupted, it is possible (but unlikely)
/// for stack trace collection itself to crash.  We recommend fully enabling
/// stacktrace collection, but having an environment variable to allow
/// downgrading the collector.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StacktraceCollection {
    Disabled,
    /// Raw addresses only; the receiver (or backend) resolves them later.
    WithoutSymbols,
    /// Resolves symbols inside the crashing process.  Yields the most
    /// detail, but symbol resolution is not guaranteed signal-safe and can
    /// itself crash.
    EnabledWithInprocessSymbols,
    EnabledWithSymbolsInReceiver,
}

/// Validation failures for the receiver binary path.  A rejected path leaves
/// the previously accepted configuration untouched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("receiver binary path is empty")]
    EmptyReceiverPath,
    #[error("receiver binary does not exist: {0}")]
    ReceiverBinaryMissing(String),
    #[error("receiver binary is not a regular file: {0}")]
    ReceiverBinaryNotAFile(String),
    #[error("receiver binary is not executable: {0}")]
    ReceiverBinaryNotExecutable(String),
}

/// Checks that `path` names an existing, executable regular file.
pub(crate) fn check_receiver_binary(path: &str) -> Result<(), ConfigError> {
    if path.is_empty() {
        return Err(ConfigError::EmptyReceiverPath);
    }
    let metadata = std::fs::metadata(path)
        .map_err(|_| ConfigError::ReceiverBinaryMissing(path.to_string()))?;
    if !metadata.is_file() {
        return Err(ConfigError::ReceiverBinaryNotAFile(path.to_string()));
    }
    nix::unistd::access(path, nix::unistd::AccessFlags::X_OK)
        .map_err(|_| ConfigError::ReceiverBinaryNotExecutable(path.to_string()))
}

/// The configuration snapshot handed to the signal handler when the tracker
/// is armed.  Serialized into the report so the receiver learns the endpoint
/// and processing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashtrackerConfiguration {
    create_alt_stack: bool,
    endpoint: Option<Endpoint>,
    resolve_frames: StacktraceCollection,
    timeout: Duration,
}

impl CrashtrackerConfiguration {
    pub fn new(
        create_alt_stack: bool,
        endpoint: Option<Endpoint>,
        resolve_frames: StacktraceCollection,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let timeout = match timeout {
            Some(t) if !t.is_zero() => t,
            _ => constants::DD_CRASHTRACK_DEFAULT_TIMEOUT,
        };
        Ok(Self {
            create_alt_stack,
            endpoint,
            resolve_frames,
            timeout,
        })
    }

    pub fn create_alt_stack(&self) -> bool {
        self.create_alt_stack
    }

    pub fn endpoint(&self) -> &Option<Endpoint> {
        &self.endpoint
    }

    pub fn resolve_frames(&self) -> StacktraceCollection {
        self.resolve_frames
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// How to spawn the receiver process: the binary, its arguments and extra
/// environment, and where to point its standard streams (the supported way
/// to diagnose the receiver itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CrashtrackerReceiverConfig {
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub path_to_receiver_binary: String,
    pub stderr_filename: Option<String>,
    pub stdout_filename: Option<String>,
}

impl CrashtrackerReceiverConfig {
    pub fn new(
        args: Vec<String>,
        env: Vec<(String, String)>,
        path_to_receiver_binary: String,
        stderr_filename: Option<String>,
        stdout_filename: Option<String>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            stderr_filename.is_none() && stdout_filename.is_none()
                || stderr_filename != stdout_filename,
            "Can't give the same filename for stderr ({stderr_filename:?})
        and stdout ({stdout_filename:?}), they will conflict with each other"
        );

        Ok(Self {
            args,
            env,
            path_to_receiver_binary,
            stderr_filename,
            stdout_filename,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_receiver_config_new() -> anyhow::Result<()> {
        let args = vec!["foo".to_string()];
        let env = vec![
            ("bar".to_string(), "baz".to_string()),
            ("apple".to_string(), "banana".to_string()),
        ];
        let path_to_receiver_binary = "/tmp/crash-context-receiver-binary".to_string();

        let config = CrashtrackerReceiverConfig::new(
            args.clone(),
            env.clone(),
            path_to_receiver_binary.clone(),
            None,
            Some("/tmp/stdout.txt".to_string()),
        )?;
        assert_eq!(config.args, args);
        assert_eq!(config.env, env);
        assert_eq!(config.path_to_receiver_binary, path_to_receiver_binary);
        assert_eq!(config.stderr_filename, None);
        assert_eq!(config.stdout_filename, Some("/tmp/stdout.txt".to_string()));

        // Distinct filenames are fine; a shared one is rejected.
        CrashtrackerReceiverConfig::new(
            args.clone(),
            env.clone(),
            path_to_receiver_binary.clone(),
            Some("/tmp/stderr.txt".to_string()),
            Some("/tmp/stdout.txt".to_string()),
        )?;
        CrashtrackerReceiverConfig::new(
            args,
            env,
            path_to_receiver_binary,
            Some("/tmp/shared.txt".to_string()),
            Some("/tmp/shared.txt".to_string()),
        )
        .unwrap_err();
        Ok(())
    }

    #[test]
    fn test_configuration_timeout_default() -> anyhow::Result<()> {
        let config = CrashtrackerConfiguration::new(
            false,
            None,
            StacktraceCollection::WithoutSymbols,
            None,
        )?;
        assert_eq!(config.timeout(), constants::DD_CRASHTRACK_DEFAULT_TIMEOUT);

        // An explicit zero also falls back to the default.
        let config = CrashtrackerConfiguration::new(
            false,
            None,
            StacktraceCollection::WithoutSymbols,
            Some(Duration::ZERO),
        )?;
        assert_eq!(config.timeout(), constants::DD_CRASHTRACK_DEFAULT_TIMEOUT);

        let config = CrashtrackerConfiguration::new(
            true,
            None,
            StacktraceCollection::WithoutSymbols,
            Some(Duration::from_secs(30)),
        )?;
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.create_alt_stack());
        Ok(())
    }

    #[test]
    fn test_check_receiver_binary() {
        assert!(matches!(
            check_receiver_binary(""),
            Err(ConfigError::EmptyReceiverPath)
        ));
        assert!(matches!(
            check_receiver_binary("/no/such/binary/exists/here"),
            Err(ConfigError::ReceiverBinaryMissing(_))
        ));

        // A directory is not a usable receiver.
        assert!(matches!(
            check_receiver_binary("/tmp"),
            Err(ConfigError::ReceiverBinaryNotAFile(_))
        ));

        // A plain file without the executable bit is rejected.
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("not-executable");
        std::fs::File::create(&plain)
            .unwrap()
            .write_all(b"#!/bin/sh\n")
            .unwrap();
        assert!(matches!(
            check_receiver_binary(plain.to_str().unwrap()),
            Err(ConfigError::ReceiverBinaryNotExecutable(_))
        ));

        let exec = dir.path().join("receiver");
        std::fs::File::create(&exec)
            .unwrap()
            .write_all(b"#!/bin/sh\nexit 0\n")
            .unwrap();
        std::fs::set_permissions(&exec, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(check_receiver_binary(exec.to_str().unwrap()).is_ok());
    }
}
