// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::common::timeout::TimeoutManager;
use crate::common::unix_utils::{reap_child_non_blocking, wait_for_pollhup};
use crate::shared::configuration::CrashtrackerReceiverConfig;
use anyhow::Context;
use nix::sys::socket;
use nix::sys::time::TimeVal;
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::process::{Child, Command, Stdio};

/// A live receiver process and the pre-established channel to it.
///
/// The channel is created when the tracker is armed, in normal (non-signal)
/// context, so that at crash time the handler only has to write into an
/// already-open socket.  Dropping a `Receiver` closes our end of the channel;
/// the receiver's contract is to exit when it sees EOF without a report, so
/// superseded receivers clean themselves up without being signalled.
pub(crate) struct Receiver {
    child: Child,
    stream: UnixStream,
}

impl Receiver {
    /// Spawns the receiver binary with the child end of a fresh socketpair as
    /// its stdin, and writes the serialized tracker configuration as the
    /// first line on the channel so the receiver knows the endpoint and
    /// processing options without them appearing on its command line.
    pub(crate) fn spawn(
        config: &CrashtrackerReceiverConfig,
        config_json: &str,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let (ours, theirs) = socket::socketpair(
            socket::AddressFamily::Unix,
            socket::SockType::Stream,
            None,
            socket::SockFlag::empty(),
        )
        .context("Failed to create Unix domain socket pair")?;
        let stream = UnixStream::from(ours);

        // Bound crash-time writes: if the receiver stalls and the socket
        // buffer fills, the handler must still make the overall deadline
        // rather than block in write(2).
        let send_timeout = TimeVal::new(
            timeout.as_secs().min(i64::MAX as u64) as _,
            timeout.subsec_micros() as _,
        );
        socket::setsockopt(&stream, socket::sockopt::SendTimeout, &send_timeout)
            .context("Failed to set send timeout on receiver channel")?;

        let child = Command::new(&config.path_to_receiver_binary)
            .args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::from(theirs))
            .stdout(output_stdio(config.stdout_filename.as_deref())?)
            .stderr(output_stdio(config.stderr_filename.as_deref())?)
            .spawn()
            .with_context(|| {
                format!(
                    "Unable to start receiver process: {}",
                    &config.path_to_receiver_binary
                )
            })?;

        writeln!(&stream, "{config_json}").context("Failed to send receiver configuration")?;

        Ok(Self { child, stream })
    }

    pub(crate) fn stream(&self) -> &UnixStream {
        &self.stream
    }

    /// Crash-time wrap-up: wait (bounded) for the receiver to acknowledge
    /// the report by hanging up, then reap it if it already exited.  The
    /// receiver is deliberately not killed on timeout — the process is dying
    /// anyway, and a slow receiver may still manage to deliver the report.
    pub(crate) fn finish(&self, timeout_manager: &TimeoutManager) {
        let _ = wait_for_pollhup(self.stream.as_raw_fd(), timeout_manager);
        let _ = reap_child_non_blocking(Pid::from_raw(self.child.id() as i32), timeout_manager);
    }

    /// Graceful teardown for explicit shutdown paths.
    pub(crate) fn shutdown(mut self) -> anyhow::Result<()> {
        self.child.kill().context("Failed to kill receiver")?;
        self.child.wait().context("Failed to reap receiver")?;
        Ok(())
    }
}

/// Opens `filename` for appending (creating it if needed), or returns a null
/// stdio.  Append mode keeps output from successive receiver generations
/// (e.g. across forks) in one file instead of truncating.
fn output_stdio(filename: Option<&str>) -> anyhow::Result<Stdio> {
    match filename {
        Some(f) => {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(f)
                .with_context(|| format!("Failed to open receiver output file {f}"))?;
            Ok(Stdio::from(file))
        }
        None => Ok(Stdio::null()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::configuration::{CrashtrackerConfiguration, StacktraceCollection};
    use std::time::Duration;

    fn receiver_config(binary: &str, args: Vec<String>) -> CrashtrackerReceiverConfig {
        CrashtrackerReceiverConfig::new(args, vec![], binary.to_string(), None, None).unwrap()
    }

    fn config_json() -> String {
        let config = CrashtrackerConfiguration::new(
            false,
            None,
            StacktraceCollection::WithoutSymbols,
            Some(Duration::from_secs(1)),
        )
        .unwrap();
        serde_json::to_string(&config).unwrap()
    }

    #[test]
    fn test_spawn_missing_binary_fails() {
        let config = receiver_config("/no/such/receiver/binary", vec![]);
        let result = Receiver::spawn(&config, &config_json(), Duration::from_secs(1));
        assert!(result.is_err());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_receiver_acknowledges_on_eof() {
        // `cat` consumes the channel and exits when we close our end, which
        // is exactly the acknowledgment protocol (and how superseded
        // receivers terminate when the tracker is re-armed).
        let config = receiver_config("/bin/cat", vec![]);
        let receiver = Receiver::spawn(&config, &config_json(), Duration::from_secs(5)).unwrap();

        writeln!(receiver.stream(), "hello receiver").unwrap();

        let Receiver { mut child, stream } = receiver;
        drop(stream);
        let status = child.wait().unwrap();
        assert!(status.success());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_finish_times_out_against_silent_receiver() {
        // `sleep` never reads and never hangs up; finish() must come back
        // once the deadline passes instead of hanging.
        let config = receiver_config("/bin/sleep", vec!["30".to_string()]);
        let receiver = Receiver::spawn(&config, &config_json(), Duration::from_millis(300))
            .unwrap();

        let manager = TimeoutManager::new(Duration::from_millis(300));
        receiver.finish(&manager);
        assert!(manager.elapsed() < Duration::from_secs(5));

        receiver.shutdown().unwrap();
    }
}
