// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use libc::{nfds_t, poll, pollfd, POLLHUP};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::os::fd::RawFd;

use crate::common::timeout::TimeoutManager;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum PollError {
    #[error("poll failed with errno: {0}")]
    PollError(i32),
    #[error("poll returned unexpected result: revents = {0}")]
    UnexpectedResult(i16),
}

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum ReapError {
    #[error("timeout waiting for child process to exit")]
    Timeout,
    #[error("error waiting for child process to exit: {0}")]
    WaitError(#[from] nix::Error),
}

/// Waits for the peer on `target_fd` to hang up, bounded by the deadline.
/// Returns `Ok(true)` on hangup, `Ok(false)` on timeout.
///
/// This is how the receiver acknowledges a crash report: it reads until the
/// final marker, finishes its work, and exits, which closes its end of the
/// socket.  Uses the libc interface to `poll` directly; the `nix` wrapper
/// has ownership semantics that can panic, which must not happen on the
/// crash path.
pub fn wait_for_pollhup(
    target_fd: RawFd,
    timeout_manager: &TimeoutManager,
) -> Result<bool, PollError> {
    let mut poll_fds = [pollfd {
        fd: target_fd,
        events: POLLHUP,
        revents: 0,
    }];

    loop {
        let timeout_ms = timeout_manager
            .remaining()
            .as_millis()
            .min(i32::MAX as u128) as i32;
        let poll_result =
            // SAFETY: the pollfd array outlives the call and its length matches.
            unsafe { poll(poll_fds.as_mut_ptr(), poll_fds.len() as nfds_t, timeout_ms) };
        match poll_result {
            -1 => match nix::Error::last_raw() {
                libc::EAGAIN | libc::EINTR => continue,
                errno => return Err(PollError::PollError(errno)),
            },
            0 => return Ok(false), // Timeout occurred
            _ => {
                let revents = poll_fds[0].revents;
                if revents & POLLHUP != 0 {
                    return Ok(true);
                } else {
                    return Err(PollError::UnexpectedResult(revents));
                }
            }
        }
    }
}

/// Non-blocking child reaper:
/// * if the child has exited, returns `Ok(true)`
/// * if the child cannot be found, returns `Ok(false)`
/// * if the child outlives the deadline, returns `Err(Timeout)`
// Note: some resources claim `waitpid` is unsafe in a signal handler,
// especially on macos.  POSIX characterizes it as async-signal safe, and it
// behaves as such in practice.
pub fn reap_child_non_blocking(
    pid: Pid,
    timeout_manager: &TimeoutManager,
) -> Result<bool, ReapError> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                if timeout_manager.elapsed() > timeout_manager.timeout() {
                    return Err(ReapError::Timeout);
                }
            }
            Ok(_status) => return Ok(true),
            Err(nix::Error::ECHILD) => {
                // Someone else reaped it, or it never existed.  Either way
                // there is nothing left for us to do.
                return Ok(false);
            }
            Err(e) => return Err(ReapError::WaitError(e)),
        }
    }
}

/// Kills the program without raising an abort or calling at_exit.
pub fn terminate() -> ! {
    // SAFETY: no preconditions.
    unsafe { libc::_exit(libc::EXIT_FAILURE) }
}
