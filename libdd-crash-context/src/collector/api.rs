// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::collector::counters::reset_counters;
use crate::collector::crash_handler::{
    shutdown_receiver, update_config, update_metadata, update_receiver,
};
use crate::collector::signal_handler_manager::{register_crash_handlers, restore_old_handlers};
use crate::crash_info::Metadata;
use crate::shared::configuration::{CrashtrackerConfiguration, CrashtrackerReceiverConfig};

/// Arms the crash-tracking infrastructure: publishes the configuration and
/// metadata snapshots, spawns the receiver (superseding any previous one),
/// and registers the signal handlers.
///
/// Calling this again re-runs the whole sequence with fresh snapshots; the
/// existing signal registration is kept (registration is idempotent).
///
/// PRECONDITIONS:
///     None.
/// SAFETY:
///     Crash-tracking functions are not reentrant.
///     No other crash-handler functions should be called concurrently.
/// ATOMICITY:
///     This function is not atomic. A crash during its execution may lead to
///     unexpected crash-handling behaviour.
pub fn init(
    config: CrashtrackerConfiguration,
    receiver_config: CrashtrackerReceiverConfig,
    metadata: Metadata,
) -> anyhow::Result<()> {
    // Set up the receiver first, so that a crash detected from here on has
    // somewhere to go.
    update_metadata(metadata)?;
    update_config(config.clone())?;
    update_receiver(&receiver_config)?;
    register_crash_handlers(&config)?;
    Ok(())
}

/// Reinitializes the crash-tracking infrastructure after a fork.
/// This should be one of the first things done in the child, to minimize the
/// chance that a crash occurs between the fork and this call.
/// In particular, resets the counters that track the profiler state machine
/// (the child's threads are idle no matter what the parent was doing), and
/// starts a new receiver for this process: the channel inherited from the
/// parent leads to the parent's receiver and must not be used or killed from
/// here.
///
/// The signal handlers and altstack survive the fork
/// (<https://man7.org/linux/man-pages/man2/sigaction.2.html>,
/// <https://man7.org/linux/man-pages/man2/sigaltstack.2.html>), so
/// re-registration is a guarded no-op.
///
/// PRECONDITIONS:
///     This function assumes that the crash-tracker has previously been
///     initialized.
/// SAFETY:
///     Crash-tracking functions are not reentrant.
///     No other crash-handler functions should be called concurrently.
/// ATOMICITY:
///     This function is not atomic. A crash during its execution may lead to
///     unexpected crash-handling behaviour.
pub fn on_fork(
    config: CrashtrackerConfiguration,
    receiver_config: CrashtrackerReceiverConfig,
    metadata: Metadata,
) -> anyhow::Result<()> {
    reset_counters()?;
    update_metadata(metadata)?;
    update_config(config.clone())?;
    update_receiver(&receiver_config)?;
    register_crash_handlers(&config)?;
    Ok(())
}

/// Cleans up after the crash-tracker:
/// restores the previous signal handlers and shuts down the receiver.  Use
/// of this function is optional: the receiver shuts down on its own when the
/// channel closes at process exit.
///
/// PRECONDITIONS:
///     This function assumes that the crash-tracker has previously been
///     initialized.
/// SAFETY:
///     Crash-tracking functions are not reentrant.
///     No other crash-handler functions should be called concurrently.
/// ATOMICITY:
///     This function is not atomic. A crash during its execution may lead to
///     unexpected crash-handling behaviour.
pub fn shutdown_crash_handler() -> anyhow::Result<()> {
    restore_old_handlers(false)?;
    shutdown_receiver()?;
    Ok(())
}

// These tests fork and inspect linux process state, so they only run there.
#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::collector::counters::{begin_op, snapshot, ProfilingOp};
    use crate::shared::configuration::StacktraceCollection;
    use std::time::Duration;

    fn test_config(create_alt_stack: bool) -> CrashtrackerConfiguration {
        CrashtrackerConfiguration::new(
            create_alt_stack,
            None,
            StacktraceCollection::WithoutSymbols,
            Some(Duration::from_secs(2)),
        )
        .unwrap()
    }

    fn test_receiver_config() -> CrashtrackerReceiverConfig {
        // `cat` stands in for the receiver: it drains the channel and exits
        // on EOF, which matches the receiver's contract.
        CrashtrackerReceiverConfig::new(vec![], vec![], "/bin/cat".to_string(), None, None)
            .unwrap()
    }

    fn test_metadata() -> Metadata {
        Metadata::new(
            "dd-trace-rs".to_string(),
            "1.0.0".to_string(),
            "rust".to_string(),
            vec![],
        )
    }

    fn get_sigaltstack() -> Option<libc::stack_t> {
        let mut sigaltstack = libc::stack_t {
            ss_sp: std::ptr::null_mut(),
            ss_flags: 0,
            ss_size: 0,
        };
        let res = unsafe { libc::sigaltstack(std::ptr::null(), &mut sigaltstack) };
        if res == 0 {
            Some(sigaltstack)
        } else {
            None
        }
    }

    // This test initializes crash tracking in a fork so that the signal
    // dispositions and altstack of the test runner itself are never touched.
    // The child checks every observable effect of arming and re-arming and
    // reports through an atypical exit status, so only the intended exit
    // path can pass.
    #[cfg_attr(miri, ignore)]
    #[test]
    fn test_arm_and_refork_in_child() -> anyhow::Result<()> {
        match unsafe { libc::fork() } {
            -1 => panic!("Failed to fork"),
            0 => {
                // Child process
                let initial_sigaltstack = get_sigaltstack();
                assert!(
                    initial_sigaltstack.is_some(),
                    "Failed to get initial sigaltstack"
                );

                // Pretend the parent was mid-sample at fork time.
                begin_op(ProfilingOp::Sampling).unwrap();
                begin_op(ProfilingOp::Unwinding).unwrap();

                // Initialize crash tracking.  This will
                // - create a new altstack
                // - set the SIGBUS/SIGSEGV handlers with SA_ONSTACK
                init(test_config(true), test_receiver_config(), test_metadata())?;

                // The altstack must have changed.
                let after_init_sigaltstack = get_sigaltstack();
                if initial_sigaltstack == after_init_sigaltstack {
                    eprintln!("Initial sigaltstack: {initial_sigaltstack:?}");
                    std::process::exit(-5);
                }

                // Check the SIGBUS and SIGSEGV handlers are set with SA_ONSTACK
                let mut sigaction = libc::sigaction {
                    sa_sigaction: 0,
                    sa_mask: unsafe { std::mem::zeroed::<libc::sigset_t>() },
                    sa_flags: 0,
                    sa_restorer: None,
                };
                for signum in [libc::SIGBUS, libc::SIGSEGV] {
                    let res =
                        unsafe { libc::sigaction(signum, std::ptr::null(), &mut sigaction) };
                    if res != 0 {
                        eprintln!("Failed to get handler for {signum}");
                        std::process::exit(-6);
                    }
                    if sigaction.sa_flags & libc::SA_ONSTACK != libc::SA_ONSTACK {
                        eprintln!("Expected handler for {signum} to have SA_ONSTACK");
                        std::process::exit(-7);
                    }
                }

                // Re-arming as a fork child resets the counters no matter
                // what was in flight before.
                on_fork(test_config(true), test_receiver_config(), test_metadata())?;
                let counters = snapshot();
                if counters != Default::default() {
                    eprintln!("Expected zeroed counters, got {counters:?}");
                    std::process::exit(-8);
                }

                // Graceful teardown still works.
                if shutdown_crash_handler().is_err() {
                    std::process::exit(-9);
                }

                std::process::exit(42);
            }
            pid => {
                // Parent process
                let mut status = 0;
                let _ = unsafe { libc::waitpid(pid, &mut status, 0) };

                // `status` is not the exit code, gotta unwrap some layers
                if libc::WIFEXITED(status) {
                    let exit_code = libc::WEXITSTATUS(status);
                    assert_eq!(exit_code, 42, "Child process exited with unexpected status");
                } else {
                    panic!("Child process did not exit normally");
                }
            }
        }
        Ok(())
    }
}
