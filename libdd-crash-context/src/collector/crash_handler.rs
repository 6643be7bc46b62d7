// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::emitters::emit_crashreport;
use super::receiver_manager::Receiver;
use super::signal_handler_manager::chain_signal_handler;
use crate::common::timeout::TimeoutManager;
use crate::crash_info::Metadata;
use crate::shared::configuration::{CrashtrackerConfiguration, CrashtrackerReceiverConfig};
use libc::{c_void, siginfo_t};
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64};

// Note that this file makes use of the following async-signal safe functions
// in a signal handler.
// <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
// - clock_gettime
// - getpid
// - kill
// - poll
// - raise
// - read
// - sigaction
// - write

// These represent data used by the crash handler.
// Using mutexes inside a signal handler is not allowed, so use `AtomicPtr`
// instead to get atomicity.
// These should always be either: null_mut, or `Box::into_raw()`.
// This means that we can always clean up the memory inside one of these
// using `Box::from_raw` to recreate the box, then dropping it.
static METADATA: AtomicPtr<(Metadata, String)> = AtomicPtr::new(ptr::null_mut());
static CONFIG: AtomicPtr<(CrashtrackerConfiguration, String)> = AtomicPtr::new(ptr::null_mut());
static RECEIVER: AtomicPtr<Receiver> = AtomicPtr::new(ptr::null_mut());

/// Updates the metadata for this process.
/// Metadata is stored in a global variable and sent to the receiver when a
/// crash occurs.  It is serialized here, in normal context, so the signal
/// handler only ever touches a prebuilt string.
///
/// PRECONDITIONS:
///     None
/// SAFETY:
///     Crash-tracking functions are not guaranteed to be reentrant.
///     No other crash-handler functions should be called concurrently.
/// ATOMICITY:
///     This function uses a swap on an atomic pointer.
pub fn update_metadata(metadata: Metadata) -> anyhow::Result<()> {
    let metadata_string = serde_json::to_string(&metadata)?;
    let box_ptr = Box::into_raw(Box::new((metadata, metadata_string)));
    let old = METADATA.swap(box_ptr, SeqCst);
    if !old.is_null() {
        // SAFETY: This can only come from a box above.
        unsafe {
            std::mem::drop(Box::from_raw(old));
        }
    }
    Ok(())
}

/// Updates the configuration snapshot for this process.
/// Config is stored in a global variable and sent to the receiver when a
/// crash occurs.
///
/// PRECONDITIONS:
///     None
/// SAFETY:
///     Crash-tracking functions are not guaranteed to be reentrant.
///     No other crash-handler functions should be called concurrently.
/// ATOMICITY:
///     This function uses a swap on an atomic pointer.
pub fn update_config(config: CrashtrackerConfiguration) -> anyhow::Result<()> {
    let config_string = serde_json::to_string(&config)?;
    let box_ptr = Box::into_raw(Box::new((config, config_string)));
    let old = CONFIG.swap(box_ptr, SeqCst);
    if !old.is_null() {
        // SAFETY: This can only come from a box above.
        unsafe {
            std::mem::drop(Box::from_raw(old));
        }
    }
    Ok(())
}

/// Spawns a fresh receiver from `receiver_config` and installs it as the
/// process's crash report destination, superseding any previous receiver.
/// The superseded receiver's channel is closed by the drop; by contract it
/// exits when it reads EOF, so teardown is best-effort by design (after a
/// fork the "previous receiver" belongs to the parent and must not be
/// killed from the child).
///
/// PRECONDITIONS:
///     `update_config` must have been called first (the receiver is handed
///     the serialized configuration at spawn time).
/// SAFETY:
///     Crash-tracking functions are not guaranteed to be reentrant.
///     No other crash-handler functions should be called concurrently.
/// ATOMICITY:
///     This function uses a swap on an atomic pointer.
pub(crate) fn update_receiver(receiver_config: &CrashtrackerReceiverConfig) -> anyhow::Result<()> {
    let config_ptr = CONFIG.load(SeqCst);
    anyhow::ensure!(!config_ptr.is_null(), "No crashtracking config");
    // SAFETY: non-null values in CONFIG are always valid leaked boxes.
    let (config, config_str) = unsafe { &*config_ptr };

    let new_receiver = Receiver::spawn(receiver_config, config_str, config.timeout())?;
    let old = RECEIVER.swap(Box::into_raw(Box::new(new_receiver)), SeqCst);
    if !old.is_null() {
        // SAFETY: This can only come from a box above.
        unsafe {
            std::mem::drop(Box::from_raw(old));
        }
    }
    Ok(())
}

/// Kills and reaps the current receiver, if any.
pub(crate) fn shutdown_receiver() -> anyhow::Result<()> {
    let old = RECEIVER.swap(ptr::null_mut(), SeqCst);
    anyhow::ensure!(!old.is_null(), "No crashtracking receiver");
    // SAFETY: This can only come from a box in `update_receiver`.
    let receiver = unsafe { Box::from_raw(old) };
    receiver.shutdown()
}

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Disables crash reporting.
/// This does not restore the old signal handlers; it turns the handler into
/// a no-op that chains straight to them, so handlers registered after ours
/// keep working.
///
/// # Atomicity
///   Atomic and idempotent.  Calling it multiple times is allowed.
pub fn disable() {
    ENABLED.store(false, SeqCst);
}

/// Re-enables crash reporting after [`disable`].
/// If the tracker was never armed, this has no effect.
///
/// # Atomicity
///   Atomic and idempotent.  Calling it multiple times is allowed.
pub fn enable() {
    ENABLED.store(true, SeqCst);
}

pub(crate) extern "C" fn handle_posix_sigaction(
    signum: i32,
    sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    // Handle the signal.  Note this has a guard to ensure that we only
    // generate one crash report per process.
    let _ = handle_posix_signal_impl(signum, sig_info);
    // SAFETY: No preconditions.
    unsafe { chain_signal_handler(signum, sig_info, ucontext) };
}

fn handle_posix_signal_impl(signum: i32, sig_info: *const siginfo_t) -> anyhow::Result<()> {
    if !ENABLED.load(SeqCst) {
        return Ok(());
    }

    // If this code hits a stack overflow, it segfaults again; the one-time
    // guard below keeps that from looping.

    // One-time guard to guarantee at most one crash report per process.
    static NUM_TIMES_CALLED: AtomicU64 = AtomicU64::new(0);
    if NUM_TIMES_CALLED.fetch_add(1, SeqCst) > 0 {
        // In the case where some lower-level signal handler recovered the
        // error, we don't want to spam the system with reports.
        return Ok(());
    }

    // Leak config, metadata and receiver to avoid calling `drop` during a
    // crash.  These swaps also clear the global state: past the one-time
    // guard, the handler owns all of it exclusively.
    let config_ptr = CONFIG.swap(ptr::null_mut(), SeqCst);
    anyhow::ensure!(!config_ptr.is_null(), "No crashtracking config");
    // SAFETY: non-null values are valid leaked boxes; see above.
    let (config, config_str) = unsafe { &*config_ptr };

    let metadata_ptr = METADATA.swap(ptr::null_mut(), SeqCst);
    anyhow::ensure!(!metadata_ptr.is_null(), "No crashtracking metadata");
    // SAFETY: as above.
    let (_metadata, metadata_string) = unsafe { &*metadata_ptr };

    let receiver_ptr = RECEIVER.swap(ptr::null_mut(), SeqCst);
    anyhow::ensure!(!receiver_ptr.is_null(), "No crashtracking receiver");
    // SAFETY: as above.
    let receiver = unsafe { &*receiver_ptr };

    // Keep to a strict deadline: everything from here on shares one budget.
    let timeout_manager = TimeoutManager::new(config.timeout());

    // Derive the faulting address from `sig_info` before emission.
    let faulting_address = if sig_info.is_null() {
        None
    } else if crate::crash_info::signal_has_fault_address(signum) {
        // SAFETY: the pointer was handed to us by the kernel and is non-null.
        Some(unsafe { (*sig_info).si_addr() as usize })
    } else {
        None
    };

    let mut pipe = receiver.stream();
    emit_crashreport(
        &mut pipe,
        config,
        config_str,
        metadata_string,
        signum,
        faulting_address,
    )?;

    // Wait (bounded) for the receiver to acknowledge by hanging up, then
    // reap it if it already exited.  On timeout we simply proceed: crash
    // reporting never delays process death past the deadline.
    receiver.finish(&timeout_manager);

    Ok(())
}
