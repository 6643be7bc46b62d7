// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::crash_handler::handle_posix_sigaction;
use crate::common::unix_utils::terminate;
use crate::shared::configuration::CrashtrackerConfiguration;
use libc::{
    c_void, mmap, sigaltstack, siginfo_t, MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ,
    PROT_WRITE, SIGSTKSZ,
};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler};
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicPtr};

/// The dispositions that were installed before ours, kept so the crash
/// handler can hand the signal back once the report is out.
#[derive(Debug)]
struct OldHandlers {
    sigbus: SigAction,
    sigsegv: SigAction,
}

static ALTSTACK_INIT: AtomicBool = AtomicBool::new(false);
static OLD_HANDLERS: AtomicPtr<OldHandlers> = AtomicPtr::new(ptr::null_mut());

/// Registers UNIX signal handlers to detect program crashes.
/// Idempotent: re-arming (a second `start()`, or `atfork_child()` in a child
/// that inherited the parent's registration) leaves the existing
/// registration in place, since `sigaction` dispositions survive `fork`.
///
/// SAFETY:
///     Crash-tracking functions are not guaranteed to be reentrant.
///     No other crash-handler functions should be called concurrently.
/// ATOMICITY:
///     Publication of the old handlers uses a compare-exchange, but setting
///     the crash handler itself is not atomic.  If a crash occurs while this
///     function is mid-flight, the handler may run without stored previous
///     dispositions; the chain path aborts in that case.
pub(crate) fn register_crash_handlers(config: &CrashtrackerConfiguration) -> anyhow::Result<()> {
    if !OLD_HANDLERS.load(SeqCst).is_null() {
        return Ok(());
    }

    unsafe {
        if config.create_alt_stack() {
            create_alt_stack()?;
        }
        let sigbus = register_signal_handler(signal::SIGBUS)?;
        let sigsegv = register_signal_handler(signal::SIGSEGV)?;
        let boxed_ptr = Box::into_raw(Box::new(OldHandlers { sigbus, sigsegv }));

        let res = OLD_HANDLERS.compare_exchange(ptr::null_mut(), boxed_ptr, SeqCst, SeqCst);
        anyhow::ensure!(
            res.is_ok(),
            "TOCTTOU error registering crash handlers"
        );
    }
    Ok(())
}

unsafe fn register_signal_handler(signal_type: signal::Signal) -> anyhow::Result<SigAction> {
    // https://www.gnu.org/software/libc/manual/html_node/Flags-for-Sigaction.html
    // ===============
    // If this flag is set for a particular signal number, the system uses
    // the signal stack when delivering that kind of signal.
    // If a signal with this flag arrives and you have not set a signal
    // stack, the normal user stack is used instead, as if the flag had not
    // been set.
    // ===============
    // This implies it is always safe to set SA_ONSTACK, whether or not we
    // created an altstack.
    let sig_action = SigAction::new(
        SigHandler::SigAction(handle_posix_sigaction),
        SaFlags::SA_NODEFER | SaFlags::SA_ONSTACK,
        signal::SigSet::empty(),
    );

    let old_handler = signal::sigaction(signal_type, &sig_action)?;
    Ok(old_handler)
}

/// Once the report is out, hand the signal to whatever was registered before
/// us, preserving the host application's termination semantics.
///
/// SAFETY: `OLD_HANDLERS` was published by [`register_crash_handlers`].
/// There is a tiny window between registering the handlers and storing the
/// old dispositions; if we crash inside it there is nothing to chain to, so
/// we `_exit` rather than re-raise.
pub(crate) unsafe fn chain_signal_handler(
    signum: i32,
    sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    let old_handlers = OLD_HANDLERS.load(SeqCst);
    if old_handlers.is_null() {
        eprintln!("Crashed during signal handler setup, cannot chain {signum}, aborting");
        terminate();
    }
    // SAFETY: non-null values only ever come from Box::into_raw above, and
    // nothing frees them while the process lives.
    let old_handlers = unsafe { &*old_handlers };
    let (signal, old_sigaction) = if signum == libc::SIGSEGV {
        (signal::SIGSEGV, old_handlers.sigsegv)
    } else if signum == libc::SIGBUS {
        (signal::SIGBUS, old_handlers.sigbus)
    } else {
        eprintln!("Unexpected signal {signum}, cannot chain, aborting");
        terminate();
    };

    // How we chain depends on what kind of handler we're chaining to.
    // https://www.gnu.org/software/libc/manual/html_node/Signal-Handling.html
    // https://man7.org/linux/man-pages/man2/sigaction.2.html
    // Follow the approach here:
    // https://stackoverflow.com/questions/6015498/executing-default-signal-handler
    match old_sigaction.handler() {
        SigHandler::SigDfl => {
            // In the case of a default handler, we want to invoke it so that
            // the core-dump can be generated.  Restoring the handler then
            // re-raising the signal accomplishes that.
            unsafe { signal::sigaction(signal, &old_sigaction) }.unwrap_or_else(|_| terminate());
            // Signals are only delivered once.
            // In the case where we were invoked because of a crash, returning
            // is technically UB but in practice re-invokes the crashing instr
            // and re-raises the signal. In the case where we were invoked by
            // `raise(SIGSEGV)` we need to re-raise the signal, or the default
            // handler will never receive it.
            unsafe { libc::raise(signum) };
        }
        SigHandler::SigIgn => (), // Return and ignore the signal.
        SigHandler::Handler(f) => f(signum),
        SigHandler::SigAction(f) => f(signum, sig_info, ucontext),
    }
}

/// Puts the previous dispositions back and forgets ours.
/// Inside a signal handler the stored box is leaked instead of freed;
/// calling `free` while crashing is how you crash twice.
pub(crate) fn restore_old_handlers(inside_signal_handler: bool) -> anyhow::Result<()> {
    let prev = OLD_HANDLERS.swap(ptr::null_mut(), SeqCst);
    anyhow::ensure!(!prev.is_null(), "No previously registered signal handlers");
    // SAFETY: the only non-null pointer stored here comes from Box::into_raw.
    let prev = unsafe { Box::from_raw(prev) };
    // SAFETY: the values restored here were returned by a prior sigaction call.
    unsafe { signal::sigaction(signal::SIGBUS, &prev.sigbus)? };
    unsafe { signal::sigaction(signal::SIGSEGV, &prev.sigsegv)? };
    if inside_signal_handler {
        Box::leak(prev);
    }
    Ok(())
}

/// Allocates a signal altstack, and puts a guard page at the end.
/// Inspired by https://github.com/rust-lang/rust/pull/69969/files
unsafe fn create_alt_stack() -> anyhow::Result<()> {
    if ALTSTACK_INIT.load(SeqCst) {
        return Ok(());
    }

    // Ensure that the altstack size is the greater of 16 pages or SIGSTKSZ.
    // This is necessary because the default SIGSTKSZ is 8KB, which crash
    // handling has been observed to exceed in practice.
    let page_size = page_size::get();
    let sigaltstack_base_size = std::cmp::max(SIGSTKSZ, 16 * page_size);
    let stackp = mmap(
        ptr::null_mut(),
        sigaltstack_base_size + page_size,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANON,
        -1,
        0,
    );
    anyhow::ensure!(
        stackp != MAP_FAILED,
        "failed to allocate an alternative stack"
    );
    let guard_result = libc::mprotect(stackp, page_size, PROT_NONE);
    anyhow::ensure!(
        guard_result == 0,
        "failed to set up alternative stack guard page"
    );
    let stackp = stackp.add(page_size);

    let stack = libc::stack_t {
        ss_sp: stackp,
        ss_flags: 0,
        ss_size: sigaltstack_base_size,
    };
    let rval = sigaltstack(&stack, ptr::null_mut());
    anyhow::ensure!(rval == 0, "sigaltstack failed {rval}");
    ALTSTACK_INIT.store(true, SeqCst);
    Ok(())
}
