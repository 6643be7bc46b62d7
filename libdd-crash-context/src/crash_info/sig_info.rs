// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Human-readable names for the signals that show up in crash reports: the
/// ones we trap, plus the other fatal dispositions a chained handler might
/// forward to us.
/// See <https://man7.org/linux/man-pages/man7/signal.7.html>.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
#[repr(C)]
pub enum SignalNames {
    SIGILL,
    SIGTRAP,
    SIGABRT,
    SIGBUS,
    SIGFPE,
    SIGSEGV,
    SIGSYS,
    UNKNOWN,
}

impl From<libc::c_int> for SignalNames {
    fn from(value: libc::c_int) -> Self {
        match value {
            libc::SIGILL => SignalNames::SIGILL,
            libc::SIGTRAP => SignalNames::SIGTRAP,
            libc::SIGABRT => SignalNames::SIGABRT,
            libc::SIGBUS => SignalNames::SIGBUS,
            libc::SIGFPE => SignalNames::SIGFPE,
            libc::SIGSEGV => SignalNames::SIGSEGV,
            libc::SIGSYS => SignalNames::SIGSYS,
            _ => SignalNames::UNKNOWN,
        }
    }
}

/// Whether `signum` fills `si_addr` with the address of the fault.
/// <https://man7.org/linux/man-pages/man2/sigaction.2.html>: SIGILL, SIGFPE,
/// SIGSEGV, SIGBUS, and SIGTRAP do.
pub(crate) fn signal_has_fault_address(signum: libc::c_int) -> bool {
    matches!(
        signum,
        libc::SIGILL | libc::SIGFPE | libc::SIGSEGV | libc::SIGBUS | libc::SIGTRAP
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(SignalNames::from(libc::SIGSEGV), SignalNames::SIGSEGV);
        assert_eq!(SignalNames::from(libc::SIGBUS), SignalNames::SIGBUS);
        assert_eq!(SignalNames::from(libc::SIGKILL), SignalNames::UNKNOWN);
    }

    #[test]
    fn test_fault_address_signals() {
        assert!(signal_has_fault_address(libc::SIGSEGV));
        assert!(signal_has_fault_address(libc::SIGBUS));
        assert!(!signal_has_fault_address(libc::SIGABRT));
    }
}
