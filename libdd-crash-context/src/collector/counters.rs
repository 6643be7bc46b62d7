// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering::SeqCst};
use thiserror::Error;

/// The profiler activities the registry tracks.
///
/// One of the core intrigues of crash tracking a profiler is
/// contextualization: did the crash happen in user code, or while the
/// profiler was on-CPU?  Knock-on effects can never be fully ruled out, but
/// if crashes consistently land while a particular operation is in flight,
/// that operation is the likely culprit.  Callers only report *what* they
/// are doing; there is no generic "profiling, other" state.
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ProfilingOp {
    Sampling = 0,
    Unwinding,
    Serializing,
    /// Dummy value to allow easier iteration
    SIZE,
}

impl ProfilingOp {
    /// A static string naming the counter for op `i`.  Implemented this way,
    /// rather than as `to_string`, to avoid allocating in signal context.
    pub fn name(i: usize) -> Result<&'static str, CounterError> {
        let rval = match i {
            0 => "profiler_sampling",
            1 => "profiler_unwinding",
            2 => "profiler_serializing",
            _ => return Err(CounterError::InvalidEnumValue(i)),
        };
        Ok(rval)
    }
}

// We genuinely want multiple copies of the interior-mutable value here.
#[allow(clippy::declare_interior_mutable_const)]
const ATOMIC_ZERO: AtomicI64 = AtomicI64::new(0);

/// One counter per activity, holding the number of threads currently inside
/// it.  Process-wide: the signal handler has to be able to read these from
/// whatever thread crashed, so they cannot live in any owned structure.
static OP_COUNTERS: [AtomicI64; ProfilingOp::SIZE as usize] =
    [ATOMIC_ZERO; ProfilingOp::SIZE as usize];

/// A point-in-time read of all counters, taken with atomic loads only, so it
/// is safe to collect inside a signal handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub sampling: i64,
    pub unwinding: i64,
    pub serializing: i64,
}

/// Track that an operation (of type op) has begun on this thread.
/// ATOMICITY:
///     This function is atomic.  SeqCst is stronger than strictly needed,
///     but the cost is irrelevant next to the operations being tracked.
pub fn begin_op(op: ProfilingOp) -> Result<(), CounterError> {
    let old = OP_COUNTERS[op as usize].fetch_add(1, SeqCst);
    if old == i64::MAX - 1 {
        return Err(CounterError::CounterOverflow(op));
    }
    Ok(())
}

/// Track that an operation (of type op) has finished on this thread.
/// A stop without a matching start is a caller contract violation; it is
/// reported, not defended against.
/// ATOMICITY:
///     This function is atomic.
pub fn end_op(op: ProfilingOp) -> Result<(), CounterError> {
    let old = OP_COUNTERS[op as usize].fetch_sub(1, SeqCst);
    if old <= 0 {
        return Err(CounterError::OperationNotStarted(op));
    }
    Ok(())
}

/// Reads all counters.
/// ATOMICITY:
///     Each load is atomic; the snapshot as a whole is not (a counter can
///     move between loads).  That is fine for contextualization purposes.
pub fn snapshot() -> CounterSnapshot {
    CounterSnapshot {
        sampling: OP_COUNTERS[ProfilingOp::Sampling as usize].load(SeqCst),
        unwinding: OP_COUNTERS[ProfilingOp::Unwinding as usize].load(SeqCst),
        serializing: OP_COUNTERS[ProfilingOp::Serializing as usize].load(SeqCst),
    }
}

/// Emits the counters as structured json onto the given writer, one line per
/// counter, bracketed by the counters section markers.
///
/// SIGNAL SAFETY:
///     Only atomic loads and formatted writes to the handle; no mutexes, no
///     allocation.
pub fn emit_counters(w: &mut impl Write) -> Result<(), CounterError> {
    use crate::shared::constants::*;

    writeln!(w, "{DD_CRASHTRACK_BEGIN_COUNTERS}")?;
    for (i, c) in OP_COUNTERS.iter().enumerate() {
        writeln!(w, "{{\"{}\": {}}}", ProfilingOp::name(i)?, c.load(SeqCst))?;
    }
    writeln!(w, "{DD_CRASHTRACK_END_COUNTERS}")?;
    w.flush()?;
    Ok(())
}

/// Resets all counters to 0.
/// Expected to be used after a fork, to reset the counters on the child:
/// whatever the parent's threads were doing, the child's threads are idle.
/// ATOMICITY:
///     This is NOT ATOMIC across the array.  Only use it when no conflicting
///     updates can occur, i.e. after a fork but before ops start on the
///     child.
pub fn reset_counters() -> Result<(), CounterError> {
    for c in OP_COUNTERS.iter() {
        c.store(0, SeqCst);
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("Invalid enum value: {0}")]
    InvalidEnumValue(usize),
    #[error("Counter overflow for operation {0:?}")]
    CounterOverflow(ProfilingOp),
    #[error("Attempted to end operation {0:?} but it was never started or already ended")]
    OperationNotStarted(ProfilingOp),
    #[error("Failed to write to output: {0}")]
    WriteError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    // The counters are process-wide and the test harness runs tests
    // concurrently, so each test here owns one op exclusively: Unwinding for
    // the sequential test, Serializing for the concurrent one.  (Sampling
    // belongs to the facade tests.)
    use super::*;

    #[test]
    fn test_matched_pairs_and_misuse() {
        begin_op(ProfilingOp::Unwinding).unwrap();
        begin_op(ProfilingOp::Unwinding).unwrap();
        assert_eq!(snapshot().unwinding, 2);

        end_op(ProfilingOp::Unwinding).unwrap();
        end_op(ProfilingOp::Unwinding).unwrap();
        assert_eq!(snapshot().unwinding, 0);

        // Unmatched stop is reported as a contract violation.
        assert!(matches!(
            end_op(ProfilingOp::Unwinding),
            Err(CounterError::OperationNotStarted(ProfilingOp::Unwinding))
        ));
        // Rebalance so other observers of the registry see a sane value.
        begin_op(ProfilingOp::Unwinding).unwrap();
    }

    #[test]
    fn test_concurrent_starts_stay_bounded() {
        const THREADS: i64 = 8;
        const ROUNDS: usize = 200;

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                std::thread::spawn(|| {
                    for _ in 0..ROUNDS {
                        begin_op(ProfilingOp::Serializing).unwrap();
                        end_op(ProfilingOp::Serializing).unwrap();
                    }
                })
            })
            .collect();

        // Concurrent snapshots must always observe a value between zero and
        // the number of net-open starts.
        for _ in 0..1000 {
            let seen = snapshot().serializing;
            assert!((0..=THREADS).contains(&seen), "saw {seen}");
        }

        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(snapshot().serializing, 0);
    }

    #[test]
    fn test_emit_counters_format() {
        let mut buf = Vec::new();
        emit_counters(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("DD_CRASHTRACK_BEGIN_COUNTERS\n"));
        assert!(text.ends_with("DD_CRASHTRACK_END_COUNTERS\n"));
        assert!(text.contains("\"profiler_sampling\""));
        assert!(text.contains("\"profiler_unwinding\""));
        assert!(text.contains("\"profiler_serializing\""));
    }

    #[test]
    fn test_op_names() {
        assert_eq!(ProfilingOp::name(0).unwrap(), "profiler_sampling");
        assert_eq!(ProfilingOp::name(2).unwrap(), "profiler_serializing");
        assert!(ProfilingOp::name(3).is_err());
    }
}
