// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::collector::counters::emit_counters;
use crate::crash_info::SignalNames;
use crate::shared::configuration::{CrashtrackerConfiguration, StacktraceCollection};
use crate::shared::constants::*;
use anyhow::Context;
use backtrace::Frame;
use std::{
    fs::File,
    io::{Read, Write},
};

/// Writes the whole crash report down the pipe, section by section.
/// Everything variable was either prepared when the tracker was armed
/// (`config_str`, `metadata_str`) or is readable with async-signal-safe
/// operations (counters, pid, frames).  Ordered so that the fragile part
/// (walking the stack) comes last: even if it crashes the handler, the
/// sections already flushed still reach the receiver.
pub(crate) fn emit_crashreport(
    pipe: &mut impl Write,
    config: &CrashtrackerConfiguration,
    config_str: &str,
    metadata_str: &str,
    signum: i32,
    faulting_address: Option<usize>,
) -> anyhow::Result<()> {
    emit_metadata(pipe, metadata_str)?;
    emit_config(pipe, config_str)?;
    emit_siginfo(pipe, signum, faulting_address)?;
    emit_procinfo(pipe)?;
    emit_counters(pipe)?;

    #[cfg(target_os = "linux")]
    emit_proc_self_maps(pipe)?;

    // Getting a backtrace on rust is not guaranteed to be signal safe:
    // https://github.com/rust-lang/backtrace-rs/issues/414
    // Calculating the `ip` of the frames seems safe, but resolving them
    // sometimes crashes.  Do this last, so even if it does, everything else
    // already went out.
    if config.resolve_frames() != StacktraceCollection::Disabled {
        // SAFETY: single-threaded at this point (we are the crash handler);
        // no other unwinding is in flight in this process.
        unsafe { emit_backtrace_by_frames(pipe, config.resolve_frames())? };
    }
    writeln!(pipe, "{DD_CRASHTRACK_DONE}")?;
    pipe.flush()?;

    Ok(())
}

fn emit_metadata(w: &mut impl Write, metadata_str: &str) -> anyhow::Result<()> {
    writeln!(w, "{DD_CRASHTRACK_BEGIN_METADATA}")?;
    writeln!(w, "{metadata_str}")?;
    writeln!(w, "{DD_CRASHTRACK_END_METADATA}")?;
    w.flush()?;
    Ok(())
}

fn emit_config(w: &mut impl Write, config_str: &str) -> anyhow::Result<()> {
    writeln!(w, "{DD_CRASHTRACK_BEGIN_CONFIG}")?;
    writeln!(w, "{config_str}")?;
    writeln!(w, "{DD_CRASHTRACK_END_CONFIG}")?;
    w.flush()?;
    Ok(())
}

fn emit_siginfo(
    w: &mut impl Write,
    signum: i32,
    faulting_address: Option<usize>,
) -> anyhow::Result<()> {
    let signame: SignalNames = signum.into();

    writeln!(w, "{DD_CRASHTRACK_BEGIN_SIGINFO}")?;
    write!(w, "{{\"signum\": {signum}, \"signame\": \"{signame:?}\"")?;
    if let Some(addr) = faulting_address {
        write!(w, ", \"faulting_address\": \"{addr:#018x}\"")?;
    }
    writeln!(w, "}}")?;
    writeln!(w, "{DD_CRASHTRACK_END_SIGINFO}")?;
    w.flush()?;
    Ok(())
}

fn emit_procinfo(w: &mut impl Write) -> anyhow::Result<()> {
    writeln!(w, "{DD_CRASHTRACK_BEGIN_PROCINFO}")?;
    let pid = nix::unistd::getpid();
    writeln!(w, "{{\"pid\": {pid} }}")?;
    writeln!(w, "{DD_CRASHTRACK_END_PROCINFO}")?;
    w.flush()?;
    Ok(())
}

/// `/proc/self/maps` is very useful for symbolication, and difficult for the
/// receiver to get at (permissions issues on Linux).  Emit it directly onto
/// the pipe to get around this.
#[cfg(target_os = "linux")]
fn emit_proc_self_maps(w: &mut impl Write) -> anyhow::Result<()> {
    emit_text_file(w, "/proc/self/maps")?;
    Ok(())
}

/// Emit a stacktrace onto the given handle as formatted json, one frame per
/// line.
/// SIGNAL SAFETY:
///     Absolute addresses appear to be safe to collect during a crash;
///     symbol resolution is less reliable, which is why it is opt-in
///     through the configuration.
unsafe fn emit_backtrace_by_frames(
    w: &mut impl Write,
    resolve_frames: StacktraceCollection,
) -> anyhow::Result<()> {
    writeln!(w, "{DD_CRASHTRACK_BEGIN_STACKTRACE}")?;

    fn emit_absolute_addresses(w: &mut impl Write, frame: &Frame) -> anyhow::Result<()> {
        write!(w, "\"ip\": \"{:?}\"", frame.ip())?;
        if let Some(module_base_address) = frame.module_base_address() {
            write!(w, ", \"module_base_address\": \"{module_base_address:?}\"")?;
        }
        write!(w, ", \"sp\": \"{:?}\"", frame.sp())?;
        write!(w, ", \"symbol_address\": \"{:?}\"", frame.symbol_address())?;
        Ok(())
    }

    backtrace::trace_unsynchronized(|frame| {
        if resolve_frames == StacktraceCollection::EnabledWithInprocessSymbols {
            backtrace::resolve_frame_unsynchronized(frame, |symbol| {
                let _ = write!(w, "{{");
                let _ = emit_absolute_addresses(w, frame);
                if let Some(file) = symbol.filename() {
                    // The debug printer for path already wraps it in quotes.
                    let _ = write!(w, ", \"file\": {file:?}");
                }
                if let Some(function) = symbol.name() {
                    let _ = write!(w, ", \"function\": \"{function}\"");
                }
                if let Some(line) = symbol.lineno() {
                    let _ = write!(w, ", \"line\": {line}");
                }
                let _ = writeln!(w, "}}");
                // Flush eagerly so each frame gets out even if the next one
                // kills us.
                let _ = w.flush();
            });
        } else {
            let _ = write!(w, "{{");
            let _ = emit_absolute_addresses(w, frame);
            let _ = writeln!(w, "}}");
            let _ = w.flush();
        }
        true // keep going to the next frame
    });
    writeln!(w, "{DD_CRASHTRACK_END_STACKTRACE}")?;
    w.flush()?;
    Ok(())
}

/// Emit a text file onto the given handle, bracketed by file markers.
///
/// SIGNAL SAFETY:
///     `open` and `read` are async-signal safe.  Reading through a fixed
///     stack buffer avoids allocation; anything fancier might not.
#[allow(dead_code)]
fn emit_text_file(w: &mut impl Write, path: &str) -> anyhow::Result<()> {
    const BUFFER_LEN: usize = 512;
    let mut buffer = [0u8; BUFFER_LEN];

    let mut file = File::open(path).with_context(|| path.to_string())?;

    writeln!(w, "{DD_CRASHTRACK_BEGIN_FILE} {path}")?;

    loop {
        let read_count = file.read(&mut buffer)?;
        w.write_all(&buffer[..read_count])?;
        if read_count == 0 {
            break;
        }
    }
    writeln!(w, "\n{DD_CRASHTRACK_END_FILE} \"{path}\"")?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::configuration::CrashtrackerConfiguration;
    use std::io::{BufRead, BufReader};
    use std::time::Duration;

    #[test]
    fn test_emit_crashreport_sections() {
        let config = CrashtrackerConfiguration::new(
            false,
            None,
            // Keep the report deterministic: no frame walking in tests.
            StacktraceCollection::Disabled,
            Some(Duration::from_secs(1)),
        )
        .unwrap();
        let config_str = serde_json::to_string(&config).unwrap();
        let metadata_str = r#"{"library_name":"dd-trace-rs"}"#;

        let (ours, theirs) = std::os::unix::net::UnixStream::pair().unwrap();
        let reader = std::thread::spawn(move || {
            BufReader::new(theirs)
                .lines()
                .collect::<Result<Vec<_>, _>>()
                .unwrap()
        });

        {
            let mut pipe = &ours;
            emit_crashreport(
                &mut pipe,
                &config,
                &config_str,
                metadata_str,
                libc::SIGSEGV,
                Some(0xdead_beef),
            )
            .unwrap();
        }
        drop(ours);
        let lines = reader.join().unwrap();

        assert_eq!(lines.first().unwrap(), DD_CRASHTRACK_BEGIN_METADATA);
        assert_eq!(lines.last().unwrap(), DD_CRASHTRACK_DONE);
        assert!(lines.iter().any(|l| l == DD_CRASHTRACK_BEGIN_CONFIG));
        assert!(lines.iter().any(|l| l == DD_CRASHTRACK_BEGIN_COUNTERS));

        let siginfo = &lines[lines
            .iter()
            .position(|l| l == DD_CRASHTRACK_BEGIN_SIGINFO)
            .unwrap()
            + 1];
        assert!(siginfo.contains("\"signame\": \"SIGSEGV\""));
        assert!(siginfo.contains("\"faulting_address\": \"0x00000000deadbeef\""));
    }

    #[test]
    fn test_emit_text_file_missing() {
        let mut buf = Vec::new();
        assert!(emit_text_file(&mut buf, "/no/such/file").is_err());
        // Nothing was written before the failure.
        assert!(buf.is_empty());
    }
}
