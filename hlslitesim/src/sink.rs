// sink.rs — Trace sink: the side channel every runtime model writes to
//
// The sink is either an open line-buffered stream or disabled. `from_env`
// reopens the file descriptor named by `HLSLITESIM_TRACE_FD`; an absent or
// unparsable value disables tracing silently. Emission never fails: a write
// error is logged once and the sink disables itself, so tracing can never
// change the functional behaviour of the simulated kernel.

use std::io::{self, LineWriter, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::trace::TraceEvent;

/// Environment variable naming the trace file descriptor.
pub const TRACE_FD_ENV: &str = "HLSLITESIM_TRACE_FD";

pub struct TraceSink {
    out: Option<Box<dyn Write + Send>>,
}

impl TraceSink {
    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self { out: None }
    }

    /// Wrap an arbitrary writer. Lines are flushed as they complete.
    pub fn to_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            out: Some(Box::new(LineWriter::new(writer))),
        }
    }

    /// Open a trace file for writing (truncating it).
    pub fn to_file(path: &std::path::Path) -> io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::to_writer(file))
    }

    /// Build a sink from `HLSLITESIM_TRACE_FD`.
    pub fn from_env() -> Self {
        Self::from_fd_var(std::env::var(TRACE_FD_ENV).ok().as_deref())
    }

    /// Build a sink from the raw value of the fd variable.
    pub fn from_fd_var(value: Option<&str>) -> Self {
        let Some(fd) = value.and_then(parse_fd) else {
            log::debug!("{} unset or invalid; tracing disabled", TRACE_FD_ENV);
            return Self::disabled();
        };
        match open_fd(fd) {
            Some(file) => {
                log::debug!("tracing to fd {}", fd);
                Self::to_writer(file)
            }
            None => Self::disabled(),
        }
    }

    /// In-memory sink for tests and the interpreter driver.
    pub fn capture() -> (Self, TraceBuffer) {
        let buffer = TraceBuffer::default();
        (Self::to_writer(buffer.clone()), buffer)
    }

    pub fn is_enabled(&self) -> bool {
        self.out.is_some()
    }

    /// Append one record. No-op when disabled.
    pub fn emit(&mut self, event: &TraceEvent) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        if let Err(e) = writeln!(out, "{}", event) {
            log::warn!("trace write failed ({}); disabling trace output", e);
            self.out = None;
        }
    }

    pub fn flush(&mut self) {
        if let Some(out) = self.out.as_mut() {
            if let Err(e) = out.flush() {
                log::warn!("trace flush failed: {}", e);
            }
        }
    }
}

impl Default for TraceSink {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Drop for TraceSink {
    fn drop(&mut self) {
        self.flush();
    }
}

impl std::fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSink")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn parse_fd(value: &str) -> Option<i32> {
    value.trim().parse::<i32>().ok().filter(|fd| *fd >= 0)
}

#[cfg(unix)]
fn open_fd(fd: i32) -> Option<std::fs::File> {
    use std::os::unix::io::FromRawFd;
    // The descriptor is handed to us by the parent process for exclusive use
    // as the trace stream; ownership transfers to the returned File.
    Some(unsafe { std::fs::File::from_raw_fd(fd) })
}

#[cfg(not(unix))]
fn open_fd(fd: i32) -> Option<std::fs::File> {
    log::warn!("{}={} is only supported on unix; tracing disabled", TRACE_FD_ENV, fd);
    None
}

// ── Capture buffer ──────────────────────────────────────────────────────────

/// Shared in-memory trace destination.
#[derive(Debug, Clone, Default)]
pub struct TraceBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl TraceBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for TraceBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_garbage_fd_disables_tracing() {
        assert!(!TraceSink::from_fd_var(None).is_enabled());
        assert!(!TraceSink::from_fd_var(Some("three")).is_enabled());
        assert!(!TraceSink::from_fd_var(Some("-4")).is_enabled());
        assert!(!TraceSink::from_fd_var(Some("")).is_enabled());
    }

    #[test]
    fn disabled_sink_is_a_no_op() {
        let mut sink = TraceSink::disabled();
        sink.emit(&TraceEvent::ApCtrlChain);
        sink.flush();
        assert!(!sink.is_enabled());
    }

    #[test]
    fn capture_sees_complete_lines_without_explicit_flush() {
        let (mut sink, buf) = TraceSink::capture();
        sink.emit(&TraceEvent::TraceBb {
            function: "top".into(),
            block: 0,
        });
        sink.emit(&TraceEvent::ApCtrlChain);
        assert_eq!(buf.contents(), "trace_bb\ttop\t0\nap_ctrl_chain\n");
        assert_eq!(buf.lines().len(), 2);
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_error_disables_sink() {
        let mut sink = TraceSink::to_writer(Broken);
        sink.emit(&TraceEvent::ApCtrlChain);
        assert!(!sink.is_enabled());
    }
}
