//! Caller-visible console capture.
//!
//! The context builder installs a [`CaptureSink`] as the context's
//! console; this module owns the other half: the [`ConsoleOutput`]
//! descriptor the caller reads, and the guard that snapshots the sink
//! into it exactly once when the evaluation settles — success or failure.

use std::sync::Arc;

use parking_lot::Mutex;
use sourcebox_host::CaptureSink;

/// Captured console text for one evaluation. Clone handles share the
/// same buffers, so the caller keeps one and reads it after the call
/// settles, even when the call failed.
#[derive(Clone, Debug, Default)]
pub struct ConsoleOutput {
    inner: Arc<Mutex<Captured>>,
}

#[derive(Debug, Default)]
struct Captured {
    out: String,
    err: String,
}

impl ConsoleOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text written to the stdout-like channel.
    pub fn out(&self) -> String {
        self.inner.lock().out.clone()
    }

    /// Text written to the stderr-like channel.
    pub fn err(&self) -> String {
        self.inner.lock().err.clone()
    }

    pub(crate) fn append(&self, out: &str, err: &str) {
        let mut captured = self.inner.lock();
        captured.out.push_str(out);
        captured.err.push_str(err);
    }
}

/// Snapshots the capture sink into the caller's descriptor when dropped.
/// Dropping at the end of the dispatch scope guarantees the snapshot
/// fires after the evaluation settles, on every path out.
#[derive(Default)]
pub(crate) struct CaptureGuard {
    armed: Option<(CaptureSink, ConsoleOutput)>,
}

impl CaptureGuard {
    pub(crate) fn none() -> Self {
        Self::default()
    }

    pub(crate) fn armed(sink: CaptureSink, output: ConsoleOutput) -> Self {
        Self {
            armed: Some((sink, output)),
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if let Some((sink, output)) = self.armed.take() {
            let (out, err) = sink.take();
            output.append(&out, &err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_snapshots_on_drop() {
        let sink = CaptureSink::new();
        let output = ConsoleOutput::new();
        sink.write_out("hello");
        {
            let _guard = CaptureGuard::armed(sink.clone(), output.clone());
            sink.write_err("world");
        }
        assert_eq!(output.out(), "hello\n");
        assert_eq!(output.err(), "world\n");
    }

    #[test]
    fn test_guard_fires_once() {
        let sink = CaptureSink::new();
        let output = ConsoleOutput::new();
        sink.write_out("once");
        drop(CaptureGuard::armed(sink.clone(), output.clone()));
        sink.write_out("after");
        assert_eq!(output.out(), "once\n");
    }

    #[test]
    fn test_disarmed_guard_is_inert() {
        let output = ConsoleOutput::new();
        drop(CaptureGuard::none());
        assert!(output.out().is_empty());
    }
}
