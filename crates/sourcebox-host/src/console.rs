//! Console channels and reversible output capture.
//!
//! Evaluated code writes console text through a [`ConsoleChannel`]: either
//! straight to the host process streams, or into a [`CaptureSink`] whose
//! buffers the orchestrator snapshots once the evaluation settles.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

/// Where console writes from evaluated code end up.
#[derive(Clone, Debug, Default)]
pub enum ConsoleChannel {
    /// Pass writes through to the host process stdout/stderr.
    #[default]
    Inherit,
    /// Buffer writes in a capture sink.
    Capture(CaptureSink),
}

impl ConsoleChannel {
    /// Write one line to the stdout-like channel.
    pub fn write_out(&self, text: &str) {
        match self {
            ConsoleChannel::Inherit => {
                let _ = writeln!(std::io::stdout(), "{text}");
            }
            ConsoleChannel::Capture(sink) => sink.write_out(text),
        }
    }

    /// Write one line to the stderr-like channel.
    pub fn write_err(&self, text: &str) {
        match self {
            ConsoleChannel::Inherit => {
                let _ = writeln!(std::io::stderr(), "{text}");
            }
            ConsoleChannel::Capture(sink) => sink.write_err(text),
        }
    }
}

/// Two growable text buffers, one per output channel, shared by clone.
/// Lives for one evaluation; the orchestrator drains it exactly once.
#[derive(Clone, Debug, Default)]
pub struct CaptureSink {
    inner: Arc<Mutex<Buffers>>,
    color: bool,
}

#[derive(Debug, Default)]
struct Buffers {
    out: String,
    err: String,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose writers may emit color escapes. The reference micro
    /// host never colorizes; real hosts consult this when inspecting
    /// values.
    pub fn with_color(color: bool) -> Self {
        Self {
            inner: Arc::default(),
            color,
        }
    }

    pub fn color(&self) -> bool {
        self.color
    }

    pub fn write_out(&self, text: &str) {
        let mut buffers = self.inner.lock();
        buffers.out.push_str(text);
        buffers.out.push('\n');
    }

    pub fn write_err(&self, text: &str) {
        let mut buffers = self.inner.lock();
        buffers.err.push_str(text);
        buffers.err.push('\n');
    }

    /// Drain both buffers, returning `(out, err)`.
    pub fn take(&self) -> (String, String) {
        let mut buffers = self.inner.lock();
        (
            std::mem::take(&mut buffers.out),
            std::mem::take(&mut buffers.err),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink_buffers_lines() {
        let sink = CaptureSink::new();
        sink.write_out("one");
        sink.write_out("two");
        sink.write_err("oops");
        let (out, err) = sink.take();
        assert_eq!(out, "one\ntwo\n");
        assert_eq!(err, "oops\n");
    }

    #[test]
    fn test_take_drains() {
        let sink = CaptureSink::new();
        sink.write_out("once");
        let _ = sink.take();
        let (out, err) = sink.take();
        assert!(out.is_empty());
        assert!(err.is_empty());
    }

    #[test]
    fn test_clones_share_buffers() {
        let sink = CaptureSink::new();
        let channel = ConsoleChannel::Capture(sink.clone());
        channel.write_out("via channel");
        let (out, _) = sink.take();
        assert_eq!(out, "via channel\n");
    }
}
