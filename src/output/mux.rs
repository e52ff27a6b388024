// Serializes concurrent per-host output streams into single-writer labeled lines

use std::io::{self, Write};

use colored::*;
use parking_lot::Mutex;

/// Multiplexes output chunks arriving concurrently from many hosts onto one
/// sink, one whole line per write, each line prefixed with the host label.
///
/// The label column is padded to the longest host name observed so far. The
/// width only ever grows, so alignment stays stable across batches even when
/// a later batch contains only short names.
pub struct OutputMultiplexer {
    inner: Mutex<MuxInner>,
}

struct MuxInner {
    sink: Box<dyn Write + Send>,
    longest: usize,
}

impl OutputMultiplexer {
    /// Multiplexer writing to process stdout
    pub fn stdout() -> Self {
        Self::with_sink(Box::new(io::stdout()))
    }

    /// Multiplexer writing to an arbitrary sink (used by tests)
    pub fn with_sink(sink: Box<dyn Write + Send>) -> Self {
        OutputMultiplexer {
            inner: Mutex::new(MuxInner { sink, longest: 0 }),
        }
    }

    /// Record a host name in the label-width tracker.
    ///
    /// Called for every host a batch considers, whether or not its
    /// connection succeeds. The width never shrinks.
    pub fn observe_host(&self, host: &str) {
        let mut inner = self.inner.lock();
        if host.len() > inner.longest {
            inner.longest = host.len();
        }
    }

    /// Current label column width
    pub fn label_width(&self) -> usize {
        self.inner.lock().longest
    }

    /// Write one chunk of remote output under the host's label.
    ///
    /// The chunk is split on line terminators and each piece goes out as its
    /// own labeled line. A trailing fragment with no terminator is flushed
    /// immediately as a line of its own; nothing is buffered across calls.
    pub fn emit(&self, host: &str, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let text = String::from_utf8_lossy(data);

        // A terminated chunk like "a\n" splits into ["a", ""]; the empty
        // tail is not a line and must not produce output.
        let mut pieces: Vec<&str> = text.split('\n').collect();
        if text.ends_with('\n') {
            pieces.pop();
        }

        let mut inner = self.inner.lock();
        let pad = inner.longest.saturating_sub(host.len());

        for line in pieces {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let labeled = format!("{}{} {}\n", host.cyan(), " ".repeat(pad), line);
            inner.sink.write_all(labeled.as_bytes()).ok();
        }
        inner.sink.flush().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Shared in-memory sink so tests can inspect what was written
    #[derive(Clone, Default)]
    struct TestSink(Arc<Mutex<Vec<u8>>>);

    impl Write for TestSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl TestSink {
        fn contents(&self) -> String {
            let raw = String::from_utf8(self.0.lock().clone()).unwrap();
            console::strip_ansi_codes(&raw).to_string()
        }
    }

    fn mux_with_sink() -> (OutputMultiplexer, TestSink) {
        colored::control::set_override(false);
        let sink = TestSink::default();
        let mux = OutputMultiplexer::with_sink(Box::new(sink.clone()));
        (mux, sink)
    }

    #[test]
    fn test_label_width_grows_monotonically() {
        let (mux, _) = mux_with_sink();

        mux.observe_host("web1");
        assert_eq!(mux.label_width(), 4);

        mux.observe_host("webserver2");
        assert_eq!(mux.label_width(), 10);

        // A later, shorter host never shrinks the column
        mux.observe_host("db");
        assert_eq!(mux.label_width(), 10);
    }

    #[test]
    fn test_lines_padded_to_longest_host() {
        let (mux, sink) = mux_with_sink();
        mux.observe_host("a");
        mux.observe_host("ccc");

        mux.emit("a", b"hi\n");
        mux.emit("ccc", b"hi\n");

        let out = sink.contents();
        assert!(out.contains("a   hi\n"), "got: {:?}", out);
        assert!(out.contains("ccc hi\n"), "got: {:?}", out);
    }

    #[test]
    fn test_multi_line_chunk_splits_into_labeled_lines() {
        let (mux, sink) = mux_with_sink();
        mux.observe_host("h1");

        mux.emit("h1", b"one\ntwo\nthree\n");

        assert_eq!(sink.contents(), "h1 one\nh1 two\nh1 three\n");
    }

    #[test]
    fn test_unterminated_fragment_is_flushed_immediately() {
        let (mux, sink) = mux_with_sink();
        mux.observe_host("h1");

        // No trailing newline: the fragment still goes out as its own line
        mux.emit("h1", b"partial");

        assert_eq!(sink.contents(), "h1 partial\n");
    }

    #[test]
    fn test_crlf_terminators_are_stripped() {
        let (mux, sink) = mux_with_sink();
        mux.observe_host("h1");

        mux.emit("h1", b"line\r\n");

        assert_eq!(sink.contents(), "h1 line\n");
    }

    #[test]
    fn test_empty_chunk_produces_no_output() {
        let (mux, sink) = mux_with_sink();
        mux.observe_host("h1");

        mux.emit("h1", b"");

        assert_eq!(sink.contents(), "");
    }
}
