//! Line-oriented log writers.
//!
//! Raw output arrives in arbitrary chunks. [`LineBuffer`] reassembles lines,
//! and [`LogWriter`] hands each complete line to a shared sink, optionally
//! prefixed so interleaved output from several tasks stays readable.

use std::io;
use std::sync::Arc;

/// Receives one complete line at a time, without its trailing newline.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Longest line [`LineBuffer::new`] holds before splitting it.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Splits a byte stream into lines.
///
/// Bytes after the last newline are held until more data arrives or
/// [`finish`](Self::finish) is called. A partial line reaching the limit is
/// emitted in limit-sized pieces. Invalid UTF-8 is replaced lossily.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    limit: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_LEN)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Appends bytes and returns every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
        }
        while self.pending.len() - start >= self.limit {
            lines.push(decode_line(&self.pending[start..start + self.limit]));
            start += self.limit;
        }
        self.pending.drain(..start);
        lines
    }

    /// Returns the trailing partial line, if any, and clears the buffer.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Writes output into a [`LineSink`] one line at a time.
///
/// Implements [`io::Write`] so it can sit wherever raw process output goes.
/// A partial last line is emitted when the writer is finished or dropped.
pub struct LogWriter {
    buffer: LineBuffer,
    prefix: Option<String>,
    sink: Option<LineSink>,
}

impl LogWriter {
    pub fn new(sink: LineSink) -> Self {
        Self {
            buffer: LineBuffer::new(),
            prefix: None,
            sink: Some(sink),
        }
    }

    /// A writer that drops everything.
    pub fn discard() -> Self {
        Self {
            buffer: LineBuffer::new(),
            prefix: None,
            sink: None,
        }
    }

    /// Derives a new writer on the same sink that prefixes every line.
    pub fn prefixed(&self, prefix: impl Into<String>) -> Self {
        Self {
            buffer: LineBuffer::new(),
            prefix: Some(prefix.into()),
            sink: self.sink.clone(),
        }
    }

    /// Feeds raw bytes; complete lines are emitted immediately.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.sink.is_none() {
            return;
        }
        for line in self.buffer.push(bytes) {
            self.emit(&line);
        }
    }

    /// Emits a complete line directly.
    pub fn write_line(&mut self, line: &str) {
        self.emit(line);
    }

    /// Emits any buffered partial line.
    pub fn finish(&mut self) {
        if let Some(line) = self.buffer.finish() {
            self.emit(&line);
        }
    }

    fn emit(&self, line: &str) {
        let Some(sink) = &self.sink else {
            return;
        };
        match &self.prefix {
            Some(prefix) => sink(&format!("{prefix}{line}")),
            None => sink(line),
        }
    }
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    fn collecting() -> (LineSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = Arc::clone(&lines);
        let sink: LineSink = Arc::new(move |line: &str| {
            sink_lines.lock().unwrap().push(line.to_string());
        });
        (sink, lines)
    }

    #[test]
    fn test_line_buffer_joins_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"Web UI ").is_empty());
        assert_eq!(buffer.push(b"available\r\nInstall"), vec!["Web UI available"]);
        assert_eq!(buffer.finish().as_deref(), Some("Install"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_splits_overlong_lines() {
        let mut buffer = LineBuffer::with_limit(4);
        assert_eq!(buffer.push(b"abc"), Vec::<String>::new());
        assert_eq!(buffer.push(b"defghij"), vec!["abcd", "efgh"]);
        assert_eq!(buffer.push(b"\nxy\n"), vec!["ij", "xy"]);
    }

    #[test]
    fn test_default_line_limit_bounds_pending_bytes() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(&vec![b'x'; MAX_LINE_LEN * 2 + 10]);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.len() == MAX_LINE_LEN));
        assert_eq!(buffer.finish().map(|l| l.len()), Some(10));
    }

    #[test]
    fn test_line_buffer_keeps_empty_lines() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"a\n\nb\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_prefixed_writer_prefixes_each_line() {
        let (sink, lines) = collecting();
        let base = LogWriter::new(sink);
        let mut writer = base.prefixed("[build] ");

        writer.write_all(b"compiling\nlinking\ndo").unwrap();
        writer.write_all(b"ne").unwrap();
        drop(writer);

        assert_eq!(
            *lines.lock().unwrap(),
            vec!["[build] compiling", "[build] linking", "[build] done"]
        );
    }

    #[test]
    fn test_discard_writer_accepts_everything() {
        let mut writer = LogWriter::discard();
        assert_eq!(writer.write(b"ignored\n").unwrap(), 8);
    }
}
