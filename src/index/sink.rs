//! Debug sink for the index's verbose channel.

use std::io;

/// An `io::Write` that forwards complete lines to `tracing::debug!`.
///
/// This is a logging shim, not a text stream: bytes are assumed UTF-8 and
/// anything else is replaced lossily. Partial lines are buffered until a
/// newline or flush.
pub struct DebugSink {
    buffer: Vec<u8>,
}

impl DebugSink {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    fn emit(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end();
            if !text.is_empty() {
                tracing::debug!(target: "index", "{text}");
            }
        }
    }
}

impl Default for DebugSink {
    fn default() -> Self {
        Self::new()
    }
}

impl io::Write for DebugSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.emit();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            let text = String::from_utf8_lossy(&self.buffer).to_string();
            self.buffer.clear();
            let text = text.trim_end();
            if !text.is_empty() {
                tracing::debug!(target: "index", "{text}");
            }
        }
        Ok(())
    }
}
