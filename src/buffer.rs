//! Inbound frame accumulator.
//!
//! TCP gives no framing guarantee and the protocol is not strictly
//! line-oriented: a `MSG` header line is followed by a binary payload
//! of server-declared length that may itself contain CRLF bytes.
//! Payload extraction is therefore position-addressed (`get`) rather
//! than tokenized, and nothing is consumed until a full frame has been
//! handled (`acknowledge`/`acknowledge_message`).

use bytes::{Buf, BytesMut};

const EOL: &[u8] = b"\r\n";

/// Byte accumulator yielding one protocol line at a time.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append inbound bytes. Does not affect the parse position.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Peek the next CRLF-terminated line without consuming it.
    ///
    /// Returns `None` while no terminator has arrived yet. Stray EOL
    /// bytes left at the front (the tail of a consumed payload split
    /// across reads) are discarded first, so the buffer origin always
    /// sits at a line start.
    pub fn get_line(&mut self) -> Option<String> {
        self.trim_leading_eol();

        self.buf
            .windows(EOL.len())
            .position(|window| window == EOL)
            .map(|at| String::from_utf8_lossy(&self.buf[..at]).into_owned())
    }

    /// Exactly `length` bytes starting at `start` from the buffer
    /// origin, or `None` when fewer have arrived; a partial frame means
    /// the caller waits for the next append.
    pub fn get(&self, length: usize, start: usize) -> Option<&[u8]> {
        let end = start.checked_add(length)?;
        if self.buf.len() < end {
            return None;
        }
        Some(&self.buf[start..end])
    }

    /// Consume a handled line plus its terminator, advancing the origin.
    pub fn acknowledge(&mut self, line: &str) {
        self.consume(line.len());
    }

    /// Consume a `MSG` header line, its terminator, and the payload as
    /// one unit.
    pub fn acknowledge_message(&mut self, line: &str, payload_len: usize) {
        self.consume(line.len() + EOL.len() + payload_len);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn consume(&mut self, len: usize) {
        self.buf.advance(len.min(self.buf.len()));
        self.trim_leading_eol();
    }

    fn trim_leading_eol(&mut self) {
        while self.buf.first().is_some_and(|b| *b == b'\r' || *b == b'\n') {
            self.buf.advance(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_round_trip() {
        let mut buffer = FrameBuffer::new();
        buffer.append(b"PING\r\nPONG\r\n");

        let line = buffer.get_line().unwrap();
        assert_eq!(line, "PING");
        buffer.acknowledge(&line);

        let line = buffer.get_line().unwrap();
        assert_eq!(line, "PONG");
        buffer.acknowledge(&line);

        assert!(buffer.is_empty());
        assert_eq!(buffer.get_line(), None);
    }

    #[test]
    fn test_partial_line_yields_nothing() {
        let mut buffer = FrameBuffer::new();
        buffer.append(b"PIN");
        assert_eq!(buffer.get_line(), None);

        buffer.append(b"G\r\n");
        assert_eq!(buffer.get_line().as_deref(), Some("PING"));
    }

    #[test]
    fn test_get_line_does_not_consume() {
        let mut buffer = FrameBuffer::new();
        buffer.append(b"PING\r\n");

        assert_eq!(buffer.get_line().as_deref(), Some("PING"));
        assert_eq!(buffer.get_line().as_deref(), Some("PING"));
    }

    #[test]
    fn test_partial_payload_not_consumed() {
        let mut buffer = FrameBuffer::new();
        buffer.append(b"MSG foo.bar sid1 5\r\nhel");

        let line = buffer.get_line().unwrap();
        assert_eq!(line, "MSG foo.bar sid1 5");
        // Payload truncated: position-addressed read must refuse.
        assert_eq!(buffer.get(5, line.len() + 2), None);

        buffer.append(b"lo");
        assert_eq!(buffer.get(5, line.len() + 2).unwrap(), b"hello");

        buffer.acknowledge_message(&line, 5);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_payload_may_contain_crlf() {
        let mut buffer = FrameBuffer::new();
        buffer.append(b"MSG a b 6\r\nhi\r\nyo\r\nPING\r\n");

        let line = buffer.get_line().unwrap();
        assert_eq!(buffer.get(6, line.len() + 2).unwrap(), b"hi\r\nyo");

        buffer.acknowledge_message(&line, 6);
        assert_eq!(buffer.get_line().as_deref(), Some("PING"));
    }

    #[test]
    fn test_trailing_eol_arriving_late_is_discarded() {
        let mut buffer = FrameBuffer::new();
        buffer.append(b"MSG a b 2\r\nok");

        let line = buffer.get_line().unwrap();
        buffer.acknowledge_message(&line, 2);

        // Terminator after the payload shows up in a later read.
        buffer.append(b"\r\nPONG\r\n");
        assert_eq!(buffer.get_line().as_deref(), Some("PONG"));
    }

    #[test]
    fn test_clear() {
        let mut buffer = FrameBuffer::new();
        buffer.append(b"PING\r\n");
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.get_line(), None);
    }
}
