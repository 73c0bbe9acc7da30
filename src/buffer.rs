//! Receive buffer for protocol framing

use crate::constants::{MAX_BLOCK_SIZE, MAX_BUFFER_SIZE};
use crate::error::{ListenerError, ListenerResult};

/// Byte buffer sitting between the socket and the block parser.
///
/// Consumed bytes are tracked by offset so repeated extraction stays cheap
/// when blocks arrive fragmented; [`compact`](Self::compact) reclaims the
/// consumed front.
pub(crate) struct ReadBuffer {
    data: Vec<u8>,
    consumed: usize,
}

impl ReadBuffer {
    pub(crate) fn new() -> Self {
        Self {
            data: Vec::new(),
            consumed: 0,
        }
    }

    /// Append raw socket bytes.
    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data
            .extend_from_slice(bytes);
    }

    /// Enforce growth limits.
    ///
    /// An unterminated run longer than any legitimate block means the
    /// blank-line terminator was lost; the session has to reconnect to
    /// resynchronize.
    pub(crate) fn check_size_limits(&self) -> ListenerResult<()> {
        let pending = self
            .pending()
            .len();
        if pending > MAX_BLOCK_SIZE {
            return Err(ListenerError::stream(format!(
                "unterminated block of {} bytes exceeds limit of {}",
                pending, MAX_BLOCK_SIZE
            )));
        }
        let buffered = self
            .data
            .len();
        if buffered > MAX_BUFFER_SIZE {
            return Err(ListenerError::stream(format!(
                "receive buffer grew to {} bytes, limit is {}",
                buffered, MAX_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    /// Extract everything up to (but excluding) `pattern`, consuming the
    /// pattern as well. Returns `None` until the pattern is fully buffered.
    pub(crate) fn extract_until_pattern(&mut self, pattern: &[u8]) -> Option<Vec<u8>> {
        let haystack = self.pending();
        let pos = haystack
            .windows(pattern.len())
            .position(|window| window == pattern)?;
        let extracted = haystack[..pos].to_vec();
        self.consumed += pos + pattern.len();
        Some(extracted)
    }

    /// Reclaim consumed front bytes.
    pub(crate) fn compact(&mut self) {
        if self.consumed > 0 {
            self.data
                .drain(..self.consumed);
            self.consumed = 0;
        }
    }

    fn pending(&self) -> &[u8] {
        &self.data[self.consumed..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_until_pattern() {
        let mut buffer = ReadBuffer::new();
        buffer.extend_from_slice(b"Event: Hangup\r\n\r\nEvent:");

        let block = buffer
            .extract_until_pattern(b"\r\n\r\n")
            .unwrap();
        assert_eq!(block, b"Event: Hangup");

        // Remainder stays pending until its own terminator arrives
        assert!(buffer
            .extract_until_pattern(b"\r\n\r\n")
            .is_none());
    }

    #[test]
    fn test_extract_across_partial_feeds() {
        let mut buffer = ReadBuffer::new();
        buffer.extend_from_slice(b"Event: DialBegin\r");
        assert!(buffer
            .extract_until_pattern(b"\r\n\r\n")
            .is_none());

        buffer.extend_from_slice(b"\n\r\n");
        let block = buffer
            .extract_until_pattern(b"\r\n\r\n")
            .unwrap();
        assert_eq!(block, b"Event: DialBegin");
    }

    #[test]
    fn test_terminator_split_across_feeds() {
        let mut buffer = ReadBuffer::new();
        buffer.extend_from_slice(b"A: 1\r\n\r");
        assert!(buffer
            .extract_until_pattern(b"\r\n\r\n")
            .is_none());
        buffer.extend_from_slice(b"\nB: 2\r\n\r\n");

        assert_eq!(
            buffer
                .extract_until_pattern(b"\r\n\r\n")
                .unwrap(),
            b"A: 1"
        );
        assert_eq!(
            buffer
                .extract_until_pattern(b"\r\n\r\n")
                .unwrap(),
            b"B: 2"
        );
    }

    #[test]
    fn test_compact_resets_consumed_front() {
        let mut buffer = ReadBuffer::new();
        buffer.extend_from_slice(b"X: y\r\n\r\nleftover");
        buffer
            .extract_until_pattern(b"\r\n\r\n")
            .unwrap();
        buffer.compact();

        assert_eq!(buffer.pending(), b"leftover");
        assert_eq!(buffer.consumed, 0);
    }

    #[test]
    fn test_unterminated_run_hits_size_limit() {
        let mut buffer = ReadBuffer::new();
        buffer.extend_from_slice(&vec![b'x'; MAX_BLOCK_SIZE + 1]);

        let err = buffer
            .check_size_limits()
            .unwrap_err();
        assert!(matches!(err, ListenerError::Stream { .. }));
    }
}
