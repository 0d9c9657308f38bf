//! Line framing for inbound bytes and chunked encoding for outbound text.
//!
//! ## Inbound
//!
//! [`LineFramer::feed`] appends raw socket bytes to the connection's input
//! buffer and cuts out every line terminated by `\n`. The terminator is not
//! part of the emitted line; a trailing `\r` is left for the protocol layer
//! to strip.
//!
//! When the input buffer fills without a terminator the framer does not
//! fail. It emits the full buffer as a line and starts the next one with a
//! single [`PADDING_BYTE`]. Inside a header block the remainder therefore
//! reads as a folded continuation line and the header survives intact.
//!
//! ## Outbound
//!
//! [`encode`] runs reply text through the connection charset one character
//! at a time and packs the bytes into pool buffers. A character is never
//! split across two buffers.

use crate::buffer::charset::Charset;
use crate::buffer::pool::{BufferPool, PooledBuffer};
use std::sync::Arc;
use tracing::debug;

/// Line terminator byte.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Byte prepended to the continuation of an over-long line.
pub const PADDING_BYTE: u8 = b' ';

/// Cuts a byte stream into lines using a single pooled input buffer.
#[derive(Debug)]
pub struct LineFramer {
    pool: Arc<BufferPool>,
    input: Option<PooledBuffer>,
    overflows: u64,
}

impl LineFramer {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            input: None,
            overflows: 0,
        }
    }

    /// Appends `raw` to the input buffer and returns every line completed
    /// by it, in order.
    pub fn feed(&mut self, mut raw: &[u8]) -> Vec<PooledBuffer> {
        let mut lines = Vec::new();
        let pool = Arc::clone(&self.pool);
        let input = self.input.get_or_insert_with(|| pool.acquire());

        while !raw.is_empty() {
            let written = input.put(raw);
            raw = &raw[written..];

            extract_lines(&pool, input, &mut lines);

            if input.is_full() {
                // No terminator anywhere in a full buffer: flush it as a
                // line and mark the rest of it as a continuation.
                let full = std::mem::replace(input, pool.acquire());
                input.put(&[PADDING_BYTE]);
                self.overflows += 1;
                debug!(
                    length = full.len(),
                    "Over-long line split at buffer capacity"
                );
                lines.push(full);
            }
        }

        lines
    }

    /// Bytes of the incomplete line carried over to the next `feed`.
    pub fn pending(&self) -> &[u8] {
        self.input.as_ref().map(|b| b.as_slice()).unwrap_or(&[])
    }

    /// Number of over-long lines split so far.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Returns the input buffer to the pool, discarding any partial line.
    pub fn release(&mut self) {
        if let Some(buf) = self.input.take() {
            self.pool.recycle(buf);
        }
    }
}

fn extract_lines(pool: &BufferPool, input: &mut PooledBuffer, lines: &mut Vec<PooledBuffer>) {
    while let Some(end) = input
        .as_slice()
        .iter()
        .position(|&b| b == LINE_TERMINATOR)
    {
        let mut line = pool.acquire();
        line.put(&input.as_slice()[..end]);
        input.advance(end + 1);
        lines.push(line);
    }
    input.compact();
}

/// Encodes `text` with `charset` into an ordered list of readable buffers.
pub fn encode(pool: &BufferPool, text: &str, charset: Charset) -> Vec<PooledBuffer> {
    let mut out = Vec::new();
    let mut current = pool.acquire();
    let mut scratch = [0u8; 4];

    for ch in text.chars() {
        let bytes = charset.encode_char(ch, &mut scratch);
        if current.spare() < bytes.len() {
            out.push(std::mem::replace(&mut current, pool.acquire()));
        }
        current.put(bytes);
    }

    if current.is_empty() {
        pool.recycle(current);
    } else {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer(capacity: usize) -> LineFramer {
        LineFramer::new(Arc::new(BufferPool::new(capacity, 64)))
    }

    fn text(lines: &[PooledBuffer]) -> Vec<String> {
        lines
            .iter()
            .map(|l| String::from_utf8_lossy(l.as_slice()).into_owned())
            .collect()
    }

    #[test]
    fn test_single_line() {
        let mut f = framer(64);
        let lines = f.feed(b"GROUP misc.test\r\n");
        assert_eq!(text(&lines), vec!["GROUP misc.test\r"]);
        assert!(f.pending().is_empty());
    }

    #[test]
    fn test_partial_line_is_preserved() {
        let mut f = framer(64);
        assert!(f.feed(b"QU").is_empty());
        assert_eq!(f.pending(), b"QU");
        let lines = f.feed(b"IT\r\nHE");
        assert_eq!(text(&lines), vec!["QUIT\r"]);
        assert_eq!(f.pending(), b"HE");
    }

    #[test]
    fn test_line_count_matches_terminators_across_splits() {
        let stream = b"one\ntwo\n\nfour\nfive\nsix";
        let expected = vec!["one", "two", "", "four", "five"];

        for split in 1..stream.len() {
            let mut f = framer(64);
            let mut lines = f.feed(&stream[..split]);
            lines.extend(f.feed(&stream[split..]));
            assert_eq!(text(&lines), expected, "split at {}", split);
            assert_eq!(f.pending(), b"six");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut f = framer(32);
        let mut lines = Vec::new();
        for b in b"a\r\nbb\r\nccc\r\n" {
            lines.extend(f.feed(std::slice::from_ref(b)));
        }
        assert_eq!(text(&lines), vec!["a\r", "bb\r", "ccc\r"]);
    }

    #[test]
    fn test_overlong_line_is_split_with_padding() {
        let mut f = framer(16);
        let long = "X-Long: 0123456789abcdefghij\n";
        let lines = f.feed(long.as_bytes());

        let lines = text(&lines);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "X-Long: 01234567");
        assert_eq!(lines[1], " 89abcdefghij");
        assert_eq!(f.overflows(), 1);
    }

    #[test]
    fn test_release_returns_input_buffer() {
        let pool = Arc::new(BufferPool::new(32, 8));
        let mut f = LineFramer::new(Arc::clone(&pool));
        f.feed(b"partial");
        assert_eq!(pool.available(), 0);
        f.release();
        assert_eq!(pool.available(), 1);
        assert!(f.pending().is_empty());
    }

    #[test]
    fn test_encode_splits_on_capacity() {
        let pool = BufferPool::new(16, 8);
        let text = "0123456789abcdefXYZ";
        let bufs = encode(&pool, text, Charset::Utf8);
        assert_eq!(bufs.len(), 2);
        assert_eq!(bufs[0].as_slice(), b"0123456789abcdef");
        assert_eq!(bufs[1].as_slice(), b"XYZ");
    }

    #[test]
    fn test_encode_keeps_multibyte_chars_whole() {
        let pool = BufferPool::new(16, 8);
        let text = "aaaaaaaaaaaaaaa€";
        let bufs = encode(&pool, text, Charset::Utf8);
        assert_eq!(bufs.len(), 2);
        assert_eq!(bufs[0].len(), 15);
        assert_eq!(bufs[1].as_slice(), "€".as_bytes());
    }

    #[test]
    fn test_encode_with_latin1() {
        let pool = BufferPool::new(16, 8);
        let bufs = encode(&pool, "Café\r\n", Charset::Latin1);
        assert_eq!(bufs[0].as_slice(), &[b'C', b'a', b'f', 0xE9, b'\r', b'\n']);
    }

    #[test]
    fn test_encode_empty_text() {
        let pool = BufferPool::new(16, 8);
        assert!(encode(&pool, "", Charset::Utf8).is_empty());
        assert_eq!(pool.available(), 1);
    }
}
