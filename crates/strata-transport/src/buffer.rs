//! Chunked byte queue between the network and the reader.
//!
//! Transports deliver bytes in bursts whose size they choose; callers read in
//! sizes they choose. [`ResponseBuffer`] sits in between: a deque of
//! fixed-size chunks, written at the tail and drained from the head. Growth
//! never copies existing chunks.

use std::collections::VecDeque;

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 16384;

/// Bytes received from the network but not yet consumed.
///
/// # Examples
///
/// ```
/// use strata_transport::ResponseBuffer;
///
/// let mut buffer = ResponseBuffer::with_chunk_size(4);
/// buffer.feed(b"hello world");
/// assert_eq!(buffer.size(), 11);
///
/// let mut out = [0u8; 5];
/// assert_eq!(buffer.consume(&mut out), 5);
/// assert_eq!(&out, b"hello");
/// assert_eq!(buffer.size(), 6);
/// ```
#[derive(Debug)]
pub struct ResponseBuffer {
    chunks: VecDeque<Box<[u8]>>,
    chunk_size: usize,
    /// Write cursor inside the tail chunk.
    pos_write: usize,
    /// Read cursor inside the head chunk.
    pos_read: usize,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// A zero chunk size is bumped to one byte.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            chunk_size: chunk_size.max(1),
            pos_write: 0,
            pos_read: 0,
        }
    }

    /// Append `data` at the tail, allocating new chunks as the tail fills up.
    pub fn feed(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self.chunks.is_empty() || self.pos_write == self.chunk_size {
                self.chunks.push_back(vec![0u8; self.chunk_size].into_boxed_slice());
                self.pos_write = 0;
            }
            let n = data.len().min(self.chunk_size - self.pos_write);
            if let Some(tail) = self.chunks.back_mut() {
                tail[self.pos_write..self.pos_write + n].copy_from_slice(&data[..n]);
            }
            self.pos_write += n;
            data = &data[n..];
        }
    }

    /// Copy up to `target.len()` bytes from the head into `target`.
    ///
    /// Returns how many bytes were copied, which is less than requested when
    /// fewer are buffered. Never blocks.
    pub fn consume(&mut self, target: &mut [u8]) -> usize {
        let mut delivered = 0;
        while delivered < target.len() {
            if self.chunks.is_empty() {
                break;
            }
            if self.chunks.len() == 1 && self.pos_read >= self.pos_write {
                break;
            }
            if self.pos_read == self.chunk_size {
                self.chunks.pop_front();
                self.pos_read = 0;
                continue;
            }

            let available = if self.chunks.len() == 1 {
                self.pos_write - self.pos_read
            } else {
                self.chunk_size - self.pos_read
            };
            let n = available.min(target.len() - delivered);
            if let Some(head) = self.chunks.front() {
                target[delivered..delivered + n]
                    .copy_from_slice(&head[self.pos_read..self.pos_read + n]);
            }
            self.pos_read += n;
            delivered += n;
        }

        // A fully drained single chunk is recycled as empty.
        if self.chunks.len() == 1 && self.pos_read == self.pos_write {
            self.chunks.clear();
            self.pos_read = 0;
            self.pos_write = 0;
        }
        delivered
    }

    /// Total buffered bytes, derived from the chunk count and both cursors.
    pub fn size(&self) -> usize {
        if self.chunks.is_empty() {
            return 0;
        }
        self.chunk_size * self.chunks.len() - self.pos_read - (self.chunk_size - self.pos_write)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.pos_read = 0;
        self.pos_write = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_buffer() {
        let mut buffer = ResponseBuffer::new();
        let mut out = [0u8; 8];
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.consume(&mut out), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_feed_spans_chunks() {
        let mut buffer = ResponseBuffer::with_chunk_size(3);
        buffer.feed(b"abcdefgh");
        assert_eq!(buffer.size(), 8);

        let mut out = vec![0u8; 8];
        assert_eq!(buffer.consume(&mut out), 8);
        assert_eq!(&out, b"abcdefgh");
        assert_eq!(buffer.size(), 0);
    }

    #[test]
    fn test_consume_less_than_requested() {
        let mut buffer = ResponseBuffer::with_chunk_size(4);
        buffer.feed(b"xyz");
        let mut out = [0u8; 10];
        assert_eq!(buffer.consume(&mut out), 3);
        assert_eq!(&out[..3], b"xyz");
    }

    #[test]
    fn test_interleaved_feed_and_consume() {
        let mut buffer = ResponseBuffer::with_chunk_size(4);
        buffer.feed(b"0123");
        let mut out = [0u8; 2];
        assert_eq!(buffer.consume(&mut out), 2);
        assert_eq!(&out, b"01");
        buffer.feed(b"4567");
        assert_eq!(buffer.size(), 6);

        let mut rest = [0u8; 6];
        assert_eq!(buffer.consume(&mut rest), 6);
        assert_eq!(&rest, b"234567");
    }

    #[test]
    fn test_reuse_after_drain() {
        let mut buffer = ResponseBuffer::with_chunk_size(4);
        buffer.feed(b"ab");
        let mut out = [0u8; 2];
        buffer.consume(&mut out);
        buffer.feed(b"cd");
        assert_eq!(buffer.size(), 2);
        buffer.consume(&mut out);
        assert_eq!(&out, b"cd");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Feed(Vec<u8>),
        Consume(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(Op::Feed),
            (0usize..80).prop_map(Op::Consume),
        ]
    }

    proptest! {
        #[test]
        fn prop_size_tracks_fed_minus_consumed(
            chunk_size in 1usize..17,
            ops in proptest::collection::vec(op_strategy(), 0..64),
        ) {
            let mut buffer = ResponseBuffer::with_chunk_size(chunk_size);
            let mut model: std::collections::VecDeque<u8> = Default::default();

            for op in ops {
                match op {
                    Op::Feed(data) => {
                        buffer.feed(&data);
                        model.extend(data.iter().copied());
                    }
                    Op::Consume(n) => {
                        let before = buffer.size();
                        let mut out = vec![0u8; n];
                        let got = buffer.consume(&mut out);
                        prop_assert!(got <= before);
                        prop_assert_eq!(got, n.min(before));
                        let expected: Vec<u8> = model.drain(..got).collect();
                        prop_assert_eq!(&out[..got], &expected[..]);
                    }
                }
                prop_assert_eq!(buffer.size(), model.len());
            }
        }
    }
}
