use std::collections::VecDeque;

/// Byte-capped FIFO of raw terminal output chunks.
///
/// Unlike the line-oriented [`super::RingBuffer`], this retains the exact
/// byte stream - cursor movement, erase sequences and all - so a
/// reconnecting observer's terminal can be restored to the precise visual
/// state the session is in.
#[derive(Debug, Clone)]
pub struct RawReplayBuffer {
    chunks: VecDeque<Vec<u8>>,
    total: usize,
    max_bytes: usize,
}

impl RawReplayBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            total: 0,
            max_bytes,
        }
    }

    /// Append a chunk, evicting from the front while over the cap.
    ///
    /// A single chunk larger than the cap is kept alone rather than split;
    /// splitting mid-escape-sequence would corrupt replay.
    pub fn write(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.total += data.len();
        self.chunks.push_back(data.to_vec());

        while self.total > self.max_bytes && self.chunks.len() > 1 {
            if let Some(removed) = self.chunks.pop_front() {
                self.total = self.total.saturating_sub(removed.len());
            }
        }
    }

    /// All retained bytes, concatenated in arrival order.
    pub fn read(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    pub fn total_bytes(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_in_order() {
        let mut buf = RawReplayBuffer::new(1024);
        buf.write(b"hello ");
        buf.write(b"world");
        assert_eq!(buf.read(), b"hello world");
    }

    #[test]
    fn evicts_from_front_when_over_cap() {
        let mut buf = RawReplayBuffer::new(10);
        buf.write(b"aaaa");
        buf.write(b"bbbb");
        buf.write(b"cccc");
        // 12 bytes > 10: "aaaa" evicted
        assert_eq!(buf.read(), b"bbbbcccc");
        assert!(buf.total_bytes() <= 10);
    }

    #[test]
    fn total_never_exceeds_cap_with_multiple_chunks() {
        let mut buf = RawReplayBuffer::new(64);
        for _ in 0..100 {
            buf.write(&[0u8; 16]);
            assert!(buf.total_bytes() <= 64);
        }
    }

    #[test]
    fn single_oversized_chunk_kept_alone() {
        let mut buf = RawReplayBuffer::new(8);
        buf.write(&[1u8; 100]);
        assert_eq!(buf.total_bytes(), 100);
        assert_eq!(buf.read().len(), 100);

        // The next write displaces the oversized chunk
        buf.write(b"xy");
        assert_eq!(buf.read(), b"xy");
    }

    #[test]
    fn empty_writes_ignored() {
        let mut buf = RawReplayBuffer::new(8);
        buf.write(b"");
        assert!(buf.is_empty());
        assert_eq!(buf.total_bytes(), 0);
    }
}
