//! Bounded history of recent stream chunks

use bytes::Bytes;
use std::io;

/// Fixed-capacity ring of byte blocks.
///
/// Every write stores one whole chunk; once the ring is full the oldest
/// chunk is overwritten. Replay yields the surviving chunks oldest first.
pub struct RingWriter {
    blocks: Vec<Bytes>,
    /// next slot to overwrite, which is also the oldest entry
    head: usize,
}

// === impl RingWriter ===

impl RingWriter {
    /// Creates a ring holding up to `capacity` chunks.
    pub fn new(capacity: usize) -> Self {
        Self { blocks: vec![Bytes::new(); capacity.max(1)], head: 0 }
    }

    /// Stores a copy of `chunk`, overwriting the oldest slot when full.
    pub fn write(&mut self, chunk: &[u8]) {
        // copied because callers reuse their buffers
        self.blocks[self.head] = Bytes::copy_from_slice(chunk);
        self.head = (self.head + 1) % self.blocks.len();
    }

    /// Iterates the stored chunks from oldest to newest, skipping unused
    /// slots.
    pub fn replay(&self) -> impl Iterator<Item = &Bytes> {
        let (newer, older) = self.blocks.split_at(self.head);
        older.iter().chain(newer.iter()).filter(|chunk| !chunk.is_empty())
    }

    /// Writes the stored chunks oldest first into `sink`, stopping at the
    /// first failed write.
    pub fn write_to<W: io::Write>(&self, sink: &mut W) -> io::Result<usize> {
        let mut total = 0;
        for chunk in self.replay() {
            sink.write_all(chunk)?;
            total += chunk.len();
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn contents(ring: &RingWriter) -> Vec<&[u8]> {
        ring.replay().map(|chunk| chunk.as_ref()).collect()
    }

    #[test]
    fn replays_in_write_order() {
        let mut ring = RingWriter::new(4);
        ring.write(b"a");
        ring.write(b"b");
        assert_eq!(contents(&ring), vec![b"a" as &[u8], b"b"]);
    }

    #[test]
    fn overwrites_the_oldest_when_full() {
        let mut ring = RingWriter::new(3);
        for chunk in [b"1", b"2", b"3", b"4", b"5"] {
            ring.write(chunk);
        }
        assert_eq!(contents(&ring), vec![b"3" as &[u8], b"4", b"5"]);
    }

    #[test]
    fn write_to_concatenates_the_history() {
        let mut ring = RingWriter::new(2);
        ring.write(b"A\n");
        ring.write(b"B\n");

        let mut out = Vec::new();
        let written = ring.write_to(&mut out).unwrap();
        assert_eq!(out, b"A\nB\n");
        assert_eq!(written, 4);
    }

    #[test]
    fn write_to_short_circuits_on_failure() {
        struct Broken;
        impl io::Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "viewer gone"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut ring = RingWriter::new(2);
        ring.write(b"A\n");
        ring.write(b"B\n");
        assert!(ring.write_to(&mut Broken).is_err());
    }
}
