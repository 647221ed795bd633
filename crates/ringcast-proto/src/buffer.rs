//! In-memory chunk table shared by both peers.
//!
//! The sender fills it once from its input stream and then only reads it; the
//! receiver starts empty and fills slots as verified messages arrive. A slot
//! is occupied when its chunk carries a non-zero sequence number, which by
//! construction always equals slot index + 1.

use anyhow::Result;
use std::io::{Read, Write};

use crate::codec::{self, Codec, RawMessage, CHUNK_SIZE};
use crate::AllocError;

/// One fixed-size payload fragment.
#[derive(Clone, Copy)]
pub struct Chunk {
    /// 1-based sequence number; 0 marks an unused slot.
    pub seq: u16,
    /// Return code stamped by the sender, surfaced as the receiver exit code.
    pub value: u8,
    pub data: [u8; CHUNK_SIZE],
}

impl Chunk {
    const fn empty() -> Self {
        Self { seq: 0, value: 0, data: [0u8; CHUNK_SIZE] }
    }

    pub fn is_filled(&self) -> bool {
        self.seq != 0
    }
}

/// Outcome of feeding one received datagram into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// New chunk stored.
    Fresh,
    /// Slot already occupied; nothing changed.
    Duplicate,
    /// Checksum mismatch; dropped.
    Corrupt,
    /// Sequence number or chunk count outside the local table; dropped.
    OutOfRange,
}

pub struct Buffer {
    length: u32,
    nchunks: u32,
    /// Sequence of the most recently stored chunk. A fresh chunk below it
    /// means the sender has wrapped into a new cycle; observed, never acted on.
    last_seq: u16,
    chunks: Vec<Chunk>,
}

impl Buffer {
    /// Allocate a zeroed table of `maxchunks` slots.
    pub fn new(maxchunks: u32) -> Result<Self> {
        if maxchunks == 0 || maxchunks > u16::MAX as u32 {
            anyhow::bail!("chunk table size {} outside 1..={}", maxchunks, u16::MAX);
        }
        let mut chunks = Vec::new();
        chunks
            .try_reserve_exact(maxchunks as usize)
            .map_err(|_| AllocError("chunk table"))?;
        chunks.resize(maxchunks as usize, Chunk::empty());
        Ok(Self { length: 0, nchunks: 0, last_seq: 0, chunks })
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn nchunks(&self) -> u32 {
        self.nchunks
    }

    pub fn maxchunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn chunk(&self, index: usize) -> &Chunk {
        &self.chunks[index]
    }

    /// Sender-side init: read `src` to end-of-input, splitting it into
    /// numbered chunks stamped with `value`. Fails if the stream holds more
    /// than `maxchunks` chunks.
    pub fn fill_from(&mut self, src: &mut dyn Read, value: u8) -> Result<()> {
        let mut total = 0u64;
        let mut i = 0usize;
        loop {
            if i == self.chunks.len() {
                let mut probe = [0u8; 1];
                if read_full(src, &mut probe)? > 0 {
                    anyhow::bail!(
                        "input exceeds the chunk table, stopped after {} chunks",
                        self.chunks.len()
                    );
                }
                break;
            }
            let got = read_full(src, &mut self.chunks[i].data)?;
            if got == 0 {
                break;
            }
            self.chunks[i].seq = (i + 1) as u16;
            self.chunks[i].value = value;
            total += got as u64;
            i += 1;
            if got < CHUNK_SIZE {
                break;
            }
        }
        self.nchunks = i as u32;
        self.length = total as u32;
        tracing::debug!(chunks = self.nchunks, bytes = self.length, "payload loaded");
        Ok(())
    }

    /// Feed one received datagram into the table. Range and duplicate checks
    /// come before the checksum so repeats of an already-stored chunk are
    /// rejected cheaply; header fields are trusted once the CRC matches.
    pub fn accept(&mut self, codec: &Codec, raw: &mut RawMessage) -> Accept {
        let seq = codec::peek_seq(raw);
        if seq == 0 || seq as usize > self.chunks.len() {
            tracing::debug!(seq, "chunk number out of range");
            return Accept::OutOfRange;
        }
        if self.chunks[seq as usize - 1].is_filled() {
            return Accept::Duplicate;
        }

        let Some(decoded) = codec.verify(raw) else {
            return Accept::Corrupt;
        };
        if decoded.nchunks as usize > self.chunks.len() {
            tracing::debug!(nchunks = decoded.nchunks, "chunk count exceeds the local table");
            return Accept::OutOfRange;
        }

        if decoded.seq < self.last_seq {
            tracing::debug!(seq = decoded.seq, "entering a new cycle from the sender");
        }
        self.last_seq = decoded.seq;
        self.length = decoded.length;
        self.nchunks = decoded.nchunks;

        let slot = &mut self.chunks[decoded.seq as usize - 1];
        slot.seq = decoded.seq;
        slot.value = decoded.value;
        slot.data.copy_from_slice(decoded.data);
        Accept::Fresh
    }

    /// True once every slot of the declared payload is occupied.
    pub fn is_complete(&self) -> bool {
        self.chunks[..self.nchunks as usize].iter().all(Chunk::is_filled)
    }

    /// Write the payload to `sink`, trimming the last chunk to the declared
    /// total length.
    pub fn flush(&self, sink: &mut dyn Write) -> std::io::Result<()> {
        for i in 0..self.nchunks as usize {
            let start = i as u64 * CHUNK_SIZE as u64;
            let take = (self.length as u64).saturating_sub(start).min(CHUNK_SIZE as u64);
            sink.write_all(&self.chunks[i].data[..take as usize])?;
        }
        sink.flush()
    }

    /// Drop the chunk table.
    pub fn release(&mut self) {
        self.chunks = Vec::new();
        self.nchunks = 0;
    }
}

/// Read until `buf` is full or the stream ends; returns the bytes read.
fn read_full(src: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MESSAGE_SIZE;
    use std::io::Cursor;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 241) as u8).collect()
    }

    fn sender_buffer(bytes: &[u8], maxchunks: u32) -> Buffer {
        let mut buf = Buffer::new(maxchunks).unwrap();
        buf.fill_from(&mut Cursor::new(bytes.to_vec()), 0).unwrap();
        buf
    }

    /// Frame every chunk of `src` into raw messages.
    fn frames(codec: &Codec, src: &Buffer) -> Vec<RawMessage> {
        (0..src.nchunks() as usize)
            .map(|i| {
                let mut raw = [0u8; MESSAGE_SIZE];
                codec.frame(src, i, &mut raw);
                raw
            })
            .collect()
    }

    #[test]
    fn test_fill_flush_round_trip() {
        // Length deliberately not a chunk multiple; no trailing padding allowed.
        let bytes = payload(2 * CHUNK_SIZE + 100);
        let buf = sender_buffer(&bytes, 10);
        assert_eq!(buf.length(), bytes.len() as u32);
        assert_eq!(buf.nchunks(), 3);

        let mut out = Vec::new();
        buf.flush(&mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_fill_exact_multiple() {
        let bytes = payload(2 * CHUNK_SIZE);
        let buf = sender_buffer(&bytes, 2);
        assert_eq!(buf.nchunks(), 2);
        let mut out = Vec::new();
        buf.flush(&mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_fill_empty_stream() {
        let buf = sender_buffer(&[], 4);
        assert_eq!(buf.nchunks(), 0);
        assert_eq!(buf.length(), 0);
    }

    #[test]
    fn test_fill_overflow_rejected() {
        let mut buf = Buffer::new(2).unwrap();
        let bytes = payload(3 * CHUNK_SIZE);
        assert!(buf.fill_from(&mut Cursor::new(bytes), 0).is_err());
    }

    #[test]
    fn test_wire_round_trip_and_completion() {
        let codec = Codec::new();
        let bytes = payload(2 * CHUNK_SIZE + 100);
        let src = sender_buffer(&bytes, 10);

        let mut dst = Buffer::new(10).unwrap();
        for raw in &frames(&codec, &src) {
            let mut raw = *raw;
            assert_eq!(dst.accept(&codec, &mut raw), Accept::Fresh);
        }
        assert!(dst.is_complete());

        let mut out = Vec::new();
        dst.flush(&mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_out_of_order_arrival_completes() {
        let codec = Codec::new();
        let src = sender_buffer(&payload(3 * CHUNK_SIZE), 8);
        let msgs = frames(&codec, &src);

        let mut dst = Buffer::new(8).unwrap();
        for i in [2usize, 0, 1] {
            let mut raw = msgs[i];
            assert_eq!(dst.accept(&codec, &mut raw), Accept::Fresh);
        }
        assert!(dst.is_complete());
    }

    #[test]
    fn test_duplicate_is_idempotent() {
        let codec = Codec::new();
        let src = sender_buffer(&payload(CHUNK_SIZE + 5), 4);
        let msgs = frames(&codec, &src);

        let mut dst = Buffer::new(4).unwrap();
        let mut raw = msgs[0];
        assert_eq!(dst.accept(&codec, &mut raw), Accept::Fresh);
        let snapshot = dst.chunk(0).data;

        // Second copy of the same chunk: classified duplicate, no mutation.
        let mut raw = msgs[0];
        assert_eq!(dst.accept(&codec, &mut raw), Accept::Duplicate);
        assert_eq!(dst.chunk(0).data, snapshot);
        assert_eq!(dst.nchunks(), 2);
        assert!(!dst.is_complete());
    }

    #[test]
    fn test_second_cycle_all_duplicates_single_flush() {
        let codec = Codec::new();
        let bytes = payload(2 * CHUNK_SIZE + 100);
        let src = sender_buffer(&bytes, 8);
        let msgs = frames(&codec, &src);

        let mut dst = Buffer::new(8).unwrap();
        for raw in &msgs {
            let mut raw = *raw;
            assert_eq!(dst.accept(&codec, &mut raw), Accept::Fresh);
        }
        for raw in &msgs {
            let mut raw = *raw;
            assert_eq!(dst.accept(&codec, &mut raw), Accept::Duplicate);
        }
        assert!(dst.is_complete());
        let mut out = Vec::new();
        dst.flush(&mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_corrupt_message_dropped() {
        let codec = Codec::new();
        let src = sender_buffer(&payload(100), 4);
        let mut raw = frames(&codec, &src)[0];
        raw[200] ^= 0x40;

        let mut dst = Buffer::new(4).unwrap();
        assert_eq!(dst.accept(&codec, &mut raw), Accept::Corrupt);
        assert!(!dst.chunk(0).is_filled());
    }

    #[test]
    fn test_out_of_range_seq_dropped() {
        let codec = Codec::new();
        // Source table larger than the destination: chunk 3 has no slot there.
        let src = sender_buffer(&payload(3 * CHUNK_SIZE), 8);
        let mut raw = [0u8; MESSAGE_SIZE];
        codec.frame(&src, 2, &mut raw);

        let mut dst = Buffer::new(2).unwrap();
        assert_eq!(dst.accept(&codec, &mut raw), Accept::OutOfRange);
    }

    #[test]
    fn test_oversized_nchunks_dropped() {
        let codec = Codec::new();
        let src = sender_buffer(&payload(3 * CHUNK_SIZE), 8);
        let mut raw = [0u8; MESSAGE_SIZE];
        codec.frame(&src, 0, &mut raw);

        // seq 1 fits the two-slot table but the declared count cannot.
        let mut dst = Buffer::new(2).unwrap();
        assert_eq!(dst.accept(&codec, &mut raw), Accept::OutOfRange);
        assert_eq!(dst.nchunks(), 0);
    }

    #[test]
    fn test_completion_is_monotonic() {
        let codec = Codec::new();
        let src = sender_buffer(&payload(4 * CHUNK_SIZE), 8);
        let msgs = frames(&codec, &src);

        let mut dst = Buffer::new(8).unwrap();
        let mut transitions = 0;
        let mut complete = false;
        for raw in &msgs {
            let mut raw = *raw;
            dst.accept(&codec, &mut raw);
            let now = dst.is_complete();
            if now != complete {
                transitions += 1;
                complete = now;
            }
        }
        assert!(complete);
        assert_eq!(transitions, 1);
    }

    #[test]
    fn test_new_buffer_rejects_bad_sizes() {
        assert!(Buffer::new(0).is_err());
        assert!(Buffer::new(u16::MAX as u32 + 1).is_err());
    }
}
