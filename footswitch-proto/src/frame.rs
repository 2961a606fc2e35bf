//! Chunked SysEx framing.
//!
//! A message body is the payload followed by its CRC-8, nibble-encoded so every
//! byte stays below 0x80. Bodies larger than one chunk are split across frames:
//!
//! ```text
//! <start> <prefix...> <field0 hi lo> <field1 hi lo> <field2 hi lo> <body nibbles...> <end>
//! ```
//!
//! The header carries the message id, chunk index and chunk total, each as a
//! nibble pair, in the order given by [`FrameLayout::header`]. Every chunk but
//! the last carries exactly [`FrameLayout::chunk_nibbles`] body bytes.

use heapless::Vec;

use crate::crc::checksum;
use crate::nibble::{decode_into, encode_into, join, split};
use crate::CodecError;

/// Largest payload, in bytes, before CRC and nibble encoding.
pub const MAX_MESSAGE_LEN: usize = 512;

/// Largest encoded frame including markers and header.
pub const MAX_FRAME_LEN: usize = 128;

/// Chunks per message, bounded by the reassembly bitmask.
pub const MAX_CHUNKS: usize = 64;

const HEADER_LEN: usize = 6;

/// One encoded frame.
pub type Frame = Vec<u8, MAX_FRAME_LEN>;

/// Fields carried in the chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaderField {
    MessageId,
    Index,
    Total,
}

/// Byte layout of a chunk frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameLayout {
    pub start: u8,
    pub end: u8,
    /// Fixed bytes after the start marker (manufacturer id, device id, command).
    pub prefix: &'static [u8],
    pub header: [HeaderField; 3],
    /// Body bytes per chunk. Must be even.
    pub chunk_nibbles: usize,
}

impl FrameLayout {
    /// Provisional layout: chunk total, chunk index, message id, 32 payload bytes per chunk.
    ///
    /// The device documentation does not pin the header order down, so targets
    /// that disagree should pass their own layout.
    pub const DEFAULT: Self = Self {
        start: 0xF0,
        end: 0xF7,
        prefix: &[],
        header: [HeaderField::Total, HeaderField::Index, HeaderField::MessageId],
        chunk_nibbles: 64,
    };

    /// Bytes per frame that are not body.
    #[inline]
    #[must_use]
    pub const fn overhead(&self) -> usize {
        2 + self.prefix.len() + HEADER_LEN
    }

    /// Number of chunks needed for a payload of `payload_len` bytes.
    #[inline]
    #[must_use]
    pub const fn chunk_count(&self, payload_len: usize) -> usize {
        ((payload_len + 1) * 2).div_ceil(self.chunk_nibbles)
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        if self.chunk_nibbles == 0
            || self.chunk_nibbles % 2 != 0
            || self.overhead() + self.chunk_nibbles > MAX_FRAME_LEN
            || self.prefix.iter().any(|&b| b >= 0x80)
        {
            return Err(CodecError::Layout);
        }
        let [a, b, c] = self.header;
        if a == b || b == c || a == c {
            return Err(CodecError::Layout);
        }
        Ok(())
    }
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Decoded chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChunkHeader {
    pub message_id: u8,
    pub index: u8,
    pub total: u8,
}

/// A complete, checksum-verified message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u8,
    pub payload: Vec<u8, MAX_MESSAGE_LEN>,
}

/// Split `payload` into frames. Frames are produced lazily by the returned iterator.
pub fn encode<'a>(
    layout: &'a FrameLayout,
    message_id: u8,
    payload: &'a [u8],
) -> Result<Chunks<'a>, CodecError> {
    layout.validate()?;
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(CodecError::PayloadTooLarge);
    }
    let total = layout.chunk_count(payload.len());
    if total > MAX_CHUNKS {
        return Err(CodecError::PayloadTooLarge);
    }
    Ok(Chunks {
        layout,
        payload,
        checksum: checksum(payload),
        message_id,
        index: 0,
        total,
    })
}

/// Iterator over the frames of one message.
pub struct Chunks<'a> {
    layout: &'a FrameLayout,
    payload: &'a [u8],
    checksum: u8,
    message_id: u8,
    index: usize,
    total: usize,
}

impl Chunks<'_> {
    /// Frames in the whole message, known before any frame is built.
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    fn frame(&self, index: usize) -> Option<Frame> {
        let layout = self.layout;
        let body_len = (self.payload.len() + 1) * 2;
        let from = index * layout.chunk_nibbles;
        let to = (from + layout.chunk_nibbles).min(body_len);

        let mut frame = Frame::new();
        frame.push(layout.start).ok()?;
        frame.extend_from_slice(layout.prefix).ok()?;
        for field in layout.header {
            let value = match field {
                HeaderField::MessageId => self.message_id,
                HeaderField::Index => index as u8,
                HeaderField::Total => self.total as u8,
            };
            frame.extend_from_slice(&split(value)).ok()?;
        }

        // Chunk boundaries are even, so every chunk holds whole body bytes
        let (first, last) = (from / 2, to / 2);
        let data = self.payload.get(first..last.min(self.payload.len())).unwrap_or(&[]);
        let mut body = [0u8; MAX_FRAME_LEN];
        let mut len = encode_into(data, &mut body).ok()?;
        if last > self.payload.len() {
            len += encode_into(&[self.checksum], &mut body[len..]).ok()?;
        }
        frame.extend_from_slice(&body[..len]).ok()?;
        frame.push(layout.end).ok()?;
        Some(frame)
    }
}

impl Iterator for Chunks<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.index >= self.total {
            return None;
        }
        let frame = self.frame(self.index);
        self.index += 1;
        frame
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.index;
        (left, Some(left))
    }
}

/// Check markers and prefix, decode the header, and return the body nibbles.
pub fn parse_chunk<'f>(
    layout: &FrameLayout,
    frame: &'f [u8],
) -> Result<(ChunkHeader, &'f [u8]), CodecError> {
    if frame.len() < layout.overhead() + 2 {
        return Err(CodecError::Framing);
    }
    if frame[0] != layout.start || frame[frame.len() - 1] != layout.end {
        return Err(CodecError::Framing);
    }
    let inner = &frame[1..frame.len() - 1];
    let (prefix, rest) = inner.split_at(layout.prefix.len());
    if prefix != layout.prefix {
        return Err(CodecError::Framing);
    }
    let (head, body) = rest.split_at(HEADER_LEN);

    let mut header = ChunkHeader {
        message_id: 0,
        index: 0,
        total: 0,
    };
    for (field, pair) in layout.header.iter().zip(head.chunks_exact(2)) {
        let value = join(pair[0], pair[1])?;
        match field {
            HeaderField::MessageId => header.message_id = value,
            HeaderField::Index => header.index = value,
            HeaderField::Total => header.total = value,
        }
    }
    if header.total == 0 || header.index >= header.total || header.total as usize > MAX_CHUNKS {
        return Err(CodecError::Header);
    }

    let last = header.index + 1 == header.total;
    if body.len() % 2 != 0
        || body.len() > layout.chunk_nibbles
        || (!last && body.len() != layout.chunk_nibbles)
    {
        return Err(CodecError::Framing);
    }
    Ok((header, body))
}

/// Split a verified body into payload, checking the trailing CRC.
fn verify(id: u8, body: &[u8]) -> Result<Message, CodecError> {
    let Some((&crc, data)) = body.split_last() else {
        return Err(CodecError::Framing);
    };
    if checksum(data) != crc {
        return Err(CodecError::Checksum);
    }
    let payload = Vec::from_slice(data).map_err(|_| CodecError::PayloadTooLarge)?;
    Ok(Message { id, payload })
}

/// Decode a message that fits in a single frame.
pub fn decode_frame(layout: &FrameLayout, frame: &[u8]) -> Result<Message, CodecError> {
    let (header, nibbles) = parse_chunk(layout, frame)?;
    if header.total != 1 {
        return Err(CodecError::Header);
    }
    let mut body = [0u8; MAX_FRAME_LEN / 2];
    let len = decode_into(nibbles, &mut body)?;
    verify(header.message_id, &body[..len])
}

struct Slot {
    id: u8,
    total: u8,
    received: u64,
    stamp: u32,
    /// Body length, known once the last chunk is in.
    len: Option<usize>,
    body: [u8; MAX_MESSAGE_LEN + 1],
}

/// Buffers chunks per message id until every chunk has arrived, in any order.
///
/// A partial message stays buffered until it completes or is evicted: with
/// every slot busy, a chunk for a new message evicts the slot that was touched
/// least recently.
pub struct Reassembler<const SLOTS: usize> {
    layout: FrameLayout,
    slots: [Option<Slot>; SLOTS],
    clock: u32,
}

impl<const SLOTS: usize> Reassembler<SLOTS> {
    #[must_use]
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            slots: core::array::from_fn(|_| None),
            clock: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Messages with at least one chunk buffered.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Drop every partially received message.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    /// Feed one frame. Returns the message once all of its chunks have arrived.
    ///
    /// Any error discards the partially received message the frame belonged to.
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<Message>, CodecError> {
        let (header, nibbles) = parse_chunk(&self.layout, frame)?;
        self.clock = self.clock.wrapping_add(1);
        let pos = self.slot_index(header)?;

        let result = self.store(pos, header, nibbles);
        if result.is_err() {
            self.slots[pos] = None;
        }
        result
    }

    fn slot_index(&mut self, header: ChunkHeader) -> Result<usize, CodecError> {
        let existing = self
            .slots
            .iter()
            .position(|s| matches!(s, Some(s) if s.id == header.message_id));
        let pos = existing
            .or_else(|| self.slots.iter().position(Option::is_none))
            .or_else(|| {
                self.slots
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, s)| s.as_ref().map_or(0, |s| s.stamp))
                    .map(|(i, _)| i)
            })
            .ok_or(CodecError::Layout)?;

        let stale = match &self.slots[pos] {
            Some(slot) => slot.id != header.message_id || slot.total != header.total,
            None => true,
        };
        if stale {
            self.slots[pos] = Some(Slot {
                id: header.message_id,
                total: header.total,
                received: 0,
                stamp: self.clock,
                len: None,
                body: [0; MAX_MESSAGE_LEN + 1],
            });
        }
        Ok(pos)
    }

    fn store(
        &mut self,
        pos: usize,
        header: ChunkHeader,
        nibbles: &[u8],
    ) -> Result<Option<Message>, CodecError> {
        let offset = header.index as usize * self.layout.chunk_nibbles / 2;
        let len = nibbles.len() / 2;
        let Some(slot) = self.slots[pos].as_mut() else {
            return Err(CodecError::Layout);
        };
        let dest = slot
            .body
            .get_mut(offset..offset + len)
            .ok_or(CodecError::PayloadTooLarge)?;
        decode_into(nibbles, dest)?;
        slot.received |= 1 << header.index;
        slot.stamp = self.clock;
        if header.index + 1 == header.total {
            slot.len = Some(offset + len);
        }

        let full = if slot.total as usize == MAX_CHUNKS {
            u64::MAX
        } else {
            (1u64 << slot.total) - 1
        };
        if slot.received != full {
            return Ok(None);
        }
        let Some(slot) = self.slots[pos].take() else {
            return Err(CodecError::Layout);
        };
        let body_len = slot.len.ok_or(CodecError::Incomplete)?;
        verify(slot.id, &slot.body[..body_len]).map(Some)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::vec::Vec as StdVec;

    fn frames(layout: &FrameLayout, id: u8, payload: &[u8]) -> StdVec<Frame> {
        encode(layout, id, payload).unwrap().collect()
    }

    fn payload(len: usize) -> StdVec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_single_frame_round_trip() {
        let layout = FrameLayout::DEFAULT;
        let data = [0x01, 0x02, 0xFE];
        let out = frames(&layout, 9, &data);
        assert_eq!(out.len(), 1);

        let frame = &out[0];
        assert_eq!(frame[0], 0xF0);
        assert_eq!(*frame.last().unwrap(), 0xF7);
        // total=1, index=0, id=9
        assert_eq!(&frame[1..7], &[0, 1, 0, 0, 0, 9]);
        assert!(frame[1..frame.len() - 1].iter().all(|&b| b <= 0x0F));

        let msg = decode_frame(&layout, frame).unwrap();
        assert_eq!(msg.id, 9);
        assert_eq!(msg.payload.as_slice(), &data);
    }

    #[test]
    fn test_crc_is_last_body_byte() {
        let layout = FrameLayout::DEFAULT;
        let out = frames(&layout, 0, b"123456789");
        let frame = &out[0];
        let n = frame.len();
        // 0xF4 encoded as 0x0F, 0x04 right before the end marker
        assert_eq!(&frame[n - 3..n - 1], &[0x0F, 0x04]);
    }

    #[test]
    fn test_multi_chunk_reassembly() {
        let layout = FrameLayout::DEFAULT;
        let data = payload(100);
        let out = frames(&layout, 3, &data);
        assert_eq!(out.len(), 4);

        let mut rx = Reassembler::<2>::new(layout);
        for frame in &out[..3] {
            assert_eq!(rx.push(frame), Ok(None));
        }
        assert_eq!(rx.pending(), 1);
        let msg = rx.push(&out[3]).unwrap().unwrap();
        assert_eq!(msg.id, 3);
        assert_eq!(msg.payload.as_slice(), data.as_slice());
        assert_eq!(rx.pending(), 0);
    }

    #[test]
    fn test_out_of_order_chunks() {
        let layout = FrameLayout::DEFAULT;
        let data = payload(80);
        let out = frames(&layout, 1, &data);
        assert_eq!(out.len(), 3);

        let mut rx = Reassembler::<1>::new(layout);
        assert_eq!(rx.push(&out[1]), Ok(None));
        assert_eq!(rx.push(&out[0]), Ok(None));
        let msg = rx.push(&out[2]).unwrap().unwrap();
        assert_eq!(msg.payload.as_slice(), data.as_slice());
    }

    #[test]
    fn test_total_counts_every_frame_up_front() {
        let layout = FrameLayout::DEFAULT;
        for len in [0, 31, 32, 100, MAX_MESSAGE_LEN] {
            let data = payload(len);
            let mut chunks = encode(&layout, 0, &data).unwrap();
            let total = chunks.total();
            assert_eq!(chunks.size_hint(), (total, Some(total)));
            chunks.next();
            // Taking frames does not change the message size
            assert_eq!(chunks.total(), total);
            assert_eq!(chunks.count(), total - 1);
        }
    }

    #[test]
    fn test_late_middle_chunk_completes_message() {
        let layout = FrameLayout::DEFAULT;
        let data = payload(100);
        let out = frames(&layout, 5, &data);

        let mut rx = Reassembler::<2>::new(layout);
        rx.push(&out[0]).unwrap();
        rx.push(&out[2]).unwrap();
        // Final chunk ahead of chunk 1 keeps the message open
        assert_eq!(rx.push(&out[3]), Ok(None));
        assert_eq!(rx.pending(), 1);
        let msg = rx.push(&out[1]).unwrap().unwrap();
        assert_eq!(msg.payload.as_slice(), data.as_slice());
        assert_eq!(rx.pending(), 0);
    }

    #[test]
    fn test_corrupted_payload_fails_checksum() {
        let layout = FrameLayout::DEFAULT;
        let mut out = frames(&layout, 2, &payload(40));
        // Flip a body nibble in the first chunk
        out[0][8] ^= 0x01;

        let mut rx = Reassembler::<2>::new(layout);
        rx.push(&out[0]).unwrap();
        assert_eq!(rx.push(&out[1]), Err(CodecError::Checksum));
    }

    #[test]
    fn test_interleaved_messages() {
        let layout = FrameLayout::DEFAULT;
        let a = payload(70);
        let b: StdVec<u8> = payload(70).iter().map(|x| x ^ 0x55).collect();
        let fa = frames(&layout, 1, &a);
        let fb = frames(&layout, 2, &b);

        let mut rx = Reassembler::<2>::new(layout);
        rx.push(&fa[0]).unwrap();
        rx.push(&fb[0]).unwrap();
        rx.push(&fb[1]).unwrap();
        rx.push(&fa[1]).unwrap();
        let mb = rx.push(&fb[2]).unwrap().unwrap();
        let ma = rx.push(&fa[2]).unwrap().unwrap();
        assert_eq!(ma.payload.as_slice(), a.as_slice());
        assert_eq!(mb.payload.as_slice(), b.as_slice());
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let layout = FrameLayout::DEFAULT;
        let fa = frames(&layout, 1, &payload(70));
        let fb = frames(&layout, 2, &payload(70));

        let fc = frames(&layout, 3, &payload(70));

        let mut rx = Reassembler::<1>::new(layout);
        rx.push(&fa[0]).unwrap();
        // Message 2 takes the only slot and completes
        rx.push(&fb[0]).unwrap();
        rx.push(&fb[1]).unwrap();
        assert!(rx.push(&fb[2]).unwrap().is_some());

        // Message 1 lost its first chunk and never completes
        assert_eq!(rx.push(&fa[1]), Ok(None));
        assert_eq!(rx.push(&fa[2]), Ok(None));
        assert_eq!(rx.pending(), 1);

        // Until a new message pushes it out
        assert_eq!(rx.push(&fc[0]), Ok(None));
        assert_eq!(rx.push(&fa[0]), Ok(None));
        assert_eq!(rx.pending(), 1);
    }

    #[test]
    fn test_custom_layout_with_prefix() {
        static PREFIX: [u8; 3] = [0x00, 0x21, 0x7F];
        let layout = FrameLayout {
            prefix: &PREFIX,
            header: [HeaderField::MessageId, HeaderField::Total, HeaderField::Index],
            chunk_nibbles: 16,
            ..FrameLayout::DEFAULT
        };
        let data = payload(20);
        let out = frames(&layout, 0x42, &data);
        assert_eq!(out.len(), 3);
        assert_eq!(&out[0][1..4], &PREFIX);
        assert_eq!(&out[0][4..6], &[0x04, 0x02]);

        let mut rx = Reassembler::<1>::new(layout);
        let mut result = None;
        for frame in &out {
            result = rx.push(frame).unwrap();
        }
        assert_eq!(result.unwrap().payload.as_slice(), data.as_slice());

        // Wrong prefix is rejected
        assert_eq!(
            rx.push(&frames(&FrameLayout::DEFAULT, 0x42, &data)[0]),
            Err(CodecError::Framing)
        );
    }

    #[test]
    fn test_rejects_bad_layouts() {
        let odd = FrameLayout {
            chunk_nibbles: 15,
            ..FrameLayout::DEFAULT
        };
        assert!(matches!(encode(&odd, 0, &[1]), Err(CodecError::Layout)));

        let duplicate = FrameLayout {
            header: [HeaderField::Index, HeaderField::Index, HeaderField::Total],
            ..FrameLayout::DEFAULT
        };
        assert_eq!(duplicate.validate(), Err(CodecError::Layout));
    }

    #[test]
    fn test_payload_too_large() {
        let data = [0u8; MAX_MESSAGE_LEN + 1];
        assert!(matches!(
            encode(&FrameLayout::DEFAULT, 0, &data),
            Err(CodecError::PayloadTooLarge)
        ));
    }

    #[test]
    fn test_max_message_round_trip() {
        let layout = FrameLayout::DEFAULT;
        let data = payload(MAX_MESSAGE_LEN);
        let out = frames(&layout, 7, &data);
        assert_eq!(out.len(), layout.chunk_count(MAX_MESSAGE_LEN));

        let mut rx = Reassembler::<1>::new(layout);
        let mut result = None;
        for frame in &out {
            result = rx.push(frame).unwrap();
        }
        assert_eq!(result.unwrap().payload.as_slice(), data.as_slice());
    }

    #[test]
    fn test_bad_header() {
        let layout = FrameLayout::DEFAULT;
        let mut frame = frames(&layout, 0, &[1, 2])[0].clone();
        // index 1 of total 1
        frame[3] = 0;
        frame[4] = 1;
        assert_eq!(parse_chunk(&layout, &frame), Err(CodecError::Header));

        let mut frame = frames(&layout, 0, &[1, 2])[0].clone();
        frame[2] = 0x10;
        assert_eq!(parse_chunk(&layout, &frame), Err(CodecError::Nibble));
    }
}
