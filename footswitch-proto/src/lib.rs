//! Wire formats for a footswitch MIDI controller.
//!
//! - [`midi`]: channel voice messages ([`MidiMessage`]) and their byte rendering
//! - [`crc`]: CRC-8 (polynomial 0x07) over SysEx payloads
//! - [`nibble`]: splitting bytes into 7-bit-safe nibble pairs
//! - [`frame`]: chunked SysEx frames ([`encode`]) and their reassembly ([`Reassembler`])
//!
//! # SysEx Format
//!
//! ```text
//! F0 <prefix> <total hi lo> <index hi lo> <id hi lo> <payload + crc as nibbles> F7
//! ```
//!
//! Header order, markers, prefix and chunk size are carried by a [`FrameLayout`]
//! so a target device can supply its own.
//!
//! # Example
//!
//! ```
//! use footswitch_proto::{encode, FrameLayout, Reassembler};
//!
//! let layout = FrameLayout::DEFAULT;
//! let mut rx = Reassembler::<2>::new(layout);
//! let mut received = None;
//! for frame in encode(&layout, 1, &[0x10, 0x20, 0x30]).unwrap() {
//!     received = rx.push(&frame).unwrap();
//! }
//! assert_eq!(received.unwrap().payload.as_slice(), &[0x10, 0x20, 0x30]);
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting (for embedded logging)

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod crc;
mod error;
pub mod frame;
pub mod midi;
pub mod nibble;

pub use crc::checksum;
pub use error::CodecError;
pub use frame::{
    decode_frame, encode, parse_chunk, ChunkHeader, Chunks, Frame, FrameLayout, HeaderField,
    Message, Reassembler, MAX_CHUNKS, MAX_FRAME_LEN, MAX_MESSAGE_LEN,
};
pub use midi::{MidiKind, MidiMessage};
