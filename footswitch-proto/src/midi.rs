//! MIDI channel voice messages.

use heapless::Vec;

/// Channel message kinds, discriminant is the status nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MidiKind {
    NoteOff = 0x80,
    NoteOn = 0x90,
    ControlChange = 0xB0,
    ProgramChange = 0xC0,
}

/// A single channel message.
///
/// `channel` is the user-facing 1..=16 numbering; data bytes are masked to 7 bits
/// when rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MidiMessage {
    pub kind: MidiKind,
    pub channel: u8,
    pub data1: u8,
    pub data2: u8,
}

impl MidiMessage {
    #[must_use]
    pub const fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            kind: MidiKind::NoteOn,
            channel,
            data1: note,
            data2: velocity,
        }
    }

    #[must_use]
    pub const fn note_off(channel: u8, note: u8) -> Self {
        Self {
            kind: MidiKind::NoteOff,
            channel,
            data1: note,
            data2: 0,
        }
    }

    #[must_use]
    pub const fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self {
            kind: MidiKind::ControlChange,
            channel,
            data1: controller,
            data2: value,
        }
    }

    #[must_use]
    pub const fn program_change(channel: u8, program: u8) -> Self {
        Self {
            kind: MidiKind::ProgramChange,
            channel,
            data1: program,
            data2: 0,
        }
    }

    /// Status byte: kind in the high nibble, zero-based channel in the low nibble.
    #[inline]
    #[must_use]
    pub const fn status(&self) -> u8 {
        (self.kind as u8) | (self.channel.saturating_sub(1) & 0x0F)
    }

    /// Wire bytes. Program change carries a single data byte.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8, 3> {
        let mut out = Vec::new();
        // Capacity is exactly three, pushes cannot fail
        let _ = out.push(self.status());
        let _ = out.push(self.data1 & 0x7F);
        if self.kind != MidiKind::ProgramChange {
            let _ = out.push(self.data2 & 0x7F);
        }
        out
    }
}
