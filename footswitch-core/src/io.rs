//! Collaborator traits: board hardware, MIDI transport, display, storage and radio.
//!
//! Everything the engine touches outside its own state goes through these traits,
//! so the engine runs unchanged on target and under host tests.

use core::future::Future;

use footswitch_proto::MidiMessage;

use crate::analog::Calibration;
use crate::config::Preset;
use crate::leds::LedFrame;
use crate::tap_tempo::TempoUpdate;

/// Where an analog channel is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnalogSource {
    /// ADC-capable pin.
    Gpio(u8),
    /// Channel of an external analog multiplexer.
    Mux(u8),
}

/// Buttons, encoder, ADC, clock.
pub trait Board {
    /// Debounce-free level of a footswitch; `true` while pressed.
    fn button_pressed(&mut self, index: u8) -> bool;

    /// One raw 12-bit ADC sample.
    fn read_analog(&mut self, source: AnalogSource) -> u16;

    /// Encoder detents since the last call.
    fn encoder_delta(&mut self) -> i8;

    fn encoder_pressed(&mut self) -> bool;

    /// Monotonic milliseconds since boot.
    fn now_ms(&self) -> u64;

    /// Yield to other tasks for about `us` microseconds.
    fn pause_us(&mut self, us: u32) -> impl Future<Output = ()>;
}

/// Error type for transport operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// No link to the effects unit.
    Disconnected,
    /// Outgoing queue is full; the message was dropped.
    QueueFull,
    Io,
}

/// Outgoing MIDI link. Sends never block.
pub trait Transport {
    fn is_connected(&self) -> bool;

    fn send_midi(&mut self, message: MidiMessage) -> Result<(), TransportError>;

    /// Send a SysEx payload, framed as the link requires.
    fn send_sysex(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Forward a new delay time to the effects unit.
    fn send_tempo(&mut self, update: TempoUpdate) -> Result<(), TransportError>;
}

/// Engine mode shown on the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    #[default]
    Preset,
    Menu,
}

/// What the main screen shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View<'a> {
    pub preset: u8,
    pub preset_name: &'a str,
    pub mode: Mode,
    pub menu_item: u8,
    /// Present while tap-tempo mode is active.
    pub tempo: Option<TempoUpdate>,
    pub tempo_locked: bool,
}

/// Screen and LEDs. Best effort, never fails.
pub trait Display {
    /// Show `text` as an overlay for `duration_ms`.
    fn show_label(&mut self, text: &str, duration_ms: u32);

    fn refresh(&mut self, view: &View<'_>);

    fn set_leds(&mut self, frame: &LedFrame);

    /// A menu item was chosen.
    fn menu_enter(&mut self, item: u8) {
        let _ = item;
    }
}

/// Error type for persistence operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    NotFound,
    Io,
    Corrupt,
}

/// Non-volatile storage for presets and analog calibration.
pub trait PresetStore {
    fn load_preset(&mut self, index: u8, preset: &mut Preset) -> Result<(), StoreError>;

    fn save_preset(&mut self, index: u8, preset: &Preset) -> Result<(), StoreError>;

    fn load_calibration(&mut self, channel: u8) -> Result<Calibration, StoreError>;

    fn save_calibration(&mut self, channel: u8, calibration: Calibration) -> Result<(), StoreError>;
}

/// Configuration radio and wireless bonds.
pub trait RadioControl {
    fn set_config_radio(&mut self, enabled: bool);

    fn clear_bonds(&mut self);
}

/// Requests posted by other contexts, applied at the start of the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExternalEvent {
    SelectPreset(u8),
    /// Reload the current preset from storage.
    ReloadPreset,
    StartCalibration(u8),
    StopCalibration(u8),
    /// Persist every preset.
    SavePresets,
}

impl ExternalEvent {
    pub const SELECT_PRESET: u8 = 0x20;
    pub const RELOAD_PRESET: u8 = 0x21;
    pub const START_CALIBRATION: u8 = 0x22;
    pub const STOP_CALIBRATION: u8 = 0x23;
    pub const SAVE_PRESETS: u8 = 0x24;

    /// Decode a remote request from a SysEx payload: a command byte, then the
    /// preset or channel index where the command takes one. Trailing bytes are
    /// ignored.
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let (&command, args) = payload.split_first()?;
        let index = args.first().copied();
        match command {
            Self::SELECT_PRESET => index.map(Self::SelectPreset),
            Self::RELOAD_PRESET => Some(Self::ReloadPreset),
            Self::START_CALIBRATION => index.map(Self::StartCalibration),
            Self::STOP_CALIBRATION => index.map(Self::StopCalibration),
            Self::SAVE_PRESETS => Some(Self::SavePresets),
            _ => None,
        }
    }
}

pub trait EventSource {
    fn poll_event(&mut self) -> Option<ExternalEvent>;
}

/// Every non-board collaborator the engine needs.
pub trait Host: Transport + Display + PresetStore + RadioControl + EventSource {}

impl<T: Transport + Display + PresetStore + RadioControl + EventSource> Host for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_requests() {
        assert_eq!(
            ExternalEvent::from_payload(&[0x20, 2]),
            Some(ExternalEvent::SelectPreset(2))
        );
        assert_eq!(
            ExternalEvent::from_payload(&[0x21]),
            Some(ExternalEvent::ReloadPreset)
        );
        assert_eq!(
            ExternalEvent::from_payload(&[0x22, 1, 0x55]),
            Some(ExternalEvent::StartCalibration(1))
        );
        assert_eq!(
            ExternalEvent::from_payload(&[0x23, 1]),
            Some(ExternalEvent::StopCalibration(1))
        );
        assert_eq!(
            ExternalEvent::from_payload(&[0x24]),
            Some(ExternalEvent::SavePresets)
        );
    }

    #[test]
    fn test_unknown_or_short_requests_are_ignored() {
        assert_eq!(ExternalEvent::from_payload(&[]), None);
        // Missing index
        assert_eq!(ExternalEvent::from_payload(&[0x20]), None);
        // Outgoing tempo command is not a request
        assert_eq!(ExternalEvent::from_payload(&[0x10, 0x01, 0xF4, 0]), None);
    }
}
