//! Action execution.
//!
//! MIDI-producing commands go to the [`Transport`]; local commands change the
//! navigation state or call the radio and display collaborators. Preset changes
//! are reported back so the engine can reset per-button state in one place.

use footswitch_proto::MidiMessage;

use crate::action::{ActionMessage, Command};
use crate::config::{TapRole, Timing, PRESET_COUNT};
use crate::io::{Display, Mode, RadioControl, Transport};
use crate::tap_tempo::{TapOutcome, TapTempo, TempoUpdate};

/// What executing an action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// Message handed to the transport.
    Sent,
    /// Transport disconnected or refused the message.
    Dropped,
    /// Local state changed, nothing was sent.
    Local,
    /// Current preset should become this index.
    PresetChanged(u8),
    /// Nothing to do for this command.
    Ignored,
}

/// Which preset is current and whether the menu is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Navigation {
    pub preset: u8,
    pub mode: Mode,
    pub menu_item: u8,
    pub menu_len: u8,
    pub config_radio: bool,
}

impl Navigation {
    #[must_use]
    pub const fn new(menu_len: u8) -> Self {
        Self {
            preset: 0,
            mode: Mode::Preset,
            menu_item: 0,
            menu_len,
            config_radio: false,
        }
    }

    /// Move the menu cursor by `steps`, wrapping.
    pub fn menu_step(&mut self, steps: i8) {
        if self.menu_len == 0 {
            return;
        }
        let len = i16::from(self.menu_len);
        self.menu_item = (i16::from(self.menu_item) + i16::from(steps)).rem_euclid(len) as u8;
    }
}

/// Send a channel message unless the link is down.
pub fn send_midi<T: Transport>(transport: &mut T, message: MidiMessage) -> Outcome {
    if !transport.is_connected() {
        trace!("midi dropped, transport disconnected");
        return Outcome::Dropped;
    }
    match transport.send_midi(message) {
        Ok(()) => Outcome::Sent,
        Err(e) => {
            warn!("midi send failed: {:?}", e);
            Outcome::Dropped
        }
    }
}

pub fn send_sysex<T: Transport>(transport: &mut T, data: &[u8]) -> Outcome {
    if !transport.is_connected() {
        trace!("sysex dropped, transport disconnected");
        return Outcome::Dropped;
    }
    match transport.send_sysex(data) {
        Ok(()) => Outcome::Sent,
        Err(e) => {
            warn!("sysex send failed: {:?}", e);
            Outcome::Dropped
        }
    }
}

pub fn send_tempo<T: Transport>(transport: &mut T, update: TempoUpdate) -> Outcome {
    if !transport.is_connected() {
        return Outcome::Dropped;
    }
    match transport.send_tempo(update) {
        Ok(()) => Outcome::Sent,
        Err(e) => {
            warn!("tempo send failed: {:?}", e);
            Outcome::Dropped
        }
    }
}

/// Executes actions against navigation and tap-tempo state.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pub nav: Navigation,
    pub tap: TapTempo,
    label_ms: u32,
}

impl Dispatcher {
    #[must_use]
    pub fn new(timing: &Timing, menu_len: u8) -> Self {
        Self {
            nav: Navigation::new(menu_len),
            tap: TapTempo::new(timing.tap_timeout_ms),
            label_ms: timing.label_ms,
        }
    }

    /// Run one action.
    pub fn execute<H>(&mut self, host: &mut H, action: &ActionMessage, now_ms: u64) -> Outcome
    where
        H: Transport + Display + RadioControl,
    {
        debug!("execute {:?}", action.command);
        match &action.command {
            Command::Off => Outcome::Ignored,
            Command::NoteMomentary
            | Command::NoteOn
            | Command::NoteOff
            | Command::ControlChange
            | Command::ProgramChange => match action.midi() {
                Some(message) => send_midi(host, message),
                None => Outcome::Ignored,
            },
            Command::SysEx(payload) => send_sysex(host, payload),
            Command::TapTempo(_) => match self.tap.tap(now_ms) {
                TapOutcome::Started => {
                    host.show_label("TAP", self.label_ms);
                    Outcome::Local
                }
                TapOutcome::Tempo(update) => send_tempo(host, update),
            },
            Command::PresetUp => {
                Outcome::PresetChanged((self.nav.preset + 1) % PRESET_COUNT as u8)
            }
            Command::PresetDown => Outcome::PresetChanged(
                (self.nav.preset + PRESET_COUNT as u8 - 1) % PRESET_COUNT as u8,
            ),
            Command::PresetSelect(index) => {
                if usize::from(*index) < PRESET_COUNT {
                    Outcome::PresetChanged(*index)
                } else {
                    warn!("preset {} out of range", index);
                    Outcome::Ignored
                }
            }
            Command::WifiToggle => {
                self.nav.config_radio = !self.nav.config_radio;
                host.set_config_radio(self.nav.config_radio);
                host.show_label(
                    if self.nav.config_radio { "WIFI ON" } else { "WIFI OFF" },
                    self.label_ms,
                );
                info!("config radio enabled={}", self.nav.config_radio);
                Outcome::Local
            }
            Command::ClearBondStore => {
                host.clear_bonds();
                host.show_label("BONDS CLEARED", self.label_ms);
                info!("wireless bonds cleared");
                Outcome::Local
            }
            Command::MenuToggle => {
                self.nav.mode = match self.nav.mode {
                    Mode::Preset => {
                        self.nav.menu_item = 0;
                        Mode::Menu
                    }
                    Mode::Menu => Mode::Preset,
                };
                Outcome::Local
            }
            Command::MenuUp | Command::MenuDown if self.nav.mode == Mode::Menu => {
                self.nav.menu_step(if action.command == Command::MenuUp { -1 } else { 1 });
                Outcome::Local
            }
            Command::MenuEnter if self.nav.mode == Mode::Menu => {
                host.menu_enter(self.nav.menu_item);
                Outcome::Local
            }
            Command::MenuUp | Command::MenuDown | Command::MenuEnter => Outcome::Ignored,
        }
    }

    /// Handle a button acting as a rhythm or lock control in tap-tempo mode.
    pub fn tap_control<H>(&mut self, host: &mut H, role: TapRole, now_ms: u64) -> Outcome
    where
        H: Transport + Display,
    {
        match role {
            TapRole::RhythmPrev | TapRole::RhythmNext => {
                let update = self.tap.step_rhythm(role == TapRole::RhythmNext, now_ms);
                host.show_label(update.rhythm.name(), self.label_ms);
                send_tempo(host, update)
            }
            TapRole::Lock => {
                let locked = self.tap.toggle_lock(now_ms);
                host.show_label(if locked { "LOCKED" } else { "UNLOCKED" }, self.label_ms);
                Outcome::Local
            }
        }
    }
}
