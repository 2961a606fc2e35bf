//! Action messages and the per-owner action registry.
//!
//! Each button owns a bounded [`ActionList`]. The list holds at most one
//! [`ActionMessage`] per [`TriggerKind`]; insertion goes through
//! [`ActionList::upsert`] or [`ActionList::find_or_create`] so duplicates are
//! impossible.

use footswitch_proto::MidiMessage;
use heapless::{String, Vec};

pub const MAX_ACTIONS_PER_BUTTON: usize = 6;
pub const LABEL_LEN: usize = 16;
pub const SYSEX_LEN: usize = 32;

/// Short display text.
pub type Label = String<LABEL_LEN>;

/// Build a label, truncating at a character boundary if `text` is too long.
#[must_use]
pub fn label(text: &str) -> Label {
    let mut out = Label::new();
    for c in text.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// LED colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Self = Self::new(0, 0, 0);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scale each component by `level / 255`.
    #[must_use]
    pub const fn scale(self, level: u8) -> Self {
        const fn s(c: u8, level: u8) -> u8 {
            ((c as u16 * level as u16) / 255) as u8
        }
        Self::new(s(self.r, level), s(self.g, level), s(self.b, level))
    }
}

/// When an action fires.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Trigger {
    NoAction,
    Press,
    /// Alternates with `Press` on every other press.
    SecondPress,
    Release,
    /// Fires once after the button is held `hold_ms` (0 selects the configured default).
    LongPress { hold_ms: u16 },
    DoubleTap,
    /// Fires when this button and `partner` are pressed together.
    Combo { partner: u8, label: Label },
}

/// Payload-free discriminant of [`Trigger`], used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerKind {
    NoAction,
    Press,
    SecondPress,
    Release,
    LongPress,
    DoubleTap,
    Combo,
}

impl Trigger {
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::NoAction => TriggerKind::NoAction,
            Self::Press => TriggerKind::Press,
            Self::SecondPress => TriggerKind::SecondPress,
            Self::Release => TriggerKind::Release,
            Self::LongPress { .. } => TriggerKind::LongPress,
            Self::DoubleTap => TriggerKind::DoubleTap,
            Self::Combo { .. } => TriggerKind::Combo,
        }
    }
}

/// Buttons that act as rhythm and lock controls while tap-tempo mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TapControls {
    pub rhythm_prev: Option<u8>,
    pub rhythm_next: Option<u8>,
    pub lock: Option<u8>,
}

/// What an action does.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Off,
    /// Note on at press, note off at release.
    NoteMomentary,
    NoteOn,
    NoteOff,
    ControlChange,
    ProgramChange,
    SysEx(Vec<u8, SYSEX_LEN>),
    TapTempo(TapControls),
    PresetUp,
    PresetDown,
    PresetSelect(u8),
    WifiToggle,
    ClearBondStore,
    MenuToggle,
    MenuUp,
    MenuDown,
    MenuEnter,
}

impl Command {
    /// Text shown when an action has no label of its own.
    #[must_use]
    pub const fn default_label(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::NoteMomentary | Self::NoteOn => "NOTE",
            Self::NoteOff => "NOTE OFF",
            Self::ControlChange => "CC",
            Self::ProgramChange => "PC",
            Self::SysEx(_) => "SYSEX",
            Self::TapTempo(_) => "TAP",
            Self::PresetUp => "PRESET +",
            Self::PresetDown => "PRESET -",
            Self::PresetSelect(_) => "PRESET",
            Self::WifiToggle => "WIFI",
            Self::ClearBondStore => "CLEAR BLE",
            Self::MenuToggle => "MENU",
            Self::MenuUp => "UP",
            Self::MenuDown => "DOWN",
            Self::MenuEnter => "ENTER",
        }
    }
}

/// One configured action.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ActionMessage {
    pub trigger: Trigger,
    pub command: Command,
    /// MIDI channel, 1..=16.
    pub channel: u8,
    pub data1: u8,
    pub data2: u8,
    pub color: Rgb,
    pub label: Label,
}

impl ActionMessage {
    #[must_use]
    pub fn new(trigger: Trigger, command: Command) -> Self {
        Self {
            trigger,
            command,
            channel: 1,
            data1: 0,
            data2: 0,
            color: Rgb::OFF,
            label: Label::new(),
        }
    }

    #[must_use]
    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel.clamp(1, 16);
        self
    }

    #[must_use]
    pub fn data(mut self, data1: u8, data2: u8) -> Self {
        self.data1 = data1 & 0x7F;
        self.data2 = data2 & 0x7F;
        self
    }

    #[must_use]
    pub fn color(mut self, color: Rgb) -> Self {
        self.color = color;
        self
    }

    #[must_use]
    pub fn label(mut self, text: &str) -> Self {
        self.label = label(text);
        self
    }

    /// Label to display when this action fires.
    #[must_use]
    pub fn display_label(&self) -> &str {
        match &self.trigger {
            Trigger::Combo { label, .. } if !label.is_empty() => label.as_str(),
            _ if !self.label.is_empty() => self.label.as_str(),
            _ => self.command.default_label(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_momentary_note(&self) -> bool {
        self.command == Command::NoteMomentary
    }

    /// Channel message produced by this action, if it produces one.
    #[must_use]
    pub fn midi(&self) -> Option<MidiMessage> {
        let ch = self.channel;
        match self.command {
            Command::NoteMomentary | Command::NoteOn => {
                Some(MidiMessage::note_on(ch, self.data1, self.data2))
            }
            Command::NoteOff => Some(MidiMessage::note_off(ch, self.data1)),
            Command::ControlChange => {
                Some(MidiMessage::control_change(ch, self.data1, self.data2))
            }
            Command::ProgramChange => Some(MidiMessage::program_change(ch, self.data1)),
            _ => None,
        }
    }
}

/// Registry error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// No free slot for a new trigger.
    Full,
}

/// Bounded action list keyed by trigger kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionList<const N: usize> {
    items: Vec<ActionMessage, N>,
}

/// Actions owned by one button.
pub type ButtonActions = ActionList<MAX_ACTIONS_PER_BUTTON>;

impl<const N: usize> ActionList<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    #[must_use]
    pub fn find(&self, kind: TriggerKind) -> Option<&ActionMessage> {
        self.items.iter().find(|m| m.trigger.kind() == kind)
    }

    pub fn find_mut(&mut self, kind: TriggerKind) -> Option<&mut ActionMessage> {
        self.items.iter_mut().find(|m| m.trigger.kind() == kind)
    }

    #[inline]
    #[must_use]
    pub fn has(&self, kind: TriggerKind) -> bool {
        self.find(kind).is_some()
    }

    /// Insert `message`, replacing any action with the same trigger kind.
    pub fn upsert(&mut self, message: ActionMessage) -> Result<&mut ActionMessage, RegistryError> {
        let kind = message.trigger.kind();
        let pos = match self.items.iter().position(|m| m.trigger.kind() == kind) {
            Some(pos) => {
                self.items[pos] = message;
                pos
            }
            None => {
                self.items.push(message).map_err(|_| RegistryError::Full)?;
                self.items.len() - 1
            }
        };
        Ok(&mut self.items[pos])
    }

    /// Existing action for `trigger`'s kind, or a new `Off` action with that trigger.
    pub fn find_or_create(&mut self, trigger: Trigger) -> Result<&mut ActionMessage, RegistryError> {
        let kind = trigger.kind();
        if let Some(pos) = self.items.iter().position(|m| m.trigger.kind() == kind) {
            return Ok(&mut self.items[pos]);
        }
        self.items
            .push(ActionMessage::new(trigger, Command::Off))
            .map_err(|_| RegistryError::Full)?;
        let last = self.items.len() - 1;
        Ok(&mut self.items[last])
    }

    pub fn remove(&mut self, kind: TriggerKind) -> Option<ActionMessage> {
        let pos = self.items.iter().position(|m| m.trigger.kind() == kind)?;
        Some(self.items.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionMessage> {
        self.items.iter()
    }

    #[inline]
    #[must_use]
    pub fn first(&self) -> Option<&ActionMessage> {
        self.items.first()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Partner index and action of this owner's combo, if any.
    #[must_use]
    pub fn combo(&self) -> Option<(u8, &ActionMessage)> {
        self.items.iter().find_map(|m| match m.trigger {
            Trigger::Combo { partner, .. } => Some((partner, m)),
            _ => None,
        })
    }

    /// Tap-tempo controls, if any action of this owner is a tap-tempo command.
    #[must_use]
    pub fn tap_controls(&self) -> Option<TapControls> {
        self.items.iter().find_map(|m| match m.command {
            Command::TapTempo(controls) => Some(controls),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc(trigger: Trigger, number: u8) -> ActionMessage {
        ActionMessage::new(trigger, Command::ControlChange).data(number, 127)
    }

    #[test]
    fn test_upsert_replaces_same_kind() {
        let mut list = ButtonActions::new();
        list.upsert(cc(Trigger::Press, 10)).unwrap();
        list.upsert(cc(Trigger::Press, 11)).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.find(TriggerKind::Press).unwrap().data1, 11);
    }

    #[test]
    fn test_trigger_payload_does_not_split_kind() {
        let mut list = ButtonActions::new();
        list.upsert(cc(Trigger::LongPress { hold_ms: 500 }, 1)).unwrap();
        list.upsert(cc(Trigger::LongPress { hold_ms: 900 }, 2)).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(
            list.find(TriggerKind::LongPress).unwrap().trigger,
            Trigger::LongPress { hold_ms: 900 }
        );
    }

    #[test]
    fn test_find_or_create() {
        let mut list = ButtonActions::new();
        let created = list.find_or_create(Trigger::DoubleTap).unwrap();
        assert_eq!(created.command, Command::Off);
        created.command = Command::PresetUp;

        let again = list.find_or_create(Trigger::DoubleTap).unwrap();
        assert_eq!(again.command, Command::PresetUp);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_full_list_rejects_new_trigger() {
        let mut list = ActionList::<2>::new();
        list.upsert(cc(Trigger::Press, 1)).unwrap();
        list.upsert(cc(Trigger::Release, 2)).unwrap();
        assert_eq!(list.upsert(cc(Trigger::DoubleTap, 3)), Err(RegistryError::Full));
        assert_eq!(list.find_or_create(Trigger::NoAction), Err(RegistryError::Full));
        // Replacing an existing kind still works
        assert!(list.upsert(cc(Trigger::Press, 4)).is_ok());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_remove() {
        let mut list = ButtonActions::new();
        list.upsert(cc(Trigger::Press, 1)).unwrap();
        assert!(list.remove(TriggerKind::Press).is_some());
        assert!(list.remove(TriggerKind::Press).is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn test_combo_lookup() {
        let mut list = ButtonActions::new();
        list.upsert(ActionMessage::new(
            Trigger::Combo {
                partner: 3,
                label: label("BOTH"),
            },
            Command::PresetUp,
        ))
        .unwrap();
        let (partner, action) = list.combo().unwrap();
        assert_eq!(partner, 3);
        assert_eq!(action.display_label(), "BOTH");
    }

    #[test]
    fn test_display_label_fallback() {
        let action = ActionMessage::new(Trigger::Press, Command::PresetDown);
        assert_eq!(action.display_label(), "PRESET -");
        let action = action.label("BACK");
        assert_eq!(action.display_label(), "BACK");
    }

    #[test]
    fn test_midi_rendering() {
        let action = ActionMessage::new(Trigger::Press, Command::NoteMomentary)
            .channel(3)
            .data(60, 100);
        assert_eq!(action.midi(), Some(MidiMessage::note_on(3, 60, 100)));
        assert!(action.is_momentary_note());

        let tap = ActionMessage::new(Trigger::Press, Command::TapTempo(TapControls::default()));
        assert_eq!(tap.midi(), None);
    }

    #[test]
    fn test_label_truncates() {
        let l = label("A VERY LONG LABEL THAT OVERFLOWS");
        assert_eq!(l.len(), LABEL_LEN);
    }

    #[test]
    fn test_rgb_scale() {
        assert_eq!(Rgb::new(255, 128, 0).scale(255), Rgb::new(255, 128, 0));
        assert_eq!(Rgb::new(255, 0, 0).scale(0), Rgb::OFF);
    }
}
