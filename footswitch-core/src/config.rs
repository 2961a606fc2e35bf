//! Presets, button configuration and engine timing.

use heapless::Vec;

use crate::action::{label, ActionMessage, ButtonActions, Label, TapControls, TriggerKind};

pub const MAX_BUTTONS: usize = 16;
pub const PRESET_COUNT: usize = 4;

/// How a button's LED follows the button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedMode {
    /// Lit while held.
    #[default]
    Momentary,
    /// Flips on every fired press.
    Toggle,
}

/// How a preset lights its buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PresetLedMode {
    /// Every button follows its own [`LedMode`].
    #[default]
    Normal,
    /// Only the selected button is lit.
    Selection,
    /// Selection-group buttons light when selected, the rest follow their [`LedMode`].
    Hybrid,
}

/// One footswitch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ButtonConfig {
    pub name: Label,
    pub led_mode: LedMode,
    pub in_selection_group: bool,
    pub actions: ButtonActions,
    /// Next press fires `SecondPress`. Runtime only.
    pub alternate: bool,
    /// LED latch for [`LedMode::Toggle`]. Runtime only.
    pub latched: bool,
}

impl ButtonConfig {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: label(name),
            ..Self::default()
        }
    }

    /// Action a press fires: `SecondPress` on alternate presses when present, else `Press`.
    #[must_use]
    pub fn press_action(&self) -> Option<&ActionMessage> {
        if self.alternate {
            if let Some(second) = self.actions.find(TriggerKind::SecondPress) {
                return Some(second);
            }
        }
        self.actions.find(TriggerKind::Press)
    }

    /// Action whose colour the LED shows.
    #[must_use]
    pub fn led_action(&self) -> Option<&ActionMessage> {
        self.press_action().or_else(|| self.actions.first())
    }

    #[inline]
    #[must_use]
    pub fn tap_controls(&self) -> Option<TapControls> {
        self.actions.tap_controls()
    }

    pub fn reset_runtime(&mut self) {
        self.alternate = false;
        self.latched = false;
    }
}

/// A full set of button assignments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Preset {
    pub name: Label,
    pub led_mode: PresetLedMode,
    pub buttons: Vec<ButtonConfig, MAX_BUTTONS>,
    /// Selected button for [`PresetLedMode::Selection`] and [`PresetLedMode::Hybrid`].
    pub selected: Option<u8>,
}

impl Preset {
    /// Preset with `button_count` unassigned buttons.
    #[must_use]
    pub fn new(name: &str, button_count: usize) -> Self {
        let mut buttons = Vec::new();
        for _ in 0..button_count.min(MAX_BUTTONS) {
            let _ = buttons.push(ButtonConfig::default());
        }
        Self {
            name: label(name),
            buttons,
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn button(&self, index: u8) -> Option<&ButtonConfig> {
        self.buttons.get(index as usize)
    }

    #[inline]
    pub fn button_mut(&mut self, index: u8) -> Option<&mut ButtonConfig> {
        self.buttons.get_mut(index as usize)
    }

    /// Whether `index` is a rhythm or lock control of some tap-tempo button.
    #[must_use]
    pub fn tap_role(&self, index: u8) -> Option<TapRole> {
        self.buttons.iter().find_map(|b| {
            let controls = b.tap_controls()?;
            if controls.rhythm_prev == Some(index) {
                Some(TapRole::RhythmPrev)
            } else if controls.rhythm_next == Some(index) {
                Some(TapRole::RhythmNext)
            } else if controls.lock == Some(index) {
                Some(TapRole::Lock)
            } else {
                None
            }
        })
    }

    pub fn reset_runtime(&mut self) {
        self.buttons.iter_mut().for_each(ButtonConfig::reset_runtime);
    }
}

/// Role of a button while tap-tempo mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TapRole {
    RhythmPrev,
    RhythmNext,
    Lock,
}

/// Durations used by the engine, in milliseconds unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timing {
    pub debounce_ms: u32,
    pub default_hold_ms: u32,
    /// How long a press waits for its combo partner.
    pub combo_window_ms: u32,
    /// Partner re-sample interval, microseconds.
    pub combo_sample_us: u32,
    /// Gap between a deferred momentary note-on and its note-off.
    pub note_off_delay_ms: u32,
    pub double_tap_ms: u32,
    pub label_ms: u32,
    pub tap_timeout_ms: u32,
    pub tap_flash_ms: u32,
    pub analog_interval_ms: u32,
    pub encoder_debounce_ms: u32,
    pub encoder_hold_ms: u32,
}

impl Timing {
    pub const DEFAULT: Self = Self {
        debounce_ms: 120,
        default_hold_ms: 700,
        combo_window_ms: 40,
        combo_sample_us: 500,
        note_off_delay_ms: 10,
        double_tap_ms: 300,
        label_ms: 1000,
        tap_timeout_ms: 3000,
        tap_flash_ms: 50,
        analog_interval_ms: 2,
        encoder_debounce_ms: 100,
        encoder_hold_ms: 500,
    };
}

impl Default for Timing {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// LED levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Brightness {
    pub on: u8,
    pub dim: u8,
}

impl Default for Brightness {
    fn default() -> Self {
        Self { on: 220, dim: 20 }
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineConfig {
    pub button_count: u8,
    pub timing: Timing,
    pub brightness: Brightness,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            button_count: 8,
            timing: Timing::DEFAULT,
            brightness: Brightness::default(),
        }
    }
}
