//! Button LED model.

use heapless::Vec;

use crate::action::Rgb;
use crate::config::{Brightness, LedMode, Preset, PresetLedMode, MAX_BUTTONS};
use crate::tap_tempo::TapTempo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedLevel {
    #[default]
    Off,
    Dim,
    On,
    /// Tempo beat.
    Flash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Led {
    pub level: LedLevel,
    pub color: Rgb,
}

impl Led {
    /// Colour to drive the LED with.
    #[must_use]
    pub fn output(&self, brightness: Brightness) -> Rgb {
        match self.level {
            LedLevel::Off => Rgb::OFF,
            LedLevel::Dim => self.color.scale(brightness.dim),
            LedLevel::On | LedLevel::Flash => self.color.scale(brightness.on),
        }
    }
}

/// One LED per button, in button order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LedFrame {
    pub leds: Vec<Led, MAX_BUTTONS>,
}

/// Whether `index` takes part in selection for this preset.
#[must_use]
pub fn selectable(preset: &Preset, index: u8) -> bool {
    match preset.led_mode {
        PresetLedMode::Normal => false,
        PresetLedMode::Selection => true,
        PresetLedMode::Hybrid => preset.button(index).is_some_and(|b| b.in_selection_group),
    }
}

/// Compute the LED frame for `preset`.
pub fn render(
    preset: &Preset,
    mut pressed: impl FnMut(u8) -> bool,
    tap: &TapTempo,
    now_ms: u64,
    flash_ms: u32,
) -> LedFrame {
    let mut frame = LedFrame::default();
    for (i, button) in preset.buttons.iter().enumerate() {
        let index = i as u8;
        let color = button.led_action().map_or(Rgb::OFF, |a| a.color);
        let lit = if button.tap_controls().is_some() {
            if tap.is_active() && tap.flash(now_ms, flash_ms) {
                LedLevel::Flash
            } else {
                LedLevel::Dim
            }
        } else if selectable(preset, index) {
            on_off(preset.selected == Some(index))
        } else {
            match button.led_mode {
                LedMode::Toggle => on_off(button.latched),
                LedMode::Momentary => on_off(pressed(index)),
            }
        };
        // Capacity matches the button limit
        let _ = frame.leds.push(Led { level: lit, color });
    }
    frame
}

fn on_off(on: bool) -> LedLevel {
    if on {
        LedLevel::On
    } else {
        LedLevel::Off
    }
}
