//! Rotary encoder push-button gestures.

use crate::config::Timing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncoderGesture {
    /// Released before the hold time.
    Click,
    /// Held for the hold time; fires once per press.
    Hold,
}

/// Debounced encoder push button.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncoderButton {
    pressed: bool,
    last_edge_ms: Option<u64>,
    press_start_ms: u64,
    hold_fired: bool,
}

impl EncoderButton {
    /// Feed the current level; returns a gesture when one completes.
    pub fn update(&mut self, pressed: bool, now_ms: u64, timing: &Timing) -> Option<EncoderGesture> {
        if pressed != self.pressed {
            let settled = self.last_edge_ms.map_or(true, |last| {
                now_ms.saturating_sub(last) > u64::from(timing.encoder_debounce_ms)
            });
            if !settled {
                return None;
            }
            self.last_edge_ms = Some(now_ms);
            self.pressed = pressed;
            if pressed {
                self.press_start_ms = now_ms;
                self.hold_fired = false;
                return None;
            }
            return (!self.hold_fired).then_some(EncoderGesture::Click);
        }

        if self.pressed
            && !self.hold_fired
            && now_ms.saturating_sub(self.press_start_ms) >= u64::from(timing.encoder_hold_ms)
        {
            self.hold_fired = true;
            return Some(EncoderGesture::Hold);
        }
        None
    }
}
