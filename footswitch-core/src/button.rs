//! Per-button runtime state and the combo rendezvous.

use footswitch_proto::MidiMessage;

use crate::io::Board;

/// Runtime flags of one button. Not persisted; reset on every preset change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeButtonState {
    /// Pressed as far as the state machine is concerned.
    pub active: bool,
    pub press_start_ms: u64,
    pub hold_fired: bool,
    pub combo_checked: bool,
    /// Claimed by a combo, a tap-tempo control or a preset switch; the release does nothing.
    pub consumed: bool,
    pub last_edge_ms: Option<u64>,
    pub last_release_ms: Option<u64>,
    /// Note-off owed when the button is released.
    pub held_note: Option<MidiMessage>,
}

impl RuntimeButtonState {
    /// Accept an edge if more than `debounce_ms` passed since the last accepted one.
    pub fn accept_edge(&mut self, now_ms: u64, debounce_ms: u32) -> bool {
        let settled = self
            .last_edge_ms
            .map_or(true, |last| now_ms.saturating_sub(last) > u64::from(debounce_ms));
        if settled {
            self.last_edge_ms = Some(now_ms);
        }
        settled
    }

    pub fn begin_press(&mut self, now_ms: u64) {
        self.active = true;
        self.press_start_ms = now_ms;
        self.hold_fired = false;
        self.combo_checked = false;
        self.consumed = false;
    }

    /// Mark released and return the owed note-off, if any.
    pub fn release(&mut self, now_ms: u64) -> Option<MidiMessage> {
        self.active = false;
        self.last_release_ms = Some(now_ms);
        self.held_note.take()
    }

    pub fn clear_flags(&mut self) {
        self.hold_fired = false;
        self.combo_checked = false;
        self.consumed = false;
    }

    /// Claimed by a combo whose other half was pressed at `now_ms`.
    pub fn claim(&mut self, now_ms: u64) {
        if !self.active {
            self.active = true;
            self.press_start_ms = now_ms;
            self.last_edge_ms = Some(now_ms);
        }
        self.combo_checked = true;
        self.consumed = true;
    }

    /// Whether the last release was recent enough for a double tap.
    #[must_use]
    pub fn within_double_tap(&self, now_ms: u64, window_ms: u32) -> bool {
        self.last_release_ms
            .is_some_and(|t| now_ms.saturating_sub(t) < u64::from(window_ms))
    }

    /// State after a preset change: everything cleared, held buttons stay claimed.
    #[must_use]
    pub fn after_preset_change(&self) -> Self {
        Self {
            active: self.active,
            consumed: self.active,
            press_start_ms: self.press_start_ms,
            last_edge_ms: self.last_edge_ms,
            ..Self::default()
        }
    }
}

/// Wait up to `window_ms` for `partner` to read as pressed, sampling every
/// `sample_us` and yielding between samples.
pub async fn await_partner<B: Board>(
    board: &mut B,
    partner: u8,
    window_ms: u32,
    sample_us: u32,
) -> bool {
    let sample_us = sample_us.max(1);
    let samples = (window_ms.saturating_mul(1000) / sample_us).max(1);
    for _ in 0..samples {
        if board.button_pressed(partner) {
            return true;
        }
        board.pause_us(sample_us).await;
    }
    board.button_pressed(partner)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::io::AnalogSource;
    use crate::test_util::block_on;

    struct Clock {
        now_us: u64,
        partner_at_us: Option<u64>,
        samples: u32,
    }

    impl Board for Clock {
        fn button_pressed(&mut self, _index: u8) -> bool {
            self.samples += 1;
            self.partner_at_us.is_some_and(|t| self.now_us >= t)
        }
        fn read_analog(&mut self, _source: AnalogSource) -> u16 {
            0
        }
        fn encoder_delta(&mut self) -> i8 {
            0
        }
        fn encoder_pressed(&mut self) -> bool {
            false
        }
        fn now_ms(&self) -> u64 {
            self.now_us / 1000
        }
        async fn pause_us(&mut self, us: u32) {
            self.now_us += u64::from(us);
        }
    }

    #[test]
    fn test_partner_found_within_window() {
        let mut board = Clock {
            now_us: 0,
            partner_at_us: Some(12_000),
            samples: 0,
        };
        assert!(block_on(await_partner(&mut board, 1, 40, 500)));
        // Returned as soon as the partner showed up
        assert_eq!(board.now_us, 12_000);
    }

    #[test]
    fn test_partner_missing_times_out() {
        let mut board = Clock {
            now_us: 0,
            partner_at_us: None,
            samples: 0,
        };
        assert!(!block_on(await_partner(&mut board, 1, 40, 500)));
        assert_eq!(board.now_us, 40_000);
        assert_eq!(board.samples, 81);
    }

    #[test]
    fn test_partner_after_window_is_ignored() {
        let mut board = Clock {
            now_us: 0,
            partner_at_us: Some(41_000),
            samples: 0,
        };
        assert!(!block_on(await_partner(&mut board, 1, 40, 500)));
    }

    #[test]
    fn test_debounce() {
        let mut state = RuntimeButtonState::default();
        assert!(state.accept_edge(1000, 120));
        assert!(!state.accept_edge(1050, 120));
        assert!(!state.accept_edge(1120, 120));
        assert!(state.accept_edge(1121, 120));
    }

    #[test]
    fn test_preset_change_keeps_held_buttons_claimed() {
        let mut held = RuntimeButtonState::default();
        held.begin_press(10);
        held.hold_fired = true;
        held.held_note = Some(MidiMessage::note_off(1, 60));
        let after = held.after_preset_change();
        assert!(after.active && after.consumed);
        assert!(!after.hold_fired);
        assert_eq!(after.held_note, None);

        let idle = RuntimeButtonState::default().after_preset_change();
        assert!(!idle.active && !idle.consumed);
    }

    #[test]
    fn test_double_tap_window() {
        let mut state = RuntimeButtonState::default();
        assert!(!state.within_double_tap(100, 300));
        state.release(100);
        assert!(state.within_double_tap(399, 300));
        assert!(!state.within_double_tap(400, 300));
    }
}
