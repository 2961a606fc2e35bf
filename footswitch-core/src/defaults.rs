//! Factory presets, used when storage has nothing for a slot.

use crate::action::{label, ActionMessage, Command, Rgb, TapControls, Trigger};
use crate::config::{ButtonConfig, LedMode, Preset, PresetLedMode, PRESET_COUNT};

const RED: Rgb = Rgb::new(255, 0, 0);
const GREEN: Rgb = Rgb::new(0, 255, 0);
const BLUE: Rgb = Rgb::new(0, 0, 255);
const AMBER: Rgb = Rgb::new(255, 160, 0);
const WHITE: Rgb = Rgb::new(255, 255, 255);

fn assign(button: &mut ButtonConfig, action: ActionMessage) {
    if button.actions.upsert(action).is_err() {
        warn!("factory preset: action list full");
    }
}

fn press(command: Command) -> ActionMessage {
    ActionMessage::new(Trigger::Press, command)
}

/// CC latch: 127 on one press, 0 on the next.
fn cc_toggle(button: &mut ButtonConfig, number: u8, color: Rgb) {
    button.led_mode = LedMode::Toggle;
    assign(button, press(Command::ControlChange).data(number, 127).color(color));
    assign(
        button,
        ActionMessage::new(Trigger::SecondPress, Command::ControlChange)
            .data(number, 0)
            .color(color),
    );
}

/// Tap button, with the two buttons left of it stepping the rhythm and the one
/// right of it locking the tempo.
fn tap_button(preset: &mut Preset, index: u8) {
    let controls = TapControls {
        rhythm_prev: index.checked_sub(2),
        rhythm_next: index.checked_sub(1),
        lock: Some(index + 1).filter(|&i| usize::from(i) < preset.buttons.len()),
    };
    if let Some(button) = preset.button_mut(index) {
        button.name = label("TAP");
        assign(button, press(Command::TapTempo(controls)).color(WHITE));
    }
}

/// Last two buttons step through presets; holding the last one opens the menu.
fn navigation(preset: &mut Preset) {
    let n = preset.buttons.len();
    if n < 2 {
        return;
    }
    let partner = (n - 1) as u8;
    let down = &mut preset.buttons[n - 2];
    down.name = label("PRESET -");
    assign(down, press(Command::PresetDown).color(BLUE));
    assign(
        down,
        ActionMessage::new(
            Trigger::Combo {
                partner,
                label: label("WIFI"),
            },
            Command::WifiToggle,
        ),
    );

    let up = &mut preset.buttons[n - 1];
    up.name = label("PRESET +");
    assign(up, press(Command::PresetUp).color(BLUE));
    assign(
        up,
        ActionMessage::new(Trigger::LongPress { hold_ms: 0 }, Command::MenuToggle).label("MENU"),
    );
}

fn stomps(button_count: usize) -> Preset {
    let mut preset = Preset::new("STOMPS", button_count);
    let stomp_count = button_count.saturating_sub(3).min(5);
    for (i, button) in preset.buttons.iter_mut().take(stomp_count).enumerate() {
        button.name = label("FX");
        cc_toggle(button, 80 + i as u8, GREEN);
    }
    if stomp_count > 0 {
        tap_button(&mut preset, stomp_count as u8);
    }
    navigation(&mut preset);
    preset
}

fn scenes(button_count: usize) -> Preset {
    let mut preset = Preset::new("SCENES", button_count);
    preset.led_mode = PresetLedMode::Selection;
    preset.selected = Some(0);
    let scene_count = button_count.saturating_sub(2);
    for (i, button) in preset.buttons.iter_mut().take(scene_count).enumerate() {
        button.name = label("SCENE");
        assign(button, press(Command::ProgramChange).data(i as u8, 0).color(AMBER));
    }
    navigation(&mut preset);
    preset
}

fn hybrid(button_count: usize) -> Preset {
    let mut preset = Preset::new("HYBRID", button_count);
    preset.led_mode = PresetLedMode::Hybrid;
    preset.selected = Some(0);
    let half = button_count.saturating_sub(2) / 2;
    for (i, button) in preset.buttons.iter_mut().enumerate().take(half) {
        button.in_selection_group = true;
        assign(button, press(Command::ProgramChange).data(10 + i as u8, 0).color(AMBER));
    }
    for (i, button) in preset
        .buttons
        .iter_mut()
        .enumerate()
        .skip(half)
        .take(half)
    {
        cc_toggle(button, 90 + i as u8, RED);
        assign(
            button,
            ActionMessage::new(Trigger::LongPress { hold_ms: 0 }, Command::ControlChange)
                .data(100 + i as u8, 127)
                .label("HOLD"),
        );
    }
    navigation(&mut preset);
    preset
}

fn notes(button_count: usize) -> Preset {
    let mut preset = Preset::new("NOTES", button_count);
    let pads = button_count.saturating_sub(2);
    for (i, button) in preset.buttons.iter_mut().take(pads).enumerate() {
        button.name = label("PAD");
        let note = 36 + i as u8;
        assign(button, press(Command::NoteMomentary).data(note, 100).color(RED));
        assign(
            button,
            ActionMessage::new(Trigger::DoubleTap, Command::NoteOn)
                .data(note + 12, 127)
                .color(WHITE),
        );
    }
    navigation(&mut preset);
    preset
}

/// The four factory presets for a board with `button_count` footswitches.
#[must_use]
pub fn factory_presets(button_count: usize) -> [Preset; PRESET_COUNT] {
    [
        stomps(button_count),
        scenes(button_count),
        hybrid(button_count),
        notes(button_count),
    ]
}

/// Factory preset for one slot.
#[must_use]
pub fn factory_preset(index: usize, button_count: usize) -> Preset {
    match index {
        0 => stomps(button_count),
        1 => scenes(button_count),
        2 => hybrid(button_count),
        _ => notes(button_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::TriggerKind;
    use crate::config::TapRole;

    #[test]
    fn test_factory_presets_fit_eight_buttons() {
        for preset in factory_presets(8) {
            assert_eq!(preset.buttons.len(), 8);
            assert!(preset.buttons[7].actions.has(TriggerKind::LongPress));
            assert_eq!(preset.buttons[6].actions.combo().map(|(p, _)| p), Some(7));
        }
    }

    #[test]
    fn test_stomps_tap_controls() {
        let preset = stomps(8);
        assert!(preset.buttons[5].tap_controls().is_some());
        assert_eq!(preset.tap_role(3), Some(TapRole::RhythmPrev));
        assert_eq!(preset.tap_role(4), Some(TapRole::RhythmNext));
        assert_eq!(preset.tap_role(6), Some(TapRole::Lock));
    }

    #[test]
    fn test_small_board() {
        let preset = stomps(2);
        assert_eq!(preset.buttons.len(), 2);
        assert!(preset.buttons[0].actions.has(TriggerKind::Press));
    }
}
