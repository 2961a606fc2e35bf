//! The input event and action dispatch engine.
//!
//! [`Engine::tick`] runs one cooperative scheduler pass: deferred external
//! events, tap-tempo timeout, due note-offs, every footswitch, the encoder,
//! the analog channels, then LED and display refresh. Nothing in a pass is
//! fatal; collaborator failures are logged and dropped.

use footswitch_proto::MidiMessage;
use heapless::Vec;

use crate::action::{ActionMessage, Command, Trigger, TriggerKind};
use crate::analog::{read_oversampled, AnalogChannel, RuleOutput, MAX_ANALOG_CHANNELS};
use crate::button::{await_partner, RuntimeButtonState};
use crate::config::{EngineConfig, LedMode, Preset, TapRole, MAX_BUTTONS, PRESET_COUNT};
use crate::defaults::factory_preset;
use crate::dispatch::{send_midi, send_sysex, send_tempo, Dispatcher, Navigation, Outcome};
use crate::encoder::{EncoderButton, EncoderGesture};
use crate::io::{Board, ExternalEvent, Host, Mode, View};
use crate::leds::{self, LedFrame};
use crate::tap_tempo::TapTempo;

/// Note-offs that can be outstanding at once.
pub const NOTE_OFF_QUEUE_LEN: usize = 16;
/// External events applied per tick.
pub const MAX_EVENTS_PER_TICK: usize = 8;
/// Pause between ticks in [`Engine::run`].
pub const TICK_INTERVAL_US: u32 = 1000;
/// Entries in the encoder menu.
pub const MENU_ITEMS: u8 = 6;

#[derive(Debug, Clone, Copy)]
struct PendingNoteOff {
    due_ms: u64,
    message: MidiMessage,
}

/// Owns all runtime state and the board and host collaborators.
pub struct Engine<B, H> {
    board: B,
    host: H,
    config: EngineConfig,
    presets: [Preset; PRESET_COUNT],
    states: [RuntimeButtonState; MAX_BUTTONS],
    analog: Vec<AnalogChannel, MAX_ANALOG_CHANNELS>,
    dispatcher: Dispatcher,
    encoder: EncoderButton,
    note_offs: Vec<PendingNoteOff, NOTE_OFF_QUEUE_LEN>,
    leds: LedFrame,
    view_dirty: bool,
}

impl<B: Board, H: Host> Engine<B, H> {
    /// Engine with factory presets. Call [`Engine::load`] to pull presets from storage.
    pub fn new(board: B, host: H, config: EngineConfig) -> Self {
        let count = usize::from(config.button_count).min(MAX_BUTTONS);
        Self {
            board,
            host,
            presets: core::array::from_fn(|i| factory_preset(i, count)),
            states: [RuntimeButtonState::default(); MAX_BUTTONS],
            analog: Vec::new(),
            dispatcher: Dispatcher::new(&config.timing, MENU_ITEMS),
            encoder: EncoderButton::default(),
            note_offs: Vec::new(),
            leds: LedFrame::default(),
            view_dirty: true,
            config,
        }
    }

    /// Load presets and calibrations from storage. Empty or unreadable slots get
    /// the factory preset.
    pub fn load(&mut self) {
        let count = self.button_count();
        for (i, preset) in self.presets.iter_mut().enumerate() {
            match self.host.load_preset(i as u8, preset) {
                Ok(()) => debug!("preset {} loaded", i),
                Err(e) => {
                    debug!("preset {} not loaded ({:?}), using factory", i, e);
                    *preset = factory_preset(i, count);
                }
            }
        }
        for (i, channel) in self.analog.iter_mut().enumerate() {
            if let Ok(calibration) = self.host.load_calibration(i as u8) {
                channel.calibration = calibration;
            }
        }
        self.view_dirty = true;
        info!("presets loaded, current {}", self.dispatcher.nav.preset);
    }

    /// Add an analog channel; returns it back when all channels are taken.
    pub fn add_analog(&mut self, channel: AnalogChannel) -> Result<(), AnalogChannel> {
        self.analog.push(channel)
    }

    #[inline]
    pub fn board(&self) -> &B {
        &self.board
    }

    #[inline]
    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    #[inline]
    pub fn host(&self) -> &H {
        &self.host
    }

    #[inline]
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    #[inline]
    pub fn navigation(&self) -> &Navigation {
        &self.dispatcher.nav
    }

    #[inline]
    pub fn tap(&self) -> &TapTempo {
        &self.dispatcher.tap
    }

    /// The preset in use.
    #[inline]
    pub fn preset(&self) -> &Preset {
        &self.presets[usize::from(self.dispatcher.nav.preset)]
    }

    pub fn preset_mut(&mut self, index: u8) -> Option<&mut Preset> {
        self.presets.get_mut(usize::from(index))
    }

    pub fn button_state(&self, index: u8) -> Option<&RuntimeButtonState> {
        self.states.get(usize::from(index))
    }

    pub fn analog(&self, index: u8) -> Option<&AnalogChannel> {
        self.analog.get(usize::from(index))
    }

    fn button_count(&self) -> usize {
        usize::from(self.config.button_count).min(MAX_BUTTONS)
    }

    /// Tick forever.
    pub async fn run(&mut self) -> ! {
        loop {
            self.tick().await;
            self.board.pause_us(TICK_INTERVAL_US).await;
        }
    }

    /// One scheduler pass.
    pub async fn tick(&mut self) {
        let now = self.board.now_ms();

        for _ in 0..MAX_EVENTS_PER_TICK {
            let Some(event) = self.host.poll_event() else {
                break;
            };
            self.apply_event(event, now);
        }

        if self.dispatcher.tap.poll_timeout(now) {
            info!("tap tempo mode ended");
            self.view_dirty = true;
        }

        self.flush_note_offs(now);

        for index in 0..self.button_count() {
            self.scan_button(index as u8).await;
        }

        let now = self.board.now_ms();
        self.scan_encoder(now);
        self.scan_analog(now);
        self.update_outputs(now);
    }

    fn apply_event(&mut self, event: ExternalEvent, now: u64) {
        debug!("event {:?}", event);
        match event {
            ExternalEvent::SelectPreset(index) if usize::from(index) < PRESET_COUNT => {
                self.switch_preset(index, now);
            }
            ExternalEvent::SelectPreset(index) => warn!("preset {} out of range", index),
            ExternalEvent::ReloadPreset => {
                let index = self.dispatcher.nav.preset;
                let preset = &mut self.presets[usize::from(index)];
                if let Err(e) = self.host.load_preset(index, preset) {
                    warn!("reload of preset {} failed: {:?}", index, e);
                }
                self.switch_preset(index, now);
            }
            ExternalEvent::StartCalibration(channel) => match self.analog.get_mut(usize::from(channel)) {
                Some(ch) => {
                    ch.start_calibration();
                    info!("calibrating analog {}", channel);
                }
                None => warn!("no analog channel {}", channel),
            },
            ExternalEvent::StopCalibration(channel) => {
                let Some(ch) = self.analog.get_mut(usize::from(channel)) else {
                    warn!("no analog channel {}", channel);
                    return;
                };
                match ch.stop_calibration() {
                    Some(cal) => {
                        info!("analog {} calibrated to {}..{}", channel, cal.min, cal.max);
                        if let Err(e) = self.host.save_calibration(channel, cal) {
                            warn!("saving calibration failed: {:?}", e);
                        }
                    }
                    None => info!("analog {} calibration discarded, range too small", channel),
                }
            }
            ExternalEvent::SavePresets => {
                for (i, preset) in self.presets.iter().enumerate() {
                    if let Err(e) = self.host.save_preset(i as u8, preset) {
                        warn!("saving preset {} failed: {:?}", i, e);
                    }
                }
            }
        }
    }

    async fn scan_button(&mut self, index: u8) {
        let now = self.board.now_ms();
        let pressed = self.board.button_pressed(index);
        let debounce = self.config.timing.debounce_ms;
        let state = &mut self.states[usize::from(index)];

        match (pressed, state.active) {
            (true, false) => {
                if state.accept_edge(now, debounce) {
                    state.begin_press(now);
                    self.on_press(index, now).await;
                }
            }
            (false, true) => {
                if state.accept_edge(now, debounce) {
                    self.on_release(index, now);
                }
            }
            (true, true) => self.check_hold(index, now),
            (false, false) => {}
        }
    }

    /// Partner of `index`'s combo, if it has one that could still be claimed.
    fn outgoing_partner(&self, index: u8) -> Option<u8> {
        let (partner, _) = self.preset().button(index)?.actions.combo()?;
        let free = usize::from(partner) < self.button_count()
            && partner != index
            && !self.states[usize::from(partner)].consumed;
        free.then_some(partner)
    }

    /// Active, unclaimed button whose combo names `index` as partner.
    fn incoming_owner(&self, index: u8) -> Option<u8> {
        self.preset()
            .buttons
            .iter()
            .take(self.button_count())
            .enumerate()
            .find_map(|(owner, button)| {
                let (partner, _) = button.actions.combo()?;
                let state = &self.states[owner];
                (partner == index && owner != usize::from(index) && state.active && !state.consumed)
                    .then_some(owner as u8)
            })
    }

    async fn on_press(&mut self, index: u8, now: u64) {
        let timing = self.config.timing;
        let tap_active = self.dispatcher.tap.is_active();
        trace!("press {}", index);

        if !tap_active {
            if let Some(partner) = self.outgoing_partner(index) {
                self.states[usize::from(index)].combo_checked = true;
                let found = await_partner(
                    &mut self.board,
                    partner,
                    timing.combo_window_ms,
                    timing.combo_sample_us,
                )
                .await;
                if found && !self.states[usize::from(partner)].consumed {
                    let now = self.board.now_ms();
                    self.fire_combo(index, partner, now);
                    return;
                }
            }
            if let Some(owner) = self.incoming_owner(index) {
                self.fire_combo(owner, index, now);
                return;
            }
        }

        if tap_active {
            if let Some(role) = self.preset().tap_role(index) {
                self.states[usize::from(index)].consumed = true;
                self.tap_control(role, now);
                return;
            }
        }

        let Some(button) = self.preset().button(index) else {
            return;
        };
        let double_tap = button
            .actions
            .find(TriggerKind::DoubleTap)
            .filter(|_| {
                self.states[usize::from(index)].within_double_tap(now, timing.double_tap_ms)
            })
            .cloned();
        if let Some(action) = double_tap {
            self.states[usize::from(index)].consumed = true;
            debug!("double tap {}", index);
            self.fire(&action, now);
            return;
        }

        if button.actions.has(TriggerKind::LongPress) {
            trace!("press {} deferred until release or hold", index);
            return;
        }

        self.fire_press(index, now, false);
    }

    fn fire_combo(&mut self, owner: u8, partner: u8, now: u64) {
        let Some(action) = self
            .preset()
            .button(owner)
            .and_then(|b| b.actions.combo())
            .map(|(_, action)| action.clone())
        else {
            return;
        };
        self.states[usize::from(owner)].claim(now);
        self.states[usize::from(partner)].claim(now);
        info!("combo {} + {}", owner, partner);
        self.host
            .show_label(action.display_label(), self.config.timing.label_ms);
        self.fire(&action, now);
    }

    fn tap_control(&mut self, role: TapRole, now: u64) {
        self.dispatcher.tap_control(&mut self.host, role, now);
        self.view_dirty = true;
    }

    /// Fire the press action of `index`. Deferred presses get their note-off
    /// scheduled instead of held until release.
    fn fire_press(&mut self, index: u8, now: u64, deferred: bool) -> Outcome {
        let preset = &mut self.presets[usize::from(self.dispatcher.nav.preset)];
        if leds::selectable(preset, index) {
            preset.selected = Some(index);
        }
        let Some(button) = preset.button_mut(index) else {
            return Outcome::Ignored;
        };
        let Some(action) = button.press_action().cloned() else {
            return Outcome::Ignored;
        };
        if button.actions.has(TriggerKind::SecondPress) {
            button.alternate = !button.alternate;
        }
        if button.led_mode == LedMode::Toggle {
            button.latched = !button.latched;
        }

        let outcome = self.fire(&action, now);
        if outcome == Outcome::Sent && action.is_momentary_note() {
            let off = MidiMessage::note_off(action.channel, action.data1);
            if deferred {
                self.schedule_note_off(now + u64::from(self.config.timing.note_off_delay_ms), off);
            } else {
                self.states[usize::from(index)].held_note = Some(off);
            }
        }
        outcome
    }

    fn check_hold(&mut self, index: u8, now: u64) {
        let state = self.states[usize::from(index)];
        if state.hold_fired || state.consumed {
            return;
        }
        let Some(action) = self
            .preset()
            .button(index)
            .and_then(|b| b.actions.find(TriggerKind::LongPress))
        else {
            return;
        };
        let hold_ms = match action.trigger {
            Trigger::LongPress { hold_ms } if hold_ms > 0 => u32::from(hold_ms),
            _ => self.config.timing.default_hold_ms,
        };
        if now.saturating_sub(state.press_start_ms) < u64::from(hold_ms) {
            return;
        }

        let action = action.clone();
        self.states[usize::from(index)].hold_fired = true;
        info!("long press {}", index);
        self.host
            .show_label(action.display_label(), self.config.timing.label_ms);
        let outcome = self.fire(&action, now);
        if outcome == Outcome::Sent && action.is_momentary_note() {
            self.states[usize::from(index)].held_note =
                Some(MidiMessage::note_off(action.channel, action.data1));
        }
    }

    fn on_release(&mut self, index: u8, now: u64) {
        let state = &mut self.states[usize::from(index)];
        let owed = state.release(now);
        let claimed = state.consumed || state.hold_fired;
        state.clear_flags();
        trace!("release {}", index);

        if let Some(off) = owed {
            send_midi(&mut self.host, off);
        }
        if claimed {
            return;
        }

        let Some(button) = self.preset().button(index) else {
            return;
        };
        let deferred = button.actions.has(TriggerKind::LongPress);
        let release = button.actions.find(TriggerKind::Release).cloned();
        if deferred {
            // A deferred press that switched preset ends the release there
            if let Outcome::PresetChanged(_) = self.fire_press(index, now, true) {
                return;
            }
        }
        if let Some(action) = release {
            self.fire(&action, now);
        }
    }

    /// Execute an action and apply a resulting preset change.
    fn fire(&mut self, action: &ActionMessage, now: u64) -> Outcome {
        let outcome = self.dispatcher.execute(&mut self.host, action, now);
        if let Outcome::PresetChanged(index) = outcome {
            self.switch_preset(index, now);
        }
        self.view_dirty = true;
        outcome
    }

    /// Make `index` current. Held notes are released, held buttons stay claimed
    /// so their release does nothing in the new preset.
    fn switch_preset(&mut self, index: u8, _now: u64) {
        let old = self.dispatcher.nav.preset;
        let index = index.min(PRESET_COUNT as u8 - 1);
        for state in self.states.iter_mut() {
            if let Some(off) = state.held_note.take() {
                send_midi(&mut self.host, off);
            }
            *state = state.after_preset_change();
        }
        self.dispatcher.nav.preset = index;
        let preset = &mut self.presets[usize::from(index)];
        preset.reset_runtime();
        self.host
            .show_label(preset.name.as_str(), self.config.timing.label_ms);
        self.view_dirty = true;
        info!("preset {} -> {}", old, index);
    }

    fn schedule_note_off(&mut self, due_ms: u64, message: MidiMessage) {
        if let Err(pending) = self.note_offs.push(PendingNoteOff { due_ms, message }) {
            warn!("note-off queue full, sending now");
            send_midi(&mut self.host, pending.message);
        }
    }

    fn flush_note_offs(&mut self, now: u64) {
        let mut i = 0;
        while i < self.note_offs.len() {
            if self.note_offs[i].due_ms <= now {
                let pending = self.note_offs.swap_remove(i);
                send_midi(&mut self.host, pending.message);
            } else {
                i += 1;
            }
        }
    }

    fn scan_encoder(&mut self, now: u64) {
        let delta = self.board.encoder_delta();
        if delta != 0 {
            match self.dispatcher.nav.mode {
                Mode::Menu => {
                    self.dispatcher.nav.menu_step(delta);
                    self.view_dirty = true;
                }
                Mode::Preset => {
                    if let Some(update) = self.dispatcher.tap.nudge(delta, now) {
                        send_tempo(&mut self.host, update);
                        self.view_dirty = true;
                    }
                }
            }
        }

        let pressed = self.board.encoder_pressed();
        let gesture = self.encoder.update(pressed, now, &self.config.timing);
        let command = match (gesture, self.dispatcher.nav.mode) {
            (None, _) => return,
            (Some(EncoderGesture::Hold), _) => Command::MenuToggle,
            (Some(EncoderGesture::Click), Mode::Menu) => Command::MenuEnter,
            (Some(EncoderGesture::Click), Mode::Preset) if self.dispatcher.tap.is_active() => {
                self.tap_control(TapRole::RhythmNext, now);
                return;
            }
            (Some(EncoderGesture::Click), Mode::Preset) => Command::PresetUp,
        };
        debug!("encoder {:?}", command);
        self.fire(&ActionMessage::new(Trigger::Press, command), now);
    }

    fn scan_analog(&mut self, now: u64) {
        let interval = self.config.timing.analog_interval_ms;
        for channel in self.analog.iter_mut() {
            if !channel.due(now, interval) {
                continue;
            }
            let raw = read_oversampled(&mut self.board, channel.source);
            let Some(value) = channel.process(raw, now) else {
                continue;
            };
            trace!("analog {} = {}", channel.name.as_str(), value);
            for output in channel.resolve(value) {
                match output {
                    RuleOutput::Midi(message) => send_midi(&mut self.host, message),
                    RuleOutput::SysEx(data) => send_sysex(&mut self.host, data),
                };
            }
        }
    }

    fn update_outputs(&mut self, now: u64) {
        let states = &self.states;
        let frame = leds::render(
            self.preset(),
            |i| states[usize::from(i)].active,
            &self.dispatcher.tap,
            now,
            self.config.timing.tap_flash_ms,
        );
        if frame != self.leds {
            self.host.set_leds(&frame);
            self.leds = frame;
        }

        if self.view_dirty {
            self.view_dirty = false;
            let nav = self.dispatcher.nav;
            let tap = &self.dispatcher.tap;
            let view = View {
                preset: nav.preset,
                preset_name: self.presets[usize::from(nav.preset)].name.as_str(),
                mode: nav.mode,
                menu_item: nav.menu_item,
                tempo: tap.is_active().then(|| tap.update()),
                tempo_locked: tap.is_locked(),
            };
            self.host.refresh(&view);
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::action::{label, TapControls};
    use crate::analog::{AnalogMode, AnalogRule, Calibration};
    use crate::config::ButtonConfig;
    use crate::io::{
        AnalogSource, Display, EventSource, PresetStore, RadioControl, StoreError, Transport,
        TransportError,
    };
    use crate::tap_tempo::TempoUpdate;
    use crate::test_util::block_on;
    use std::collections::VecDeque;
    use std::string::String;
    use std::vec::Vec as StdVec;

    #[derive(Default)]
    struct FakeBoard {
        now_us: u64,
        levels: [bool; MAX_BUTTONS],
        /// (time in us, button, level) changes applied as the clock passes them
        timeline: StdVec<(u64, u8, bool)>,
        analog: u16,
        encoder_delta: i8,
        encoder_pressed: bool,
    }

    impl FakeBoard {
        fn apply(&mut self) {
            let now = self.now_us;
            let levels = &mut self.levels;
            self.timeline.retain(|&(at, index, level)| {
                if at <= now {
                    levels[usize::from(index)] = level;
                    false
                } else {
                    true
                }
            });
        }
    }

    impl Board for FakeBoard {
        fn button_pressed(&mut self, index: u8) -> bool {
            self.apply();
            self.levels[usize::from(index)]
        }
        fn read_analog(&mut self, _source: AnalogSource) -> u16 {
            self.analog
        }
        fn encoder_delta(&mut self) -> i8 {
            core::mem::take(&mut self.encoder_delta)
        }
        fn encoder_pressed(&mut self) -> bool {
            self.encoder_pressed
        }
        fn now_ms(&self) -> u64 {
            self.now_us / 1000
        }
        async fn pause_us(&mut self, us: u32) {
            self.now_us += u64::from(us);
        }
    }

    struct FakeHost {
        connected: bool,
        midi: StdVec<MidiMessage>,
        sysex: StdVec<StdVec<u8>>,
        tempo: StdVec<TempoUpdate>,
        labels: StdVec<String>,
        leds: StdVec<LedFrame>,
        refreshes: usize,
        events: VecDeque<ExternalEvent>,
        stored: [Option<Preset>; PRESET_COUNT],
        calibrations: StdVec<(u8, Calibration)>,
    }

    impl Default for FakeHost {
        fn default() -> Self {
            Self {
                connected: true,
                midi: StdVec::new(),
                sysex: StdVec::new(),
                tempo: StdVec::new(),
                labels: StdVec::new(),
                leds: StdVec::new(),
                refreshes: 0,
                events: VecDeque::new(),
                stored: Default::default(),
                calibrations: StdVec::new(),
            }
        }
    }

    impl Transport for FakeHost {
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn send_midi(&mut self, message: MidiMessage) -> Result<(), TransportError> {
            self.midi.push(message);
            Ok(())
        }
        fn send_sysex(&mut self, data: &[u8]) -> Result<(), TransportError> {
            self.sysex.push(data.to_vec());
            Ok(())
        }
        fn send_tempo(&mut self, update: TempoUpdate) -> Result<(), TransportError> {
            self.tempo.push(update);
            Ok(())
        }
    }

    impl Display for FakeHost {
        fn show_label(&mut self, text: &str, _duration_ms: u32) {
            self.labels.push(text.into());
        }
        fn refresh(&mut self, _view: &View<'_>) {
            self.refreshes += 1;
        }
        fn set_leds(&mut self, frame: &LedFrame) {
            self.leds.push(frame.clone());
        }
    }

    impl PresetStore for FakeHost {
        fn load_preset(&mut self, index: u8, preset: &mut Preset) -> Result<(), StoreError> {
            let stored = self.stored[usize::from(index)]
                .as_ref()
                .ok_or(StoreError::NotFound)?;
            *preset = stored.clone();
            Ok(())
        }
        fn save_preset(&mut self, index: u8, preset: &Preset) -> Result<(), StoreError> {
            self.stored[usize::from(index)] = Some(preset.clone());
            Ok(())
        }
        fn load_calibration(&mut self, _channel: u8) -> Result<Calibration, StoreError> {
            Err(StoreError::NotFound)
        }
        fn save_calibration(&mut self, channel: u8, calibration: Calibration) -> Result<(), StoreError> {
            self.calibrations.push((channel, calibration));
            Ok(())
        }
    }

    impl RadioControl for FakeHost {
        fn set_config_radio(&mut self, _enabled: bool) {}
        fn clear_bonds(&mut self) {}
    }

    impl EventSource for FakeHost {
        fn poll_event(&mut self) -> Option<ExternalEvent> {
            self.events.pop_front()
        }
    }

    type TestEngine = Engine<FakeBoard, FakeHost>;

    fn cc(trigger: Trigger, number: u8) -> ActionMessage {
        ActionMessage::new(trigger, Command::ControlChange).data(number, 127)
    }

    fn button(actions: &[ActionMessage]) -> ButtonConfig {
        let mut button = ButtonConfig::new("B");
        for action in actions {
            button.actions.upsert(action.clone()).unwrap();
        }
        button
    }

    fn preset(buttons: StdVec<ButtonConfig>) -> Preset {
        let mut preset = Preset::new("TEST", 4);
        for (i, b) in buttons.into_iter().enumerate() {
            preset.buttons[i] = b;
        }
        preset
    }

    fn engine(presets: StdVec<Preset>) -> TestEngine {
        let config = EngineConfig {
            button_count: 4,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(FakeBoard::default(), FakeHost::default(), config);
        for (i, p) in presets.into_iter().enumerate() {
            *engine.preset_mut(i as u8).unwrap() = p;
        }
        engine
    }

    /// Tick once per millisecond until the clock reaches `ms`.
    fn run_until(engine: &mut TestEngine, ms: u64) {
        while engine.board().now_ms() < ms {
            block_on(engine.tick());
            engine.board_mut().now_us += 1000;
        }
    }

    fn set(engine: &mut TestEngine, index: u8, level: bool) {
        engine.board_mut().levels[usize::from(index)] = level;
    }

    fn midi(engine: &TestEngine) -> &[MidiMessage] {
        &engine.host().midi
    }

    #[test]
    fn test_bounce_fires_once() {
        let mut e = engine(std::vec![preset(std::vec![button(&[cc(Trigger::Press, 10)])])]);
        set(&mut e, 0, true);
        run_until(&mut e, 30);
        set(&mut e, 0, false);
        run_until(&mut e, 60);
        set(&mut e, 0, true);
        run_until(&mut e, 400);
        set(&mut e, 0, false);
        run_until(&mut e, 600);
        assert_eq!(midi(&e), &[MidiMessage::control_change(1, 10, 127)]);
    }

    #[test]
    fn test_toggle_alternates_and_latches_led() {
        let mut toggle = button(&[
            cc(Trigger::Press, 20),
            ActionMessage::new(Trigger::SecondPress, Command::ControlChange).data(20, 0),
        ]);
        toggle.led_mode = LedMode::Toggle;
        let mut e = engine(std::vec![preset(std::vec![toggle])]);

        for t in [0, 400] {
            run_until(&mut e, t);
            set(&mut e, 0, true);
            run_until(&mut e, t + 200);
            set(&mut e, 0, false);
        }
        run_until(&mut e, 800);
        assert_eq!(
            midi(&e),
            &[
                MidiMessage::control_change(1, 20, 127),
                MidiMessage::control_change(1, 20, 0)
            ]
        );
        assert!(!e.preset().buttons[0].latched);
        assert!(e.host().leds.len() >= 2);
    }

    #[test]
    fn test_momentary_note_released_with_button() {
        let note = ActionMessage::new(Trigger::Press, Command::NoteMomentary).data(60, 100);
        let mut e = engine(std::vec![preset(std::vec![button(&[note])])]);
        set(&mut e, 0, true);
        run_until(&mut e, 300);
        assert_eq!(midi(&e), &[MidiMessage::note_on(1, 60, 100)]);
        set(&mut e, 0, false);
        run_until(&mut e, 310);
        assert_eq!(
            midi(&e),
            &[MidiMessage::note_on(1, 60, 100), MidiMessage::note_off(1, 60)]
        );
    }

    #[test]
    fn test_short_tap_with_hold_action_fires_on_release() {
        let note = ActionMessage::new(Trigger::Press, Command::NoteMomentary).data(60, 100);
        let hold = cc(Trigger::LongPress { hold_ms: 0 }, 2);
        let mut e = engine(std::vec![preset(std::vec![button(&[note, hold])])]);

        set(&mut e, 0, true);
        run_until(&mut e, 200);
        assert!(midi(&e).is_empty());

        set(&mut e, 0, false);
        run_until(&mut e, 205);
        assert_eq!(midi(&e), &[MidiMessage::note_on(1, 60, 100)]);
        run_until(&mut e, 212);
        assert_eq!(
            midi(&e),
            &[MidiMessage::note_on(1, 60, 100), MidiMessage::note_off(1, 60)]
        );
    }

    #[test]
    fn test_hold_fires_exactly_once() {
        let press = cc(Trigger::Press, 1);
        let hold = cc(Trigger::LongPress { hold_ms: 0 }, 2);
        let mut e = engine(std::vec![preset(std::vec![button(&[press, hold])])]);

        set(&mut e, 0, true);
        run_until(&mut e, 699);
        assert!(midi(&e).is_empty());
        run_until(&mut e, 2000);
        set(&mut e, 0, false);
        run_until(&mut e, 2200);
        assert_eq!(midi(&e), &[MidiMessage::control_change(1, 2, 127)]);
    }

    #[test]
    fn test_custom_hold_time() {
        let hold = cc(Trigger::LongPress { hold_ms: 250 }, 2);
        let mut e = engine(std::vec![preset(std::vec![button(&[hold])])]);
        set(&mut e, 0, true);
        run_until(&mut e, 251);
        assert_eq!(midi(&e).len(), 1);
    }

    #[test]
    fn test_half_second_hold_fires_once_while_held() {
        let press = cc(Trigger::Press, 1);
        let hold = cc(Trigger::LongPress { hold_ms: 500 }, 2);
        let mut e = engine(std::vec![preset(std::vec![button(&[press, hold])])]);

        set(&mut e, 0, true);
        run_until(&mut e, 500);
        assert!(midi(&e).is_empty());
        run_until(&mut e, 600);
        assert_eq!(midi(&e), &[MidiMessage::control_change(1, 2, 127)]);

        // Still held: no repeat, and the release does not add the press
        run_until(&mut e, 1500);
        set(&mut e, 0, false);
        run_until(&mut e, 1700);
        assert_eq!(midi(&e), &[MidiMessage::control_change(1, 2, 127)]);
    }

    fn combo_preset(owner_extra: Option<ActionMessage>) -> Preset {
        let combo = ActionMessage::new(
            Trigger::Combo {
                partner: 1,
                label: label("BOTH"),
            },
            Command::ControlChange,
        )
        .data(50, 127);
        let mut owner = std::vec![cc(Trigger::Press, 10), combo];
        owner.extend(owner_extra);
        preset(std::vec![button(&owner), button(&[cc(Trigger::Press, 11)])])
    }

    #[test]
    fn test_combo_fires_alone() {
        let mut e = engine(std::vec![combo_preset(None)]);
        set(&mut e, 0, true);
        e.board_mut().timeline.push((5_000, 1, true));
        run_until(&mut e, 300);
        set(&mut e, 0, false);
        set(&mut e, 1, false);
        run_until(&mut e, 600);

        assert_eq!(midi(&e), &[MidiMessage::control_change(1, 50, 127)]);
        assert_eq!(e.host().labels.first().map(String::as_str), Some("BOTH"));
    }

    #[test]
    fn test_combo_timeout_falls_back_to_press() {
        let mut e = engine(std::vec![combo_preset(None)]);
        set(&mut e, 0, true);
        block_on(e.tick());
        // The press waited out the whole rendezvous window
        assert!(e.board().now_ms() >= 40);
        assert_eq!(midi(&e), &[MidiMessage::control_change(1, 10, 127)]);
    }

    #[test]
    fn test_incoming_combo_claims_waiting_owner() {
        // The owner defers its press, so it is still unclaimed when the partner arrives
        let hold = cc(Trigger::LongPress { hold_ms: 0 }, 12);
        let mut e = engine(std::vec![combo_preset(Some(hold))]);

        set(&mut e, 0, true);
        run_until(&mut e, 100);
        assert!(midi(&e).is_empty());
        set(&mut e, 1, true);
        run_until(&mut e, 1000);
        set(&mut e, 0, false);
        set(&mut e, 1, false);
        run_until(&mut e, 1200);

        assert_eq!(midi(&e), &[MidiMessage::control_change(1, 50, 127)]);
        assert!(!e.button_state(0).unwrap().active);
    }

    #[test]
    fn test_claimed_partner_is_not_reused() {
        let combo = |partner, number| {
            ActionMessage::new(
                Trigger::Combo {
                    partner,
                    label: label("PAIR"),
                },
                Command::ControlChange,
            )
            .data(number, 127)
        };
        let mut e = engine(std::vec![preset(std::vec![
            button(&[cc(Trigger::Press, 10), combo(1, 50)]),
            button(&[cc(Trigger::Press, 11)]),
            button(&[cc(Trigger::Press, 12), combo(1, 60)]),
        ])]);

        // 2 + 1 pair up first
        set(&mut e, 2, true);
        e.board_mut().timeline.push((5_000, 1, true));
        run_until(&mut e, 300);
        assert!(e.button_state(1).unwrap().consumed);

        // 1 is still down but already claimed, so 0 gets its plain press
        set(&mut e, 0, true);
        run_until(&mut e, 600);
        for i in 0..3 {
            set(&mut e, i, false);
        }
        run_until(&mut e, 900);

        assert_eq!(
            midi(&e),
            &[
                MidiMessage::control_change(1, 60, 127),
                MidiMessage::control_change(1, 10, 127),
            ]
        );
    }

    fn tap_preset() -> Preset {
        let controls = TapControls {
            rhythm_prev: None,
            rhythm_next: Some(1),
            lock: Some(3),
        };
        let tap = ActionMessage::new(Trigger::Press, Command::TapTempo(controls));
        preset(std::vec![
            button(&[]),
            button(&[cc(Trigger::Press, 11)]),
            button(&[tap]),
            button(&[cc(Trigger::Press, 13)]),
        ])
    }

    fn tap_at(e: &mut TestEngine, index: u8, t: u64) {
        run_until(e, t);
        set(e, index, true);
        run_until(e, t + 150);
        set(e, index, false);
    }

    #[test]
    fn test_tap_tempo_through_buttons() {
        let mut e = engine(std::vec![tap_preset()]);
        tap_at(&mut e, 2, 0);
        run_until(&mut e, 500);
        assert!(e.tap().is_active());
        assert!(e.host().tempo.is_empty());

        tap_at(&mut e, 2, 500);
        assert_eq!(e.host().tempo.len(), 1);
        assert_eq!(e.host().tempo[0].delay_ms, 500);

        // Rhythm control replaces the button's own action while tapping
        tap_at(&mut e, 1, 1000);
        run_until(&mut e, 1200);
        assert_eq!(e.host().tempo.last().unwrap().delay_ms, 250);
        assert!(midi(&e).is_empty());

        run_until(&mut e, 4300);
        assert!(!e.tap().is_active());

        // Outside tap mode the button is ordinary again
        tap_at(&mut e, 1, 4400);
        assert_eq!(midi(&e), &[MidiMessage::control_change(1, 11, 127)]);
    }

    #[test]
    fn test_tap_lock_keeps_mode() {
        let mut e = engine(std::vec![tap_preset()]);
        tap_at(&mut e, 2, 0);
        tap_at(&mut e, 3, 300);
        run_until(&mut e, 10_000);
        assert!(e.tap().is_active() && e.tap().is_locked());
        tap_at(&mut e, 3, 10_000);
        run_until(&mut e, 10_200);
        assert!(!e.tap().is_active());
    }

    #[test]
    fn test_preset_switch_releases_held_note_and_claims_buttons() {
        let note = ActionMessage::new(Trigger::Press, Command::NoteMomentary).data(60, 100);
        let first = preset(std::vec![
            button(&[note]),
            button(&[ActionMessage::new(Trigger::Press, Command::PresetUp)]),
        ]);
        let second = preset(std::vec![
            button(&[]),
            button(&[cc(Trigger::Press, 99), cc(Trigger::LongPress { hold_ms: 0 }, 98)]),
        ]);
        let mut e = engine(std::vec![first, second]);

        set(&mut e, 0, true);
        run_until(&mut e, 200);
        set(&mut e, 1, true);
        run_until(&mut e, 1500);
        assert_eq!(e.navigation().preset, 1);
        set(&mut e, 0, false);
        set(&mut e, 1, false);
        run_until(&mut e, 1700);

        assert_eq!(
            midi(&e),
            &[MidiMessage::note_on(1, 60, 100), MidiMessage::note_off(1, 60)]
        );
        assert_eq!(e.host().labels.last().map(String::as_str), Some("TEST"));
    }

    #[test]
    fn test_double_tap() {
        let mut e = engine(std::vec![preset(std::vec![button(&[
            cc(Trigger::Press, 1),
            cc(Trigger::DoubleTap, 2),
        ])])]);
        tap_at(&mut e, 0, 0);
        tap_at(&mut e, 0, 300);
        // Too late for a double tap
        tap_at(&mut e, 0, 1000);
        run_until(&mut e, 1200);
        assert_eq!(
            midi(&e),
            &[
                MidiMessage::control_change(1, 1, 127),
                MidiMessage::control_change(1, 2, 127),
                MidiMessage::control_change(1, 1, 127),
            ]
        );
    }

    #[test]
    fn test_release_action() {
        let mut e = engine(std::vec![preset(std::vec![button(&[
            cc(Trigger::Press, 1),
            ActionMessage::new(Trigger::Release, Command::ControlChange).data(1, 0),
        ])])]);
        tap_at(&mut e, 0, 0);
        run_until(&mut e, 300);
        assert_eq!(
            midi(&e),
            &[
                MidiMessage::control_change(1, 1, 127),
                MidiMessage::control_change(1, 1, 0),
            ]
        );
    }

    #[test]
    fn test_deferred_preset_switch_skips_old_release() {
        let first = preset(std::vec![button(&[
            ActionMessage::new(Trigger::Press, Command::PresetUp),
            cc(Trigger::LongPress { hold_ms: 0 }, 5),
            ActionMessage::new(Trigger::Release, Command::ControlChange).data(6, 0),
        ])]);
        let second = preset(std::vec![button(&[cc(Trigger::Release, 7)])]);
        let mut e = engine(std::vec![first, second]);

        tap_at(&mut e, 0, 0);
        run_until(&mut e, 400);
        assert_eq!(e.navigation().preset, 1);
        assert!(midi(&e).is_empty());
    }

    #[test]
    fn test_disconnected_transport_drops_silently() {
        let mut e = engine(std::vec![preset(std::vec![button(&[cc(Trigger::Press, 1)])])]);
        e.host_mut().connected = false;
        tap_at(&mut e, 0, 0);
        run_until(&mut e, 300);
        assert!(midi(&e).is_empty());
    }

    #[test]
    fn test_analog_channel_dispatch() {
        let mut e = engine(std::vec![]);
        let mut channel = AnalogChannel::new("EXP", AnalogSource::Gpio(26), AnalogMode::Pot)
            .with_rule(AnalogRule::full(
                ActionMessage::new(Trigger::NoAction, Command::ControlChange).data(7, 0),
            ))
            .unwrap();
        channel.smoothing.alpha = crate::analog::Smoothed::ONE;
        e.add_analog(channel).unwrap();

        e.board_mut().analog = 4095;
        run_until(&mut e, 20);
        assert_eq!(midi(&e), &[MidiMessage::control_change(1, 7, 127)]);

        e.board_mut().analog = 0;
        run_until(&mut e, 40);
        assert_eq!(midi(&e).last(), Some(&MidiMessage::control_change(1, 7, 0)));
        assert_eq!(midi(&e).len(), 2);
    }

    #[test]
    fn test_piezo_hit_sends_one_shot_note() {
        let mut e = engine(std::vec![]);
        let pad = AnalogChannel::new("PAD", AnalogSource::Gpio(28), AnalogMode::Piezo)
            .with_rule(AnalogRule::full(
                ActionMessage::new(Trigger::NoAction, Command::NoteOn)
                    .channel(10)
                    .data(38, 0),
            ))
            .unwrap();
        e.add_analog(pad).unwrap();

        e.board_mut().analog = 4095;
        run_until(&mut e, 19);
        assert!(midi(&e).is_empty());
        // Scan window closes 20 ms after the threshold crossing
        run_until(&mut e, 22);
        assert_eq!(
            midi(&e),
            &[MidiMessage::note_on(10, 38, 127), MidiMessage::note_off(10, 38)]
        );

        e.board_mut().analog = 0;
        run_until(&mut e, 200);
        assert_eq!(midi(&e).len(), 2);
    }

    #[test]
    fn test_calibration_events() {
        let mut e = engine(std::vec![]);
        e.add_analog(AnalogChannel::new("EXP", AnalogSource::Mux(0), AnalogMode::Pot))
            .unwrap();

        e.host_mut().events.push_back(ExternalEvent::StartCalibration(0));
        e.board_mut().analog = 500;
        run_until(&mut e, 10);
        e.board_mut().analog = 3500;
        run_until(&mut e, 20);
        e.host_mut().events.push_back(ExternalEvent::StopCalibration(0));
        run_until(&mut e, 30);

        let expected = Calibration {
            min: 500,
            max: 3500,
            inverted: false,
        };
        assert_eq!(e.host().calibrations, [(0, expected)]);
        assert_eq!(e.analog(0).unwrap().calibration, expected);
    }

    #[test]
    fn test_select_preset_event() {
        let mut e = engine(std::vec![]);
        e.host_mut().events.push_back(ExternalEvent::SelectPreset(2));
        e.host_mut().events.push_back(ExternalEvent::SelectPreset(9));
        run_until(&mut e, 2);
        assert_eq!(e.navigation().preset, 2);
    }

    #[test]
    fn test_remote_select_through_codec() {
        use footswitch_proto::{encode, FrameLayout, Reassembler};

        let layout = FrameLayout::DEFAULT;
        let mut rx = Reassembler::<1>::new(layout);
        let mut message = None;
        for frame in encode(&layout, 4, &[ExternalEvent::SELECT_PRESET, 3]).unwrap() {
            message = rx.push(&frame).unwrap();
        }
        let event = ExternalEvent::from_payload(&message.unwrap().payload).unwrap();

        let mut e = engine(std::vec![]);
        e.host_mut().events.push_back(event);
        run_until(&mut e, 2);
        assert_eq!(e.navigation().preset, 3);
    }

    #[test]
    fn test_load_and_save_presets() {
        let mut e = engine(std::vec![]);
        let custom = preset(std::vec![button(&[cc(Trigger::Press, 77)])]);
        e.host_mut().stored[2] = Some(custom.clone());
        e.load();
        assert_eq!(e.preset_mut(2).unwrap(), &custom);
        assert_eq!(e.preset_mut(0).unwrap(), &factory_preset(0, 4));

        e.host_mut().events.push_back(ExternalEvent::SavePresets);
        run_until(&mut e, 2);
        assert!(e.host().stored.iter().all(Option::is_some));
    }

    #[test]
    fn test_encoder_gestures() {
        let mut e = engine(std::vec![tap_preset()]);

        // Click advances the preset
        e.board_mut().encoder_pressed = true;
        run_until(&mut e, 150);
        e.board_mut().encoder_pressed = false;
        run_until(&mut e, 300);
        assert_eq!(e.navigation().preset, 1);

        // Hold opens the menu, rotation moves through it
        e.board_mut().encoder_pressed = true;
        run_until(&mut e, 900);
        assert_eq!(e.navigation().mode, Mode::Menu);
        e.board_mut().encoder_pressed = false;
        e.board_mut().encoder_delta = 2;
        run_until(&mut e, 1100);
        assert_eq!(e.navigation().menu_item, 2);
    }

    #[test]
    fn test_encoder_nudges_tempo_in_tap_mode() {
        let mut e = engine(std::vec![tap_preset()]);
        tap_at(&mut e, 2, 0);
        tap_at(&mut e, 2, 500);
        run_until(&mut e, 700);
        e.board_mut().encoder_delta = 2;
        run_until(&mut e, 702);
        let last = e.host().tempo.last().unwrap();
        assert_eq!(last.bpm, crate::tap_tempo::Bpm::from_num(121));
        assert_eq!(last.delay_ms, 496);
    }

    #[test]
    fn test_display_refreshed_after_actions() {
        let mut e = engine(std::vec![preset(std::vec![button(&[cc(Trigger::Press, 1)])])]);
        run_until(&mut e, 5);
        let before = e.host().refreshes;
        tap_at(&mut e, 0, 10);
        run_until(&mut e, 300);
        assert!(e.host().refreshes > before);
    }
}
