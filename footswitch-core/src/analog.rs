//! Analog signal conditioning: pots, force sensors, piezo triggers and switches.
//!
//! A channel turns an oversampled raw reading into an optional 0..=127 value.
//! Values are then matched against the channel's gated rules, which produce
//! the outgoing messages.

use fixed::types::I16F16;
use fixed_macro::fixed;
use footswitch_proto::MidiMessage;
use heapless::Vec;

use crate::action::{label, ActionMessage, Command, Label};
use crate::io::{AnalogSource, Board};

pub const MAX_ANALOG_CHANNELS: usize = 4;
pub const MAX_ANALOG_RULES: usize = 4;
pub const OVERSAMPLE_COUNT: u32 = 64;
pub const ADC_MAX: u16 = 4095;
/// Switch mode threshold, half of full scale.
pub const SWITCH_THRESHOLD: u16 = 2048;
/// Smallest raw span a calibration run must observe to be committed.
pub const MIN_CALIBRATION_SPAN: u16 = 100;

/// Filter state and weights. Sixteen integer bits hold a full-scale reading.
pub type Smoothed = I16F16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnalogMode {
    #[default]
    Pot,
    Piezo,
    Fsr,
    Switch,
}

/// Raw input range mapped onto 0..=127.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    pub min: u16,
    pub max: u16,
    pub inverted: bool,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            min: 0,
            max: ADC_MAX,
            inverted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smoothing {
    /// EMA weight of the newest sample, 0..=1.
    pub alpha: Smoothed,
    /// Minimum change in output units before a new value is sent.
    pub hysteresis: u8,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self {
            alpha: fixed!(0.05: I16F16),
            hysteresis: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PiezoParams {
    pub threshold: u16,
    pub scan_ms: u16,
    pub mask_ms: u16,
}

impl Default for PiezoParams {
    fn default() -> Self {
        Self {
            threshold: 400,
            scan_ms: 20,
            mask_ms: 30,
        }
    }
}

/// Fires `action` while the value percentage lies in `[min_pct, max_pct]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalogRule {
    pub min_pct: u8,
    pub max_pct: u8,
    /// Output range the 0..=127 value is mapped onto.
    pub min_out: u8,
    pub max_out: u8,
    pub action: ActionMessage,
}

impl AnalogRule {
    /// Rule covering the whole travel with the full output range.
    #[must_use]
    pub fn full(action: ActionMessage) -> Self {
        Self {
            min_pct: 0,
            max_pct: 100,
            min_out: 0,
            max_out: 127,
            action,
        }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, pct: u8) -> bool {
        (self.min_pct..=self.max_pct).contains(&pct)
    }
}

/// Message produced by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutput<'a> {
    Midi(MidiMessage),
    SysEx(&'a [u8]),
}

impl From<MidiMessage> for RuleOutput<'_> {
    fn from(message: MidiMessage) -> Self {
        Self::Midi(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PiezoState {
    Idle,
    Scanning { since_ms: u64, peak: u16 },
    Masked { until_ms: u64 },
}

/// `x` mapped linearly from `[in_min, in_max]` to `[out_min, out_max]`, unclamped.
#[must_use]
pub fn map_range(x: i32, in_min: i32, in_max: i32, out_min: i32, out_max: i32) -> i32 {
    if in_max == in_min {
        return out_min;
    }
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

fn clamp_midi(x: i32) -> u8 {
    x.clamp(0, 127) as u8
}

/// Mean of [`OVERSAMPLE_COUNT`] readings.
pub fn read_oversampled<B: Board>(board: &mut B, source: AnalogSource) -> u16 {
    let sum: u32 = (0..OVERSAMPLE_COUNT)
        .map(|_| u32::from(board.read_analog(source)))
        .sum();
    (sum / OVERSAMPLE_COUNT) as u16
}

/// One analog input and its conditioning state.
#[derive(Debug, Clone)]
pub struct AnalogChannel {
    pub name: Label,
    pub enabled: bool,
    pub source: AnalogSource,
    pub mode: AnalogMode,
    pub calibration: Calibration,
    pub smoothing: Smoothing,
    pub piezo: PiezoParams,
    /// FSR readings below this are treated as no pressure.
    pub fsr_threshold: u16,
    pub rules: Vec<AnalogRule, MAX_ANALOG_RULES>,

    smoothed: Option<Smoothed>,
    last_value: Option<u8>,
    piezo_state: PiezoState,
    switch_on: bool,
    last_read_ms: Option<u64>,
    observed: Option<(u16, u16)>,
}

impl AnalogChannel {
    #[must_use]
    pub fn new(name: &str, source: AnalogSource, mode: AnalogMode) -> Self {
        Self {
            name: label(name),
            enabled: true,
            source,
            mode,
            calibration: Calibration::default(),
            smoothing: Smoothing::default(),
            piezo: PiezoParams::default(),
            fsr_threshold: 100,
            rules: Vec::new(),
            smoothed: None,
            last_value: None,
            piezo_state: PiezoState::Idle,
            switch_on: false,
            last_read_ms: None,
            observed: None,
        }
    }

    /// Add a rule; returns it back if the list is full.
    pub fn with_rule(mut self, rule: AnalogRule) -> Result<Self, AnalogRule> {
        self.rules.push(rule)?;
        Ok(self)
    }

    /// Clear runtime state; the next reading seeds the filter again.
    pub fn reset(&mut self) {
        self.smoothed = None;
        self.last_value = None;
        self.piezo_state = PiezoState::Idle;
        self.switch_on = false;
    }

    /// Whether a new reading is due at `now_ms`.
    #[must_use]
    pub fn due(&self, now_ms: u64, interval_ms: u32) -> bool {
        self.enabled
            && self
                .last_read_ms
                .map_or(true, |last| now_ms.saturating_sub(last) >= u64::from(interval_ms))
    }

    /// Condition a raw reading. Returns the value to dispatch, if any.
    pub fn process(&mut self, raw: u16, now_ms: u64) -> Option<u8> {
        self.last_read_ms = Some(now_ms);
        if let Some((lo, hi)) = self.observed.as_mut() {
            *lo = (*lo).min(raw);
            *hi = (*hi).max(raw);
        }
        match self.mode {
            AnalogMode::Pot | AnalogMode::Fsr => self.continuous(raw),
            AnalogMode::Piezo => self.peak(raw, now_ms),
            AnalogMode::Switch => self.switch(raw),
        }
    }

    fn continuous(&mut self, raw: u16) -> Option<u8> {
        let raw = Smoothed::from_num(raw);
        let mut s = match self.smoothed {
            // a*raw + (1-a)*prev, with a single rounding step
            Some(prev) => prev + self.smoothing.alpha * (raw - prev),
            None => raw,
        };
        if self.mode == AnalogMode::Fsr && s < Smoothed::from_num(self.fsr_threshold) {
            s = Smoothed::ZERO;
        }
        self.smoothed = Some(s);

        let cal = self.calibration;
        let mut mapped = map_range(
            s.to_num::<i32>(),
            i32::from(cal.min),
            i32::from(cal.max),
            0,
            127,
        );
        if cal.inverted {
            mapped = 127 - mapped;
        }
        let mapped = clamp_midi(mapped);

        let changed = self
            .last_value
            .map_or(true, |last| mapped.abs_diff(last) > self.smoothing.hysteresis);
        if changed {
            self.last_value = Some(mapped);
            Some(mapped)
        } else {
            None
        }
    }

    fn peak(&mut self, raw: u16, now_ms: u64) -> Option<u8> {
        let params = self.piezo;
        if let PiezoState::Masked { until_ms } = self.piezo_state {
            if now_ms <= until_ms {
                return None;
            }
            // The sample that ends the mask may already be the next hit
            self.piezo_state = PiezoState::Idle;
        }
        match self.piezo_state {
            PiezoState::Masked { .. } => None,
            PiezoState::Idle => {
                if raw > params.threshold {
                    self.piezo_state = PiezoState::Scanning {
                        since_ms: now_ms,
                        peak: raw,
                    };
                }
                None
            }
            PiezoState::Scanning { since_ms, peak } => {
                let peak = peak.max(raw);
                if now_ms.saturating_sub(since_ms) < u64::from(params.scan_ms) {
                    self.piezo_state = PiezoState::Scanning { since_ms, peak };
                    return None;
                }
                let velocity = map_range(
                    i32::from(peak),
                    i32::from(params.threshold),
                    i32::from(self.calibration.max),
                    1,
                    127,
                )
                .clamp(1, 127) as u8;
                self.piezo_state = PiezoState::Masked {
                    until_ms: now_ms + u64::from(params.mask_ms),
                };
                trace!("piezo hit: peak {} velocity {}", peak, velocity);
                Some(velocity)
            }
        }
    }

    fn switch(&mut self, raw: u16) -> Option<u8> {
        let on = raw > SWITCH_THRESHOLD;
        if on == self.switch_on {
            return None;
        }
        self.switch_on = on;
        Some(if on { 127 } else { 0 })
    }

    /// Messages the rules produce for `value`.
    #[must_use]
    pub fn resolve(&self, value: u8) -> Vec<RuleOutput<'_>, { MAX_ANALOG_RULES * 2 }> {
        let mut out = Vec::new();
        let pct = clamp_midi(map_range(i32::from(value), 0, 127, 0, 100));

        for rule in self.rules.iter().filter(|r| r.contains(pct)) {
            let output = if self.mode == AnalogMode::Switch {
                value
            } else {
                clamp_midi(map_range(
                    i32::from(value),
                    0,
                    127,
                    i32::from(rule.min_out),
                    i32::from(rule.max_out),
                ))
            };
            let action = &rule.action;
            let ch = action.channel;
            let message: RuleOutput<'_> = match &action.command {
                Command::ControlChange => MidiMessage::control_change(ch, action.data1, output).into(),
                Command::NoteOn | Command::NoteMomentary => {
                    MidiMessage::note_on(ch, action.data1, output).into()
                }
                Command::NoteOff => MidiMessage::note_off(ch, action.data1).into(),
                Command::ProgramChange => MidiMessage::program_change(ch, output).into(),
                Command::SysEx(payload) => RuleOutput::SysEx(payload.as_slice()),
                _ => continue,
            };
            // Capacity is two per rule
            let _ = out.push(message);
            if self.mode == AnalogMode::Piezo
                && matches!(action.command, Command::NoteOn | Command::NoteMomentary)
            {
                let _ = out.push(MidiMessage::note_off(ch, action.data1).into());
            }
        }
        out
    }

    /// Begin observing the raw range.
    pub fn start_calibration(&mut self) {
        self.observed = Some((ADC_MAX, 0));
    }

    #[inline]
    #[must_use]
    pub fn is_calibrating(&self) -> bool {
        self.observed.is_some()
    }

    /// Finish observing. Commits and returns the new range when it spans more
    /// than [`MIN_CALIBRATION_SPAN`], otherwise keeps the old one.
    pub fn stop_calibration(&mut self) -> Option<Calibration> {
        let (lo, hi) = self.observed.take()?;
        if hi <= lo || hi - lo <= MIN_CALIBRATION_SPAN {
            return None;
        }
        self.calibration.min = lo;
        self.calibration.max = hi;
        self.reset();
        Some(self.calibration)
    }
}
