//! Tap-tempo estimator.
//!
//! The first tap of a sequence only enters tap mode. Every further tap within
//! the timeout derives a BPM from the interval and produces a [`TempoUpdate`]
//! carrying the delay time for the current rhythm subdivision.

use fixed::types::U16F16;
use fixed_macro::fixed;

/// Beats per minute.
pub type Bpm = U16F16;

pub const MIN_BPM: Bpm = fixed!(40: U16F16);
pub const MAX_BPM: Bpm = fixed!(300: U16F16);
pub const DEFAULT_BPM: Bpm = fixed!(120: U16F16);
/// BPM change per encoder detent.
pub const BPM_STEP: Bpm = fixed!(0.5: U16F16);

pub const MIN_DELAY_MS: u32 = 20;
pub const MAX_DELAY_MS: u32 = 1000;

const MS_PER_MINUTE: Bpm = fixed!(60000: U16F16);

/// Delay subdivision relative to a quarter note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rhythm {
    #[default]
    Quarter,
    Eighth,
    DottedEighth,
    Half,
}

impl Rhythm {
    const ALL: [Self; 4] = [Self::Quarter, Self::Eighth, Self::DottedEighth, Self::Half];

    #[must_use]
    pub const fn multiplier(self) -> U16F16 {
        match self {
            Self::Quarter => fixed!(1: U16F16),
            Self::Eighth => fixed!(0.5: U16F16),
            Self::DottedEighth => fixed!(0.75: U16F16),
            Self::Half => fixed!(2: U16F16),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Quarter => "1/4",
            Self::Eighth => "1/8",
            Self::DottedEighth => "1/8d",
            Self::Half => "1/2",
        }
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self::ALL[(self as usize + 1) % Self::ALL.len()]
    }

    #[must_use]
    pub fn prev(self) -> Self {
        Self::ALL[(self as usize + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

/// Tempo forwarded to the effects unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoUpdate {
    pub bpm: Bpm,
    pub rhythm: Rhythm,
    pub delay_ms: u32,
}

impl TempoUpdate {
    /// BPM in tenths, for logging and display.
    #[must_use]
    pub fn bpm_tenths(&self) -> u32 {
        (self.bpm * fixed!(10: U16F16)).round().to_num::<u32>()
    }
}

/// Delay in milliseconds for `bpm` at `rhythm`, clamped to the device range.
#[must_use]
pub fn delay_ms(bpm: Bpm, rhythm: Rhythm) -> u32 {
    let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
    let beat = MS_PER_MINUTE / bpm;
    let delay = beat.saturating_mul(rhythm.multiplier()).round().to_num::<u32>();
    delay.clamp(MIN_DELAY_MS, MAX_DELAY_MS)
}

/// BPM for a tap interval, clamped to `[MIN_BPM, MAX_BPM]`.
#[must_use]
pub fn bpm_from_interval(interval_ms: u64) -> Bpm {
    let Some(interval) = Bpm::checked_from_num(interval_ms) else {
        return MIN_BPM;
    };
    MS_PER_MINUTE
        .checked_div(interval)
        .unwrap_or(MAX_BPM)
        .clamp(MIN_BPM, MAX_BPM)
}

fn round_to_step(bpm: Bpm) -> Bpm {
    (bpm / BPM_STEP).round() * BPM_STEP
}

/// Result of a tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapOutcome {
    /// First tap of a sequence; tap mode entered, no tempo yet.
    Started,
    Tempo(TempoUpdate),
}

/// Global tap-tempo state.
#[derive(Debug, Clone)]
pub struct TapTempo {
    last_tap_ms: Option<u64>,
    bpm: Bpm,
    rhythm: Rhythm,
    active: bool,
    locked: bool,
    timeout_at_ms: u64,
    timeout_ms: u32,
}

impl TapTempo {
    #[must_use]
    pub fn new(timeout_ms: u32) -> Self {
        Self {
            last_tap_ms: None,
            bpm: DEFAULT_BPM,
            rhythm: Rhythm::Quarter,
            active: false,
            locked: false,
            timeout_at_ms: 0,
            timeout_ms,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[inline]
    #[must_use]
    pub fn bpm(&self) -> Bpm {
        self.bpm
    }

    #[inline]
    #[must_use]
    pub fn rhythm(&self) -> Rhythm {
        self.rhythm
    }

    #[must_use]
    pub fn update(&self) -> TempoUpdate {
        TempoUpdate {
            bpm: self.bpm,
            rhythm: self.rhythm,
            delay_ms: delay_ms(self.bpm, self.rhythm),
        }
    }

    fn arm(&mut self, now_ms: u64) {
        if !self.locked {
            self.timeout_at_ms = now_ms + u64::from(self.timeout_ms);
        }
    }

    /// Register a tap at `now_ms`.
    pub fn tap(&mut self, now_ms: u64) -> TapOutcome {
        let previous = self.last_tap_ms.filter(|_| self.active);
        self.last_tap_ms = Some(now_ms);
        self.active = true;
        self.arm(now_ms);

        match previous {
            Some(last) if now_ms.saturating_sub(last) <= u64::from(self.timeout_ms) => {
                self.bpm = bpm_from_interval(now_ms - last);
                let update = self.update();
                debug!("tap tempo: {} bpm x10, delay {} ms", update.bpm_tenths(), update.delay_ms);
                TapOutcome::Tempo(update)
            }
            _ => {
                debug!("tap tempo: sequence started");
                TapOutcome::Started
            }
        }
    }

    /// Shift BPM by `detents` half-BPM steps. Ignored outside tap mode.
    pub fn nudge(&mut self, detents: i8, now_ms: u64) -> Option<TempoUpdate> {
        if !self.active || detents == 0 {
            return None;
        }
        let step = BPM_STEP * Bpm::from_num(detents.unsigned_abs());
        let bpm = if detents > 0 {
            self.bpm.saturating_add(step)
        } else {
            self.bpm.saturating_sub(step)
        };
        self.bpm = round_to_step(bpm).clamp(MIN_BPM, MAX_BPM);
        self.arm(now_ms);
        Some(self.update())
    }

    /// Step the rhythm forward or back and return the new delay.
    pub fn step_rhythm(&mut self, forward: bool, now_ms: u64) -> TempoUpdate {
        self.rhythm = if forward {
            self.rhythm.next()
        } else {
            self.rhythm.prev()
        };
        self.arm(now_ms);
        info!("tap tempo: rhythm {}", self.rhythm.name());
        self.update()
    }

    /// Toggle the lock. Unlocking leaves tap mode. Returns the new lock state.
    pub fn toggle_lock(&mut self, now_ms: u64) -> bool {
        if self.locked {
            self.locked = false;
            self.exit();
        } else {
            self.locked = true;
            self.active = true;
            self.timeout_at_ms = now_ms;
        }
        info!("tap tempo: locked={}", self.locked);
        self.locked
    }

    /// Leave tap mode if the timeout elapsed. Returns true when the mode ended.
    pub fn poll_timeout(&mut self, now_ms: u64) -> bool {
        if self.active && !self.locked && now_ms > self.timeout_at_ms {
            self.exit();
            debug!("tap tempo: timed out");
            return true;
        }
        false
    }

    pub fn exit(&mut self) {
        self.active = false;
        self.locked = false;
        self.last_tap_ms = None;
    }

    /// Whether the tempo LED should be lit at `now_ms`.
    #[must_use]
    pub fn flash(&self, now_ms: u64, flash_ms: u32) -> bool {
        let Some(anchor) = self.last_tap_ms else {
            return false;
        };
        let period = u64::from(self.update().delay_ms.max(1));
        now_ms.saturating_sub(anchor) % period < u64::from(flash_ms)
    }
}

impl Default for TapTempo {
    fn default() -> Self {
        Self::new(3000)
    }
}
