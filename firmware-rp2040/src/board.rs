//! Footswitch panel inputs: buttons, rotary encoder and analog sensors.
//!
//! # Pins
//!
//! | Function | GPIO | Notes |
//! |----------|------|-------|
//! | Buttons 0-7 | 10-17 | Active low, internal pull-up |
//! | Encoder A/B | 18, 19 | Quadrature, active low |
//! | Encoder switch | 20 | Active low |
//! | Mux select S0-S2 | 2, 3, 4 | 8-channel analog multiplexer |
//! | ADC0 | 26 | Expression pedal |
//! | ADC1 | 27 | Multiplexer common |
//! | ADC2 | 28 | Piezo |

use embassy_futures::yield_now;
use embassy_rp::adc::{Adc, Blocking, Channel};
use embassy_rp::gpio::{Level, Output};
use embassy_time::{Instant, Timer};
use embedded_hal::digital::InputPin;
use footswitch_core::{AnalogSource, Board, MAX_BUTTONS};
use heapless::Vec;

/// ADC inputs wired directly to a GPIO.
pub const MAX_ADC_PINS: usize = 3;

/// Quadrature transitions per encoder detent.
const STEPS_PER_DETENT: i8 = 4;

/// Gray-code transition table indexed by `(previous << 2) | current`.
const QUADRATURE: [i8; 16] = [0, -1, 1, 0, 1, 0, 0, -1, -1, 0, 0, 1, 0, 1, -1, 0];

/// 8-channel analog multiplexer in front of one ADC input.
pub struct AnalogMux<'d> {
    select: [Output<'d>; 3],
    common: Channel<'d>,
}

impl<'d> AnalogMux<'d> {
    #[must_use]
    pub fn new(select: [Output<'d>; 3], common: Channel<'d>) -> Self {
        Self { select, common }
    }

    fn route(&mut self, channel: u8) {
        for (bit, pin) in self.select.iter_mut().enumerate() {
            pin.set_level(if channel & (1 << bit) != 0 {
                Level::High
            } else {
                Level::Low
            });
        }
    }
}

/// Quadrature encoder with push switch.
pub struct Encoder<P> {
    a: P,
    b: P,
    switch: P,
    state: u8,
    steps: i8,
}

impl<P: InputPin> Encoder<P> {
    pub fn new(a: P, b: P, switch: P) -> Self {
        Self {
            a,
            b,
            switch,
            state: 0b11,
            steps: 0,
        }
    }

    /// Sample both phases and return whole detents turned since the last call.
    fn poll(&mut self) -> i8 {
        let a = self.a.is_high().unwrap_or(true);
        let b = self.b.is_high().unwrap_or(true);
        let current = (u8::from(a) << 1) | u8::from(b);
        let index = usize::from((self.state << 2) | current);
        self.state = current;
        self.steps += QUADRATURE[index];

        let detents = self.steps / STEPS_PER_DETENT;
        self.steps %= STEPS_PER_DETENT;
        detents
    }
}

/// The footswitch panel as a [`Board`].
pub struct PanelBoard<'d, P> {
    buttons: Vec<P, MAX_BUTTONS>,
    encoder: Encoder<P>,
    adc: Adc<'d, Blocking>,
    /// `(gpio, channel)` pairs for [`AnalogSource::Gpio`].
    adc_pins: Vec<(u8, Channel<'d>), MAX_ADC_PINS>,
    mux: Option<AnalogMux<'d>>,
}

impl<'d, P: InputPin> PanelBoard<'d, P> {
    pub fn new(buttons: Vec<P, MAX_BUTTONS>, encoder: Encoder<P>, adc: Adc<'d, Blocking>) -> Self {
        Self {
            buttons,
            encoder,
            adc,
            adc_pins: Vec::new(),
            mux: None,
        }
    }

    /// Register a directly wired ADC pin. Returns the channel back when all
    /// slots are taken.
    pub fn add_adc_pin(&mut self, gpio: u8, channel: Channel<'d>) -> Result<(), Channel<'d>> {
        self.adc_pins.push((gpio, channel)).map_err(|(_, ch)| ch)
    }

    pub fn set_mux(&mut self, mux: AnalogMux<'d>) {
        self.mux = Some(mux);
    }

    #[inline]
    #[must_use]
    pub fn button_count(&self) -> usize {
        self.buttons.len()
    }
}

impl<P: InputPin> Board for PanelBoard<'_, P> {
    fn button_pressed(&mut self, index: u8) -> bool {
        self.buttons
            .get_mut(usize::from(index))
            .is_some_and(|pin| pin.is_low().unwrap_or(false))
    }

    fn read_analog(&mut self, source: AnalogSource) -> u16 {
        let channel = match source {
            AnalogSource::Gpio(gpio) => self
                .adc_pins
                .iter_mut()
                .find(|(pin, _)| *pin == gpio)
                .map(|(_, ch)| ch),
            AnalogSource::Mux(input) => self.mux.as_mut().map(|mux| {
                mux.route(input);
                &mut mux.common
            }),
        };
        let Some(channel) = channel else {
            defmt::warn!("no ADC input for {:?}", source);
            return 0;
        };
        self.adc.blocking_read(channel).unwrap_or_else(|e| {
            defmt::warn!("ADC read failed: {:?}", e);
            0
        })
    }

    fn encoder_delta(&mut self) -> i8 {
        self.encoder.poll()
    }

    fn encoder_pressed(&mut self) -> bool {
        self.encoder.switch.is_low().unwrap_or(false)
    }

    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }

    async fn pause_us(&mut self, us: u32) {
        if us == 0 {
            yield_now().await;
        } else {
            Timer::after_micros(u64::from(us)).await;
        }
    }
}
