//! Everything the engine talks to besides the panel.

use embassy_rp::gpio::Output;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver};
use footswitch_core::analog::MAX_ANALOG_CHANNELS;
use footswitch_core::{
    Calibration, Display, EventSource, ExternalEvent, LedFrame, LedLevel, MidiMessage, Preset,
    PresetStore, RadioControl, StoreError, TempoUpdate, Transport, TransportError, View,
    PRESET_COUNT,
};

use crate::midi::UartTransport;

pub const EVENT_QUEUE_DEPTH: usize = 4;
pub type EventQueue = Channel<CriticalSectionRawMutex, ExternalEvent, EVENT_QUEUE_DEPTH>;

/// Presets and calibrations kept in RAM. Nothing survives a reset.
#[derive(Default)]
pub struct VolatileStore {
    presets: [Option<Preset>; PRESET_COUNT],
    calibrations: [Option<Calibration>; MAX_ANALOG_CHANNELS],
}

impl PresetStore for VolatileStore {
    fn load_preset(&mut self, index: u8, preset: &mut Preset) -> Result<(), StoreError> {
        let stored = self
            .presets
            .get(usize::from(index))
            .and_then(Option::as_ref)
            .ok_or(StoreError::NotFound)?;
        preset.clone_from(stored);
        Ok(())
    }

    fn save_preset(&mut self, index: u8, preset: &Preset) -> Result<(), StoreError> {
        let slot = self
            .presets
            .get_mut(usize::from(index))
            .ok_or(StoreError::NotFound)?;
        *slot = Some(preset.clone());
        Ok(())
    }

    fn load_calibration(&mut self, channel: u8) -> Result<Calibration, StoreError> {
        self.calibrations
            .get(usize::from(channel))
            .copied()
            .flatten()
            .ok_or(StoreError::NotFound)
    }

    fn save_calibration(&mut self, channel: u8, calibration: Calibration) -> Result<(), StoreError> {
        let slot = self
            .calibrations
            .get_mut(usize::from(channel))
            .ok_or(StoreError::NotFound)?;
        *slot = Some(calibration);
        Ok(())
    }
}

/// Host collaborators for the engine. Labels and views go to the log; the
/// on-board LED follows the tap-tempo flash.
pub struct BoardHost {
    transport: UartTransport,
    store: VolatileStore,
    led: Output<'static>,
    events: Receiver<'static, CriticalSectionRawMutex, ExternalEvent, EVENT_QUEUE_DEPTH>,
}

impl BoardHost {
    #[must_use]
    pub fn new(transport: UartTransport, led: Output<'static>, events: &'static EventQueue) -> Self {
        Self {
            transport,
            store: VolatileStore::default(),
            led,
            events: events.receiver(),
        }
    }
}

impl Transport for BoardHost {
    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn send_midi(&mut self, message: MidiMessage) -> Result<(), TransportError> {
        self.transport.send_midi(message)
    }

    fn send_sysex(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.transport.send_sysex(data)
    }

    fn send_tempo(&mut self, update: TempoUpdate) -> Result<(), TransportError> {
        self.transport.send_tempo(update)
    }
}

impl Display for BoardHost {
    fn show_label(&mut self, text: &str, duration_ms: u32) {
        defmt::info!("label '{}' for {} ms", text, duration_ms);
    }

    fn refresh(&mut self, view: &View<'_>) {
        defmt::debug!(
            "view: preset {} '{}' {:?} item {}",
            view.preset,
            view.preset_name,
            view.mode,
            view.menu_item
        );
        if let Some(tempo) = view.tempo {
            defmt::debug!(
                "tempo {} bpm x10, {} ms, locked={}",
                tempo.bpm_tenths(),
                tempo.delay_ms,
                view.tempo_locked
            );
        }
    }

    fn set_leds(&mut self, frame: &LedFrame) {
        let flashing = frame.leds.iter().any(|led| led.level == LedLevel::Flash);
        self.led.set_level(flashing.into());
    }

    fn menu_enter(&mut self, item: u8) {
        defmt::info!("menu item {} selected", item);
    }
}

impl PresetStore for BoardHost {
    fn load_preset(&mut self, index: u8, preset: &mut Preset) -> Result<(), StoreError> {
        self.store.load_preset(index, preset)
    }

    fn save_preset(&mut self, index: u8, preset: &Preset) -> Result<(), StoreError> {
        self.store.save_preset(index, preset)
    }

    fn load_calibration(&mut self, channel: u8) -> Result<Calibration, StoreError> {
        self.store.load_calibration(channel)
    }

    fn save_calibration(&mut self, channel: u8, calibration: Calibration) -> Result<(), StoreError> {
        self.store.save_calibration(channel, calibration)
    }
}

impl RadioControl for BoardHost {
    fn set_config_radio(&mut self, enabled: bool) {
        defmt::info!("no radio on this board, ignoring enable={}", enabled);
    }

    fn clear_bonds(&mut self) {
        defmt::info!("no radio on this board, no bonds to clear");
    }
}

impl EventSource for BoardHost {
    fn poll_event(&mut self) -> Option<ExternalEvent> {
        self.events.try_receive().ok()
    }
}
