#![no_std]
#![no_main]

use defmt::{info, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_rp::adc::{Adc, Channel as AdcChannel, Config as AdcConfig};
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::peripherals::UART1;
use embassy_rp::uart::{Async, Config as UartConfig, Uart, UartRx, UartTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;
use footswitch_core::{
    ActionMessage, AnalogChannel, AnalogMode, AnalogRule, AnalogSource, Command, Engine,
    EngineConfig, Trigger, MAX_BUTTONS,
};
use footswitch_proto::FrameLayout;
use footswitch_rp2040::midi::{Packet, QUEUE_DEPTH};
use footswitch_rp2040::{
    run_midi_in, run_midi_out, AnalogMux, BoardHost, Encoder, EventQueue, MidiQueue, PanelBoard,
    UartTransport, MIDI_BAUD,
};
use heapless::Vec;
use static_cell::StaticCell;

#[cfg(feature = "dev-panic")]
use panic_probe as _;
#[cfg(feature = "prod-panic")]
use panic_reset as _;

bind_interrupts!(struct Irqs {
    UART1_IRQ => embassy_rp::uart::InterruptHandler<UART1>;
});

type PanelEngine = Engine<PanelBoard<'static, Input<'static>>, BoardHost>;

/// Outgoing MIDI packets, engine to UART.
static MIDI_QUEUE: StaticCell<MidiQueue> = StaticCell::new();

/// Requests from other tasks to the engine.
static EVENTS: StaticCell<EventQueue> = StaticCell::new();

static ENGINE: StaticCell<PanelEngine> = StaticCell::new();

/// Expression pedal on ADC0, sending CC 11.
fn expression_pedal() -> Option<AnalogChannel> {
    AnalogChannel::new("EXP", AnalogSource::Gpio(26), AnalogMode::Pot)
        .with_rule(AnalogRule::full(
            ActionMessage::new(Trigger::NoAction, Command::ControlChange).data(11, 0),
        ))
        .ok()
}

/// Piezo drum pad on ADC2, playing a snare note.
fn piezo_pad() -> Option<AnalogChannel> {
    AnalogChannel::new("PAD", AnalogSource::Gpio(28), AnalogMode::Piezo)
        .with_rule(AnalogRule::full(
            ActionMessage::new(Trigger::NoAction, Command::NoteOn).data(38, 0),
        ))
        .ok()
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Footswitch starting...");

    let p = embassy_rp::init(embassy_rp::config::Config::default());

    let queue: &'static MidiQueue = MIDI_QUEUE.init(MidiQueue::new());
    let events: &'static EventQueue = EVENTS.init(EventQueue::new());

    // --- UART Setup ---
    let mut uart_config = UartConfig::default();
    uart_config.baudrate = MIDI_BAUD;

    let uart = Uart::new(
        p.UART1,
        p.PIN_8, // TX
        p.PIN_9, // RX
        Irqs,
        p.DMA_CH0,
        p.DMA_CH1,
        uart_config,
    );
    let (tx, rx) = uart.split();
    let layout = FrameLayout::DEFAULT;

    // --- Panel Setup ---
    let mut buttons: Vec<Input<'static>, MAX_BUTTONS> = Vec::new();
    for pin in [
        Input::new(p.PIN_10, Pull::Up),
        Input::new(p.PIN_11, Pull::Up),
        Input::new(p.PIN_12, Pull::Up),
        Input::new(p.PIN_13, Pull::Up),
        Input::new(p.PIN_14, Pull::Up),
        Input::new(p.PIN_15, Pull::Up),
        Input::new(p.PIN_16, Pull::Up),
        Input::new(p.PIN_17, Pull::Up),
    ] {
        if buttons.push(pin).is_err() {
            warn!("too many buttons, extra pins ignored");
        }
    }
    let encoder = Encoder::new(
        Input::new(p.PIN_18, Pull::Up),
        Input::new(p.PIN_19, Pull::Up),
        Input::new(p.PIN_20, Pull::Up),
    );
    let adc = Adc::new_blocking(p.ADC, AdcConfig::default());

    let mut board = PanelBoard::new(buttons, encoder, adc);
    if board
        .add_adc_pin(26, AdcChannel::new_pin(p.PIN_26, Pull::None))
        .and_then(|()| board.add_adc_pin(28, AdcChannel::new_pin(p.PIN_28, Pull::None)))
        .is_err()
    {
        warn!("ADC pin table full");
    }
    board.set_mux(AnalogMux::new(
        [
            Output::new(p.PIN_2, Level::Low),
            Output::new(p.PIN_3, Level::Low),
            Output::new(p.PIN_4, Level::Low),
        ],
        AdcChannel::new_pin(p.PIN_27, Pull::None),
    ));

    // On-board LED follows the tap-tempo beat
    let led = Output::new(p.PIN_25, Level::Low);
    let host = BoardHost::new(UartTransport::new(queue, layout), led, events);

    let config = EngineConfig {
        button_count: board.button_count() as u8,
        ..EngineConfig::default()
    };
    let engine = ENGINE.init(Engine::new(board, host, config));
    for channel in [expression_pedal(), piezo_pad()].into_iter().flatten() {
        if engine.add_analog(channel).is_err() {
            warn!("no room for another analog channel");
        }
    }
    engine.load();

    spawner.spawn(midi_out_task(tx, queue.receiver())).unwrap();
    spawner.spawn(midi_in_task(rx, layout, events)).unwrap();
    spawner.spawn(engine_task(engine)).unwrap();

    info!("Footswitch initialized, {} buttons", config.button_count);
}

/// Engine task - scans the panel and dispatches actions every tick.
#[embassy_executor::task]
async fn engine_task(engine: &'static mut PanelEngine) {
    engine.run().await
}

/// MIDI out task - writes queued packets to the UART.
#[embassy_executor::task]
async fn midi_out_task(
    tx: UartTx<'static, Async>,
    queue: Receiver<'static, CriticalSectionRawMutex, Packet, QUEUE_DEPTH>,
) {
    run_midi_out(tx, queue).await
}

/// MIDI in task - reassembles SysEx and forwards remote requests.
#[embassy_executor::task]
async fn midi_in_task(
    rx: UartRx<'static, Async>,
    layout: FrameLayout,
    events: &'static EventQueue,
) {
    run_midi_in(rx, layout, events).await
}
