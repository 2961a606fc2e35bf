//! Footswitch MIDI controller firmware for RP2040.
//!
//! Board-specific adapters around [`footswitch_core::Engine`].
//!
//! # Overview
//!
//! The firmware runs on a Raspberry Pi Pico (RP2040) and:
//! 1. Scans eight footswitches, a rotary encoder and up to three analog inputs
//! 2. Runs the engine every millisecond
//! 3. Sends the resulting MIDI out of a DIN socket (31250 baud, 8N1)
//!
//! # Architecture
//!
//! The firmware uses the Embassy async runtime with three concurrent tasks:
//!
//! - **Engine Task**: Ticks the engine, which owns the panel and all state
//! - **MIDI Out Task**: Drains the packet queue into the UART
//! - **MIDI In Task**: Reassembles SysEx and posts remote requests (preset
//!   select, calibration, save) to the engine through an event channel
//!
//! The engine hands packets to the out task through an Embassy
//! [`Channel`](embassy_sync::channel::Channel) and never waits on the UART.
//!
//! # Modules
//!
//! - [`board`]: GPIO/ADC panel ([`PanelBoard`])
//! - [`midi`]: UART MIDI transport ([`UartTransport`])
//! - [`host`]: Display, storage, radio and event adapters ([`BoardHost`])
//!
//! # Features
//!
//! - **`dev-panic`** (default): Use `panic-probe` for development (prints panic info via RTT)
//! - **`prod-panic`**: Use `panic-reset` for production (silent watchdog reset)

#![no_std]

pub mod board;
pub mod host;
pub mod midi;

pub use board::{AnalogMux, Encoder, PanelBoard};
pub use host::{BoardHost, EventQueue, VolatileStore};
pub use midi::{run_midi_in, run_midi_out, MidiQueue, UartTransport, MIDI_BAUD};
