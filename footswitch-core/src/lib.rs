//! Platform-agnostic input handling and action dispatch for a footswitch MIDI
//! controller.
//!
//! This crate turns footswitch presses, a rotary encoder and analog sensors
//! into MIDI messages and local actions. It has no platform dependencies; the
//! board and everything the engine talks to are traits.
//!
//! # Overview
//!
//! - [`action`]: Actions, triggers and the per-button registry ([`ActionList`])
//! - [`config`]: Presets, button configuration and timing ([`Preset`], [`EngineConfig`])
//! - [`button`]: Runtime button state and the combo rendezvous ([`await_partner`])
//! - [`analog`]: Oversampling, calibration, smoothing and rule mapping ([`AnalogChannel`])
//! - [`tap_tempo`]: Tap-tempo estimator ([`TapTempo`])
//! - [`dispatch`]: Action execution ([`Dispatcher`])
//! - [`leds`]: LED model ([`LedFrame`])
//! - [`encoder`]: Encoder push-button gestures
//! - [`io`]: Collaborator traits ([`Board`], [`Transport`], [`Display`], [`PresetStore`])
//! - [`engine`]: Ties it together ([`Engine`])
//!
//! # Example
//!
//! ```rust
//! use footswitch_core::{ActionList, ActionMessage, Command, Trigger, TriggerKind};
//!
//! let mut actions: ActionList<4> = ActionList::new();
//! actions
//!     .upsert(ActionMessage::new(Trigger::Press, Command::ControlChange).data(80, 127))
//!     .unwrap();
//! // A second Press replaces the first instead of adding a duplicate
//! actions
//!     .upsert(ActionMessage::new(Trigger::Press, Command::ControlChange).data(81, 127))
//!     .unwrap();
//! assert_eq!(actions.len(), 1);
//! assert_eq!(actions.find(TriggerKind::Press).unwrap().data1, 81);
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Log through `defmt` instead of the `log` facade

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

#[macro_use]
mod fmt;

pub mod action;
pub mod analog;
pub mod button;
pub mod config;
pub mod defaults;
pub mod dispatch;
pub mod encoder;
pub mod engine;
pub mod io;
pub mod leds;
pub mod tap_tempo;

#[cfg(test)]
mod test_util;

pub use action::{
    label, ActionList, ActionMessage, ButtonActions, Command, Label, RegistryError, Rgb,
    TapControls, Trigger, TriggerKind,
};
pub use analog::{AnalogChannel, AnalogMode, AnalogRule, Calibration, RuleOutput};
pub use button::{await_partner, RuntimeButtonState};
pub use config::{
    Brightness, ButtonConfig, EngineConfig, LedMode, Preset, PresetLedMode, TapRole, Timing,
    MAX_BUTTONS, PRESET_COUNT,
};
pub use defaults::{factory_preset, factory_presets};
pub use dispatch::{Dispatcher, Navigation, Outcome};
pub use encoder::{EncoderButton, EncoderGesture};
pub use engine::Engine;
pub use footswitch_proto::{MidiKind, MidiMessage};
pub use io::{
    AnalogSource, Board, Display, EventSource, ExternalEvent, Host, Mode, PresetStore,
    RadioControl, StoreError, Transport, TransportError, View,
};
pub use leds::{Led, LedFrame, LedLevel};
pub use tap_tempo::{Bpm, Rhythm, TapTempo, TempoUpdate};
