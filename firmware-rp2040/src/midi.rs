//! DIN MIDI over UART.
//!
//! The engine never waits on the UART: [`UartTransport`] renders messages into
//! a bounded [`MidiQueue`] and [`run_midi_out`] writes them out. Incoming SysEx
//! is reassembled by [`run_midi_in`]; remote requests among it are posted to
//! the engine's [`EventQueue`].
//!
//! # Pins
//!
//! Uses UART1:
//! - GPIO 8: TX (MIDI out)
//! - GPIO 9: RX (MIDI in)

use embassy_rp::uart::{Async, Error as UartError, UartRx, UartTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, TrySendError};
use footswitch_core::{ExternalEvent, MidiMessage, TempoUpdate, Transport, TransportError};
use footswitch_proto::{encode, CodecError, FrameLayout, Message, Reassembler, MAX_FRAME_LEN};
use heapless::Vec;
use portable_atomic::{AtomicU32, Ordering};

use crate::host::EventQueue;

pub const MIDI_BAUD: u32 = 31_250;
/// Packets waiting for the UART.
pub const QUEUE_DEPTH: usize = 32;
/// Command byte leading a tempo payload.
pub const TEMPO_COMMAND: u8 = 0x10;

/// One complete MIDI message or SysEx frame.
pub type Packet = Vec<u8, MAX_FRAME_LEN>;
pub type MidiQueue = Channel<CriticalSectionRawMutex, Packet, QUEUE_DEPTH>;

/// Incoming SysEx frames dropped for framing or checksum errors.
pub static FRAMES_DROPPED: AtomicU32 = AtomicU32::new(0);

/// Tempo as a codec payload: command, delay in ms (big endian), rhythm index.
#[must_use]
pub fn tempo_payload(update: &TempoUpdate) -> [u8; 4] {
    let delay = (update.delay_ms.min(u32::from(u16::MAX)) as u16).to_be_bytes();
    [TEMPO_COMMAND, delay[0], delay[1], update.rhythm as u8]
}

/// [`Transport`] feeding the MIDI out queue.
pub struct UartTransport {
    queue: &'static MidiQueue,
    layout: FrameLayout,
    next_id: u8,
}

impl UartTransport {
    #[must_use]
    pub fn new(queue: &'static MidiQueue, layout: FrameLayout) -> Self {
        Self {
            queue,
            layout,
            next_id: 0,
        }
    }

    fn enqueue(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let packet = Packet::from_slice(bytes).map_err(|()| TransportError::Io)?;
        self.queue.try_send(packet).map_err(|TrySendError::Full(_)| TransportError::QueueFull)
    }

    /// Encode `payload` with the chunked codec and queue every frame.
    ///
    /// A message is queued whole or not at all. The engine is the only
    /// producer, so free space can only grow while the frames go in.
    fn send_framed(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let frames = encode(&self.layout, self.next_id, payload).map_err(|e| {
            defmt::warn!("cannot encode SysEx: {:?}", e);
            TransportError::Io
        })?;
        if frames.total() > self.queue.free_capacity() {
            return Err(TransportError::QueueFull);
        }
        // Message ids are a single header byte split into nibbles
        self.next_id = self.next_id.wrapping_add(1);
        for frame in frames {
            self.queue
                .try_send(frame)
                .map_err(|TrySendError::Full(_)| TransportError::QueueFull)?;
        }
        Ok(())
    }
}

impl Transport for UartTransport {
    fn is_connected(&self) -> bool {
        // DIN MIDI has no link detection
        true
    }

    fn send_midi(&mut self, message: MidiMessage) -> Result<(), TransportError> {
        self.enqueue(&message.to_bytes())
    }

    fn send_sysex(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.send_framed(data)
    }

    fn send_tempo(&mut self, update: TempoUpdate) -> Result<(), TransportError> {
        self.send_framed(&tempo_payload(&update))
    }
}

/// Write queued packets to the UART forever.
pub async fn run_midi_out(
    mut tx: UartTx<'static, Async>,
    queue: Receiver<'static, CriticalSectionRawMutex, Packet, QUEUE_DEPTH>,
) -> ! {
    loop {
        let packet = queue.receive().await;
        if let Err(e) = tx.write(&packet).await {
            defmt::error!("MIDI out error: {:?}", e);
        }
    }
}

/// Collect SysEx frames from the UART, reassemble codec messages and post the
/// remote requests among them to the engine.
pub async fn run_midi_in(
    mut rx: UartRx<'static, Async>,
    layout: FrameLayout,
    events: &'static EventQueue,
) -> ! {
    let (start, end) = (layout.start, layout.end);
    let mut reassembler = Reassembler::<4>::new(layout);
    let mut frame = Packet::new();
    let mut in_sysex = false;
    let mut byte = [0u8; 1];

    loop {
        if let Err(e) = rx.read(&mut byte).await {
            if !matches!(e, UartError::Break) {
                defmt::warn!("MIDI in error: {:?}", e);
            }
            in_sysex = false;
            continue;
        }
        match byte[0] {
            b if b == start => {
                frame.clear();
                in_sysex = frame.push(b).is_ok();
            }
            b if b == end && in_sysex => {
                in_sysex = false;
                if frame.push(b).is_err() {
                    continue;
                }
                match reassembler.push(&frame) {
                    Ok(Some(message)) => post_request(&message, events),
                    Ok(None) => {}
                    Err(e) => drop_frame(e),
                }
            }
            // Realtime bytes may interleave with SysEx
            b if b >= 0xF8 => {}
            b if in_sysex => {
                if frame.push(b).is_err() {
                    in_sysex = false;
                    drop_frame(CodecError::BufferTooSmall);
                }
            }
            _ => {}
        }
    }
}

fn post_request(message: &Message, events: &EventQueue) {
    let Some(event) = ExternalEvent::from_payload(&message.payload) else {
        defmt::info!(
            "SysEx message {} received, {} bytes",
            message.id,
            message.payload.len()
        );
        return;
    };
    match events.try_send(event) {
        Ok(()) => defmt::info!("remote request {:?}", event),
        Err(TrySendError::Full(event)) => defmt::warn!("event queue full, {:?} dropped", event),
    }
}

fn drop_frame(error: CodecError) {
    let dropped = FRAMES_DROPPED.fetch_add(1, Ordering::Relaxed) + 1;
    defmt::warn!("SysEx frame dropped: {:?} ({} total)", error, dropped);
}
