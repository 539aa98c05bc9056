//! Wire transports for a finished DMX frame.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serialport::{DataBits, Parity, SerialPort, StopBits};

use crate::artnet::{ArtNetTransmitter, NetworkConfig};
use crate::config::{DmxConfig, InterfaceType};
use crate::error::{FatalError, RecoverableError};
use crate::universe::Universe;

pub const DMX_BAUD_RATE: u32 = 250_000;
const BREAK_TIME: Duration = Duration::from_micros(100);
const MARK_AFTER_BREAK: Duration = Duration::from_micros(12);

/// Sends one complete universe per call.
pub trait DmxTransport: Send {
    fn send_frame(&mut self, frame: &Universe) -> Result<(), RecoverableError>;

    fn close(&mut self) {}

    fn describe(&self) -> String;
}

/// Open the transport selected in the DMX config.
pub fn open_transport(config: &DmxConfig) -> Result<Box<dyn DmxTransport>, FatalError> {
    match config.interface_type {
        InterfaceType::EnttecOpen => Ok(Box::new(SerialTransport::open(&config.serial_port)?)),
        InterfaceType::Artnet => Ok(Box::new(ArtNetTransport::open(config)?)),
    }
}

/// Raw DMX512 over an open USB-serial interface: break, mark-after-break,
/// then the start code and 512 slots at 250 kbaud 8N2.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialTransport {
    pub fn open(path: &str) -> Result<Self, FatalError> {
        let port = serialport::new(path, DMX_BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::Two)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| FatalError::Connection {
                interface: format!("serial {}", path),
                reason: e.to_string(),
            })?;

        log::info!("Opened DMX serial interface {}", path);
        Ok(Self {
            port,
            path: path.to_string(),
        })
    }
}

impl DmxTransport for SerialTransport {
    fn send_frame(&mut self, frame: &Universe) -> Result<(), RecoverableError> {
        let io_err = |e: &dyn std::fmt::Display| RecoverableError::Transmission(e.to_string());

        self.port.set_break().map_err(|e| io_err(&e))?;
        thread::sleep(BREAK_TIME);
        self.port.clear_break().map_err(|e| io_err(&e))?;
        thread::sleep(MARK_AFTER_BREAK);

        self.port.write_all(frame.as_bytes()).map_err(|e| io_err(&e))?;
        self.port.flush().map_err(|e| io_err(&e))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial {}", self.path)
    }
}

/// ArtDMX over UDP. The sequence number advances on every frame.
pub struct ArtNetTransport {
    transmitter: ArtNetTransmitter,
    port_address: u16,
    sequence: u8,
}

impl ArtNetTransport {
    pub fn open(config: &DmxConfig) -> Result<Self, FatalError> {
        let host = config.artnet_host.parse().map_err(|_| {
            FatalError::Config(format!("Invalid Art-Net host '{}'", config.artnet_host))
        })?;
        let network = NetworkConfig::new(host, config.artnet_port, config.artnet_broadcast)
            .with_address(config.artnet_net, config.artnet_subnet, config.universe);

        let mut transmitter = ArtNetTransmitter::new(network);
        transmitter.open().map_err(|e| FatalError::Connection {
            interface: "artnet".to_string(),
            reason: e.to_string(),
        })?;

        log::info!(
            "Art-Net output ready: {} to {}",
            transmitter.config().get_mode_string(),
            transmitter.config().get_destination()
        );

        Ok(Self {
            port_address: transmitter.config().port_address(),
            transmitter,
            sequence: 0,
        })
    }
}

impl DmxTransport for ArtNetTransport {
    fn send_frame(&mut self, frame: &Universe) -> Result<(), RecoverableError> {
        self.transmitter
            .send_dmx(self.port_address, frame.payload(), self.sequence)?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }

    fn close(&mut self) {
        self.transmitter.close();
    }

    fn describe(&self) -> String {
        format!(
            "artnet {} port-address {}",
            self.transmitter.config().get_destination(),
            self.port_address
        )
    }
}

const MOCK_HISTORY: usize = 256;

/// In-memory transport for mock runs and tests.
///
/// Clones share the same recording, so a test can keep one handle while the
/// output owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    frames: Arc<Mutex<VecDeque<Universe>>>,
    frames_sent: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    fail: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }

    pub fn last_frame(&self) -> Option<Universe> {
        self.frames.lock().back().cloned()
    }

    /// The most recent frames, oldest first.
    pub fn frames(&self) -> Vec<Universe> {
        self.frames.lock().iter().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DmxTransport for MockTransport {
    fn send_frame(&mut self, frame: &Universe) -> Result<(), RecoverableError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RecoverableError::Transmission("mock failure".to_string()));
        }

        let mut frames = self.frames.lock();
        if frames.len() == MOCK_HISTORY {
            frames.pop_front();
        }
        frames.push_back(frame.clone());
        self.frames_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
