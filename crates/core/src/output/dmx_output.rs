//! Canonical universe plus the transmit thread that streams it.
//!
//! The frame loop writes through [`DmxOutput::apply`]; the transmit thread
//! copies the universe under a short lock and does all I/O outside it. A
//! latched blackout request overrides everything until it is cleared.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::DmxConfig;
use crate::error::{FatalError, RecoverableError};
use crate::output::transport::{open_transport, DmxTransport};
use crate::safety::{Blackoutable, MonitoredOutput};
use crate::state::{FixtureCommand, FrameState, SafetyOverrides};
use crate::timing::join_with_timeout;
use crate::universe::{is_valid_channel, Universe};

const THREAD_NAME: &str = "dmx-transmit";
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);
const ERROR_LOG_EVERY: u64 = 100;
/// DMX512 tops out at about 44 full frames per second.
const MAX_REFRESH_HZ: f64 = 44.0;
const MIN_REFRESH_HZ: f64 = 1.0;
const DEFAULT_REFRESH_HZ: f64 = 40.0;

/// The transmit rate actually used for a configured rate, warning when it differs.
fn effective_refresh_rate(requested: f64) -> f64 {
    if !requested.is_finite() {
        log::warn!(
            "DMX refresh rate {} is not a number, using {}Hz",
            requested,
            DEFAULT_REFRESH_HZ
        );
        return DEFAULT_REFRESH_HZ;
    }

    let rate = requested.clamp(MIN_REFRESH_HZ, MAX_REFRESH_HZ);
    if rate != requested {
        log::warn!(
            "DMX refresh rate {}Hz is outside {}..={}Hz, using {}Hz",
            requested,
            MIN_REFRESH_HZ,
            MAX_REFRESH_HZ,
            rate
        );
    }
    rate
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputStats {
    pub running: bool,
    pub frames_sent: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub blackout_requested: bool,
    pub double_buffer: bool,
    pub invalid_channels: u64,
}

pub struct DmxOutput {
    config: DmxConfig,
    double_buffer: bool,
    universe: Mutex<Universe>,
    transport: Mutex<Option<Box<dyn DmxTransport>>>,
    blackout_requested: AtomicBool,
    running: AtomicBool,
    frames_sent: AtomicU64,
    errors: AtomicU64,
    invalid_channels: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DmxOutput {
    /// An output that opens the configured interface on `start`.
    pub fn new(config: DmxConfig, double_buffer: bool) -> Self {
        Self {
            config,
            double_buffer,
            universe: Mutex::new(Universe::new()),
            transport: Mutex::new(None),
            blackout_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            invalid_channels: AtomicU64::new(0),
            thread: Mutex::new(None),
        }
    }

    /// An output bound to an already open transport.
    pub fn with_transport(
        config: DmxConfig,
        double_buffer: bool,
        transport: Box<dyn DmxTransport>,
    ) -> Self {
        let output = Self::new(config, double_buffer);
        *output.transport.lock() = Some(transport);
        output
    }

    /// Open the interface if needed and spawn the transmit thread.
    pub fn start(self: &Arc<Self>) -> Result<(), FatalError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let description = {
            let mut transport = self.transport.lock();
            if transport.is_none() {
                *transport = Some(open_transport(&self.config)?);
            }
            transport
                .as_ref()
                .map(|t| t.describe())
                .unwrap_or_default()
        };

        let refresh = effective_refresh_rate(self.config.refresh_rate_hz);
        self.running.store(true, Ordering::SeqCst);
        let output = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || output.transmit_loop(refresh))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                FatalError::Connection {
                    interface: description.clone(),
                    reason: e.to_string(),
                }
            })?;
        *self.thread.lock() = Some(handle);

        log::info!(
            "DMX output started on {} at {}Hz (double buffer {})",
            description,
            refresh,
            self.double_buffer
        );
        Ok(())
    }

    /// Stop transmitting, send one final dark frame and close the interface.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            handle.thread().unpark();
            join_with_timeout(handle, JOIN_TIMEOUT, THREAD_NAME);
        }

        let Some(mut slot) = self.transport.try_lock_for(JOIN_TIMEOUT) else {
            log::error!("DMX transport busy, could not send final blackout");
            return;
        };
        if let Some(mut transport) = slot.take() {
            if let Err(e) = transport.send_frame(&Universe::new()) {
                log::error!("Failed to send final blackout frame: {}", e);
            }
            transport.close();
            log::info!(
                "DMX output stopped ({} frames, {} errors)",
                self.frames_sent.load(Ordering::Relaxed),
                self.errors.load(Ordering::Relaxed)
            );
        }
    }

    /// Commit this frame's commands and safety overrides to the universe.
    ///
    /// Works whether or not the transmit thread is running. The frame's
    /// commands are consumed and `state.dmx_universe` receives the committed
    /// result.
    pub fn apply(&self, state: &mut FrameState) {
        if self.blackout_requested.load(Ordering::SeqCst) {
            let mut universe = self.universe.lock();
            universe.clear();
            state.dmx_universe = universe.clone();
        } else if self.double_buffer {
            let mut back = self.universe.lock().clone();
            self.write_frame(&mut back, &state.fixture_commands, &state.safety_overrides);
            state.dmx_universe = back.clone();
            *self.universe.lock() = back;
        } else {
            let mut universe = self.universe.lock();
            self.write_frame(&mut universe, &state.fixture_commands, &state.safety_overrides);
            state.dmx_universe = universe.clone();
        }

        state.fixture_commands.clear();
        state.safety_overrides.clear();
    }

    fn write_frame(
        &self,
        universe: &mut Universe,
        commands: &[FixtureCommand],
        overrides: &SafetyOverrides,
    ) {
        if overrides.blackout {
            universe.clear();
        }

        for cmd in commands {
            for (&channel, &value) in &cmd.channel_values {
                if !is_valid_channel(channel) {
                    let count = self.invalid_channels.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % ERROR_LOG_EVERY == 1 {
                        log::warn!(
                            "{} (fixture '{}')",
                            RecoverableError::Address(channel as u32),
                            cmd.fixture_id
                        );
                    }
                    continue;
                }
                // NaN and infinities keep the previous value
                universe.set_clamped(channel, value);
            }
        }

        for (&channel, &value) in &overrides.channels {
            universe.set(channel, value);
        }
    }

    /// Write a single channel directly. Clears any latched blackout.
    pub fn set_channel(&self, channel: u16, value: u8) -> bool {
        if !is_valid_channel(channel) {
            log::warn!("{}", RecoverableError::Address(channel as u32));
            return false;
        }
        self.universe.lock().set(channel, value);
        self.blackout_requested.store(false, Ordering::SeqCst);
        true
    }

    pub fn snapshot(&self) -> Universe {
        self.universe.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_blackout_requested(&self) -> bool {
        self.blackout_requested.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> OutputStats {
        let frames_sent = self.frames_sent.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let attempts = frames_sent + errors;

        OutputStats {
            running: self.is_running(),
            frames_sent,
            errors,
            error_rate: if attempts == 0 {
                0.0
            } else {
                errors as f64 / attempts as f64
            },
            blackout_requested: self.is_blackout_requested(),
            double_buffer: self.double_buffer,
            invalid_channels: self.invalid_channels.load(Ordering::Relaxed),
        }
    }

    fn transmit_loop(&self, refresh: f64) {
        let period = Duration::from_secs_f64(1.0 / refresh);

        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();

            let frame = if self.blackout_requested.load(Ordering::SeqCst) {
                Universe::new()
            } else {
                self.universe.lock().clone()
            };

            let result = match self.transport.lock().as_mut() {
                Some(transport) => transport.send_frame(&frame),
                None => Err(RecoverableError::Transmission(
                    "transport closed".to_string(),
                )),
            };

            match result {
                Ok(()) => {
                    self.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    let count = self.errors.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % ERROR_LOG_EVERY == 1 {
                        log::error!("{} ({} errors so far)", e, count);
                    }
                }
            }

            let elapsed = started.elapsed();
            if elapsed < period {
                thread::park_timeout(period - elapsed);
            }
        }
    }
}

impl Blackoutable for DmxOutput {
    fn blackout(&self) {
        self.universe.lock().clear();
        self.blackout_requested.store(true, Ordering::SeqCst);
        log::warn!("DMX blackout");
    }

    fn request_blackout(&self) {
        if !self.blackout_requested.swap(true, Ordering::SeqCst) {
            log::warn!("DMX blackout requested");
        }
    }

    fn clear_blackout_request(&self) {
        self.blackout_requested.store(false, Ordering::SeqCst);
    }
}

impl MonitoredOutput for DmxOutput {
    fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}
