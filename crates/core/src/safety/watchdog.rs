//! Independent heartbeat watchdog.
//!
//! The frame loop beats once per tick. If beats stop for longer than the
//! timeout, the watchdog thread asks the output to black out. It fires once
//! per stall; the next beat re-arms it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::timing::join_with_timeout;

pub const MIN_TIMEOUT_S: f64 = 0.05;
pub const MIN_CHECK_INTERVAL_S: f64 = 0.01;
pub const DEFAULT_CHECK_INTERVAL_S: f64 = 0.1;

const THREAD_NAME: &str = "heartbeat-watchdog";
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

type TimeoutCallback = Box<dyn Fn() + Send + Sync>;

struct Shared {
    last_heartbeat: Mutex<Instant>,
    triggered: AtomicBool,
    running: AtomicBool,
    on_timeout: TimeoutCallback,
}

pub struct HeartbeatWatchdog {
    shared: Arc<Shared>,
    timeout: Duration,
    check_interval: Duration,
    thread: Option<JoinHandle<()>>,
}

impl HeartbeatWatchdog {
    pub fn new<F>(timeout_s: f64, check_interval_s: f64, on_timeout: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                last_heartbeat: Mutex::new(Instant::now()),
                triggered: AtomicBool::new(false),
                running: AtomicBool::new(false),
                on_timeout: Box::new(on_timeout),
            }),
            timeout: Duration::from_secs_f64(sanitize(timeout_s, MIN_TIMEOUT_S, 1.0)),
            check_interval: Duration::from_secs_f64(sanitize(
                check_interval_s,
                MIN_CHECK_INTERVAL_S,
                DEFAULT_CHECK_INTERVAL_S,
            )),
            thread: None,
        }
    }

    /// Spawn the checker thread. Starting twice is a no-op.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        self.beat();
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let timeout = self.timeout;
        let check_interval = self.check_interval;
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || Self::watch(shared, timeout, check_interval))?;

        self.thread = Some(handle);
        log::info!(
            "Heartbeat watchdog started (timeout {:?}, check every {:?})",
            self.timeout,
            self.check_interval
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            join_with_timeout(handle, JOIN_TIMEOUT, THREAD_NAME);
            log::info!("Heartbeat watchdog stopped");
        }
    }

    /// Record a heartbeat and re-arm the trigger.
    pub fn beat(&self) {
        *self.shared.last_heartbeat.lock() = Instant::now();
        self.shared.triggered.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    pub fn is_triggered(&self) -> bool {
        self.shared.triggered.load(Ordering::SeqCst)
    }

    pub fn time_since_beat(&self) -> Duration {
        self.shared.last_heartbeat.lock().elapsed()
    }

    fn watch(shared: Arc<Shared>, timeout: Duration, check_interval: Duration) {
        while shared.running.load(Ordering::SeqCst) {
            thread::park_timeout(check_interval);
            if !shared.running.load(Ordering::SeqCst) {
                break;
            }

            let elapsed = shared.last_heartbeat.lock().elapsed();
            if elapsed > timeout && !shared.triggered.swap(true, Ordering::SeqCst) {
                log::error!(
                    "Heartbeat lost for {:.2}s, requesting blackout",
                    elapsed.as_secs_f64()
                );
                (shared.on_timeout)();
            }
        }
    }
}

impl Drop for HeartbeatWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sanitize(value: f64, floor: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.max(floor)
    } else {
        fallback
    }
}
