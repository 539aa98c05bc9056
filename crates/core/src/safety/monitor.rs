//! Watches the output's frame counter and blacks it out if transmission stalls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::safety::MonitoredOutput;
use crate::timing::join_with_timeout;

const THREAD_NAME: &str = "output-monitor";

pub struct OutputMonitor {
    output: Arc<dyn MonitoredOutput>,
    max_silence: Duration,
    check_interval: Duration,
    running: Arc<AtomicBool>,
    tripped: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OutputMonitor {
    pub fn new(output: Arc<dyn MonitoredOutput>, max_silence_s: f64, check_interval_s: f64) -> Self {
        let max_silence_s = if max_silence_s.is_finite() { max_silence_s.max(0.05) } else { 1.0 };
        let check_interval_s = if check_interval_s.is_finite() {
            check_interval_s.max(0.01)
        } else {
            0.1
        };

        Self {
            output,
            max_silence: Duration::from_secs_f64(max_silence_s),
            check_interval: Duration::from_secs_f64(check_interval_s),
            running: Arc::new(AtomicBool::new(false)),
            tripped: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn start(&mut self) -> std::io::Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);

        let output = Arc::clone(&self.output);
        let running = Arc::clone(&self.running);
        let tripped = Arc::clone(&self.tripped);
        let max_silence = self.max_silence;
        let check_interval = self.check_interval;

        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let mut last_count = output.frames_sent();
                let mut last_progress = Instant::now();

                while running.load(Ordering::SeqCst) {
                    thread::park_timeout(check_interval);
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }

                    let count = output.frames_sent();
                    if count != last_count {
                        last_count = count;
                        last_progress = Instant::now();
                        tripped.store(false, Ordering::SeqCst);
                        continue;
                    }

                    let silence = last_progress.elapsed();
                    if silence > max_silence && !tripped.swap(true, Ordering::SeqCst) {
                        log::error!(
                            "No DMX frames sent for {:.2}s, forcing blackout",
                            silence.as_secs_f64()
                        );
                        output.blackout();
                    }
                }
            })?;

        self.thread = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            join_with_timeout(handle, Duration::from_secs(1), THREAD_NAME);
        }
    }

    /// True after a stall was detected and before frames resumed.
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

impl Drop for OutputMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
