//! Frame clock, pacing and thread shutdown helpers.

use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Seconds since the first call in this process, on a monotonic clock.
///
/// Frame timestamps, heartbeat ages and strobe windows are all measured on
/// this clock. Wall clock steps do not move it.
pub fn monotonic_seconds() -> f64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Below this the OS sleep is skipped and the remainder is waited out in user space.
const SLEEP_MARGIN: Duration = Duration::from_millis(2);
/// Below this we stop yielding and spin.
const SPIN_THRESHOLD: Duration = Duration::from_micros(500);

/// Sleep for `duration` with sub-millisecond accuracy.
///
/// Coarse OS sleep for all but the last couple of milliseconds, then yield,
/// then spin for the final half millisecond.
pub fn hybrid_sleep(duration: Duration) {
    let deadline = Instant::now() + duration;

    let coarse = duration.saturating_sub(SLEEP_MARGIN);
    if !coarse.is_zero() {
        thread::sleep(coarse);
    }

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if remaining > SPIN_THRESHOLD {
            thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}

/// Wait until `deadline`, either precisely or with a single plain sleep.
pub fn sleep_until(deadline: Instant, hybrid: bool) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return;
    }
    if hybrid {
        hybrid_sleep(remaining);
    } else {
        thread::sleep(remaining);
    }
}

/// Join a worker thread, giving up after `timeout`.
///
/// Returns false if the thread was still running at the deadline; it is then
/// left detached.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("Thread '{}' did not stop within {:?}, detaching", name, timeout);
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }

    if handle.join().is_err() {
        log::error!("Thread '{}' panicked", name);
    }
    true
}
