//! Safety layer: the per-frame interlock, the heartbeat watchdog and the
//! output silence monitor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod interlock;
pub mod monitor;
pub mod watchdog;

pub use interlock::SafetyInterlock;
pub use monitor::OutputMonitor;
pub use watchdog::HeartbeatWatchdog;

/// Anything that can be forced dark from another thread.
pub trait Blackoutable: Send + Sync {
    /// Zero the output immediately and latch the blackout request.
    fn blackout(&self);

    /// Latch the blackout request; the output goes dark on its next frame.
    fn request_blackout(&self);

    fn clear_blackout_request(&self) {}
}

/// An output whose transmit progress can be observed.
pub trait MonitoredOutput: Blackoutable {
    fn frames_sent(&self) -> u64;
}

/// Shared emergency stop latch.
///
/// Cloning hands out another handle to the same latch, so a signal handler
/// or control surface can trip it while the interlock reads it every frame.
#[derive(Clone, Default)]
pub struct EmergencyStopHandle {
    active: Arc<AtomicBool>,
}

impl EmergencyStopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, source: &str) {
        if !self.active.swap(true, Ordering::SeqCst) {
            log::error!("EMERGENCY STOP triggered by {}", source);
        }
    }

    pub fn reset(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            log::warn!("Emergency stop reset");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emergency_stop_handle_is_shared() {
        let handle = EmergencyStopHandle::new();
        let remote = handle.clone();
        assert!(!handle.is_active());

        remote.trigger("test");
        assert!(handle.is_active());

        handle.reset();
        assert!(!remote.is_active());
    }
}
