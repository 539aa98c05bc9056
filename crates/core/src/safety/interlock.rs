//! Last line of defence before output.
//!
//! Every frame the interlock inspects both the fixture commands and the
//! working universe, in a fixed order:
//!
//! 1. heartbeat timeout, forcing a blackout
//! 2. emergency stop, forcing a blackout
//! 3. laser Y clamp and scan speed floor
//! 4. strobe rate and duration guard with cooldown
//! 5. graceful degradation when beat confidence is low
//!
//! Anything forced in steps 1 to 4 is handed to the output as
//! [`SafetyOverrides`](crate::state::SafetyOverrides), applied after all
//! fixture commands.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use prism_fixtures::{FixtureConfig, FixtureType};

use crate::config::{SafetyConfig, WatchdogConfig};
use crate::error::{FatalError, Result};
use crate::pipeline::{stage_names, PipelineStage};
use crate::safety::{Blackoutable, EmergencyStopHandle, HeartbeatWatchdog};
use crate::state::{FixtureCommand, FrameState, SafetyState};
use crate::universe::Universe;

const STROBE_WINDOW_S: f64 = 1.0;
const MIN_DEGRADATION_SCALE: f64 = 0.35;

struct LaserChannels {
    id: String,
    y: u16,
    speed: u16,
}

pub struct SafetyInterlock {
    config: SafetyConfig,
    lasers: Vec<LaserChannels>,
    strobe_channels: Vec<(String, u16)>,
    protected_channels: HashSet<u16>,

    last_heartbeat: Option<f64>,
    strobe_onsets: VecDeque<f64>,
    strobe_active_since: Option<f64>,
    strobe_levels: Vec<bool>,
    cooldown_until: Option<f64>,
    last_ok: bool,

    emergency_stop: EmergencyStopHandle,
    output: Option<Arc<dyn Blackoutable>>,
    watchdog: Option<HeartbeatWatchdog>,
}

impl SafetyInterlock {
    pub fn new(config: SafetyConfig, fixtures: &[FixtureConfig]) -> Self {
        let enabled: Vec<&FixtureConfig> = fixtures.iter().filter(|f| f.enabled).collect();

        let lasers = enabled
            .iter()
            .filter(|f| f.fixture_type == FixtureType::Laser)
            .map(|f| LaserChannels {
                id: f.id.clone(),
                y: f.address(config.laser.y_channel_offset),
                speed: f.address(config.laser.speed_channel_offset),
            })
            .collect();

        let strobe_channels: Vec<(String, u16)> = enabled
            .iter()
            .filter_map(|f| f.strobe_address().map(|ch| (f.id.clone(), ch)))
            .collect();
        let strobe_levels = vec![false; strobe_channels.len()];

        // Laser mode channels select the operating mode, scaling them changes behavior.
        let protected_channels = enabled
            .iter()
            .filter(|f| f.fixture_type == FixtureType::Laser)
            .map(|f| f.address(config.laser.mode_channel_offset))
            .collect();

        Self {
            config,
            lasers,
            strobe_channels,
            protected_channels,
            last_heartbeat: None,
            strobe_onsets: VecDeque::new(),
            strobe_active_since: None,
            strobe_levels,
            cooldown_until: None,
            last_ok: true,
            emergency_stop: EmergencyStopHandle::new(),
            output: None,
            watchdog: None,
        }
    }

    /// Wire the interlock to an output so the watchdog can black it out from
    /// its own thread.
    pub fn with_output(mut self, output: Arc<dyn Blackoutable>, watchdog: &WatchdogConfig) -> Self {
        let target = Arc::clone(&output);
        self.watchdog = Some(HeartbeatWatchdog::new(
            self.config.heartbeat_timeout_s,
            watchdog.check_interval_s,
            move || target.request_blackout(),
        ));
        self.output = Some(output);
        self
    }

    pub fn emergency_stop_handle(&self) -> EmergencyStopHandle {
        self.emergency_stop.clone()
    }

    pub fn trigger_emergency_stop(&self, source: &str) {
        self.emergency_stop.trigger(source);
        if let Some(output) = &self.output {
            output.request_blackout();
        }
    }

    /// Release the emergency stop and the output's blackout latch.
    pub fn reset_emergency_stop(&self) {
        self.emergency_stop.reset();
        if let Some(output) = &self.output {
            output.clear_blackout_request();
        }
    }

    /// True when no safety flag was raised on the last checked frame.
    pub fn is_safe(&self) -> bool {
        self.last_ok
    }

    pub fn in_strobe_cooldown(&self, now: f64) -> bool {
        self.cooldown_until.map(|until| now < until).unwrap_or(false)
    }

    /// Run all checks against one frame.
    pub fn check(&mut self, state: &mut FrameState) {
        let now = state.timestamp;
        let incoming = state.dmx_universe.clone();
        let mut universe = incoming.clone();
        let mut error_state = None;
        let mut blackout = false;

        if let Some(last) = self.last_heartbeat {
            let elapsed = now - last;
            if elapsed > self.config.heartbeat_timeout_s {
                log::warn!("Heartbeat timeout after {:.2}s, blacking out", elapsed);
                error_state = Some(format!("heartbeat_timeout: {:.2}s", elapsed));
                blackout = true;
            }
        }
        self.beat(now);

        let estop = self.emergency_stop.is_active();
        if estop {
            error_state = Some("emergency_stop_active".to_string());
            blackout = true;
        }

        if blackout {
            universe.clear();
            state.fixture_commands.clear();
        }

        self.enforce_laser_limits(&mut state.fixture_commands, &mut universe);

        let cooling = self.update_strobe_guard(now, &state.fixture_commands, &universe);
        if cooling {
            self.silence_strobes(&mut state.fixture_commands, &mut universe);
        }

        state.safety_overrides.blackout = blackout;
        state.safety_overrides.channels = universe
            .channels()
            .zip(incoming.channels())
            .filter(|((_, after), (_, before))| after != before)
            .map(|((ch, after), _)| (ch, after))
            .collect();

        let scale = self.degradation_scale(state.beat.confidence);
        let degraded = scale < 1.0;
        if degraded {
            self.degrade(&mut state.fixture_commands, &mut universe, scale);
        }

        state.dmx_universe = universe;
        self.last_ok = error_state.is_none() && !cooling && !degraded;
        state.safety = SafetyState {
            ok: self.last_ok,
            last_heartbeat: now,
            error_state,
            laser_enabled: !estop,
            strobe_enabled: !cooling,
            emergency_stop: estop,
            strobe_cooldown: cooling,
            degraded,
            degradation_scale: scale,
        };
    }

    fn beat(&mut self, now: f64) {
        self.last_heartbeat = Some(now);
        if let Some(watchdog) = &self.watchdog {
            watchdog.beat();
        }
    }

    fn enforce_laser_limits(&self, commands: &mut [FixtureCommand], universe: &mut Universe) {
        let y_max = self.config.laser.y_axis_max;
        let min_speed = self.config.laser.min_scan_speed;

        for laser in &self.lasers {
            for cmd in commands.iter_mut().filter(|c| c.fixture_id == laser.id) {
                if let Some(y) = cmd.channel_values.get_mut(&laser.y) {
                    if y.is_finite() && *y > y_max as f64 {
                        *y = y_max as f64;
                    }
                }
                if let Some(speed) = cmd.channel_values.get_mut(&laser.speed) {
                    if speed.is_finite() && *speed > 0.0 && *speed < min_speed as f64 {
                        *speed = min_speed as f64;
                    }
                }
            }

            if universe.get(laser.y) > y_max {
                universe.set(laser.y, y_max);
            }
            let speed = universe.get(laser.speed);
            if speed > 0 && speed < min_speed {
                universe.set(laser.speed, min_speed);
            }
        }
    }

    /// Track strobe onsets and sustained activity. Returns true while in cooldown.
    fn update_strobe_guard(
        &mut self,
        now: f64,
        commands: &[FixtureCommand],
        universe: &Universe,
    ) -> bool {
        if let Some(until) = self.cooldown_until {
            if now < until {
                return true;
            }
            log::info!("Strobe cooldown finished");
            self.cooldown_until = None;
            self.strobe_onsets.clear();
            self.strobe_active_since = None;
            self.strobe_levels.iter_mut().for_each(|level| *level = false);
        }

        // An onset is a rising edge on any channel against the level this
        // interlock last saw there, counted once per frame. The carried
        // universe lags the commands by one frame, so it only decides
        // channels no command addresses.
        let mut rising = false;
        let mut active = false;
        for ((id, ch), level) in self.strobe_channels.iter().zip(self.strobe_levels.iter_mut()) {
            let commanded = commands
                .iter()
                .filter(|c| &c.fixture_id == id)
                .filter_map(|c| c.get(*ch))
                .filter(|v| v.is_finite())
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
            let on = match commanded {
                Some(v) => v > 0.0,
                None => universe.get(*ch) > 0,
            };
            rising |= on && !*level;
            *level = on;
            active |= on;
        }

        while let Some(&onset) = self.strobe_onsets.front() {
            if now - onset > STROBE_WINDOW_S {
                self.strobe_onsets.pop_front();
            } else {
                break;
            }
        }

        if rising {
            self.strobe_onsets.push_back(now);
        }

        let strobe = &self.config.strobe;
        let mut cooling = false;
        if active {
            let since = *self.strobe_active_since.get_or_insert(now);

            let too_fast = self.strobe_onsets.len() as f64 > strobe.max_rate_hz;
            let too_long = now - since > strobe.max_duration_s;
            if too_fast || too_long {
                log::warn!(
                    "Strobe limit exceeded ({} onsets/s, active {:.2}s), cooling down for {}s",
                    self.strobe_onsets.len(),
                    now - since,
                    strobe.cooldown_s
                );
                self.cooldown_until = Some(now + strobe.cooldown_s);
                cooling = true;
            }
        } else {
            self.strobe_active_since = None;
        }

        cooling
    }

    fn silence_strobes(&self, commands: &mut [FixtureCommand], universe: &mut Universe) {
        for (id, ch) in &self.strobe_channels {
            for cmd in commands.iter_mut().filter(|c| &c.fixture_id == id) {
                if let Some(v) = cmd.channel_values.get_mut(ch) {
                    *v = 0.0;
                }
            }
            universe.set(*ch, 0);
        }
    }

    fn degradation_scale(&self, confidence: f64) -> f64 {
        let min_confidence = self.config.min_beat_confidence;
        if !self.config.graceful_degradation || min_confidence <= 0.0 {
            return 1.0;
        }
        if !confidence.is_finite() {
            return MIN_DEGRADATION_SCALE;
        }
        (confidence / min_confidence).clamp(MIN_DEGRADATION_SCALE, 1.0)
    }

    fn degrade(&self, commands: &mut [FixtureCommand], universe: &mut Universe, scale: f64) {
        for cmd in commands.iter_mut() {
            for (ch, v) in cmd.channel_values.iter_mut() {
                if self.protected_channels.contains(ch) || !v.is_finite() || *v == 0.0 {
                    continue;
                }
                *v = (*v * scale).round().clamp(0.0, 255.0);
            }
        }

        let scaled: Vec<(u16, u8)> = universe
            .channels()
            .filter(|(ch, v)| *v != 0 && !self.protected_channels.contains(ch))
            .map(|(ch, v)| (ch, (v as f64 * scale).round().clamp(0.0, 255.0) as u8))
            .collect();
        for (ch, v) in scaled {
            universe.set(ch, v);
        }
    }
}

impl PipelineStage for SafetyInterlock {
    fn name(&self) -> &str {
        stage_names::SAFETY_INTERLOCK
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        self.check(state);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.start().map_err(|e| FatalError::Connection {
                interface: "heartbeat watchdog".to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.stop();
        }
    }

    fn safety_critical(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn laser(id: &str, start: u16) -> FixtureConfig {
        FixtureConfig::new(id, FixtureType::Laser, "laser_generic_7ch", start)
    }

    fn panel(id: &str, start: u16) -> FixtureConfig {
        FixtureConfig::new(id, FixtureType::Panel, "panel_rgb_6ch", start)
    }

    fn frame_at(now: f64) -> FrameState {
        let mut state = FrameState::initial_at(now);
        state.beat.confidence = 0.9;
        state
    }

    #[derive(Default)]
    struct FlagOutput {
        requested: AtomicBool,
    }

    impl Blackoutable for FlagOutput {
        fn blackout(&self) {
            self.requested.store(true, Ordering::SeqCst);
        }

        fn request_blackout(&self) {
            self.requested.store(true, Ordering::SeqCst);
        }

        fn clear_blackout_request(&self) {
            self.requested.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_laser_limits_in_commands_and_universe() {
        let mut interlock = SafetyInterlock::new(SafetyConfig::default(), &[laser("laser_1", 1)]);
        let mut state = frame_at(100.0);
        state.fixture_commands.push(
            FixtureCommand::new("laser_1", FixtureType::Laser)
                .with_value(4, 200.0)
                .with_value(5, 10.0),
        );
        state.dmx_universe.set(4, 200);
        state.dmx_universe.set(5, 10);

        interlock.check(&mut state);

        assert_eq!(state.fixture_commands[0].get(4), Some(100.0));
        assert_eq!(state.fixture_commands[0].get(5), Some(30.0));
        assert_eq!(state.dmx_universe.get(4), 100);
        assert_eq!(state.dmx_universe.get(5), 30);
        assert_eq!(state.safety_overrides.channels.get(&4), Some(&100));
        assert_eq!(state.safety_overrides.channels.get(&5), Some(&30));
        assert!(!state.safety_overrides.blackout);
        assert!(state.safety.ok);
    }

    #[test]
    fn test_zero_scan_speed_is_left_alone() {
        let mut interlock = SafetyInterlock::new(SafetyConfig::default(), &[laser("laser_1", 1)]);
        let mut state = frame_at(100.0);
        state
            .fixture_commands
            .push(FixtureCommand::new("laser_1", FixtureType::Laser).with_value(5, 0.0));

        interlock.check(&mut state);

        assert_eq!(state.fixture_commands[0].get(5), Some(0.0));
        assert!(state.safety_overrides.is_empty());
    }

    #[test]
    fn test_emergency_stop_blacks_out_everything() {
        let mut interlock = SafetyInterlock::new(SafetyConfig::default(), &[panel("p1", 10)]);
        let handle = interlock.emergency_stop_handle();
        handle.trigger("test");

        let mut state = frame_at(100.0);
        state
            .fixture_commands
            .push(FixtureCommand::new("p1", FixtureType::Panel).with_value(10, 255.0));
        state.dmx_universe.set(10, 255);

        interlock.check(&mut state);

        assert!(state.fixture_commands.is_empty());
        assert!(state.dmx_universe.is_blackout());
        assert!(state.safety_overrides.blackout);
        assert!(!state.safety.ok);
        assert!(!state.safety.laser_enabled);
        assert!(state.safety.emergency_stop);
        assert_eq!(
            state.safety.error_state.as_deref(),
            Some("emergency_stop_active")
        );

        handle.reset();
        let mut state = frame_at(100.02);
        interlock.check(&mut state);
        assert!(state.safety.ok);
        assert!(state.safety.laser_enabled);
    }

    #[test]
    fn test_heartbeat_timeout_only_after_first_tick() {
        let mut interlock = SafetyInterlock::new(SafetyConfig::default(), &[]);

        let mut state = frame_at(100.0);
        interlock.check(&mut state);
        assert!(state.safety.ok);

        let mut state = frame_at(101.5);
        state.dmx_universe.set(1, 80);
        interlock.check(&mut state);
        assert!(state.safety_overrides.blackout);
        assert!(state.dmx_universe.is_blackout());
        assert_eq!(
            state.safety.error_state.as_deref(),
            Some("heartbeat_timeout: 1.50s")
        );

        // the timeout tick still counts as a beat
        let mut state = frame_at(101.52);
        interlock.check(&mut state);
        assert!(state.safety.ok);
        assert!(!state.safety_overrides.blackout);
    }

    #[test]
    fn test_sustained_strobe_enters_cooldown() {
        let mut config = SafetyConfig::default();
        config.strobe.max_duration_s = 0.01;
        let mut interlock = SafetyInterlock::new(config, &[panel("p1", 1)]);
        let strobe = |now: f64| {
            let mut state = frame_at(now);
            state
                .fixture_commands
                .push(FixtureCommand::new("p1", FixtureType::Panel).with_value(5, 255.0));
            state
        };

        let mut state = strobe(1000.0);
        interlock.check(&mut state);
        assert!(!state.safety.strobe_cooldown);
        assert_eq!(state.fixture_commands[0].get(5), Some(255.0));

        let mut state = strobe(1000.02);
        interlock.check(&mut state);
        assert!(state.safety.strobe_cooldown);
        assert!(!state.safety.strobe_enabled);
        assert!(!state.safety.ok);
        assert_eq!(state.fixture_commands[0].get(5), Some(0.0));

        // still cooling one second later
        let mut state = strobe(1001.0);
        interlock.check(&mut state);
        assert!(state.safety.strobe_cooldown);
        assert_eq!(state.fixture_commands[0].get(5), Some(0.0));

        // cooldown of 2s has elapsed, the window starts over
        let mut state = strobe(1002.1);
        interlock.check(&mut state);
        assert!(!state.safety.strobe_cooldown);
        assert_eq!(state.fixture_commands[0].get(5), Some(255.0));
    }

    #[test]
    fn test_rapid_strobe_onsets_enter_cooldown() {
        let mut config = SafetyConfig::default();
        config.strobe.max_rate_hz = 3.0;
        let mut interlock = SafetyInterlock::new(config, &[panel("p1", 1)]);

        let mut cooled_at = None;
        for i in 0..10 {
            let now = 500.0 + i as f64 * 0.05;
            let mut state = frame_at(now);
            // on every other frame
            let value = if i % 2 == 0 { 255.0 } else { 0.0 };
            state
                .fixture_commands
                .push(FixtureCommand::new("p1", FixtureType::Panel).with_value(5, value));
            interlock.check(&mut state);
            if state.safety.strobe_cooldown && cooled_at.is_none() {
                cooled_at = Some(i);
            }
        }

        // onsets at frames 0, 2, 4 and 6; the fourth exceeds 3 per second
        assert_eq!(cooled_at, Some(6));
    }

    #[test]
    fn test_disabled_fixture_strobe_is_not_tracked() {
        let mut config = SafetyConfig::default();
        config.strobe.max_duration_s = 0.01;
        let mut disabled = panel("p1", 1);
        disabled.enabled = false;
        let mut interlock = SafetyInterlock::new(config, &[disabled]);

        for now in [10.0, 10.02, 10.04] {
            let mut state = frame_at(now);
            state.dmx_universe.set(5, 255);
            interlock.check(&mut state);
            assert!(!state.safety.strobe_cooldown);
        }
    }

    #[test]
    fn test_low_confidence_degrades_unprotected_channels() {
        let mut interlock = SafetyInterlock::new(SafetyConfig::default(), &[laser("laser_1", 1)]);
        let mut state = frame_at(100.0);
        state.beat.confidence = 0.15;
        state.fixture_commands.push(
            FixtureCommand::new("laser_1", FixtureType::Laser)
                .with_value(1, 200.0)
                .with_value(3, 100.0),
        );
        state.dmx_universe.set(1, 200);
        state.dmx_universe.set(3, 100);

        interlock.check(&mut state);

        assert!(state.safety.degraded);
        assert!(!state.safety.ok);
        assert!((state.safety.degradation_scale - 0.5).abs() < 1e-9);
        // mode channel untouched
        assert_eq!(state.fixture_commands[0].get(1), Some(200.0));
        assert_eq!(state.dmx_universe.get(1), 200);
        assert_eq!(state.fixture_commands[0].get(3), Some(50.0));
        assert_eq!(state.dmx_universe.get(3), 50);
        // degradation is not a forced override
        assert!(state.safety_overrides.is_empty());
    }

    #[test]
    fn test_degradation_scale_has_floor() {
        let mut interlock = SafetyInterlock::new(SafetyConfig::default(), &[]);
        let mut state = frame_at(100.0);
        state.beat.confidence = 0.0;
        state
            .fixture_commands
            .push(FixtureCommand::new("p", FixtureType::Panel).with_value(2, 200.0));

        interlock.check(&mut state);

        assert!((state.safety.degradation_scale - 0.35).abs() < 1e-9);
        assert_eq!(state.fixture_commands[0].get(2), Some(70.0));
    }

    #[test]
    fn test_degradation_can_be_disabled() {
        let mut config = SafetyConfig::default();
        config.graceful_degradation = false;
        let mut interlock = SafetyInterlock::new(config, &[]);
        let mut state = frame_at(100.0);
        state.beat.confidence = 0.0;
        state
            .fixture_commands
            .push(FixtureCommand::new("p", FixtureType::Panel).with_value(2, 200.0));

        interlock.check(&mut state);

        assert!(!state.safety.degraded);
        assert_eq!(state.fixture_commands[0].get(2), Some(200.0));
    }

    #[test]
    fn test_low_confidence_scales_all_but_laser_mode() {
        let mut config = SafetyConfig::default();
        config.min_beat_confidence = 0.8;
        let fixtures = [laser("laser_1", 1), panel("p1", 20)];
        let mut interlock = SafetyInterlock::new(config, &fixtures);

        let mut state = frame_at(100.0);
        state.beat.confidence = 0.1;
        state.fixture_commands.push(
            FixtureCommand::new("laser_1", FixtureType::Laser)
                .with_value(1, 200.0)
                .with_value(2, 200.0),
        );
        state
            .fixture_commands
            .push(FixtureCommand::new("p1", FixtureType::Panel).with_value(20, 200.0));

        interlock.check(&mut state);

        assert_eq!(state.fixture_commands[0].get(1), Some(200.0));
        assert_eq!(state.fixture_commands[0].get(2), Some(70.0));
        assert_eq!(state.fixture_commands[1].get(20), Some(70.0));
        assert!(state.safety.degraded);
        assert!(!interlock.is_safe());
    }

    #[test]
    fn test_trigger_emergency_stop_requests_blackout() {
        let output = Arc::new(FlagOutput::default());
        let interlock = SafetyInterlock::new(SafetyConfig::default(), &[])
            .with_output(output.clone() as Arc<dyn Blackoutable>, &WatchdogConfig::default());

        interlock.trigger_emergency_stop("operator");
        interlock.trigger_emergency_stop("operator");
        assert!(output.requested.load(Ordering::SeqCst));
        assert!(interlock.emergency_stop_handle().is_active());

        interlock.reset_emergency_stop();
        assert!(!interlock.emergency_stop_handle().is_active());
    }

    #[test]
    fn test_watchdog_requests_blackout_on_stall() {
        let output = Arc::new(FlagOutput::default());
        let watchdog = WatchdogConfig {
            check_interval_s: 0.01,
            ..WatchdogConfig::default()
        };
        let mut config = SafetyConfig::default();
        config.heartbeat_timeout_s = 0.05;
        let mut interlock = SafetyInterlock::new(config, &[])
            .with_output(output.clone() as Arc<dyn Blackoutable>, &watchdog);

        interlock.start().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));
        assert!(output.requested.load(Ordering::SeqCst));

        interlock.reset_emergency_stop();
        assert!(!output.requested.load(Ordering::SeqCst));
        interlock.stop();
    }
}
