//! Shapes raw fixture requests into hardware-safe, rate-limited values.
//!
//! Every command passes three steps in order: the laser clamp, the strobe
//! budget ceiling and per-channel slew limiting. Slew limiting keeps the last
//! committed value of every absolute channel so motion ramps instead of
//! snapping between frames.

use std::collections::HashMap;

use prism_fixtures::{FixtureConfig, FixtureType};

use crate::config::SafetyConfig;
use crate::pipeline::{stage_names, PipelineStage};
use crate::state::{FixtureCommand, FrameState};

pub struct CommandInterpreter {
    safety: SafetyConfig,
    max_delta_per_frame: f64,
    fixture_bases: HashMap<String, u16>,
    last_values: HashMap<u16, f64>,
}

impl CommandInterpreter {
    pub fn new(safety: SafetyConfig, max_delta_per_frame: u32, fixtures: &[FixtureConfig]) -> Self {
        let fixture_bases = fixtures
            .iter()
            .map(|f| (f.id.clone(), f.start_address))
            .collect();

        Self {
            safety,
            max_delta_per_frame: max_delta_per_frame.max(1) as f64,
            fixture_bases,
            last_values: HashMap::new(),
        }
    }

    pub fn interpret(
        &mut self,
        commands: Vec<FixtureCommand>,
        strobe_budget_hz: f64,
    ) -> Vec<FixtureCommand> {
        let ceiling = self.strobe_ceiling(strobe_budget_hz);
        commands
            .into_iter()
            .map(|cmd| self.interpret_single(cmd, ceiling))
            .collect()
    }

    /// Map a strobe budget in Hz to the highest DMX value a strobe channel may take.
    pub fn strobe_ceiling(&self, strobe_budget_hz: f64) -> f64 {
        if !strobe_budget_hz.is_finite() {
            return 0.0;
        }
        let max_safe_hz = self.safety.strobe.max_rate_hz.max(0.1);
        let ratio = (strobe_budget_hz / max_safe_hz).clamp(0.0, 1.0);
        (ratio * 255.0).round()
    }

    /// Forget slew history, e.g. after a blackout.
    pub fn reset(&mut self) {
        self.last_values.clear();
    }

    /// True when the last committed frame went dark but slew history still
    /// holds lit channels.
    fn history_outlived_blackout(&self, state: &FrameState) -> bool {
        let dark = state.dmx_universe.is_blackout()
            || state.safety.emergency_stop
            || state.safety.error_state.is_some();
        dark && self.last_values.values().any(|v| *v > 0.0)
    }

    pub fn last_value(&self, channel: u16) -> Option<f64> {
        self.last_values.get(&channel).copied()
    }

    fn base_address(&self, command: &FixtureCommand) -> Option<u16> {
        self.fixture_bases
            .get(&command.fixture_id)
            .copied()
            .or_else(|| command.channel_values.keys().next().copied())
    }

    fn interpret_single(&mut self, mut command: FixtureCommand, strobe_ceiling: f64) -> FixtureCommand {
        if let Some(base) = self.base_address(&command) {
            let values = &mut command.channel_values;

            if command.fixture_type == FixtureType::Laser {
                let laser = &self.safety.laser;
                let y_channel = base.saturating_add(laser.y_channel_offset);
                let speed_channel = base.saturating_add(laser.speed_channel_offset);

                if let Some(v) = values.get_mut(&y_channel).filter(|v| v.is_finite()) {
                    *v = v.min(laser.y_axis_max as f64);
                }
                if let Some(v) = values.get_mut(&speed_channel).filter(|v| v.is_finite()) {
                    *v = v.max(laser.min_scan_speed as f64);
                }
            }

            if let Some(offset) = command.fixture_type.strobe_offset() {
                let strobe_channel = base.saturating_add(offset);
                if let Some(v) = values.get_mut(&strobe_channel).filter(|v| v.is_finite()) {
                    *v = v.min(strobe_ceiling);
                }
            }
        }

        for (channel, value) in command.channel_values.iter_mut() {
            if !value.is_finite() {
                // left for the output stage to reject
                continue;
            }

            let prev = self.last_values.get(channel).copied().unwrap_or(0.0);
            let target = value.clamp(
                prev - self.max_delta_per_frame,
                prev + self.max_delta_per_frame,
            );
            let committed = target.clamp(0.0, 255.0).trunc();

            *value = committed;
            self.last_values.insert(*channel, committed);
        }

        command
    }
}

impl PipelineStage for CommandInterpreter {
    fn name(&self) -> &str {
        stage_names::INTERPRETER
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        // Ramp back up from the dark output rather than from pre-blackout values
        if self.history_outlived_blackout(state) {
            log::debug!("Output was blacked out, restarting slew from zero");
            self.reset();
        }

        let commands = std::mem::take(&mut state.fixture_commands);
        state.fixture_commands = self.interpret(commands, state.director.strobe_budget_hz);
        Ok(())
    }

    fn safety_critical(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpreter(fixtures: &[FixtureConfig]) -> CommandInterpreter {
        CommandInterpreter::new(SafetyConfig::default(), 36, fixtures)
    }

    fn laser_at(start: u16) -> FixtureConfig {
        FixtureConfig::new("laser_1", FixtureType::Laser, "laser_generic_7ch", start)
    }

    #[test]
    fn test_slew_limits_each_step() {
        let mut interp = interpreter(&[]);
        let cmd = || vec![FixtureCommand::new("p1", FixtureType::Panel).with_value(10, 255.0)];

        let out = interp.interpret(cmd(), 10.0);
        assert_eq!(out[0].get(10), Some(36.0));
        let out = interp.interpret(cmd(), 10.0);
        assert_eq!(out[0].get(10), Some(72.0));

        for _ in 0..10 {
            interp.interpret(cmd(), 10.0);
        }
        assert_eq!(interp.last_value(10), Some(255.0));
    }

    #[test]
    fn test_slew_ramps_down_too() {
        let mut interp = CommandInterpreter::new(SafetyConfig::default(), 255, &[]);
        interp.interpret(
            vec![FixtureCommand::new("p1", FixtureType::Panel).with_value(10, 200.0)],
            0.0,
        );
        let mut interp_slow = interp;
        interp_slow.max_delta_per_frame = 50.0;
        let out = interp_slow.interpret(
            vec![FixtureCommand::new("p1", FixtureType::Panel).with_value(10, 0.0)],
            0.0,
        );
        assert_eq!(out[0].get(10), Some(150.0));
    }

    #[test]
    fn test_max_delta_floor_is_one() {
        let mut interp = CommandInterpreter::new(SafetyConfig::default(), 0, &[]);
        let out = interp.interpret(
            vec![FixtureCommand::new("p1", FixtureType::Panel).with_value(1, 100.0)],
            0.0,
        );
        assert_eq!(out[0].get(1), Some(1.0));
    }

    #[test]
    fn test_laser_y_clamped_and_speed_floored() {
        let fixtures = [laser_at(1)];
        let mut interp = CommandInterpreter::new(SafetyConfig::default(), 255, &fixtures);
        let cmd = FixtureCommand::new("laser_1", FixtureType::Laser)
            .with_value(1, 200.0)
            .with_value(4, 250.0)
            .with_value(5, 0.0);

        let out = interp.interpret(vec![cmd], 0.0);
        assert_eq!(out[0].get(4), Some(100.0));
        assert_eq!(out[0].get(5), Some(30.0));
        assert_eq!(out[0].get(1), Some(200.0));
    }

    #[test]
    fn test_laser_base_uses_configured_start_address() {
        // The command does not include the mode channel, so the lowest key is not the base.
        let fixtures = [laser_at(10)];
        let mut interp = CommandInterpreter::new(SafetyConfig::default(), 255, &fixtures);
        let cmd = FixtureCommand::new("laser_1", FixtureType::Laser)
            .with_value(12, 255.0)
            .with_value(13, 255.0);

        let out = interp.interpret(vec![cmd], 0.0);
        assert_eq!(out[0].get(13), Some(100.0));
        assert_eq!(out[0].get(12), Some(255.0));
    }

    #[test]
    fn test_unknown_fixture_falls_back_to_lowest_channel() {
        let mut interp = CommandInterpreter::new(SafetyConfig::default(), 255, &[]);
        let cmd = FixtureCommand::new("mystery", FixtureType::MovingHead)
            .with_value(20, 0.0)
            .with_value(26, 255.0);

        let out = interp.interpret(vec![cmd], 0.0);
        assert_eq!(out[0].get(26), Some(0.0));
    }

    #[test]
    fn test_strobe_budget_ceiling() {
        let interp = interpreter(&[]);
        assert_eq!(interp.strobe_ceiling(0.0), 0.0);
        assert_eq!(interp.strobe_ceiling(5.0), 128.0);
        assert_eq!(interp.strobe_ceiling(10.0), 255.0);
        assert_eq!(interp.strobe_ceiling(40.0), 255.0);
        assert_eq!(interp.strobe_ceiling(-3.0), 0.0);
        assert_eq!(interp.strobe_ceiling(f64::NAN), 0.0);
    }

    #[test]
    fn test_strobe_channels_clamped_per_fixture_type() {
        let mut interp = CommandInterpreter::new(SafetyConfig::default(), 255, &[]);
        let head = FixtureCommand::new("mh", FixtureType::MovingHead)
            .with_value(20, 10.0)
            .with_value(26, 255.0);
        let panel = FixtureCommand::new("panel", FixtureType::Panel)
            .with_value(40, 10.0)
            .with_value(44, 255.0);

        let out = interp.interpret(vec![head, panel], 2.0);
        assert_eq!(out[0].get(26), Some(51.0));
        assert_eq!(out[1].get(44), Some(51.0));
        assert_eq!(out[0].fixture_id, "mh");
        assert_eq!(out[1].fixture_id, "panel");
    }

    #[test]
    fn test_non_finite_values_pass_through_without_slew_memory() {
        let fixtures = [laser_at(1)];
        let mut interp = CommandInterpreter::new(SafetyConfig::default(), 36, &fixtures);
        let cmd = FixtureCommand::new("laser_1", FixtureType::Laser)
            .with_value(4, f64::NAN)
            .with_value(6, f64::INFINITY);

        let out = interp.interpret(vec![cmd], 0.0);
        assert!(out[0].get(4).map(f64::is_nan).unwrap_or(false));
        assert_eq!(out[0].get(6), Some(f64::INFINITY));
        assert_eq!(interp.last_value(4), None);
        assert_eq!(interp.last_value(6), None);
    }

    #[test]
    fn test_stage_uses_director_budget() {
        let mut interp = CommandInterpreter::new(SafetyConfig::default(), 255, &[]);
        let mut state = FrameState::initial_at(0.0);
        state.director.strobe_budget_hz = 0.0;
        state.fixture_commands.push(
            FixtureCommand::new("panel", FixtureType::Panel)
                .with_value(1, 255.0)
                .with_value(5, 255.0),
        );

        interp.process(&mut state).unwrap();
        assert_eq!(state.fixture_commands[0].get(5), Some(0.0));
        assert_eq!(state.fixture_commands[0].get(1), Some(255.0));
    }

    #[test]
    fn test_slew_restarts_from_dark_after_blackout() {
        let mut interp = interpreter(&[]);
        let request = |state: &mut FrameState| {
            state
                .fixture_commands
                .push(FixtureCommand::new("p1", FixtureType::Panel).with_value(10, 255.0));
        };

        let mut state = FrameState::initial_at(0.0);
        for i in 0..10 {
            state = state.next_frame_at(i as f64 * 0.02);
            request(&mut state);
            interp.process(&mut state).unwrap();
            state.dmx_universe.set(10, state.fixture_commands[0].get(10).unwrap() as u8);
        }
        assert_eq!(interp.last_value(10), Some(255.0));

        // emergency stop blacked the output out on the previous frame
        state = state.next_frame_at(0.2);
        state.safety.emergency_stop = true;
        state.safety.error_state = Some("emergency_stop_active".to_string());
        state.dmx_universe.clear();
        request(&mut state);
        interp.process(&mut state).unwrap();
        assert_eq!(state.fixture_commands[0].get(10), Some(36.0));

        // released: the ramp carries on from the dark frame
        state = state.next_frame_at(0.22);
        state.safety.emergency_stop = false;
        state.safety.error_state = None;
        state.dmx_universe.set(10, 36);
        request(&mut state);
        interp.process(&mut state).unwrap();
        assert_eq!(state.fixture_commands[0].get(10), Some(72.0));
    }

    #[test]
    fn test_watchdog_blackout_alone_resets_slew() {
        let mut interp = interpreter(&[]);
        for _ in 0..10 {
            interp.interpret(
                vec![FixtureCommand::new("p1", FixtureType::Panel).with_value(10, 255.0)],
                0.0,
            );
        }

        // no safety flag, but the output latch cleared the committed universe
        let mut state = FrameState::initial_at(1.0);
        state
            .fixture_commands
            .push(FixtureCommand::new("p1", FixtureType::Panel).with_value(10, 255.0));
        interp.process(&mut state).unwrap();
        assert_eq!(state.fixture_commands[0].get(10), Some(36.0));
    }

    #[test]
    fn test_reset_clears_history() {
        let mut interp = interpreter(&[]);
        interp.interpret(
            vec![FixtureCommand::new("p", FixtureType::Panel).with_value(3, 30.0)],
            0.0,
        );
        assert_eq!(interp.last_value(3), Some(30.0));
        interp.reset();
        assert_eq!(interp.last_value(3), None);
    }
}
