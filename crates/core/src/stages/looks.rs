//! Per-class fixture looks. Each stage turns the frame's musical state into
//! one `FixtureCommand` per enabled fixture of its class, addressed through
//! the fixture's profile.

use std::f64::consts::PI;

use prism_fixtures::{ChannelType, Fixture, FixtureType};

use crate::config::{LaserSafetyConfig, MovingHeadSafetyConfig};
use crate::pipeline::{stage_names, PipelineStage};
use crate::state::{FixtureCommand, FrameState, MusicStructure};

/// DMX value that puts the laser in manual DMX mode.
const LASER_DMX_MODE: f64 = 200.0;

fn of_type(fixtures: &[Fixture], fixture_type: FixtureType) -> Vec<Fixture> {
    fixtures
        .iter()
        .filter(|f| f.config.fixture_type == fixture_type && f.config.enabled)
        .cloned()
        .collect()
}

fn put(command: &mut FixtureCommand, fixture: &Fixture, channel: ChannelType, value: f64) {
    if let Some(address) = fixture.channel_address(&channel) {
        command.set(address, value);
    }
}

fn finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub struct LaserControl {
    fixtures: Vec<Fixture>,
    safety: LaserSafetyConfig,
}

impl LaserControl {
    pub fn new(fixtures: &[Fixture], safety: LaserSafetyConfig) -> Self {
        Self {
            fixtures: of_type(fixtures, FixtureType::Laser),
            safety,
        }
    }

    fn command(&self, fixture: &Fixture, state: &FrameState) -> FixtureCommand {
        let t = state.timestamp;
        let structure = state.structure.current;
        let energy = finite(state.audio.rms_energy).clamp(0.0, 1.0);
        let bpm = finite(state.fused_bpm);
        let mut cmd = FixtureCommand::new(fixture.id(), FixtureType::Laser);

        put(&mut cmd, fixture, ChannelType::Mode, LASER_DMX_MODE);

        let pattern = match structure {
            MusicStructure::Drop => (t * 2.0).rem_euclid(32.0).floor(),
            MusicStructure::Buildup => 10.0,
            MusicStructure::Breakdown => 0.0,
            _ => (t * 0.5).rem_euclid(16.0).floor(),
        };
        put(&mut cmd, fixture, ChannelType::Pattern, pattern * 4.0);

        let x = (128.0 + 100.0 * (t * bpm / 60.0).sin()).trunc();
        let y = (64.0 + 30.0 * (t * bpm / 120.0).sin())
            .trunc()
            .min(self.safety.y_axis_max as f64);
        put(&mut cmd, fixture, ChannelType::PositionX, x);
        put(&mut cmd, fixture, ChannelType::PositionY, y);

        let (scan_speed, pattern_speed) = match structure {
            MusicStructure::Drop => (170.0 + 70.0 * energy, 180.0 + 70.0 * energy),
            MusicStructure::Breakdown => (self.safety.min_scan_speed as f64, 60.0),
            _ => (100.0 + 100.0 * energy, 80.0 + 120.0 * energy),
        };
        put(
            &mut cmd,
            fixture,
            ChannelType::ScanSpeed,
            scan_speed.trunc().max(self.safety.min_scan_speed as f64),
        );
        put(&mut cmd, fixture, ChannelType::PatternSpeed, pattern_speed.trunc());

        let zoom = match structure {
            MusicStructure::Drop => 128.0 + 127.0 * (state.beat.beat_phase * 2.0 * PI).sin(),
            MusicStructure::Buildup => 64.0 + 128.0 * energy,
            _ => 64.0 + 32.0 * (t * 0.5).sin(),
        };
        put(&mut cmd, fixture, ChannelType::Zoom, zoom.trunc());

        cmd
    }
}

impl PipelineStage for LaserControl {
    fn name(&self) -> &str {
        stage_names::LASER_CONTROL
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        for fixture in &self.fixtures {
            let cmd = self.command(fixture, state);
            state.fixture_commands.push(cmd);
        }
        Ok(())
    }
}

pub struct MovingHeadControl {
    fixtures: Vec<Fixture>,
    safety: MovingHeadSafetyConfig,
}

impl MovingHeadControl {
    pub fn new(fixtures: &[Fixture], safety: MovingHeadSafetyConfig) -> Self {
        Self {
            fixtures: of_type(fixtures, FixtureType::MovingHead),
            safety,
        }
    }

    fn home(&self, fixture: &Fixture) -> FixtureCommand {
        let mut cmd = FixtureCommand::new(fixture.id(), FixtureType::MovingHead);
        put(&mut cmd, fixture, ChannelType::Pan, 128.0);
        put(&mut cmd, fixture, ChannelType::Tilt, 128.0);
        put(&mut cmd, fixture, ChannelType::Dimmer, 0.0);
        put(&mut cmd, fixture, ChannelType::Strobe, 0.0);
        cmd
    }

    fn command(&self, fixture: &Fixture, index: usize, state: &FrameState) -> FixtureCommand {
        let t = state.timestamp;
        let structure = state.structure.current;
        let energy = finite(state.audio.rms_energy).clamp(0.0, 1.0);
        let bpm = finite(state.fused_bpm);
        let phase_offset = index as f64 / self.fixtures.len().max(1) as f64 * 2.0 * PI;
        let mut cmd = FixtureCommand::new(fixture.id(), FixtureType::MovingHead);

        // Lissajous figure locked to the tempo
        let freq_x = bpm / 60.0 / 2.0;
        let freq_y = bpm / 60.0 / 4.0;
        let (pan, tilt) = match structure {
            MusicStructure::Drop => (
                128.0 + 100.0 * (t * freq_x * 4.0 + phase_offset).sin(),
                128.0 + 60.0 * (t * freq_y * 4.0).sin(),
            ),
            MusicStructure::Breakdown => (
                128.0 + 120.0 * (t * 0.2 + phase_offset).sin(),
                100.0 + 30.0 * (t * 0.1).sin(),
            ),
            _ => (
                128.0 + 80.0 * (t * freq_x + phase_offset).sin(),
                128.0 + 50.0 * (t * freq_y).sin(),
            ),
        };
        put(&mut cmd, fixture, ChannelType::Pan, pan.trunc());
        put(&mut cmd, fixture, ChannelType::Tilt, tilt.trunc());

        let speed_limit = self.safety.max_pan_speed.min(self.safety.max_tilt_speed) as f64;
        let speed: f64 = if structure == MusicStructure::Drop { 200.0 } else { 128.0 };
        put(&mut cmd, fixture, ChannelType::PanTiltSpeed, speed.min(speed_limit));

        let dimmer = match structure {
            MusicStructure::Drop => 200.0 + 55.0 * energy,
            MusicStructure::Breakdown => 100.0 + 50.0 * energy,
            _ => 150.0 + 80.0 * energy,
        };
        put(&mut cmd, fixture, ChannelType::Dimmer, dimmer.trunc().min(255.0));

        let strobe = if structure == MusicStructure::Drop && state.beat.beat_phase < 0.1 {
            200.0
        } else {
            0.0
        };
        put(&mut cmd, fixture, ChannelType::Strobe, strobe);

        let (r, g, b) = match structure {
            MusicStructure::Drop => (255.0, 255.0, 255.0),
            MusicStructure::Breakdown => (50.0, 100.0, 255.0),
            _ => {
                let angle = (t * 0.2).rem_euclid(1.0) * 2.0 * PI;
                (
                    128.0 + 127.0 * angle.sin(),
                    128.0 + 127.0 * (angle + 2.0).sin(),
                    128.0 + 127.0 * (angle + 4.0).sin(),
                )
            }
        };
        put(&mut cmd, fixture, ChannelType::Red, r.trunc());
        put(&mut cmd, fixture, ChannelType::Green, g.trunc());
        put(&mut cmd, fixture, ChannelType::Blue, b.trunc());

        let gobo = match structure {
            MusicStructure::Drop => 0.0,
            MusicStructure::Breakdown => 64.0,
            _ => 32.0,
        };
        put(&mut cmd, fixture, ChannelType::Gobo, gobo);

        cmd
    }
}

impl PipelineStage for MovingHeadControl {
    fn name(&self) -> &str {
        stage_names::MOVING_HEAD_CONTROL
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        let park = self.safety.home_on_error && state.safety.error_state.is_some();
        for (index, fixture) in self.fixtures.iter().enumerate() {
            let cmd = if park {
                self.home(fixture)
            } else {
                self.command(fixture, index, state)
            };
            state.fixture_commands.push(cmd);
        }
        Ok(())
    }
}

pub struct PanelControl {
    fixtures: Vec<Fixture>,
}

impl PanelControl {
    pub fn new(fixtures: &[Fixture]) -> Self {
        Self {
            fixtures: of_type(fixtures, FixtureType::Panel),
        }
    }

    fn command(&self, fixture: &Fixture, state: &FrameState) -> FixtureCommand {
        let t = state.timestamp;
        let energy = finite(state.audio.rms_energy).clamp(0.0, 1.0);
        let structure = state.structure.current;
        let mut cmd = FixtureCommand::new(fixture.id(), FixtureType::Panel);

        let (dimmer, r, g, b): (f64, f64, f64, f64) = match structure {
            // Blinder for the first half second of a drop
            MusicStructure::Drop if state.structure.time_since_last_drop < 0.5 => {
                (255.0, 255.0, 255.0, 255.0)
            }
            MusicStructure::Drop if state.beat.beat_phase < 0.15 => (255.0, 255.0, 255.0, 255.0),
            MusicStructure::Drop => (0.0, 0.0, 0.0, 0.0),
            MusicStructure::Breakdown => {
                let angle = (t * 0.1).rem_euclid(1.0) * 2.0 * PI;
                (
                    100.0 + 50.0 * energy,
                    50.0 + 50.0 * angle.sin(),
                    100.0,
                    200.0 + 55.0 * (angle + 1.0).sin(),
                )
            }
            _ => (150.0 * energy + 50.0, 200.0, 150.0, 100.0),
        };

        put(&mut cmd, fixture, ChannelType::Dimmer, dimmer.trunc());
        put(&mut cmd, fixture, ChannelType::Red, r.trunc());
        put(&mut cmd, fixture, ChannelType::Green, g.trunc());
        put(&mut cmd, fixture, ChannelType::Blue, b.trunc());
        // Flashing is done with the dimmer, the strobe channel stays closed
        put(&mut cmd, fixture, ChannelType::Strobe, 0.0);
        cmd
    }
}

impl PipelineStage for PanelControl {
    fn name(&self) -> &str {
        stage_names::PANEL_CONTROL
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        for fixture in &self.fixtures {
            let cmd = self.command(fixture, state);
            state.fixture_commands.push(cmd);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_fixtures::{FixtureConfig, FixtureLibrary};

    fn patch(configs: &[FixtureConfig]) -> Vec<Fixture> {
        let library = FixtureLibrary::new();
        configs.iter().map(|c| library.patch(c).unwrap()).collect()
    }

    fn rig() -> Vec<Fixture> {
        patch(&[
            FixtureConfig::new("laser_1", FixtureType::Laser, "laser_generic_7ch", 1),
            FixtureConfig::new("mh_1", FixtureType::MovingHead, "moving_head_16ch", 10),
            FixtureConfig::new("mh_2", FixtureType::MovingHead, "moving_head_16ch", 30),
            FixtureConfig::new("panel_1", FixtureType::Panel, "panel_rgb_6ch", 50),
        ])
    }

    #[test]
    fn test_laser_stays_inside_safety_limits() {
        let mut laser = LaserControl::new(&rig(), LaserSafetyConfig::default());
        for i in 0..500 {
            let mut state = FrameState::initial_at(i as f64 * 0.02);
            state.structure.current = MusicStructure::Breakdown;
            laser.process(&mut state).unwrap();

            let cmd = &state.fixture_commands[0];
            assert_eq!(cmd.fixture_id, "laser_1");
            assert_eq!(cmd.get(1), Some(200.0));
            assert!(cmd.get(4).unwrap() <= 100.0);
            assert!(cmd.get(5).unwrap() >= 30.0);
        }
    }

    #[test]
    fn test_one_command_per_fixture_of_class() {
        let fixtures = rig();
        let mut state = FrameState::initial_at(1.0);
        MovingHeadControl::new(&fixtures, MovingHeadSafetyConfig::default())
            .process(&mut state)
            .unwrap();
        PanelControl::new(&fixtures).process(&mut state).unwrap();

        let ids: Vec<&str> = state.fixture_commands.iter().map(|c| c.fixture_id.as_str()).collect();
        assert_eq!(ids, vec!["mh_1", "mh_2", "panel_1"]);
        assert_eq!(state.fixture_commands[0].channel_values.len(), 9);
        assert_eq!(state.fixture_commands[2].get(54), Some(0.0));
    }

    #[test]
    fn test_moving_head_strobes_on_drop_beat() {
        let mut heads = MovingHeadControl::new(&rig(), MovingHeadSafetyConfig::default());
        let mut state = FrameState::initial_at(1.0);
        state.structure.current = MusicStructure::Drop;
        state.beat.beat_phase = 0.05;
        heads.process(&mut state).unwrap();

        assert_eq!(state.fixture_commands[0].get(16), Some(200.0));
        // pan/tilt speed capped by the configured limit
        let mut safety = MovingHeadSafetyConfig::default();
        safety.max_pan_speed = 150;
        let mut heads = MovingHeadControl::new(&rig(), safety);
        let mut state = FrameState::initial_at(1.0);
        state.structure.current = MusicStructure::Drop;
        heads.process(&mut state).unwrap();
        assert_eq!(state.fixture_commands[0].get(14), Some(150.0));
    }

    #[test]
    fn test_heads_park_while_safety_reports_error() {
        let mut heads = MovingHeadControl::new(&rig(), MovingHeadSafetyConfig::default());
        let mut state = FrameState::initial_at(1.0);
        state.safety.error_state = Some("heartbeat_timeout: 1.20s".to_string());
        heads.process(&mut state).unwrap();

        let cmd = &state.fixture_commands[0];
        assert_eq!(cmd.get(10), Some(128.0));
        assert_eq!(cmd.get(12), Some(128.0));
        assert_eq!(cmd.get(15), Some(0.0));
        assert_eq!(cmd.channel_values.len(), 4);
    }

    #[test]
    fn test_panel_blinder_on_fresh_drop() {
        let mut panels = PanelControl::new(&rig());
        let mut state = FrameState::initial_at(1.0);
        state.structure.current = MusicStructure::Drop;
        state.structure.time_since_last_drop = 0.1;
        state.beat.beat_phase = 0.5;
        panels.process(&mut state).unwrap();
        assert_eq!(state.fixture_commands[0].get(50), Some(255.0));

        state.fixture_commands.clear();
        state.structure.time_since_last_drop = 3.0;
        panels.process(&mut state).unwrap();
        assert_eq!(state.fixture_commands[0].get(50), Some(0.0));
    }

    #[test]
    fn test_panel_colors_follow_structure() {
        let mut panels = PanelControl::new(&rig());
        let mut state = FrameState::initial_at(0.0);
        state.structure.current = MusicStructure::Verse;
        state.audio.rms_energy = 0.5;
        panels.process(&mut state).unwrap();
        let cmd = &state.fixture_commands[0];
        assert_eq!(cmd.get(50), Some(125.0));
        assert_eq!(cmd.get(51), Some(200.0));
        assert_eq!(cmd.get(52), Some(150.0));
        assert_eq!(cmd.get(53), Some(100.0));

        state.fixture_commands.clear();
        state.structure.current = MusicStructure::Breakdown;
        state.audio.rms_energy = 0.0;
        panels.process(&mut state).unwrap();
        let cmd = &state.fixture_commands[0];
        assert_eq!(cmd.get(50), Some(100.0));
        assert_eq!(cmd.get(51), Some(50.0));
        assert_eq!(cmd.get(52), Some(100.0));
        assert_eq!(cmd.get(53), Some(246.0));
        assert_eq!(cmd.get(54), Some(0.0));
    }

    #[test]
    fn test_disabled_fixtures_are_skipped() {
        let mut configs = vec![FixtureConfig::new("panel_1", FixtureType::Panel, "panel_rgb_6ch", 1)];
        configs[0].enabled = false;
        let mut panels = PanelControl::new(&patch(&configs));
        let mut state = FrameState::initial_at(0.0);
        panels.process(&mut state).unwrap();
        assert!(state.fixture_commands.is_empty());
    }
}
