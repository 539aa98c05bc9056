//! Show intent: which scene the music calls for, how hard to hit it and how
//! much strobe the looks may use.

use crate::config::StrobeSafetyConfig;
use crate::pipeline::{stage_names, PipelineStage};
use crate::stages::scene::scene_for;
use crate::state::{DirectorState, FrameState, MusicStructure};

pub struct Director {
    max_strobe_hz: f64,
    default_scene: String,
    held_scene: String,
}

impl Director {
    pub fn new(strobe: &StrobeSafetyConfig, default_scene: &str) -> Self {
        Self {
            max_strobe_hz: strobe.max_rate_hz.max(0.0),
            default_scene: default_scene.to_string(),
            held_scene: default_scene.to_string(),
        }
    }

    pub fn decide(&mut self, state: &FrameState) -> DirectorState {
        let structure = state.structure.current;
        let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
        let energy = (0.6 * finite(state.audio.rms_energy)
            + 0.25 * finite(state.audio.spectral_flux)
            + 0.15 * finite(state.beat.confidence))
        .clamp(0.0, 1.0);

        // Scene changes land on the first beat of a bar
        let allow_transition = state.beat.downbeat && state.beat.bar_position == 1;
        if allow_transition {
            self.held_scene = scene_for(structure, &self.default_scene).to_string();
        }

        let (color_theme, movement_style) = match structure {
            MusicStructure::Drop => ("white_hot", "aggressive"),
            MusicStructure::Buildup => ("rising_warm", "accelerating"),
            MusicStructure::Breakdown => ("cool_blue", "slow_sweep"),
            MusicStructure::Intro | MusicStructure::Outro => ("ambient", "drift"),
            MusicStructure::Verse => ("warm", "steady"),
            MusicStructure::Unknown => ("neutral", "steady"),
        };

        let strobe_budget_hz = match structure {
            MusicStructure::Drop => (2.0 + 6.0 * energy).min(self.max_strobe_hz),
            MusicStructure::Buildup => (2.0 * state.structure.drop_probability).min(self.max_strobe_hz),
            _ => 0.0,
        };

        DirectorState {
            target_scene: self.held_scene.clone(),
            energy_level: energy,
            color_theme: color_theme.to_string(),
            movement_style: movement_style.to_string(),
            strobe_budget_hz: finite(strobe_budget_hz).max(0.0),
            allow_scene_transition: allow_transition,
        }
    }
}

impl PipelineStage for Director {
    fn name(&self) -> &str {
        stage_names::DIRECTOR_INTENT
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        state.director = self.decide(state);
        Ok(())
    }
}
