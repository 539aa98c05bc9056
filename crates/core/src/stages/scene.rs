use std::collections::BTreeMap;

use crate::config::SceneConfig;
use crate::pipeline::{stage_names, PipelineStage};
use crate::state::{FrameState, MusicStructure};

/// Scene that fits a musical section. `fallback` covers unknown material.
pub fn scene_for(structure: MusicStructure, fallback: &str) -> &str {
    match structure {
        MusicStructure::Intro => "intro_ambient",
        MusicStructure::Verse => "verse_rhythmic",
        MusicStructure::Buildup => "buildup_tension",
        MusicStructure::Drop => "drop_intense",
        MusicStructure::Breakdown => "breakdown_ambient",
        MusicStructure::Outro => "outro_fade",
        MusicStructure::Unknown => fallback,
    }
}

/// Picks the active scene and cross-fades to it.
///
/// Priority: controller pads, then drops, then the director's target.
pub struct SceneSelector {
    pad_scenes: BTreeMap<u8, String>,
    transition_time_s: f64,
}

impl SceneSelector {
    pub fn new(config: &SceneConfig) -> Self {
        Self {
            pad_scenes: config.pad_scenes.clone(),
            transition_time_s: config.transition_time_s.max(0.0),
        }
    }

    fn requested_scene(&self, state: &FrameState) -> String {
        if let Some(scene) = state
            .midi
            .pad_triggers
            .iter()
            .find_map(|pad| self.pad_scenes.get(pad))
        {
            log::info!("Pad override: {}", scene);
            return scene.clone();
        }

        if state.structure.current == MusicStructure::Drop || state.structure.drop_probability > 0.9 {
            return "drop_intense".to_string();
        }

        state.director.target_scene.clone()
    }
}

impl PipelineStage for SceneSelector {
    fn name(&self) -> &str {
        stage_names::SCENE_SELECT
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        let now = state.timestamp;
        let requested = self.requested_scene(state);
        let scene = &mut state.scene;

        if requested == scene.current_scene {
            scene.pending_scene = None;
            scene.transition_progress = 0.0;
            return Ok(());
        }

        if scene.pending_scene.as_deref() != Some(requested.as_str()) {
            scene.pending_scene = Some(requested);
            scene.transition_start_time = now;
            scene.transition_progress = 0.0;
            return Ok(());
        }

        let elapsed = now - scene.transition_start_time;
        scene.transition_progress = if self.transition_time_s > 0.0 {
            (elapsed / self.transition_time_s).clamp(0.0, 1.0)
        } else {
            1.0
        };

        if scene.transition_progress >= 1.0 {
            if let Some(next) = scene.pending_scene.take() {
                log::info!("Scene transition complete: {} -> {}", scene.current_scene, next);
                scene.current_scene = next;
                scene.scene_start_time = now;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> SceneSelector {
        let mut config = SceneConfig::default();
        config.pad_scenes.insert(0x30, "blinder".to_string());
        SceneSelector::new(&config)
    }

    #[test]
    fn test_transition_completes_after_transition_time() {
        let mut selector = selector();
        let mut state = FrameState::initial_at(0.0);
        state.director.target_scene = "verse_rhythmic".to_string();

        selector.process(&mut state).unwrap();
        assert_eq!(state.scene.pending_scene.as_deref(), Some("verse_rhythmic"));
        assert_eq!(state.scene.current_scene, "idle");

        state.timestamp = 0.25;
        selector.process(&mut state).unwrap();
        approx::assert_relative_eq!(state.scene.transition_progress, 0.5);

        state.timestamp = 0.5;
        selector.process(&mut state).unwrap();
        assert_eq!(state.scene.current_scene, "verse_rhythmic");
        assert_eq!(state.scene.pending_scene, None);
        assert_eq!(state.scene.scene_start_time, 0.5);
    }

    #[test]
    fn test_pad_beats_drop() {
        let selector = selector();
        let mut state = FrameState::initial_at(0.0);
        state.structure.current = MusicStructure::Drop;
        state.midi.pad_triggers = vec![0x31, 0x30];
        assert_eq!(selector.requested_scene(&state), "blinder");

        state.midi.pad_triggers.clear();
        assert_eq!(selector.requested_scene(&state), "drop_intense");
    }

    #[test]
    fn test_imminent_drop_preloads_drop_scene() {
        let selector = selector();
        let mut state = FrameState::initial_at(0.0);
        state.structure.drop_probability = 0.95;
        assert_eq!(selector.requested_scene(&state), "drop_intense");
    }

    #[test]
    fn test_scene_for_unknown_uses_fallback() {
        assert_eq!(scene_for(MusicStructure::Unknown, "house"), "house");
        assert_eq!(scene_for(MusicStructure::Breakdown, "house"), "breakdown_ambient");
    }
}
