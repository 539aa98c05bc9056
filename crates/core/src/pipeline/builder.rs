//! Assembles the stage list for a run.
//!
//! Live and mock pipelines share everything from fusion onwards. Mock mode
//! swaps the three sensing stages for synthetic ones and sends DMX into a
//! recording transport instead of hardware.

use std::sync::Arc;

use prism_fixtures::{Fixture, FixtureConfig};

use crate::config::Settings;
use crate::interpreter::CommandInterpreter;
use crate::output::{DmxOutput, DmxOutputStage, MockTransport};
use crate::pipeline::{stage_names, Orchestrator, PipelineStage, StopHandle};
use crate::safety::{EmergencyStopHandle, SafetyInterlock};
use crate::sensors::{AudioSense, CvSense, MidiSense};
use crate::stages::{
    BeatTracker, Director, FeatureExtractor, Fusion, LaserControl, MockAudioSense, MockCvSense,
    MockMidiSense, MovingHeadControl, PanelControl, SceneSelector, StructureDetector,
};

/// A ready-to-start pipeline and the handles callers need around it.
pub struct Pipeline {
    pub orchestrator: Orchestrator,
    pub output: Arc<DmxOutput>,
    pub emergency_stop: EmergencyStopHandle,
    /// Recording transport shared with the output, mock runs only.
    pub mock_transport: Option<MockTransport>,
}

impl Pipeline {
    pub fn stop_handle(&self) -> StopHandle {
        self.orchestrator.stop_handle()
    }
}

fn make_output(settings: &Settings, mock: bool) -> (Arc<DmxOutput>, Option<MockTransport>) {
    let double_buffer = settings.runtime.dmx_double_buffer;
    if mock {
        let transport = MockTransport::new();
        let output = DmxOutput::with_transport(
            settings.dmx.clone(),
            double_buffer,
            Box::new(transport.clone()),
        );
        (Arc::new(output), Some(transport))
    } else {
        (
            Arc::new(DmxOutput::new(settings.dmx.clone(), double_buffer)),
            None,
        )
    }
}

fn make_output_stage(settings: &Settings, output: &Arc<DmxOutput>) -> DmxOutputStage {
    let stage = DmxOutputStage::new(Arc::clone(output));
    if settings.watchdog.monitor_enabled {
        stage.with_monitor(
            settings.watchdog.max_silence_s,
            settings.watchdog.check_interval_s,
        )
    } else {
        stage
    }
}

fn make_interlock(
    settings: &Settings,
    configs: &[FixtureConfig],
    output: &Arc<DmxOutput>,
) -> SafetyInterlock {
    SafetyInterlock::new(settings.safety.clone(), configs)
        .with_output(output.clone(), &settings.watchdog)
}

/// Build the full fifteen-stage pipeline over the patched `fixtures`.
pub fn build_pipeline(settings: &Settings, fixtures: &[Fixture], mock: bool) -> Pipeline {
    let configs: Vec<FixtureConfig> = fixtures.iter().map(|f| f.config.clone()).collect();
    let (output, mock_transport) = make_output(settings, mock);
    let interlock = make_interlock(settings, &configs, &output);
    let emergency_stop = interlock.emergency_stop_handle();

    let (audio, midi, cv): (
        Box<dyn PipelineStage>,
        Box<dyn PipelineStage>,
        Box<dyn PipelineStage>,
    ) = if mock {
        (
            Box::new(MockAudioSense::new(settings.audio.sample_rate)),
            Box::new(MockMidiSense::new()),
            Box::new(MockCvSense::new()),
        )
    } else {
        (
            Box::new(AudioSense::new(settings.audio.clone())),
            Box::new(MidiSense::new(settings.midi.clone())),
            Box::new(CvSense::new()),
        )
    };

    let stages: Vec<Box<dyn PipelineStage>> = vec![
        audio,
        Box::new(FeatureExtractor::new()),
        Box::new(BeatTracker::new()),
        Box::new(StructureDetector::new(settings.structure.clone())),
        midi,
        cv,
        Box::new(Fusion::new()),
        Box::new(Director::new(
            &settings.safety.strobe,
            &settings.scene.default_scene,
        )),
        Box::new(SceneSelector::new(&settings.scene)),
        Box::new(LaserControl::new(fixtures, settings.safety.laser.clone())),
        Box::new(MovingHeadControl::new(
            fixtures,
            settings.safety.moving_head.clone(),
        )),
        Box::new(PanelControl::new(fixtures)),
        Box::new(CommandInterpreter::new(
            settings.safety.clone(),
            settings.interpreter.max_delta_per_frame,
            &configs,
        )),
        Box::new(interlock),
        Box::new(make_output_stage(settings, &output)),
    ];
    debug_assert_eq!(stages.len(), stage_names::ORDER.len());

    log::info!(
        "Built {} pipeline with {} fixtures",
        if mock { "mock" } else { "live" },
        fixtures.len()
    );

    Pipeline {
        orchestrator: Orchestrator::new(stages, settings.target_fps, settings.runtime.hybrid_pacing),
        output,
        emergency_stop,
        mock_transport,
    }
}

/// Audio sensing, the safety interlock and the output, for bring-up checks
/// of the transport.
pub fn build_minimal_pipeline(settings: &Settings, mock: bool) -> Pipeline {
    let (output, mock_transport) = make_output(settings, mock);
    let interlock = make_interlock(settings, &settings.fixtures, &output);
    let emergency_stop = interlock.emergency_stop_handle();

    let audio: Box<dyn PipelineStage> = if mock {
        Box::new(MockAudioSense::new(settings.audio.sample_rate))
    } else {
        Box::new(AudioSense::new(settings.audio.clone()))
    };

    let stages: Vec<Box<dyn PipelineStage>> = vec![
        audio,
        Box::new(interlock),
        Box::new(make_output_stage(settings, &output)),
    ];

    Pipeline {
        orchestrator: Orchestrator::new(stages, settings.target_fps, settings.runtime.hybrid_pacing),
        output,
        emergency_stop,
        mock_transport,
    }
}

#[cfg(test)]
mod tests {
    use prism_fixtures::{FixtureLibrary, FixtureType};

    use super::*;

    fn patched(settings: &Settings) -> Vec<Fixture> {
        let library = FixtureLibrary::new();
        settings
            .fixtures
            .iter()
            .map(|c| library.patch(c).unwrap())
            .collect()
    }

    fn rig() -> Settings {
        let mut settings = Settings::default();
        settings.fixtures = vec![
            FixtureConfig::new("laser_1", FixtureType::Laser, "laser_generic_7ch", 1),
            FixtureConfig::new("mh_1", FixtureType::MovingHead, "moving_head_16ch", 10),
            FixtureConfig::new("panel_1", FixtureType::Panel, "panel_rgb_6ch", 30),
        ];
        settings
    }

    #[test]
    fn test_full_pipeline_has_canonical_order() {
        let settings = rig();
        let pipeline = build_pipeline(&settings, &patched(&settings), true);
        assert_eq!(pipeline.orchestrator.stage_names(), stage_names::ORDER.to_vec());
        assert!(pipeline.mock_transport.is_some());
    }

    #[test]
    fn test_minimal_pipeline_order() {
        let pipeline = build_minimal_pipeline(&Settings::default(), true);
        assert_eq!(
            pipeline.orchestrator.stage_names(),
            vec![
                stage_names::AUDIO_SENSE,
                stage_names::SAFETY_INTERLOCK,
                stage_names::DMX_OUTPUT
            ]
        );
    }

    #[test]
    fn test_live_pipeline_has_no_mock_transport() {
        let settings = rig();
        let pipeline = build_pipeline(&settings, &patched(&settings), false);
        assert!(pipeline.mock_transport.is_none());
        assert_eq!(pipeline.orchestrator.stage_names().len(), 15);
    }

    #[test]
    fn test_emergency_stop_handle_reaches_interlock() {
        let settings = rig();
        let mut pipeline = build_pipeline(&settings, &patched(&settings), true);
        pipeline.emergency_stop.trigger("test");
        let state = pipeline.orchestrator.step();
        assert!(state.safety.emergency_stop);
        assert!(state.dmx_universe.is_blackout());
    }

    #[test]
    fn test_settings_fps_reaches_orchestrator() {
        let mut settings = rig();
        settings.target_fps = 30.0;
        let pipeline = build_pipeline(&settings, &patched(&settings), true);
        assert_eq!(pipeline.orchestrator.target_fps(), 30.0);
    }
}
