use std::collections::HashMap;

use crate::state::FrameState;

/// Canonical stage names, in execution order.
pub mod stage_names {
    pub const AUDIO_SENSE: &str = "audio_sense";
    pub const FEATURE_EXTRACT: &str = "feature_extract";
    pub const BEAT_TRACK: &str = "beat_track";
    pub const STRUCTURE_DETECT: &str = "structure_detect";
    pub const MIDI_SENSE: &str = "midi_sense";
    pub const CV_SENSE: &str = "cv_sense";
    pub const FUSION: &str = "fusion";
    pub const DIRECTOR_INTENT: &str = "director_intent";
    pub const SCENE_SELECT: &str = "scene_select";
    pub const LASER_CONTROL: &str = "laser_control";
    pub const MOVING_HEAD_CONTROL: &str = "moving_head_control";
    pub const PANEL_CONTROL: &str = "panel_control";
    pub const INTERPRETER: &str = "interpreter";
    pub const SAFETY_INTERLOCK: &str = "safety_interlock";
    pub const DMX_OUTPUT: &str = "dmx_output";

    pub const ORDER: [&str; 15] = [
        AUDIO_SENSE,
        FEATURE_EXTRACT,
        BEAT_TRACK,
        STRUCTURE_DETECT,
        MIDI_SENSE,
        CV_SENSE,
        FUSION,
        DIRECTOR_INTENT,
        SCENE_SELECT,
        LASER_CONTROL,
        MOVING_HEAD_CONTROL,
        PANEL_CONTROL,
        INTERPRETER,
        SAFETY_INTERLOCK,
        DMX_OUTPUT,
    ];
}

/// A single step of the frame pipeline.
///
/// Stages run sequentially on the orchestrator thread and own their state
/// exclusively. Anything that has to run off-thread (audio capture, MIDI
/// callbacks, the DMX transmit loop) is started in `start` and torn down in
/// `stop`.
pub trait PipelineStage: Send {
    fn name(&self) -> &str;

    /// Run once per frame. An error rolls the frame back to its state before
    /// this stage ran.
    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()>;

    /// Acquire devices and spawn helper threads.
    fn start(&mut self) -> crate::error::Result<()> {
        Ok(())
    }

    /// Release everything acquired in `start`. Must be safe to call twice.
    fn stop(&mut self) {}

    /// Failures in a safety-critical stage also discard the frame's fixture commands.
    fn safety_critical(&self) -> bool {
        false
    }

    fn status(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}
