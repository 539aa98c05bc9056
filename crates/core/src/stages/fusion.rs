use crate::pipeline::{stage_names, PipelineStage};
use crate::state::{BpmSource, FrameState};

const AUDIO_BPM_WEIGHT: f64 = 0.7;
const CV_BPM_WEIGHT: f64 = 0.3;
const BPM_SMOOTHING: f64 = 0.9;

/// Merges the audio and vision tempo estimates and lets the vision lookahead
/// anticipate drops.
pub struct Fusion {
    fused_bpm: f64,
}

impl Default for Fusion {
    fn default() -> Self {
        Self::new()
    }
}

impl Fusion {
    pub fn new() -> Self {
        Self { fused_bpm: 128.0 }
    }

    pub fn fuse_bpm(&mut self, audio_bpm: f64, cv_bpm: Option<f64>, audio_confidence: f64) -> f64 {
        let target = match cv_bpm.filter(|bpm| *bpm > 60.0 && *bpm < 200.0) {
            Some(cv) if audio_confidence > 0.5 => {
                audio_bpm * AUDIO_BPM_WEIGHT + cv * CV_BPM_WEIGHT
            }
            Some(cv) => cv * 0.8 + audio_bpm * 0.2,
            None => audio_bpm,
        };

        if target.is_finite() {
            self.fused_bpm = self.fused_bpm * BPM_SMOOTHING + target * (1.0 - BPM_SMOOTHING);
        }
        self.fused_bpm
    }

    pub fn bpm_source(audio_confidence: f64, cv_bpm: Option<f64>) -> BpmSource {
        match cv_bpm {
            Some(_) if audio_confidence < 0.5 => BpmSource::Cv,
            _ if audio_confidence > 0.7 => BpmSource::Audio,
            Some(_) => BpmSource::Fused,
            None => BpmSource::Audio,
        }
    }
}

impl PipelineStage for Fusion {
    fn name(&self) -> &str {
        stage_names::FUSION
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        let confidence = state.beat.confidence;
        state.fused_bpm = self.fuse_bpm(state.beat.bpm, state.cv.detected_bpm, confidence);
        state.bpm_source = Self::bpm_source(confidence, state.cv.detected_bpm);

        // Bass visible on screen before it is audible
        let lookahead = state.cv.lookahead_bass;
        if lookahead > 0.7 && state.audio.rms_energy < 0.3 {
            state.structure.drop_probability = state.structure.drop_probability.max(lookahead * 0.5);
        }
        Ok(())
    }
}
