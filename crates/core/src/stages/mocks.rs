//! Synthetic sensing for `--mock` runs and tests. Everything is derived from
//! the frame timestamp, so runs are repeatable.

use std::f64::consts::PI;

use crate::pipeline::{stage_names, PipelineStage};
use crate::state::{AudioFeatures, BeatInfo, CvState, FrameState, MidiState};

/// Audio produced per frame.
const BLOCK_SECONDS: f64 = 0.02;

pub struct MockAudioSense {
    sample_rate: u32,
    bpm: f64,
}

impl Default for MockAudioSense {
    fn default() -> Self {
        Self::new(48000)
    }
}

impl MockAudioSense {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            bpm: 128.0,
        }
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        if bpm.is_finite() && bpm > 0.0 {
            self.bpm = bpm;
        }
    }

    /// A 100 Hz tone with a decaying 60 Hz kick at the start of every beat.
    pub fn synthesize(&self, start: f64) -> Vec<f32> {
        let beat_freq = self.bpm / 60.0;
        let count = (self.sample_rate as f64 * BLOCK_SECONDS) as usize;
        (0..count)
            .map(|i| {
                let t = start + i as f64 / self.sample_rate as f64;
                let tone = 0.3 * (2.0 * PI * 100.0 * t).sin();
                let phase = (t * beat_freq).rem_euclid(1.0);
                let kick = if phase < 0.1 {
                    0.8 * (-phase * 30.0).exp() * (2.0 * PI * 60.0 * t).sin()
                } else {
                    0.0
                };
                (tone + kick) as f32
            })
            .collect()
    }
}

impl PipelineStage for MockAudioSense {
    fn name(&self) -> &str {
        stage_names::AUDIO_SENSE
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        let t = state.timestamp;
        let beat_freq = self.bpm / 60.0;
        let phase = (t * beat_freq).rem_euclid(1.0);

        state.audio_buffer = self.synthesize(t);
        state.sample_rate = self.sample_rate;
        state.sensor_status.audio = true;

        state.audio = AudioFeatures {
            rms_energy: 0.5 + 0.3 * (phase * PI).sin(),
            spectral_centroid: 2000.0 + 1000.0 * (t * 0.5).sin(),
            spectral_flux: 0.5 + 0.3 * (phase * 2.0 * PI).sin(),
            low_energy: 0.6 + 0.3 * (phase * PI).sin(),
            mid_energy: 0.4,
            high_energy: 0.2,
        };
        state.beat = BeatInfo {
            bpm: self.bpm,
            beat_phase: phase,
            bar_position: (t * beat_freq).rem_euclid(4.0).floor() as u8 + 1,
            downbeat: phase < 0.1,
            confidence: 0.9,
        };
        Ok(())
    }

    fn start(&mut self) -> crate::error::Result<()> {
        log::info!("Mock audio sense started ({} BPM)", self.bpm);
        Ok(())
    }

    fn stop(&mut self) {
        log::info!("Mock audio sense stopped");
    }
}

pub struct MockMidiSense {
    faders: [f64; 4],
    crossfader: f64,
}

impl Default for MockMidiSense {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMidiSense {
    pub fn new() -> Self {
        Self {
            faders: [1.0; 4],
            crossfader: 0.0,
        }
    }

    /// Set fader 1-4.
    pub fn set_fader(&mut self, channel: usize, value: f64) {
        if (1..=4).contains(&channel) {
            self.faders[channel - 1] = value.clamp(0.0, 1.0);
        }
    }
}

impl PipelineStage for MockMidiSense {
    fn name(&self) -> &str {
        stage_names::MIDI_SENSE
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        state.midi = MidiState {
            crossfader_position: self.crossfader,
            channel_faders: self.faders,
            filter_positions: [0.5; 4],
            pad_triggers: Vec::new(),
            last_update: state.timestamp,
        };
        state.sensor_status.midi = true;
        Ok(())
    }
}

pub struct MockCvSense {
    bpm: f64,
}

impl Default for MockCvSense {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCvSense {
    pub fn new() -> Self {
        Self { bpm: 128.0 }
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm;
    }
}

impl PipelineStage for MockCvSense {
    fn name(&self) -> &str {
        stage_names::CV_SENSE
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        state.cv = CvState {
            detected_bpm: Some(self.bpm),
            lookahead_bass: 0.5 + 0.3 * (state.timestamp * 0.5).sin(),
            lookahead_mids: 0.4,
            lookahead_highs: 0.3,
            capture_timestamp: state.timestamp,
        };
        state.sensor_status.cv = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_audio_fills_a_frame() {
        let mut audio = MockAudioSense::default();
        let mut state = FrameState::initial_at(100.0);
        audio.process(&mut state).unwrap();

        assert_eq!(state.audio_buffer.len(), 960);
        assert!(state.sensor_status.audio);
        assert_eq!(state.beat.bpm, 128.0);
        assert_eq!(state.beat.confidence, 0.9);
        assert!((1..=4).contains(&state.beat.bar_position));
        assert!((0.0..1.0).contains(&state.beat.beat_phase));
        assert!(state.audio_buffer.iter().all(|s| s.abs() <= 1.1));
    }

    #[test]
    fn test_mock_audio_is_deterministic() {
        let audio = MockAudioSense::default();
        assert_eq!(audio.synthesize(3.0), audio.synthesize(3.0));
    }

    #[test]
    fn test_downbeat_at_start_of_beat() {
        let mut audio = MockAudioSense::default();
        audio.set_bpm(120.0);
        let mut state = FrameState::initial_at(10.0);
        audio.process(&mut state).unwrap();
        assert!(state.beat.downbeat);

        let mut state = FrameState::initial_at(10.25);
        audio.process(&mut state).unwrap();
        assert!(!state.beat.downbeat);
    }

    #[test]
    fn test_mock_midi_and_cv() {
        let mut midi = MockMidiSense::new();
        midi.set_fader(2, 0.25);
        midi.set_fader(9, 0.0);
        let mut cv = MockCvSense::new();
        let mut state = FrameState::initial_at(0.0);
        midi.process(&mut state).unwrap();
        cv.process(&mut state).unwrap();

        assert_eq!(state.midi.channel_faders, [1.0, 0.25, 1.0, 1.0]);
        assert_eq!(state.cv.detected_bpm, Some(128.0));
        assert!(state.sensor_status.midi && state.sensor_status.cv);
    }
}
