//! Energy-peak beat tracker.
//!
//! A frame whose RMS is well above the recent average counts as a beat. Tempo
//! is the median spacing of recent beats; confidence decays when beats stop
//! arriving.

use std::collections::VecDeque;

use crate::pipeline::{stage_names, PipelineStage};
use crate::state::{BeatInfo, FrameState};

const RMS_HISTORY: usize = 50;
const PEAK_WINDOW: usize = 10;
const PEAK_RATIO: f64 = 1.5;
const BEAT_HISTORY: usize = 32;
/// Shortest accepted beat spacing (300 BPM).
const MIN_INTERVAL_S: f64 = 0.2;
const MAX_INTERVAL_S: f64 = 2.0;
const CONFIDENCE_DECAY_S: f64 = 2.0;

pub struct BeatTracker {
    rms_history: VecDeque<f64>,
    beat_times: VecDeque<f64>,
    last_beat: Option<f64>,
    bpm: f64,
    bar_position: u8,
}

impl Default for BeatTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BeatTracker {
    pub fn new() -> Self {
        Self {
            rms_history: VecDeque::with_capacity(RMS_HISTORY),
            beat_times: VecDeque::with_capacity(BEAT_HISTORY),
            last_beat: None,
            bpm: 128.0,
            bar_position: 1,
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Feed one frame's RMS level. Returns true if it was taken as a beat.
    pub fn update(&mut self, now: f64, rms: f64) -> bool {
        if !rms.is_finite() {
            return false;
        }

        let is_peak = self.rms_history.len() >= PEAK_WINDOW && {
            let recent = self.rms_history.iter().rev().take(PEAK_WINDOW);
            let average = recent.sum::<f64>() / PEAK_WINDOW as f64;
            rms > average * PEAK_RATIO && rms > 0.0
        };

        if self.rms_history.len() == RMS_HISTORY {
            self.rms_history.pop_front();
        }
        self.rms_history.push_back(rms);

        let spaced = self
            .last_beat
            .map(|last| now - last >= MIN_INTERVAL_S)
            .unwrap_or(true);

        if is_peak && spaced {
            self.on_beat(now, false);
            true
        } else {
            false
        }
    }

    /// Register a beat detected elsewhere.
    pub fn on_beat(&mut self, now: f64, downbeat: bool) {
        if self.beat_times.len() == BEAT_HISTORY {
            self.beat_times.pop_front();
        }
        self.beat_times.push_back(now);
        self.last_beat = Some(now);

        self.bar_position = if downbeat {
            1
        } else {
            self.bar_position % 4 + 1
        };

        if self.beat_times.len() >= 4 {
            let recent: Vec<f64> = self.beat_times.iter().rev().take(8).copied().collect();
            let mut intervals: Vec<f64> = recent.windows(2).map(|w| w[0] - w[1]).collect();
            intervals.sort_by(|a, b| a.total_cmp(b));
            let median = intervals[intervals.len() / 2];
            if median > MIN_INTERVAL_S && median < MAX_INTERVAL_S {
                self.bpm = 60.0 / median;
            }
        }
    }

    pub fn beat_info(&self, now: f64) -> BeatInfo {
        let Some(last) = self.last_beat else {
            return BeatInfo {
                bpm: self.bpm,
                ..BeatInfo::default()
            };
        };

        let beat_duration = 60.0 / self.bpm;
        let since = (now - last).max(0.0);
        BeatInfo {
            bpm: self.bpm,
            beat_phase: (since % beat_duration) / beat_duration,
            bar_position: self.bar_position,
            downbeat: self.bar_position == 1,
            confidence: (1.0 - since / CONFIDENCE_DECAY_S).max(0.0),
        }
    }
}

impl PipelineStage for BeatTracker {
    fn name(&self) -> &str {
        stage_names::BEAT_TRACK
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        // A sensing stage that already reports beats wins
        if state.beat.confidence > 0.0 {
            return Ok(());
        }
        self.update(state.timestamp, state.audio.rms_energy);
        state.beat = self.beat_info(state.timestamp);
        Ok(())
    }
}
