//! Heuristic section detector over a rolling window of audio features.

use std::collections::VecDeque;

use crate::config::StructureConfig;
use crate::pipeline::{stage_names, PipelineStage};
use crate::state::{AudioFeatures, FrameState, MusicStructure, StructureState};

/// About ten seconds at 50 fps.
const HISTORY: usize = 500;
const MIN_HISTORY: usize = 50;
const SHORT_WINDOW: usize = 50;
const SLOPE_WINDOW: usize = 100;

pub struct StructureDetector {
    config: StructureConfig,
    rms: VecDeque<f64>,
    centroid: VecDeque<f64>,
    low: VecDeque<f64>,

    current: MusicStructure,
    changed_at: f64,
    last_drop: Option<f64>,
    gap_started: Option<f64>,
    pre_gap_rms: f64,
}

fn mean<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Least-squares slope per sample.
fn slope(values: &[f64]) -> f64 {
    if values.len() < 10 {
        return 0.0;
    }
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;
    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

fn push_bounded(history: &mut VecDeque<f64>, value: f64) {
    if history.len() == HISTORY {
        history.pop_front();
    }
    history.push_back(value);
}

impl StructureDetector {
    pub fn new(config: StructureConfig) -> Self {
        Self {
            config,
            rms: VecDeque::with_capacity(HISTORY),
            centroid: VecDeque::with_capacity(HISTORY),
            low: VecDeque::with_capacity(HISTORY),
            current: MusicStructure::Unknown,
            changed_at: 0.0,
            last_drop: None,
            gap_started: None,
            pre_gap_rms: 0.0,
        }
    }

    pub fn current(&self) -> MusicStructure {
        self.current
    }

    pub fn update(&mut self, now: f64, features: &AudioFeatures) -> StructureState {
        let sanitize = |v: f64| if v.is_finite() { v } else { 0.0 };
        push_bounded(&mut self.rms, sanitize(features.rms_energy));
        push_bounded(&mut self.centroid, sanitize(features.spectral_centroid));
        push_bounded(&mut self.low, sanitize(features.low_energy));

        let (detected, drop_probability) = self.detect(
            now,
            sanitize(features.rms_energy),
            sanitize(features.spectral_centroid),
            sanitize(features.low_energy),
        );

        if detected != self.current {
            log::info!("Structure change: {} -> {}", self.current, detected);
            self.current = detected;
            self.changed_at = now;
        }

        StructureState {
            current: self.current,
            confidence: self.confidence(),
            drop_probability,
            time_since_last_drop: self.last_drop.map(|t| now - t).unwrap_or(f64::INFINITY),
            time_since_change: now - self.changed_at,
        }
    }

    fn drop_allowed(&self, now: f64) -> bool {
        self.last_drop
            .map(|t| now - t > self.config.min_drop_interval_s)
            .unwrap_or(true)
    }

    fn detect(&mut self, now: f64, rms: f64, centroid: f64, low: f64) -> (MusicStructure, f64) {
        if self.rms.len() < MIN_HISTORY {
            return (MusicStructure::Unknown, 0.0);
        }

        let long_avg = mean(self.rms.iter());
        let short_avg = mean(self.rms.iter().rev().take(SHORT_WINDOW));
        let recent: Vec<f64> = self
            .rms
            .iter()
            .skip(self.rms.len().saturating_sub(SLOPE_WINDOW))
            .copied()
            .collect();
        let rms_slope = slope(&recent);
        let centroid_avg = mean(self.centroid.iter());
        let low_avg = mean(self.low.iter());

        let mut drop_probability: f64 = 0.0;

        // A sudden near-silence often precedes a drop
        let gap_threshold = long_avg * self.config.gap_rms_threshold;
        if self.gap_started.is_none() && rms < gap_threshold && short_avg > gap_threshold * 0.5 {
            log::debug!("Entering gap (rms {:.3} < {:.3})", rms, gap_threshold);
            self.gap_started = Some(now);
            self.pre_gap_rms = short_avg;
        }

        if let Some(started) = self.gap_started {
            let gap = now - started;
            if gap < 1.0 {
                drop_probability = 0.8 + gap * 0.15;
            } else if rms > self.pre_gap_rms * 0.5 {
                self.gap_started = None;
                if rms > long_avg * self.config.drop_rms_multiplier && self.drop_allowed(now) {
                    self.last_drop = Some(now);
                    return (MusicStructure::Drop, 0.0);
                }
            } else if gap > 2.0 {
                self.gap_started = None;
            }
        }

        if rms > long_avg * self.config.drop_rms_multiplier
            && low > low_avg * 1.5
            && self.drop_allowed(now)
        {
            self.last_drop = Some(now);
            return (MusicStructure::Drop, 0.0);
        }

        if rms_slope > self.config.buildup_slope_threshold && centroid > centroid_avg * 1.2 {
            return (MusicStructure::Buildup, (rms_slope * 20.0).min(1.0));
        }

        if low < low_avg * 0.3 {
            return (MusicStructure::Breakdown, 0.0);
        }

        if short_avg > long_avg * 0.7 {
            return (MusicStructure::Verse, drop_probability);
        }

        if short_avg < long_avg * 0.5 {
            return if rms_slope > 0.0 {
                (MusicStructure::Intro, 0.0)
            } else {
                (MusicStructure::Outro, 0.0)
            };
        }

        (self.current, drop_probability)
    }

    fn confidence(&self) -> f64 {
        if self.rms.len() < SLOPE_WINDOW {
            return 0.3;
        }
        let recent: Vec<f64> = self.rms.iter().rev().take(SHORT_WINDOW).copied().collect();
        let avg = mean(recent.iter());
        if avg <= 0.0 {
            return 0.5;
        }
        let variance = recent.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / recent.len() as f64;
        (1.0 - variance.sqrt() / avg).clamp(0.0, 1.0)
    }
}

impl PipelineStage for StructureDetector {
    fn name(&self) -> &str {
        stage_names::STRUCTURE_DETECT
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        state.structure = self.update(state.timestamp, &state.audio);
        Ok(())
    }
}
