//! Per-frame state threaded through the pipeline.
//!
//! A `FrameState` is built once per tick. Sensing and analysis stages fill in
//! their sections, fixture stages append `FixtureCommand`s, and the output stage
//! commits them. Only scene, structure, safety, the committed universe and the
//! frame counter survive into the next tick (see [`FrameState::next_frame`]).

use std::collections::BTreeMap;
use std::time::Duration;

use prism_fixtures::FixtureType;

use crate::timing::monotonic_seconds;
use crate::universe::Universe;

/// Requested channel values for one fixture, keyed by absolute DMX address.
///
/// Values are floats so an upstream NaN or infinity is carried as-is and
/// rejected at the output instead of being silently coerced.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureCommand {
    pub fixture_id: String,
    pub fixture_type: FixtureType,
    pub channel_values: BTreeMap<u16, f64>,
}

impl FixtureCommand {
    pub fn new(fixture_id: &str, fixture_type: FixtureType) -> Self {
        Self {
            fixture_id: fixture_id.to_string(),
            fixture_type,
            channel_values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, channel: u16, value: f64) -> Self {
        self.channel_values.insert(channel, value);
        self
    }

    pub fn set(&mut self, channel: u16, value: f64) {
        self.channel_values.insert(channel, value);
    }

    pub fn get(&self, channel: u16) -> Option<f64> {
        self.channel_values.get(&channel).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicStructure {
    Intro,
    Verse,
    Buildup,
    Drop,
    Breakdown,
    Outro,
    Unknown,
}

impl std::fmt::Display for MusicStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MusicStructure::Intro => "intro",
            MusicStructure::Verse => "verse",
            MusicStructure::Buildup => "buildup",
            MusicStructure::Drop => "drop",
            MusicStructure::Breakdown => "breakdown",
            MusicStructure::Outro => "outro",
            MusicStructure::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioFeatures {
    pub rms_energy: f64,
    pub spectral_centroid: f64,
    pub spectral_flux: f64,
    /// 20-200 Hz
    pub low_energy: f64,
    /// 200-2000 Hz
    pub mid_energy: f64,
    /// 2000 Hz and up
    pub high_energy: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeatInfo {
    pub bpm: f64,
    /// Position within the current beat, 0.0 to 1.0.
    pub beat_phase: f64,
    /// Beat within the bar, 1 to 4.
    pub bar_position: u8,
    pub downbeat: bool,
    pub confidence: f64,
}

impl Default for BeatInfo {
    fn default() -> Self {
        Self {
            bpm: 128.0,
            beat_phase: 0.0,
            bar_position: 1,
            downbeat: false,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructureState {
    pub current: MusicStructure,
    pub confidence: f64,
    pub drop_probability: f64,
    pub time_since_last_drop: f64,
    pub time_since_change: f64,
}

impl Default for StructureState {
    fn default() -> Self {
        Self {
            current: MusicStructure::Unknown,
            confidence: 0.0,
            drop_probability: 0.0,
            time_since_last_drop: f64::INFINITY,
            time_since_change: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MidiState {
    /// -1.0 (left) to 1.0 (right)
    pub crossfader_position: f64,
    pub channel_faders: [f64; 4],
    pub filter_positions: [f64; 4],
    /// Pads hit since the previous frame.
    pub pad_triggers: Vec<u8>,
    pub last_update: f64,
}

impl Default for MidiState {
    fn default() -> Self {
        Self {
            crossfader_position: 0.0,
            channel_faders: [1.0; 4],
            filter_positions: [0.5; 4],
            pad_triggers: Vec::new(),
            last_update: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CvState {
    pub detected_bpm: Option<f64>,
    pub lookahead_bass: f64,
    pub lookahead_mids: f64,
    pub lookahead_highs: f64,
    pub capture_timestamp: f64,
}

impl Default for CvState {
    fn default() -> Self {
        Self {
            detected_bpm: None,
            lookahead_bass: 0.5,
            lookahead_mids: 0.5,
            lookahead_highs: 0.5,
            capture_timestamp: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpmSource {
    Default,
    Audio,
    Cv,
    Fused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectorState {
    pub target_scene: String,
    pub energy_level: f64,
    pub color_theme: String,
    pub movement_style: String,
    /// Upper bound on strobe rate the fixture stages may request.
    pub strobe_budget_hz: f64,
    pub allow_scene_transition: bool,
}

impl Default for DirectorState {
    fn default() -> Self {
        Self {
            target_scene: "idle".to_string(),
            energy_level: 0.0,
            color_theme: "neutral".to_string(),
            movement_style: "steady".to_string(),
            strobe_budget_hz: 0.0,
            allow_scene_transition: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneState {
    pub current_scene: String,
    pub pending_scene: Option<String>,
    pub transition_progress: f64,
    pub transition_start_time: f64,
    pub scene_start_time: f64,
}

impl SceneState {
    fn new(scene: &str, now: f64) -> Self {
        Self {
            current_scene: scene.to_string(),
            pending_scene: None,
            transition_progress: 0.0,
            transition_start_time: now,
            scene_start_time: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyState {
    /// True when no safety flag is raised.
    pub ok: bool,
    pub last_heartbeat: f64,
    pub error_state: Option<String>,
    pub laser_enabled: bool,
    pub strobe_enabled: bool,
    pub emergency_stop: bool,
    pub strobe_cooldown: bool,
    pub degraded: bool,
    pub degradation_scale: f64,
}

impl SafetyState {
    fn new(now: f64) -> Self {
        Self {
            ok: true,
            last_heartbeat: now,
            error_state: None,
            laser_enabled: true,
            strobe_enabled: true,
            emergency_stop: false,
            strobe_cooldown: false,
            degraded: false,
            degradation_scale: 1.0,
        }
    }
}

/// Values forced by the safety interlock, applied by the output after all
/// fixture commands.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SafetyOverrides {
    /// Zero the whole universe before anything else is applied.
    pub blackout: bool,
    pub channels: BTreeMap<u16, u8>,
}

impl SafetyOverrides {
    pub fn is_empty(&self) -> bool {
        !self.blackout && self.channels.is_empty()
    }

    pub fn clear(&mut self) {
        self.blackout = false;
        self.channels.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorStatus {
    pub audio: bool,
    pub midi: bool,
    pub cv: bool,
}

#[derive(Debug, Clone)]
pub struct FrameState {
    pub timestamp: f64,
    pub frame_number: u64,

    pub audio_buffer: Vec<f32>,
    pub sample_rate: u32,
    pub audio: AudioFeatures,
    pub beat: BeatInfo,
    pub structure: StructureState,
    pub midi: MidiState,
    pub cv: CvState,
    pub fused_bpm: f64,
    pub bpm_source: BpmSource,

    pub director: DirectorState,
    pub scene: SceneState,

    pub fixture_commands: Vec<FixtureCommand>,
    pub safety_overrides: SafetyOverrides,
    pub dmx_universe: Universe,
    pub safety: SafetyState,

    pub sensor_status: SensorStatus,
    pub processing_times: BTreeMap<String, Duration>,
}

impl Default for FrameState {
    fn default() -> Self {
        Self::initial()
    }
}

impl FrameState {
    /// The state for the very first frame.
    pub fn initial() -> Self {
        Self::initial_at(monotonic_seconds())
    }

    pub fn initial_at(now: f64) -> Self {
        Self {
            timestamp: now,
            frame_number: 0,
            audio_buffer: Vec::new(),
            sample_rate: 48000,
            audio: AudioFeatures::default(),
            beat: BeatInfo::default(),
            structure: StructureState::default(),
            midi: MidiState::default(),
            cv: CvState::default(),
            fused_bpm: 128.0,
            bpm_source: BpmSource::Default,
            director: DirectorState::default(),
            scene: SceneState::new("idle", now),
            fixture_commands: Vec::new(),
            safety_overrides: SafetyOverrides::default(),
            dmx_universe: Universe::new(),
            safety: SafetyState::new(now),
            sensor_status: SensorStatus::default(),
            processing_times: BTreeMap::new(),
        }
    }

    /// Start the next frame, carrying over the fields that span ticks.
    pub fn next_frame(&self) -> Self {
        self.next_frame_at(monotonic_seconds())
    }

    pub fn next_frame_at(&self, now: f64) -> Self {
        let mut next = Self::initial_at(now);
        next.frame_number = self.frame_number.wrapping_add(1);
        next.scene = self.scene.clone();
        next.structure = self.structure.clone();
        next.fused_bpm = self.fused_bpm;
        next.bpm_source = self.bpm_source;
        next.safety = self.safety.clone();
        next.dmx_universe = self.dmx_universe.clone();
        next
    }

    pub fn record_time(&mut self, stage: &str, elapsed: Duration) {
        self.processing_times.insert(stage.to_string(), elapsed);
    }
}
