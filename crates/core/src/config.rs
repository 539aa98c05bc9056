use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use prism_fixtures::{Fixture, FixtureConfig, FixtureLibrary};
use serde::{Deserialize, Serialize};

use crate::error::FatalError;

/// Configuration manager for prism settings.
/// Separates the schema (ranges, choices, descriptions) from the persisted values.
/// Settings are stored in prism.json in the working directory by default.
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
}

pub const DEFAULT_CONFIG_FILE: &str = "prism.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub target_fps: f64,
    pub debug: bool,
    pub dmx: DmxConfig,
    pub safety: SafetyConfig,
    pub interpreter: InterpreterConfig,
    pub watchdog: WatchdogConfig,
    pub runtime: RuntimeFlags,
    pub audio: AudioConfig,
    pub midi: MidiConfig,
    pub scene: SceneConfig,
    pub structure: StructureConfig,
    pub fixtures: Vec<FixtureConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_fps: 50.0,
            debug: false,
            dmx: DmxConfig::default(),
            safety: SafetyConfig::default(),
            interpreter: InterpreterConfig::default(),
            watchdog: WatchdogConfig::default(),
            runtime: RuntimeFlags::default(),
            audio: AudioConfig::default(),
            midi: MidiConfig::default(),
            scene: SceneConfig::default(),
            structure: StructureConfig::default(),
            fixtures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    /// FTDI based USB-serial adapter where the host generates DMX timing.
    EnttecOpen,
    Artnet,
}

impl std::fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceType::EnttecOpen => write!(f, "enttec_open"),
            InterfaceType::Artnet => write!(f, "artnet"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmxConfig {
    pub interface_type: InterfaceType,
    pub serial_port: String,
    pub refresh_rate_hz: f64,
    pub universe: u8,
    pub artnet_host: String,
    pub artnet_port: u16,
    pub artnet_broadcast: bool,
    pub artnet_net: u8,
    pub artnet_subnet: u8,
}

impl Default for DmxConfig {
    fn default() -> Self {
        Self {
            interface_type: InterfaceType::EnttecOpen,
            serial_port: "/dev/ttyUSB0".to_string(),
            refresh_rate_hz: 40.0,
            universe: 0,
            artnet_host: "255.255.255.255".to_string(),
            artnet_port: 6454,
            artnet_broadcast: true,
            artnet_net: 0,
            artnet_subnet: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserSafetyConfig {
    /// Highest permitted Y position, keeps beams above the audience plane.
    pub y_axis_max: u8,
    pub min_scan_speed: u8,
    pub y_channel_offset: u16,
    pub speed_channel_offset: u16,
    /// Mode/control channel, never scaled by degradation.
    pub mode_channel_offset: u16,
}

impl Default for LaserSafetyConfig {
    fn default() -> Self {
        Self {
            y_axis_max: 100,
            min_scan_speed: 30,
            y_channel_offset: 3,
            speed_channel_offset: 4,
            mode_channel_offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrobeSafetyConfig {
    pub max_rate_hz: f64,
    pub max_duration_s: f64,
    pub cooldown_s: f64,
}

impl Default for StrobeSafetyConfig {
    fn default() -> Self {
        Self {
            max_rate_hz: 10.0,
            max_duration_s: 5.0,
            cooldown_s: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovingHeadSafetyConfig {
    pub max_pan_speed: u8,
    pub max_tilt_speed: u8,
    /// Park heads at centre with the dimmer closed while the safety state reports an error.
    pub home_on_error: bool,
}

impl Default for MovingHeadSafetyConfig {
    fn default() -> Self {
        Self {
            max_pan_speed: 200,
            max_tilt_speed: 200,
            home_on_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub laser: LaserSafetyConfig,
    pub strobe: StrobeSafetyConfig,
    pub moving_head: MovingHeadSafetyConfig,
    pub heartbeat_timeout_s: f64,
    pub min_beat_confidence: f64,
    pub graceful_degradation: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            laser: LaserSafetyConfig::default(),
            strobe: StrobeSafetyConfig::default(),
            moving_head: MovingHeadSafetyConfig::default(),
            heartbeat_timeout_s: 1.0,
            min_beat_confidence: 0.3,
            graceful_degradation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub max_delta_per_frame: u32,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_delta_per_frame: 36,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub check_interval_s: f64,
    /// Run the output stall monitor alongside the heartbeat watchdog.
    pub monitor_enabled: bool,
    pub max_silence_s: f64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_s: 0.1,
            monitor_enabled: true,
            max_silence_s: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeFlags {
    pub dmx_double_buffer: bool,
    pub hybrid_pacing: bool,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            dmx_double_buffer: true,
            hybrid_pacing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name. `None` selects the system default.
    pub device: Option<String>,
    pub sample_rate: u32,
    pub block_size: u32,
    pub channels: u16,
    pub buffer_seconds: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 48000,
            block_size: 1024,
            channels: 2,
            buffer_seconds: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    /// Input port name. `None` picks the first port matching `auto_detect_patterns`.
    pub port_name: Option<String>,
    pub auto_detect_patterns: Vec<String>,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            port_name: None,
            auto_detect_patterns: vec![
                "XDJ-AZ".to_string(),
                "XDJ-XZ".to_string(),
                "DDJ".to_string(),
                "Pioneer".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub scenes_dir: PathBuf,
    pub default_scene: String,
    pub transition_time_s: f64,
    /// Controller pad note to scene name, for manual overrides.
    pub pad_scenes: BTreeMap<u8, String>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            scenes_dir: PathBuf::from("config/scenes"),
            default_scene: "idle".to_string(),
            transition_time_s: 0.5,
            pad_scenes: BTreeMap::new(),
        }
    }
}

/// Thresholds for the drop/buildup detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureConfig {
    /// A drop is an RMS level this many times the long-term average.
    pub drop_rms_multiplier: f64,
    /// RMS slope per frame that counts as a buildup.
    pub buildup_slope_threshold: f64,
    /// Fraction of the long-term average below which the signal is a pre-drop gap.
    pub gap_rms_threshold: f64,
    pub min_drop_interval_s: f64,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            drop_rms_multiplier: 2.0,
            buildup_slope_threshold: 0.01,
            gap_rms_threshold: 0.3,
            min_drop_interval_s: 10.0,
        }
    }
}

/// Available configuration options with validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub general: GeneralConfigSchema,
    pub dmx: DmxConfigSchema,
    pub safety: SafetyConfigSchema,
    pub audio: AudioConfigSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfigSchema {
    pub target_fps: ConfigOption<f64>,
    pub max_delta_per_frame: ConfigOption<u32>,
    pub watchdog_check_interval_s: ConfigOption<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmxConfigSchema {
    pub interface_type: ConfigOption<InterfaceType>,
    pub refresh_rate_hz: ConfigOption<f64>,
    pub artnet_port: ConfigOption<u16>,
    pub artnet_net: ConfigOption<u8>,
    pub artnet_subnet: ConfigOption<u8>,
    pub universe: ConfigOption<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfigSchema {
    pub heartbeat_timeout_s: ConfigOption<f64>,
    pub min_beat_confidence: ConfigOption<f64>,
    pub strobe_max_rate_hz: ConfigOption<f64>,
    pub strobe_max_duration_s: ConfigOption<f64>,
    pub strobe_cooldown_s: ConfigOption<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfigSchema {
    pub sample_rate: ConfigOption<u32>,
    pub block_size: ConfigOption<u32>,
}

/// Configuration option with validation and available choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub valid_choices: Option<Vec<T>>,
    pub description: String,
    pub requires_restart: bool,
}

impl<T: PartialOrd + Copy> ConfigOption<T> {
    fn check_range(&self, name: &str, value: T, errors: &mut Vec<String>)
    where
        T: std::fmt::Display,
    {
        if let Some((min, max)) = self.valid_range {
            if value < min || value > max {
                errors.push(format!("{} must be between {} and {}", name, min, max));
            }
        }
    }
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: Settings,
    pub created_at: String,
    pub modified_at: String,
}

impl ConfigManager {
    /// Create a new configuration manager.
    /// If no path is provided, defaults to 'prism.json' in the current working directory.
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        Self {
            config_path,
            settings: Settings::default(),
        }
    }

    /// Load settings from the configuration file.
    /// Writes a default file if none exists yet.
    pub fn load(&mut self) -> Result<Settings, ConfigError> {
        if !self.config_path.exists() {
            self.save()?;
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match application version {}. Using defaults for new settings.",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        self.settings = config_file.settings;
        Ok(self.settings.clone())
    }

    /// Save current settings to the configuration file
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let created_at = self.existing_created_at().unwrap_or_else(|| now.clone());

        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            created_at,
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(&self.config_path, content)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    fn existing_created_at(&self) -> Option<String> {
        let content = fs::read_to_string(&self.config_path).ok()?;
        let file: ConfigFile = serde_json::from_str(&content).ok()?;
        Some(file.created_at)
    }

    /// Validate, then store and persist new settings
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), ConfigError> {
        Self::validate_settings(&settings).map_err(ConfigError::ValidationError)?;
        self.settings = settings;
        self.save()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get configuration schema with available options
    pub fn schema() -> ConfigSchema {
        ConfigSchema {
            general: GeneralConfigSchema {
                target_fps: ConfigOption {
                    default: 50.0,
                    valid_range: Some((1.0, 240.0)),
                    valid_choices: None,
                    description: "Frame loop rate in frames per second".to_string(),
                    requires_restart: false,
                },
                max_delta_per_frame: ConfigOption {
                    default: 36,
                    valid_range: Some((1, 255)),
                    valid_choices: None,
                    description: "Largest change any channel may make in one frame".to_string(),
                    requires_restart: true,
                },
                watchdog_check_interval_s: ConfigOption {
                    default: 0.1,
                    valid_range: Some((0.01, 1.0)),
                    valid_choices: None,
                    description: "Heartbeat watchdog polling interval".to_string(),
                    requires_restart: true,
                },
            },
            dmx: DmxConfigSchema {
                interface_type: ConfigOption {
                    default: InterfaceType::EnttecOpen,
                    valid_range: None,
                    valid_choices: Some(vec![InterfaceType::EnttecOpen, InterfaceType::Artnet]),
                    description: "DMX interface: USB-serial adapter or Art-Net".to_string(),
                    requires_restart: true,
                },
                refresh_rate_hz: ConfigOption {
                    default: 40.0,
                    valid_range: Some((1.0, 44.0)),
                    valid_choices: None,
                    description: "DMX frames transmitted per second".to_string(),
                    requires_restart: true,
                },
                artnet_port: ConfigOption {
                    default: 6454,
                    valid_range: Some((1024, 65535)),
                    valid_choices: None,
                    description: "UDP port for Art-Net output".to_string(),
                    requires_restart: true,
                },
                artnet_net: ConfigOption {
                    default: 0,
                    valid_range: Some((0, 127)),
                    valid_choices: None,
                    description: "Art-Net net (7 bits)".to_string(),
                    requires_restart: true,
                },
                artnet_subnet: ConfigOption {
                    default: 0,
                    valid_range: Some((0, 15)),
                    valid_choices: None,
                    description: "Art-Net sub-net (4 bits)".to_string(),
                    requires_restart: true,
                },
                universe: ConfigOption {
                    default: 0,
                    valid_range: Some((0, 15)),
                    valid_choices: None,
                    description: "Art-Net universe within the sub-net (4 bits)".to_string(),
                    requires_restart: true,
                },
            },
            safety: SafetyConfigSchema {
                heartbeat_timeout_s: ConfigOption {
                    default: 1.0,
                    valid_range: Some((0.05, 10.0)),
                    valid_choices: None,
                    description: "Blackout when the frame loop stalls for this long".to_string(),
                    requires_restart: true,
                },
                min_beat_confidence: ConfigOption {
                    default: 0.3,
                    valid_range: Some((0.0, 1.0)),
                    valid_choices: None,
                    description: "Below this beat confidence output is scaled down".to_string(),
                    requires_restart: false,
                },
                strobe_max_rate_hz: ConfigOption {
                    default: 10.0,
                    valid_range: Some((0.1, 25.0)),
                    valid_choices: None,
                    description: "Most strobe onsets permitted per second".to_string(),
                    requires_restart: false,
                },
                strobe_max_duration_s: ConfigOption {
                    default: 5.0,
                    valid_range: Some((0.0, 60.0)),
                    valid_choices: None,
                    description: "Longest continuous strobe before cooldown".to_string(),
                    requires_restart: false,
                },
                strobe_cooldown_s: ConfigOption {
                    default: 2.0,
                    valid_range: Some((0.0, 60.0)),
                    valid_choices: None,
                    description: "Strobe lockout after a duty-cycle breach".to_string(),
                    requires_restart: false,
                },
            },
            audio: AudioConfigSchema {
                sample_rate: ConfigOption {
                    default: 48000,
                    valid_range: None,
                    valid_choices: Some(vec![44100, 48000, 96000]),
                    description: "Audio capture sample rate in Hz".to_string(),
                    requires_restart: true,
                },
                block_size: ConfigOption {
                    default: 1024,
                    valid_range: None,
                    valid_choices: Some(vec![256, 512, 1024, 2048]),
                    description: "Audio capture block size in samples".to_string(),
                    requires_restart: true,
                },
            },
        }
    }

    /// Validate settings against schema
    pub fn validate_settings(settings: &Settings) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let schema = Self::schema();

        schema
            .general
            .target_fps
            .check_range("target_fps", settings.target_fps, &mut errors);
        schema.general.max_delta_per_frame.check_range(
            "interpreter.max_delta_per_frame",
            settings.interpreter.max_delta_per_frame,
            &mut errors,
        );
        schema.general.watchdog_check_interval_s.check_range(
            "watchdog.check_interval_s",
            settings.watchdog.check_interval_s,
            &mut errors,
        );

        schema.dmx.refresh_rate_hz.check_range(
            "dmx.refresh_rate_hz",
            settings.dmx.refresh_rate_hz,
            &mut errors,
        );
        schema
            .dmx
            .artnet_port
            .check_range("dmx.artnet_port", settings.dmx.artnet_port, &mut errors);
        schema
            .dmx
            .artnet_net
            .check_range("dmx.artnet_net", settings.dmx.artnet_net, &mut errors);
        schema.dmx.artnet_subnet.check_range(
            "dmx.artnet_subnet",
            settings.dmx.artnet_subnet,
            &mut errors,
        );
        schema
            .dmx
            .universe
            .check_range("dmx.universe", settings.dmx.universe, &mut errors);
        if settings.dmx.interface_type == InterfaceType::Artnet
            && settings.dmx.artnet_host.parse::<std::net::IpAddr>().is_err()
        {
            errors.push(format!(
                "dmx.artnet_host '{}' is not an IP address",
                settings.dmx.artnet_host
            ));
        }

        schema.safety.heartbeat_timeout_s.check_range(
            "safety.heartbeat_timeout_s",
            settings.safety.heartbeat_timeout_s,
            &mut errors,
        );
        schema.safety.min_beat_confidence.check_range(
            "safety.min_beat_confidence",
            settings.safety.min_beat_confidence,
            &mut errors,
        );
        schema.safety.strobe_max_rate_hz.check_range(
            "safety.strobe.max_rate_hz",
            settings.safety.strobe.max_rate_hz,
            &mut errors,
        );
        schema.safety.strobe_max_duration_s.check_range(
            "safety.strobe.max_duration_s",
            settings.safety.strobe.max_duration_s,
            &mut errors,
        );
        schema.safety.strobe_cooldown_s.check_range(
            "safety.strobe.cooldown_s",
            settings.safety.strobe.cooldown_s,
            &mut errors,
        );

        if let Some(choices) = &schema.audio.sample_rate.valid_choices {
            if !choices.contains(&settings.audio.sample_rate) {
                errors.push(format!("audio.sample_rate must be one of: {:?}", choices));
            }
        }

        if let Some(choices) = &schema.audio.block_size.valid_choices {
            if !choices.contains(&settings.audio.block_size) {
                errors.push(format!("audio.block_size must be one of: {:?}", choices));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Reset settings to defaults
    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.settings = Settings::default();
        self.save()
    }
}

/// Fail-fast checks run before any output is opened.
///
/// Returns the enabled fixtures resolved against their profiles. Mock runs may
/// have no fixtures at all; live runs need at least one.
pub fn validate_startup(
    settings: &Settings,
    mock: bool,
    library: &FixtureLibrary,
) -> Result<Vec<Fixture>, FatalError> {
    ConfigManager::validate_settings(settings)
        .map_err(|errors| FatalError::Config(errors.join(", ")))?;

    let enabled: Vec<&FixtureConfig> = settings.fixtures.iter().filter(|f| f.enabled).collect();
    if !mock && enabled.is_empty() {
        return Err(FatalError::Config(
            "No enabled fixtures configured for live mode".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut fixtures = Vec::with_capacity(enabled.len());
    for config in enabled {
        if !seen.insert(config.id.as_str()) {
            return Err(FatalError::Config(format!(
                "Duplicate fixture id '{}'",
                config.id
            )));
        }
        fixtures.push(library.patch(config)?);
    }

    let scene = &settings.scene;
    if scene.default_scene != "idle" {
        let found = ["json", "yaml", "yml"].iter().any(|ext| {
            scene
                .scenes_dir
                .join(format!("{}.{}", scene.default_scene, ext))
                .exists()
        });
        if !found {
            return Err(FatalError::Scene {
                scene: scene.default_scene.clone(),
                dir: scene.scenes_dir.display().to_string(),
            });
        }
    }

    Ok(fixtures)
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    ReadError(String),
    WriteError(String),
    ParseError(String),
    SerializeError(String),
    ValidationError(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(msg) => write!(f, "Failed to read config file: {}", msg),
            ConfigError::WriteError(msg) => write!(f, "Failed to write config file: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config file: {}", msg),
            ConfigError::SerializeError(msg) => write!(f, "Failed to serialize config: {}", msg),
            ConfigError::ValidationError(errors) => {
                write!(f, "Config validation errors: {}", errors.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for FatalError {
    fn from(err: ConfigError) -> Self {
        FatalError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use prism_fixtures::FixtureType;
    use tempfile::TempDir;

    use super::*;

    fn laser(id: &str, start: u16) -> FixtureConfig {
        FixtureConfig::new(id, FixtureType::Laser, "laser_generic_7ch", start)
    }

    #[test]
    fn test_config_manager_new() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.json");

        let manager = ConfigManager::new(Some(config_path.clone()));
        assert_eq!(manager.config_path(), config_path);
        assert_eq!(manager.settings(), &Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));

        let mut settings = Settings::default();
        settings.target_fps = 44.0;
        settings.dmx.interface_type = InterfaceType::Artnet;
        settings.fixtures.push(laser("laser_1", 1));
        manager.update_settings(settings).unwrap();

        let mut manager2 = ConfigManager::new(Some(config_path));
        let loaded = manager2.load().unwrap();

        assert_eq!(loaded.target_fps, 44.0);
        assert_eq!(loaded.dmx.interface_type, InterfaceType::Artnet);
        assert_eq!(loaded.fixtures.len(), 1);
        assert_eq!(loaded.fixtures[0].id, "laser_1");
    }

    #[test]
    fn test_load_creates_default_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("prism.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));
        let settings = manager.load().unwrap();

        assert!(config_path.exists());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let json = r#"{"dmx":{"interface_type":"artnet","artnet_host":"10.0.0.5"},"safety":{"strobe":{"max_rate_hz":5.0}}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.dmx.interface_type, InterfaceType::Artnet);
        assert_eq!(settings.dmx.artnet_port, 6454);
        assert_eq!(settings.safety.strobe.max_rate_hz, 5.0);
        assert_eq!(settings.safety.strobe.cooldown_s, 2.0);
        assert_eq!(settings.safety.laser.y_axis_max, 100);
        assert!(settings.runtime.dmx_double_buffer);
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        assert!(ConfigManager::validate_settings(&settings).is_ok());

        settings.target_fps = 500.0;
        assert!(ConfigManager::validate_settings(&settings).is_err());

        settings.target_fps = 50.0;
        settings.dmx.artnet_subnet = 16;
        settings.audio.sample_rate = 22050;
        let errors = ConfigManager::validate_settings(&settings).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_update_rejects_invalid_settings() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::new(Some(temp_dir.path().join("c.json")));

        let mut settings = Settings::default();
        settings.safety.heartbeat_timeout_s = 0.0;
        assert!(matches!(
            manager.update_settings(settings),
            Err(ConfigError::ValidationError(_))
        ));
        assert_eq!(manager.settings(), &Settings::default());
    }

    #[test]
    fn test_schema_completeness() {
        let schema = ConfigManager::schema();

        assert!(schema.general.target_fps.default > 0.0);
        assert!(schema.dmx.artnet_port.valid_range.is_some());
        assert!(schema.dmx.interface_type.valid_choices.is_some());
        assert!(!schema.safety.heartbeat_timeout_s.description.is_empty());
    }

    #[test]
    fn test_startup_requires_fixtures_in_live_mode() {
        let settings = Settings::default();
        let library = FixtureLibrary::new();

        assert!(matches!(
            validate_startup(&settings, false, &library),
            Err(FatalError::Config(_))
        ));
        assert!(validate_startup(&settings, true, &library).unwrap().is_empty());
    }

    #[test]
    fn test_startup_ignores_disabled_fixtures() {
        let mut settings = Settings::default();
        let mut fixture = laser("laser_1", 1);
        fixture.enabled = false;
        settings.fixtures.push(fixture);

        assert!(validate_startup(&settings, false, &FixtureLibrary::new()).is_err());
    }

    #[test]
    fn test_startup_rejects_missing_profile() {
        let mut settings = Settings::default();
        settings.fixtures.push(FixtureConfig::new(
            "mh_1",
            FixtureType::MovingHead,
            "does_not_exist",
            1,
        ));

        assert!(matches!(
            validate_startup(&settings, false, &FixtureLibrary::new()),
            Err(FatalError::FixtureProfile(_))
        ));
    }

    #[test]
    fn test_startup_rejects_fixture_outside_universe() {
        let mut settings = Settings::default();
        settings.fixtures.push(laser("laser_1", 510));

        let err = validate_startup(&settings, false, &FixtureLibrary::new()).unwrap_err();
        assert!(err.to_string().contains("exceeds DMX universe"));
    }

    #[test]
    fn test_startup_rejects_duplicate_ids() {
        let mut settings = Settings::default();
        settings.fixtures.push(laser("laser_1", 1));
        settings.fixtures.push(laser("laser_1", 20));

        assert!(matches!(
            validate_startup(&settings, false, &FixtureLibrary::new()),
            Err(FatalError::Config(_))
        ));
    }

    #[test]
    fn test_startup_requires_default_scene_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.fixtures.push(laser("laser_1", 1));
        settings.scene.scenes_dir = temp_dir.path().to_path_buf();
        settings.scene.default_scene = "drop_intense".to_string();

        assert!(matches!(
            validate_startup(&settings, false, &FixtureLibrary::new()),
            Err(FatalError::Scene { .. })
        ));

        fs::write(temp_dir.path().join("drop_intense.yaml"), "name: drop_intense\n").unwrap();
        let fixtures = validate_startup(&settings, false, &FixtureLibrary::new()).unwrap();
        assert_eq!(fixtures.len(), 1);
    }
}
