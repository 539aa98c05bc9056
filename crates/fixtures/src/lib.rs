use serde::{Deserialize, Serialize};

pub use fixture_library::{FixtureLibrary, FixtureProfile};

mod fixture_library;

/// Highest addressable DMX channel in a universe.
pub const DMX_CHANNELS: u16 = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureType {
    Laser,
    MovingHead,
    Panel,
}

impl FixtureType {
    /// Offset of the strobe channel relative to the fixture's start address, if it has one.
    pub fn strobe_offset(&self) -> Option<u16> {
        match self {
            FixtureType::MovingHead => Some(6),
            FixtureType::Panel => Some(4),
            FixtureType::Laser => None,
        }
    }
}

impl std::fmt::Display for FixtureType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FixtureType::Laser => write!(f, "laser"),
            FixtureType::MovingHead => write!(f, "moving_head"),
            FixtureType::Panel => write!(f, "panel"),
        }
    }
}

/// A fixture as patched in the configuration file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixtureConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub fixture_type: FixtureType,
    pub profile: String,
    pub start_address: u16,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl FixtureConfig {
    pub fn new(id: &str, fixture_type: FixtureType, profile: &str, start_address: u16) -> Self {
        FixtureConfig {
            id: id.to_string(),
            name: id.to_string(),
            fixture_type,
            profile: profile.to_string(),
            start_address,
            enabled: true,
        }
    }

    /// Absolute DMX address of a channel offset.
    pub fn address(&self, offset: u16) -> u16 {
        self.start_address.saturating_add(offset)
    }

    pub fn strobe_address(&self) -> Option<u16> {
        self.fixture_type.strobe_offset().map(|o| self.address(o))
    }
}

/// A fixture resolved against its profile and checked to fit in the universe.
#[derive(Clone, Debug)]
pub struct Fixture {
    pub config: FixtureConfig,
    pub profile: FixtureProfile,
}

impl Fixture {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn start_address(&self) -> u16 {
        self.config.start_address
    }

    /// Last absolute channel occupied by the fixture.
    pub fn end_address(&self) -> u16 {
        self.config
            .start_address
            .saturating_add(self.profile.channel_count())
            .saturating_sub(1)
    }

    /// Absolute address of the first channel with the given type.
    pub fn channel_address(&self, channel_type: &ChannelType) -> Option<u16> {
        self.profile
            .offset_of(channel_type)
            .map(|o| self.config.address(o))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PatchError {
    UnknownProfile { fixture: String, profile: String },
    TypeMismatch { fixture: String, expected: FixtureType, found: FixtureType },
    OutOfRange { fixture: String, start: u16, end: u32 },
}

impl std::fmt::Display for PatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchError::UnknownProfile { fixture, profile } => {
                write!(f, "Fixture '{}' uses unknown profile '{}'", fixture, profile)
            }
            PatchError::TypeMismatch {
                fixture,
                expected,
                found,
            } => write!(
                f,
                "Fixture '{}' is declared as {} but its profile is {}",
                fixture, found, expected
            ),
            PatchError::OutOfRange { fixture, start, end } => write!(
                f,
                "Fixture '{}' spans channels {}-{} which exceeds DMX universe size ({})",
                fixture, start, end, DMX_CHANNELS
            ),
        }
    }
}

impl std::error::Error for PatchError {}

#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    pub name: String,
    pub channel_type: ChannelType,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChannelType {
    Dimmer,
    Red,
    Green,
    Blue,
    Strobe,
    Pan,
    PanFine,
    Tilt,
    TiltFine,
    PanTiltSpeed,
    Color,
    Gobo,
    GoboRotation,
    Prism,
    Focus,
    Frost,
    Mode,
    Pattern,
    PositionX,
    PositionY,
    ScanSpeed,
    PatternSpeed,
    Zoom,
    Other(String),
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ChannelType::Dimmer => write!(f, "Dimmer"),
            ChannelType::Red => write!(f, "Red"),
            ChannelType::Green => write!(f, "Green"),
            ChannelType::Blue => write!(f, "Blue"),
            ChannelType::Strobe => write!(f, "Strobe"),
            ChannelType::Pan => write!(f, "Pan"),
            ChannelType::PanFine => write!(f, "PanFine"),
            ChannelType::Tilt => write!(f, "Tilt"),
            ChannelType::TiltFine => write!(f, "TiltFine"),
            ChannelType::PanTiltSpeed => write!(f, "PanTiltSpeed"),
            ChannelType::Color => write!(f, "Color"),
            ChannelType::Gobo => write!(f, "Gobo"),
            ChannelType::GoboRotation => write!(f, "GoboRotation"),
            ChannelType::Prism => write!(f, "Prism"),
            ChannelType::Focus => write!(f, "Focus"),
            ChannelType::Frost => write!(f, "Frost"),
            ChannelType::Mode => write!(f, "Mode"),
            ChannelType::Pattern => write!(f, "Pattern"),
            ChannelType::PositionX => write!(f, "PositionX"),
            ChannelType::PositionY => write!(f, "PositionY"),
            ChannelType::ScanSpeed => write!(f, "ScanSpeed"),
            ChannelType::PatternSpeed => write!(f, "PatternSpeed"),
            ChannelType::Zoom => write!(f, "Zoom"),
            ChannelType::Other(s) => write!(f, "Other({})", s),
        }
    }
}

#[macro_export]
macro_rules! channel_layout {
    ($(($name:expr, $type:expr)),* $(,)?) => {
        vec![
            $(
                $crate::Channel {
                    name: $name.to_string(),
                    channel_type: $type,
                },
            )*
        ]
    };
}
