use std::collections::HashMap;

use crate::{
    channel_layout, ChannelType, Fixture, FixtureConfig, FixtureType, PatchError, DMX_CHANNELS,
};

#[derive(Clone, Debug)]
pub struct FixtureProfile {
    pub id: String,
    pub fixture_type: FixtureType,
    pub manufacturer: String,
    pub model: String,
    pub channel_layout: Vec<crate::Channel>,
}

impl FixtureProfile {
    pub fn channel_count(&self) -> u16 {
        self.channel_layout.len() as u16
    }

    /// Offset of the first channel of the given type.
    pub fn offset_of(&self, channel_type: &ChannelType) -> Option<u16> {
        self.channel_layout
            .iter()
            .position(|c| &c.channel_type == channel_type)
            .map(|i| i as u16)
    }
}

impl std::fmt::Display for FixtureProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.manufacturer, self.model)
    }
}

pub struct FixtureLibrary {
    pub profiles: HashMap<String, FixtureProfile>,
}

impl Default for FixtureLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureLibrary {
    pub fn new() -> Self {
        let mut profiles = HashMap::new();

        // Built-in profiles. Custom profiles are added with `insert`.
        profiles.insert(
            "laser_generic_7ch".to_string(),
            FixtureProfile {
                id: "laser_generic_7ch".to_string(),
                fixture_type: FixtureType::Laser,
                manufacturer: "Generic".to_string(),
                model: "RGB Animation Laser 7CH".to_string(),
                channel_layout: channel_layout![
                    // 0-49 off, 50-99 sound active, 100-149 auto, 150-255 DMX
                    ("Mode", ChannelType::Mode),
                    ("Pattern", ChannelType::Pattern),
                    ("X", ChannelType::PositionX),
                    // Clamped by the interlock so beams stay above the audience plane
                    ("Y", ChannelType::PositionY),
                    ("Scan Speed", ChannelType::ScanSpeed),
                    ("Pattern Speed", ChannelType::PatternSpeed),
                    ("Zoom", ChannelType::Zoom),
                ],
            },
        );

        profiles.insert(
            "moving_head_16ch".to_string(),
            FixtureProfile {
                id: "moving_head_16ch".to_string(),
                fixture_type: FixtureType::MovingHead,
                manufacturer: "Generic".to_string(),
                model: "Spot Moving Head 16CH".to_string(),
                channel_layout: channel_layout![
                    ("Pan", ChannelType::Pan),
                    ("Pan Fine", ChannelType::PanFine),
                    ("Tilt", ChannelType::Tilt),
                    ("Tilt Fine", ChannelType::TiltFine),
                    ("Pan/Tilt Speed", ChannelType::PanTiltSpeed),
                    ("Dimmer", ChannelType::Dimmer),
                    ("Strobe", ChannelType::Strobe),
                    ("Color", ChannelType::Color),
                    ("Gobo", ChannelType::Gobo),
                    ("Gobo Rotation", ChannelType::GoboRotation),
                    ("Prism", ChannelType::Prism),
                    ("Focus", ChannelType::Focus),
                    ("Frost", ChannelType::Frost),
                    ("Red", ChannelType::Red),
                    ("Green", ChannelType::Green),
                    ("Blue", ChannelType::Blue),
                ],
            },
        );

        profiles.insert(
            "panel_rgb_6ch".to_string(),
            FixtureProfile {
                id: "panel_rgb_6ch".to_string(),
                fixture_type: FixtureType::Panel,
                manufacturer: "Generic".to_string(),
                model: "LED Panel RGB 6CH".to_string(),
                channel_layout: channel_layout![
                    ("Dimmer", ChannelType::Dimmer),
                    ("Red", ChannelType::Red),
                    ("Green", ChannelType::Green),
                    ("Blue", ChannelType::Blue),
                    ("Strobe", ChannelType::Strobe),
                    ("Mode", ChannelType::Mode),
                ],
            },
        );

        FixtureLibrary { profiles }
    }

    pub fn get(&self, profile_id: &str) -> Option<&FixtureProfile> {
        self.profiles.get(profile_id)
    }

    pub fn insert(&mut self, profile: FixtureProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    /// Resolve a configured fixture against its profile and check it fits the universe.
    pub fn patch(&self, config: &FixtureConfig) -> Result<Fixture, PatchError> {
        let profile = self
            .get(&config.profile)
            .ok_or_else(|| PatchError::UnknownProfile {
                fixture: config.id.clone(),
                profile: config.profile.clone(),
            })?;

        if profile.fixture_type != config.fixture_type {
            return Err(PatchError::TypeMismatch {
                fixture: config.id.clone(),
                expected: profile.fixture_type,
                found: config.fixture_type,
            });
        }

        let end = config.start_address as u32 + profile.channel_count() as u32 - 1;
        if config.start_address == 0 || end > DMX_CHANNELS as u32 {
            return Err(PatchError::OutOfRange {
                fixture: config.id.clone(),
                start: config.start_address,
                end,
            });
        }

        Ok(Fixture {
            config: config.clone(),
            profile: profile.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_profiles_match_channel_maps() {
        let library = FixtureLibrary::new();

        let laser = library.get("laser_generic_7ch").unwrap();
        assert_eq!(laser.channel_count(), 7);
        assert_eq!(laser.offset_of(&ChannelType::Mode), Some(0));
        assert_eq!(laser.offset_of(&ChannelType::PositionY), Some(3));
        assert_eq!(laser.offset_of(&ChannelType::ScanSpeed), Some(4));

        let head = library.get("moving_head_16ch").unwrap();
        assert_eq!(head.channel_count(), 16);
        assert_eq!(head.offset_of(&ChannelType::Strobe), Some(6));

        let panel = library.get("panel_rgb_6ch").unwrap();
        assert_eq!(panel.channel_count(), 6);
        assert_eq!(panel.offset_of(&ChannelType::Strobe), Some(4));
    }

    #[test]
    fn patch_resolves_absolute_addresses() {
        let library = FixtureLibrary::new();
        let config = FixtureConfig::new("mh_1", FixtureType::MovingHead, "moving_head_16ch", 10);
        let fixture = library.patch(&config).unwrap();
        assert_eq!(fixture.end_address(), 25);
        assert_eq!(fixture.channel_address(&ChannelType::Strobe), Some(16));
    }

    #[test]
    fn patch_rejects_unknown_profile() {
        let library = FixtureLibrary::new();
        let config = FixtureConfig::new("x", FixtureType::Panel, "missing_profile", 1);
        assert!(matches!(
            library.patch(&config),
            Err(PatchError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn patch_rejects_fixture_past_universe_end() {
        let library = FixtureLibrary::new();
        let config = FixtureConfig::new("mh_1", FixtureType::MovingHead, "moving_head_16ch", 500);
        let err = library.patch(&config).unwrap_err();
        assert_eq!(
            err,
            PatchError::OutOfRange {
                fixture: "mh_1".to_string(),
                start: 500,
                end: 515
            }
        );
        assert!(err.to_string().contains("exceeds DMX universe size"));
    }

    #[test]
    fn patch_accepts_fixture_ending_on_last_channel() {
        let library = FixtureLibrary::new();
        let config = FixtureConfig::new("panel_1", FixtureType::Panel, "panel_rgb_6ch", 507);
        assert!(library.patch(&config).is_ok());
    }

    #[test]
    fn patch_rejects_type_mismatch() {
        let library = FixtureLibrary::new();
        let config = FixtureConfig::new("p", FixtureType::Laser, "panel_rgb_6ch", 1);
        assert!(matches!(
            library.patch(&config),
            Err(PatchError::TypeMismatch { .. })
        ));
    }
}
