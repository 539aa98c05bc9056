//! Analysis, intent and look stages that sit between sensing and the
//! interpreter, plus synthetic sensors for mock runs.

pub mod analysis;
pub mod beat;
pub mod director;
pub mod fusion;
pub mod looks;
pub mod mocks;
pub mod scene;
pub mod structure;

pub use analysis::FeatureExtractor;
pub use beat::BeatTracker;
pub use director::Director;
pub use fusion::Fusion;
pub use looks::{LaserControl, MovingHeadControl, PanelControl};
pub use mocks::{MockAudioSense, MockCvSense, MockMidiSense};
pub use scene::SceneSelector;
pub use structure::StructureDetector;
