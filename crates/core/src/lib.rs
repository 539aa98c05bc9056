pub use artnet::{ArtNetMode, ArtNetTransmitter, NetworkConfig};
pub use config::{validate_startup, ConfigError, ConfigManager, ConfigSchema, Settings};
pub use error::{Error, FatalError, RecoverableError, Result};
pub use interpreter::CommandInterpreter;
pub use output::{DmxOutput, DmxOutputStage, DmxTransport, MockTransport, OutputStats};
pub use pipeline::{
    build_minimal_pipeline, build_pipeline, stage_names, LoopStats, Orchestrator, Pipeline,
    PipelineStage, StopHandle,
};
pub use safety::{EmergencyStopHandle, HeartbeatWatchdog, OutputMonitor, SafetyInterlock};
pub use sensors::{list_input_devices, list_midi_ports, AudioDeviceInfo};
pub use state::{FixtureCommand, FrameState};
pub use universe::Universe;

pub mod artnet;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod output;
pub mod pipeline;
pub mod safety;
pub mod sensors;
pub mod stages;
pub mod state;
pub mod timing;
pub mod universe;
