//! The frame pipeline: stage trait, orchestrator and the standard stage wiring.

pub mod builder;
pub mod orchestrator;
pub mod traits;

pub use builder::{build_minimal_pipeline, build_pipeline, Pipeline};
pub use orchestrator::{LoopStats, Orchestrator, StopHandle};
pub use traits::{stage_names, PipelineStage};
