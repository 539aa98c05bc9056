use crate::pipeline::{stage_names, PipelineStage};
use crate::state::FrameState;

/// Placeholder for the screen-capture sensor in live runs. Leaves the vision
/// fields at their neutral defaults and reports the sensor as absent.
#[derive(Default)]
pub struct CvSense;

impl CvSense {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineStage for CvSense {
    fn name(&self) -> &str {
        stage_names::CV_SENSE
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        state.sensor_status.cv = false;
        Ok(())
    }
}
