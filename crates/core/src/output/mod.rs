pub mod dmx_output;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;

pub use dmx_output::{DmxOutput, OutputStats};
pub use transport::{open_transport, ArtNetTransport, DmxTransport, MockTransport, SerialTransport};

use crate::error::{FatalError, Result};
use crate::pipeline::{stage_names, PipelineStage};
use crate::safety::OutputMonitor;
use crate::state::FrameState;

/// Final pipeline stage: commits each frame to a shared [`DmxOutput`] and
/// owns its transmit thread for the life of the pipeline.
pub struct DmxOutputStage {
    output: Arc<DmxOutput>,
    monitor: Option<OutputMonitor>,
}

impl DmxOutputStage {
    pub fn new(output: Arc<DmxOutput>) -> Self {
        Self {
            output,
            monitor: None,
        }
    }

    /// Also black the output out if it stops transmitting for `max_silence_s`.
    pub fn with_monitor(mut self, max_silence_s: f64, check_interval_s: f64) -> Self {
        self.monitor = Some(OutputMonitor::new(
            self.output.clone(),
            max_silence_s,
            check_interval_s,
        ));
        self
    }

    pub fn output(&self) -> &Arc<DmxOutput> {
        &self.output
    }
}

impl PipelineStage for DmxOutputStage {
    fn name(&self) -> &str {
        stage_names::DMX_OUTPUT
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        self.output.apply(state);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.output.start()?;
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.start().map_err(|e| FatalError::Connection {
                interface: "output monitor".to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.stop();
        }
        self.output.stop();
    }

    fn safety_critical(&self) -> bool {
        true
    }

    fn status(&self) -> HashMap<String, String> {
        let stats = self.output.stats();
        let mut status = HashMap::new();
        status.insert("running".to_string(), stats.running.to_string());
        status.insert("frames_sent".to_string(), stats.frames_sent.to_string());
        status.insert("errors".to_string(), stats.errors.to_string());
        status.insert(
            "blackout_requested".to_string(),
            stats.blackout_requested.to_string(),
        );
        status
    }
}
