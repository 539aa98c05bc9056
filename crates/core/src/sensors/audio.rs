//! Live audio capture through cpal.
//!
//! The cpal stream lives on its own thread, since streams cannot move
//! between threads on every host. The capture callback only downmixes into
//! the shared [`SampleRing`].

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::config::AudioConfig;
use crate::error::{FatalError, Result};
use crate::pipeline::{stage_names, PipelineStage};
use crate::sensors::SampleRing;
use crate::state::FrameState;
use crate::timing::join_with_timeout;

/// Samples handed to analysis each frame.
pub const ANALYSIS_WINDOW: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// Enumerate capture devices on the default host.
pub fn list_input_devices() -> anyhow::Result<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| anyhow::anyhow!("Failed to enumerate audio devices: {}", e))?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .map(|name| AudioDeviceInfo {
            is_default: default_name.as_ref() == Some(&name),
            name,
        })
        .collect())
}

pub struct AudioSense {
    config: AudioConfig,
    ring: Arc<SampleRing>,
    sample_rate: u32,
    last_written: u64,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioSense {
    pub fn new(config: AudioConfig) -> Self {
        let capacity = (config.buffer_seconds.max(0.1) * config.sample_rate as f64) as usize;
        Self {
            sample_rate: config.sample_rate,
            config,
            ring: Arc::new(SampleRing::new(capacity.max(ANALYSIS_WINDOW))),
            last_written: 0,
            stop_tx: None,
            thread: None,
        }
    }

    pub fn ring(&self) -> Arc<SampleRing> {
        Arc::clone(&self.ring)
    }

    fn open_stream(
        config: &AudioConfig,
        ring: Arc<SampleRing>,
    ) -> std::result::Result<(cpal::Stream, u32), String> {
        let host = cpal::default_host();
        let device = match &config.device {
            Some(wanted) => host
                .input_devices()
                .map_err(|e| e.to_string())?
                .find(|d| {
                    d.name()
                        .map(|n| n.to_lowercase().contains(&wanted.to_lowercase()))
                        .unwrap_or(false)
                })
                .ok_or_else(|| format!("audio device '{}' not found", wanted))?,
            None => host
                .default_input_device()
                .ok_or_else(|| "no default audio input device".to_string())?,
        };

        let supported = device.default_input_config().map_err(|e| e.to_string())?;
        let sample_format = supported.sample_format();
        let mut stream_config: cpal::StreamConfig = supported.into();
        stream_config.sample_rate = cpal::SampleRate(config.sample_rate);
        stream_config.channels = config.channels.max(1);
        stream_config.buffer_size = cpal::BufferSize::Fixed(config.block_size);
        let channels = stream_config.channels as usize;

        let err_fn = |err| log::error!("Audio input error: {}", err);
        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _| ring.push_interleaved(data, channels),
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    let converted: Vec<f32> =
                        data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                    ring.push_interleaved(&converted, channels);
                },
                err_fn,
                None,
            ),
            other => return Err(format!("unsupported sample format {:?}", other)),
        }
        .map_err(|e| e.to_string())?;

        stream.play().map_err(|e| e.to_string())?;
        Ok((stream, config.sample_rate))
    }
}

impl PipelineStage for AudioSense {
    fn name(&self) -> &str {
        stage_names::AUDIO_SENSE
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        let written = self.ring.samples_written();
        state.sensor_status.audio = written != self.last_written;
        self.last_written = written;

        state.audio_buffer = self.ring.latest(ANALYSIS_WINDOW);
        state.sample_rate = self.sample_rate;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let config = self.config.clone();
        let ring = Arc::clone(&self.ring);

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || match Self::open_stream(&config, ring) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    // Hold the stream until asked to stop or the stage is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| FatalError::Connection {
                interface: "audio".to_string(),
                reason: e.to_string(),
            })?;

        let opened = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|_| Err("audio device did not respond".to_string()));

        match opened {
            Ok(rate) => {
                self.sample_rate = rate;
                self.stop_tx = Some(stop_tx);
                self.thread = Some(handle);
                log::info!(
                    "Audio capture started ({} Hz, block {})",
                    rate,
                    self.config.block_size
                );
                Ok(())
            }
            Err(reason) => {
                drop(stop_tx);
                join_with_timeout(handle, Duration::from_secs(1), "audio-capture");
                Err(FatalError::Connection {
                    interface: format!(
                        "audio {}",
                        self.config.device.as_deref().unwrap_or("default")
                    ),
                    reason,
                }
                .into())
            }
        }
    }

    fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.thread.take() {
            join_with_timeout(handle, Duration::from_secs(1), "audio-capture");
            log::info!(
                "Audio capture stopped ({} samples captured)",
                self.ring.samples_written()
            );
        }
    }
}

impl Drop for AudioSense {
    fn drop(&mut self) {
        self.stop();
    }
}
