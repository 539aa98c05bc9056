//! DJ controller input through midir.
//!
//! The midir callback runs on the backend's thread and only forwards raw
//! bytes over a bounded channel. Decoding into controller state happens on
//! the frame thread when the stage drains the channel.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use midir::{MidiInput, MidiInputConnection};

use crate::config::MidiConfig;
use crate::error::Result;
use crate::pipeline::{stage_names, PipelineStage};
use crate::state::{FrameState, MidiState};

const QUEUE_CAPACITY: usize = 1000;

const CROSSFADER_CC: u8 = 0x0F;
const FADER_CCS: [u8; 4] = [0x13, 0x14, 0x15, 0x16];
const FILTER_CCS: [u8; 4] = [0x17, 0x18, 0x19, 0x1A];
/// Performance pads of both decks.
const PAD_NOTES: std::ops::Range<u8> = 0x30..0x40;

/// Names of the MIDI input ports currently visible.
pub fn list_midi_ports() -> anyhow::Result<Vec<String>> {
    let midi_in = MidiInput::new("prism-list")?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect())
}

/// Pick the configured port, or the first one matching an auto-detect pattern.
pub fn select_port(available: &[String], config: &MidiConfig) -> Option<usize> {
    if let Some(wanted) = &config.port_name {
        if let Some(index) = available.iter().position(|name| name == wanted) {
            return Some(index);
        }
    }
    config.auto_detect_patterns.iter().find_map(|pattern| {
        let pattern = pattern.to_lowercase();
        available
            .iter()
            .position(|name| name.to_lowercase().contains(&pattern))
    })
}

/// Running controller state built from raw MIDI messages.
#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    state: MidiState,
}

impl ControllerState {
    pub fn handle(&mut self, message: &[u8]) {
        let [status, data1, data2, ..] = *message else {
            return;
        };
        match status & 0xF0 {
            0xB0 => self.handle_cc(data1, data2),
            0x90 if data2 > 0 => {
                if PAD_NOTES.contains(&data1) {
                    log::debug!("Pad {:#04x} hit (velocity {})", data1, data2);
                    self.state.pad_triggers.push(data1);
                }
            }
            _ => {}
        }
    }

    fn handle_cc(&mut self, cc: u8, value: u8) {
        let normalized = value.min(127) as f64 / 127.0;
        if cc == CROSSFADER_CC {
            self.state.crossfader_position = normalized * 2.0 - 1.0;
        } else if let Some(ch) = FADER_CCS.iter().position(|&c| c == cc) {
            self.state.channel_faders[ch] = normalized;
        } else if let Some(ch) = FILTER_CCS.iter().position(|&c| c == cc) {
            self.state.filter_positions[ch] = normalized;
        }
    }

    /// Snapshot for this frame. Pad hits are reported once.
    pub fn take_frame(&mut self, now: f64) -> MidiState {
        let mut snapshot = self.state.clone();
        snapshot.last_update = now;
        self.state.pad_triggers.clear();
        snapshot
    }
}

pub struct MidiSense {
    config: MidiConfig,
    controller: ControllerState,
    tx: SyncSender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    connection: Option<MidiInputConnection<()>>,
    port: Option<String>,
}

impl MidiSense {
    pub fn new(config: MidiConfig) -> Self {
        let (tx, rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        Self {
            config,
            controller: ControllerState::default(),
            tx,
            rx,
            connection: None,
            port: None,
        }
    }

    /// Sender feeding the same queue the midir callback uses.
    pub fn sender(&self) -> SyncSender<Vec<u8>> {
        self.tx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn connect(&mut self) -> anyhow::Result<Option<String>> {
        let midi_in = MidiInput::new("prism")?;
        let ports = midi_in.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|port| midi_in.port_name(port).unwrap_or_default())
            .collect();
        log::debug!("Available MIDI ports: {:?}", names);

        let Some(index) = select_port(&names, &self.config) else {
            return Ok(None);
        };

        let tx = self.tx.clone();
        let connection = midi_in
            .connect(
                &ports[index],
                "prism-midi-input",
                move |_timestamp, message, _| match tx.try_send(message.to_vec()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => log::warn!("MIDI queue full, dropping message"),
                    Err(TrySendError::Disconnected(_)) => {}
                },
                (),
            )
            .map_err(|e| anyhow::anyhow!("Failed to connect MIDI input: {}", e))?;

        self.connection = Some(connection);
        Ok(Some(names[index].clone()))
    }
}

impl PipelineStage for MidiSense {
    fn name(&self) -> &str {
        stage_names::MIDI_SENSE
    }

    fn process(&mut self, state: &mut FrameState) -> anyhow::Result<()> {
        while let Ok(message) = self.rx.try_recv() {
            self.controller.handle(&message);
        }
        state.midi = self.controller.take_frame(state.timestamp);
        state.sensor_status.midi = self.is_connected();
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        // A missing controller leaves the show running on audio alone
        match self.connect() {
            Ok(Some(port)) => {
                log::info!("MIDI input started on '{}'", port);
                self.port = Some(port);
            }
            Ok(None) => log::warn!("No matching MIDI input port found, MIDI disabled"),
            Err(e) => log::error!("Failed to open MIDI input: {}", e),
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            log::info!("MIDI input stopped");
        }
    }

    fn status(&self) -> std::collections::HashMap<String, String> {
        let mut status = std::collections::HashMap::new();
        status.insert("connected".to_string(), self.is_connected().to_string());
        if let Some(port) = &self.port {
            status.insert("port".to_string(), port.clone());
        }
        status
    }
}

impl Drop for MidiSense {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cc_map() {
        let mut controller = ControllerState::default();
        controller.handle(&[0xB0, CROSSFADER_CC, 127]);
        controller.handle(&[0xB0, 0x14, 0]);
        controller.handle(&[0xB3, 0x1A, 127]);

        let frame = controller.take_frame(1.0);
        assert_eq!(frame.crossfader_position, 1.0);
        assert_eq!(frame.channel_faders, [1.0, 0.0, 1.0, 1.0]);
        assert_eq!(frame.filter_positions[3], 1.0);
        assert_eq!(frame.last_update, 1.0);
    }

    #[test]
    fn test_pads_reported_once() {
        let mut controller = ControllerState::default();
        controller.handle(&[0x90, 0x30, 100]);
        controller.handle(&[0x90, 0x31, 0]); // note off as zero velocity
        controller.handle(&[0x90, 0x20, 100]); // not a pad
        controller.handle(&[0x91, 0x3F, 64]);

        assert_eq!(controller.take_frame(0.0).pad_triggers, vec![0x30, 0x3F]);
        assert!(controller.take_frame(0.02).pad_triggers.is_empty());
    }

    #[test]
    fn test_short_messages_ignored() {
        let mut controller = ControllerState::default();
        controller.handle(&[0xF8]);
        controller.handle(&[]);
        assert_eq!(controller.take_frame(0.0).crossfader_position, 0.0);
    }

    #[test]
    fn test_port_selection() {
        let ports = vec![
            "Midi Through Port-0".to_string(),
            "PIONEER XDJ-AZ MIDI 1".to_string(),
        ];
        let config = MidiConfig::default();
        assert_eq!(select_port(&ports, &config), Some(1));

        let explicit = MidiConfig {
            port_name: Some("Midi Through Port-0".to_string()),
            ..MidiConfig::default()
        };
        assert_eq!(select_port(&ports, &explicit), Some(0));

        let none = MidiConfig {
            port_name: None,
            auto_detect_patterns: vec!["Traktor".to_string()],
        };
        assert_eq!(select_port(&ports, &none), None);
    }

    #[test]
    fn test_stage_drains_queue() {
        let mut sense = MidiSense::new(MidiConfig::default());
        let tx = sense.sender();
        tx.send(vec![0xB0, 0x13, 0]).unwrap();
        tx.send(vec![0x90, 0x35, 90]).unwrap();

        let mut state = FrameState::initial_at(5.0);
        sense.process(&mut state).unwrap();
        assert_eq!(state.midi.channel_faders[0], 0.0);
        assert_eq!(state.midi.pad_triggers, vec![0x35]);
        assert!(!state.sensor_status.midi);
    }
}
