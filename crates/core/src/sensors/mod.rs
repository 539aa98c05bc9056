//! Live sensor inputs. Capture runs on device threads and is handed to the
//! frame thread through a [`SampleRing`] (audio) or a channel (MIDI).

pub mod audio;
pub mod cv;
pub mod midi;
pub mod ring;

pub use audio::{list_input_devices, AudioDeviceInfo, AudioSense};
pub use cv::CvSense;
pub use midi::{list_midi_ports, MidiSense};
pub use ring::SampleRing;
