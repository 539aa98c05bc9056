pub mod network_config;
pub mod packet;
pub mod transmitter;

pub use network_config::{ArtNetMode, NetworkConfig, DEFAULT_ARTNET_PORT};
pub use packet::{build_packet, port_address, PacketError};
pub use transmitter::{ArtNetError, ArtNetTransmitter};
