use std::net::UdpSocket;

use thiserror::Error;

use super::network_config::NetworkConfig;
use super::packet::{build_packet, PacketError};

#[derive(Debug, Error)]
pub enum ArtNetError {
    #[error("Art-Net transmitter is not open")]
    NotOpen,
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("Art-Net socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sends ArtDMX packets over UDP. One packet per `send_dmx` call.
pub struct ArtNetTransmitter {
    config: NetworkConfig,
    socket: Option<UdpSocket>,
}

impl ArtNetTransmitter {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            socket: None,
        }
    }

    pub fn open(&mut self) -> Result<(), ArtNetError> {
        if self.socket.is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        if self.config.is_broadcast() {
            socket.set_broadcast(true)?;
        }

        log::info!(
            "Art-Net transmitter opened -> {}",
            self.config.get_destination()
        );
        self.socket = Some(socket);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn send_dmx(&self, port_address: u16, payload: &[u8], sequence: u8) -> Result<(), ArtNetError> {
        let socket = self.socket.as_ref().ok_or(ArtNetError::NotOpen)?;
        let packet = build_packet(port_address, payload, sequence, 0)?;
        socket.send_to(&packet, self.config.target())?;
        Ok(())
    }

    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            log::debug!("Art-Net transmitter closed");
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }
}
