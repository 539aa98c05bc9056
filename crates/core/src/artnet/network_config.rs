use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use super::packet::port_address;

pub const DEFAULT_ARTNET_PORT: u16 = 6454;

#[derive(Clone, Debug, PartialEq)]
pub enum ArtNetMode {
    Broadcast(SocketAddr),
    Unicast(SocketAddr),
}

/// Where and how ArtDMX packets are sent, plus the Port-Address fields.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub mode: ArtNetMode,
    pub net: u8,
    pub subnet: u8,
    pub universe: u8,
}

impl NetworkConfig {
    pub fn new(host: IpAddr, port: u16, broadcast: bool) -> Self {
        let target = SocketAddr::new(host, port);
        let mode = if broadcast || host == IpAddr::V4(Ipv4Addr::BROADCAST) {
            ArtNetMode::Broadcast(target)
        } else {
            ArtNetMode::Unicast(target)
        };

        NetworkConfig {
            mode,
            net: 0,
            subnet: 0,
            universe: 0,
        }
    }

    pub fn with_address(mut self, net: u8, subnet: u8, universe: u8) -> Self {
        self.net = net;
        self.subnet = subnet;
        self.universe = universe;
        self
    }

    pub fn target(&self) -> SocketAddr {
        match self.mode {
            ArtNetMode::Broadcast(addr) | ArtNetMode::Unicast(addr) => addr,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.mode, ArtNetMode::Broadcast(_))
    }

    pub fn port_address(&self) -> u16 {
        port_address(self.net, self.subnet, self.universe)
    }

    pub fn get_mode_string(&self) -> &str {
        match self.mode {
            ArtNetMode::Broadcast(_) => "broadcast",
            ArtNetMode::Unicast(_) => "unicast",
        }
    }

    pub fn get_destination(&self) -> String {
        format!(
            "{} ({}) port-address 0x{:04x}",
            self.target(),
            self.get_mode_string(),
            self.port_address()
        )
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::BROADCAST), DEFAULT_ARTNET_PORT, true)
    }
}
