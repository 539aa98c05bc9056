//! ArtDMX (OpDmx) packet encoding.

use thiserror::Error;

use crate::universe::CHANNEL_COUNT;

pub const ARTNET_ID: &[u8; 8] = b"Art-Net\0";
pub const OP_DMX: u16 = 0x5000;
pub const PROTOCOL_VERSION: u16 = 14;
pub const HEADER_LEN: usize = 18;
pub const PACKET_LEN: usize = HEADER_LEN + CHANNEL_COUNT;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("DMX payload of {0} bytes exceeds 512 channels")]
    PayloadTooLarge(usize),
}

/// Compose the 15-bit Port-Address from its net, sub-net and universe fields.
pub fn port_address(net: u8, subnet: u8, universe: u8) -> u16 {
    ((net as u16 & 0x7F) << 8) | ((subnet as u16 & 0x0F) << 4) | (universe as u16 & 0x0F)
}

/// Build an ArtDMX packet. Payloads shorter than 512 bytes are zero padded.
pub fn build_packet(
    port_address: u16,
    payload: &[u8],
    sequence: u8,
    physical: u8,
) -> Result<Vec<u8>, PacketError> {
    if payload.len() > CHANNEL_COUNT {
        return Err(PacketError::PayloadTooLarge(payload.len()));
    }

    let mut packet = vec![0u8; PACKET_LEN];
    packet[0..8].copy_from_slice(ARTNET_ID);
    packet[8..10].copy_from_slice(&OP_DMX.to_le_bytes());
    packet[10..12].copy_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    packet[12] = sequence;
    packet[13] = physical;
    packet[14..16].copy_from_slice(&(port_address & 0x7FFF).to_le_bytes());
    packet[16..18].copy_from_slice(&(CHANNEL_COUNT as u16).to_be_bytes());
    packet[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);

    Ok(packet)
}
