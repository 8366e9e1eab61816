// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wake-on-LAN magic packet construction and broadcast.

use thiserror::Error;
use tokio::net::UdpSocket;

/// Default Wake-on-LAN UDP port (discard protocol, conventionally used by
/// magic-packet senders).
pub const DEFAULT_WOL_PORT: u16 = 9;
const MAGIC_PACKET_LEN: usize = 6 + 16 * 6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WolError {
    #[error("invalid MAC address")]
    InvalidMac,
    #[error("failed to send magic packet: {0}")]
    Send(String),
}

fn parse_mac(mac: &str) -> Result<[u8; 6], WolError> {
    let parts: Vec<&str> = mac.split(|c| c == ':' || c == '-').collect();
    if parts.len() != 6 {
        return Err(WolError::InvalidMac);
    }
    let mut bytes = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        bytes[i] = u8::from_str_radix(part, 16).map_err(|_| WolError::InvalidMac)?;
    }
    Ok(bytes)
}

/// Builds the 102-byte magic packet: six `0xFF` bytes followed by the
/// target MAC address repeated sixteen times.
pub fn build_magic_packet(mac: &str) -> Result<[u8; MAGIC_PACKET_LEN], WolError> {
    let mac_bytes = parse_mac(mac)?;
    let mut packet = [0u8; MAGIC_PACKET_LEN];
    packet[..6].fill(0xFF);
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac_bytes);
    }
    Ok(packet)
}

/// Broadcasts the magic packet for `mac` to `broadcast_addr:port`
/// (conventionally `255.255.255.255:9`).
pub async fn send_magic_packet(
    mac: &str,
    broadcast_addr: &str,
    port: u16,
) -> Result<(), WolError> {
    let packet = build_magic_packet(mac)?;
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| WolError::Send(e.to_string()))?;
    socket
        .set_broadcast(true)
        .map_err(|e| WolError::Send(e.to_string()))?;
    socket
        .send_to(&packet, (broadcast_addr, port))
        .await
        .map_err(|e| WolError::Send(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_102_byte_packet_with_repeated_mac() {
        let packet = build_magic_packet("aa:bb:cc:dd:ee:ff").expect("valid mac");
        assert_eq!(packet.len(), 102);
        assert_eq!(&packet[..6], &[0xFF; 6]);
        for chunk in packet[6..].chunks_exact(6) {
            assert_eq!(chunk, &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        }
    }

    #[test]
    fn accepts_hyphen_separated_mac() {
        assert!(build_magic_packet("00-11-22-33-44-55").is_ok());
    }

    #[test]
    fn rejects_malformed_mac() {
        assert_eq!(build_magic_packet("not-a-mac"), Err(WolError::InvalidMac));
        assert_eq!(build_magic_packet("aa:bb:cc"), Err(WolError::InvalidMac));
    }
}
