//! The fixed 68-byte opening exchange on every peer connection.
//!
//! The handshake proves both ends speak the protocol and are talking about
//! the same torrent (via the infohash). The remote peer id is captured but
//! nothing is required of it.
use super::{PeerError, PeerResult};

pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// Wire layout: length byte (19), protocol string, 8 reserved bytes,
/// infohash, peer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            protocol: *PROTOCOL,
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serializes the handshake into its 68-byte wire form.
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = self.protocol.len() as u8;
        buf[1..20].copy_from_slice(&self.protocol);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parses a received 68-byte handshake, checking the protocol length
    /// byte and protocol string.
    pub fn parse(buf: &[u8; 68]) -> PeerResult<Self> {
        if buf[0] != PROTOCOL.len() as u8 {
            return Err(PeerError::HandshakeReject(format!(
                "protocol length byte is {}, expected {}",
                buf[0],
                PROTOCOL.len()
            )));
        }

        let mut protocol = [0u8; 19];
        protocol.copy_from_slice(&buf[1..20]);
        if &protocol != PROTOCOL {
            return Err(PeerError::HandshakeReject(format!(
                "unknown protocol string {:?}",
                String::from_utf8_lossy(&protocol)
            )));
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self {
            protocol,
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Validates that the peer echoed our infohash back.
    pub fn validate(&self, expected_info_hash: &[u8; 20]) -> PeerResult<()> {
        if &self.info_hash != expected_info_hash {
            return Err(PeerError::HandshakeReject(format!(
                "info hash mismatch: got {}, expected {}",
                hex::encode(self.info_hash),
                hex::encode(expected_info_hash)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_fixed_layout() {
        let handshake = Handshake::new([0xAB; 20], *b"-TL0001-abcdefghijkl");
        let bytes = handshake.serialize();
        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], b"BitTorrent protocol");
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &[0xAB; 20]);
        assert_eq!(&bytes[48..68], b"-TL0001-abcdefghijkl");
    }

    #[test]
    fn parse_round_trips() {
        let handshake = Handshake::new([7; 20], [9; 20]);
        let parsed = Handshake::parse(&handshake.serialize()).unwrap();
        assert_eq!(parsed, handshake);
    }

    #[test]
    fn rejects_bad_length_byte() {
        let mut bytes = Handshake::new([7; 20], [9; 20]).serialize();
        bytes[0] = 18;
        assert!(matches!(
            Handshake::parse(&bytes),
            Err(PeerError::HandshakeReject(_))
        ));
    }

    #[test]
    fn rejects_bad_protocol_string() {
        let mut bytes = Handshake::new([7; 20], [9; 20]).serialize();
        bytes[1] = b'b';
        assert!(matches!(
            Handshake::parse(&bytes),
            Err(PeerError::HandshakeReject(_))
        ));
    }

    #[test]
    fn validate_checks_info_hash_echo() {
        let handshake = Handshake::new([7; 20], [9; 20]);
        assert!(handshake.validate(&[7; 20]).is_ok());
        assert!(matches!(
            handshake.validate(&[8; 20]),
            Err(PeerError::HandshakeReject(_))
        ));
    }
}
