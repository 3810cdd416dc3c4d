//! Stratum v2 binary framing: recognized by the protocol detector but not
//! decoded beyond its frame header. Full v2 semantics (the noise
//! handshake, `SetupConnection`/`NewMiningJob`/... message bodies) are out
//! of scope for this front-end — `Router` has no handler registered for
//! `ProtocolVersion::V2`, so a connection classified as v2 is closed right
//! after detection.

/// The 6-byte prefix common to every SV2 frame: a 2-byte little-endian
/// `extension_type`, a 1-byte `msg_type`, and a 3-byte little-endian
/// `msg_length`. This is exactly the shape `protocol::detector` peeks at
/// to classify a connection as v2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub extension_type: u16,
    pub msg_type: u8,
    pub msg_length: u32,
}

impl FrameHeader {
    pub const ENCODED_LEN: usize = 6;

    /// Parses the header prefix. Returns `None` if fewer than
    /// `ENCODED_LEN` bytes are available.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        let extension_type = u16::from_le_bytes([bytes[0], bytes[1]]);
        let msg_type = bytes[2];
        let msg_length = u32::from(bytes[3]) | (u32::from(bytes[4]) << 8) | (u32::from(bytes[5]) << 16);
        Some(Self {
            extension_type,
            msg_type,
            msg_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_setup_connection_prefix() {
        let header = FrameHeader::parse(&[0x00, 0x00, 0x00, 0x05, 0x00, 0x00]).unwrap();
        assert_eq!(header.extension_type, 0);
        assert_eq!(header.msg_type, 0x00);
        assert_eq!(header.msg_length, 5);
    }

    #[test]
    fn too_short_returns_none() {
        assert!(FrameHeader::parse(&[0x00, 0x00]).is_none());
    }
}
