//! Classifies a fresh connection's wire protocol from its opening bytes.

use std::time::Duration;

use tokio::io::AsyncRead;

use crate::error::DetectionError;
use crate::protocol::peek::PeekableConnection;
use crate::stratum::v2::FrameHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    Unknown,
    V1,
    V2,
}

const DETECTION_PEEK_LEN: usize = FrameHeader::ENCODED_LEN;

/// Byte 0 `{` is v1 JSON. Otherwise a v2 frame header shape: `ext_type`
/// (2 bytes LE, <= 0x07) followed by `msg_type` (1 byte, <= 0x60) — the
/// canonical `SetupConnection` prefix is `{0x00,0x00,0x00}`. Anything else
/// is unclassifiable.
pub async fn detect<T: AsyncRead + Unpin>(
    conn: &mut PeekableConnection<T>,
    timeout: Duration,
) -> Result<ProtocolVersion, DetectionError> {
    let peeked = match tokio::time::timeout(timeout, conn.peek(DETECTION_PEEK_LEN)).await {
        Ok(Ok(bytes)) => bytes.to_vec(),
        Ok(Err(e)) => return Err(DetectionError::Io(e)),
        Err(_) => return Err(DetectionError::Timeout),
    };

    if peeked.is_empty() {
        return Err(DetectionError::ConnectionClosed);
    }

    if peeked[0] == b'{' {
        return Ok(ProtocolVersion::V1);
    }

    if let Some(header) = FrameHeader::parse(&peeked) {
        if header.extension_type <= 0x07 && header.msg_type <= 0x60 {
            return Ok(ProtocolVersion::V2);
        }
    }

    Err(DetectionError::Unclassifiable)
}
