//! Replication wire protocol
//!
//! All messages are serialized with bincode and validated with CRC32.
//!
//! Format: [message_type:1][length:4][payload:N][crc32:4]

use crate::Result;
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame payload; a length prefix beyond this is
/// rejected before any allocation
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Replication message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMessageType {
    /// Apply one log record at a given index
    ApplyRecord = 0x01,
    /// Acknowledgment carrying the responder's authoritative last index
    ApplyAck = 0x02,
    /// Error message
    Error = 0xFF,
}

impl TryFrom<u8> for RecordMessageType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::ApplyRecord),
            0x02 => Ok(Self::ApplyAck),
            0xFF => Ok(Self::Error),
            _ => Err(crate::Error::network(format!(
                "Unknown message type: {}",
                value
            ))),
        }
    }
}

/// Replication messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecordMessage {
    /// Request to apply the record at `index`
    ApplyRecord { index: u64, command: String },

    /// Response to ApplyRecord.
    ///
    /// `applied == false` signals the record could not be taken at that
    /// index; `last_index` is always the responder's authoritative last
    /// applied index, so the sender can rewind to it.
    ApplyAck { applied: bool, last_index: u64 },

    /// Error message
    Error { code: u32, message: String },
}

impl RecordMessage {
    /// Get message type
    pub fn message_type(&self) -> RecordMessageType {
        match self {
            Self::ApplyRecord { .. } => RecordMessageType::ApplyRecord,
            Self::ApplyAck { .. } => RecordMessageType::ApplyAck,
            Self::Error { .. } => RecordMessageType::Error,
        }
    }

    /// Encode message to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| crate::Error::network(format!("Serialization failed: {}", e)))?;

        let mut buf = Vec::with_capacity(1 + 4 + payload.len() + 4);
        buf.push(self.message_type() as u8);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);

        // CRC32 of type + length + payload
        let mut hasher = Hasher::new();
        hasher.update(&buf);
        let crc = hasher.finalize();
        buf.extend_from_slice(&crc.to_le_bytes());

        Ok(buf)
    }

    /// Decode message from bytes
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 9 {
            // min: type(1) + length(4) + crc(4)
            return Err(crate::Error::network("Message too short"));
        }

        // Verify CRC
        let crc_offset = buf.len() - 4;
        let stored_crc = u32::from_le_bytes(buf[crc_offset..].try_into().unwrap());

        let mut hasher = Hasher::new();
        hasher.update(&buf[..crc_offset]);
        let computed_crc = hasher.finalize();

        if stored_crc != computed_crc {
            return Err(crate::Error::network(format!(
                "CRC mismatch: expected {:x}, got {:x}",
                stored_crc, computed_crc
            )));
        }

        // Extract payload length
        let length = u32::from_le_bytes(buf[1..5].try_into().unwrap()) as usize;
        if buf.len() < 5 + length + 4 {
            return Err(crate::Error::network("Incomplete message"));
        }

        // Deserialize payload
        let payload = &buf[5..5 + length];
        bincode::deserialize(payload)
            .map_err(|e| crate::Error::network(format!("Deserialization failed: {}", e)))
    }

    /// Write message to async stream
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let buf = self.encode()?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read message from async stream
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        // Read header: type(1) + length(4)
        let mut header = [0u8; 5];
        reader.read_exact(&mut header).await?;

        let _msg_type = header[0];
        let length = u32::from_le_bytes(header[1..5].try_into().unwrap()) as usize;
        if length > MAX_FRAME_LEN {
            return Err(crate::Error::network(format!(
                "Frame length {} exceeds the {} byte limit",
                length, MAX_FRAME_LEN
            )));
        }

        // Read payload + CRC
        let mut payload_buf = vec![0u8; length + 4];
        reader.read_exact(&mut payload_buf).await?;

        // Combine into full buffer
        let mut full_buf = Vec::with_capacity(5 + payload_buf.len());
        full_buf.extend_from_slice(&header);
        full_buf.extend_from_slice(&payload_buf);

        Self::decode(&full_buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_encode_decode() {
        let msg = RecordMessage::ApplyRecord {
            index: 7,
            command: "UPDATE zone SET body = 'x'".into(),
        };

        let encoded = msg.encode().unwrap();
        let decoded = RecordMessage::decode(&encoded).unwrap();

        match decoded {
            RecordMessage::ApplyRecord { index, command } => {
                assert_eq!(index, 7);
                assert_eq!(command, "UPDATE zone SET body = 'x'");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_ack_message() {
        let msg = RecordMessage::ApplyAck {
            applied: false,
            last_index: 41,
        };

        let encoded = msg.encode().unwrap();
        let decoded = RecordMessage::decode(&encoded).unwrap();

        match decoded {
            RecordMessage::ApplyAck {
                applied,
                last_index,
            } => {
                assert!(!applied);
                assert_eq!(last_index, 41);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_crc_validation() {
        let msg = RecordMessage::ApplyAck {
            applied: true,
            last_index: 123,
        };
        let mut encoded = msg.encode().unwrap();

        // Corrupt the data
        encoded[5] ^= 0xFF;

        // Decode should fail
        let result = RecordMessage::decode(&encoded);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("CRC"));
    }

    #[test]
    fn test_message_types() {
        assert_eq!(
            RecordMessage::ApplyRecord {
                index: 0,
                command: "".into()
            }
            .message_type(),
            RecordMessageType::ApplyRecord
        );
        assert_eq!(
            RecordMessage::Error {
                code: 0,
                message: "".into()
            }
            .message_type(),
            RecordMessageType::Error
        );
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(RecordMessage::decode(&[0x01, 0, 0]).is_err());
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let mut buf = vec![0x01u8];
        buf.extend_from_slice(&u32::MAX.to_le_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        let err = RecordMessage::read_from(&mut cursor).await.unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[tokio::test]
    async fn test_stream_roundtrip() {
        let msg = RecordMessage::ApplyRecord {
            index: 3,
            command: "INSERT INTO zone_pool VALUES (..)".into(),
        };

        let mut buf = Vec::new();
        msg.write_to(&mut buf).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = RecordMessage::read_from(&mut cursor).await.unwrap();

        match decoded {
            RecordMessage::ApplyRecord { index, .. } => assert_eq!(index, 3),
            _ => panic!("Wrong message type"),
        }
    }
}
