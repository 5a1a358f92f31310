use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{CorrelationId, WorkerMessage, MAX_FRAME_SIZE};

/// Frames worker messages as `[4 bytes big-endian len][json]`.
pub struct FrameCodec;

impl FrameCodec {
    pub fn encode(msg: &WorkerMessage) -> ProtocolResult<Vec<u8>> {
        let payload = serde_json::to_vec(msg)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Self::frame(&payload)
    }

    /// Put the length header in front of an already-encoded body.
    pub fn frame(payload: &[u8]) -> ProtocolResult<Vec<u8>> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let len = payload.len() as u32;
        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(payload);
        Ok(buf)
    }

    /// Decode one frame from the front of `data`. Returns the message and
    /// the number of bytes consumed.
    pub fn decode(data: &[u8]) -> ProtocolResult<(WorkerMessage, usize)> {
        let Some((header, rest)) = data.split_first_chunk::<4>() else {
            return Err(ProtocolError::Framing("too short".into()));
        };
        let len = u32::from_be_bytes(*header) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        if rest.len() < len {
            return Err(ProtocolError::Framing(format!(
                "incomplete: have {}, need {}",
                data.len(),
                4 + len
            )));
        }
        let msg = serde_json::from_slice(&rest[..len])
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok((msg, 4 + len))
    }

    /// Decode a buffer holding exactly one frame.
    pub fn decode_exact(data: &[u8]) -> ProtocolResult<WorkerMessage> {
        let (msg, consumed) = Self::decode(data)?;
        if consumed != data.len() {
            return Err(ProtocolError::Framing(format!(
                "{} trailing bytes",
                data.len() - consumed
            )));
        }
        Ok(msg)
    }

    /// Best-effort `correlationId` of a frame that failed to decode, so the
    /// failure can still be answered. `None` if the body is not a JSON
    /// object carrying a string id.
    pub fn peek_correlation(data: &[u8]) -> Option<CorrelationId> {
        let (header, rest) = data.split_first_chunk::<4>()?;
        let len = u32::from_be_bytes(*header) as usize;
        let body = rest.get(..len).unwrap_or(rest);
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        value
            .get("correlationId")?
            .as_str()
            .map(CorrelationId::from)
    }
}
