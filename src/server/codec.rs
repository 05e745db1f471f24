//! Length-prefixed JSON frame codec
//!
//! ```text
//! +----------------+---------------------------+
//! | length (u32 BE)| JSON payload (length bytes)|
//! +----------------+---------------------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::CodecError;

use super::frame::RelayFrame;

/// Size of the length prefix
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame encoder/decoder
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Append an encoded frame to `dst`
    pub fn encode(&self, frame: &RelayFrame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = serde_json::to_vec(frame)?;
        if payload.len() > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }

    /// Try to decode one frame from the front of `src`
    ///
    /// Returns `Ok(None)` when more bytes are needed; consumed bytes are
    /// removed from `src` only when a full frame is decoded.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<RelayFrame>, CodecError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        if src.len() < HEADER_SIZE + len {
            src.reserve(HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(len);
        let frame = serde_json::from_slice(&payload)?;
        Ok(Some(frame))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
