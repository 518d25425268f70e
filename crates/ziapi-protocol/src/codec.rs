//! Length-prefixed message framing
//!
//! ```text
//! +--------+--------+----------------+------------------+
//! | 'Z'    | 'I'    | length (u32 BE) | bincode body     |
//! +--------+--------+----------------+------------------+
//! ```

use crate::MAX_EVENT_SIZE;
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Frame magic
pub const FRAME_MAGIC: [u8; 2] = *b"ZI";

/// Magic plus length
pub const HEADER_LEN: usize = 6;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Bad frame magic: {0:02x?}")]
    BadMagic([u8; 2]),

    #[error("Frame too large: {actual} bytes (max {max})")]
    FrameTooLarge { max: usize, actual: usize },

    #[error("Serialization failed: {0}")]
    Serialize(#[source] bincode::Error),

    #[error("Deserialization failed: {0}")]
    Deserialize(#[source] bincode::Error),
}

/// Stateless frame encoder/decoder
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame: MAX_EVENT_SIZE,
        }
    }
}

impl FrameCodec {
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self { max_frame }
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Append one framed message to `dst`.
    pub fn encode<T: Serialize>(&self, msg: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = bincode::serialize(msg).map_err(CodecError::Serialize)?;
        if body.len() > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                max: self.max_frame,
                actual: body.len(),
            });
        }
        dst.reserve(HEADER_LEN + body.len());
        dst.put_slice(&FRAME_MAGIC);
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }

    /// Take one message off the front of `src`.
    ///
    /// Returns `Ok(None)` while the frame is incomplete; `src` is left intact
    /// in that case.
    pub fn decode<T: DeserializeOwned>(&self, src: &mut BytesMut) -> Result<Option<T>, CodecError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let magic = [src[0], src[1]];
        if magic != FRAME_MAGIC {
            return Err(CodecError::BadMagic(magic));
        }
        let len = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;
        if len > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                max: self.max_frame,
                actual: len,
            });
        }
        if src.len() < HEADER_LEN + len {
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let body = src.split_to(len);
        bincode::deserialize(&body)
            .map(Some)
            .map_err(CodecError::Deserialize)
    }
}
