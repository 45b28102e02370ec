//! Message header
//!
//! Fixed-size prefix carrying the type tag and the body length.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{NetError, Result};

/// Header size: 4 bytes id + 4 bytes body length
pub const HEADER_SIZE: usize = 8;

/// Application-supplied message type tag
///
/// The tag always occupies 4 bytes on the wire. Both peers must agree on the
/// mapping; a value `from_wire` does not recognise closes the connection.
pub trait MessageId: Copy + fmt::Debug + Send + Sync + 'static {
    fn to_wire(self) -> u32;

    fn from_wire(raw: u32) -> Option<Self>;
}

impl MessageId for u32 {
    fn to_wire(self) -> u32 {
        self
    }

    fn from_wire(raw: u32) -> Option<Self> {
        Some(raw)
    }
}

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<T> {
    pub id: T,

    /// Body length in bytes
    pub size: u32,
}

impl<T: MessageId> Header<T> {
    pub fn new(id: T) -> Self {
        Self { id, size: 0 }
    }

    /// Encode to the fixed wire block
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut block = [0u8; HEADER_SIZE];
        let mut dst = &mut block[..];
        dst.put_u32_le(self.id.to_wire());
        dst.put_u32_le(self.size);
        block
    }

    /// Decode from the fixed wire block
    pub fn decode(block: &[u8; HEADER_SIZE]) -> Result<Self> {
        let mut src = &block[..];
        let raw_id = src.get_u32_le();
        let size = src.get_u32_le();

        let id = T::from_wire(raw_id).ok_or(NetError::UnknownMessageId(raw_id))?;
        Ok(Self { id, size })
    }
}
