//! Message Module
//!
//! Defines the binary framing shared by both peers.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │  Id (4)  │ Size (4) │     Body (Size bytes)       │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! - Header fields are little-endian.
//! - The body is present only when `Size > 0`.
//! - There is no delimiter besides the header's declared size.
//!
//! ## Body Layout
//! Values are appended as raw bytes and removed from the end, so a body is a
//! stack: pop values in the reverse order they were pushed.

mod header;
mod owned;

pub use header::{Header, MessageId, HEADER_SIZE};
pub use owned::OwnedMessage;

use std::fmt;
use std::mem;

use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::{AsBytes, FromBytes};

use crate::error::{NetError, Result};

/// Default maximum body size accepted from the wire (16 MB)
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// A header plus an exclusively owned body buffer
///
/// `header().size` always equals `body().len()`; every mutation recomputes it.
#[derive(Debug, Clone)]
pub struct Message<T> {
    header: Header<T>,
    body: BytesMut,
}

impl<T: MessageId> Message<T> {
    /// Create an empty message with the given id
    pub fn new(id: T) -> Self {
        Self {
            header: Header::new(id),
            body: BytesMut::new(),
        }
    }

    /// Rebuild a message from a received header and body
    pub fn from_parts(header: Header<T>, body: BytesMut) -> Result<Self> {
        if header.size as usize != body.len() {
            return Err(NetError::Protocol(format!(
                "header declares {} body bytes, got {}",
                header.size,
                body.len()
            )));
        }
        Ok(Self { header, body })
    }

    pub fn header(&self) -> &Header<T> {
        &self.header
    }

    pub fn id(&self) -> T {
        self.header.id
    }

    pub fn set_id(&mut self, id: T) {
        self.header.id = id;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body length in bytes
    pub fn size(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Drop the whole body, keeping the id
    pub fn clear(&mut self) {
        self.body.clear();
        self.sync_size();
    }

    // =========================================================================
    // Body Push/Pop
    // =========================================================================

    /// Append a fixed-layout value as its raw in-memory bytes
    pub fn push<D: AsBytes>(&mut self, value: D) -> Result<&mut Self> {
        self.push_bytes(value.as_bytes())
    }

    /// Remove a fixed-layout value from the end of the body
    pub fn pop<D: FromBytes>(&mut self) -> Result<D> {
        let start = self.tail_start(mem::size_of::<D>())?;
        let value = D::read_from(&self.body[start..]).ok_or_else(|| {
            NetError::Protocol(format!(
                "could not read {} bytes from message body",
                mem::size_of::<D>()
            ))
        })?;
        self.body.truncate(start);
        self.sync_size();
        Ok(value)
    }

    /// Append a raw run of bytes
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        let new_len = self.body.len() + bytes.len();
        if new_len > u32::MAX as usize {
            return Err(NetError::MessageTooLarge {
                size: new_len,
                max: u32::MAX as usize,
            });
        }
        self.body.put_slice(bytes);
        self.sync_size();
        Ok(self)
    }

    /// Remove the last `len` bytes of the body
    pub fn pop_bytes(&mut self, len: usize) -> Result<Bytes> {
        let start = self.tail_start(len)?;
        let tail = self.body.split_off(start).freeze();
        self.sync_size();
        Ok(tail)
    }

    // =========================================================================
    // Wire Encoding
    // =========================================================================

    /// Encode header and body into one contiguous frame
    pub fn encode(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(HEADER_SIZE + self.body.len());
        frame.put_slice(&self.header.encode());
        frame.put_slice(&self.body);
        frame.freeze()
    }

    fn tail_start(&self, len: usize) -> Result<usize> {
        self.body
            .len()
            .checked_sub(len)
            .ok_or(NetError::SizeUnderflow {
                requested: len,
                available: self.body.len(),
            })
    }

    fn sync_size(&mut self) {
        // push_bytes bounds the body to u32::MAX
        self.header.size = self.body.len() as u32;
    }
}

impl<T: MessageId> fmt::Display for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID: {:?} Size: {}", self.header.id, self.header.size)
    }
}
