// ABOUTME: Self-describing wire wrapper written as the sole content of every store file.
// ABOUTME: Length-prefixed binary frame carrying a type tag, opaque payload bytes and a CRC32C checksum.

use crc32c::crc32c;
use thiserror::Error;

/// Upper bound on a frame body. Anything larger is treated as a corrupted length prefix.
pub const MAX_BODY_LEN: usize = 256 * 1024 * 1024;

/// Errors raised while decoding an envelope frame. Every variant means the
/// bytes on disk cannot be trusted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("implausible body length {0} (likely corruption)")]
    ImplausibleLength(usize),

    #[error("body length mismatch: header says {declared}, found {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("field overruns frame: {0}")]
    Overrun(&'static str),

    #[error("type tag is empty")]
    EmptyTag,

    #[error("type tag is not valid utf-8")]
    InvalidTag,

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("type tag too long: {0} bytes")]
    TagTooLong(usize),
}

/// One envelope per file: a type tag naming the concrete store type plus the
/// store's own payload bytes.
///
/// # Frame layout (little-endian)
/// ```text
/// [body_len: u32]
/// [tag_len: u16][tag: utf-8]
/// [payload_len: u32][payload]
/// [checksum: u32]   // CRC32C over tag ++ payload
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub type_tag: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(type_tag: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            type_tag: type_tag.into(),
            payload,
        }
    }

    fn checksum(tag: &[u8], payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(tag.len() + payload.len());
        buf.extend_from_slice(tag);
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    /// Serialize to the binary frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        let tag = self.type_tag.as_bytes();
        if tag.is_empty() {
            return Err(EnvelopeError::EmptyTag);
        }
        let tag_len =
            u16::try_from(tag.len()).map_err(|_| EnvelopeError::TagTooLong(tag.len()))?;

        // body = 2 (tag_len) + tag + 4 (payload_len) + payload + 4 (crc)
        let body_len = 2 + tag.len() + 4 + self.payload.len() + 4;
        if body_len > MAX_BODY_LEN {
            return Err(EnvelopeError::ImplausibleLength(body_len));
        }

        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        buf.extend_from_slice(&tag_len.to_le_bytes());
        buf.extend_from_slice(tag);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&Self::checksum(tag, &self.payload).to_le_bytes());
        Ok(buf)
    }

    /// Parse a complete frame. The slice must contain exactly one envelope;
    /// trailing bytes are rejected as corruption.
    pub fn from_bytes(data: &[u8]) -> Result<Self, EnvelopeError> {
        if data.len() < 4 {
            return Err(EnvelopeError::TooShort(data.len()));
        }

        let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if body_len > MAX_BODY_LEN {
            return Err(EnvelopeError::ImplausibleLength(body_len));
        }

        let body = &data[4..];
        if body.len() != body_len {
            return Err(EnvelopeError::LengthMismatch {
                declared: body_len,
                actual: body.len(),
            });
        }

        let mut cursor = Cursor::new(body);
        let tag_len = u16::from_le_bytes(cursor.take_array::<2>("tag length")?) as usize;
        let tag = cursor.take(tag_len, "type tag")?;
        let payload_len = u32::from_le_bytes(cursor.take_array::<4>("payload length")?) as usize;
        let payload = cursor.take(payload_len, "payload")?;
        let stored = u32::from_le_bytes(cursor.take_array::<4>("checksum")?);

        if !cursor.is_empty() {
            return Err(EnvelopeError::LengthMismatch {
                declared: body_len,
                actual: body_len - cursor.remaining(),
            });
        }

        let computed = Self::checksum(tag, payload);
        if stored != computed {
            return Err(EnvelopeError::ChecksumMismatch { stored, computed });
        }

        if tag.is_empty() {
            return Err(EnvelopeError::EmptyTag);
        }
        let type_tag = std::str::from_utf8(tag)
            .map_err(|_| EnvelopeError::InvalidTag)?
            .to_string();

        Ok(Self {
            type_tag,
            payload: payload.to_vec(),
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], EnvelopeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(EnvelopeError::Overrun(field))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(
        &mut self,
        field: &'static str,
    ) -> Result<[u8; N], EnvelopeError> {
        let slice = self.take(N, field)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
