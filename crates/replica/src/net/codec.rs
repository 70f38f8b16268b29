use std::borrow::Cow;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use super::protocol::WireMessage;

pub const BATCH_TOTAL_SIZE: usize = 1024;
pub const BATCH_HEADER_SIZE: usize = size_of::<BatchHeader>();
pub const BATCH_PAYLOAD_CAPACITY: usize = BATCH_TOTAL_SIZE - BATCH_HEADER_SIZE;

const LENGTH_PREFIX_SIZE: usize = size_of::<u32>();
const TAG_SIZE: usize = size_of::<u32>();

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("need at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("{name} expects {expected} bytes, got {actual}")]
    SizeMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{name} expects tag {expected}, got {actual}")]
    TagMismatch {
        name: &'static str,
        expected: u32,
        actual: u32,
    },
    #[error("unknown message tag {0}")]
    UnknownTag(u32),
    #[error("entry {index} runs past the end of the payload")]
    Truncated { index: u32 },
    #[error("header declares {declared} messages over {payload_length} bytes, walk ended at {walked}")]
    CountMismatch {
        declared: u32,
        payload_length: usize,
        walked: usize,
    },
    #[error("batch payload is still compressed")]
    Compressed,
    #[error("decompressed payload of {size} bytes exceeds {limit}")]
    Oversized { size: usize, limit: usize },
    #[error("decompression failed: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BatchHeader {
    pub id: u32,
    pub n_messages: u32,
    pub payload_length: u16,
    pub compressed: u8,
    pub _padding: u8,
}

const _: () = assert!(BATCH_HEADER_SIZE == 12);

impl BatchHeader {
    pub fn read(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < BATCH_HEADER_SIZE {
            return Err(CodecError::TooShort {
                expected: BATCH_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..BATCH_HEADER_SIZE]))
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed != 0
    }
}

/// One outbound datagram: a zeroed header followed by length-prefixed entries.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    bytes: Vec<u8>,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuffer {
    pub fn new() -> Self {
        let mut bytes = Vec::with_capacity(BATCH_TOTAL_SIZE);
        bytes.resize(BATCH_HEADER_SIZE, 0);
        Self { bytes }
    }

    pub fn header(&self) -> BatchHeader {
        bytemuck::pod_read_unaligned(&self.bytes[..BATCH_HEADER_SIZE])
    }

    fn write_header(&mut self, header: BatchHeader) {
        self.bytes[..BATCH_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
    }

    pub fn set_id(&mut self, id: u32) {
        let mut header = self.header();
        header.id = id;
        self.write_header(header);
    }

    pub fn message_count(&self) -> u32 {
        self.header().n_messages
    }

    pub fn is_empty(&self) -> bool {
        self.message_count() == 0
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn remaining(&self) -> usize {
        BATCH_TOTAL_SIZE - self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn clear(&mut self) {
        self.bytes.truncate(BATCH_HEADER_SIZE);
        self.write_header(BatchHeader::default());
    }

    /// Appends `{length, tag, body}`. Returns false and leaves the buffer
    /// untouched when the entry does not fit.
    pub fn push<T: WireMessage>(&mut self, message: &T) -> bool {
        let entry_size = LENGTH_PREFIX_SIZE + T::wire_size();
        if entry_size > self.remaining() {
            return false;
        }

        self.bytes
            .extend_from_slice(&(T::wire_size() as u32).to_le_bytes());
        self.bytes.extend_from_slice(&T::TAG.to_le_bytes());
        self.bytes.extend_from_slice(bytemuck::bytes_of(message));

        let mut header = self.header();
        header.n_messages += 1;
        header.payload_length = (self.bytes.len() - BATCH_HEADER_SIZE) as u16;
        self.write_header(header);
        true
    }
}

/// Encodes a single `{tag, body}` span, the unit `deserialize` accepts.
pub fn serialize<T: WireMessage>(message: &T) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(T::wire_size());
    bytes.extend_from_slice(&T::TAG.to_le_bytes());
    bytes.extend_from_slice(bytemuck::bytes_of(message));
    bytes
}

pub fn serialize_into<T: WireMessage>(message: &T, buffer: &mut MessageBuffer) -> bool {
    buffer.push(message)
}

pub fn deserialize<T: WireMessage>(span: &[u8]) -> Result<T, CodecError> {
    if span.len() != T::wire_size() {
        return Err(CodecError::SizeMismatch {
            name: T::NAME,
            expected: T::wire_size(),
            actual: span.len(),
        });
    }

    let tag = read_u32(&span[..TAG_SIZE]);
    if tag != T::TAG {
        return Err(CodecError::TagMismatch {
            name: T::NAME,
            expected: T::TAG,
            actual: tag,
        });
    }

    Ok(bytemuck::pod_read_unaligned(&span[TAG_SIZE..]))
}

pub fn peek_type(span: &[u8]) -> Option<u32> {
    (span.len() >= TAG_SIZE).then(|| read_u32(&span[..TAG_SIZE]))
}

/// Slices a received batch into its `{tag, body}` spans without copying.
pub fn unpack_batch(bytes: &[u8]) -> Result<Vec<&[u8]>, CodecError> {
    let header = BatchHeader::read(bytes)?;
    if header.is_compressed() {
        return Err(CodecError::Compressed);
    }

    let payload_length = header.payload_length as usize;
    let payload = bytes
        .get(BATCH_HEADER_SIZE..BATCH_HEADER_SIZE + payload_length)
        .ok_or(CodecError::TooShort {
            expected: BATCH_HEADER_SIZE + payload_length,
            actual: bytes.len(),
        })?;

    let mut spans = Vec::with_capacity(header.n_messages as usize);
    let mut offset = 0;
    for index in 0..header.n_messages {
        let prefix = payload
            .get(offset..offset + LENGTH_PREFIX_SIZE)
            .ok_or(CodecError::Truncated { index })?;
        let length = read_u32(prefix) as usize;
        offset += LENGTH_PREFIX_SIZE;

        let span = payload
            .get(offset..offset + length)
            .ok_or(CodecError::Truncated { index })?;
        spans.push(span);
        offset += length;
    }

    if offset != payload_length {
        return Err(CodecError::CountMismatch {
            declared: header.n_messages,
            payload_length,
            walked: offset,
        });
    }

    Ok(spans)
}

/// Returns a compressed copy of the datagram, or `None` when compression
/// would not make it smaller.
pub fn compress_batch(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut header = BatchHeader::read(bytes).ok()?;
    if header.is_compressed() {
        return None;
    }

    let payload = &bytes[BATCH_HEADER_SIZE..];
    let compressed = lz4_flex::compress_prepend_size(payload);
    if compressed.len() >= payload.len() || compressed.len() > u16::MAX as usize {
        return None;
    }

    header.compressed = 1;
    header.payload_length = compressed.len() as u16;

    let mut out = Vec::with_capacity(BATCH_HEADER_SIZE + compressed.len());
    out.extend_from_slice(bytemuck::bytes_of(&header));
    out.extend_from_slice(&compressed);
    Some(out)
}

pub fn decompress_batch(bytes: &[u8]) -> Result<Cow<'_, [u8]>, CodecError> {
    let mut header = BatchHeader::read(bytes)?;
    if !header.is_compressed() {
        return Ok(Cow::Borrowed(bytes));
    }

    let payload_length = header.payload_length as usize;
    let payload = bytes
        .get(BATCH_HEADER_SIZE..BATCH_HEADER_SIZE + payload_length)
        .ok_or(CodecError::TooShort {
            expected: BATCH_HEADER_SIZE + payload_length,
            actual: bytes.len(),
        })?;

    let declared = payload.get(..LENGTH_PREFIX_SIZE).map(read_u32).ok_or(
        CodecError::TooShort {
            expected: BATCH_HEADER_SIZE + LENGTH_PREFIX_SIZE,
            actual: bytes.len(),
        },
    )? as usize;
    if declared > BATCH_PAYLOAD_CAPACITY {
        return Err(CodecError::Oversized {
            size: declared,
            limit: BATCH_PAYLOAD_CAPACITY,
        });
    }

    let decompressed = lz4_flex::decompress_size_prepended(payload)?;
    header.compressed = 0;
    header.payload_length = decompressed.len() as u16;

    let mut out = Vec::with_capacity(BATCH_HEADER_SIZE + decompressed.len());
    out.extend_from_slice(bytemuck::bytes_of(&header));
    out.extend_from_slice(&decompressed);
    Ok(Cow::Owned(out))
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}
