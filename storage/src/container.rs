use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{Result, StorageError, Timestamp};

/// Embed type carrying the container timestamp.
pub const EMBED_TIMESTAMP: u32 = 1;

// u64 size + u32 type + u32 flags
const EMBED_HEADER_LEN: usize = 16;
const SECTION_LEN_FIELD: usize = 8;
const TIMESTAMP_BODY_LEN: usize = 16;

/// Payload plus the metadata that travels embedded in front of it.
///
/// A container without a timestamp packs to its raw payload, so a plain read
/// returns exactly the bytes that were written. A container with a timestamp
/// packs to `[u64 section_len][embed]*[payload]` and must be read back with
/// `embedded = true` to recover the timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataContainer {
    payload: Bytes,
    timestamp: Option<Timestamp>,
}

impl DataContainer {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub fn has_embeds(&self) -> bool {
        self.timestamp.is_some()
    }

    pub fn pack(&self) -> Bytes {
        let timestamp = match self.timestamp {
            Some(ts) => ts,
            None => return self.payload.clone(),
        };

        let section_len = SECTION_LEN_FIELD + EMBED_HEADER_LEN + TIMESTAMP_BODY_LEN;
        let mut buf = BytesMut::with_capacity(section_len + self.payload.len());

        buf.put_u64_le(section_len as u64);
        buf.put_u64_le(TIMESTAMP_BODY_LEN as u64);
        buf.put_u32_le(EMBED_TIMESTAMP);
        buf.put_u32_le(0);
        buf.put_i64_le(timestamp.seconds());
        buf.put_u64_le(timestamp.nanoseconds() as u64);
        buf.put_slice(&self.payload);

        buf.freeze()
    }

    pub fn unpack(raw: Bytes, embedded: bool) -> Result<Self> {
        if !embedded {
            return Ok(Self::new(raw));
        }

        if raw.len() < SECTION_LEN_FIELD {
            return Err(StorageError::Malformed(format!(
                "{} bytes is too short for an embed section",
                raw.len()
            )));
        }

        let section_len = (&raw[..SECTION_LEN_FIELD]).get_u64_le() as usize;
        if section_len < SECTION_LEN_FIELD || section_len > raw.len() {
            return Err(StorageError::Malformed(format!(
                "embed section length {} out of bounds (total {})",
                section_len,
                raw.len()
            )));
        }

        let mut section = &raw[SECTION_LEN_FIELD..section_len];
        let mut timestamp = None;

        while section.has_remaining() {
            if section.remaining() < EMBED_HEADER_LEN {
                return Err(StorageError::Malformed("truncated embed header".to_string()));
            }

            let size = section.get_u64_le() as usize;
            let kind = section.get_u32_le();
            let _flags = section.get_u32_le();

            if size > section.remaining() {
                return Err(StorageError::Malformed(format!(
                    "embed of type {} claims {} bytes, {} left",
                    kind,
                    size,
                    section.remaining()
                )));
            }

            let (body, rest) = section.split_at(size);
            if kind == EMBED_TIMESTAMP {
                timestamp = Some(decode_timestamp(body)?);
            } else {
                tracing::trace!("Skipping unknown embed type {} ({} bytes)", kind, size);
            }
            section = rest;
        }

        Ok(Self {
            payload: raw.slice(section_len..),
            timestamp,
        })
    }
}

fn decode_timestamp(mut body: &[u8]) -> Result<Timestamp> {
    if body.len() != TIMESTAMP_BODY_LEN {
        return Err(StorageError::Malformed(format!(
            "timestamp embed has {} bytes",
            body.len()
        )));
    }

    let seconds = body.get_i64_le();
    let nanoseconds = u32::try_from(body.get_u64_le())
        .map_err(|_| StorageError::Malformed("timestamp nanoseconds overflow".to_string()))?;

    Timestamp::new(seconds, nanoseconds)
        .map_err(|e| StorageError::Malformed(e.to_string()))
}

impl From<&str> for DataContainer {
    fn from(data: &str) -> Self {
        Self::new(Bytes::copy_from_slice(data.as_bytes()))
    }
}

impl From<String> for DataContainer {
    fn from(data: String) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for DataContainer {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<Bytes> for DataContainer {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}
