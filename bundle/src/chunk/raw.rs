use std::borrow::Cow;
use std::io;

use byteorder::{ByteOrder, LittleEndian};
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bcore::buf::hex_id;

use crate::chunk::{deflate, inflate, is_container, HEADER_SIZE};

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("stream ended inside a chunk ({} bytes left over)", leftover.len())]
    Truncated { leftover: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChunk {
    pub id: u32,
    /// Inflated payload length, as written in the header
    pub length: u32,
    #[serde(default)]
    pub broken: bool,
    #[serde(default)]
    pub compressed: bool,
    pub data: RawData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawData {
    Children(Vec<RawChunk>),
    /// Stored payload, deflated when the chunk is `compressed`
    Bytes(#[serde(with = "crate::chunk::b64")] Vec<u8>),
}

impl RawChunk {
    /// Builds a leaf from its plain payload, compressing it when it is big enough
    pub fn leaf(id: u32, payload: Vec<u8>, compress_threshold: usize) -> io::Result<RawChunk> {
        let length = u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk payload exceeds 4GiB"))?;

        let compressed = payload.len() >= compress_threshold;
        let data = if compressed { deflate(&payload)? } else { payload };

        Ok(RawChunk {
            id,
            length,
            broken: false,
            compressed,
            data: RawData::Bytes(data),
        })
    }

    pub fn container(id: u32, length: u32, children: Vec<RawChunk>) -> RawChunk {
        RawChunk {
            id,
            length,
            broken: false,
            compressed: false,
            data: RawData::Children(children),
        }
    }

    /// Inflated payload of a leaf, `None` for containers
    pub fn payload(&self) -> io::Result<Option<Cow<'_, [u8]>>> {
        match &self.data {
            RawData::Children(_) => Ok(None),
            RawData::Bytes(data) if self.compressed => Ok(Some(Cow::Owned(inflate(data)?))),
            RawData::Bytes(data) => Ok(Some(Cow::Borrowed(&data[..]))),
        }
    }

    /// Payload bytes this chunk occupies in a bundle, each child counted with its header
    pub fn footprint(&self) -> u64 {
        match &self.data {
            RawData::Children(children) => children
                .iter()
                .map(|c| HEADER_SIZE as u64 + c.footprint())
                .sum(),
            RawData::Bytes(_) => u64::from(self.length),
        }
    }
}

pub fn read_header(buf: &[u8]) -> Option<(u32, u32)> {
    if buf.len() < HEADER_SIZE {
        return None;
    }

    Some((LittleEndian::read_u32(&buf[0..4]), LittleEndian::read_u32(&buf[4..8])))
}

/// Decodes every complete chunk at the front of `buf`.
///
/// Returns the chunks and whatever could not be parsed: a partial header or
/// a chunk whose payload runs past the end of the buffer. The caller decides
/// if those bytes matter.
pub fn decode_many(mut buf: &[u8], compress_threshold: usize) -> Result<(Vec<RawChunk>, &[u8]), ChunkError> {
    let mut chunks = Vec::new();

    while let Some((_, length)) = read_header(buf) {
        let end = HEADER_SIZE.saturating_add(length as usize);
        if end > buf.len() {
            break;
        }

        chunks.push(decode_one(&buf[..end], compress_threshold)?);
        buf = &buf[end..];
    }

    Ok((chunks, buf))
}

/// Decodes a single chunk, header included.
///
/// A payload shorter than the declared length gives a `broken` leaf.
pub fn decode_one(buf: &[u8], compress_threshold: usize) -> Result<RawChunk, ChunkError> {
    let (id, length) = read_header(buf).ok_or_else(|| ChunkError::Truncated {
        leftover: buf.to_vec(),
    })?;

    let end = HEADER_SIZE.saturating_add(length as usize).min(buf.len());
    let payload = &buf[HEADER_SIZE..end];
    let broken = payload.len() != length as usize;

    if is_container(id) && !broken && payload.len() >= HEADER_SIZE {
        let (children, leftover) = decode_many(payload, compress_threshold)?;

        if leftover.is_empty() {
            return Ok(RawChunk::container(id, length, children));
        }

        // Keep the bytes as they are so the chunk still round trips
        error!("Cannot properly parse data of chunk {}", hex_id(id));
    }

    if broken {
        error!("Size mismatch of chunk {}", hex_id(id));

        return Ok(RawChunk {
            id,
            length,
            broken: true,
            compressed: false,
            data: RawData::Bytes(payload.to_vec()),
        });
    }

    Ok(RawChunk::leaf(id, payload.to_vec(), compress_threshold)?)
}

/// Serializes a chunk depth first, inflating compressed payloads back
pub fn encode(chunk: &RawChunk) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(chunk, &mut out)?;
    Ok(out)
}

pub fn encode_into(chunk: &RawChunk, out: &mut Vec<u8>) -> io::Result<()> {
    out.extend_from_slice(&chunk.id.to_le_bytes());
    out.extend_from_slice(&chunk.length.to_le_bytes());

    match &chunk.data {
        RawData::Children(children) => {
            for child in children {
                encode_into(child, out)?;
            }
        }
        RawData::Bytes(data) if chunk.compressed => out.extend_from_slice(&inflate(data)?),
        RawData::Bytes(data) => out.extend_from_slice(data),
    }

    Ok(())
}
