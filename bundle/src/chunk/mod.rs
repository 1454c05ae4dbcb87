//! Tagged chunk bundle format
//!
//! A bundle is a flat sequence of chunks. Every chunk starts with an 8 byte
//! header, everything is stored in Little Endian format.
//!
//! | Type    | Name   | Description |
//! | ------: | ------ | ----------- |
//! | u32     | id     | Identifies the chunk, bit 31 marks a container |
//! | u32     | length | Byte length of the payload that follows, may be 0 |
//! | [u8; N] | data   | The payload, `length` bytes |
//!
//! # Containers
//!
//! When bit 31 of the id is set (`id & 0x8000_0000 != 0`) and the payload is
//! at least one header long, the payload is itself a sequence of chunks
//! (headers included). Containers nest to any depth.
//!
//! # Broken chunks
//!
//! A chunk whose declared length runs past the end of the available bytes is
//! kept as a `broken` leaf holding whatever bytes were there. Nothing after it
//! is parsed.
//!
//! # Compression
//!
//! The raw tree stores leaf payloads of at least `compress_threshold` bytes
//! deflated (zlib stream) and flags them as `compressed`. `length` always
//! holds the inflated size, so the flag never leaks into the binary form.
//!
//! # Alignment
//!
//! Documentation may ask for a chunk header to start on an aligned offset.
//! Gaps are filled with aligner chunks (id `0`) whose payload is all zeros.
//! Payloads can also be aligned on their own (`data_align`), the gap between
//! the header and the aligned payload start is filled with `0x11` bytes.
use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

pub mod builder;
pub mod disassembled;
pub mod raw;
pub mod reader;

pub const HEADER_SIZE: usize = 8;
pub const CONTAINER_FLAG: u32 = 0x8000_0000;

/// Id of the synthetic chunks used to pad the stream up to an alignment
pub const ALIGNER_ID: u32 = 0;

/// Filler byte between a header and a `data_align`ed payload
pub const DATA_ALIGN_FILL: u8 = 0x11;

pub fn is_container(id: u32) -> bool {
    id & CONTAINER_FLAG != 0
}

pub fn deflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn inflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Serde glue for byte payloads carried as base64 strings in JSON
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(de::Error::custom)
    }
}
