use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};

use bcore::buf::fill_buf;

use crate::chunk::raw::{decode_one, ChunkError, RawChunk};
use crate::chunk::HEADER_SIZE;

/// Streams top level chunks out of a reader.
///
/// A partial chunk at the end of the stream comes out as
/// [`ChunkError::Truncated`] with the bytes that were read, then the iterator
/// is done.
pub struct ChunkReader<R: Read> {
    inner: R,
    compress_threshold: usize,
    done: bool,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(reader: R, compress_threshold: usize) -> Self {
        ChunkReader {
            inner: reader,
            compress_threshold,
            done: false,
        }
    }

    fn read_chunk(&mut self) -> Result<Option<RawChunk>, ChunkError> {
        let mut header = [0u8; HEADER_SIZE];

        match fill_buf(&mut self.inner, &mut header)? {
            (_, 0) => return Ok(None),
            (true, len) => {
                return Err(ChunkError::Truncated {
                    leftover: header[..len].to_vec(),
                })
            }
            _ => (),
        }

        let length = LittleEndian::read_u32(&header[4..]) as usize;

        // Grows with the data actually present, a bogus length can't
        // make us allocate up front
        let mut data = header.to_vec();
        (&mut self.inner).take(length as u64).read_to_end(&mut data)?;

        if data.len() < HEADER_SIZE + length {
            return Err(ChunkError::Truncated { leftover: data });
        }

        decode_one(&data, self.compress_threshold).map(Some)
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = Result<RawChunk, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod test_chunk_reader {
    use super::*;
    use crate::chunk::builder::ChunkWriter;
    use crate::chunk::raw::RawData;
    use std::io::{Cursor, Seek, SeekFrom};

    #[test]
    fn empty_stream() {
        let mut reader = ChunkReader::new(Cursor::new(Vec::new()), 150);
        assert!(reader.next().is_none());
    }

    #[test]
    fn two_chunks() {
        // Write to the stream
        let data = Cursor::new(Vec::new());
        let mut builder = ChunkWriter::new(data);
        builder.write_chunk(&RawChunk::leaf(0x1, vec![1, 2, 3], 150).unwrap()).unwrap();
        builder
            .write_chunk(&RawChunk::container(
                0x8000_0002,
                8,
                vec![RawChunk::leaf(0x3, vec![], 150).unwrap()],
            ))
            .unwrap();

        // Reset stream
        let mut data = builder.into_inner();
        data.seek(SeekFrom::Start(0)).unwrap();

        // Read back and assert stuff
        let mut reader = ChunkReader::new(data, 150);

        assert_eq!(
            RawChunk::leaf(0x1, vec![1, 2, 3], 150).unwrap(),
            reader.next().unwrap().unwrap()
        );
        assert_eq!(
            RawChunk::container(0x8000_0002, 8, vec![RawChunk::leaf(0x3, vec![], 150).unwrap()]),
            reader.next().unwrap().unwrap()
        );
        assert!(reader.next().is_none());
    }

    #[test]
    fn partial_header() {
        let mut reader = ChunkReader::new(Cursor::new(vec![0x01, 0x00, 0x00]), 150);

        match reader.next() {
            Some(Err(ChunkError::Truncated { leftover })) => assert_eq!(leftover, vec![0x01, 0x00, 0x00]),
            _ => panic!("Expected truncated stream"),
        }
        assert!(reader.next().is_none());
    }

    #[test]
    fn partial_payload() {
        let mut data = vec![0x05, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00];
        data.extend_from_slice(&[0xAA, 0xBB]);
        let mut reader = ChunkReader::new(Cursor::new(data.clone()), 150);

        match reader.next() {
            Some(Err(ChunkError::Truncated { leftover })) => {
                assert_eq!(leftover, data);

                // What --even-broken keeps around
                let broken = decode_one(&leftover, 150).unwrap();
                assert!(broken.broken);
                assert_eq!(broken.data, RawData::Bytes(vec![0xAA, 0xBB]));
            }
            _ => panic!("Expected truncated stream"),
        }
        assert!(reader.next().is_none());
    }
}
