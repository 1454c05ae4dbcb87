use std::io::Write;

use crate::chunk::raw::{encode, ChunkError, RawChunk};

pub struct ChunkWriter<W: Write> {
    inner: W,
}

// This is the high level writer interface
impl<W: Write> ChunkWriter<W> {
    pub fn new(writer: W) -> Self {
        ChunkWriter { inner: writer }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write_chunk(&mut self, chunk: &RawChunk) -> Result<usize, ChunkError> {
        let data = encode(chunk)?;
        self.inner.write_all(&data)?;
        Ok(data.len())
    }

    pub fn write_chunks(&mut self, chunks: &[RawChunk]) -> Result<usize, ChunkError> {
        let mut len = 0;
        for chunk in chunks {
            len += self.write_chunk(chunk)?;
        }
        Ok(len)
    }

    pub fn flush(&mut self) -> Result<(), ChunkError> {
        Ok(self.inner.flush()?)
    }
}
