//! Walks raw and structured chunk trees side by side.
//!
//! Both directions keep a [`TreeCursor`]: the absolute offset of the next
//! header in the bundle plus the index paths of the current chunk in the
//! structured and in the raw tree. Scripts evaluated while recoding a leaf
//! see the tree built so far through those paths.
use log::{error, warn};
use thiserror::Error;

use bcore::buf::{align_up, hex_id};

use crate::chunk::disassembled::{ChunkPayload, DisassembledChunk};
use crate::chunk::raw::{RawChunk, RawData};
use crate::chunk::{ALIGNER_ID, DATA_ALIGN_FILL, HEADER_SIZE};
use crate::cis::Scope;
use crate::docs::{Docs, Subnest};
use crate::recode::{self, RecodeError};
use crate::settings::Settings;

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("Cannot assemble chunk without schema ({0})")]
    MissingSchema(String),
    #[error("Cannot recode chunk {chunk}: {source}")]
    Recode { chunk: String, source: RecodeError },
    #[error("Chunk {0} is bigger than 4GiB")]
    TooBig(String),
    #[error("Chunk tree has no layer at {0:?}")]
    Backtrace(Vec<usize>),
}

#[derive(Debug, Default)]
struct TreeCursor {
    pointer: u64,
    backtrace: Vec<usize>,
    backtrace_raw: Vec<usize>,
}

pub struct Assembler<'a> {
    docs: &'a Docs,
    settings: &'a Settings,
}

impl<'a> Assembler<'a> {
    pub fn new(docs: &'a Docs, settings: &'a Settings) -> Self {
        Assembler { docs, settings }
    }

    fn lookup(&self, id: u32) -> Option<&'a Subnest> {
        let doc = self.docs.lookup(id);
        if doc.is_none() {
            warn!("Missing documentation for chunk {}", hex_id(id));
        }
        doc
    }

    /// Raw chunks to structured chunks, documented leaves are decoded with their schema
    pub fn disassemble(&self, raw: &[RawChunk]) -> Result<Vec<DisassembledChunk>, AssembleError> {
        let mut out = Vec::new();
        let mut cursor = TreeCursor::default();

        self.disassemble_layer(raw, raw, &mut out, &mut cursor)?;
        Ok(out)
    }

    fn disassemble_layer(
        &self,
        raw_root: &[RawChunk],
        layer: &[RawChunk],
        out: &mut Vec<DisassembledChunk>,
        cursor: &mut TreeCursor,
    ) -> Result<(), AssembleError> {
        let mut index = 0;

        for (raw_index, chunk) in layer.iter().enumerate() {
            let doc = self.lookup(chunk.id);
            let header_start = cursor.pointer;
            let payload_start = header_start + HEADER_SIZE as u64;
            let next = payload_start + u64::from(chunk.length);

            if doc.map_or(false, |d| d.ignore) {
                cursor.pointer = next;
                continue;
            }

            if let Some(align) = doc.and_then(|d| d.align) {
                if header_start % align != 0 {
                    warn!("Chunk {} is not aligned properly", hex_id(chunk.id));
                }
            }

            let parent = cursor.backtrace.clone();
            cursor.backtrace.push(index);
            cursor.backtrace_raw.push(raw_index);

            match &chunk.data {
                RawData::Children(children) => {
                    disasm_layer(out, &parent)?.push(DisassembledChunk::new(chunk.id, ChunkPayload::Children(Vec::new())));

                    cursor.pointer = payload_start;
                    self.disassemble_layer(raw_root, children, out, cursor)?;
                }
                RawData::Bytes(_) => {
                    let payload = self.disassemble_leaf(raw_root, chunk, doc, out, cursor)?;
                    disasm_layer(out, &parent)?.push(DisassembledChunk::new(chunk.id, payload));
                }
            }

            cursor.pointer = next;
            cursor.backtrace.pop();
            cursor.backtrace_raw.pop();
            index += 1;
        }

        Ok(())
    }

    fn disassemble_leaf(
        &self,
        raw_root: &[RawChunk],
        chunk: &RawChunk,
        doc: Option<&Subnest>,
        out: &[DisassembledChunk],
        cursor: &TreeCursor,
    ) -> Result<ChunkPayload, AssembleError> {
        let label = hex_id(chunk.id);
        let payload_start = cursor.pointer + HEADER_SIZE as u64;
        let data = chunk.payload()?.unwrap_or_default();

        if chunk.broken {
            warn!("Chunk {} is broken, kept as raw data", label);
            return Ok(ChunkPayload::Opaque(data.into_owned()));
        }

        let doc = match doc {
            Some(doc) => doc,
            None => return Ok(ChunkPayload::Opaque(data.into_owned())),
        };

        let mut skip = 0;
        if let Some(data_align) = doc.data_align {
            skip = ((align_up(payload_start, data_align) - payload_start) as usize).min(data.len());
            if data[..skip].iter().any(|b| *b != DATA_ALIGN_FILL) {
                warn!("Chunk {} has unexpected bytes before its aligned data", label);
            }
        }
        let data = &data[skip..];

        if data.len() >= 4 && data[..4].iter().all(|b| *b == DATA_ALIGN_FILL) {
            warn!("Documentation mismatch for chunk {} (data align found)", label);
        }

        let schema = match &doc.schema {
            Some(schema) => schema,
            None => return Ok(ChunkPayload::Opaque(data.to_vec())),
        };

        let scope = Scope {
            global: out,
            backtrace: &cursor.backtrace,
            global_raw: raw_root,
            backtrace_raw: &cursor.backtrace_raw,
            docs: Some(self.docs),
            settings: self.settings,
            chunk_id: Some(chunk.id),
            payload_start,
        };

        match recode::decode(data, payload_start + skip as u64, schema, &scope) {
            Ok(record) => Ok(ChunkPayload::Structured(record)),
            Err(source) => {
                error!("CRITICAL: Cannot disassemble chunk {} due to error: {}", label, source);
                Err(AssembleError::Recode { chunk: label, source })
            }
        }
    }

    /// Structured chunks back to raw chunks, adding aligner chunks where the documentation asks for them
    pub fn assemble(&self, chunks: &[DisassembledChunk]) -> Result<Vec<RawChunk>, AssembleError> {
        let mut out = Vec::new();
        let mut cursor = TreeCursor::default();

        self.assemble_layer(chunks, chunks, true, &mut out, &mut cursor)?;
        Ok(out)
    }

    fn assemble_layer(
        &self,
        input_root: &[DisassembledChunk],
        layer: &[DisassembledChunk],
        inner_align: bool,
        out: &mut Vec<RawChunk>,
        cursor: &mut TreeCursor,
    ) -> Result<(), AssembleError> {
        let parent_raw = cursor.backtrace_raw.clone();

        for (index, chunk) in layer.iter().enumerate() {
            let doc = self.lookup(chunk.id);
            let label = hex_id(chunk.id);

            if let Some(align) = doc.and_then(|d| d.align) {
                if cursor.pointer % align != 0 {
                    if inner_align {
                        let aligner = self.aligner(cursor.pointer, align)?;
                        cursor.pointer += HEADER_SIZE as u64 + u64::from(aligner.length);
                        raw_layer(out, &parent_raw)?.push(aligner);
                    } else {
                        error!("Chunk {} is not aligned and its parent does not allow aligner chunks", label);
                    }
                }
            }

            let payload_start = cursor.pointer + HEADER_SIZE as u64;
            let raw_index = raw_layer(out, &parent_raw)?.len();
            cursor.backtrace.push(index);
            cursor.backtrace_raw.push(raw_index);

            match &chunk.data {
                ChunkPayload::Children(children) => {
                    raw_layer(out, &parent_raw)?.push(RawChunk::container(chunk.id, 0, Vec::new()));

                    cursor.pointer = payload_start;
                    let allowed = doc.map_or(true, |d| d.allows_inner_align());
                    self.assemble_layer(input_root, children, allowed, out, cursor)?;

                    let length = u32::try_from(cursor.pointer - payload_start).map_err(|_| AssembleError::TooBig(label))?;
                    if let Some(container) = raw_layer(out, &parent_raw)?.get_mut(raw_index) {
                        container.length = length;
                    }
                }
                payload => {
                    let data = self.assemble_leaf(input_root, chunk.id, payload, doc, out, cursor)?;
                    let leaf = RawChunk::leaf(chunk.id, data, self.settings.compress_threshold)?;

                    cursor.pointer = payload_start + u64::from(leaf.length);
                    raw_layer(out, &parent_raw)?.push(leaf);
                }
            }

            cursor.backtrace.pop();
            cursor.backtrace_raw.pop();
        }

        Ok(())
    }

    /// Filler chunk moving the next header from `pointer` onto `align`
    fn aligner(&self, pointer: u64, align: u64) -> Result<RawChunk, AssembleError> {
        let mut gap = align - pointer % align;
        while gap < HEADER_SIZE as u64 {
            gap += align;
        }

        Ok(RawChunk::leaf(
            ALIGNER_ID,
            vec![0; gap as usize - HEADER_SIZE],
            self.settings.compress_threshold,
        )?)
    }

    fn assemble_leaf(
        &self,
        input_root: &[DisassembledChunk],
        id: u32,
        payload: &ChunkPayload,
        doc: Option<&Subnest>,
        out: &[RawChunk],
        cursor: &TreeCursor,
    ) -> Result<Vec<u8>, AssembleError> {
        let label = hex_id(id);
        let payload_start = cursor.pointer + HEADER_SIZE as u64;
        let skip = doc
            .and_then(|d| d.data_align)
            .map_or(0, |align| align_up(payload_start, align) - payload_start) as usize;

        let mut data = vec![DATA_ALIGN_FILL; skip];

        match payload {
            ChunkPayload::Opaque(bytes) => {
                if doc.map_or(false, |d| d.schema.is_some()) {
                    warn!("Chunk {} has schema but raw value was found", label);
                }
                data.extend_from_slice(bytes);
            }
            ChunkPayload::Structured(record) => {
                let schema = doc
                    .and_then(|d| d.schema.as_ref())
                    .ok_or_else(|| AssembleError::MissingSchema(label.clone()))?;

                let scope = Scope {
                    global: input_root,
                    backtrace: &cursor.backtrace,
                    global_raw: out,
                    backtrace_raw: &cursor.backtrace_raw,
                    docs: Some(self.docs),
                    settings: self.settings,
                    chunk_id: Some(id),
                    payload_start,
                };

                match recode::encode(record, payload_start + skip as u64, schema, &scope) {
                    Ok(encoded) => data.extend_from_slice(&encoded),
                    Err(source) => {
                        error!("CRITICAL: Cannot assemble chunk {} due to error: {}", label, source);
                        return Err(AssembleError::Recode { chunk: label, source });
                    }
                }
            }
            ChunkPayload::Children(_) => return Err(AssembleError::Backtrace(cursor.backtrace.clone())),
        }

        Ok(data)
    }
}

fn disasm_layer<'t>(
    root: &'t mut Vec<DisassembledChunk>,
    path: &[usize],
) -> Result<&'t mut Vec<DisassembledChunk>, AssembleError> {
    let mut layer = root;
    for idx in path {
        let chunk = layer
            .get_mut(*idx)
            .ok_or_else(|| AssembleError::Backtrace(path.to_vec()))?;
        layer = match &mut chunk.data {
            ChunkPayload::Children(children) => children,
            _ => return Err(AssembleError::Backtrace(path.to_vec())),
        };
    }
    Ok(layer)
}

fn raw_layer<'t>(root: &'t mut Vec<RawChunk>, path: &[usize]) -> Result<&'t mut Vec<RawChunk>, AssembleError> {
    let mut layer = root;
    for idx in path {
        let chunk = layer
            .get_mut(*idx)
            .ok_or_else(|| AssembleError::Backtrace(path.to_vec()))?;
        layer = match &mut chunk.data {
            RawData::Children(children) => children,
            RawData::Bytes(_) => return Err(AssembleError::Backtrace(path.to_vec())),
        };
    }
    Ok(layer)
}
