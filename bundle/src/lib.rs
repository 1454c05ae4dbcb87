//! Reversible codec for nested, tagged binary chunk bundles.
//!
//! A bundle is read in two passes. [`chunk`] turns bytes into a tree of
//! [`chunk::RawChunk`] without knowing anything about their content. The
//! [`assemble::Assembler`] then walks that tree, looks every chunk id up in
//! the [`docs::Docs`] and turns leaf payloads into records with the
//! [`recode::Recoder`]. Lengths that are only known at run time are written as
//! [`cis`] expressions inside the schema. Both passes run backwards to get the
//! original bytes again.
pub mod assemble;
pub mod chunk;
pub mod cis;
pub mod docs;
pub mod recode;
pub mod schema;
pub mod settings;

pub use crate::chunk::disassembled::{ChunkPayload, DisassembledChunk, Record};
pub use crate::chunk::raw::{RawChunk, RawData};
pub use crate::settings::Settings;
