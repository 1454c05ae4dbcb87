use crate::chunk::disassembled::{DisassembledChunk, Record};
use crate::chunk::raw::RawChunk;
use crate::docs::Docs;
use crate::settings::Settings;

/// Where in the bundle the chunk being recoded sits
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    /// Structured tree as far as it is known
    pub global: &'a [DisassembledChunk],
    /// Index path into `global` of the current chunk
    pub backtrace: &'a [usize],
    pub global_raw: &'a [RawChunk],
    pub backtrace_raw: &'a [usize],
    pub docs: Option<&'a Docs>,
    pub settings: &'a Settings,
    pub chunk_id: Option<u32>,
    /// Absolute offset right after the chunk header
    pub payload_start: u64,
}

impl<'a> Scope<'a> {
    /// A scope outside of any bundle, for recoding a lone payload
    pub fn detached(settings: &'a Settings) -> Scope<'a> {
        Scope {
            global: &[],
            backtrace: &[],
            global_raw: &[],
            backtrace_raw: &[],
            docs: None,
            settings,
            chunk_id: None,
            payload_start: 0,
        }
    }
}

/// Set while walking array elements
#[derive(Debug, Clone, Copy, Default)]
pub struct Extra<'a> {
    pub index: Option<usize>,
    /// Record holding the array
    pub root: Option<&'a Record>,
}

#[derive(Debug, Clone, Copy)]
pub struct ScriptContext<'a> {
    pub current: &'a Record,
    pub scope: &'a Scope<'a>,
    pub extra: Extra<'a>,
}

impl<'a> ScriptContext<'a> {
    pub fn new(current: &'a Record, scope: &'a Scope<'a>, extra: Extra<'a>) -> Self {
        ScriptContext { current, scope, extra }
    }
}
