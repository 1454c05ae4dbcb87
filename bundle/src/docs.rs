//! Documentation store: per chunk id layout and alignment rules
//!
//! ```json
//! {
//!   "header": {"version": 1},
//!   "subnests": {
//!     "0x00000123": {
//!       "description_entry": "Name table",
//!       "align": 16,
//!       "schema": {"count": {"type": "int32", "unsigned": true}}
//!     }
//!   }
//! }
//! ```
//!
//! The `header` object is accepted but not interpreted.
use std::collections::HashMap;
use std::io::Read;

use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use bcore::buf::{hex_id, parse_hex_id};

use crate::chunk::is_container;
use crate::schema::{Schema, SchemaError};

#[derive(Error, Debug)]
pub enum DocsError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("Malformed documentation: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid chunk id in documentation: {0}")]
    InvalidId(String),
    #[error("Invalid schema: {0}")]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subnest {
    pub description: String,
    pub ignore: bool,
    /// Header alignment, only set when it is bigger than 1
    pub align: Option<u64>,
    pub data_align: Option<u64>,
    /// Children may be padded with aligner chunks, containers only
    pub inner_align: Option<bool>,
    pub schema: Option<Schema>,
}

impl Subnest {
    pub fn allows_inner_align(&self) -> bool {
        self.inner_align.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Docs {
    table: HashMap<u32, Subnest>,
}

#[derive(Deserialize)]
struct DocsFile {
    #[serde(default)]
    subnests: Map<String, Value>,
}

#[derive(Deserialize)]
struct SubnestDef {
    #[serde(default)]
    description_entry: String,
    #[serde(default)]
    ignore: bool,
    #[serde(default)]
    align: Option<u64>,
    #[serde(default)]
    data_align: Option<u64>,
    #[serde(default)]
    inner_align: Option<bool>,
    #[serde(default)]
    schema: Option<Map<String, Value>>,
}

impl Docs {
    pub fn parse(json: &str) -> Result<Docs, DocsError> {
        Docs::from_file(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Docs, DocsError> {
        Docs::from_file(serde_json::from_reader(reader)?)
    }

    fn from_file(file: DocsFile) -> Result<Docs, DocsError> {
        let mut table = HashMap::with_capacity(file.subnests.len());

        for (key, raw) in file.subnests {
            let id = parse_hex_id(&key).ok_or_else(|| DocsError::InvalidId(key.clone()))?;
            let def: SubnestDef = serde_json::from_value(raw)?;
            let label = hex_id(id);

            let mut inner_align = def.inner_align;
            if inner_align.is_some() && !is_container(id) {
                warn!("inner_align is only meaningful for container chunks, ignored ({})", label);
                inner_align = None;
            }

            let schema = def.schema.map(|s| Schema::from_json(&s, &label)).transpose()?;

            table.insert(
                id,
                Subnest {
                    description: def.description_entry,
                    ignore: def.ignore,
                    align: def.align.filter(|a| *a > 1),
                    data_align: def.data_align.filter(|a| *a > 1),
                    inner_align,
                    schema,
                },
            );
        }

        Ok(Docs { table })
    }

    pub fn lookup(&self, id: u32) -> Option<&Subnest> {
        self.table.get(&id)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
