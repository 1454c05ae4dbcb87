use std::fmt;

use serde_json::Value;

use crate::chunk::disassembled::{chunk_to_value, forest_to_value, ChunkPayload, DisassembledChunk, Record};
use crate::cis::ScriptError;

/// One `.step` of an accessor chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    Key(String),
    Index(usize),
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Key(key) => write!(f, "\"{}\"", key),
            Accessor::Index(idx) => write!(f, "{}", idx),
        }
    }
}

/// Walks `path` down from `value`.
///
/// A null value may end the chain but never be stepped into.
pub fn resolve<'v>(value: &'v Value, path: &[Accessor]) -> Result<&'v Value, ScriptError> {
    let mut cur = value;

    for step in path {
        cur = match (step, cur) {
            (_, Value::Null) => return Err(ScriptError::NullAccess(step.to_string())),
            (Accessor::Key(key), Value::Object(map)) => map
                .get(key)
                .ok_or_else(|| ScriptError::UnknownField(step.to_string()))?,
            (Accessor::Index(idx), Value::Array(items)) => items
                .get(*idx)
                .ok_or_else(|| ScriptError::UnknownField(step.to_string()))?,
            (Accessor::Index(_), _) => return Err(ScriptError::InvalidAccessor(step.to_string())),
            (Accessor::Key(_), _) => return Err(ScriptError::UnknownField(step.to_string())),
        };
    }

    Ok(cur)
}

/// Same as [`resolve`] over the record as an object, only the selected value is cloned
pub fn select_record(record: &Record, path: &[Accessor]) -> Result<Value, ScriptError> {
    match path.split_first() {
        None => Ok(Value::Object(record.clone())),
        Some((step @ Accessor::Key(key), rest)) => {
            let value = record
                .get(key)
                .ok_or_else(|| ScriptError::UnknownField(step.to_string()))?;
            resolve(value, rest).cloned()
        }
        Some((step, _)) => Err(ScriptError::InvalidAccessor(step.to_string())),
    }
}

/// Same as [`resolve`] over the JSON form of `forest`, without building it
pub fn select_forest(forest: &[DisassembledChunk], path: &[Accessor]) -> Result<Value, ScriptError> {
    match path.split_first() {
        None => Ok(forest_to_value(forest)),
        Some((step @ Accessor::Index(idx), rest)) => {
            let chunk = forest
                .get(*idx)
                .ok_or_else(|| ScriptError::UnknownField(step.to_string()))?;
            select_chunk(chunk, rest)
        }
        Some((step, _)) => Err(ScriptError::UnknownField(step.to_string())),
    }
}

fn select_chunk(chunk: &DisassembledChunk, path: &[Accessor]) -> Result<Value, ScriptError> {
    match path.split_first() {
        None => Ok(chunk_to_value(chunk)),
        Some((Accessor::Key(key), rest)) if key == "id" => resolve(&Value::from(chunk.id), rest).cloned(),
        Some((Accessor::Key(key), rest)) if key == "data" => match &chunk.data {
            ChunkPayload::Children(children) => select_forest(children, rest),
            ChunkPayload::Structured(record) => select_record(record, rest),
            opaque => resolve(&opaque.to_value(), rest).cloned(),
        },
        Some((step @ Accessor::Key(_), _)) => Err(ScriptError::UnknownField(step.to_string())),
        Some((step, _)) => Err(ScriptError::InvalidAccessor(step.to_string())),
    }
}
