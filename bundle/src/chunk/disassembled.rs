//! Structured view of a chunk tree
//!
//! In JSON a container is `{id, data: [...]}`, a documented leaf is
//! `{id, data: {field: value, ...}}` and an opaque leaf carries its payload as
//! `{id, data: {"__raw_value__": base64}}`.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key wrapping opaque payloads in JSON
pub const RAW_VALUE: &str = "__raw_value__";

/// A decoded structure, fields in schema order
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisassembledChunk {
    pub id: u32,
    pub data: ChunkPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload {
    Children(Vec<DisassembledChunk>),
    Structured(Record),
    /// Inflated payload bytes, kept verbatim
    Opaque(Vec<u8>),
}

impl DisassembledChunk {
    pub fn new(id: u32, data: ChunkPayload) -> Self {
        DisassembledChunk { id, data }
    }

    pub fn children(&self) -> Option<&[DisassembledChunk]> {
        match &self.data {
            ChunkPayload::Children(children) => Some(children),
            _ => None,
        }
    }
}

impl ChunkPayload {
    /// JSON form of the payload, what scripts get to see
    pub fn to_value(&self) -> Value {
        match self {
            ChunkPayload::Children(children) => Value::Array(children.iter().map(chunk_to_value).collect()),
            ChunkPayload::Structured(record) => Value::Object(record.clone()),
            ChunkPayload::Opaque(bytes) => {
                let mut wrapper = Map::new();
                wrapper.insert(RAW_VALUE.to_string(), Value::String(STANDARD.encode(bytes)));
                Value::Object(wrapper)
            }
        }
    }
}

pub fn chunk_to_value(chunk: &DisassembledChunk) -> Value {
    let mut obj = Map::new();
    obj.insert("id".to_string(), Value::from(chunk.id));
    obj.insert("data".to_string(), chunk.data.to_value());
    Value::Object(obj)
}

pub fn forest_to_value(chunks: &[DisassembledChunk]) -> Value {
    Value::Array(chunks.iter().map(chunk_to_value).collect())
}

impl Serialize for ChunkPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ChunkPayload::Children(children) => children.serialize(serializer),
            ChunkPayload::Structured(record) => record.serialize(serializer),
            ChunkPayload::Opaque(bytes) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(RAW_VALUE, &STANDARD.encode(bytes))?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ChunkPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Array(items) => {
                let children = items
                    .into_iter()
                    .map(serde_json::from_value)
                    .collect::<Result<Vec<DisassembledChunk>, _>>()
                    .map_err(de::Error::custom)?;
                Ok(ChunkPayload::Children(children))
            }
            Value::Object(mut record) => match record.remove(RAW_VALUE) {
                Some(Value::String(text)) => {
                    if !record.is_empty() {
                        return Err(de::Error::custom(format!("{} cannot be mixed with other fields", RAW_VALUE)));
                    }
                    STANDARD
                        .decode(text)
                        .map(ChunkPayload::Opaque)
                        .map_err(de::Error::custom)
                }
                Some(_) => Err(de::Error::custom(format!("{} must be a base64 string", RAW_VALUE))),
                None => Ok(ChunkPayload::Structured(record)),
            },
            other => Err(de::Error::custom(format!(
                "chunk data must be an array or an object, got {}",
                other
            ))),
        }
    }
}
