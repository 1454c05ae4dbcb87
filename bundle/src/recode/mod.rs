//! Schema driven structure codec
//!
//! Turns a chunk payload into a [`Record`] and back. `pointer` is the absolute
//! offset of the payload in the bundle, it only matters for field alignment.
use log::warn;
use serde_json::{Number, Value};
use thiserror::Error;

use bcore::buf::hex_id;
use bcore::prim::{self, Width};

use crate::chunk::disassembled::Record;
use crate::cis::{self, Extra, Scope, ScriptContext, ScriptError};
use crate::schema::{Field, Length, Primitive, PrimitiveKind, Schema};
use crate::settings::Settings;

pub mod decode;
pub mod encode;

#[derive(Error, Debug)]
pub enum RecodeError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("{source} ({chunk}:{field})")]
    Script {
        chunk: String,
        field: String,
        source: ScriptError,
    },
    #[error("Length must be a number, got {value} ({chunk}:{field})")]
    NonNumericLength {
        chunk: String,
        field: String,
        value: String,
    },
    #[error("Element of jagged array takes no space ({chunk}:{field})")]
    ZeroElementSize { chunk: String, field: String },
    #[error("{reason} ({chunk}:{field})")]
    InvalidValue {
        chunk: String,
        field: String,
        reason: String,
    },
}

pub fn chunk_label(id: Option<u32>) -> String {
    id.map_or_else(|| "unknown".to_string(), hex_id)
}

/// Decodes `data` with `schema`, the chunk id and tree position come from `scope`
pub fn decode(data: &[u8], pointer: u64, schema: &Schema, scope: &Scope) -> Result<Record, RecodeError> {
    let recoder = Recoder::new(scope);
    let decoded = recoder.decode_struct(data, pointer, schema, Extra::default())?;
    let used = decoded.used;

    if !decoded.truncated && used < data.len() && !scope.settings.suppress_extra_data_warning {
        warn!(
            "Provided schema requires smaller data buffer than provided ({}, {} bytes left)",
            recoder.chunk,
            data.len() - used
        );
    }

    Ok(decoded.record)
}

pub fn encode(record: &Record, pointer: u64, schema: &Schema, scope: &Scope) -> Result<Vec<u8>, RecodeError> {
    let mut out = Vec::new();
    Recoder::new(scope).encode_struct(record, pointer, schema, Extra::default(), &mut out)?;
    Ok(out)
}

/// Per chunk recoding state
pub struct Recoder<'a> {
    scope: &'a Scope<'a>,
    chunk: String,
}

impl<'a> Recoder<'a> {
    pub fn new(scope: &'a Scope<'a>) -> Self {
        Recoder {
            scope,
            chunk: chunk_label(scope.chunk_id),
        }
    }

    fn settings(&self) -> &Settings {
        self.scope.settings
    }

    fn eval(&self, script: &str, current: &Record, extra: Extra<'_>) -> Result<Value, ScriptError> {
        cis::execute(script, &ScriptContext::new(current, self.scope, extra))
    }

    fn script_error(&self, field: &Field, source: ScriptError) -> RecodeError {
        RecodeError::Script {
            chunk: self.chunk.clone(),
            field: field.name.clone(),
            source,
        }
    }

    fn invalid(&self, field: &Field, reason: impl Into<String>) -> RecodeError {
        RecodeError::InvalidValue {
            chunk: self.chunk.clone(),
            field: field.name.clone(),
            reason: reason.into(),
        }
    }

    fn resolve_length(
        &self,
        field: &Field,
        length: &Length,
        current: &Record,
        extra: Extra<'_>,
    ) -> Result<usize, RecodeError> {
        match length {
            Length::Fixed(n) => Ok(*n),
            Length::Script(script) => {
                let value = self
                    .eval(script, current, extra)
                    .map_err(|e| self.script_error(field, e))?;
                self.to_size(field, &value)
            }
        }
    }

    /// Byte or element count out of a script result
    fn to_size(&self, field: &Field, value: &Value) -> Result<usize, RecodeError> {
        let n = match value {
            Value::Number(n) => n,
            other => {
                return Err(RecodeError::NonNumericLength {
                    chunk: self.chunk.clone(),
                    field: field.name.clone(),
                    value: other.to_string(),
                })
            }
        };

        if let Some(u) = n.as_u64() {
            return usize::try_from(u).map_err(|_| self.invalid(field, "Length is too big"));
        }

        match n.as_f64() {
            Some(f) if f >= 0.0 && f.is_finite() => {
                warn!("Length have float value ({}:{})", self.chunk, field.name);
                Ok(f.floor() as usize)
            }
            _ => Err(self.invalid(field, format!("Length must not be negative, got {}", n))),
        }
    }
}

pub(crate) fn read_primitive(buf: &[u8], p: &Primitive, settings: &Settings) -> std::io::Result<Value> {
    Ok(match p.kind {
        PrimitiveKind::Float => float_value(f64::from(prim::read_f32(buf, p.endian)?)),
        PrimitiveKind::Double => float_value(prim::read_f64(buf, p.endian)?),
        _ if p.unsigned => Value::from(prim::read_uint(buf, p.width(settings), p.endian)?),
        _ => Value::from(prim::read_int(buf, p.width(settings), p.endian)?),
    })
}

/// NaN and infinities have no JSON form and come out as null
fn float_value(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// Range of an integer field
pub(crate) fn int_bounds(width: Width, unsigned: bool) -> (i128, i128) {
    if unsigned {
        (0, i128::from(width.max_unsigned()))
    } else {
        let half = 1i128 << (width.bits() - 1);
        (-half, half - 1)
    }
}
