use log::{debug, error, warn};
use serde_json::Value;

use bcore::buf::align_up;
use bcore::prim;

use crate::chunk::disassembled::Record;
use crate::cis::Extra;
use crate::recode::{int_bounds, RecodeError, Recoder};
use crate::schema::{BitfieldEntry, Element, Field, Primitive, PrimitiveKind, Schema, Shape};

impl<'a> Recoder<'a> {
    /// Appends the encoded `record` to `out`, `pointer` being where it starts in the bundle
    pub fn encode_struct(
        &self,
        record: &Record,
        pointer: u64,
        schema: &Schema,
        extra: Extra<'_>,
        out: &mut Vec<u8>,
    ) -> Result<(), RecodeError> {
        let start = out.len();

        for field in &schema.fields {
            let field_start = out.len();
            let ptr = pointer + (field_start - start) as u64;

            self.encode_field(record, ptr, field, extra, out)?;

            if let (Some(align), false) = (field.align, matches!(field.shape, Shape::JaggedArray { .. })) {
                let end = pointer + (out.len() - start) as u64;
                out.resize(out.len() + (align_up(end, align) - end) as usize, 0);
            }
        }

        Ok(())
    }

    fn field_value(&self, record: &Record, field: &Field) -> Value {
        match record.get(&field.name) {
            Some(value) => value.clone(),
            None => {
                if !field.padding {
                    warn!(
                        "Missing value of field, default is used ({}:{})",
                        self.chunk, field.name
                    );
                }
                field.default_value()
            }
        }
    }

    fn encode_field(
        &self,
        record: &Record,
        ptr: u64,
        field: &Field,
        extra: Extra<'_>,
        out: &mut Vec<u8>,
    ) -> Result<(), RecodeError> {
        match &field.shape {
            Shape::Single(element) => {
                let value = self.field_value(record, field);
                self.encode_element(&value, ptr, field, element, extra, out)
            }

            Shape::Array { element, length } => {
                let value = self.field_value(record, field);
                let mut items = match value {
                    Value::Array(items) => items,
                    other => return Err(self.invalid(field, format!("Expected an array, got {}", other))),
                };

                let count = match self.resolve_length(field, length, record, extra) {
                    Ok(count) => count,
                    Err(RecodeError::Script { source, .. }) => {
                        debug!(
                            "Array length cannot be computed yet ({}), using {} ({}:{})",
                            source,
                            items.len(),
                            self.chunk,
                            field.name
                        );
                        items.len()
                    }
                    Err(e) => return Err(e),
                };

                if items.len() < count {
                    warn!(
                        "Array has {} of {} elements, filled with defaults ({}:{})",
                        items.len(),
                        count,
                        self.chunk,
                        field.name
                    );
                    items.resize(count, field.element_default(element));
                } else if items.len() > count {
                    error!(
                        "Array has {} elements but only {} fit, the rest is dropped ({}:{})",
                        items.len(),
                        count,
                        self.chunk,
                        field.name
                    );
                    items.truncate(count);
                }

                let start = out.len();
                for (idx, item) in items.iter().enumerate() {
                    let extra = Extra {
                        index: Some(idx),
                        root: Some(record),
                    };
                    let at = ptr + (out.len() - start) as u64;
                    self.encode_element(item, at, field, element, extra, out)?;
                }
                Ok(())
            }

            Shape::String { length } => {
                let value = self.field_value(record, field);
                let text = match &value {
                    Value::String(text) => text,
                    other => return Err(self.invalid(field, format!("Expected a string, got {}", other))),
                };

                let len = match self.resolve_length(field, length, record, extra) {
                    Ok(len) => len,
                    Err(RecodeError::Script { source, .. }) => {
                        debug!(
                            "String length cannot be computed yet ({}), using text length ({}:{})",
                            source, self.chunk, field.name
                        );
                        text.chars().count() + 1
                    }
                    Err(e) => return Err(e),
                };

                self.write_text(text, len, field, out);
                Ok(())
            }

            Shape::Bitfield { base, entries } => {
                let mut packed = 0u64;
                for (name, entry) in entries {
                    let value = self.bitfield_entry(record, field, name, entry)?;
                    packed |= value << entry.offset;
                }

                prim::write_uint(out, packed, base.width(self.settings()), base.endian)?;
                Ok(())
            }

            Shape::JaggedArray { element, size } => {
                let items = match self.field_value(record, field) {
                    Value::Array(items) => items,
                    other => return Err(self.invalid(field, format!("Expected an array, got {}", other))),
                };

                let start = out.len();
                for (idx, item) in items.iter().enumerate() {
                    let item = match item {
                        Value::Object(item) => item,
                        other => {
                            return Err(self.invalid(field, format!("Expected a structure, got {}", other)))
                        }
                    };
                    let extra = Extra {
                        index: Some(idx),
                        root: Some(record),
                    };
                    let at = ptr + (out.len() - start) as u64;
                    let element_start = out.len();

                    self.encode_struct(item, at, element, extra, out)?;

                    let produced = out.len() - element_start;
                    let value = self
                        .eval(size, item, extra)
                        .map_err(|e| self.script_error(field, e))?;
                    let predicted = self.to_size(field, &value)?;

                    if produced != predicted {
                        error!(
                            "Element {} takes {} bytes but its size says {} ({}:{})",
                            idx, produced, predicted, self.chunk, field.name
                        );
                    }

                    let mut target = predicted.max(produced);
                    if let Some(align) = field.align {
                        target = (align_up(at + target as u64, align) - at) as usize;
                    }
                    out.resize(element_start + target, 0);
                }
                Ok(())
            }
        }
    }

    fn encode_element(
        &self,
        value: &Value,
        ptr: u64,
        field: &Field,
        element: &Element,
        extra: Extra<'_>,
        out: &mut Vec<u8>,
    ) -> Result<(), RecodeError> {
        match element {
            Element::Primitive(p) => self.write_primitive(value, p, field, out),
            Element::Structure(schema) => match value {
                Value::Object(record) => self.encode_struct(record, ptr, schema, extra, out),
                other => Err(self.invalid(field, format!("Expected a structure, got {}", other))),
            },
        }
    }

    fn write_text(&self, text: &str, len: usize, field: &Field, out: &mut Vec<u8>) {
        let mut bytes: Vec<u8> = Vec::with_capacity(len);
        let mut replaced = false;

        for c in text.chars() {
            match u8::try_from(c) {
                Ok(b) => bytes.push(b),
                Err(_) => {
                    replaced = true;
                    bytes.push(b'?');
                }
            }
        }

        if replaced {
            warn!(
                "String has characters that don't fit in a byte, replaced with '?' ({}:{})",
                self.chunk, field.name
            );
        }
        if bytes.len() > len {
            warn!(
                "String is longer than {} bytes and is truncated ({}:{})",
                len, self.chunk, field.name
            );
            bytes.truncate(len);
        }

        bytes.resize(len, 0);
        out.extend_from_slice(&bytes);
    }

    fn bitfield_entry(
        &self,
        record: &Record,
        field: &Field,
        name: &str,
        entry: &BitfieldEntry,
    ) -> Result<u64, RecodeError> {
        let value = match record.get(name) {
            Some(value) => value,
            None => {
                if !entry.padding && !field.padding {
                    warn!(
                        "Cannot find value of entry in bitfield ({}:{}.{})",
                        self.chunk, field.name, name
                    );
                }
                return Ok(field.default.as_ref().and_then(Value::as_u64).unwrap_or(0).min(entry.mask()));
            }
        };

        let number = value
            .as_u64()
            .ok_or_else(|| self.invalid(field, format!("Value of bitfield entry {} must be a non negative integer, got {}", name, value)))?;

        if number > entry.mask() {
            warn!(
                "Value of entry in bitfield is bigger than maximum possible ({} > {}), {} is used ({}:{}.{})",
                number,
                entry.mask(),
                entry.mask(),
                self.chunk,
                field.name,
                name
            );
            return Ok(entry.mask());
        }

        Ok(number)
    }

    fn write_primitive(&self, value: &Value, p: &Primitive, field: &Field, out: &mut Vec<u8>) -> Result<(), RecodeError> {
        let float = match value {
            Value::Number(n) => n.as_f64(),
            Value::Null if !p.is_integer() => Some(f64::NAN),
            _ => None,
        };

        match p.kind {
            PrimitiveKind::Float | PrimitiveKind::Double => {
                let f = float.ok_or_else(|| self.invalid(field, format!("Expected a number, got {}", value)))?;
                if p.kind == PrimitiveKind::Float {
                    prim::write_f32(out, f as f32, p.endian)?;
                } else {
                    prim::write_f64(out, f, p.endian)?;
                }
                return Ok(());
            }
            _ => (),
        }

        let int = match value {
            Value::Number(n) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
                (Some(u), _, _) => i128::from(u),
                (_, Some(i), _) => i128::from(i),
                (_, _, Some(f)) => {
                    warn!(
                        "Float value {} in integer field is truncated ({}:{})",
                        f, self.chunk, field.name
                    );
                    f.trunc() as i128
                }
                _ => return Err(self.invalid(field, format!("Expected a number, got {}", value))),
            },
            other => return Err(self.invalid(field, format!("Expected a number, got {}", other))),
        };

        let width = p.width(self.settings());
        let (min, max) = int_bounds(width, p.unsigned);
        if int < min || int > max {
            warn!(
                "Value {} does not fit the field and is truncated ({}:{})",
                int, self.chunk, field.name
            );
        }

        prim::write_uint(out, int as u64, width, p.endian)?;
        Ok(())
    }
}
