use log::{error, warn};
use serde_json::Value;

use bcore::buf::{align_up, read_ascii};
use bcore::prim;

use crate::chunk::disassembled::Record;
use crate::cis::Extra;
use crate::recode::{read_primitive, RecodeError, Recoder};
use crate::schema::{element_size, Element, Field, Schema, Shape};

/// Values a field adds to the record and the bytes it took
type Decoded = (Vec<(String, Value)>, usize);

/// Outcome of decoding one structure
#[derive(Debug)]
pub struct DecodedStruct {
    pub record: Record,
    /// Bytes of the input the record covers
    pub used: usize,
    /// The data ran out before the last field
    pub truncated: bool,
}

impl<'a> Recoder<'a> {
    /// Decodes fields in order until the schema or the data runs out.
    ///
    /// A short buffer keeps the fields read so far and flags the result as
    /// `truncated`.
    pub fn decode_struct(
        &self,
        data: &[u8],
        pointer: u64,
        schema: &Schema,
        extra: Extra<'_>,
    ) -> Result<DecodedStruct, RecodeError> {
        let mut result = Record::new();
        let mut offset = 0usize;
        let mut truncated = false;

        for field in &schema.fields {
            let rest = &data[offset..];
            let ptr = pointer + offset as u64;

            let (entries, mut used) = match self.decode_field(rest, ptr, field, &result, extra)? {
                Some(decoded) => decoded,
                None => {
                    error!(
                        "Provided schema requires bigger data buffer than provided ({}:{})",
                        self.chunk, field.name
                    );
                    truncated = true;
                    break;
                }
            };

            if let (Some(align), false) = (field.align, matches!(field.shape, Shape::JaggedArray { .. })) {
                let end = ptr + used as u64;
                used += (align_up(end, align) - end) as usize;
            }
            offset = (offset + used).min(data.len());

            if !field.padding || self.settings().export_paddings {
                result.extend(entries);
            }
        }

        Ok(DecodedStruct {
            record: result,
            used: offset,
            truncated,
        })
    }

    fn decode_field(
        &self,
        rest: &[u8],
        ptr: u64,
        field: &Field,
        result: &Record,
        extra: Extra<'_>,
    ) -> Result<Option<Decoded>, RecodeError> {
        let single = |value: Value, used: usize| Some((vec![(field.name.clone(), value)], used));

        match &field.shape {
            Shape::Single(element) => Ok(self
                .decode_element(rest, ptr, element, extra)?
                .and_then(|(value, used)| single(value, used))),

            Shape::Array { element, length } => {
                let count = self.resolve_length(field, length, result, extra)?;

                if let Some(size) = element_size(element, self.settings()) {
                    if size.checked_mul(count).map_or(true, |total| total > rest.len()) {
                        return Ok(None);
                    }
                }

                let mut items = Vec::with_capacity(count.min(rest.len()));
                let mut used = 0usize;
                for idx in 0..count {
                    let extra = Extra {
                        index: Some(idx),
                        root: Some(result),
                    };
                    match self.decode_element(&rest[used..], ptr + used as u64, element, extra)? {
                        Some((value, n)) => {
                            items.push(value);
                            used += n;
                        }
                        None => return Ok(None),
                    }
                }

                Ok(single(Value::Array(items), used))
            }

            Shape::String { length } => {
                let len = self.resolve_length(field, length, result, extra)?;
                if len > rest.len() {
                    return Ok(None);
                }

                Ok(single(Value::String(read_ascii(&rest[..len])), len))
            }

            Shape::Bitfield { base, entries } => {
                let width = base.width(self.settings());
                if width.bytes() > rest.len() {
                    return Ok(None);
                }

                let raw = prim::read_uint(rest, width, base.endian)?;
                let values = entries
                    .iter()
                    .filter(|(_, entry)| !entry.padding)
                    .map(|(name, entry)| (name.clone(), Value::from((raw >> entry.offset) & entry.mask())))
                    .collect();

                Ok(Some((values, width.bytes())))
            }

            Shape::JaggedArray { element, size } => {
                let items = self.decode_jagged(rest, ptr, field, element, size, result)?;
                Ok(single(Value::Array(items), rest.len()))
            }
        }
    }

    fn decode_element(
        &self,
        rest: &[u8],
        ptr: u64,
        element: &Element,
        extra: Extra<'_>,
    ) -> Result<Option<(Value, usize)>, RecodeError> {
        match element {
            Element::Primitive(p) => {
                let size = p.size(self.settings());
                if size > rest.len() {
                    return Ok(None);
                }
                Ok(Some((read_primitive(rest, p, self.settings())?, size)))
            }
            Element::Structure(schema) => {
                if schema.static_size(self.settings()).map_or(false, |size| size > rest.len()) {
                    return Ok(None);
                }
                let decoded = self.decode_struct(rest, ptr, schema, extra)?;
                if decoded.truncated {
                    return Ok(None);
                }
                Ok(Some((Value::Object(decoded.record), decoded.used)))
            }
        }
    }

    /// Decodes structures until `rest` is used up, each one reporting its own size
    fn decode_jagged(
        &self,
        rest: &[u8],
        ptr: u64,
        field: &Field,
        element: &Schema,
        size: &str,
        result: &Record,
    ) -> Result<Vec<Value>, RecodeError> {
        let mut items = Vec::new();
        let mut offset = 0usize;

        while offset < rest.len() {
            let extra = Extra {
                index: Some(items.len()),
                root: Some(result),
            };
            let at = ptr + offset as u64;

            let record = self.decode_struct(&rest[offset..], at, element, extra)?.record;

            let value = self
                .eval(size, &record, extra)
                .map_err(|e| self.script_error(field, e))?;
            let mut taken = self.to_size(field, &value)?;

            if let Some(align) = field.align {
                taken = (align_up(at + taken as u64, align) - at) as usize;
            }
            if taken == 0 {
                return Err(RecodeError::ZeroElementSize {
                    chunk: self.chunk.clone(),
                    field: field.name.clone(),
                });
            }
            if taken > rest.len() - offset {
                warn!(
                    "Element of jagged array runs past the end of data ({}:{})",
                    self.chunk, field.name
                );
                taken = rest.len() - offset;
            }

            items.push(Value::Object(record));
            offset += taken;
        }

        Ok(items)
    }
}

#[cfg(test)]
mod test_decode {
    use crate::chunk::disassembled::Record;
    use crate::cis::Scope;
    use crate::recode::{decode, RecodeError};
    use crate::schema::Schema;
    use crate::settings::Settings;
    use serde_json::{json, Value};

    fn schema(value: Value) -> Schema {
        match value {
            Value::Object(map) => Schema::from_json(&map, "test").unwrap(),
            _ => panic!("Schema must be an object"),
        }
    }

    fn run(layout: Value, data: &[u8]) -> Record {
        run_with(layout, data, 0, &Settings::default())
    }

    fn run_with(layout: Value, data: &[u8], pointer: u64, settings: &Settings) -> Record {
        let scope = Scope::detached(settings);
        decode(data, pointer, &schema(layout), &scope).unwrap()
    }

    #[test]
    fn scalar_primitive() {
        let record = run(
            json!({"v": {"type": "int32", "endian": "little", "unsigned": true}}),
            &[0x01, 0x00, 0x00, 0x00],
        );
        assert_eq!(Value::Object(record), json!({"v": 1}));
    }

    #[test]
    fn signed_and_big_endian() {
        let record = run(
            json!({
                "a": {"type": "int16", "endian": "big"},
                "b": {"type": "int8"},
                "c": {"type": "int64", "unsigned": true}
            }),
            &[0xFF, 0xFE, 0x80, 1, 0, 0, 0, 0, 0, 0, 0],
        );
        assert_eq!(Value::Object(record), json!({"a": -2, "b": -128, "c": 1}));
    }

    #[test]
    fn floats() {
        let mut data = 1.5f32.to_le_bytes().to_vec();
        data.extend_from_slice(&(-0.25f64).to_be_bytes());
        data.extend_from_slice(&f32::NAN.to_le_bytes());

        let record = run(
            json!({
                "f": {"type": "float"},
                "d": {"type": "double", "endian": "big"},
                "n": {"type": "float"}
            }),
            &data,
        );
        assert_eq!(Value::Object(record), json!({"f": 1.5, "d": -0.25, "n": null}));
    }

    #[test]
    fn pointer_width() {
        let layout = json!({"p": {"type": "pointer", "unsigned": true}});
        let data = [1, 0, 0, 0, 2, 0, 0, 0];

        assert_eq!(Value::Object(run(layout.clone(), &data)), json!({"p": 1}));

        let wide = Settings {
            pointers_are_64_bits: true,
            ..Settings::default()
        };
        assert_eq!(
            Value::Object(run_with(layout, &data, 0, &wide)),
            json!({"p": 0x0000_0002_0000_0001u64})
        );
    }

    #[test]
    fn bitfield() {
        let record = run(
            json!({"flags": {
                "type": "int8",
                "unsigned": true,
                "bitfield": {"a": {"offset": 0, "width": 4}, "b": {"offset": 4, "width": 4}}
            }}),
            &[0x3C],
        );
        assert_eq!(Value::Object(record), json!({"a": 0xC, "b": 0x3}));
    }

    #[test]
    fn bitfield_padding_entry() {
        let record = run(
            json!({"flags": {
                "type": "int16",
                "unsigned": true,
                "bitfield": {
                    "low": {"offset": 0, "width": 3},
                    "skip": {"offset": 3, "width": 5, "padding": true},
                    "high": {"offset": 8, "width": 8}
                }
            }}),
            &[0xFF, 0x12],
        );
        assert_eq!(Value::Object(record), json!({"low": 7, "high": 0x12}));
    }

    #[test]
    fn fixed_array() {
        let record = run(
            json!({"v": {"type": "int16", "endian": "little", "length": 2}}),
            &[0x01, 0x00, 0x02, 0x00],
        );
        assert_eq!(Value::Object(record), json!({"v": [1, 2]}));
    }

    #[test]
    fn script_length() {
        let record = run(
            json!({
                "n": {"type": "int8", "unsigned": true},
                "items": {"type": "int8", "unsigned": true, "length": "$current/.n"}
            }),
            &[3, 7, 8, 9],
        );
        assert_eq!(Value::Object(record), json!({"n": 3, "items": [7, 8, 9]}));
    }

    #[test]
    fn strings() {
        let record = run(
            json!({
                "name": {"type": "int8", "modifier": "string", "length": 6},
                "tag": {"type": "int8", "modifier": "string", "length": 3}
            }),
            b"abc\0\0\0xyz",
        );
        assert_eq!(Value::Object(record), json!({"name": "abc", "tag": "xyz"}));
    }

    #[test]
    fn padding_fields() {
        let layout = json!({
            "a": {"type": "int8"},
            "pad": {"type": "int8", "length": 3, "modifier": "padding"},
            "b": {"type": "int8"}
        });
        let data = [1, 0, 0, 0, 2];

        assert_eq!(Value::Object(run(layout.clone(), &data)), json!({"a": 1, "b": 2}));

        let export = Settings {
            export_paddings: true,
            ..Settings::default()
        };
        assert_eq!(
            Value::Object(run_with(layout, &data, 0, &export)),
            json!({"a": 1, "pad": [0, 0, 0], "b": 2})
        );
    }

    #[test]
    fn alignment() {
        let layout = json!({
            "a": {"type": "int8", "align": 4},
            "b": {"type": "int16", "align": 4},
            "c": {"type": "int8"}
        });
        // Payload starts at offset 2 of the bundle: a at 2, b at 4, c at 8
        let data = [1, 0xEE, 2, 0, 0xEE, 0xEE, 3];

        let record = run_with(layout, &data, 2, &Settings::default());
        assert_eq!(Value::Object(record), json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn nested_structures() {
        let record = run(
            json!({
                "count": {"type": "int8"},
                "points": {
                    "type": "structure",
                    "length": "$current/.count",
                    "structure": {
                        "x": {"type": "int8"},
                        "tag": {"type": "int8", "length": "$root/.count"}
                    }
                }
            }),
            &[2, 1, 10, 11, 2, 20, 21],
        );
        assert_eq!(
            Value::Object(record),
            json!({"count": 2, "points": [{"x": 1, "tag": [10, 11]}, {"x": 2, "tag": [20, 21]}]})
        );
    }

    #[test]
    fn jagged_array() {
        let layout = json!({
            "entries": {
                "type": "structure",
                "modifier": "jagged_array",
                "length": "$current/.len",
                "structure": {
                    "len": {"type": "int8", "unsigned": true},
                    "payload": {
                        "type": "int8",
                        "length": "$math:a=$current/.len,b=1,action=\"minus\"/"
                    }
                }
            }
        });

        let record = run(layout, &[3, 1, 2, 2, 9]);
        assert_eq!(
            Value::Object(record),
            json!({"entries": [{"len": 3, "payload": [1, 2]}, {"len": 2, "payload": [9]}]})
        );
    }

    #[test]
    fn short_buffer_stops() {
        let record = run(
            json!({"a": {"type": "int8"}, "b": {"type": "int32"}, "c": {"type": "int8"}}),
            &[1, 2, 3],
        );
        assert_eq!(Value::Object(record), json!({"a": 1}));
    }

    #[test]
    fn short_buffer_in_dynamic_array() {
        let layout = json!({
            "n": {"type": "int32", "unsigned": true},
            "items": {
                "type": "structure",
                "length": "$current/.n",
                "structure": {
                    "v": {"type": "int8", "unsigned": true},
                    "w": {"type": "int8", "length": "$current/.v"}
                }
            }
        });

        assert_eq!(Value::Object(run(layout.clone(), &[5, 0, 0, 0])), json!({"n": 5}));

        // Element count far beyond the data must not build empty records
        assert_eq!(
            Value::Object(run(layout.clone(), &[0xFF, 0xFF, 0xFF, 0xFF])),
            json!({"n": 0xFFFF_FFFFu32})
        );

        // Two complete elements, the third one is cut
        assert_eq!(
            Value::Object(run(layout, &[3, 0, 0, 0, 1, 7, 0, 2, 9])),
            json!({"n": 3})
        );
    }

    #[test]
    fn short_buffer_in_nested_structure() {
        let layout = json!({
            "head": {
                "type": "structure",
                "structure": {
                    "len": {"type": "int8", "unsigned": true},
                    "body": {"type": "int8", "length": "$current/.len"}
                }
            },
            "tail": {"type": "int8"}
        });

        // Whole payload is there
        assert_eq!(
            Value::Object(run(layout.clone(), &[2, 5, 6, 7])),
            json!({"head": {"len": 2, "body": [5, 6]}, "tail": 7})
        );

        // Body is cut, neither head nor tail make it into the record
        assert_eq!(Value::Object(run(layout, &[4, 5, 6])), json!({}));
    }

    #[test]
    fn extra_data_is_not_fatal() {
        let record = run(json!({"a": {"type": "int8"}}), &[1, 2, 3]);
        assert_eq!(Value::Object(record), json!({"a": 1}));
    }

    #[test]
    fn script_errors() {
        let settings = Settings::default();
        let scope = Scope::detached(&settings);

        let missing = schema(json!({"a": {"type": "int8", "length": "$current/.missing"}}));
        match decode(&[1], 0, &missing, &scope) {
            Err(RecodeError::Script { field, source, .. }) => {
                assert_eq!(field, "a");
                assert!(source.to_string().contains("\"missing\""));
            }
            other => panic!("Unexpected result {:?}", other),
        }

        let text = schema(json!({
            "s": {"type": "int8", "modifier": "string", "length": 1},
            "a": {"type": "int8", "length": "$current/.s"}
        }));
        assert!(matches!(
            decode(b"x\x01", 0, &text, &scope),
            Err(RecodeError::NonNumericLength { .. })
        ));
    }
}
