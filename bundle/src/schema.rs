//! Field layouts of documented chunks
//!
//! A schema is a JSON object mapping field names to field descriptions, in
//! order. Descriptions are checked once when they are loaded and turned into
//! a [`Shape`] per field, so the codec only ever sees valid combinations.
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use bcore::prim::{Endian, Width};

use crate::chunk::disassembled::Record;
use crate::settings::Settings;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("{reason} ({chunk}:{field})")]
    Invalid {
        chunk: String,
        field: String,
        reason: String,
    },
    #[error("Malformed field description ({chunk}:{field}): {source}")]
    Malformed {
        chunk: String,
        field: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    /// 32 or 64 bit integer, depending on the settings
    Pointer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Primitive {
    pub kind: PrimitiveKind,
    pub endian: Endian,
    pub unsigned: bool,
}

impl Primitive {
    pub fn width(&self, settings: &Settings) -> Width {
        match self.kind {
            PrimitiveKind::Int8 => Width::W8,
            PrimitiveKind::Int16 => Width::W16,
            PrimitiveKind::Int32 | PrimitiveKind::Float => Width::W32,
            PrimitiveKind::Int64 | PrimitiveKind::Double => Width::W64,
            PrimitiveKind::Pointer if settings.pointers_are_64_bits => Width::W64,
            PrimitiveKind::Pointer => Width::W32,
        }
    }

    pub fn size(&self, settings: &Settings) -> usize {
        self.width(settings).bytes()
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self.kind, PrimitiveKind::Float | PrimitiveKind::Double)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Length {
    Fixed(usize),
    /// Evaluated against the record decoded so far
    Script(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitfieldEntry {
    pub offset: u32,
    pub width: u32,
    pub padding: bool,
}

impl BitfieldEntry {
    pub fn mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Primitive(Primitive),
    Structure(Schema),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Single(Element),
    Array { element: Element, length: Length },
    /// int8 array read as zero terminated text
    String { length: Length },
    /// One integer split into named bit ranges, flattened into the record
    Bitfield {
        base: Primitive,
        entries: Vec<(String, BitfieldEntry)>,
    },
    /// Structures back to back, `size` tells how many bytes each one took
    JaggedArray { element: Schema, size: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub shape: Shape,
    pub align: Option<u64>,
    pub padding: bool,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    pub fields: Vec<Field>,
}

#[derive(Deserialize)]
struct FieldDef {
    #[serde(rename = "type")]
    typ: String,
    #[serde(default)]
    endian: Option<String>,
    #[serde(default)]
    unsigned: bool,
    #[serde(default)]
    modifier: Option<String>,
    #[serde(default)]
    structure: Option<Map<String, Value>>,
    #[serde(default)]
    length: Option<LengthDef>,
    #[serde(default)]
    align: Option<u64>,
    #[serde(default)]
    bitfield: Option<Map<String, Value>>,
    #[serde(default)]
    default: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LengthDef {
    Fixed(u64),
    Script(String),
}

#[derive(Deserialize)]
struct BitfieldDef {
    offset: i64,
    width: i64,
    #[serde(default)]
    padding: bool,
}

#[derive(PartialEq)]
enum Modifier {
    None,
    String,
    Padding,
    JaggedArray,
}

impl Schema {
    /// Parses and checks a schema, `chunk` only labels errors
    pub fn from_json(fields: &Map<String, Value>, chunk: &str) -> Result<Schema, SchemaError> {
        Schema::parse(fields, chunk, "")
    }

    fn parse(fields: &Map<String, Value>, chunk: &str, prefix: &str) -> Result<Schema, SchemaError> {
        let mut out = Vec::with_capacity(fields.len());

        for (name, raw) in fields {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };

            let def: FieldDef = serde_json::from_value(raw.clone()).map_err(|source| SchemaError::Malformed {
                chunk: chunk.to_string(),
                field: path.clone(),
                source,
            })?;

            out.push(parse_field(name, def, chunk, &path)?);
        }

        Ok(Schema { fields: out })
    }

    /// Byte size of the structure when it does not depend on data or position
    pub fn static_size(&self, settings: &Settings) -> Option<usize> {
        let mut total = 0usize;

        for field in &self.fields {
            if field.align.map_or(false, |a| a > 1) {
                return None;
            }

            let size = match &field.shape {
                Shape::Single(element) => element_size(element, settings)?,
                Shape::Array {
                    element,
                    length: Length::Fixed(n),
                } => element_size(element, settings)?.checked_mul(*n)?,
                Shape::String { length: Length::Fixed(n) } => *n,
                Shape::Bitfield { base, .. } => base.size(settings),
                Shape::Array { .. } | Shape::String { .. } | Shape::JaggedArray { .. } => return None,
            };

            total = total.checked_add(size)?;
        }

        Some(total)
    }

    /// Smallest record matching the layout, padding fields left out
    pub fn default_record(&self) -> Record {
        let mut record = Record::new();

        for field in self.fields.iter().filter(|f| !f.padding) {
            match &field.shape {
                Shape::Bitfield { entries, .. } => {
                    for (name, _) in entries.iter().filter(|(_, e)| !e.padding) {
                        record.insert(name.clone(), field.default.clone().unwrap_or_else(|| Value::from(0)));
                    }
                }
                _ => {
                    record.insert(field.name.clone(), field.default_value());
                }
            }
        }

        record
    }
}

pub fn element_size(element: &Element, settings: &Settings) -> Option<usize> {
    match element {
        Element::Primitive(prim) => Some(prim.size(settings)),
        Element::Structure(schema) => schema.static_size(settings),
    }
}

impl Field {
    /// Value used when a record lacks this field
    pub fn default_value(&self) -> Value {
        match &self.shape {
            Shape::Single(element) => self.element_default(element),
            Shape::Array {
                element,
                length: Length::Fixed(n),
            } => Value::Array(vec![self.element_default(element); *n]),
            Shape::Array { .. } | Shape::JaggedArray { .. } => Value::Array(Vec::new()),
            Shape::String { .. } => self.default.clone().unwrap_or_else(|| Value::String(String::new())),
            Shape::Bitfield { .. } => self.default.clone().unwrap_or_else(|| Value::from(0)),
        }
    }

    /// Default of a single array element
    pub fn element_default(&self, element: &Element) -> Value {
        match (&self.default, element) {
            (Some(value), _) => value.clone(),
            (None, Element::Primitive(_)) => Value::from(0),
            (None, Element::Structure(schema)) => Value::Object(schema.default_record()),
        }
    }
}

fn parse_field(name: &str, def: FieldDef, chunk: &str, path: &str) -> Result<Field, SchemaError> {
    let invalid = |reason: &str| SchemaError::Invalid {
        chunk: chunk.to_string(),
        field: path.to_string(),
        reason: reason.to_string(),
    };

    let modifier = match def.modifier.as_deref() {
        None => Modifier::None,
        Some("string") => Modifier::String,
        Some("padding") => Modifier::Padding,
        Some("jagged_array") => Modifier::JaggedArray,
        Some(_) => return Err(invalid("Unknown modifier was specified")),
    };

    let endian = match def.endian.as_deref() {
        None | Some("little") => Endian::Little,
        Some("big") => Endian::Big,
        Some(other) => return Err(invalid(&format!("Unknown endian was specified ({})", other))),
    };

    let kind = match def.typ.as_str() {
        "int8" => Some(PrimitiveKind::Int8),
        "int16" => Some(PrimitiveKind::Int16),
        "int32" => Some(PrimitiveKind::Int32),
        "int64" => Some(PrimitiveKind::Int64),
        "float" => Some(PrimitiveKind::Float),
        "double" => Some(PrimitiveKind::Double),
        "pointer" => Some(PrimitiveKind::Pointer),
        "structure" => None,
        other => return Err(invalid(&format!("Unknown type was passed ({})", other))),
    };

    if def.align == Some(0) {
        return Err(invalid("Alignment must be a positive integer"));
    }

    let length = def.length.map(|l| match l {
        LengthDef::Fixed(n) => usize::try_from(n).map(Length::Fixed).map_err(|_| invalid("Length is too big")),
        LengthDef::Script(s) => Ok(Length::Script(s)),
    });
    let length = length.transpose()?;

    let element = match kind {
        Some(kind) => {
            let prim = Primitive {
                kind,
                endian,
                unsigned: def.unsigned,
            };
            if prim.unsigned && !prim.is_integer() {
                return Err(invalid("Passed data type cannot be interpreted as unsigned"));
            }
            Element::Primitive(prim)
        }
        None => {
            let layout = def
                .structure
                .as_ref()
                .ok_or_else(|| invalid("Field specified as structure but no layout present"))?;
            Element::Structure(Schema::parse(layout, chunk, path)?)
        }
    };

    let shape = if let Some(bitfield) = &def.bitfield {
        if length.is_some() {
            return Err(invalid("Bitfield cannot be used in array"));
        }
        if modifier != Modifier::None && modifier != Modifier::Padding {
            return Err(invalid("Only \"padding\" modifier allowed when using bitfield"));
        }
        let base = match element {
            Element::Primitive(prim) if prim.is_integer() => prim,
            _ => return Err(invalid("Bitfield can be applied only to integer field")),
        };
        if !base.unsigned {
            return Err(invalid("Bitfield can be applied only to unsigned integer field"));
        }

        Shape::Bitfield {
            base,
            entries: parse_bitfield(bitfield, base, chunk, path)?,
        }
    } else {
        match modifier {
            Modifier::String => {
                match element {
                    Element::Primitive(Primitive {
                        kind: PrimitiveKind::Int8,
                        ..
                    }) => (),
                    _ => return Err(invalid("String modifier can be applied only to int8")),
                }
                Shape::String {
                    length: length.ok_or_else(|| invalid("Length of string must be specified"))?,
                }
            }
            Modifier::JaggedArray => {
                let element = match element {
                    Element::Structure(schema) => schema,
                    _ => return Err(invalid("Jagged array modifier can only be applied to structure")),
                };
                match length {
                    Some(Length::Script(size)) => Shape::JaggedArray { element, size },
                    _ => return Err(invalid("Size of array's element must be specified as script")),
                }
            }
            Modifier::None | Modifier::Padding => match length {
                Some(length) => Shape::Array { element, length },
                None => Shape::Single(element),
            },
        }
    };

    Ok(Field {
        name: name.to_string(),
        shape,
        align: def.align,
        padding: modifier == Modifier::Padding,
        default: def.default,
    })
}

fn parse_bitfield(
    defs: &Map<String, Value>,
    base: Primitive,
    chunk: &str,
    path: &str,
) -> Result<Vec<(String, BitfieldEntry)>, SchemaError> {
    // Bitfields are integers, the pointer width doesn't matter for the check
    let bits = match base.kind {
        PrimitiveKind::Pointer => 64,
        _ => base.width(&Settings::default()).bits(),
    };

    let mut used = 0u64;
    let mut entries = Vec::with_capacity(defs.len());

    for (name, raw) in defs {
        let entry_path = format!("{}.{}", path, name);
        let invalid = |reason: &str| SchemaError::Invalid {
            chunk: chunk.to_string(),
            field: entry_path.clone(),
            reason: reason.to_string(),
        };

        let def: BitfieldDef = serde_json::from_value(raw.clone()).map_err(|source| SchemaError::Malformed {
            chunk: chunk.to_string(),
            field: entry_path.clone(),
            source,
        })?;

        if def.offset < 0 {
            return Err(invalid("Offset of bitfield's entry must not be negative"));
        }
        if def.width < 1 {
            return Err(invalid("Width of bitfield's entry must be positive integer"));
        }
        if def.offset + def.width > i64::from(bits) {
            return Err(invalid("Entry of bitfield must be located inside bounds of parent type"));
        }

        let entry = BitfieldEntry {
            offset: def.offset as u32,
            width: def.width as u32,
            padding: def.padding,
        };

        let placed = entry.mask() << entry.offset;
        if used & placed != 0 {
            return Err(invalid("Entries of bitfield must not overlap"));
        }
        used |= placed;

        entries.push((name.clone(), entry));
    }

    Ok(entries)
}

#[cfg(test)]
mod test_schema {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<Schema, SchemaError> {
        match value {
            Value::Object(map) => Schema::from_json(&map, "0x00000001"),
            _ => panic!("Schema must be an object"),
        }
    }

    fn reason(err: SchemaError) -> String {
        match err {
            SchemaError::Invalid { reason, .. } => reason,
            SchemaError::Malformed { source, .. } => panic!("Unexpected malformed: {}", source),
        }
    }

    #[test]
    fn scalar_field() {
        let schema = parse(json!({"v": {"type": "int32", "endian": "little", "unsigned": true}})).unwrap();

        assert_eq!(schema.fields.len(), 1);
        assert_eq!(
            schema.fields[0].shape,
            Shape::Single(Element::Primitive(Primitive {
                kind: PrimitiveKind::Int32,
                endian: Endian::Little,
                unsigned: true,
            }))
        );
        assert_eq!(schema.static_size(&Settings::default()), Some(4));
    }

    #[test]
    fn field_order_kept() {
        let schema = parse(json!({
            "z": {"type": "int8"},
            "a": {"type": "int8"},
            "m": {"type": "int8"}
        }))
        .unwrap();

        let names: Vec<_> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn pointer_width() {
        let schema = parse(json!({"p": {"type": "pointer", "length": 2}})).unwrap();

        let wide = Settings {
            pointers_are_64_bits: true,
            ..Settings::default()
        };
        assert_eq!(schema.static_size(&Settings::default()), Some(8));
        assert_eq!(schema.static_size(&wide), Some(16));
    }

    #[test]
    fn dynamic_sizes() {
        let schema = parse(json!({
            "n": {"type": "int8"},
            "s": {"type": "int8", "length": "$current/.n"}
        }))
        .unwrap();
        assert_eq!(schema.static_size(&Settings::default()), None);

        let aligned = parse(json!({"n": {"type": "int8", "align": 4}})).unwrap();
        assert_eq!(aligned.static_size(&Settings::default()), None);
    }

    #[test]
    fn nested_structure() {
        let schema = parse(json!({
            "inner": {
                "type": "structure",
                "length": 3,
                "structure": {"a": {"type": "int16"}, "b": {"type": "double"}}
            }
        }))
        .unwrap();

        assert_eq!(schema.static_size(&Settings::default()), Some(30));
    }

    #[test]
    fn bitfield_entries() {
        let schema = parse(json!({
            "flags": {
                "type": "int8",
                "unsigned": true,
                "bitfield": {"a": {"offset": 0, "width": 4}, "b": {"offset": 4, "width": 4}}
            }
        }))
        .unwrap();

        match &schema.fields[0].shape {
            Shape::Bitfield { entries, .. } => {
                assert_eq!(entries[0].0, "a");
                assert_eq!(entries[0].1.mask(), 0xF);
                assert_eq!(entries[1].1.offset, 4);
            }
            other => panic!("Expected bitfield, got {:?}", other),
        }
    }

    #[test]
    fn bitfield_rules() {
        let signed = parse(json!({"f": {"type": "int8", "bitfield": {"a": {"offset": 0, "width": 1}}}}));
        assert_eq!(reason(signed.unwrap_err()), "Bitfield can be applied only to unsigned integer field");

        let float = parse(json!({"f": {"type": "float", "bitfield": {"a": {"offset": 0, "width": 1}}}}));
        assert_eq!(reason(float.unwrap_err()), "Bitfield can be applied only to integer field");

        let array = parse(json!({"f": {"type": "int8", "unsigned": true, "length": 2,
            "bitfield": {"a": {"offset": 0, "width": 1}}}}));
        assert_eq!(reason(array.unwrap_err()), "Bitfield cannot be used in array");

        let string = parse(json!({"f": {"type": "int8", "unsigned": true, "modifier": "string",
            "bitfield": {"a": {"offset": 0, "width": 1}}}}));
        assert_eq!(reason(string.unwrap_err()), "Only \"padding\" modifier allowed when using bitfield");

        let outside = parse(json!({"f": {"type": "int8", "unsigned": true,
            "bitfield": {"a": {"offset": 6, "width": 4}}}}));
        assert_eq!(
            reason(outside.unwrap_err()),
            "Entry of bitfield must be located inside bounds of parent type"
        );

        let overlap = parse(json!({"f": {"type": "int16", "unsigned": true,
            "bitfield": {"a": {"offset": 0, "width": 4}, "b": {"offset": 3, "width": 2}}}}));
        assert_eq!(reason(overlap.unwrap_err()), "Entries of bitfield must not overlap");
    }

    #[test]
    fn modifier_rules() {
        let unknown = parse(json!({"f": {"type": "int8", "modifier": "blob"}}));
        assert_eq!(reason(unknown.unwrap_err()), "Unknown modifier was specified");

        let string = parse(json!({"f": {"type": "int16", "modifier": "string", "length": 4}}));
        assert_eq!(reason(string.unwrap_err()), "String modifier can be applied only to int8");

        let no_len = parse(json!({"f": {"type": "int8", "modifier": "string"}}));
        assert_eq!(reason(no_len.unwrap_err()), "Length of string must be specified");

        let jagged = parse(json!({"f": {"type": "int8", "modifier": "jagged_array", "length": "$current/.n"}}));
        assert_eq!(
            reason(jagged.unwrap_err()),
            "Jagged array modifier can only be applied to structure"
        );

        let fixed = parse(json!({"f": {"type": "structure", "modifier": "jagged_array", "length": 3,
            "structure": {"a": {"type": "int8"}}}}));
        assert_eq!(
            reason(fixed.unwrap_err()),
            "Size of array's element must be specified as script"
        );

        let layout = parse(json!({"f": {"type": "structure"}}));
        assert_eq!(
            reason(layout.unwrap_err()),
            "Field specified as structure but no layout present"
        );

        let unsigned = parse(json!({"f": {"type": "double", "unsigned": true}}));
        assert_eq!(
            reason(unsigned.unwrap_err()),
            "Passed data type cannot be interpreted as unsigned"
        );
    }

    #[test]
    fn error_names_nested_field() {
        let err = parse(json!({"outer": {"type": "structure", "structure": {"inner": {"type": "int7"}}}})).unwrap_err();

        match err {
            SchemaError::Invalid { chunk, field, .. } => {
                assert_eq!(chunk, "0x00000001");
                assert_eq!(field, "outer.inner");
            }
            other => panic!("Unexpected error {:?}", other),
        }
    }

    #[test]
    fn malformed_field() {
        let err = parse(json!({"f": {"type": "int8", "length": -1}})).unwrap_err();
        assert!(matches!(err, SchemaError::Malformed { .. }));
    }

    #[test]
    fn defaults() {
        let schema = parse(json!({
            "n": {"type": "int8"},
            "name": {"type": "int8", "modifier": "string", "length": 4},
            "pair": {"type": "int16", "length": 2, "default": 7},
            "dyn": {"type": "int16", "length": "$current/.n"},
            "pad": {"type": "int8", "modifier": "padding"},
            "flags": {"type": "int8", "unsigned": true,
                "bitfield": {"a": {"offset": 0, "width": 4}, "r": {"offset": 4, "width": 4, "padding": true}}},
            "sub": {"type": "structure", "structure": {"x": {"type": "float"}}}
        }))
        .unwrap();

        assert_eq!(
            Value::Object(schema.default_record()),
            json!({
                "n": 0,
                "name": "",
                "pair": [7, 7],
                "dyn": [],
                "a": 0,
                "sub": {"x": 0}
            })
        );
    }
}
