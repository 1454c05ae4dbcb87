//! Context inline scripts
//!
//! Small expressions embedded in schema strings, e.g. a field length of
//! `$current/.count` or `$math:a=$current/.len,b=1,action="minus"/`. A script
//! that makes up the whole string evaluates to a typed JSON value, scripts
//! mixed with text are substituted as text.
use serde_json::Value;
use thiserror::Error;

pub mod context;
mod functions;
pub mod parser;
pub mod path;

pub use context::{Extra, Scope, ScriptContext};

use crate::cis::parser::{ArgValue, Invocation, Segment, Template};

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Invalid syntax at {position}: {reason}")]
    Syntax { position: usize, reason: String },
    #[error("Unknown function \"{0}\"")]
    UnknownFunction(String),
    #[error("Tried to access unknown field {0}")]
    UnknownField(String),
    #[error("Cannot access field {0} due to null value")]
    NullAccess(String),
    #[error("Invalid type of accessor specified ({0})")]
    InvalidAccessor(String),
    #[error("Duplicate argument \"{0}\"")]
    DuplicateArgument(String),
    #[error("Missing argument \"{0}\"")]
    MissingArgument(String),
    #[error("Invalid argument \"{name}\": {reason}")]
    InvalidArgument { name: String, reason: String },
    #[error("Unknown math action \"{0}\"")]
    UnknownAction(String),
    #[error("Division by zero")]
    DivideByZero,
    #[error("Result is not a finite number")]
    NotFinite,
    #[error("Index requested outside of an array")]
    NotInArray,
    #[error("No chunk at the requested position")]
    NoChunk,
    #[error("Size of chunk {0} cannot be computed")]
    SizeUnknown(String),
    #[error("Depth {0} goes past the top of the bundle")]
    DepthOutOfRange(usize),
}

/// Parses and evaluates `source` in one go
pub fn execute(source: &str, ctx: &ScriptContext) -> Result<Value, ScriptError> {
    parser::parse(source)?.evaluate(ctx)
}

impl Template {
    pub fn evaluate(&self, ctx: &ScriptContext) -> Result<Value, ScriptError> {
        if let Some(inv) = self.single() {
            return inv.evaluate(ctx);
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Script(inv) => out.push_str(&stringify(&inv.evaluate(ctx)?)),
            }
        }

        Ok(Value::String(out))
    }
}

impl Invocation {
    pub fn evaluate(&self, ctx: &ScriptContext) -> Result<Value, ScriptError> {
        if let Some(value) = functions::select(self.function, ctx, &self.accessors) {
            return value;
        }

        let args = self
            .args
            .iter()
            .map(|(key, value)| -> Result<(String, Value), ScriptError> {
                let value = match value {
                    ArgValue::Int(n) => Value::from(*n),
                    ArgValue::Str(s) => Value::String(s.clone()),
                    ArgValue::Script(inv) => inv.evaluate(ctx)?,
                };
                Ok((key.clone(), value))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let value = functions::call(self.function, ctx, &args)?;

        if self.accessors.is_empty() {
            return Ok(value);
        }
        path::resolve(&value, &self.accessors).cloned()
    }
}

/// Text form of a value when it is substituted into a string
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod test_cis {
    use super::*;
    use crate::chunk::disassembled::{ChunkPayload, DisassembledChunk, Record};
    use crate::chunk::raw::RawChunk;
    use crate::docs::Docs;
    use crate::settings::Settings;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("Expected an object"),
        }
    }

    fn eval(source: &str, current: Value) -> Result<Value, ScriptError> {
        let settings = Settings::default();
        let scope = Scope::detached(&settings);
        let current = record(current);

        execute(source, &ScriptContext::new(&current, &scope, Extra::default()))
    }

    fn leaf(id: u32, value: Value) -> DisassembledChunk {
        DisassembledChunk::new(id, ChunkPayload::Structured(record(value)))
    }

    #[test]
    fn whole_string_is_typed() {
        assert_eq!(eval("$current/.field", json!({"field": 5})).unwrap(), json!(5));
        assert_eq!(eval("$current/.field", json!({"field": [1, 2]})).unwrap(), json!([1, 2]));
    }

    #[test]
    fn substitution_is_text() {
        assert_eq!(
            eval("prefix $current/.field suffix", json!({"field": 5})).unwrap(),
            json!("prefix 5 suffix")
        );
        assert_eq!(
            eval("$current/.a$current/.b", json!({"a": "x", "b": 2})).unwrap(),
            json!("x2")
        );
    }

    #[test]
    fn missing_field() {
        let err = eval("$current/.missing", json!({"field": 5})).unwrap_err();

        assert!(matches!(&err, ScriptError::UnknownField(name) if name.contains("missing")));
        assert!(err.to_string().contains("\"missing\""));
    }

    #[test]
    fn math_actions() {
        let cur = json!({"len": 5});

        assert_eq!(
            eval("$math:a=$current/.len,b=1,action=\"minus\"/", cur.clone()).unwrap(),
            json!(4)
        );
        assert_eq!(eval("$math:a=3,b=4,action=\"multiply\"/", cur.clone()).unwrap(), json!(12));
        assert_eq!(eval("$math:a=0x10,b=2,action=\"plus\"/", cur.clone()).unwrap(), json!(18));
        assert_eq!(eval("$math:a=8,b=2,action=\"divide\"/", cur.clone()).unwrap(), json!(4));
        assert_eq!(eval("$math:a=7,b=2,action=\"divide\"/", cur.clone()).unwrap(), json!(3.5));

        assert!(matches!(
            eval("$math:a=7,b=0,action=\"divide\"/", cur.clone()),
            Err(ScriptError::DivideByZero)
        ));
        assert!(matches!(
            eval("$math:a=7,b=1,action=\"modulo\"/", cur.clone()),
            Err(ScriptError::UnknownAction(a)) if a == "modulo"
        ));
        assert!(matches!(
            eval("$math:a=7,action=\"plus\"/", cur),
            Err(ScriptError::MissingArgument(a)) if a == "b"
        ));
    }

    #[test]
    fn objects_and_strings() {
        assert_eq!(
            eval("$newobject:b=2,a=\"x\"/", json!({})).unwrap(),
            json!({"b": 2, "a": "x"})
        );
        assert_eq!(eval("$newobject:b=2,a=\"x\"/.a", json!({})).unwrap(), json!("x"));
        assert_eq!(
            eval("$strjoin:0=\"id_\",1=$current/.n/", json!({"n": 7})).unwrap(),
            json!("id_7")
        );
        assert_eq!(eval("$find/", json!({})).unwrap(), Value::Null);
    }

    #[test]
    fn index_and_root() {
        let settings = Settings::default();
        let scope = Scope::detached(&settings);
        let current = record(json!({"x": 1}));
        let root = record(json!({"count": 3}));

        let outside = ScriptContext::new(&current, &scope, Extra::default());
        assert!(matches!(execute("$index/", &outside), Err(ScriptError::NotInArray)));
        assert_eq!(execute("$root/", &outside).unwrap(), Value::Null);

        let inside = ScriptContext::new(
            &current,
            &scope,
            Extra {
                index: Some(2),
                root: Some(&root),
            },
        );
        assert_eq!(execute("$index/", &inside).unwrap(), json!(2));
        assert_eq!(execute("$root/.count", &inside).unwrap(), json!(3));
    }

    #[test]
    fn rfind_searches_backwards() {
        let settings = Settings::default();
        let global = vec![
            leaf(0x10, json!({"v": 1})),
            DisassembledChunk::new(
                0x8000_0001,
                ChunkPayload::Children(vec![
                    leaf(0x10, json!({"v": 2})),
                    leaf(0x20, json!({"v": 3})),
                    leaf(0x10, json!({"v": 9})),
                ]),
            ),
        ];
        // Current chunk: second child of the container
        let backtrace = [1, 1];
        let scope = Scope {
            global: &global,
            backtrace: &backtrace,
            ..Scope::detached(&settings)
        };
        let current = Record::new();
        let ctx = ScriptContext::new(&current, &scope, Extra::default());

        assert_eq!(execute("$rfind:id=0x10/.v", &ctx).unwrap(), json!(2));
        assert_eq!(execute("$rfind:id=0x80000001/", &ctx).unwrap().as_array().map(Vec::len), Some(3));
        assert_eq!(execute("$rfind:id=0x30/", &ctx).unwrap(), Value::Null);

        // Only the top level has the 0x10 before the container
        let backtrace = [1, 0];
        let scope = Scope {
            global: &global,
            backtrace: &backtrace,
            ..Scope::detached(&settings)
        };
        let ctx = ScriptContext::new(&current, &scope, Extra::default());
        assert_eq!(execute("$rfind:id=0x10/.v", &ctx).unwrap(), json!(1));
        assert_eq!(execute("$rfind:id=0x10,max_backtrace=0/", &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn sizes() {
        let settings = Settings::default();
        let docs = Docs::parse(
            r#"{"subnests": {
                "0x00000010": {"data_align": 8, "schema": {"v": {"type": "int32"}}},
                "0x00000020": {"schema": {"v": {"type": "int16", "length": 3}}}
            }}"#,
        )
        .unwrap();

        let raw = vec![RawChunk::container(
            0x8000_0001,
            8 + 4 + 8 + 2,
            vec![
                RawChunk::leaf(0x10, vec![0; 4], 150).unwrap(),
                RawChunk::leaf(0x30, vec![0; 2], 150).unwrap(),
            ],
        )];
        let global = vec![DisassembledChunk::new(
            0x8000_0001,
            ChunkPayload::Children(vec![
                leaf(0x20, json!({"v": [1, 2, 3]})),
                DisassembledChunk::new(0x30, ChunkPayload::Opaque(vec![0; 2])),
            ]),
        )];
        let backtrace = [0, 0];
        let scope = Scope {
            global: &global,
            backtrace: &backtrace,
            global_raw: &raw,
            backtrace_raw: &backtrace,
            docs: Some(&docs),
            settings: &settings,
            chunk_id: Some(0x10),
            payload_start: 12,
        };
        let current = Record::new();
        let ctx = ScriptContext::new(&current, &scope, Extra::default());

        assert_eq!(execute("$rawsize/", &ctx).unwrap(), json!(4));
        assert_eq!(execute("$rawsize:depth=1/", &ctx).unwrap(), json!(22));
        // int32 plus 4 filler bytes to reach offset 16
        assert_eq!(execute("$size/", &ctx).unwrap(), json!(8));
        assert_eq!(execute("$size:depth=1/", &ctx).unwrap(), json!(8 + 6 + 8 + 2));
        assert!(matches!(
            execute("$size:depth=2/", &ctx),
            Err(ScriptError::DepthOutOfRange(2))
        ));
    }

    #[test]
    fn subtree_size_skips_data_align_filler() {
        let settings = Settings::default();
        let docs = Docs::parse(r#"{"subnests": {"0x00000010": {"data_align": 16, "schema": {"v": {"type": "int32"}}}}}"#)
            .unwrap();

        // Leaf payload starts at 24, 8 filler bytes move v to 32
        let raw = vec![RawChunk::container(
            0x8000_0001,
            8 + 12,
            vec![RawChunk::leaf(0x10, vec![0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0, 0, 0, 0], 150).unwrap()],
        )];
        let global = vec![DisassembledChunk::new(
            0x8000_0001,
            ChunkPayload::Children(vec![leaf(0x10, json!({"v": 0}))]),
        )];
        let backtrace = [0, 0];
        let scope = Scope {
            global: &global,
            backtrace: &backtrace,
            global_raw: &raw,
            backtrace_raw: &backtrace,
            docs: Some(&docs),
            settings: &settings,
            chunk_id: Some(0x10),
            payload_start: 24,
        };
        let current = Record::new();
        let ctx = ScriptContext::new(&current, &scope, Extra::default());

        assert_eq!(execute("$size/", &ctx).unwrap(), json!(4 + 8));
        assert_eq!(execute("$size:depth=1/", &ctx).unwrap(), json!(8 + 4));
        assert_eq!(execute("$rawsize:depth=1/", &ctx).unwrap(), json!(8 + 12));
    }

    #[test]
    fn global_paths() {
        let settings = Settings::default();
        let global = vec![
            leaf(0x10, json!({"v": [4, 5]})),
            DisassembledChunk::new(0x20, ChunkPayload::Opaque(vec![1, 2])),
        ];
        let scope = Scope {
            global: &global,
            ..Scope::detached(&settings)
        };
        let current = record(json!({"n": 1}));
        let ctx = ScriptContext::new(&current, &scope, Extra::default());

        assert_eq!(execute("$global/.0.data.v.1", &ctx).unwrap(), json!(5));
        assert_eq!(execute("$global/.1.id", &ctx).unwrap(), json!(0x20));
        assert_eq!(execute("$global/.1.data.__raw_value__", &ctx).unwrap(), json!("AQI="));
        assert_eq!(execute("$global/", &ctx).unwrap().as_array().map(Vec::len), Some(2));
        assert!(matches!(
            execute("$global/.0.data.missing", &ctx),
            Err(ScriptError::UnknownField(_))
        ));
        assert_eq!(execute("$current/", &ctx).unwrap(), json!({"n": 1}));
    }
}
