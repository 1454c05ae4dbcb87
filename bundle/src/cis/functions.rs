//! Library of script functions
use log::debug;
use serde_json::{Map, Number, Value};

use bcore::buf::{align_up, hex_id};

use crate::chunk::disassembled::{forest_to_value, ChunkPayload, DisassembledChunk};
use crate::chunk::raw::RawData;
use crate::chunk::HEADER_SIZE;
use crate::cis::parser::Function;
use crate::cis::path::{self, Accessor};
use crate::cis::{stringify, ScriptContext, ScriptError};

pub struct Args<'a>(pub &'a [(String, Value)]);

impl<'a> Args<'a> {
    fn get(&self, name: &str) -> Option<&'a Value> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    fn require(&self, name: &str) -> Result<&'a Value, ScriptError> {
        self.get(name).ok_or_else(|| ScriptError::MissingArgument(name.to_string()))
    }

    fn unsigned(&self, name: &str) -> Result<Option<u64>, ScriptError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| ScriptError::InvalidArgument {
                name: name.to_string(),
                reason: format!("expected a non negative integer, got {}", value),
            }),
        }
    }
}

pub fn call(function: Function, ctx: &ScriptContext, args: &[(String, Value)]) -> Result<Value, ScriptError> {
    let args = Args(args);

    match function {
        Function::Current => Ok(Value::Object(ctx.current.clone())),
        Function::Global => Ok(forest_to_value(ctx.scope.global)),
        Function::Root => Ok(ctx.extra.root.map_or(Value::Null, |r| Value::Object(r.clone()))),
        Function::Index => ctx.extra.index.map(Value::from).ok_or(ScriptError::NotInArray),
        Function::Rfind => rfind(ctx, &args),
        Function::Find => Ok(Value::Null),
        Function::RawSize => rawsize(ctx, &args),
        Function::Size => size(ctx, &args),
        Function::Math => math(&args),
        Function::NewObject => Ok(Value::Object(
            args.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Map<_, _>>(),
        )),
        Function::StrJoin => Ok(match args.0 {
            [] => Value::Null,
            all => Value::String(all.iter().map(|(_, v)| stringify(v)).collect()),
        }),
    }
}

/// Functions returning a tree the context already holds, walked in place
pub fn select(function: Function, ctx: &ScriptContext, path: &[Accessor]) -> Option<Result<Value, ScriptError>> {
    match function {
        Function::Current => Some(path::select_record(ctx.current, path)),
        Function::Root => Some(match ctx.extra.root {
            Some(root) => path::select_record(root, path),
            None => path::resolve(&Value::Null, path).cloned(),
        }),
        Function::Global => Some(path::select_forest(ctx.scope.global, path)),
        _ => None,
    }
}

fn rfind(ctx: &ScriptContext, args: &Args) -> Result<Value, ScriptError> {
    let id = match args.unsigned("id")? {
        Some(id) => u32::try_from(id).map_err(|_| ScriptError::InvalidArgument {
            name: "id".to_string(),
            reason: format!("{} is not a chunk id", id),
        })?,
        None => return Err(ScriptError::MissingArgument("id".to_string())),
    };
    let max_backtrace = args.unsigned("max_backtrace")?.unwrap_or(u64::MAX);

    let backtrace = ctx.scope.backtrace;

    // Layers from the current one upwards, each paired with the position in it
    for (climbed, depth) in (0..backtrace.len()).rev().enumerate() {
        if climbed as u64 > max_backtrace {
            break;
        }

        let siblings = match layer(ctx.scope.global, &backtrace[..depth]) {
            Some(siblings) => siblings,
            None => break,
        };

        let position = backtrace[depth].min(siblings.len());
        for sibling in siblings[..position].iter().rev() {
            if let Some(found) = rsearch(sibling, id) {
                return Ok(found.data.to_value());
            }
        }

        // The enclosing container was emitted right before its children
        if depth > 0 {
            if let Some(parent) = layer(ctx.scope.global, &backtrace[..depth - 1]).and_then(|l| l.get(backtrace[depth - 1])) {
                if parent.id == id && (climbed as u64) < max_backtrace {
                    return Ok(parent.data.to_value());
                }
            }
        }
    }

    debug!("rfind: no chunk {} before the current one", hex_id(id));
    Ok(Value::Null)
}

/// Children list reached by following `path` from the top level
fn layer<'t>(forest: &'t [DisassembledChunk], path: &[usize]) -> Option<&'t [DisassembledChunk]> {
    let mut cur = forest;
    for idx in path {
        cur = cur.get(*idx)?.children()?;
    }
    Some(cur)
}

/// Latest emitted chunk with `id` inside `chunk`, the chunk itself last
fn rsearch(chunk: &DisassembledChunk, id: u32) -> Option<&DisassembledChunk> {
    if let Some(children) = chunk.children() {
        for child in children.iter().rev() {
            if let Some(found) = rsearch(child, id) {
                return Some(found);
            }
        }
    }

    if chunk.id == id {
        Some(chunk)
    } else {
        None
    }
}

fn depth_arg(args: &Args) -> Result<usize, ScriptError> {
    Ok(args.unsigned("depth")?.unwrap_or(0) as usize)
}

/// Path of the ancestor `depth` levels above the chunk at `path`
fn ancestor(path: &[usize], depth: usize) -> Result<&[usize], ScriptError> {
    if depth >= path.len() {
        return Err(ScriptError::DepthOutOfRange(depth));
    }
    Ok(&path[..path.len() - depth])
}

fn rawsize(ctx: &ScriptContext, args: &Args) -> Result<Value, ScriptError> {
    let path = ancestor(ctx.scope.backtrace_raw, depth_arg(args)?)?;

    let (first, rest) = path.split_first().ok_or(ScriptError::NoChunk)?;
    let mut chunk = ctx.scope.global_raw.get(*first).ok_or(ScriptError::NoChunk)?;
    for idx in rest {
        chunk = match &chunk.data {
            RawData::Children(children) => children.get(*idx),
            RawData::Bytes(_) => None,
        }
        .ok_or(ScriptError::NoChunk)?;
    }

    Ok(Value::from(chunk.footprint()))
}

fn size(ctx: &ScriptContext, args: &Args) -> Result<Value, ScriptError> {
    let depth = depth_arg(args)?;

    if depth == 0 {
        let id = ctx.scope.chunk_id.ok_or(ScriptError::NoChunk)?;
        return current_size(ctx, id).map(Value::from);
    }

    let path = ancestor(ctx.scope.backtrace, depth)?;
    let (last, parents) = path.split_last().ok_or(ScriptError::NoChunk)?;
    let chunk = layer(ctx.scope.global, parents)
        .and_then(|l| l.get(*last))
        .ok_or(ScriptError::NoChunk)?;

    tree_size(ctx, chunk).map(Value::from)
}

/// Payload size of a disassembled subtree.
///
/// The structured tree holds no aligner or ignored chunks, so absolute
/// offsets are unknown here and `data_align` filler of the leaves is not
/// counted. `rawsize` gives the size as stored.
fn tree_size(ctx: &ScriptContext, chunk: &DisassembledChunk) -> Result<u64, ScriptError> {
    match &chunk.data {
        ChunkPayload::Children(children) => children
            .iter()
            .map(|c| tree_size(ctx, c).map(|s| s + HEADER_SIZE as u64))
            .sum(),
        ChunkPayload::Opaque(bytes) => Ok(bytes.len() as u64),
        ChunkPayload::Structured(_) => schema_size(ctx, chunk.id),
    }
}

fn schema_size(ctx: &ScriptContext, id: u32) -> Result<u64, ScriptError> {
    ctx.scope
        .docs
        .and_then(|docs| docs.lookup(id))
        .and_then(|doc| doc.schema.as_ref())
        .and_then(|schema| schema.static_size(ctx.scope.settings))
        .map(|s| s as u64)
        .ok_or_else(|| ScriptError::SizeUnknown(hex_id(id)))
}

fn current_size(ctx: &ScriptContext, id: u32) -> Result<u64, ScriptError> {
    let size = schema_size(ctx, id)?;

    let data_align = ctx
        .scope
        .docs
        .and_then(|docs| docs.lookup(id))
        .and_then(|doc| doc.data_align)
        .unwrap_or(1);
    let start = ctx.scope.payload_start;

    Ok(size + (align_up(start, data_align) - start))
}

fn math(args: &Args) -> Result<Value, ScriptError> {
    let a = number(args, "a")?;
    let b = number(args, "b")?;
    let action = match args.require("action")? {
        Value::String(action) => action.as_str(),
        other => {
            return Err(ScriptError::InvalidArgument {
                name: "action".to_string(),
                reason: format!("expected a string, got {}", other),
            })
        }
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match action {
            "plus" => x.checked_add(y),
            "minus" => x.checked_sub(y),
            "multiply" => x.checked_mul(y),
            "divide" if y == 0 => return Err(ScriptError::DivideByZero),
            "divide" if x.checked_rem(y) == Some(0) => x.checked_div(y),
            "divide" => None,
            other => return Err(ScriptError::UnknownAction(other.to_string())),
        };
        if let Some(result) = exact {
            return Ok(Value::from(result));
        }
    }

    let (x, y) = (as_f64(a), as_f64(b));
    let result = match action {
        "plus" => x + y,
        "minus" => x - y,
        "multiply" => x * y,
        "divide" if y == 0.0 => return Err(ScriptError::DivideByZero),
        "divide" => x / y,
        other => return Err(ScriptError::UnknownAction(other.to_string())),
    };

    Number::from_f64(result).map(Value::Number).ok_or(ScriptError::NotFinite)
}

fn number<'a>(args: &Args<'a>, name: &str) -> Result<&'a Number, ScriptError> {
    match args.require(name)? {
        Value::Number(n) => Ok(n),
        other => Err(ScriptError::InvalidArgument {
            name: name.to_string(),
            reason: format!("expected a number, got {}", other),
        }),
    }
}

fn as_f64(n: &Number) -> f64 {
    n.as_f64().unwrap_or(0.0)
}
