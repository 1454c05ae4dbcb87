//! Context inline script syntax
//!
//! ```text
//! template   = { text | invocation }
//! invocation = "$" name [ ":" args ] "/" { "." accessor }
//! args       = key "=" value { "," key "=" value }
//! key        = integer | word
//! value      = integer | '"' text '"' | invocation
//! integer    = decimal | "0x" hex | "0o" octal | "0b" binary
//! ```
//!
//! Words and accessors run until a space or one of `$ . / , =`.
use crate::cis::path::Accessor;
use crate::cis::ScriptError;

const START: u8 = b'$';
const ARGS_START: u8 = b':';
const INVOKE: u8 = b'/';
const NEXT_ARG: u8 = b',';
const ACCESSOR: u8 = b'.';
const KEY_VALUE: u8 = b'=';
const QUOTE: u8 = b'"';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Current,
    Global,
    Root,
    Index,
    Rfind,
    Find,
    RawSize,
    Size,
    Math,
    NewObject,
    StrJoin,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Function> {
        Some(match name {
            "current" => Function::Current,
            "global" => Function::Global,
            "root" => Function::Root,
            "index" => Function::Index,
            "rfind" => Function::Rfind,
            "find" => Function::Find,
            "rawsize" => Function::RawSize,
            "size" => Function::Size,
            "math" => Function::Math,
            "newobject" => Function::NewObject,
            "strjoin" => Function::StrJoin,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i64),
    Str(String),
    Script(Box<Invocation>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub function: Function,
    /// In written order, keys are unique
    pub args: Vec<(String, ArgValue)>,
    pub accessors: Vec<Accessor>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Script(Invocation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub segments: Vec<Segment>,
}

impl Template {
    /// The invocation, when the source is nothing but one script
    pub fn single(&self) -> Option<&Invocation> {
        match self.segments.as_slice() {
            [Segment::Script(inv)] => Some(inv),
            _ => None,
        }
    }
}

pub fn parse(src: &str) -> Result<Template, ScriptError> {
    let mut parser = Parser { src, pos: 0 };
    let mut segments = Vec::new();

    while parser.pos < src.len() {
        match src[parser.pos..].find(START as char) {
            Some(0) => segments.push(Segment::Script(parser.invocation()?)),
            Some(n) => {
                segments.push(Segment::Text(src[parser.pos..parser.pos + n].to_string()));
                parser.pos += n;
            }
            None => {
                segments.push(Segment::Text(src[parser.pos..].to_string()));
                parser.pos = src.len();
            }
        }
    }

    Ok(Template { segments })
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn syntax(&self, reason: &str) -> ScriptError {
        ScriptError::Syntax {
            position: self.pos,
            reason: reason.to_string(),
        }
    }

    fn take_while(&mut self, f: impl Fn(u8) -> bool) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while self.peek().map_or(false, &f) {
            self.pos += 1;
        }
        &src[start..self.pos]
    }

    fn word(&mut self) -> &'a str {
        self.take_while(|c| !matches!(c, START | ACCESSOR | INVOKE | NEXT_ARG | KEY_VALUE | b' '))
    }

    fn invocation(&mut self) -> Result<Invocation, ScriptError> {
        if !self.eat(START) {
            return Err(self.syntax("Script must start with '$'"));
        }

        let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == b'_');
        if name.is_empty() {
            return Err(self.syntax("Invalid function name"));
        }
        let function = Function::from_name(name).ok_or_else(|| ScriptError::UnknownFunction(name.to_string()))?;

        let args = if self.eat(ARGS_START) { self.args()? } else { Vec::new() };

        if !self.eat(INVOKE) {
            return Err(self.syntax("Expected '/' after the function"));
        }

        let mut accessors = Vec::new();
        while self.eat(ACCESSOR) {
            let word = self.word();
            if word.is_empty() {
                return Err(self.syntax("Empty accessor"));
            }

            if word.bytes().all(|c| c.is_ascii_digit()) {
                let idx = word.parse().map_err(|_| self.syntax("Index out of range"))?;
                accessors.push(Accessor::Index(idx));
            } else {
                accessors.push(Accessor::Key(word.to_string()));
            }
        }

        Ok(Invocation {
            function,
            args,
            accessors,
        })
    }

    fn args(&mut self) -> Result<Vec<(String, ArgValue)>, ScriptError> {
        if self.peek() == Some(INVOKE) {
            return Err(self.syntax("Arguments list must contain at least one argument"));
        }

        let mut args: Vec<(String, ArgValue)> = Vec::new();

        loop {
            let key = self.key()?;

            if !self.eat(KEY_VALUE) {
                return Err(self.syntax("Invalid key name. Did you forget to add quotes?"));
            }

            let value = match self.peek() {
                None => return Err(self.syntax("Unexpected end of string")),
                Some(c) if c.is_ascii_digit() => ArgValue::Int(self.integer()?),
                Some(QUOTE) => ArgValue::Str(self.string()?),
                Some(START) => ArgValue::Script(Box::new(self.invocation()?)),
                Some(_) => {
                    return Err(self.syntax(&format!(
                        "Unknown data passed to argument \"{}\". Did you forget to add quotes?",
                        key
                    )))
                }
            };

            if !matches!(self.peek(), None | Some(NEXT_ARG) | Some(INVOKE)) {
                return Err(self.syntax("Unknown data after value. Did you forget to add quotes?"));
            }

            if args.iter().any(|(k, _)| *k == key) {
                return Err(ScriptError::DuplicateArgument(key));
            }
            args.push((key, value));

            if !self.eat(NEXT_ARG) {
                return Ok(args);
            }
        }
    }

    fn key(&mut self) -> Result<String, ScriptError> {
        if self.peek().map_or(false, |c| c.is_ascii_digit()) {
            let start = self.pos;
            let number = self.integer()?;
            if self.peek() == Some(KEY_VALUE) {
                return Ok(number.to_string());
            }
            self.pos = start;
        }

        let word = self.word();
        if self.peek().is_none() {
            return Err(self.syntax("Unexpected end of string"));
        }
        if word.is_empty() {
            return Err(self.syntax("Argument name is empty"));
        }

        Ok(word.to_string())
    }

    fn integer(&mut self) -> Result<i64, ScriptError> {
        let rest = &self.src.as_bytes()[self.pos..];
        let radix = match rest {
            [b'0', b'x', d, ..] if d.is_ascii_hexdigit() => 16,
            [b'0', b'o', d, ..] if (b'0'..=b'7').contains(d) => 8,
            [b'0', b'b', d, ..] if matches!(d, b'0' | b'1') => 2,
            _ => 10,
        };

        if radix != 10 {
            self.pos += 2;
        }

        let start = self.pos;
        let digits = self.take_while(|c| (c as char).is_digit(radix));
        i64::from_str_radix(digits, radix).map_err(|_| ScriptError::Syntax {
            position: start,
            reason: "Integer literal out of range".to_string(),
        })
    }

    fn string(&mut self) -> Result<String, ScriptError> {
        if !self.eat(QUOTE) {
            return Err(self.syntax("String quote missing"));
        }

        let text = self.take_while(|c| c != QUOTE);
        if !self.eat(QUOTE) {
            return Err(self.syntax("The end of string does not exist"));
        }

        Ok(text.to_string())
    }
}
