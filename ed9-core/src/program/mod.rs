//! The textual builder program.
//!
//! A program is a flat list of builder calls such as
//! `add_function(name="main", ...)` or `PUSHINTEGER(1)`. It is parsed into a
//! small syntax tree and interpreted by [`crate::asm::Assembler`]; it is never
//! executed by a host language.

mod lexer;
mod parser;
pub mod render;

use crate::error::{Ed9Error, Result};
use crate::tagged::{check_int, check_payload, TaggedValue, TaggedWord};

pub use lexer::{tokenize, Tok, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    /// Literal text of a float, parsed at the width the consumer needs.
    Float(String),
    Str(String),
    Ident(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Call(Call),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Value,
}

impl Arg {
    pub fn positional(value: Value) -> Self {
        Self { name: None, value }
    }

    pub fn keyword(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Arg>,
}

impl Call {
    pub fn new(name: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Find an argument by keyword, falling back to its position among the
    /// positional arguments.
    pub fn arg(&self, name: &str, position: usize) -> Option<&Value> {
        if let Some(a) = self.args.iter().find(|a| a.name.as_deref() == Some(name)) {
            return Some(&a.value);
        }
        self.args
            .iter()
            .filter(|a| a.name.is_none())
            .nth(position)
            .map(|a| &a.value)
    }

    pub fn positional_count(&self) -> usize {
        self.args.iter().filter(|a| a.name.is_none()).count()
    }

    pub fn bad_arg(&self, reason: impl Into<String>) -> Ed9Error {
        Ed9Error::BadArgument {
            call: self.name.clone(),
            reason: reason.into(),
        }
    }

    pub fn required(&self, name: &str, position: usize) -> Result<&Value> {
        self.arg(name, position)
            .ok_or_else(|| self.bad_arg(format!("missing argument `{}`", name)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Call {
        call: Call,
        /// Comment on the same line, without the `#`.
        comment: Option<String>,
    },
    Comment(String),
    Blank,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub line: usize,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn parse(src: &str) -> Result<Self> {
        parser::parse(src)
    }

    pub fn calls(&self) -> impl Iterator<Item = (usize, &Call)> {
        self.statements.iter().filter_map(|s| match &s.item {
            Item::Call { call, .. } => Some((s.line, call)),
            _ => None,
        })
    }

    pub fn calls_mut(&mut self) -> impl Iterator<Item = &mut Call> {
        self.statements.iter_mut().filter_map(|s| match &mut s.item {
            Item::Call { call, .. } => Some(call),
            _ => None,
        })
    }

    /// Render back to text, one statement per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for s in &self.statements {
            match &s.item {
                Item::Call { call, comment } => {
                    out.push_str(&render::render_call(call));
                    if let Some(c) = comment {
                        out.push_str(" # ");
                        out.push_str(c);
                    }
                }
                Item::Comment(c) => {
                    out.push_str("# ");
                    out.push_str(c);
                }
                Item::Blank => {}
            }
            out.push('\n');
        }
        out
    }
}

impl Value {
    pub fn describe(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Ident(_) => "identifier",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Call(_) => "call",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(text) => text.parse::<f32>().ok(),
            Value::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Interpret a value in a tagged-word position.
    ///
    /// Accepted forms: `UNDEF(n)`, `INT(n)`, `FLOAT(f)`, `STR("s")`,
    /// `WORD(n)` or a bare integer for a raw word, and a bare string for `STR`.
    pub fn to_tagged(&self) -> Result<TaggedValue> {
        match self {
            Value::Str(s) => Ok(TaggedValue::Str(s.clone())),
            Value::Int(v) => raw_word(*v),
            Value::Call(c) => {
                let inner = match c.args.as_slice() {
                    [a] if a.name.is_none() => &a.value,
                    _ => return Err(c.bad_arg("expected exactly one positional argument")),
                };
                match c.name.as_str() {
                    "UNDEF" => {
                        let v = inner.as_int().ok_or_else(|| c.bad_arg("expected an integer"))?;
                        if v < 0 {
                            return Err(Ed9Error::BadTagWord(v as u64));
                        }
                        Ok(TaggedValue::Undef(check_payload(v as u64)?))
                    }
                    "INT" => {
                        let v = inner.as_int().ok_or_else(|| c.bad_arg("expected an integer"))?;
                        Ok(TaggedValue::Int(check_int(v)?))
                    }
                    "FLOAT" => inner
                        .as_f32()
                        .map(TaggedValue::Float)
                        .ok_or_else(|| c.bad_arg("expected a float")),
                    "STR" => inner
                        .as_str()
                        .map(|s| TaggedValue::Str(s.to_string()))
                        .ok_or_else(|| c.bad_arg("expected a string")),
                    "WORD" => {
                        let v = inner.as_int().ok_or_else(|| c.bad_arg("expected an integer"))?;
                        raw_word(v)
                    }
                    other => Err(c.bad_arg(format!("unknown tagged constructor {}", other))),
                }
            }
            other => Err(Ed9Error::BadArgument {
                call: "tagged value".into(),
                reason: format!("cannot use a {} as a tagged word", other.describe()),
            }),
        }
    }
}

/// A raw 32-bit word, decoded so that re-encoding gives the same bits back.
fn raw_word(v: i64) -> Result<TaggedValue> {
    let w = u32::try_from(v).map_err(|_| Ed9Error::BadTagWord(v as u64))?;
    let w = TaggedWord(w);
    Ok(match w.tag() {
        crate::tagged::Tag::Undef => TaggedValue::Undef(w.payload()),
        crate::tagged::Tag::Int => TaggedValue::Int(crate::tagged::decode_int(w.0)),
        crate::tagged::Tag::Float => TaggedValue::Float(crate::tagged::decode_float(w.0)),
        crate::tagged::Tag::Str => TaggedValue::StrPtr(w.payload()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_and_positional_lookup() {
        let p = Program::parse("f(1, b=2, 3)").unwrap();
        let (_, call) = p.calls().next().unwrap();
        assert_eq!(call.arg("a", 0), Some(&Value::Int(1)));
        assert_eq!(call.arg("b", 5), Some(&Value::Int(2)));
        assert_eq!(call.arg("c", 1), Some(&Value::Int(3)));
        assert_eq!(call.positional_count(), 2);
    }

    #[test]
    fn tagged_constructors() {
        let p = Program::parse(
            r#"f(UNDEF(0x10), INT(-4), FLOAT(1.5), STR("x"), "y", 0x4000002A)"#,
        )
        .unwrap();
        let (_, call) = p.calls().next().unwrap();
        let values: Vec<TaggedValue> = call
            .args
            .iter()
            .map(|a| a.value.to_tagged().unwrap())
            .collect();
        assert_eq!(
            values,
            vec![
                TaggedValue::Undef(0x10),
                TaggedValue::Int(-4),
                TaggedValue::Float(1.5),
                TaggedValue::Str("x".into()),
                TaggedValue::Str("y".into()),
                TaggedValue::Int(42),
            ]
        );
    }

    #[test]
    fn oversized_payload_is_bad_tag_word() {
        let p = Program::parse("f(UNDEF(0x40000000), INT(0x20000000))").unwrap();
        let (_, call) = p.calls().next().unwrap();
        for a in &call.args {
            assert!(matches!(a.value.to_tagged(), Err(Ed9Error::BadTagWord(_))));
        }
    }

    #[test]
    fn render_keeps_comments() {
        let src = "# header\nPUSHSTRING(\"a\\\"b\") # note\n\nEXIT()\n";
        let p = Program::parse(src).unwrap();
        assert_eq!(p.render(), src);
    }
}
