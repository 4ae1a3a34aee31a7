use std::fmt::Write;

use crate::tagged::{encode_float, TaggedValue};

use super::{Arg, Call, Value};

/// Double-quoted literal that the lexer reads back to the same text.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Shortest text that parses back to the same `f32`.
pub fn float_literal(f: f32) -> String {
    format!("{:?}", f)
}

/// A tagged word in constructor form. Words with no faithful literal, such as
/// non-finite floats, fall back to `WORD(...)`.
pub fn render_tagged(v: &TaggedValue) -> String {
    match v {
        TaggedValue::Undef(x) => format!("UNDEF({})", x),
        TaggedValue::Int(x) => format!("INT({})", x),
        TaggedValue::Float(f) if f.is_finite() => format!("FLOAT({})", float_literal(*f)),
        TaggedValue::Float(f) => format!("WORD(0x{:08X})", encode_float(*f)),
        TaggedValue::Str(s) => format!("STR({})", quote(s)),
        TaggedValue::StrPtr(off) => format!("WORD(0x{:08X})", off | 0xC000_0000),
    }
}

pub fn render_value(v: &Value) -> String {
    match v {
        Value::Int(x) => x.to_string(),
        Value::Float(s) => s.clone(),
        Value::Str(s) => quote(s),
        Value::Ident(s) => s.clone(),
        Value::List(items) => format!("[{}]", join(items)),
        Value::Tuple(items) if items.len() == 1 => format!("({},)", join(items)),
        Value::Tuple(items) => format!("({})", join(items)),
        Value::Call(c) => render_call(c),
    }
}

fn join(items: &[Value]) -> String {
    items.iter().map(render_value).collect::<Vec<_>>().join(", ")
}

fn render_arg(a: &Arg) -> String {
    match &a.name {
        Some(name) => format!("{}={}", name, render_value(&a.value)),
        None => render_value(&a.value),
    }
}

pub fn render_call(c: &Call) -> String {
    let args: Vec<String> = c.args.iter().map(render_arg).collect();
    format!("{}({})", c.name, args.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;
    use pretty_assertions::assert_eq;

    #[test]
    fn quoting_round_trips_through_the_lexer() {
        let nasty = "say \"hi\"\\\n\ttab\u{1}\0ok ñ";
        let src = format!("PUSHSTRING({})", quote(nasty));
        let p = Program::parse(&src).unwrap();
        let (_, call) = p.calls().next().unwrap();
        assert_eq!(call.args[0].value, Value::Str(nasty.into()));
    }

    #[test]
    fn floats_keep_their_bits() {
        for f in [0.1f32, -2.5, 1e-7, 3.4028235e38, 0.0] {
            let text = float_literal(f);
            assert_eq!(text.parse::<f32>().unwrap().to_bits(), f.to_bits(), "{}", text);
        }
        assert_eq!(render_tagged(&TaggedValue::Float(1.0)), "FLOAT(1.0)");
        assert!(render_tagged(&TaggedValue::Float(f32::NAN)).starts_with("WORD(0x"));
    }

    #[test]
    fn one_element_tuple_keeps_its_comma() {
        let p = Program::parse("f((1,), [STR(\"a\")], k=x)").unwrap();
        assert_eq!(p.render(), "f((1,), [STR(\"a\")], k=x)\n");
    }
}
