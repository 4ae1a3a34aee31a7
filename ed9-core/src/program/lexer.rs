use crate::error::{Ed9Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Int(i64),
    /// Float literal, kept as written so it can be parsed at the target width.
    Float(String),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    /// Only produced outside of brackets.
    Newline,
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

fn syntax(line: usize, reason: impl Into<String>) -> Ed9Error {
    Ed9Error::Syntax {
        line,
        reason: reason.into(),
    }
}

pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0usize;
    let mut line = 1usize;
    let mut depth = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                if depth == 0 {
                    out.push(Token {
                        tok: Tok::Newline,
                        line,
                    });
                }
                line += 1;
                i += 1;
            }
            ' ' | '\t' | '\r' => i += 1,
            '#' => {
                let start = i + 1;
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                if depth == 0 {
                    let text: String = chars[start..i].iter().collect();
                    out.push(Token {
                        tok: Tok::Comment(text.trim().to_string()),
                        line,
                    });
                }
            }
            '(' | '[' => {
                depth += 1;
                out.push(Token {
                    tok: if c == '(' { Tok::LParen } else { Tok::LBracket },
                    line,
                });
                i += 1;
            }
            ')' | ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| syntax(line, format!("unbalanced '{}'", c)))?;
                out.push(Token {
                    tok: if c == ')' { Tok::RParen } else { Tok::RBracket },
                    line,
                });
                i += 1;
            }
            ',' => {
                out.push(Token {
                    tok: Tok::Comma,
                    line,
                });
                i += 1;
            }
            '=' => {
                out.push(Token { tok: Tok::Eq, line });
                i += 1;
            }
            '"' | '\'' => {
                let (s, next, lines) = lex_string(&chars, i, line)?;
                out.push(Token {
                    tok: Tok::Str(s),
                    line,
                });
                line += lines;
                i = next;
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let (tok, next) = lex_number(&chars, i, line)?;
                out.push(Token { tok, line });
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                out.push(Token {
                    tok: Tok::Ident(chars[start..i].iter().collect()),
                    line,
                });
            }
            other => return Err(syntax(line, format!("unexpected character {:?}", other))),
        }
    }

    if depth != 0 {
        return Err(syntax(line, "unclosed bracket at end of input"));
    }
    Ok(out)
}

fn lex_number(chars: &[char], start: usize, line: usize) -> Result<(Tok, usize)> {
    let mut i = start;
    let negative = match chars[i] {
        '-' => {
            i += 1;
            true
        }
        '+' => {
            i += 1;
            false
        }
        _ => false,
    };

    if i + 1 < chars.len() && chars[i] == '0' && (chars[i + 1] == 'x' || chars[i + 1] == 'X') {
        i += 2;
        let digits_start = i;
        while i < chars.len() && (chars[i].is_ascii_hexdigit() || chars[i] == '_') {
            i += 1;
        }
        let digits: String = chars[digits_start..i].iter().filter(|c| **c != '_').collect();
        let v = i64::from_str_radix(&digits, 16)
            .map_err(|e| syntax(line, format!("bad hex literal 0x{}: {}", digits, e)))?;
        return Ok((Tok::Int(if negative { -v } else { v }), i));
    }

    let digits_start = i;
    let mut is_float = false;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() || c == '_' {
            i += 1;
        } else if c == '.' && !is_float {
            is_float = true;
            i += 1;
        } else if (c == 'e' || c == 'E') && i > digits_start {
            is_float = true;
            i += 1;
            if i < chars.len() && (chars[i] == '-' || chars[i] == '+') {
                i += 1;
            }
        } else {
            break;
        }
    }

    let body: String = chars[digits_start..i].iter().filter(|c| **c != '_').collect();
    if body.is_empty() {
        return Err(syntax(line, "sign without a number"));
    }
    let text = if negative { format!("-{}", body) } else { body };
    if is_float {
        text.parse::<f64>()
            .map_err(|e| syntax(line, format!("bad float literal {}: {}", text, e)))?;
        Ok((Tok::Float(text), i))
    } else {
        let v = text
            .parse::<i64>()
            .map_err(|e| syntax(line, format!("bad integer literal {}: {}", text, e)))?;
        Ok((Tok::Int(v), i))
    }
}

/// Returns the unescaped string, the index past the closing quote and the
/// number of newlines consumed.
fn lex_string(chars: &[char], start: usize, line: usize) -> Result<(String, usize, usize)> {
    let quote = chars[start];
    let mut i = start + 1;
    let mut out = String::new();
    let mut lines = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return Ok((out, i + 1, lines));
        }
        if c == '\n' {
            lines += 1;
        }
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }

        let esc = *chars
            .get(i + 1)
            .ok_or_else(|| syntax(line, "dangling escape at end of input"))?;
        i += 2;
        match esc {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            'u' => {
                if chars.get(i) != Some(&'{') {
                    return Err(syntax(line, "expected '{' after \\u"));
                }
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == '}')
                    .ok_or_else(|| syntax(line, "unterminated \\u{...} escape"))?;
                let hex: String = chars[i + 1..i + close].iter().collect();
                let cp = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| syntax(line, format!("bad code point \\u{{{}}}", hex)))?;
                out.push(cp);
                i += close + 1;
            }
            other => return Err(syntax(line, format!("unknown escape \\{}", other))),
        }
    }

    Err(syntax(line, "unterminated string literal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn call_with_keywords() {
        assert_eq!(
            toks("f(a=1, b=-0x10)\n"),
            vec![
                Tok::Ident("f".into()),
                Tok::LParen,
                Tok::Ident("a".into()),
                Tok::Eq,
                Tok::Int(1),
                Tok::Comma,
                Tok::Ident("b".into()),
                Tok::Eq,
                Tok::Int(-16),
                Tok::RParen,
                Tok::Newline,
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        assert_eq!(
            toks("f(\n  [1,\n 2.5],\n)"),
            vec![
                Tok::Ident("f".into()),
                Tok::LParen,
                Tok::LBracket,
                Tok::Int(1),
                Tok::Comma,
                Tok::Float("2.5".into()),
                Tok::RBracket,
                Tok::Comma,
                Tok::RParen,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            toks(r#""a\"b\\c\n\u{3042}""#),
            vec![Tok::Str("a\"b\\c\nあ".into())]
        );
    }

    #[test]
    fn comments_and_floats() {
        assert_eq!(
            toks("# hi\nX(1e-7) # tail"),
            vec![
                Tok::Comment("hi".into()),
                Tok::Newline,
                Tok::Ident("X".into()),
                Tok::LParen,
                Tok::Float("1e-7".into()),
                Tok::RParen,
                Tok::Comment("tail".into()),
            ]
        );
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = tokenize("ok()\nbad(\"x)\n").unwrap_err();
        assert!(matches!(err, Ed9Error::Syntax { line: 2, .. }));
        assert!(matches!(tokenize("f())"), Err(Ed9Error::Syntax { line: 1, .. })));
    }
}
