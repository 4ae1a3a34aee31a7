use crate::error::{Ed9Error, Result};

use super::lexer::{tokenize, Tok, Token};
use super::{Arg, Call, Item, Program, Statement, Value};

struct Parser {
    toks: Vec<Token>,
    pos: usize,
}

pub fn parse(src: &str) -> Result<Program> {
    let mut p = Parser {
        toks: tokenize(src)?,
        pos: 0,
    };
    let mut statements = Vec::new();

    while let Some(tok) = p.peek().cloned() {
        let line = tok.line;
        let item = match tok.tok {
            Tok::Newline => Item::Blank,
            Tok::Comment(c) => {
                p.pos += 1;
                Item::Comment(c)
            }
            Tok::Ident(_) => {
                let call = p.call()?;
                let comment = match p.peek().map(|t| &t.tok) {
                    Some(Tok::Comment(c)) => {
                        let c = c.clone();
                        p.pos += 1;
                        Some(c)
                    }
                    _ => None,
                };
                Item::Call { call, comment }
            }
            other => return Err(p.unexpected(line, &other)),
        };
        statements.push(Statement { line, item });

        match p.next() {
            None | Some(Token { tok: Tok::Newline, .. }) => {}
            Some(t) => return Err(p.unexpected(t.line, &t.tok)),
        }
    }

    Ok(Program { statements })
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn last_line(&self) -> usize {
        self.toks.last().map(|t| t.line).unwrap_or(1)
    }

    fn unexpected(&self, line: usize, tok: &Tok) -> Ed9Error {
        Ed9Error::Syntax {
            line,
            reason: format!("unexpected {:?}", tok),
        }
    }

    fn eof(&self) -> Ed9Error {
        Ed9Error::Syntax {
            line: self.last_line(),
            reason: "unexpected end of input".into(),
        }
    }

    fn expect(&mut self, want: Tok) -> Result<()> {
        match self.next() {
            Some(t) if t.tok == want => Ok(()),
            Some(t) => Err(self.unexpected(t.line, &t.tok)),
            None => Err(self.eof()),
        }
    }

    fn call(&mut self) -> Result<Call> {
        let name = match self.next() {
            Some(Token {
                tok: Tok::Ident(name),
                ..
            }) => name,
            Some(t) => return Err(self.unexpected(t.line, &t.tok)),
            None => return Err(self.eof()),
        };
        self.expect(Tok::LParen)?;
        let args = self.args()?;
        Ok(Call { name, args })
    }

    /// Arguments up to and including the closing parenthesis.
    fn args(&mut self) -> Result<Vec<Arg>> {
        let mut args = Vec::new();
        loop {
            if matches!(self.peek().map(|t| &t.tok), Some(Tok::RParen)) {
                self.pos += 1;
                return Ok(args);
            }

            let keyword = match (self.toks.get(self.pos), self.toks.get(self.pos + 1)) {
                (
                    Some(Token {
                        tok: Tok::Ident(name),
                        ..
                    }),
                    Some(Token { tok: Tok::Eq, .. }),
                ) => Some(name.clone()),
                _ => None,
            };
            if keyword.is_some() {
                self.pos += 2;
            }
            let value = self.value()?;
            args.push(Arg {
                name: keyword,
                value,
            });

            match self.next() {
                Some(Token { tok: Tok::Comma, .. }) => {}
                Some(Token {
                    tok: Tok::RParen, ..
                }) => return Ok(args),
                Some(t) => return Err(self.unexpected(t.line, &t.tok)),
                None => return Err(self.eof()),
            }
        }
    }

    /// Comma separated values up to `close`; returns them with a flag telling
    /// whether a trailing comma was present.
    fn sequence(&mut self, close: Tok) -> Result<(Vec<Value>, bool)> {
        let mut items = Vec::new();
        let mut trailing = false;
        loop {
            match self.peek() {
                Some(t) if t.tok == close => {
                    self.pos += 1;
                    return Ok((items, trailing));
                }
                None => return Err(self.eof()),
                _ => {}
            }
            items.push(self.value()?);
            trailing = false;
            match self.next() {
                Some(Token { tok: Tok::Comma, .. }) => trailing = true,
                Some(t) if t.tok == close => return Ok((items, false)),
                Some(t) => return Err(self.unexpected(t.line, &t.tok)),
                None => return Err(self.eof()),
            }
        }
    }

    fn value(&mut self) -> Result<Value> {
        let t = self.next().ok_or_else(|| self.eof())?;
        match t.tok {
            Tok::Int(v) => Ok(Value::Int(v)),
            Tok::Float(s) => Ok(Value::Float(s)),
            Tok::Str(s) => Ok(Value::Str(s)),
            Tok::Ident(name) => {
                if matches!(self.peek().map(|t| &t.tok), Some(Tok::LParen)) {
                    self.pos += 1;
                    let args = self.args()?;
                    Ok(Value::Call(Call { name, args }))
                } else {
                    Ok(Value::Ident(name))
                }
            }
            Tok::LBracket => Ok(Value::List(self.sequence(Tok::RBracket)?.0)),
            Tok::LParen => {
                let (mut items, trailing) = self.sequence(Tok::RParen)?;
                if items.len() == 1 && !trailing {
                    Ok(items.remove(0))
                } else {
                    Ok(Value::Tuple(items))
                }
            }
            other => Err(self.unexpected(t.line, &other)),
        }
    }
}
