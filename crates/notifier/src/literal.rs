//! Reader for Python-style literal mappings.
//!
//! Older producers serialised jobs with `str(dict)`, e.g.
//! `{'id': 'abc123', 'retries': 1}`. This converts such text into a
//! [`serde_json::Value`] so both formats share one decoding path.
//!
//! Supported: dicts, lists, tuples (as arrays), single/double-quoted strings
//! with common escapes, integers, floats, `True`, `False`, `None`.

use serde_json::{Map, Number, Value};

/// Deepest container nesting accepted, same as serde_json's recursion limit.
const MAX_DEPTH: usize = 128;

/// Parse a complete literal. Trailing input other than whitespace is an error.
pub fn parse(input: &str) -> Result<Value, String> {
    let mut parser = Parser {
        chars: input.char_indices().peekable(),
        input,
        depth: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    match parser.chars.peek() {
        None => Ok(value),
        Some(&(pos, c)) => Err(format!("unexpected `{}` at offset {}", c, pos)),
    }
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    input: &'a str,
    depth: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map(|&(pos, _)| pos)
            .unwrap_or(self.input.len())
    }

    fn expect(&mut self, want: char) -> Result<(), String> {
        self.skip_ws();
        match self.chars.next() {
            Some((_, c)) if c == want => Ok(()),
            Some((pos, c)) => Err(format!("expected `{}` at offset {}, found `{}`", want, pos, c)),
            None => Err(format!("expected `{}`, found end of input", want)),
        }
    }

    fn value(&mut self) -> Result<Value, String> {
        self.skip_ws();
        let Some(&(pos, c)) = self.chars.peek() else {
            return Err("unexpected end of input".to_string());
        };
        match c {
            '{' | '[' | '(' => {
                self.depth += 1;
                if self.depth > MAX_DEPTH {
                    return Err(format!("nesting deeper than {} at offset {}", MAX_DEPTH, pos));
                }
                let value = match c {
                    '{' => self.dict(),
                    '[' => self.sequence('[', ']'),
                    _ => self.sequence('(', ')'),
                };
                self.depth -= 1;
                value
            }
            '\'' | '"' => self.string().map(Value::String),
            '-' | '+' | '0'..='9' | '.' => self.number(),
            c if c.is_alphabetic() => self.keyword(),
            other => Err(format!("unexpected `{}` at offset {}", other, pos)),
        }
    }

    fn dict(&mut self) -> Result<Value, String> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if matches!(self.chars.peek(), Some((_, '}'))) {
                self.chars.next();
                return Ok(Value::Object(map));
            }
            let key = match self.value()? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => (if b { "True" } else { "False" }).to_string(),
                other => return Err(format!("unsupported mapping key: {}", other)),
            };
            self.expect(':')?;
            let value = self.value()?;
            map.insert(key, value);

            self.skip_ws();
            match self.chars.next() {
                Some((_, ',')) => continue,
                Some((_, '}')) => return Ok(Value::Object(map)),
                Some((pos, c)) => {
                    return Err(format!("expected `,` or `}}` at offset {}, found `{}`", pos, c));
                }
                None => return Err("unterminated mapping".to_string()),
            }
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Value, String> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if matches!(self.chars.peek(), Some(&(_, c)) if c == close) {
                self.chars.next();
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.chars.next() {
                Some((_, ',')) => continue,
                Some((_, c)) if c == close => return Ok(Value::Array(items)),
                Some((pos, c)) => {
                    return Err(format!("expected `,` or `{}` at offset {}, found `{}`", close, pos, c));
                }
                None => return Err("unterminated sequence".to_string()),
            }
        }
    }

    fn string(&mut self) -> Result<String, String> {
        let Some((start, quote)) = self.chars.next() else {
            return Err("expected string".to_string());
        };
        let mut out = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                c if c == quote => return Ok(out),
                '\\' => {
                    let Some((pos, esc)) = self.chars.next() else {
                        break;
                    };
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        '\\' | '\'' | '"' => out.push(esc),
                        'x' => out.push(self.hex_escape(2, pos)?),
                        'u' => out.push(self.hex_escape(4, pos)?),
                        'U' => out.push(self.hex_escape(8, pos)?),
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                c => out.push(c),
            }
        }
        Err(format!("unterminated string starting at offset {}", start))
    }

    fn hex_escape(&mut self, digits: usize, pos: usize) -> Result<char, String> {
        let mut code = 0u32;
        for _ in 0..digits {
            let digit = self
                .chars
                .next()
                .and_then(|(_, c)| c.to_digit(16))
                .ok_or_else(|| format!("invalid escape at offset {}", pos))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| format!("invalid code point at offset {}", pos))
    }

    fn number(&mut self) -> Result<Value, String> {
        let start = self.offset();
        while matches!(
            self.chars.peek(),
            Some((_, c)) if c.is_ascii_digit() || matches!(*c, '-' | '+' | '.' | 'e' | 'E' | '_')
        ) {
            self.chars.next();
        }
        let end = self.offset();
        let raw: String = self.input[start..end].chars().filter(|&c| c != '_').collect();

        if let Ok(i) = raw.parse::<i64>() {
            return Ok(Value::Number(i.into()));
        }
        raw.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("invalid number `{}` at offset {}", raw, start))
    }

    fn keyword(&mut self) -> Result<Value, String> {
        let start = self.offset();
        while matches!(self.chars.peek(), Some((_, c)) if c.is_alphanumeric() || *c == '_') {
            self.chars.next();
        }
        let end = self.offset();
        let input = self.input;
        let word = &input[start..end];

        // String prefixes such as u'...' and b'...'
        if matches!(word, "u" | "b" | "r") && matches!(self.chars.peek(), Some((_, '\'' | '"'))) {
            return self.string().map(Value::String);
        }

        match word {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            other => Err(format!("unknown identifier `{}` at offset {}", other, start)),
        }
    }
}
