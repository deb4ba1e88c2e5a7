//! Header value parsing: `;`-separated parameter lists and structured-field
//! dictionaries (RFC 8941 subset).
//!
//! Parameter lists carry `content-type` boundaries and `content-disposition`
//! names. Dictionaries carry signatures, manifest filters and server-defined
//! headers.

use std::collections::HashMap;

use serde_json::{Map, Number, Value};

/// Structured header could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid structured header at offset {offset}: {reason}")]
pub struct StructuredHeaderError {
    pub offset: usize,
    pub reason: String,
}

/// Parse a parameter list such as `multipart/mixed; boundary="abc"`.
///
/// Names are lowercased, values are trimmed and unquoted. A segment without
/// `=` is recorded with no value.
pub fn parse_parameters(input: &str, separator: char) -> HashMap<String, Option<String>> {
    let mut params = HashMap::new();

    for segment in split_unquoted(input, separator) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        match segment.split_once('=') {
            Some((name, value)) => {
                params.insert(name.trim().to_ascii_lowercase(), Some(unquote(value.trim())));
            }
            None => {
                params.insert(segment.to_ascii_lowercase(), None);
            }
        }
    }

    params
}

/// Look up one parameter value.
pub fn parameter(input: &str, separator: char, name: &str) -> Option<String> {
    parse_parameters(input, separator)
        .remove(&name.to_ascii_lowercase())
        .flatten()
}

fn split_unquoted(input: &str, separator: char) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            c if c == separator && !quoted => {
                segments.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    segments.push(&input[start..]);
    segments
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let inner = &value[1..value.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        out
    } else {
        value.to_string()
    }
}

/// A bare item of a structured-field dictionary member.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    String(String),
    Token(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
}

impl Item {
    /// Textual value for strings and tokens.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Item::String(s) | Item::Token(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Item::String(s) | Item::Token(s) => Value::String(s.clone()),
            Item::Integer(n) => Value::Number((*n).into()),
            Item::Decimal(d) => Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
            Item::Boolean(b) => Value::Bool(*b),
        }
    }
}

/// Parsed dictionary, in member order. Later duplicates replace earlier ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    members: Vec<(String, Item)>,
}

impl Dictionary {
    pub fn get(&self, key: &str) -> Option<&Item> {
        self.members.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Item)> {
        self.members.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn to_json_object(&self) -> Map<String, Value> {
        self.iter().map(|(k, v)| (k.to_string(), v.to_json())).collect()
    }

    fn insert(&mut self, key: String, item: Item) {
        if let Some(slot) = self.members.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = item;
        } else {
            self.members.push((key, item));
        }
    }
}

/// Parse a structured-field dictionary such as `sig="abc", keyid="root"`.
///
/// Member parameters are accepted and discarded. Inner lists and byte
/// sequences are not supported.
pub fn parse_dictionary(input: &str) -> Result<Dictionary, StructuredHeaderError> {
    let mut parser = Parser {
        input: input.as_bytes(),
        pos: 0,
    };
    let mut dict = Dictionary::default();

    parser.skip_whitespace();
    if parser.at_end() {
        return Ok(dict);
    }

    loop {
        let key = parser.parse_key()?;
        let item = if parser.eat(b'=') {
            parser.parse_bare_item()?
        } else {
            Item::Boolean(true)
        };
        parser.skip_parameters()?;
        dict.insert(key, item);

        parser.skip_whitespace();
        if parser.at_end() {
            return Ok(dict);
        }
        if !parser.eat(b',') {
            return Err(parser.error("expected ',' between members"));
        }
        parser.skip_whitespace();
        if parser.at_end() {
            return Err(parser.error("trailing ','"));
        }
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, reason: &str) -> StructuredHeaderError {
        StructuredHeaderError {
            offset: self.pos,
            reason: reason.to_string(),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn parse_key(&mut self) -> Result<String, StructuredHeaderError> {
        match self.peek() {
            Some(c) if c.is_ascii_lowercase() || c == b'*' => {}
            _ => return Err(self.error("key must start with a lowercase letter or '*'")),
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, b'_' | b'-' | b'.' | b'*')
            {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    fn skip_parameters(&mut self) -> Result<(), StructuredHeaderError> {
        while self.eat(b';') {
            self.skip_whitespace();
            self.parse_key()?;
            if self.eat(b'=') {
                self.parse_bare_item()?;
            }
        }
        Ok(())
    }

    fn parse_bare_item(&mut self) -> Result<Item, StructuredHeaderError> {
        match self.peek() {
            Some(b'"') => self.parse_string(),
            Some(b'?') => self.parse_boolean(),
            Some(c) if c == b'-' || c.is_ascii_digit() => self.parse_number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'*' => Ok(self.parse_token()),
            _ => Err(self.error("unsupported item")),
        }
    }

    fn parse_string(&mut self) -> Result<Item, StructuredHeaderError> {
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(Item::String(String::from_utf8_lossy(&out).into_owned()));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ (b'"' | b'\\')) => {
                            out.push(c);
                            self.pos += 1;
                        }
                        _ => return Err(self.error("invalid escape in string")),
                    }
                }
                Some(c) if (0x20..0x7f).contains(&c) => {
                    out.push(c);
                    self.pos += 1;
                }
                Some(_) => return Err(self.error("invalid character in string")),
            }
        }
    }

    fn parse_boolean(&mut self) -> Result<Item, StructuredHeaderError> {
        self.pos += 1;
        match self.peek() {
            Some(b'1') => {
                self.pos += 1;
                Ok(Item::Boolean(true))
            }
            Some(b'0') => {
                self.pos += 1;
                Ok(Item::Boolean(false))
            }
            _ => Err(self.error("invalid boolean")),
        }
    }

    fn parse_number(&mut self) -> Result<Item, StructuredHeaderError> {
        let start = self.pos;
        self.eat(b'-');
        let mut is_decimal = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == b'.' && !is_decimal {
                is_decimal = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("invalid number"))?;
        if is_decimal {
            text.parse()
                .map(Item::Decimal)
                .map_err(|_| self.error("invalid decimal"))
        } else {
            text.parse()
                .map(Item::Integer)
                .map_err(|_| self.error("invalid integer"))
        }
    }

    fn parse_token(&mut self) -> Item {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~:/".contains(&c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        Item::Token(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }
}
