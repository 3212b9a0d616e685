//! The two xpath lexers: one for the navigational skeleton of a path, one
//! for the filter and function expressions embedded in it.

use crate::tokenize::{is_quote, is_space, ByteReader, Token};

use super::XpathError;

/// Path step kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PathToken {
    #[default]
    Undefined,
    SelfStep,
    ParentStep,
    Child,
    Descendant,
    Node,
    Wildcard,
    Filter,
    Function,
    Expression,
}

/// Expression token kinds. Ordered so that everything at or after `Equals`
/// is operator-like and everything at or before `Variable` is argument-like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ExprToken {
    #[default]
    Undefined,
    Boolean,
    String,
    Integer,
    Variable,
    Comma,
    Expression,
    Equals,
    Function,
    Lt,
    Gt,
    Lte,
    Gte,
    And,
    Or,
}

/// Bytes that end a bareword in path position.
const PATH_SPECIAL: &[u8] = b"*[]/";

/// Bytes that end a bareword in expression position.
const EXPR_SPECIAL: &[u8] = b"*[]()/<>,=.";

pub(crate) struct PathLexer<I: Iterator<Item = u8>> {
    reader: ByteReader<I>,
}

impl<I: Iterator<Item = u8>> PathLexer<I> {
    pub fn new(stream: I) -> Self {
        Self {
            reader: ByteReader::new(stream),
        }
    }

    pub fn next_token(&mut self) -> Result<Option<Token<PathToken>>, XpathError> {
        let token = self.scan()?;
        if token.kind == PathToken::Undefined && token.value.is_empty() {
            return Ok(None);
        }
        Ok(Some(token))
    }

    /// Capture the contents of a `[…]` filter verbatim, balanced with
    /// respect to quotes.
    fn read_filter(&mut self, value: &mut Vec<u8>) {
        while let Some(byte) = self.reader.read_byte() {
            if byte == b']' {
                break;
            }
            if is_quote(byte) {
                value.push(byte);
                self.reader.read_quote(byte, value);
            }
            value.push(byte);
        }
    }

    /// Capture a toplevel expression: everything up to unbracketed
    /// whitespace, with parens, brackets and quotes balanced.
    fn read_expression(&mut self, value: &mut Vec<u8>) -> Result<(), XpathError> {
        let mut pending: Vec<u8> = Vec::new();
        while let Some(byte) = self.reader.read_byte() {
            if is_space(byte) && pending.is_empty() {
                self.reader.unread(&[byte])?;
                break;
            } else if is_quote(byte) {
                value.push(byte);
                self.reader.read_quote(byte, value);
            } else if byte == b'(' {
                pending.push(b')');
            } else if byte == b'[' {
                pending.push(b']');
            } else if (byte == b')' || byte == b']') && pending.last() == Some(&byte) {
                pending.pop();
            }
            value.push(byte);
        }
        Ok(())
    }

    /// Look ahead past a `/` for the start of an expression (`'`, `"`, `@`,
    /// `(`), restoring everything scanned.
    fn expr_ahead(&mut self) -> bool {
        let mut found = false;
        let mut buffer = Vec::new();
        while let Some(byte) = self.reader.read_byte() {
            buffer.push(byte);
            if byte == b'/' {
                break;
            }
            if buffer.len() > 1 && byte == b'[' {
                break;
            }
            if matches!(byte, b'\'' | b'"' | b'@' | b'(') {
                found = true;
                break;
            }
        }
        self.reader.push_back(&buffer);
        found
    }

    fn scan(&mut self) -> Result<Token<PathToken>, XpathError> {
        let mut kind = PathToken::Undefined;
        let mut value = Vec::new();
        let position = self.reader.position;
        while let Some(byte) = self.reader.read_byte() {
            if kind == PathToken::Undefined {
                match byte {
                    b'.' => kind = PathToken::SelfStep,
                    b'/' => {
                        value.push(byte);
                        kind = PathToken::Child;
                    }
                    b'*' => {
                        value.push(byte);
                        kind = PathToken::Wildcard;
                        break;
                    }
                    b'[' => {
                        kind = PathToken::Filter;
                        self.read_filter(&mut value);
                        break;
                    }
                    _ => {
                        kind = PathToken::Node;
                        value.push(byte);
                        self.reader.read_word(&mut value, PATH_SPECIAL)?;
                        break;
                    }
                }
                continue;
            }
            match kind {
                PathToken::Child => {
                    if byte == b'/' {
                        kind = PathToken::Descendant;
                        value.push(byte);
                        break;
                    }
                    self.reader.unread(&[byte])?;
                    if self.expr_ahead() {
                        kind = PathToken::SelfStep;
                    }
                    break;
                }
                PathToken::SelfStep | PathToken::ParentStep => {
                    if byte == b'.' {
                        kind = PathToken::ParentStep;
                        value.push(byte);
                        continue;
                    }
                    self.reader.unread(&[byte])?;
                    break;
                }
                _ => break,
            }
        }
        // A node whose value cannot be a tag name is really a filter or an
        // expression: put it back and re-read it as one.
        let alnum = !value.is_empty() && value.iter().all(|b| b.is_ascii_alphanumeric());
        if kind == PathToken::Node && !alnum {
            self.reader.unread(&value)?;
            value.clear();
            match self.reader.read_byte() {
                Some(b'[') => {
                    kind = PathToken::Filter;
                    self.read_filter(&mut value);
                }
                Some(other) => {
                    self.reader.unread(&[other])?;
                    kind = PathToken::Expression;
                    self.read_expression(&mut value)?;
                }
                None => kind = PathToken::Expression,
            }
        }
        if kind != PathToken::Filter && value.ends_with(b"()") {
            kind = PathToken::Function;
        }
        Ok(Token {
            kind,
            value,
            lineno: 0,
            position,
        })
    }
}

pub(crate) struct ExprLexer<I: Iterator<Item = u8>> {
    reader: ByteReader<I>,
}

impl<I: Iterator<Item = u8>> ExprLexer<I> {
    pub fn new(stream: I) -> Self {
        Self {
            reader: ByteReader::new(stream),
        }
    }

    pub fn next_token(&mut self) -> Result<Option<Token<ExprToken>>, XpathError> {
        let token = self.scan()?;
        if token.kind == ExprToken::Undefined && token.value.is_empty() {
            return Ok(None);
        }
        Ok(Some(token))
    }

    fn read_word(&mut self, value: &mut Vec<u8>) -> Result<(), XpathError> {
        self.reader.read_word(value, EXPR_SPECIAL)?;
        Ok(())
    }

    /// Capture a parenthesized run through its matching `)`.
    fn read_expression(&mut self, value: &mut Vec<u8>) {
        let mut depth = 1u32;
        while let Some(byte) = self.reader.read_byte() {
            if is_quote(byte) {
                value.push(byte);
                self.reader.read_quote(byte, value);
            } else if byte == b'(' {
                depth += 1;
            } else if byte == b')' {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            value.push(byte);
        }
    }

    /// Guess a token kind from its first byte.
    fn guess_token(&mut self, byte: u8, value: &mut Vec<u8>) -> Result<ExprToken, XpathError> {
        match byte {
            b'@' => {
                self.read_word(value)?;
                Ok(ExprToken::Variable)
            }
            b',' => Ok(ExprToken::Comma),
            b'=' => Ok(ExprToken::Equals),
            b'<' => Ok(ExprToken::Lt),
            b'>' => Ok(ExprToken::Gt),
            b'(' => {
                self.read_expression(value);
                Ok(ExprToken::Expression)
            }
            b'0'..=b'9' => {
                value.push(byte);
                self.read_word(value)?;
                Ok(ExprToken::Integer)
            }
            b'"' | b'\'' => {
                self.reader.read_quote(byte, value);
                Ok(ExprToken::String)
            }
            _ => {
                value.push(byte);
                Ok(ExprToken::Undefined)
            }
        }
    }

    fn scan(&mut self) -> Result<Token<ExprToken>, XpathError> {
        let mut kind = ExprToken::Undefined;
        let mut value = Vec::new();
        let position = self.reader.position;
        while let Some(byte) = self.reader.read_byte() {
            if is_space(byte) {
                break;
            }
            if kind == ExprToken::Undefined && value.is_empty() {
                kind = self.guess_token(byte, &mut value)?;
                if kind != ExprToken::Undefined && kind <= ExprToken::Equals {
                    self.reader.skip_spaces()?;
                    break;
                }
                continue;
            }
            if kind == ExprToken::Lt || kind == ExprToken::Gt {
                if byte == b'=' {
                    kind = if kind == ExprToken::Lt {
                        ExprToken::Lte
                    } else {
                        ExprToken::Gte
                    };
                } else {
                    self.reader.unread(&[byte])?;
                }
                self.reader.skip_spaces()?;
                break;
            }
            if byte == b'(' {
                kind = ExprToken::Function;
                self.reader.unread(&[byte])?;
                break;
            }
            value.push(byte);
        }
        if kind == ExprToken::Undefined {
            kind = match value.as_slice() {
                b"and" => ExprToken::And,
                b"or" => ExprToken::Or,
                b"true" | b"false" => ExprToken::Boolean,
                _ => ExprToken::Undefined,
            };
        }
        Ok(Token {
            kind,
            value,
            lineno: 0,
            position,
        })
    }
}
