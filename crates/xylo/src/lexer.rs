//! Pull lexer for XML and lenient HTML markup.
//!
//! Each call to [`Lexer::next_token`] yields the next token or `None` at end
//! of stream. The lexer is context sensitive: decisions depend on the kind of
//! the last token emitted and on the name of the last opened tag (so that the
//! bodies of `<script>` and `<style>` can be read verbatim).

use thiserror::Error;

use crate::tokenize::{is_quote, is_space, ByteReader, Token, UnreadError};

/// Token kinds in context order. The ordering is load-bearing: whitespace is
/// skipped while the last kind precedes `TagEnd`, and content context is any
/// kind from `TagEnd` through `Instruction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TokenKind {
    #[default]
    Undefined,
    TagStart,
    AttrName,
    AttrValue,
    TagEnd,
    TagClose,
    Comment,
    Declaration,
    Instruction,
    Text,
}

/// Bytes that terminate names and bare words inside a tag.
const SPECIAL: &[u8] = b"=<>/";

const fn is_special(byte: u8) -> bool {
    matches!(byte, b'=' | b'<' | b'>' | b'/')
}

/// Tags whose bodies are read raw, scanning only for the matching end tag.
fn is_raw_text_tag(tag: &[u8]) -> bool {
    matches!(tag, b"script" | b"style")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("processing instruction never terminated (line {lineno}, column {position})")]
    UnterminatedInstruction { lineno: u32, position: u32 },
    #[error("unable to track source position")]
    LostPosition,
}

impl From<UnreadError> for LexError {
    fn from(_: UnreadError) -> Self {
        LexError::LostPosition
    }
}

pub struct Lexer<I: Iterator<Item = u8>> {
    reader: ByteReader<I>,
    last_kind: TokenKind,
    last_tag: Option<Vec<u8>>,
}

impl<I: Iterator<Item = u8>> Lexer<I> {
    pub fn new(stream: I) -> Self {
        Self {
            reader: ByteReader::new(stream),
            last_kind: TokenKind::Undefined,
            last_tag: None,
        }
    }

    /// Produce the next token, or `None` once the stream is exhausted.
    pub fn next_token(&mut self) -> Result<Option<Token<TokenKind>>, LexError> {
        let token = self.scan()?;
        if token.kind == TokenKind::Undefined && token.value.is_empty() {
            return Ok(None);
        }
        self.last_kind = token.kind;
        Ok(Some(token))
    }

    fn scan(&mut self) -> Result<Token<TokenKind>, LexError> {
        let mut kind = TokenKind::Undefined;
        let mut value = Vec::new();
        let lineno = self.reader.lineno;
        let position = self.reader.position;
        let mut last_byte = None;
        while let Some(byte) = self.reader.read_byte() {
            last_byte = Some(byte);
            // Whitespace is insignificant inside a tag definition.
            if is_space(byte) && self.last_kind < TokenKind::TagEnd {
                continue;
            }
            if kind == TokenKind::Undefined {
                kind = self.guess_token(byte, &mut value)?;
                if matches!(
                    kind,
                    TokenKind::TagEnd | TokenKind::TagClose | TokenKind::Text
                ) {
                    break;
                }
                continue;
            }
            // Refine the guess from the byte following `<`.
            if kind == TokenKind::TagStart {
                if byte == b'!' {
                    kind = TokenKind::Declaration;
                    continue;
                }
                if byte == b'?' {
                    kind = TokenKind::Instruction;
                    continue;
                }
            }
            if byte == b'-' && kind == TokenKind::Declaration {
                kind = TokenKind::Comment;
                continue;
            }
            // An attribute name ends at the first special byte; everything
            // else carries one more byte into the dispatch below.
            if kind == TokenKind::AttrName && is_special(byte) {
                self.reader.unread(&[byte])?;
            } else if !is_quote(byte) {
                value.push(byte);
            }
            break;
        }
        match kind {
            TokenKind::TagStart => {
                self.read_tag(&mut value)?;
                if value.iter().all(|&b| is_special(b)) || value.first() == Some(&b' ') {
                    // Not a real tag (`< foo`, `</>`): recover as text with
                    // the consumed `<` put back in front.
                    kind = TokenKind::Text;
                    value.insert(0, b'<');
                    value.push(b' ');
                    self.handle_text(&mut value)?;
                } else {
                    self.last_tag = Some(value.clone());
                }
            }
            TokenKind::AttrValue if matches!(last_byte, Some(q) if is_quote(q)) => {
                if let Some(quote) = last_byte {
                    self.reader.read_quote(quote, &mut value);
                }
            }
            TokenKind::AttrName | TokenKind::AttrValue => {
                self.reader.read_word(&mut value, SPECIAL)?;
            }
            TokenKind::TagEnd | TokenKind::TagClose => {}
            TokenKind::Text => self.handle_text(&mut value)?,
            TokenKind::Comment => self.read_comment(&mut value),
            TokenKind::Declaration => self.read_declaration(&mut value),
            TokenKind::Instruction => self.read_instruction(&mut value, lineno, position)?,
            TokenKind::Undefined => {}
        }
        Ok(Token {
            kind,
            value,
            lineno,
            position,
        })
    }

    /// Guess the token kind from a single byte plus the emitted-token context.
    fn guess_token(&mut self, byte: u8, value: &mut Vec<u8>) -> Result<TokenKind, LexError> {
        if byte == b'<' {
            return Ok(TokenKind::TagStart);
        }
        if byte == b'/' && self.last_kind != TokenKind::TagEnd {
            if self.look_ahead(b'>')? {
                return Ok(TokenKind::TagClose);
            }
        } else if byte == b'>' {
            return Ok(TokenKind::TagEnd);
        } else if byte == b'=' && self.last_kind == TokenKind::AttrName {
            self.reader.skip_spaces()?;
            return Ok(TokenKind::AttrValue);
        }
        // Anything else is content or an attribute, depending on context.
        if self.last_kind == TokenKind::Undefined
            || (TokenKind::TagEnd <= self.last_kind && self.last_kind <= TokenKind::Instruction)
        {
            value.push(byte);
            return Ok(TokenKind::Text);
        }
        if !is_space(byte) {
            value.push(byte);
            return Ok(TokenKind::AttrName);
        }
        Ok(TokenKind::Undefined)
    }

    /// Check whether `find` is the next non-space byte. When found it is
    /// consumed; otherwise everything read is pushed back.
    fn look_ahead(&mut self, find: u8) -> Result<bool, LexError> {
        let mut found = false;
        let mut buffer = Vec::new();
        while let Some(byte) = self.reader.read_byte() {
            buffer.push(byte);
            if is_space(byte) {
                continue;
            }
            if byte == find {
                found = true;
            }
            break;
        }
        if !found {
            self.reader.push_back(&buffer);
        }
        Ok(found)
    }

    /// Complete a tag name, tolerating whitespace before it and a `/` prefix.
    fn read_tag(&mut self, value: &mut Vec<u8>) -> Result<(), LexError> {
        while let Some(byte) = self.reader.read_byte() {
            if is_space(byte) {
                if !value.is_empty() && value.as_slice() != b"/" {
                    break;
                }
                continue;
            }
            if is_special(byte) {
                self.reader.unread(&[byte])?;
                break;
            }
            value.push(byte);
        }
        Ok(())
    }

    /// Read plain content until the next markup byte.
    fn read_text(&mut self, value: &mut Vec<u8>) -> Result<(), LexError> {
        while let Some(byte) = self.reader.read_byte() {
            if byte == b'<' || byte == b'>' {
                self.reader.unread(&[byte])?;
                break;
            }
            value.push(byte);
        }
        Ok(())
    }

    /// Read content, switching to the raw end-tag scanner inside the body of
    /// a `<script>` or `<style>` element.
    fn handle_text(&mut self, value: &mut Vec<u8>) -> Result<(), LexError> {
        let raw_tag = self
            .last_tag
            .as_deref()
            .filter(|tag| is_raw_text_tag(tag))
            .map(<[u8]>::to_vec);
        match raw_tag {
            Some(tag) => {
                let mut end = Vec::with_capacity(tag.len() + 3);
                end.extend_from_slice(b"</");
                end.extend_from_slice(&tag);
                end.push(b'>');
                self.read_raw(value, &end)
            }
            None => self.read_text(value),
        }
    }

    /// Scan for the literal `end` bytes; everything before them is content
    /// and the end tag itself is pushed back for normal lexing. Reaching end
    /// of stream first abandons the scanned bytes.
    fn read_raw(&mut self, value: &mut Vec<u8>, end: &[u8]) -> Result<(), LexError> {
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(byte) = self.reader.read_byte() {
            buffer.push(byte);
            if buffer.ends_with(end) {
                value.extend_from_slice(&buffer[..buffer.len() - end.len()]);
                self.reader.unread(end)?;
                break;
            }
        }
        Ok(())
    }

    /// Read a comment body through `-->`. Dashes are buffered so the closing
    /// run never leaks into the body; a dash run before any body byte is
    /// discarded outright.
    fn read_comment(&mut self, value: &mut Vec<u8>) {
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(byte) = self.reader.read_byte() {
            if byte == b'-' {
                if !value.is_empty() {
                    buffer.push(byte);
                }
                continue;
            }
            if byte == b'>' && buffer.len() >= 2 {
                break;
            }
            if !buffer.is_empty() {
                value.extend_from_slice(&buffer);
                buffer.clear();
            }
            value.push(byte);
        }
        if value.first() == Some(&b'-') {
            value.remove(0);
        }
    }

    /// Read a declaration through its closing `>`, tolerating `[ … ]`
    /// nesting (DOCTYPE internal subsets) and embedded quoted strings.
    fn read_declaration(&mut self, value: &mut Vec<u8>) {
        let mut brackets = 0i32;
        while let Some(byte) = self.reader.read_byte() {
            if byte == b'[' {
                brackets += 1;
            } else if byte == b']' {
                brackets -= 1;
            } else if is_quote(byte) {
                value.push(byte);
                self.reader.read_quote(byte, value);
            } else if byte == b'>' && brackets <= 0 {
                break;
            }
            value.push(byte);
        }
    }

    /// Read a processing instruction through `?>`. The `?` bytes never reach
    /// the captured value; quoted runs may contain anything.
    fn read_instruction(
        &mut self,
        value: &mut Vec<u8>,
        lineno: u32,
        position: u32,
    ) -> Result<(), LexError> {
        let mut question = true;
        while let Some(byte) = self.reader.read_byte() {
            if is_quote(byte) {
                value.push(byte);
                self.reader.read_quote(byte, value);
            } else if byte == b'?' {
                question = true;
                continue;
            } else if question {
                if byte == b'>' {
                    return Ok(());
                }
                question = false;
            }
            value.push(byte);
        }
        Err(LexError::UnterminatedInstruction { lineno, position })
    }
}
