//! Parser driver: pulls markup tokens, decodes them under the active text
//! encoding, and feeds builder events.
//!
//! The driver itself is deliberately thin. Recovery policy lives in the
//! builder; the driver owns decoding because it has to observe the XML
//! declaration (`<?xml encoding=…?>`) before most of the content arrives.

use std::fmt;
use std::io;

use thiserror::Error as ThisError;

use crate::builder::TreeBuilder;
use crate::element::{Attributes, Document};
use crate::html;
use crate::lexer::{LexError, Lexer, TokenKind};
use crate::tokenize::Token;
use crate::Error;

/// Text encodings the driver can decode. The default is UTF-8 until an XML
/// declaration names something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

impl Encoding {
    /// Resolve a declared encoding label. Comparison is case-insensitive and
    /// tolerates the usual aliases.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Encoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" | "l1" => Some(Encoding::Latin1),
            "ascii" | "us-ascii" => Some(Encoding::Ascii),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Latin1 => "latin-1",
            Encoding::Ascii => "us-ascii",
        }
    }

    pub(crate) fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
            Encoding::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
            Encoding::Ascii => bytes
                .is_ascii()
                .then(|| bytes.iter().map(|&b| b as char).collect()),
        }
    }

    /// Encode `text` for output; fails on the first unrepresentable char.
    pub(crate) fn encode(&self, text: &str) -> Result<Vec<u8>, char> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Latin1 => text
                .chars()
                .map(|ch| u8::try_from(u32::from(ch)).map_err(|_| ch))
                .collect(),
            Encoding::Ascii => text
                .chars()
                .map(|ch| {
                    if ch.is_ascii() {
                        Ok(ch as u8)
                    } else {
                        Err(ch)
                    }
                })
                .collect(),
        }
    }
}

/// The token a structural error was raised on: its kind, raw bytes, and
/// source coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenContext {
    pub kind: TokenKind,
    pub value: Vec<u8>,
    pub lineno: u32,
    pub position: u32,
}

impl TokenContext {
    fn from_token(token: &Token<TokenKind>) -> Self {
        Self {
            kind: token.kind,
            value: token.value.clone(),
            lineno: token.lineno,
            position: token.position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ParserErrorKind {
    #[error("missing tag end")]
    MissingTagEnd,
    #[error("unexpected tag token")]
    UnexpectedTagToken,
    #[error("unexpected token")]
    UnexpectedToken,
    #[error("processing instruction never terminated")]
    UnterminatedInstruction,
    #[error("cannot decode bytes as {0}")]
    Decode(&'static str),
    #[error("unknown encoding label {0:?}")]
    UnknownEncoding(String),
    #[error("unable to track source position")]
    LostPosition,
}

/// A structural parsing error, carrying the offending token when one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserError {
    pub kind: ParserErrorKind,
    pub context: Option<TokenContext>,
}

impl ParserError {
    fn new(kind: ParserErrorKind, context: Option<TokenContext>) -> Self {
        Self { kind, context }
    }

    /// Raw bytes of the offending token.
    pub fn code(&self) -> Option<&[u8]> {
        self.context.as_ref().map(|ctx| ctx.value.as_slice())
    }

    /// `(lineno, column)` of the offending token.
    pub fn position(&self) -> Option<(u32, u32)> {
        self.context.as_ref().map(|ctx| (ctx.lineno, ctx.position))
    }
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(
                f,
                " at {:?} lineno={}, index={}",
                String::from_utf8_lossy(&ctx.value),
                ctx.lineno,
                ctx.position
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for ParserError {}

impl From<LexError> for ParserError {
    fn from(err: LexError) -> Self {
        match err {
            LexError::UnterminatedInstruction { lineno, position } => ParserError::new(
                ParserErrorKind::UnterminatedInstruction,
                Some(TokenContext {
                    kind: TokenKind::Instruction,
                    value: Vec::new(),
                    lineno,
                    position,
                }),
            ),
            LexError::LostPosition => ParserError::new(ParserErrorKind::LostPosition, None),
        }
    }
}

/// Feed-oriented parser over the markup lexer.
///
/// Bytes arrive either through [`feed`](Parser::feed), from a reader attached
/// with [`read_from`](Parser::read_from), or from a plain byte iterator via
/// [`parse`](Parser::parse). [`close`](Parser::close) selects the source and
/// drives the lexer to end of stream.
pub struct Parser {
    builder: TreeBuilder,
    encoding: Encoding,
    html_mode: bool,
    buffer: Vec<u8>,
    source: Option<Box<dyn io::Read>>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::with_builder(TreeBuilder::new())
    }

    pub fn with_builder(builder: TreeBuilder) -> Self {
        Self {
            builder,
            encoding: Encoding::default(),
            html_mode: false,
            buffer: Vec::new(),
            source: None,
        }
    }

    /// Enable the HTML deviations: void tags start-end immediately and a
    /// repeated `li`-like sibling implies an end tag.
    pub fn html_mode(mut self, enabled: bool) -> Self {
        self.html_mode = enabled;
        self
    }

    /// Append bytes to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attach a byte source to be drained at close.
    pub fn read_from(&mut self, source: impl io::Read + 'static) {
        self.source = Some(Box::new(source));
    }

    /// Consume all pending input and finish the tree.
    pub fn close(mut self) -> Result<Document, Error> {
        if let Some(mut source) = self.source.take() {
            source.read_to_end(&mut self.buffer)?;
        }
        let buffer = std::mem::take(&mut self.buffer);
        self.parse(buffer)
    }

    /// Parse a complete byte stream.
    pub fn parse(mut self, stream: impl IntoIterator<Item = u8>) -> Result<Document, Error> {
        let mut lexer = Lexer::new(stream.into_iter());
        while self.next_event(&mut lexer)? {}
        Ok(self.builder.close()?)
    }

    fn decode(&self, token: &Token<TokenKind>) -> Result<String, ParserError> {
        self.encoding.decode(&token.value).ok_or_else(|| {
            ParserError::new(
                ParserErrorKind::Decode(self.encoding.label()),
                Some(TokenContext::from_token(token)),
            )
        })
    }

    fn unescape(&self, value: &str) -> Result<String, Error> {
        Ok(charrefs::unescape(value)?.into_owned())
    }

    /// Process one token from the lexer; false once the stream is done.
    fn next_event<I: Iterator<Item = u8>>(&mut self, lexer: &mut Lexer<I>) -> Result<bool, Error> {
        let token = match lexer.next_token().map_err(ParserError::from)? {
            Some(token) => token,
            None => return Ok(false),
        };
        match token.kind {
            TokenKind::TagStart => {
                let tag = self.decode(&token)?;
                self.parse_tag(lexer, &tag)?;
            }
            TokenKind::Text => {
                let value = self.decode(&token)?;
                let value = self.unescape(&value)?;
                self.builder.data(&value);
            }
            TokenKind::Comment => {
                let value = self.decode(&token)?;
                let value = self.unescape(&value)?;
                self.builder.comment(&value)?;
            }
            TokenKind::Declaration => {
                let value = self.decode(&token)?;
                self.builder.declaration(&value)?;
            }
            TokenKind::Instruction => {
                let value = self.decode(&token)?;
                self.process_pi(&value)?;
            }
            _ => {
                return Err(ParserError::new(
                    ParserErrorKind::UnexpectedToken,
                    Some(TokenContext::from_token(&token)),
                )
                .into());
            }
        }
        Ok(true)
    }

    /// Consume the rest of a tag: for an end tag the required `>`, for a
    /// start tag the attribute pairs up to `>` or `/>`.
    fn parse_tag<I: Iterator<Item = u8>>(
        &mut self,
        lexer: &mut Lexer<I>,
        tag: &str,
    ) -> Result<(), Error> {
        if let Some(stripped) = tag.strip_prefix('/') {
            let result = lexer.next_token().map_err(ParserError::from)?;
            match &result {
                Some(token) if token.kind == TokenKind::TagEnd => {}
                _ => {
                    return Err(ParserError::new(
                        ParserErrorKind::MissingTagEnd,
                        result.as_ref().map(TokenContext::from_token),
                    )
                    .into());
                }
            }
            let tag = stripped.trim_start_matches('/');
            self.builder.end(tag)?;
            return Ok(());
        }
        let mut closed = false;
        let mut incomplete: Vec<String> = Vec::new();
        let mut attributes = Attributes::new();
        loop {
            let result = match lexer.next_token().map_err(ParserError::from)? {
                Some(result) => result,
                None => break,
            };
            if result.kind == TokenKind::TagEnd {
                break;
            }
            let value = self.decode(&result)?;
            match result.kind {
                TokenKind::TagClose => {
                    closed = true;
                    break;
                }
                TokenKind::AttrName => incomplete.push(value),
                TokenKind::AttrValue => match incomplete.pop() {
                    Some(name) => attributes.set(name, self.unescape(&value)?),
                    None => {
                        return Err(ParserError::new(
                            ParserErrorKind::UnexpectedTagToken,
                            Some(TokenContext::from_token(&result)),
                        )
                        .into());
                    }
                },
                _ => {
                    return Err(ParserError::new(
                        ParserErrorKind::UnexpectedTagToken,
                        Some(TokenContext::from_token(&result)),
                    )
                    .into());
                }
            }
        }
        // Bare attribute names default to the value "true".
        for name in incomplete {
            attributes.set(name, "true");
        }
        if self.html_mode {
            let open = self.builder.current_open_tag().map(str::to_owned);
            if let Some(open) = open {
                if html::implied_end(&open, tag) {
                    self.builder.end(&open)?;
                }
            }
        }
        let empty = self.html_mode && html::HTML_EMPTY.contains(tag);
        if closed || empty {
            self.builder.startend(tag, attributes)?;
        } else {
            self.builder.start(tag, attributes)?;
        }
        Ok(())
    }

    /// Split a processing instruction into target and value, watching the
    /// XML declaration for an encoding switch.
    fn process_pi(&mut self, value: &str) -> Result<(), Error> {
        let (target, rest) = match value.split_once(' ') {
            Some((target, rest)) => (target, rest),
            None => (value, ""),
        };
        if target == "xml" {
            if let Some(label) = scan_encoding(rest) {
                self.encoding = Encoding::from_label(&label).ok_or_else(|| {
                    ParserError::new(ParserErrorKind::UnknownEncoding(label), None)
                })?;
            }
        }
        self.builder.pi(target, rest)?;
        Ok(())
    }
}

/// Find the value of an `encoding=…` attribute in declaration content. The
/// last occurrence wins; surrounding quotes are stripped.
fn scan_encoding(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let keyword = b"encoding";
    let mut found = None;
    let mut at = 0;
    while at + keyword.len() <= bytes.len() {
        if !bytes[at..at + keyword.len()].eq_ignore_ascii_case(keyword) {
            at += 1;
            continue;
        }
        let mut rest = at + keyword.len();
        while bytes.get(rest).is_some_and(|b| b.is_ascii_whitespace()) {
            rest += 1;
        }
        if bytes.get(rest) != Some(&b'=') {
            at += 1;
            continue;
        }
        rest += 1;
        while bytes.get(rest).is_some_and(|b| b.is_ascii_whitespace()) {
            rest += 1;
        }
        let start = rest;
        while bytes
            .get(rest)
            .is_some_and(|b| !b.is_ascii_whitespace() && *b != b',')
        {
            rest += 1;
        }
        if rest > start {
            let label = value[start..rest].trim_matches(['\'', '"']);
            found = Some(label.to_owned());
        }
        at = rest.max(at + 1);
    }
    found
}

/// Parse a whole in-memory document. Text input is taken as UTF-8 bytes.
pub(crate) fn parse_bytes(data: &[u8]) -> Result<Document, Error> {
    let mut parser = Parser::new();
    parser.feed(data);
    parser.close()
}

#[cfg(test)]
mod test {
    use super::*;

    const INCOMPLETE_PI: &[u8] = b"
<document>
    <p>Paragraph #1</p>
    <?php echo \"<p>Paragraph #2</p>\"; >
    <p>Paragraph #3</p>
</document>
";

    const INCOMPLETE_START_TAG: &[u8] = b"
<document>
    <p>Paragraph #1</p>
    <p class=\"this is a test\" Paragraph #2</p>
    <p>Paragraph #3</p>
</document>
";

    const INCOMPLETE_END_TAG: &[u8] = b"
<document>
    <p>Paragraph #1</p>
    <p class=\"this is a test\"> Paragraph #2 </p
    <p>Paragraph #3</p>
</document>
";

    const BROKEN_XML: &[u8] = b"
><document>
    <p>Paragraph #1</p>
</document>
";

    fn parse_err(input: &[u8]) -> ParserError {
        let mut parser = Parser::new();
        parser.feed(input);
        match parser.close() {
            Err(Error::Parser(err)) => err,
            other => panic!("expected parser error, got {other:?}"),
        }
    }

    #[test]
    fn test_broken_pi() {
        let err = parse_err(INCOMPLETE_PI);
        assert_eq!(err.kind, ParserErrorKind::UnterminatedInstruction);
    }

    #[test]
    fn test_broken_start_tag() {
        let err = parse_err(INCOMPLETE_START_TAG);
        assert_eq!(err.kind, ParserErrorKind::UnexpectedTagToken);
        assert_eq!(err.code(), Some(b"/p".as_slice()));
        assert_eq!(err.position(), Some((4, 43)));
    }

    #[test]
    fn test_broken_end_tag() {
        let err = parse_err(INCOMPLETE_END_TAG);
        assert_eq!(err.kind, ParserErrorKind::MissingTagEnd);
        assert_eq!(err.code(), Some(b"p".as_slice()));
        assert_eq!(err.position(), Some((5, 1)));
    }

    #[test]
    fn test_unexpected_token() {
        let err = parse_err(BROKEN_XML);
        assert_eq!(err.kind, ParserErrorKind::UnexpectedToken);
        assert_eq!(err.code(), Some(b"".as_slice()));
        assert_eq!(err.position(), Some((1, 0)));
    }

    #[test]
    fn test_simple_parse() {
        let doc = parse_bytes(b"<a><b x='1'>t</b><b/></a>").unwrap();
        let root = doc.root().unwrap();
        assert_eq!(doc.tag(root), "a");
        let children = doc.children(root);
        assert_eq!(children.len(), 2);
        let first = children[0];
        let second = children[1];
        assert_eq!(doc.tag(first), "b");
        assert_eq!(doc.text(first), Some("t"));
        assert_eq!(doc.attr(first, "x"), Some("1"));
        assert_eq!(doc.text(second), None);
        assert!(doc.attrs(second).is_empty());
    }

    #[test]
    fn test_xml_declaration_and_charrefs() {
        let doc =
            parse_bytes(b"<?xml version='1.0' encoding='utf-8'?><r>&amp;&#65;</r>").unwrap();
        let root = doc.root().unwrap();
        assert_eq!(doc.tag(root), "r");
        assert_eq!(doc.text(root), Some("&A"));
    }

    #[test]
    fn test_latin1_encoding_switch() {
        let mut input = b"<?xml version='1.0' encoding='latin-1'?><r a='".to_vec();
        input.push(0xE9); // LATIN SMALL LETTER E WITH ACUTE
        input.extend_from_slice(b"'/>");
        let mut parser = Parser::new();
        parser.feed(&input);
        let doc = parser.close().unwrap();
        let root = doc.root().unwrap();
        assert_eq!(doc.attr(root, "a"), Some("\u{e9}"));
    }

    #[test]
    fn test_unknown_encoding() {
        let err = parse_err(b"<?xml version='1.0' encoding='ebcdic'?><r/>");
        assert_eq!(
            err.kind,
            ParserErrorKind::UnknownEncoding("ebcdic".into())
        );
    }

    #[test]
    fn test_invalid_utf8_reported() {
        let err = parse_err(b"<r>\xff\xfe</r>");
        assert_eq!(err.kind, ParserErrorKind::Decode("utf-8"));
    }

    #[test]
    fn test_bare_attributes_default_true() {
        let doc = parse_bytes(b"<input disabled readonly='yes'/>").unwrap();
        let root = doc.root().unwrap();
        assert_eq!(doc.attr(root, "readonly"), Some("yes"));
        assert_eq!(doc.attr(root, "disabled"), Some("true"));
    }

    #[test]
    fn test_read_from_source() {
        let mut parser = Parser::new();
        parser.read_from(io::Cursor::new(b"<a><b/></a>".to_vec()));
        let doc = parser.close().unwrap();
        assert_eq!(doc.tag(doc.root().unwrap()), "a");
    }

    #[test]
    fn test_scan_encoding() {
        assert_eq!(
            scan_encoding("version='1.0' encoding='utf-8'"),
            Some("utf-8".into())
        );
        assert_eq!(
            scan_encoding("version='1.0' ENCODING = \"latin-1\""),
            Some("latin-1".into())
        );
        assert_eq!(scan_encoding("version='1.0'"), None);
    }
}
