//! Element trees for XML and lenient HTML, with a compact XPath-like query
//! language.
//!
//! Parsing is pull-driven and single-threaded: bytes flow through a
//! line/column-tracked reader into a context-sensitive markup lexer, the
//! parser driver decodes tokens and feeds builder events, and the builder
//! grows an arena-backed [`Document`] — strictly, or repairing broken input
//! when `fix_broken` is on. The same tree serializes back to XML or HTML
//! bytes, and [`xpath`] evaluates queries over it.

mod tokenize;

pub mod builder;
pub mod element;
pub mod etree;
pub mod html;
pub mod lexer;
pub mod parser;
pub mod xpath;

use thiserror::Error;

pub use builder::{BuilderError, TreeBuilder};
pub use charrefs::{escape_attrib, escape_cdata, unescape, EscapeError};
pub use element::{Attributes, Document, NodeId, NodeKind};
pub use etree::{
    fromstring, tostring, tostring_node, write_document, write_node, Method, WriteOptions,
};
pub use lexer::{Lexer, TokenKind};
pub use parser::{Encoding, Parser, ParserError, ParserErrorKind, TokenContext};
pub use tokenize::Token;
pub use xpath::{Selected, XpathError};

/// Any error this crate can surface.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error(transparent)]
    Builder(#[from] BuilderError),
    #[error(transparent)]
    Escape(#[from] EscapeError),
    #[error(transparent)]
    Xpath(#[from] XpathError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("document has no root element")]
    NoRoot,
    #[error("cannot encode {ch:?} as {encoding}")]
    Encode { encoding: &'static str, ch: char },
}
