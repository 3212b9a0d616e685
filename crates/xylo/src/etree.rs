//! Serialization and whole-document conveniences.

use std::io;

use charrefs::{escape_attrib, escape_cdata};

use crate::element::{Document, NodeId, NodeKind};
use crate::html::HTML_FULL;
use crate::parser::{self, Encoding, Parser, ParserError, ParserErrorKind};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Xml,
    Html,
}

/// Serialization knobs, mirroring the parser's defaults: UTF-8, a generated
/// XML declaration, and short `<tag/>` forms for childless, textless
/// elements.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub method: Method,
    /// Encoding label named in the declaration and used to encode output.
    pub encoding: Option<String>,
    /// Verbatim replacement for the generated `<?xml …?>` line.
    pub xml_declaration: Option<String>,
    pub short_empty_elements: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self {
            method: Method::Xml,
            encoding: None,
            xml_declaration: None,
            short_empty_elements: true,
        }
    }
}

/// Parse a whole document from bytes or text (text is taken as UTF-8).
pub fn fromstring(data: impl AsRef<[u8]>) -> Result<Document, Error> {
    parser::parse_bytes(data.as_ref())
}

/// Serialize `doc` to bytes under the given options.
pub fn tostring(doc: &Document, options: &WriteOptions) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    write_document(doc, &mut out, options)?;
    Ok(out)
}

/// Serialize the subtree rooted at `id` to bytes.
pub fn tostring_node(
    doc: &Document,
    id: NodeId,
    options: &WriteOptions,
) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    write_node(doc, id, &mut out, options)?;
    Ok(out)
}

/// Serialize `doc` into `sink`.
pub fn write_document<W: io::Write>(
    doc: &Document,
    sink: &mut W,
    options: &WriteOptions,
) -> Result<(), Error> {
    let root = doc.root().ok_or(Error::NoRoot)?;
    write_node(doc, root, sink, options)
}

/// Serialize the subtree rooted at `id` into `sink`, with the usual prolog
/// handling.
pub fn write_node<W: io::Write>(
    doc: &Document,
    id: NodeId,
    sink: &mut W,
    options: &WriteOptions,
) -> Result<(), Error> {
    let label = options.encoding.as_deref().unwrap_or("utf-8");
    let encoding = Encoding::from_label(label).ok_or_else(|| {
        Error::Parser(ParserError {
            kind: ParserErrorKind::UnknownEncoding(label.to_owned()),
            context: None,
        })
    })?;
    let mut text = String::new();
    if options.method == Method::Xml {
        match &options.xml_declaration {
            Some(declaration) => text.push_str(declaration),
            None => text.push_str(&format!("<?xml version='1.0' encoding='{label}'?>\n")),
        }
    }
    serialize(doc, id, &mut text, options);
    let bytes = encoding
        .encode(&text)
        .map_err(|ch| Error::Encode { encoding: encoding.label(), ch })?;
    sink.write_all(&bytes)?;
    Ok(())
}

fn serialize(doc: &Document, id: NodeId, out: &mut String, options: &WriteOptions) {
    let tail = doc.tail(id).unwrap_or("");
    match doc.kind(id) {
        NodeKind::Comment => {
            out.push_str("<!-- ");
            out.push_str(&escape_cdata(doc.text(id).unwrap_or("")));
            out.push_str("-->");
        }
        NodeKind::Declaration => {
            out.push_str("<!");
            out.push_str(&escape_cdata(doc.text(id).unwrap_or("")));
            out.push('>');
        }
        NodeKind::Instruction { .. } => {
            out.push_str("<? ");
            out.push_str(doc.text(id).unwrap_or(""));
            out.push_str(" ?>");
        }
        NodeKind::Element => {
            let tag = doc.tag(id);
            out.push('<');
            out.push_str(tag);
            for (name, value) in doc.attrs(id).iter() {
                out.push(' ');
                out.push_str(name);
                // The value "true" round-trips as a bare attribute name.
                if !value.is_empty() && value != "true" {
                    out.push_str("=\"");
                    out.push_str(&escape_attrib(value));
                    out.push('"');
                }
            }
            let no_text = doc.text(id).map_or(true, str::is_empty);
            let full_only = options.method == Method::Html && HTML_FULL.contains(tag);
            if options.short_empty_elements
                && doc.children(id).is_empty()
                && no_text
                && !full_only
            {
                out.push_str("/>");
                out.push_str(&escape_cdata(tail));
                return;
            }
            out.push('>');
            out.push_str(&escape_cdata(doc.text(id).unwrap_or("")));
            for &child in doc.children(id) {
                serialize(doc, child, out, options);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
    out.push_str(&escape_cdata(tail));
}

impl Document {
    /// Serialize this document into `sink`.
    pub fn write<W: io::Write>(&self, sink: &mut W, options: &WriteOptions) -> Result<(), Error> {
        write_document(self, sink, options)
    }

    /// Replace the tree by parsing a binary stream to completion.
    pub fn parse<R: io::Read>(mut source: R) -> Result<Document, Error> {
        let mut parser = Parser::new();
        let mut chunk = [0u8; 8192];
        loop {
            let count = source.read(&mut chunk)?;
            if count == 0 {
                break;
            }
            parser.feed(&chunk[..count]);
        }
        parser.close()
    }
}
