//! HTML deviations from plain XML parsing and serialization.

use lazy_static::lazy_static;
use rustc_hash::FxHashSet;

use crate::builder::TreeBuilder;
use crate::element::Document;
use crate::etree::{self, Method, WriteOptions};
use crate::parser::Parser;
use crate::Error;

lazy_static! {
    /// Void elements: implicitly self-closed on open.
    pub static ref HTML_EMPTY: FxHashSet<&'static str> = [
        "area", "base", "basefont", "br", "col", "embed", "frame", "hr", "img", "input",
        "isindex", "link", "meta", "param", "source", "track", "wbr",
    ]
    .iter()
    .copied()
    .collect();

    /// Elements that must never be written in the short empty form.
    pub static ref HTML_FULL: FxHashSet<&'static str> = ["style", "script"].iter().copied().collect();
}

/// Whether an open `open` element is implicitly terminated by a following
/// `next` start tag. Covers the common authoring shorthand of repeated
/// `<li>`-style siblings without end tags.
pub(crate) fn implied_end(open: &str, next: &str) -> bool {
    let repeatable = matches!(
        open,
        "li" | "p" | "dt" | "dd" | "option" | "tr" | "td" | "th"
    );
    if repeatable && open == next {
        return true;
    }
    matches!(
        (open, next),
        ("dt", "dd") | ("dd", "dt") | ("td", "th") | ("th", "td")
    )
}

/// Parse lenient HTML bytes into a document.
pub fn fromstring(data: impl AsRef<[u8]>, fix_broken: bool) -> Result<Document, Error> {
    let mut builder = TreeBuilder::new();
    builder.fix_broken = fix_broken;
    let mut parser = Parser::with_builder(builder).html_mode(true);
    parser.feed(data.as_ref());
    parser.close()
}

/// Serialize a document with the HTML rules (no XML declaration, full close
/// tags for `style`/`script`).
pub fn tostring(doc: &Document) -> Result<Vec<u8>, Error> {
    etree::tostring(
        doc,
        &WriteOptions {
            method: Method::Html,
            ..WriteOptions::default()
        },
    )
}
