//! Compact XPath-like query language over the element tree.
//!
//! `path ::= step ('/' step | '//' step)*` where a step is `.`, `..`, a tag
//! name, `*`, a bracketed filter `[expr]`, or a terminal value expression
//! such as `text()` or `@attr`. Queries are strict by contract: unsupported
//! operators, malformed operands, and navigation past a value-producing step
//! all surface as [`XpathError`].

mod engine;
mod functions;
mod lexer;

use thiserror::Error;

use crate::element::{Document, NodeId};
use crate::tokenize::UnreadError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XpathError {
    #[error("unsupported token {0:?} in xpath")]
    UnsupportedToken(String),
    #[error("unsupported function {0:?}")]
    UnsupportedFunction(String),
    #[error("invalid integer operand {0:?}")]
    InvalidInteger(String),
    #[error("invalid boolean operand {0:?}")]
    InvalidBoolean(String),
    #[error("{function}() expects {expected} arguments, got {got}")]
    InvalidArguments {
        function: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("incomplete filter expression")]
    IncompleteExpression,
    #[error("cannot navigate beyond a value-producing step")]
    NavigationAfterValue,
    #[error("unable to track position in xpath input")]
    LostPosition,
}

impl From<UnreadError> for XpathError {
    fn from(_: UnreadError) -> Self {
        XpathError::LostPosition
    }
}

/// One query result: a tree node, or the scalar a terminal step projected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selected {
    Node(NodeId),
    Value(String),
}

impl Selected {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Selected::Node(id) => Some(*id),
            Selected::Value(_) => None,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Selected::Node(_) => None,
            Selected::Value(value) => Some(value),
        }
    }
}

/// Evaluate `path` from `start`, yielding matches in document order.
pub fn iterfind(
    doc: &Document,
    start: NodeId,
    path: &str,
) -> Result<impl Iterator<Item = Selected>, XpathError> {
    Ok(engine::eval_path(doc, path.as_bytes(), vec![start])?.into_iter())
}

/// All matches of `path` from `start`.
pub fn findall(doc: &Document, start: NodeId, path: &str) -> Result<Vec<Selected>, XpathError> {
    engine::eval_path(doc, path.as_bytes(), vec![start])
}

/// First match of `path` from `start`, if any.
pub fn find(doc: &Document, start: NodeId, path: &str) -> Result<Option<Selected>, XpathError> {
    Ok(iterfind(doc, start, path)?.next())
}

/// Text of the first match: `""` when the match has no text, `default` when
/// nothing matches.
pub fn findtext(
    doc: &Document,
    start: NodeId,
    path: &str,
    default: Option<&str>,
) -> Result<Option<String>, XpathError> {
    match find(doc, start, path)? {
        None => Ok(default.map(str::to_owned)),
        Some(Selected::Node(id)) => Ok(Some(doc.text(id).unwrap_or("").to_owned())),
        Some(Selected::Value(value)) => Ok(Some(value)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::etree::fromstring;

    fn fixture() -> Document {
        fromstring(
            br#"
<document>
    <h1>Article Header</h1>
    <article class="message message-post">
        <span class="threadLabel ">(Thread Name #1)</span>
        <article class="message-body">
            <div class="message message-main">
                <p>Paragraph #1</p>
                <p>This is <em>Paragraph #2</em></p>
                <a href="https://example.com">Example Link</a>
                <p>Final Paragraph</p>
            </div>
        </article>
    </article>
    <article class="message message-post">
        <span class=" threadLabel">(Thread Name #2)</span>
        <article class="message-body">
            <div class="message message-main">
                <p>Paragraph #3</p>
                <a href="https://example.com">Example Link #2</a>
                <p>This is <em>Paragraph #4</em></p>
                <p>Final Paragraph Two</p>
            </div>
        </article>
    </article>
    <span class="footer">Footer Span</span>
</document>
"#,
        )
        .expect("fixture must parse")
    }

    fn all(doc: &Document, path: &str) -> Vec<Selected> {
        doc.findall(doc.root().unwrap(), path).unwrap()
    }

    fn tag_count(doc: &Document, selected: &[Selected], tag: &str) -> usize {
        selected
            .iter()
            .filter_map(Selected::node)
            .filter(|&id| doc.tag(id) == tag)
            .count()
    }

    #[test]
    fn test_child() {
        let doc = fixture();
        let children = all(&doc, "/*");
        assert_eq!(children.len(), 4);
        assert_eq!(tag_count(&doc, &children, "h1"), 1);
        assert_eq!(tag_count(&doc, &children, "article"), 2);
        assert_eq!(tag_count(&doc, &children, "span"), 1);
    }

    #[test]
    fn test_descendants() {
        let doc = fixture();
        let descendants = all(&doc, "//*");
        assert_eq!(tag_count(&doc, &descendants, "h1"), 1);
        assert_eq!(tag_count(&doc, &descendants, "article"), 4);
        assert_eq!(tag_count(&doc, &descendants, "span"), 3);
        assert_eq!(tag_count(&doc, &descendants, "div"), 2);
        assert_eq!(tag_count(&doc, &descendants, "p"), 6);
        assert_eq!(tag_count(&doc, &descendants, "a"), 2);
    }

    #[test]
    fn test_tag_filter() {
        let doc = fixture();
        let articles = all(&doc, "//article");
        assert_eq!(articles.len(), 4);
        assert_eq!(tag_count(&doc, &articles, "article"), 4);
    }

    #[test]
    fn test_tag_chain() {
        let doc = fixture();
        let spans = all(&doc, "//article/span");
        assert_eq!(spans.len(), 2);
        assert_eq!(tag_count(&doc, &spans, "span"), 2);
    }

    #[test]
    fn test_index() {
        let doc = fixture();
        let headers = all(&doc, "/[1]");
        assert_eq!(headers.len(), 1);
        assert_eq!(tag_count(&doc, &headers, "h1"), 1);
    }

    #[test]
    fn test_name_function() {
        let doc = fixture();
        let spans = all(&doc, "//[name()=\"span\"]");
        assert_eq!(spans.len(), 3);
        assert_eq!(tag_count(&doc, &spans, "span"), 3);
    }

    #[test]
    fn test_contains() {
        let doc = fixture();
        let threads = all(&doc, "//span[contains(@class, \"threadLabel\")]");
        assert_eq!(threads.len(), 2);
        assert_eq!(tag_count(&doc, &threads, "span"), 2);
    }

    #[test]
    fn test_starts_with() {
        let doc = fixture();
        let threads = all(&doc, "//span[starts-with(@class, \"threadLabel\")]");
        assert_eq!(threads.len(), 1);
    }

    #[test]
    fn test_ends_with() {
        let doc = fixture();
        let threads = all(&doc, "//span[ends-with(@class, \"threadLabel\")]");
        assert_eq!(threads.len(), 1);
    }

    #[test]
    fn test_not() {
        let doc = fixture();
        let spans = all(&doc, "//span[not(ends-with(@class, \"threadLabel\"))]");
        assert_eq!(spans.len(), 2);
        assert_eq!(tag_count(&doc, &spans, "span"), 2);
    }

    #[test]
    fn test_attribute_presence_filter() {
        let doc = fixture();
        let links = all(&doc, "//[@href]");
        assert_eq!(links.len(), 2);
        assert_eq!(tag_count(&doc, &links, "a"), 2);
    }

    #[test]
    fn test_parent_step() {
        let doc = fixture();
        let root = doc.root().unwrap();
        let h1 = doc.find(root, "//h1").unwrap().unwrap().node().unwrap();
        assert_eq!(doc.findall(h1, "..").unwrap(), vec![Selected::Node(root)]);
        // Two dots beyond the root fall off the tree.
        assert_eq!(doc.findall(h1, "...").unwrap(), vec![]);
    }

    #[test]
    fn test_and_or() {
        let doc = fixture();
        let both = all(
            &doc,
            "//span[contains(@class, \"threadLabel\") and starts-with(@class, \"thread\")]",
        );
        assert_eq!(both.len(), 1);
        let either = all(
            &doc,
            "//span[starts-with(@class, \"thread\") or ends-with(@class, \"footer\")]",
        );
        assert_eq!(either.len(), 2);
        // A function call on one side and a comparison on the other: the
        // comparison folds first, then feeds the operator.
        let mixed = all(
            &doc,
            "//span[starts-with(@class, \"footer\") and @class = \"footer\"]",
        );
        assert_eq!(mixed.len(), 1);
        assert_eq!(tag_count(&doc, &mixed, "span"), 1);
    }

    #[test]
    fn test_chained_or_groups_left_to_right() {
        let doc = fixture();
        let spans = all(
            &doc,
            "//span[contains(@class, \"threadLabel\") or contains(@class, \"footer\") or contains(@class, \"missing\")]",
        );
        assert_eq!(spans.len(), 3);
        let none = all(
            &doc,
            "//span[contains(@class, \"missing\") or contains(@class, \"absent\")]",
        );
        assert_eq!(none.len(), 0);
    }

    #[test]
    fn test_comparison_binds_tighter_than_or() {
        let doc = fixture();
        let spans = all(
            &doc,
            "//span[@class = \"footer\" or contains(@class, \"threadLabel\")]",
        );
        assert_eq!(spans.len(), 3);
    }

    #[test]
    fn test_projection_upper_case() {
        let doc = fixture();
        let titles = all(&doc, "//h1/upper-case(text())");
        assert_eq!(
            titles,
            vec![Selected::Value("ARTICLE HEADER".into())]
        );
    }

    #[test]
    fn test_projection_attribute() {
        let doc = fixture();
        let hrefs = all(&doc, "//a/@href");
        assert_eq!(
            hrefs,
            vec![
                Selected::Value("https://example.com".into()),
                Selected::Value("https://example.com".into()),
            ]
        );
    }

    #[test]
    fn test_projection_text() {
        let doc = fixture();
        let root = doc.root().unwrap();
        let texts = doc.findall(root, "//h1/text()").unwrap();
        assert_eq!(texts, vec![Selected::Value("Article Header".into())]);
    }

    #[test]
    fn test_navigation_after_value_is_an_error() {
        let doc = fixture();
        let root = doc.root().unwrap();
        assert_eq!(
            doc.findall(root, "//h1/text()/p").unwrap_err(),
            XpathError::NavigationAfterValue
        );
    }

    #[test]
    fn test_arity_validated_at_compile_time() {
        let doc = fixture();
        let root = doc.root().unwrap();
        assert_eq!(
            doc.findall(root, "//span[contains(@class)]").unwrap_err(),
            XpathError::InvalidArguments {
                function: "contains",
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn test_unsupported_function() {
        let doc = fixture();
        let root = doc.root().unwrap();
        assert_eq!(
            doc.findall(root, "//span[frobnicate(@class)]").unwrap_err(),
            XpathError::UnsupportedFunction("frobnicate".into())
        );
    }

    #[test]
    fn test_integer_comparison_rejects_strings() {
        let doc = fixture();
        let root = doc.root().unwrap();
        assert!(matches!(
            doc.findall(root, "//span[@class < 3]").unwrap_err(),
            XpathError::InvalidInteger(_)
        ));
    }

    #[test]
    fn test_findall_matches_iterfind_and_find() {
        let doc = fixture();
        let root = doc.root().unwrap();
        for path in ["//article", "/*", "//span[contains(@class, \"threadLabel\")]"] {
            let listed = doc.findall(root, path).unwrap();
            let iterated: Vec<Selected> = doc.finditer(root, path).unwrap().collect();
            assert_eq!(listed, iterated);
            assert_eq!(doc.find(root, path).unwrap(), listed.first().cloned());
        }
    }

    #[test]
    fn test_findtext() {
        let doc = fixture();
        let root = doc.root().unwrap();
        assert_eq!(
            doc.findtext(root, "//h1", None).unwrap(),
            Some("Article Header".into())
        );
        // A match without text reads as the empty string.
        let plain = fromstring(b"<r><empty/><full>x</full></r>").unwrap();
        let plain_root = plain.root().unwrap();
        assert_eq!(
            plain.findtext(plain_root, "//empty", None).unwrap(),
            Some("".into())
        );
        assert_eq!(
            doc.findtext(root, "//missing", Some("fallback")).unwrap(),
            Some("fallback".into())
        );
        assert_eq!(doc.findtext(root, "//missing", None).unwrap(), None);
    }

    #[test]
    fn test_wildcard_and_self() {
        let doc = fixture();
        let root = doc.root().unwrap();
        let dot: Vec<Selected> = doc.findall(root, ".").unwrap();
        assert_eq!(dot, vec![Selected::Node(root)]);
        let stars = doc.findall(root, "/*").unwrap();
        let slash = doc.findall(root, "/").unwrap();
        assert_eq!(stars, slash);
    }
}
