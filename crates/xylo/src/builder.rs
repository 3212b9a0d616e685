//! Event-driven tree builder with strict and fix-broken strategies.
//!
//! The builder consumes the parser's event protocol (`start`, `end`,
//! `startend`, `data`, `comment`, `declaration`, `pi`, `close`) and grows a
//! [`Document`]. Every run of buffered text goes through one `flush` routine;
//! a single `tail` bit decides whether it lands as the text of the last
//! opened element or the tail of the last closed one.
//!
//! The strategy is fixed at construction: strict mode surfaces structural
//! anomalies as [`BuilderError`]s, fix-broken mode repairs them (concatenated
//! text, synthesized end tags, dropped spurious ends, a synthetic `document`
//! wrapper for multi-root input).

use thiserror::Error;

use crate::element::{Attributes, Document, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("end tag mismatch (expected {expected:?}, got {got:?})")]
    TagMismatch { expected: String, got: String },
    #[error("end tag {0:?} with no open element")]
    SpuriousEnd(String),
    #[error("element text already assigned")]
    TextAlreadyAssigned,
    #[error("element tail already assigned")]
    TailAlreadyAssigned,
    #[error("multiple toplevel elements")]
    MultipleRoots,
    #[error("missing end tags for open elements")]
    UnclosedElements,
    #[error("missing toplevel element")]
    EmptyDocument,
}

pub struct TreeBuilder {
    doc: Document,
    stack: Vec<NodeId>,
    text: String,
    tail: bool,
    last: Option<NodeId>,
    final_depth: usize,
    wrapped: bool,
    pub fix_broken: bool,
    pub insert_comments: bool,
    pub insert_declarations: bool,
    pub insert_pis: bool,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            doc: Document::new(),
            stack: Vec::new(),
            text: String::new(),
            tail: false,
            last: None,
            final_depth: 0,
            wrapped: false,
            fix_broken: false,
            insert_comments: false,
            insert_declarations: false,
            insert_pis: false,
        }
    }

    /// Continue building inside `root` of an existing document; `close` then
    /// accepts the stack ending at that element.
    pub fn with_root(doc: Document, root: NodeId) -> Self {
        Self {
            doc,
            stack: vec![root],
            last: Some(root),
            final_depth: 1,
            ..Self::new()
        }
    }

    /// Tag of the innermost open element, if any.
    pub(crate) fn current_open_tag(&self) -> Option<&str> {
        self.stack.last().map(|&id| self.doc.tag(id))
    }

    /// Flush buffered text onto the right node. Strict mode refuses a second
    /// assignment; fix-broken concatenates.
    fn flush(&mut self) -> Result<(), BuilderError> {
        if self.text.is_empty() {
            return Ok(());
        }
        let last = match self.last {
            Some(last) => last,
            None => {
                self.text.clear();
                return Ok(());
            }
        };
        let text = std::mem::take(&mut self.text);
        if self.tail {
            match self.doc.tail(last) {
                Some(existing) if !existing.is_empty() => {
                    if !self.fix_broken {
                        return Err(BuilderError::TailAlreadyAssigned);
                    }
                    let joined = format!("{existing}{text}");
                    self.doc.set_tail(last, Some(joined));
                }
                _ => self.doc.set_tail(last, Some(text)),
            }
        } else {
            match self.doc.text(last) {
                Some(existing) if !existing.is_empty() => {
                    if !self.fix_broken {
                        return Err(BuilderError::TextAlreadyAssigned);
                    }
                    let joined = format!("{existing}{text}");
                    self.doc.set_text(last, Some(joined));
                }
                _ => self.doc.set_text(last, Some(text)),
            }
        }
        Ok(())
    }

    /// Attach a new node under the innermost open element, or make it the
    /// root. A second root is an error in strict mode; fix-broken re-parents
    /// everything under one synthetic `document` element.
    fn append_node(&mut self, elem: NodeId) -> Result<(), BuilderError> {
        self.last = Some(elem);
        if let Some(&top) = self.stack.last() {
            self.doc.append(top, elem);
            return Ok(());
        }
        match self.doc.root() {
            None => self.doc.set_root(elem),
            Some(root) => {
                if !self.fix_broken {
                    return Err(BuilderError::MultipleRoots);
                }
                let wrapper = if self.wrapped {
                    root
                } else {
                    let wrapper = self.doc.new_element("document", Attributes::new());
                    self.doc.append(wrapper, root);
                    self.doc.set_root(wrapper);
                    self.wrapped = true;
                    wrapper
                };
                self.doc.append(wrapper, elem);
            }
        }
        Ok(())
    }

    /// Open a new element.
    pub fn start(&mut self, tag: &str, attrib: Attributes) -> Result<NodeId, BuilderError> {
        self.flush()?;
        let elem = self.doc.new_element(tag, attrib);
        self.append_node(elem)?;
        self.stack.push(elem);
        self.tail = false;
        Ok(elem)
    }

    /// Close the innermost open element, verifying the tag matches.
    pub fn end(&mut self, tag: &str) -> Result<(), BuilderError> {
        self.flush()?;
        if !self.fix_broken {
            let top = self
                .stack
                .pop()
                .ok_or_else(|| BuilderError::SpuriousEnd(tag.to_owned()))?;
            if self.doc.tag(top) != tag {
                return Err(BuilderError::TagMismatch {
                    expected: self.doc.tag(top).to_owned(),
                    got: tag.to_owned(),
                });
            }
            self.last = Some(top);
            self.tail = true;
            return Ok(());
        }
        // Fix-broken: when the expected tag is open somewhere deeper,
        // synthesize ends down to it; otherwise drop the spurious end.
        if self.stack.iter().any(|&id| self.doc.tag(id) == tag) {
            while let Some(top) = self.stack.pop() {
                self.last = Some(top);
                self.tail = true;
                if self.doc.tag(top) == tag {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Open and immediately close an element (self-closing tags).
    pub fn startend(&mut self, tag: &str, attrib: Attributes) -> Result<NodeId, BuilderError> {
        let elem = self.start(tag, attrib)?;
        self.end(tag)?;
        Ok(elem)
    }

    /// Buffer a run of character data.
    pub fn data(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn inline(&mut self, elem: NodeId) -> Result<(), BuilderError> {
        self.flush()?;
        self.append_node(elem)?;
        self.tail = true;
        Ok(())
    }

    /// Append a comment node, when enabled.
    pub fn comment(&mut self, text: &str) -> Result<(), BuilderError> {
        if !self.insert_comments {
            return Ok(());
        }
        let elem = self.doc.new_comment(text);
        self.inline(elem)
    }

    /// Append a declaration node, when enabled. Declarations before the first
    /// element (such as a DOCTYPE) are always dropped.
    pub fn declaration(&mut self, text: &str) -> Result<(), BuilderError> {
        if self.doc.root().is_none() || !self.insert_declarations {
            return Ok(());
        }
        let elem = self.doc.new_declaration(text);
        self.inline(elem)
    }

    /// Append a processing instruction node, when enabled.
    pub fn pi(&mut self, target: &str, value: &str) -> Result<(), BuilderError> {
        if !self.insert_pis {
            return Ok(());
        }
        let elem = self.doc.new_instruction(target, value);
        self.inline(elem)
    }

    /// Finish building and hand back the document. Strict mode requires the
    /// stack to be back at its starting depth; fix-broken auto-closes any
    /// elements still open, in LIFO order.
    pub fn close(mut self) -> Result<Document, BuilderError> {
        self.flush()?;
        if self.stack.len() != self.final_depth {
            if !self.fix_broken {
                return Err(BuilderError::UnclosedElements);
            }
            while self.stack.len() > self.final_depth {
                if let Some(top) = self.stack.pop() {
                    self.last = Some(top);
                    self.tail = true;
                }
            }
        }
        if self.doc.root().is_none() {
            return Err(BuilderError::EmptyDocument);
        }
        Ok(self.doc)
    }
}
