//! Arena-backed element tree.
//!
//! A [`Document`] owns every node; a [`NodeId`] is a copyable index into the
//! arena. Parent links are plain index fields, cleared whenever a node is
//! detached, so the invariant `children(p)[i].parent == p` holds across every
//! mutation. Comments, declarations and processing instructions share the
//! element shape with a sentinel tag and their payload stored in `text`.

use std::fmt;

use crate::xpath::{self, Selected, XpathError};

pub const COMMENT_TAG: &str = "#comment";
pub const DECLARATION_TAG: &str = "#declaration";
pub const INSTRUCTION_TAG: &str = "#instruction";

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Comment,
    Declaration,
    Instruction { target: String, value: String },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    tag: String,
    attrib: Attributes,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    text: Option<String>,
    tail: Option<String>,
}

impl Node {
    fn new(kind: NodeKind, tag: String, attrib: Attributes) -> Self {
        Self {
            kind,
            tag,
            attrib,
            parent: None,
            children: Vec::new(),
            text: None,
            tail: None,
        }
    }
}

/// Insertion-ordered attribute map with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, String)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Set `key` to `value`, replacing in place when the key exists.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let at = self.entries.iter().position(|(name, _)| name == key)?;
        Some(self.entries.remove(at).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, value)| value.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut attrib = Attributes::new();
        for (key, value) in iter {
            attrib.set(key, value);
        }
        attrib
    }
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub(crate) fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Allocate a detached element node.
    pub fn new_element(&mut self, tag: impl Into<String>, attrib: Attributes) -> NodeId {
        self.push(Node::new(NodeKind::Element, tag.into(), attrib))
    }

    pub fn new_comment(&mut self, text: impl Into<String>) -> NodeId {
        let mut node = Node::new(NodeKind::Comment, COMMENT_TAG.into(), Attributes::new());
        node.text = Some(text.into());
        self.push(node)
    }

    pub fn new_declaration(&mut self, text: impl Into<String>) -> NodeId {
        let mut node = Node::new(
            NodeKind::Declaration,
            DECLARATION_TAG.into(),
            Attributes::new(),
        );
        node.text = Some(text.into());
        self.push(node)
    }

    /// Allocate a processing instruction. Both the split `target`/`value`
    /// pair and the combined `text` payload are kept so either serialization
    /// flavor round-trips.
    pub fn new_instruction(&mut self, target: impl Into<String>, value: impl Into<String>) -> NodeId {
        let target = target.into();
        let value = value.into();
        let mut node = Node::new(
            NodeKind::Instruction {
                target: target.clone(),
                value: value.clone(),
            },
            INSTRUCTION_TAG.into(),
            Attributes::new(),
        );
        node.text = Some(format!("{target} {value}"));
        self.push(node)
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn tag(&self, id: NodeId) -> &str {
        &self.node(id).tag
    }

    pub fn set_tag(&mut self, id: NodeId, tag: impl Into<String>) {
        self.node_mut(id).tag = tag.into();
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.node(id).text.as_deref()
    }

    pub fn set_text(&mut self, id: NodeId, text: Option<String>) {
        self.node_mut(id).text = text;
    }

    pub fn tail(&self, id: NodeId) -> Option<&str> {
        self.node(id).tail.as_deref()
    }

    pub fn set_tail(&mut self, id: NodeId, tail: Option<String>) {
        self.node_mut(id).tail = tail;
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        self.node(id).attrib.get(key)
    }

    pub fn set_attr(&mut self, id: NodeId, key: impl Into<String>, value: impl Into<String>) {
        self.node_mut(id).attrib.set(key, value);
    }

    pub fn attrs(&self, id: NodeId) -> &Attributes {
        &self.node(id).attrib
    }

    pub fn attrs_mut(&mut self, id: NodeId) -> &mut Attributes {
        &mut self.node_mut(id).attrib
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Remove `child` from its current parent, if any.
    fn detach(&mut self, child: NodeId) {
        if let Some(old) = self.node(child).parent {
            let children = &mut self.node_mut(old).children;
            if let Some(at) = children.iter().position(|&c| c == child) {
                children.remove(at);
            }
            self.node_mut(child).parent = None;
        }
    }

    /// Append `child` as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.node_mut(parent).children.push(child);
        self.node_mut(child).parent = Some(parent);
    }

    /// Insert `child` at `index` among the children of `parent`.
    pub fn insert(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        let children = &mut self.node_mut(parent).children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.node_mut(child).parent = Some(parent);
    }

    pub fn extend(&mut self, parent: NodeId, children: impl IntoIterator<Item = NodeId>) {
        for child in children {
            self.append(parent, child);
        }
    }

    /// Remove `child` from `parent`, clearing its back-reference. Returns
    /// whether the child was present.
    pub fn remove(&mut self, parent: NodeId, child: NodeId) -> bool {
        let children = &mut self.node_mut(parent).children;
        match children.iter().position(|&c| c == child) {
            Some(at) => {
                children.remove(at);
                self.node_mut(child).parent = None;
                true
            }
            None => false,
        }
    }

    /// Detach every child of `id`.
    pub fn clear_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.node_mut(id).children);
        for child in children {
            self.node_mut(child).parent = None;
        }
    }

    /// Preorder, left-to-right iteration starting at (and including) `start`,
    /// optionally filtered by tag.
    pub fn iter<'a>(&'a self, start: NodeId, tag: Option<&'a str>) -> Iter<'a> {
        Iter {
            doc: self,
            stack: vec![start],
            tag,
        }
    }

    /// Iterate the `text` payloads of `start` and its descendants in document
    /// order. Special nodes contribute nothing.
    pub fn itertext(&self, start: NodeId) -> IterText<'_> {
        IterText {
            doc: self,
            stack: vec![start],
        }
    }

    pub fn find(&self, start: NodeId, path: &str) -> Result<Option<Selected>, XpathError> {
        xpath::find(self, start, path)
    }

    pub fn findall(&self, start: NodeId, path: &str) -> Result<Vec<Selected>, XpathError> {
        xpath::findall(self, start, path)
    }

    pub fn finditer(
        &self,
        start: NodeId,
        path: &str,
    ) -> Result<impl Iterator<Item = Selected>, XpathError> {
        xpath::iterfind(self, start, path)
    }

    pub fn findtext(
        &self,
        start: NodeId,
        path: &str,
        default: Option<&str>,
    ) -> Result<Option<String>, XpathError> {
        xpath::findtext(self, start, path, default)
    }
}

pub struct Iter<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
    tag: Option<&'a str>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.stack.pop() {
            let node = self.doc.node(id);
            self.stack.extend(node.children.iter().rev());
            match self.tag {
                Some(tag) if tag != node.tag => continue,
                _ => return Some(id),
            }
        }
        None
    }
}

pub struct IterText<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for IterText<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        while let Some(id) = self.stack.pop() {
            let node = self.doc.node(id);
            if node.kind != NodeKind::Element {
                continue;
            }
            self.stack.extend(node.children.iter().rev());
            match node.text.as_deref() {
                Some(text) if !text.is_empty() => return Some(text),
                _ => continue,
            }
        }
        None
    }
}
