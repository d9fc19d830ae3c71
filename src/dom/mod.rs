//! In-memory document tree with a mutation log.
//!
//! Nodes live in an arena and are addressed by `NodeId`. Removed nodes stay
//! in the arena (detached) until their owner hands them back with
//! `release`; released slots read as missing and are reused by later
//! allocations. Every structural or text change is appended to the mutation log,
//! and an optional `Notify` observer is pinged, which is how a frame's
//! mutation watcher learns about page-side edits.

pub mod markup;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;

/// Synthetic root tag; never serialized.
pub const DOCUMENT_TAG: &str = "#document";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn from_raw(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    vacant: bool,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            data,
            parent: None,
            children: Vec::new(),
            vacant: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Children of `target` changed; `added` lists inserted nodes.
    ChildList { target: NodeId, added: Vec<NodeId> },
    /// Text of `target` changed in place.
    CharacterData { target: NodeId },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),
    #[error("node {0:?} is not a text node")]
    NotText(NodeId),
    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("inserting {0:?} would create a cycle")]
    Cycle(NodeId),
    #[error("node {0:?} is still in a tree")]
    StillAttached(NodeId),
    #[error("markup error: {0}")]
    Markup(String),
}

pub type DomResult<T> = Result<T, DomError>;

#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: NodeId,
    mutations: Vec<Mutation>,
    observer: Option<Arc<Notify>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeData::Element {
                tag: DOCUMENT_TAG.to_string(),
                attrs: Vec::new(),
            })],
            free: Vec::new(),
            root: NodeId(0),
            mutations: Vec::new(),
            observer: None,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The first element child of the synthetic root (`<html>` for full
    /// pages), or the root itself for bare fragments.
    pub fn document_element(&self) -> NodeId {
        self.children(self.root)
            .iter()
            .copied()
            .find(|id| self.is_element(*id))
            .unwrap_or(self.root)
    }

    /// Routes change notifications to `notify` from now on.
    pub fn observe(&mut self, notify: Arc<Notify>) {
        self.observer = Some(notify);
    }

    pub fn disconnect(&mut self) {
        self.observer = None;
    }

    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.mutations)
    }

    pub fn pending_mutations(&self) -> usize {
        self.mutations.len()
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push_node(NodeData::Text(text.into()))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_some_and(|node| !node.vacant)
    }

    /// Arena slots in use or waiting for reuse.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    fn live(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).filter(|node| !node.vacant)
    }

    fn live_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).filter(|node| !node.vacant)
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.live(id).map(|node| &node.data)
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.data(id), Some(NodeData::Element { .. }))
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.data(id)? {
            NodeData::Element { tag, .. } => Some(tag.as_str()),
            NodeData::Text(_) => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.data(id)? {
            NodeData::Text(text) => Some(text.as_str()),
            NodeData::Element { .. } => None,
        }
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.data(id)? {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            NodeData::Text(_) => None,
        }
    }

    pub fn attributes(&self, id: NodeId) -> &[(String, String)] {
        match self.data(id) {
            Some(NodeData::Element { attrs, .. }) => attrs,
            _ => &[],
        }
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> DomResult<()> {
        match self.live_mut(id).map(|node| &mut node.data) {
            Some(NodeData::Element { attrs, .. }) => {
                match attrs.iter_mut().find(|(key, _)| key == name) {
                    Some((_, existing)) => *existing = value.to_string(),
                    None => attrs.push((name.to_string(), value.to_string())),
                }
                Ok(())
            }
            Some(NodeData::Text(_)) => Err(DomError::NotAnElement(id)),
            None => Err(DomError::UnknownNode(id)),
        }
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> DomResult<()> {
        match self.live_mut(id).map(|node| &mut node.data) {
            Some(NodeData::Element { attrs, .. }) => {
                attrs.retain(|(key, _)| key != name);
                Ok(())
            }
            Some(NodeData::Text(_)) => Err(DomError::NotAnElement(id)),
            None => Err(DomError::UnknownNode(id)),
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.live(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.live(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Parents from `id` (exclusive) up to the root (inclusive).
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: self.parent(id),
        }
    }

    /// True if `id` is reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        id == self.root || self.ancestors(id).any(|ancestor| ancestor == self.root)
    }

    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        ancestor == id || self.ancestors(id).any(|candidate| candidate == ancestor)
    }

    /// Concatenated text of every text node under `id`, in document order.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.data(id) {
            Some(NodeData::Text(text)) => out.push_str(text),
            Some(NodeData::Element { .. }) => {
                for child in self.children(id) {
                    self.collect_text(*child, out);
                }
            }
            None => {}
        }
    }

    /// Pre-order list of `id` and its descendants.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.contains(current) {
                continue;
            }
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.check_insert(parent, child)?;
        self.detach(child);
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
        self.record(Mutation::ChildList {
            target: parent,
            added: vec![child],
        });
        Ok(())
    }

    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: NodeId,
    ) -> DomResult<()> {
        self.check_insert(parent, child)?;
        if self.parent(reference) != Some(parent) {
            return Err(DomError::NotAChild {
                parent,
                child: reference,
            });
        }
        self.detach(child);
        let position = self.position_in_parent(parent, reference)?;
        self.nodes[parent.0].children.insert(position, child);
        self.nodes[child.0].parent = Some(parent);
        self.record(Mutation::ChildList {
            target: parent,
            added: vec![child],
        });
        Ok(())
    }

    /// Puts `replacement` where `old` was; `old` becomes detached.
    pub fn replace_node(&mut self, old: NodeId, replacement: NodeId) -> DomResult<()> {
        let parent = self
            .parent(old)
            .ok_or(DomError::UnknownNode(old))?;
        self.check_insert(parent, replacement)?;
        self.detach(replacement);
        let position = self.position_in_parent(parent, old)?;
        self.nodes[parent.0].children[position] = replacement;
        self.nodes[replacement.0].parent = Some(parent);
        self.nodes[old.0].parent = None;
        self.record(Mutation::ChildList {
            target: parent,
            added: vec![replacement],
        });
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()> {
        if self.parent(child) != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        self.detach(child);
        self.record(Mutation::ChildList {
            target: parent,
            added: Vec::new(),
        });
        Ok(())
    }

    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) -> DomResult<()> {
        match self.live_mut(id).map(|node| &mut node.data) {
            Some(NodeData::Text(existing)) => {
                *existing = text.into();
                self.record(Mutation::CharacterData { target: id });
                Ok(())
            }
            Some(NodeData::Element { .. }) => Err(DomError::NotText(id)),
            None => Err(DomError::UnknownNode(id)),
        }
    }

    /// Hands a detached subtree back to the arena. Its ids read as missing
    /// until the slots are reused, so callers must drop them first.
    pub fn release(&mut self, id: NodeId) -> DomResult<usize> {
        if !self.contains(id) {
            return Err(DomError::UnknownNode(id));
        }
        if id == self.root || self.parent(id).is_some() {
            return Err(DomError::StillAttached(id));
        }

        let subtree = self.descendants(id);
        for node in &subtree {
            let slot = &mut self.nodes[node.0];
            slot.data = NodeData::Text(String::new());
            slot.parent = None;
            slot.children.clear();
            slot.vacant = true;
            self.free.push(*node);
        }
        Ok(subtree.len())
    }

    fn push_node(&mut self, data: NodeData) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id.0] = Node::new(data);
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(data));
        id
    }

    fn check_insert(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        if !self.contains(parent) {
            return Err(DomError::UnknownNode(parent));
        }
        if !self.contains(child) {
            return Err(DomError::UnknownNode(child));
        }
        if !self.is_element(parent) {
            return Err(DomError::NotAnElement(parent));
        }
        if child == self.root || self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::Cycle(child));
        }
        Ok(())
    }

    fn position_in_parent(&self, parent: NodeId, child: NodeId) -> DomResult<usize> {
        self.nodes[parent.0]
            .children
            .iter()
            .position(|candidate| *candidate == child)
            .ok_or(DomError::NotAChild { parent, child })
    }

    fn detach(&mut self, child: NodeId) {
        if let Some(old_parent) = self.nodes[child.0].parent.take() {
            self.nodes[old_parent.0]
                .children
                .retain(|candidate| *candidate != child);
        }
    }

    fn record(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
        if let Some(observer) = &self.observer {
            observer.notify_one();
        }
    }
}

pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.doc.parent(current);
        Some(current)
    }
}
