//! In-process page model.
//!
//! `Document` is an arena of element and text nodes. Node ids are never reused,
//! so a `NodeId` is a stable identity key for as long as the document lives,
//! even after the node is detached. `Page` is the shared handle the pipeline
//! works through; it publishes a counter of node insertions that plays the role
//! of a mutation observer scoped to the document body.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use tokio::sync::watch;

use crate::error::DomError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    attrs: Vec<(String, String)>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    pub fn is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    fn set_attr(&mut self, name: &str, value: &str) {
        match self.attrs.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.attrs.push((name.to_string(), value.to_string())),
        }
    }

    fn remove_attr(&mut self, name: &str) -> bool {
        let before = self.attrs.len();
        self.attrs.retain(|(key, _)| key != name);
        before != self.attrs.len()
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Node storage only grows: a removed node keeps its slot until the document
/// is dropped, which is what keeps identity-keyed state elsewhere sound. A
/// page that churns through many nodes should be replaced, not compacted.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    body: NodeId,
    insertions: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let body = NodeData {
            kind: NodeKind::Element(Element::new("body")),
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![body],
            body: NodeId(0),
            insertions: 0,
        }
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Number of node insertions performed so far.
    pub fn insertions(&self) -> u64 {
        self.insertions
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element(Element::new(tag)))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn node(&self, id: NodeId) -> Result<&NodeData, DomError> {
        self.nodes.get(id.0).ok_or(DomError::MissingNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData, DomError> {
        self.nodes.get_mut(id.0).ok_or(DomError::MissingNode(id))
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(id.0).map(|node| &node.kind)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.kind(id)? {
            NodeKind::Element(element) => Some(element),
            NodeKind::Text(_) => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Text(text) => Some(text.as_str()),
            NodeKind::Element(_) => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attr(name)
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Element(element) => {
                element.set_attr(name, value);
                Ok(())
            }
            NodeKind::Text(_) => Err(DomError::NotAnElement(id)),
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> bool {
        match self.nodes.get_mut(id.0).map(|node| &mut node.kind) {
            Some(NodeKind::Element(element)) => element.remove_attr(name),
            _ => false,
        }
    }

    /// Whether `id` is reachable from the body.
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.ancestors_inclusive(id).any(|node| node == self.body)
    }

    /// `id` followed by its parent chain up to the detached root or the body.
    pub fn ancestors_inclusive(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let start = self.nodes.get(id.0).map(|_| id);
        std::iter::successors(start, move |current| self.parent(*current))
    }

    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors_inclusive(node).any(|id| id == ancestor)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let index = self.children(parent).len();
        self.attach(parent, child, index)
    }

    /// Insert `node` as the previous sibling of `reference`.
    pub fn insert_before(&mut self, reference: NodeId, node: NodeId) -> Result<(), DomError> {
        let (parent, index) = self.position(reference)?;
        self.attach(parent, node, index)
    }

    /// Insert `node` as the next sibling of `reference`.
    pub fn insert_after(&mut self, reference: NodeId, node: NodeId) -> Result<(), DomError> {
        let (parent, index) = self.position(reference)?;
        self.attach(parent, node, index + 1)
    }

    fn position(&self, reference: NodeId) -> Result<(NodeId, usize), DomError> {
        let parent = self
            .node(reference)?
            .parent
            .ok_or(DomError::Detached(reference))?;
        let index = self
            .children(parent)
            .iter()
            .position(|child| *child == reference)
            .ok_or(DomError::NotAChild {
                parent,
                child: reference,
            })?;
        Ok((parent, index))
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, index: usize) -> Result<(), DomError> {
        if !matches!(self.node(parent)?.kind, NodeKind::Element(_)) {
            return Err(DomError::NotAnElement(parent));
        }
        self.node(child)?;
        if self.contains(child, parent) {
            return Err(DomError::Cycle {
                parent,
                node: child,
            });
        }

        // Re-inserting an attached node moves it.
        let mut index = index;
        if let Some(old_parent) = self.node(child)?.parent {
            let siblings = &mut self.node_mut(old_parent)?.children;
            if let Some(old_index) = siblings.iter().position(|id| *id == child) {
                siblings.remove(old_index);
                if old_parent == parent && old_index < index {
                    index -= 1;
                }
            }
        }

        let children = &mut self.node_mut(parent)?.children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        self.insertions += 1;
        Ok(())
    }

    /// Detach `id` (and its subtree) from its parent.
    pub fn remove(&mut self, id: NodeId) -> Result<(), DomError> {
        let parent = self.node(id)?.parent.ok_or(DomError::Detached(id))?;
        self.node_mut(parent)?.children.retain(|child| *child != id);
        self.node_mut(id)?.parent = None;
        Ok(())
    }

    /// Pre-order traversal of the subtree rooted at `root`, root included.
    pub fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.nodes.get(root.0).is_none() {
            return out;
        }
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Elements in the subtree of `root` (root included) accepted by `pred`.
    pub fn select<F>(&self, root: NodeId, pred: F) -> Vec<NodeId>
    where
        F: Fn(&Element) -> bool,
    {
        self.subtree(root)
            .into_iter()
            .filter(|id| self.element(*id).is_some_and(&pred))
            .collect()
    }

    /// Concatenated text of every text node under `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        self.subtree(id)
            .into_iter()
            .filter_map(|node| self.text(node))
            .collect()
    }

    /// Nearest element among `id` and its ancestors accepted by `pred`.
    pub fn closest<F>(&self, id: NodeId, pred: F) -> Option<NodeId>
    where
        F: Fn(&Element) -> bool,
    {
        self.ancestors_inclusive(id)
            .find(|node| self.element(*node).is_some_and(&pred))
    }

    /// Create an element with attributes and append it to `parent`.
    pub fn append_element(
        &mut self,
        parent: NodeId,
        tag: &str,
        attrs: &[(&str, &str)],
    ) -> Result<NodeId, DomError> {
        let id = self.create_element(tag);
        for (name, value) in attrs {
            self.set_attr(id, name, value)?;
        }
        self.append_child(parent, id)?;
        Ok(id)
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> Result<NodeId, DomError> {
        let id = self.create_text(text);
        self.append_child(parent, id)?;
        Ok(id)
    }
}

/// Shared handle to the live document.
#[derive(Clone)]
pub struct Page {
    document: Arc<Mutex<Document>>,
    insertions: Arc<watch::Sender<u64>>,
}

impl Page {
    pub fn new(document: Document) -> Self {
        let (insertions, _) = watch::channel(document.insertions());
        Self {
            document: Arc::new(Mutex::new(document)),
            insertions: Arc::new(insertions),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate the document; subscribers are notified when nodes were added.
    pub fn write<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let (result, insertions) = {
            let mut document = self.lock();
            let before = document.insertions();
            let result = f(&mut document);
            let after = document.insertions();
            (result, (after != before).then_some(after))
        };
        if let Some(count) = insertions {
            self.insertions.send_replace(count);
        }
        result
    }

    /// Receiver that changes whenever at least one node was inserted.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.insertions.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        match self.document.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn insert_before_and_after_keep_order() {
        let mut doc = Document::new();
        let body = doc.body();
        let a = doc.append_element(body, "span", &[]).expect("append");
        let c = doc.append_element(body, "span", &[]).expect("append");
        let b = doc.create_element("img");
        doc.insert_before(c, b).expect("insert");
        let d = doc.create_element("img");
        doc.insert_after(c, d).expect("insert");
        assert_eq!(doc.children(body), &[a, b, c, d]);
        assert_eq!(doc.insertions(), 4);
    }

    #[test]
    fn removed_nodes_keep_their_identity() {
        let mut doc = Document::new();
        let body = doc.body();
        let div = doc.append_element(body, "div", &[("id", "x")]).expect("append");
        doc.remove(div).expect("remove");
        assert!(!doc.is_connected(div));
        assert_eq!(doc.attr(div, "id"), Some("x"));
        assert_eq!(doc.remove(div), Err(DomError::Detached(div)));
        assert!(doc.children(body).is_empty());

        let next = doc.append_element(body, "div", &[("id", "y")]).expect("append");
        assert_ne!(next, div);
        assert_eq!(doc.attr(div, "id"), Some("x"));
        assert_eq!(doc.children(body), &[next]);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut doc = Document::new();
        let body = doc.body();
        let outer = doc.append_element(body, "div", &[]).expect("append");
        let inner = doc.append_element(outer, "div", &[]).expect("append");
        assert_eq!(
            doc.append_child(inner, outer),
            Err(DomError::Cycle {
                parent: inner,
                node: outer,
            })
        );
    }

    #[test]
    fn moving_within_same_parent() {
        let mut doc = Document::new();
        let body = doc.body();
        let a = doc.append_element(body, "i", &[]).expect("append");
        let b = doc.append_element(body, "i", &[]).expect("append");
        let c = doc.append_element(body, "i", &[]).expect("append");
        doc.insert_after(c, a).expect("move");
        assert_eq!(doc.children(body), &[b, c, a]);
    }

    #[test]
    fn text_content_and_closest() {
        let mut doc = Document::new();
        let body = doc.body();
        let block = doc
            .append_element(body, "div", &[("data-testid", "User-Name")])
            .expect("append");
        let link = doc.append_element(block, "a", &[("href", "/alice")]).expect("append");
        let text = doc.append_text(link, "@alice").expect("append");
        assert_eq!(doc.text_content(block), "@alice");
        assert_eq!(
            doc.closest(text, |el| el.attr("data-testid") == Some("User-Name")),
            Some(block)
        );
        assert_eq!(doc.select(body, |el| el.is("a")), vec![link]);
    }

    #[tokio::test]
    async fn page_notifies_only_on_insertion() {
        let page = Page::new(Document::new());
        let mut rx = page.subscribe();
        let body = page.read(Document::body);

        let div = page.write(|doc| doc.append_element(body, "div", &[]).expect("append"));
        assert!(rx.has_changed().expect("sender alive"));
        rx.borrow_and_update();

        page.write(|doc| doc.set_attr(div, "class", "x").expect("set"));
        assert!(!rx.has_changed().expect("sender alive"));
    }
}
