// ABOUTME: Minimal in-memory document tree of elements and text nodes.
// ABOUTME: Arena-backed; supports the structural queries the completion predicate needs.

use crate::error::SurfaceError;
use crate::surface::NodeId;

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A tree rooted at a `body` element. Removed nodes leave a hole in the
/// arena, so a stale `NodeId` never aliases a newer node.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Option<Node>>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(id: NodeId) -> SurfaceError {
    SurfaceError::ElementMissing(format!("node {}", id.0))
}

impl Document {
    pub fn new() -> Self {
        let body = Node {
            kind: NodeKind::Element {
                tag: "body".to_string(),
                attrs: Vec::new(),
            },
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![Some(body)],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(|n| n.as_mut())
    }

    /// True while `id` is attached to the tree.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    fn insert(&mut self, parent: NodeId, kind: NodeKind) -> Result<NodeId, SurfaceError> {
        match self.node(parent).map(|n| &n.kind) {
            Some(NodeKind::Element { .. }) => {}
            Some(NodeKind::Text(_)) => {
                return Err(SurfaceError::Driver(format!(
                    "node {} is text and cannot have children",
                    parent.0
                )))
            }
            None => return Err(missing(parent)),
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        }));
        if let Some(p) = self.node_mut(parent) {
            p.children.push(id);
        }
        Ok(id)
    }

    pub fn append_element(&mut self, parent: NodeId, tag: &str) -> Result<NodeId, SurfaceError> {
        self.insert(
            parent,
            NodeKind::Element {
                tag: tag.to_string(),
                attrs: Vec::new(),
            },
        )
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> Result<NodeId, SurfaceError> {
        self.insert(parent, NodeKind::Text(text.to_string()))
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), SurfaceError> {
        match self.node_mut(id).map(|n| &mut n.kind) {
            Some(NodeKind::Element { attrs, .. }) => {
                match attrs.iter_mut().find(|(k, _)| k == name) {
                    Some(slot) => slot.1 = value.to_string(),
                    None => attrs.push((name.to_string(), value.to_string())),
                }
                Ok(())
            }
            Some(NodeKind::Text(_)) => Err(SurfaceError::Driver(format!(
                "node {} is text and has no attributes",
                id.0
            ))),
            None => Err(missing(id)),
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.node(id)?.kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            NodeKind::Text(_) => None,
        }
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.node(id)?.kind {
            NodeKind::Element { tag, .. } => Some(tag.as_str()),
            NodeKind::Text(_) => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Detach `id` and drop its whole subtree.
    pub fn remove(&mut self, id: NodeId) -> Result<(), SurfaceError> {
        if id == self.root {
            return Err(SurfaceError::Driver("cannot remove the root".into()));
        }
        let parent = self.node(id).ok_or_else(|| missing(id))?.parent;
        if let Some(p) = parent.and_then(|p| self.node_mut(p)) {
            p.children.retain(|c| *c != id);
        }

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(next.0).and_then(|slot| slot.take()) {
                stack.extend(node.children);
            }
        }
        Ok(())
    }

    pub fn clear_children(&mut self, id: NodeId) -> Result<(), SurfaceError> {
        let children = self.node(id).ok_or_else(|| missing(id))?.children.clone();
        for child in children {
            self.remove(child)?;
        }
        Ok(())
    }

    /// Descendants of `from` in document order, not including `from`.
    pub fn descendants(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(from).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// First descendant of `from` matching `pred`, like `querySelector`.
    pub fn find_descendant<F>(&self, from: NodeId, pred: F) -> Option<NodeId>
    where
        F: Fn(NodeId) -> bool,
    {
        self.descendants(from).into_iter().find(|id| pred(*id))
    }

    /// First descendant of `from` whose `class` attribute starts with `prefix`.
    pub fn find_by_class_prefix(&self, from: NodeId, prefix: &str) -> Option<NodeId> {
        self.find_descendant(from, |id| {
            self.attr(id, "class")
                .is_some_and(|class| class.starts_with(prefix))
        })
    }

    pub fn count_descendants(&self, from: NodeId, tag: &str) -> usize {
        self.descendants(from)
            .into_iter()
            .filter(|id| self.tag(*id) == Some(tag))
            .count()
    }

    /// Serialized markup of the children of `id`.
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.write_html(*child, &mut out);
        }
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) => out.push_str(&escape_text(text)),
            NodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push_str(&format!(" {}=\"{}\"", name, escape_attr(value)));
                }
                out.push('>');
                for child in &node.children {
                    self.write_html(*child, out);
                }
                out.push_str(&format!("</{}>", tag));
            }
        }
    }

    /// Concatenated text of `id` and its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Some(Node {
            kind: NodeKind::Text(text),
            ..
        }) = self.node(id)
        {
            out.push_str(text);
        }
        for child in self.descendants(id) {
            if let Some(Node {
                kind: NodeKind::Text(text),
                ..
            }) = self.node(child)
            {
                out.push_str(text);
            }
        }
        out
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_html_escapes() {
        let mut doc = Document::new();
        let div = doc.append_element(doc.root(), "div").unwrap();
        doc.set_attr(div, "class", "a\"b").unwrap();
        doc.append_text(div, "1 < 2 & 3").unwrap();

        assert_eq!(
            doc.inner_html(doc.root()),
            "<div class=\"a&quot;b\">1 &lt; 2 &amp; 3</div>"
        );
        assert_eq!(doc.text_content(doc.root()), "1 < 2 & 3");
    }

    #[test]
    fn test_find_descendant_excludes_self() {
        let mut doc = Document::new();
        let outer = doc.append_element(doc.root(), "div").unwrap();
        doc.set_attr(outer, "class", "task-reply").unwrap();
        let inner = doc.append_element(outer, "div").unwrap();
        doc.set_attr(inner, "class", "task-reply inner").unwrap();

        assert_eq!(doc.find_by_class_prefix(doc.root(), "task"), Some(outer));
        assert_eq!(doc.find_by_class_prefix(outer, "task"), Some(inner));
        assert_eq!(doc.find_by_class_prefix(inner, "task"), None);
    }

    #[test]
    fn test_remove_drops_subtree() {
        let mut doc = Document::new();
        let turn = doc.append_element(doc.root(), "div").unwrap();
        let button = doc.append_element(turn, "button").unwrap();
        doc.append_element(turn, "button").unwrap();
        assert_eq!(doc.count_descendants(doc.root(), "button"), 2);

        doc.remove(turn).unwrap();
        assert!(!doc.contains(turn));
        assert!(!doc.contains(button));
        assert_eq!(doc.count_descendants(doc.root(), "button"), 0);
        assert!(doc.remove(turn).is_err());
        assert!(doc.remove(doc.root()).is_err());
    }

    #[test]
    fn test_clear_children_keeps_parent() {
        let mut doc = Document::new();
        let controls = doc.append_element(doc.root(), "div").unwrap();
        doc.append_element(controls, "button").unwrap();
        doc.clear_children(controls).unwrap();

        assert!(doc.contains(controls));
        assert!(doc.children(controls).is_empty());
    }

    #[test]
    fn test_text_nodes_cannot_have_children() {
        let mut doc = Document::new();
        let text = doc.append_text(doc.root(), "hi").unwrap();
        assert!(doc.append_element(text, "div").is_err());
        assert!(doc.set_attr(text, "class", "x").is_err());
    }
}
