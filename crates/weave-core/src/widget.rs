use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::element::{EventHandler, Widget};
use crate::hash::hash_one;

/// Kind of the synthetic node at the top of every widget tree.
pub const ROOT_KIND: &str = "$root";
/// Kind of the node that replaces the output of a failed view.
pub const ERROR_KIND: &str = "$error";

/// Stable identifier of a widget node, derived from its position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(String);

impl WidgetId {
    pub fn root() -> Self {
        WidgetId("root".to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        WidgetId(id.into())
    }

    pub(crate) fn child(&self, key: &str) -> Self {
        WidgetId(format!("{:016x}", hash_one(&(self.0.as_str(), key))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully expanded widget, as shipped to the client.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetNode {
    pub id: WidgetId,
    pub kind: String,
    /// Sibling identity: unique among the children of one parent.
    pub key: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub props: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<WidgetNode>,
    #[serde(skip)]
    pub(crate) handlers: IndexMap<String, EventHandler>,
}

impl WidgetNode {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: WidgetId::root(),
            kind: kind.into(),
            key: key.into(),
            props: IndexMap::new(),
            events: Vec::new(),
            children: Vec::new(),
            handlers: IndexMap::new(),
        }
    }

    pub(crate) fn root(children: Vec<WidgetNode>) -> Self {
        let mut node = WidgetNode::new(ROOT_KIND, "");
        node.children = children;
        node
    }

    pub(crate) fn from_widget(widget: &Widget, key: String, children: Vec<WidgetNode>) -> Self {
        Self {
            id: WidgetId::root(),
            kind: widget.kind().to_string(),
            key,
            props: widget.props().clone(),
            events: widget.handlers().keys().cloned().collect(),
            children,
            handlers: widget.handlers().clone(),
        }
    }

    pub(crate) fn error(key: String, view: &str, kind: &str, message: &str) -> Self {
        let mut node = WidgetNode::new(ERROR_KIND, key);
        node.props.insert("view".into(), Value::from(view));
        node.props.insert("error".into(), Value::from(kind));
        node.props.insert("message".into(), Value::from(message));
        node
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: WidgetNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    pub fn is_error(&self) -> bool {
        self.kind == ERROR_KIND
    }

    pub fn find(&self, id: &WidgetId) -> Option<&WidgetNode> {
        if &self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &WidgetId) -> Option<&mut WidgetNode> {
        if &self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// Depth-first search for the first node matching `predicate`.
    pub fn find_by(&self, predicate: &dyn Fn(&WidgetNode) -> bool) -> Option<&WidgetNode> {
        if predicate(self) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_by(predicate))
    }

    pub fn descendants(&self) -> Vec<&WidgetNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&WidgetNode> = self.children.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(WidgetNode::count).sum::<usize>()
    }

    /// Concatenated `value` props of all text leaves, depth first.
    pub fn text_content(&self) -> String {
        let mut text = String::new();
        for node in std::iter::once(self).chain(self.descendants()) {
            if node.kind == crate::element::TEXT_KIND {
                if let Some(Value::String(value)) = node.props.get("value") {
                    text.push_str(value);
                }
            }
        }
        text
    }

    /// Recomputes ids from keys and collects event handlers by id.
    /// Siblings repeating a key are dropped; the first one wins.
    pub(crate) fn assign_ids(
        &mut self,
        parent: Option<&WidgetId>,
        handlers: &mut crate::collections::map::HashMap<WidgetId, IndexMap<String, EventHandler>>,
    ) {
        self.id = match parent {
            Some(parent) => parent.child(&self.key),
            None => WidgetId::root(),
        };
        if !self.handlers.is_empty() {
            handlers.insert(self.id.clone(), self.handlers.clone());
        }
        let mut seen: crate::collections::map::HashSet<String> = crate::collections::map::HashSet::default();
        let kind = &self.kind;
        self.children.retain(|child| {
            let first = seen.insert(child.key.clone());
            if !first {
                log::warn!(
                    "duplicate widget key {:?} under {}; only the first is kept",
                    child.key,
                    kind
                );
            }
            first
        });
        let id = self.id.clone();
        for child in &mut self.children {
            child.assign_ids(Some(&id), handlers);
        }
    }
}

impl PartialEq for WidgetNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.key == other.key
            && self.props == other.props
            && self.events == other.events
            && self.children == other.children
    }
}

impl fmt::Debug for WidgetNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("props", &self.props)
            .field("events", &self.events)
            .field("children", &self.children)
            .finish()
    }
}
