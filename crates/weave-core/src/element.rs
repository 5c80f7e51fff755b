use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::view::{View, ViewSpec};

/// Handler attached to a widget event. Receives the event arguments sent by
/// the client.
pub type EventHandler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Widget kind used for plain text leaves.
pub const TEXT_KIND: &str = "$text";

/// Explicit identity supplied by the author of a view or widget.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);

impl Key {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key(Arc::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key(Arc::from(value))
    }
}

macro_rules! key_from_display {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Key {
            fn from(value: $ty) -> Self {
                Key(Arc::from(value.to_string()))
            }
        })*
    };
}

key_from_display!(u32, u64, usize, i32, i64);

/// Output of a render: a description of widgets and child views.
#[derive(Clone, Default)]
pub enum Element {
    #[default]
    Empty,
    Widget(Widget),
    View(ViewSpec),
    Fragment(Vec<Element>),
}

impl Element {
    pub fn view<V: View>(view: V) -> Self {
        Element::View(ViewSpec::new(view))
    }

    pub fn keyed_view<V: View>(key: impl Into<Key>, view: V) -> Self {
        Element::View(ViewSpec::new(view).with_key(key))
    }

    pub fn fragment<I, E>(items: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Element>,
    {
        Element::Fragment(items.into_iter().map(Into::into).collect())
    }

    pub fn text(value: impl Into<String>) -> Self {
        Element::Widget(Widget::new(TEXT_KIND).prop("value", value.into()))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Element::Empty)
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Empty => f.write_str("Empty"),
            Element::Widget(widget) => widget.fmt(f),
            Element::View(spec) => spec.fmt(f),
            Element::Fragment(items) => f.debug_list().entries(items).finish(),
        }
    }
}

impl From<Widget> for Element {
    fn from(widget: Widget) -> Self {
        Element::Widget(widget)
    }
}

impl From<ViewSpec> for Element {
    fn from(spec: ViewSpec) -> Self {
        Element::View(spec)
    }
}

impl From<&str> for Element {
    fn from(text: &str) -> Self {
        Element::text(text)
    }
}

impl From<String> for Element {
    fn from(text: String) -> Self {
        Element::text(text)
    }
}

impl From<Vec<Element>> for Element {
    fn from(items: Vec<Element>) -> Self {
        Element::Fragment(items)
    }
}

impl<T: Into<Element>> From<Option<T>> for Element {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// A client-side widget: a kind, serializable props, event handlers and
/// children.
#[derive(Clone)]
pub struct Widget {
    kind: String,
    key: Option<Key>,
    props: IndexMap<String, Value>,
    handlers: IndexMap<String, EventHandler>,
    children: Vec<Element>,
}

impl Widget {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: None,
            props: IndexMap::new(),
            handlers: IndexMap::new(),
            children: Vec::new(),
        }
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, child: impl Into<Element>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I, E>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Element>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn on<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(event.into(), Arc::new(handler));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn explicit_key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn props(&self) -> &IndexMap<String, Value> {
        &self.props
    }

    pub fn handlers(&self) -> &IndexMap<String, EventHandler> {
        &self.handlers
    }

    pub fn child_elements(&self) -> &[Element] {
        &self.children
    }
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Widget")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("props", &self.props)
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .field("children", &self.children)
            .finish()
    }
}
