use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::element::{Element, Key};
use crate::hooks::RenderContext;

/// A renderable unit with its own hook storage.
///
/// `render` must call hooks in the same order on every invocation. Returning
/// an error (or panicking) replaces this view's output with an error node;
/// the rest of the tree is unaffected.
pub trait View: Send + Sync + 'static {
    fn render(&self, cx: &mut RenderContext<'_>) -> anyhow::Result<Element>;

    /// When two consecutive specs for the same instance report the same
    /// key, the instance is not re-rendered just because its parent was.
    fn memo_key(&self) -> Option<u64> {
        None
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A view defined by a closure.
pub struct FnView<F> {
    name: &'static str,
    render: F,
}

impl<F> View for FnView<F>
where
    F: Fn(&mut RenderContext<'_>) -> anyhow::Result<Element> + Send + Sync + 'static,
{
    fn render(&self, cx: &mut RenderContext<'_>) -> anyhow::Result<Element> {
        (self.render)(cx)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

pub fn view_fn<F>(name: &'static str, render: F) -> FnView<F>
where
    F: Fn(&mut RenderContext<'_>) -> anyhow::Result<Element> + Send + Sync + 'static,
{
    FnView { name, render }
}

/// Concrete view type, used with the key to match instances across renders.
#[derive(Clone, Copy)]
pub struct ViewType {
    id: TypeId,
    name: &'static str,
}

impl ViewType {
    pub fn of<V: View>(view: &V) -> Self {
        Self {
            id: TypeId::of::<V>(),
            name: view.name(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ViewType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ViewType {}

impl Hash for ViewType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ViewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A view value placed in an element tree, optionally keyed.
#[derive(Clone)]
pub struct ViewSpec {
    pub(crate) view: Arc<dyn View>,
    pub(crate) view_type: ViewType,
    pub(crate) key: Option<Key>,
}

impl ViewSpec {
    pub fn new<V: View>(view: V) -> Self {
        let view_type = ViewType::of(&view);
        Self {
            view: Arc::new(view),
            view_type,
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn view_type(&self) -> ViewType {
        self.view_type
    }

    pub fn name(&self) -> &'static str {
        self.view_type.name
    }
}

impl fmt::Debug for ViewSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewSpec")
            .field("view", &self.view_type)
            .field("key", &self.key)
            .finish()
    }
}

pub type ViewFactory = Arc<dyn Fn() -> ViewSpec + Send + Sync>;

/// Root views a host can mount, by app id.
#[derive(Clone, Default)]
pub struct ViewRegistry {
    factories: IndexMap<String, ViewFactory>,
    default_app: Option<String>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, app_id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> ViewSpec + Send + Sync + 'static,
    {
        self.factories.insert(app_id.into(), Arc::new(factory));
        self
    }

    pub fn set_default(&mut self, app_id: impl Into<String>) -> &mut Self {
        self.default_app = Some(app_id.into());
        self
    }

    /// The explicit default, or the first registered app.
    pub fn default_app(&self) -> Option<&str> {
        self.default_app
            .as_deref()
            .or_else(|| self.factories.keys().next().map(String::as_str))
    }

    pub fn create(&self, app_id: &str) -> Option<ViewSpec> {
        self.factories.get(app_id).map(|factory| factory())
    }

    pub fn contains(&self, app_id: &str) -> bool {
        self.factories.contains_key(app_id)
    }

    pub fn app_ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
