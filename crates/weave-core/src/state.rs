use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::instance::InstanceShared;

pub(crate) struct StateCell<T> {
    value: RwLock<T>,
    version: AtomicU64,
    owner: Weak<InstanceShared>,
    render_on_change: bool,
}

/// Handle to a state slot owned by a view instance.
///
/// Handles are cheap to clone and may be moved into event handlers and
/// effect tasks. Writing a different value marks the owning instance dirty
/// and requests a render pass; writing an equal value does nothing.
pub struct State<T> {
    cell: Arc<StateCell<T>>,
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> State<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn from_cell(cell: Arc<StateCell<T>>) -> Self {
        Self { cell }
    }

    pub fn value(&self) -> T {
        self.cell.value.read().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.value.read())
    }

    /// Incremented on every effective write.
    pub fn version(&self) -> u64 {
        self.cell.version.load(Ordering::SeqCst)
    }

    /// Returns `true` when the stored value changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.cell.value.write();
            if *current == value {
                return false;
            }
            *current = value;
        }
        self.changed();
        true
    }

    /// Computes the next value from the current one under the write lock.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        {
            let mut current = self.cell.value.write();
            let next = f(&current);
            if *current == next {
                return false;
            }
            *current = next;
        }
        self.changed();
        true
    }

    pub fn ptr_eq(&self, other: &State<T>) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    fn changed(&self) {
        self.cell.version.fetch_add(1, Ordering::SeqCst);
        if !self.cell.render_on_change {
            return;
        }
        if let Some(owner) = self.cell.owner.upgrade() {
            owner.invalidate();
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("value", &*self.cell.value.read())
            .field("version", &self.cell.version.load(Ordering::SeqCst))
            .finish()
    }
}

/// Positional storage for an instance's state cells.
#[derive(Default)]
pub(crate) struct StateStore {
    cells: Vec<Arc<dyn Any + Send + Sync>>,
}

impl StateStore {
    /// Returns the cell at `index`, creating it from `init` when the slot is
    /// new. `None` when the slot holds a value of another type.
    pub(crate) fn get_or_create<T>(
        &mut self,
        index: usize,
        owner: &Arc<InstanceShared>,
        render_on_change: bool,
        init: impl FnOnce() -> T,
    ) -> Option<State<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        if let Some(existing) = self.cells.get(index) {
            return existing
                .clone()
                .downcast::<StateCell<T>>()
                .ok()
                .map(State::from_cell);
        }
        debug_assert_eq!(index, self.cells.len());
        let cell = Arc::new(StateCell {
            value: RwLock::new(init()),
            version: AtomicU64::new(0),
            owner: Arc::downgrade(owner),
            render_on_change,
        });
        self.cells.push(cell.clone());
        Some(State::from_cell(cell))
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.cells.truncate(len);
    }
}
