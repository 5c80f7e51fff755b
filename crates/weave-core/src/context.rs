use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::collections::map::HashMap;
use crate::error::HookError;
use crate::instance::InstanceShared;

/// Context values provided by one instance, keyed by type.
#[derive(Default)]
pub(crate) struct ContextBindings {
    values: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ContextBindings {
    pub(crate) fn provide<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        self.values.write().insert(TypeId::of::<T>(), value);
    }

    pub(crate) fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let value = self.values.read().get(&TypeId::of::<T>()).cloned()?;
        value.downcast::<T>().ok()
    }

    pub(crate) fn clear(&self) {
        self.values.write().clear();
    }
}

/// Walks from `start` towards the root and returns the nearest binding of
/// `T`. The starting instance's own bindings are checked first.
pub(crate) fn resolve<T: Send + Sync + 'static>(
    start: &Arc<InstanceShared>,
) -> Result<Arc<T>, HookError> {
    let mut current = Some(start.clone());
    while let Some(instance) = current {
        if let Some(value) = instance.contexts.get::<T>() {
            return Ok(value);
        }
        current = instance.parent();
    }
    Err(HookError::MissingContext {
        type_name: type_name::<T>(),
    })
}
