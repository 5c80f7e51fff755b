use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::collections::map::HashMap;
use crate::error::HookError;

/// Type-keyed registry of host services shared by every view in a tree.
#[derive(Default)]
pub struct ServiceContainer {
    services: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&self, service: T) -> Arc<T> {
        let service = Arc::new(service);
        self.insert_arc(service.clone());
        service
    }

    pub fn insert_arc<T: Send + Sync + 'static>(&self, service: Arc<T>) {
        self.services.write().insert(TypeId::of::<T>(), service);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let entry = self.services.read().get(&TypeId::of::<T>()).cloned()?;
        entry.downcast::<T>().ok()
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, HookError> {
        self.get::<T>().ok_or(HookError::MissingService {
            type_name: type_name::<T>(),
        })
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.services.read().contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let entry = self.services.write().remove(&TypeId::of::<T>())?;
        entry.downcast::<T>().ok()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    pub fn clear(&self) {
        self.services.write().clear();
    }
}
