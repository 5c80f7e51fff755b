use std::any::Any;
use std::fmt;

/// A dependency value compared with `PartialEq` against its previous
/// snapshot.
pub trait DepValue: Any + Send + Sync + fmt::Debug {
    fn dep_eq(&self, other: &dyn DepValue) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T> DepValue for T
where
    T: PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn dep_eq(&self, other: &dyn DepValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Ordered dependency list for effects and memoized values.
#[derive(Debug, Default)]
pub struct Deps {
    values: Vec<Box<dyn DepValue>>,
}

impl Deps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T>(mut self, value: T) -> Self
    where
        T: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        self.push(value);
        self
    }

    pub fn push<T>(&mut self, value: T)
    where
        T: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        self.values.push(Box::new(value));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Element-wise comparison. A length change counts as a change.
    pub fn changed_from(&self, previous: &Deps) -> bool {
        self.values.len() != previous.values.len()
            || self
                .values
                .iter()
                .zip(previous.values.iter())
                .any(|(current, previous)| !current.dep_eq(previous.as_ref()))
    }
}

impl PartialEq for Deps {
    fn eq(&self, other: &Self) -> bool {
        !self.changed_from(other)
    }
}

/// Builds a [`Deps`] list: `deps![count, name.clone()]`.
#[macro_export]
macro_rules! deps {
    () => {
        $crate::Deps::new()
    };
    ($($dep:expr),+ $(,)?) => {
        $crate::Deps::new()$(.with($dep))+
    };
}
