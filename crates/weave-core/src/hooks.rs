use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::context;
use crate::deps::Deps;
use crate::effect::{Cleanup, EffectBody, EffectRegistry, EffectScope, EffectTrigger, PendingEffect};
use crate::error::HookError;
use crate::instance::{InstanceId, InstanceShared};
use crate::state::{State, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookKind {
    State,
    Effect,
    Memo,
    Ref,
    Context,
    Provide,
    Service,
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HookSignature {
    kind: HookKind,
    type_name: &'static str,
}

impl fmt::Display for HookSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            HookKind::State => "use_state",
            HookKind::Effect => "use_effect",
            HookKind::Memo => "use_memo",
            HookKind::Ref => "use_ref",
            HookKind::Context => "use_context",
            HookKind::Provide => "create_context",
            HookKind::Service => "use_service",
            HookKind::Refresh => "use_refresh_token",
        };
        write!(f, "{kind}<{}>", self.type_name)
    }
}

/// Per-instance hook storage. The signature sequence is fixed by the first
/// render that completes without error.
#[derive(Default)]
pub(crate) struct HookStore {
    sequence: Vec<HookSignature>,
    committed: Option<usize>,
    pub(crate) states: StateStore,
    pub(crate) effects: EffectRegistry,
    values: Vec<Box<dyn Any + Send>>,
}

impl HookStore {
    pub(crate) fn hook_count(&self) -> usize {
        self.sequence.len()
    }
}

struct MemoSlot<T> {
    deps: Deps,
    value: T,
}

/// Shared mutable cell that survives re-renders and never triggers one.
pub struct Ref<T> {
    cell: Arc<Mutex<T>>,
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> Ref<T> {
    pub fn set(&self, value: T) {
        *self.cell.lock() = value;
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.lock())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.cell.lock())
    }

    pub fn ptr_eq(&self, other: &Ref<T>) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T: Clone> Ref<T> {
    pub fn get(&self) -> T {
        self.cell.lock().clone()
    }
}

/// A memoized callable: identity is stable while its dependencies are.
pub struct Callback<A, R = ()> {
    f: Arc<dyn Fn(A) -> R + Send + Sync>,
}

impl<A, R> Clone for Callback<A, R> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<A, R> Callback<A, R> {
    pub fn new(f: impl Fn(A) -> R + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }

    pub fn call(&self, arg: A) -> R {
        (self.f)(arg)
    }

    pub fn ptr_eq(&self, other: &Callback<A, R>) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

impl<A, R> PartialEq for Callback<A, R> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<A, R> fmt::Debug for Callback<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Arc::as_ptr(&self.f))
    }
}

/// Dispatches actions through a reducer into a state slot.
pub struct Dispatch<T, A> {
    state: State<T>,
    reducer: Arc<dyn Fn(&T, A) -> T + Send + Sync>,
}

impl<T, A> Clone for Dispatch<T, A> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            reducer: self.reducer.clone(),
        }
    }
}

impl<T, A> Dispatch<T, A>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Returns `true` when the reducer produced a different value.
    pub fn dispatch(&self, action: A) -> bool {
        let reducer = self.reducer.clone();
        self.state.update(move |current| reducer(current, action))
    }

    pub fn state(&self) -> &State<T> {
        &self.state
    }
}

struct RefreshInner {
    owner: Weak<InstanceShared>,
    generation: AtomicU64,
    returned: Mutex<Option<Box<dyn Any + Send>>>,
}

/// Forces the owning instance and everything below it to re-render,
/// bypassing memoization.
#[derive(Clone)]
pub struct RefreshToken {
    inner: Arc<RefreshInner>,
}

impl RefreshToken {
    pub fn refresh(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(owner) = self.inner.owner.upgrade() {
            owner.force_refresh();
        }
    }

    /// Refreshes and leaves `value` for the owner to pick up with
    /// [`RefreshToken::take_returned`].
    pub fn refresh_with<T: Send + 'static>(&self, value: T) {
        *self.inner.returned.lock() = Some(Box::new(value));
        self.refresh();
    }

    pub fn take_returned<T: Send + 'static>(&self) -> Option<T> {
        let mut returned = self.inner.returned.lock();
        match returned.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                *returned = Some(other);
                None
            }
        }
    }

    /// Number of refreshes so far. Usable as an effect dependency.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshToken")
            .field("generation", &self.generation())
            .finish()
    }
}

fn record_violation(
    slot: &mut Option<HookError>,
    instance: InstanceId,
    index: usize,
    expected: String,
    found: String,
) -> HookError {
    let error = HookError::OrderViolation {
        instance,
        index,
        expected,
        found,
    };
    *slot = Some(error.clone());
    error
}

/// The handle a view receives during render. All hooks are methods on it.
pub struct RenderContext<'a> {
    shared: &'a Arc<InstanceShared>,
    store: &'a mut HookStore,
    cursor: usize,
    state_cursor: usize,
    effect_cursor: usize,
    value_cursor: usize,
    pending: Vec<PendingEffect>,
    violation: Option<HookError>,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn begin(shared: &'a Arc<InstanceShared>, store: &'a mut HookStore) -> Self {
        Self {
            shared,
            store,
            cursor: 0,
            state_cursor: 0,
            effect_cursor: 0,
            value_cursor: 0,
            pending: Vec::new(),
            violation: None,
        }
    }

    /// Verifies the hook count against the committed sequence and commits it
    /// on the first successful render. Returns the effects to run.
    pub(crate) fn finish(self) -> Result<Vec<PendingEffect>, HookError> {
        let RenderContext {
            shared,
            store,
            cursor,
            state_cursor,
            effect_cursor,
            value_cursor,
            pending,
            violation,
        } = self;
        if let Some(violation) = violation {
            return Err(violation);
        }
        match store.committed {
            Some(committed) if committed != cursor => {
                let expected = store
                    .sequence
                    .get(cursor)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "end of render".to_string());
                Err(HookError::OrderViolation {
                    instance: shared.id(),
                    index: cursor,
                    expected,
                    found: "end of render".to_string(),
                })
            }
            Some(_) => Ok(pending),
            None => {
                store.sequence.truncate(cursor);
                store.states.truncate(state_cursor);
                store.effects.truncate(effect_cursor);
                store.values.truncate(value_cursor);
                store.committed = Some(cursor);
                Ok(pending)
            }
        }
    }

    /// Takes the recorded violation, if a hook call diverged.
    pub(crate) fn take_violation(&mut self) -> Option<HookError> {
        self.violation.take()
    }

    pub fn instance_id(&self) -> InstanceId {
        self.shared.id()
    }

    pub fn view_name(&self) -> &'static str {
        self.shared.name()
    }

    fn enter(&mut self, kind: HookKind, type_name: &'static str) -> Result<(), HookError> {
        if let Some(violation) = &self.violation {
            return Err(violation.clone());
        }
        let signature = HookSignature { kind, type_name };
        let index = self.cursor;
        match self.store.sequence.get(index) {
            Some(existing) if *existing == signature => {}
            Some(existing) => {
                let expected = existing.to_string();
                return Err(self.violate(index, expected, signature.to_string()));
            }
            None if self.store.committed.is_some() => {
                return Err(self.violate(index, "end of render".to_string(), signature.to_string()));
            }
            None => self.store.sequence.push(signature),
        }
        self.cursor += 1;
        Ok(())
    }

    fn violate(&mut self, index: usize, expected: String, found: String) -> HookError {
        record_violation(&mut self.violation, self.shared.id(), index, expected, found)
    }

    fn next_value(&mut self) -> usize {
        let index = self.value_cursor;
        self.value_cursor += 1;
        index
    }

    fn value_slot<T: Send + 'static>(
        &mut self,
        index: usize,
        init: impl FnOnce() -> T,
    ) -> Result<&mut T, HookError> {
        if index == self.store.values.len() {
            self.store.values.push(Box::new(init()));
        }
        self.slot_mut(index)
    }

    fn slot_mut<T: Send + 'static>(&mut self, index: usize) -> Result<&mut T, HookError> {
        let hook = self.cursor - 1;
        match self.store.values.get_mut(index).and_then(|slot| slot.downcast_mut::<T>()) {
            Some(value) => Ok(value),
            // `store` stays borrowed by the slot; only disjoint fields are touched here.
            None => Err(record_violation(
                &mut self.violation,
                self.shared.id(),
                hook,
                "slot of another type".to_string(),
                type_name::<T>().to_string(),
            )),
        }
    }

    fn state_slot<T>(&mut self, render_on_change: bool, init: impl FnOnce() -> T) -> Result<State<T>, HookError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.enter(HookKind::State, type_name::<T>())?;
        let index = self.state_cursor;
        self.state_cursor += 1;
        match self
            .store
            .states
            .get_or_create(index, self.shared, render_on_change, init)
        {
            Some(state) => Ok(state),
            None => {
                let cursor = self.cursor - 1;
                Err(self.violate(cursor, "state of another type".to_string(), type_name::<T>().to_string()))
            }
        }
    }

    /// Positional state. `init` only runs on the first render.
    pub fn use_state<T>(&mut self, init: impl FnOnce() -> T) -> Result<State<T>, HookError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.state_slot(true, init)
    }

    /// State that is computed once and never triggers a render.
    pub fn use_static<T>(&mut self, init: impl FnOnce() -> T) -> Result<T, HookError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        Ok(self.state_slot(false, init)?.value())
    }

    pub fn use_reducer<T, A, F>(
        &mut self,
        reducer: F,
        init: impl FnOnce() -> T,
    ) -> Result<(T, Dispatch<T, A>), HookError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T, A) -> T + Send + Sync + 'static,
    {
        let state = self.state_slot(true, init)?;
        let dispatch = Dispatch {
            state: state.clone(),
            reducer: Arc::new(reducer),
        };
        Ok((state.value(), dispatch))
    }

    pub fn use_effect<F>(&mut self, trigger: EffectTrigger, body: F) -> Result<(), HookError>
    where
        F: FnOnce(EffectScope) -> anyhow::Result<Cleanup> + Send + 'static,
    {
        self.effect_slot(trigger, EffectBody::sync(body))
    }

    /// Like [`RenderContext::use_effect`], with an async body. The body
    /// should watch [`EffectScope::cancelled`] to stop early.
    pub fn use_async_effect<F, Fut>(&mut self, trigger: EffectTrigger, body: F) -> Result<(), HookError>
    where
        F: FnOnce(EffectScope) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Cleanup>> + Send + 'static,
    {
        self.effect_slot(trigger, EffectBody::future(body))
    }

    fn effect_slot(&mut self, trigger: EffectTrigger, body: EffectBody) -> Result<(), HookError> {
        self.enter(HookKind::Effect, "effect")?;
        let index = self.effect_cursor;
        self.effect_cursor += 1;
        if let Some(pending) = self.store.effects.schedule(index, trigger, body) {
            self.pending.push(pending);
        }
        Ok(())
    }

    /// Recomputes `factory` only when `deps` changed since the last render.
    pub fn use_memo<T>(&mut self, deps: Deps, factory: impl FnOnce() -> T) -> Result<T, HookError>
    where
        T: Clone + Send + 'static,
    {
        self.enter(HookKind::Memo, type_name::<T>())?;
        let index = self.next_value();
        if index == self.store.values.len() {
            let value = factory();
            self.store.values.push(Box::new(MemoSlot {
                deps,
                value: value.clone(),
            }));
            return Ok(value);
        }
        let slot = self.slot_mut::<MemoSlot<T>>(index)?;
        if deps.changed_from(&slot.deps) {
            slot.value = factory();
            slot.deps = deps;
        }
        Ok(slot.value.clone())
    }

    pub fn use_callback<A, R, F>(&mut self, deps: Deps, callback: F) -> Result<Callback<A, R>, HookError>
    where
        A: 'static,
        R: 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.use_memo(deps, move || Callback::new(callback))
    }

    pub fn use_ref<T: Send + 'static>(&mut self, init: impl FnOnce() -> T) -> Result<Ref<T>, HookError> {
        self.enter(HookKind::Ref, type_name::<T>())?;
        let index = self.next_value();
        let slot = self.value_slot(index, || Ref {
            cell: Arc::new(Mutex::new(init())),
        })?;
        Ok(slot.clone())
    }

    /// Binds a value of type `T` on this instance for descendants to
    /// resolve. `factory` only runs on the first render.
    pub fn create_context<T: Send + Sync + 'static>(
        &mut self,
        factory: impl FnOnce() -> T,
    ) -> Result<Arc<T>, HookError> {
        self.enter(HookKind::Provide, type_name::<T>())?;
        let index = self.next_value();
        let shared = self.shared.clone();
        let slot = self.value_slot(index, || {
            let value = Arc::new(factory());
            shared.contexts.provide(value.clone());
            value
        })?;
        Ok(slot.clone())
    }

    /// Nearest binding of `T` on this instance or an ancestor.
    pub fn use_context<T: Send + Sync + 'static>(&mut self) -> Result<Arc<T>, HookError> {
        self.enter(HookKind::Context, type_name::<T>())?;
        context::resolve::<T>(self.shared)
    }

    /// A service registered with the runtime.
    pub fn use_service<T: Send + Sync + 'static>(&mut self) -> Result<Arc<T>, HookError> {
        self.enter(HookKind::Service, type_name::<T>())?;
        self.shared
            .runtime()
            .service::<T>()
            .ok_or(HookError::MissingService {
                type_name: type_name::<T>(),
            })
    }

    pub fn use_refresh_token(&mut self) -> Result<RefreshToken, HookError> {
        self.enter(HookKind::Refresh, "token")?;
        let index = self.next_value();
        let owner = Arc::downgrade(self.shared);
        let slot = self.value_slot(index, || RefreshToken {
            inner: Arc::new(RefreshInner {
                owner,
                generation: AtomicU64::new(0),
                returned: Mutex::new(None),
            }),
        })?;
        Ok(slot.clone())
    }
}
