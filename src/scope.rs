//! The scope abstraction: policy that maps a resource-id to a storage slot.
//!
//! Four concrete scopes: [`Global`] (one process-wide
//! context, explicit clear only), [`Guarded<Tag>`] (turnstile-activated,
//! nested activations share one context), [`Local<Tag>`] (a stack of
//! contexts, one pushed per activation), and [`NewEachTime`] (never
//! persists; always fresh).
//!
//! A resource's scope is a compile-time type parameter (`Resource<T, S>`),
//! not a runtime value: `S: ScopeKind` picks out the backend at the call
//! site in [`crate::container`], and the container keeps exactly one
//! backend instance per distinct `S` (keyed by `TypeId` for the
//! tag-parameterized scopes), so every resource bound to `Guarded<RequestTag>`
//! shares the same turnstile regardless of its instance type.

use crate::asset::{Context, ErasedClone};
use crate::container::Container;
use crate::error::{DiError, Result};
use crate::phase::Phase;
use crate::resource::ResourceId;
use ahash::RandomState;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A compile-time marker selecting which scope backend a resource uses.
///
/// Never implemented by client code; the four scopes in this module are the
/// closed set of implementors.
pub trait ScopeKind: 'static + Send + Sync {
    /// Whether instances are discarded instead of persisted after a
    /// successful `get` (true only for [`NewEachTime`]).
    #[doc(hidden)]
    const EPHEMERAL: bool = false;

    #[doc(hidden)]
    fn backend(container: &Container) -> Arc<dyn ScopeBackend>;
}

/// Object-safe operations the instantiation engine needs from a scope
/// backend, independent of the resource's instance type.
pub(crate) trait ScopeBackend: Send + Sync {
    fn allocate_if_absent(&self, rid: &ResourceId) -> Result<bool>;
    fn phase(&self, rid: &ResourceId) -> Option<Phase>;
    fn set_phase(&self, rid: &ResourceId, phase: Phase);
    fn set_value(&self, rid: &ResourceId, value: Box<dyn ErasedClone>);
    fn clone_value(&self, rid: &ResourceId) -> Option<Box<dyn ErasedClone>>;
    fn drop_asset(&self, rid: &ResourceId);
}

/// The single process-wide scope. Always active; cleared only by an
/// explicit `container.clear_scope::<Global>()` call.
pub struct Global;
impl ScopeKind for Global {
    fn backend(container: &Container) -> Arc<dyn ScopeBackend> {
        container.global_backend()
    }
}

pub(crate) struct GlobalBackend {
    context: Context,
}

impl GlobalBackend {
    pub(crate) fn new() -> Self {
        GlobalBackend {
            context: Context::new(),
        }
    }

    pub(crate) fn context(&self) -> &Context {
        &self.context
    }
}

impl ScopeBackend for GlobalBackend {
    fn allocate_if_absent(&self, rid: &ResourceId) -> Result<bool> {
        Ok(self.context.allocate_if_absent(rid))
    }
    fn phase(&self, rid: &ResourceId) -> Option<Phase> {
        self.context.phase(rid)
    }
    fn set_phase(&self, rid: &ResourceId, phase: Phase) {
        self.context.set_phase(rid, phase)
    }
    fn set_value(&self, rid: &ResourceId, value: Box<dyn ErasedClone>) {
        self.context.set_value(rid, value)
    }
    fn clone_value(&self, rid: &ResourceId) -> Option<Box<dyn ErasedClone>> {
        self.context.clone_value(rid)
    }
    fn drop_asset(&self, rid: &ResourceId) {
        self.context.drop_entry(rid)
    }
}

/// Never persists: every `get` is a freshly allocated, discarded asset.
///
/// To preserve the Allocated-phase re-entrancy cycle check across a
/// provider that recursively requests its own `NewEachTime` resource, a
/// resource id is briefly registered in a thread-local table for the
/// lifetime of the call that allocated it.
pub struct NewEachTime;
impl ScopeKind for NewEachTime {
    const EPHEMERAL: bool = true;

    fn backend(container: &Container) -> Arc<dyn ScopeBackend> {
        container.new_backend()
    }
}

thread_local! {
    static IN_FLIGHT: RefCell<HashMap<ResourceId, crate::asset::Asset, RandomState>> =
        RefCell::new(HashMap::default());
}

pub(crate) struct NewBackend;

impl ScopeBackend for NewBackend {
    fn allocate_if_absent(&self, rid: &ResourceId) -> Result<bool> {
        Ok(IN_FLIGHT.with(|m| {
            let mut m = m.borrow_mut();
            if m.contains_key(rid) {
                false
            } else {
                m.insert(rid.clone(), Default::default());
                true
            }
        }))
    }
    fn phase(&self, rid: &ResourceId) -> Option<Phase> {
        IN_FLIGHT.with(|m| m.borrow().get(rid).map(|a| a.phase))
    }
    fn set_phase(&self, rid: &ResourceId, phase: Phase) {
        IN_FLIGHT.with(|m| {
            if let Some(a) = m.borrow_mut().get_mut(rid) {
                a.phase = phase;
            }
        });
    }
    fn set_value(&self, rid: &ResourceId, value: Box<dyn ErasedClone>) {
        IN_FLIGHT.with(|m| {
            if let Some(a) = m.borrow_mut().get_mut(rid) {
                a.value = Some(value);
            }
        });
    }
    fn clone_value(&self, rid: &ResourceId) -> Option<Box<dyn ErasedClone>> {
        IN_FLIGHT.with(|m| {
            m.borrow()
                .get(rid)
                .and_then(|a| a.value.as_ref().map(|v| v.clone_erased()))
        })
    }
    fn drop_asset(&self, rid: &ResourceId) {
        IN_FLIGHT.with(|m| {
            m.borrow_mut().remove(rid);
        });
    }
}

/// Turnstile-activated scope sharing one context across nested activations.
pub struct Guarded<Tag: 'static>(PhantomData<Tag>);
impl<Tag: 'static + Send + Sync> ScopeKind for Guarded<Tag> {
    fn backend(container: &Container) -> Arc<dyn ScopeBackend> {
        container.guarded_backend::<Tag>() as Arc<dyn ScopeBackend>
    }
}

pub(crate) struct GuardedBackend {
    count: AtomicUsize,
    context: Mutex<Option<Context>>,
}

impl GuardedBackend {
    pub(crate) fn new() -> Self {
        GuardedBackend {
            count: AtomicUsize::new(0),
            context: Mutex::new(None),
        }
    }

    pub(crate) fn activate(&self) {
        let mut ctx = self.context.lock().unwrap();
        if self.count.fetch_add(1, Ordering::SeqCst) == 0 {
            *ctx = Some(Context::new());
        }
    }

    pub(crate) fn deactivate(&self, container: &Container) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            let taken = self.context.lock().unwrap().take();
            if let Some(ctx) = taken {
                ctx.clear(container, &mut |rid, err| crate::asset::log_dispose_error(rid, err));
            }
        }
    }

    /// Forcibly clears the active context (if any) and resets the turnstile
    /// to zero, regardless of the current activation count. Used by
    /// `Container::clear()`.
    pub(crate) fn force_clear(&self, container: &Container) {
        self.count.store(0, Ordering::SeqCst);
        let taken = self.context.lock().unwrap().take();
        if let Some(ctx) = taken {
            ctx.clear(container, &mut |rid, err| crate::asset::log_dispose_error(rid, err));
        }
    }
}

impl ScopeBackend for GuardedBackend {
    fn allocate_if_absent(&self, rid: &ResourceId) -> Result<bool> {
        let guard = self.context.lock().unwrap();
        match guard.as_ref() {
            Some(ctx) => Ok(ctx.allocate_if_absent(rid)),
            None => Err(DiError::inactive_scope(rid)),
        }
    }
    fn phase(&self, rid: &ResourceId) -> Option<Phase> {
        self.context.lock().unwrap().as_ref().and_then(|c| c.phase(rid))
    }
    fn set_phase(&self, rid: &ResourceId, phase: Phase) {
        if let Some(c) = self.context.lock().unwrap().as_ref() {
            c.set_phase(rid, phase);
        }
    }
    fn set_value(&self, rid: &ResourceId, value: Box<dyn ErasedClone>) {
        if let Some(c) = self.context.lock().unwrap().as_ref() {
            c.set_value(rid, value);
        }
    }
    fn clone_value(&self, rid: &ResourceId) -> Option<Box<dyn ErasedClone>> {
        self.context.lock().unwrap().as_ref().and_then(|c| c.clone_value(rid))
    }
    fn drop_asset(&self, rid: &ResourceId) {
        if let Some(c) = self.context.lock().unwrap().as_ref() {
            c.drop_entry(rid);
        }
    }
}

/// An RAII handle: construction activates a [`Guarded`] scope, drop
/// deactivates it. Nested activations of the same `Tag` share one context.
pub struct GuardedActivation<Tag: 'static + Send + Sync> {
    container: Container,
    _marker: PhantomData<Tag>,
}

impl<Tag: 'static + Send + Sync> GuardedActivation<Tag> {
    pub fn activate(container: &Container) -> Self {
        container.guarded_backend::<Tag>().activate();
        GuardedActivation {
            container: container.clone(),
            _marker: PhantomData,
        }
    }
}

impl<Tag: 'static + Send + Sync> Drop for GuardedActivation<Tag> {
    fn drop(&mut self) {
        self.container.guarded_backend::<Tag>().deactivate(&self.container);
    }
}

/// Stacked-local scope: each activation pushes a fresh context.
pub struct Local<Tag: 'static>(PhantomData<Tag>);
impl<Tag: 'static + Send + Sync> ScopeKind for Local<Tag> {
    fn backend(container: &Container) -> Arc<dyn ScopeBackend> {
        container.local_backend::<Tag>() as Arc<dyn ScopeBackend>
    }
}

pub(crate) struct LocalBackend {
    stack: Mutex<Vec<Context>>,
}

impl LocalBackend {
    pub(crate) fn new() -> Self {
        LocalBackend {
            stack: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self) {
        self.stack.lock().unwrap().push(Context::new());
    }

    pub(crate) fn pop(&self, container: &Container) {
        let popped = self.stack.lock().unwrap().pop();
        if let Some(ctx) = popped {
            ctx.clear(container, &mut |rid, err| crate::asset::log_dispose_error(rid, err));
        }
    }

    /// Disposes and drops every context on the stack. Used by
    /// `Container::clear()`.
    pub(crate) fn force_clear(&self, container: &Container) {
        let mut stack = self.stack.lock().unwrap();
        let drained: Vec<Context> = stack.drain(..).collect();
        drop(stack);
        for ctx in drained {
            ctx.clear(container, &mut |rid, err| crate::asset::log_dispose_error(rid, err));
        }
    }
}

impl ScopeBackend for LocalBackend {
    fn allocate_if_absent(&self, rid: &ResourceId) -> Result<bool> {
        let stack = self.stack.lock().unwrap();
        match stack.last() {
            Some(ctx) => Ok(ctx.allocate_if_absent(rid)),
            None => Err(DiError::inactive_scope(rid)),
        }
    }
    fn phase(&self, rid: &ResourceId) -> Option<Phase> {
        self.stack.lock().unwrap().last().and_then(|c| c.phase(rid))
    }
    fn set_phase(&self, rid: &ResourceId, phase: Phase) {
        if let Some(c) = self.stack.lock().unwrap().last() {
            c.set_phase(rid, phase);
        }
    }
    fn set_value(&self, rid: &ResourceId, value: Box<dyn ErasedClone>) {
        if let Some(c) = self.stack.lock().unwrap().last() {
            c.set_value(rid, value);
        }
    }
    fn clone_value(&self, rid: &ResourceId) -> Option<Box<dyn ErasedClone>> {
        self.stack.lock().unwrap().last().and_then(|c| c.clone_value(rid))
    }
    fn drop_asset(&self, rid: &ResourceId) {
        if let Some(c) = self.stack.lock().unwrap().last() {
            c.drop_entry(rid);
        }
    }
}

/// An RAII handle: construction pushes a fresh context onto a [`Local`]
/// scope's stack, drop pops and disposes it.
pub struct LocalActivation<Tag: 'static + Send + Sync> {
    container: Container,
    _marker: PhantomData<Tag>,
}

impl<Tag: 'static + Send + Sync> LocalActivation<Tag> {
    pub fn activate(container: &Container) -> Self {
        container.local_backend::<Tag>().push();
        LocalActivation {
            container: container.clone(),
            _marker: PhantomData,
        }
    }
}

impl<Tag: 'static + Send + Sync> Drop for LocalActivation<Tag> {
    fn drop(&mut self) {
        self.container.local_backend::<Tag>().pop(&self.container);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::resource::Resource;

    struct RequestTag;

    #[derive(Clone)]
    struct Counter(u32);

    #[test]
    fn guarded_scope_turnstile() {
        let container = Container::new();
        let r = Resource::<Counter, Guarded<RequestTag>>::new();

        assert!(container.get(&r).is_err());

        let outer = GuardedActivation::<RequestTag>::activate(&container);
        static N: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
        container
            .declare(&r)
            .set_provider((), move |()| Counter(N.fetch_add(1, Ordering::SeqCst)))
            .unwrap();
        let v1 = container.get(&r).unwrap();

        let inner = GuardedActivation::<RequestTag>::activate(&container);
        let v1_again = container.get(&r).unwrap();
        assert_eq!(v1.0, v1_again.0);
        drop(inner);

        drop(outer);

        let reactivated = GuardedActivation::<RequestTag>::activate(&container);
        let v2 = container.get(&r).unwrap();
        assert_ne!(v1.0, v2.0);
        drop(reactivated);
    }

    #[test]
    fn local_scope_stacks_distinct_contexts() {
        let container = Container::new();
        let r = Resource::<Counter, Local<RequestTag>>::new();
        static N: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
        container
            .declare(&r)
            .set_provider((), move |()| Counter(N.fetch_add(1, Ordering::SeqCst)))
            .unwrap();

        let outer = LocalActivation::<RequestTag>::activate(&container);
        let p1 = container.get(&r).unwrap();

        let inner = LocalActivation::<RequestTag>::activate(&container);
        let p2 = container.get(&r).unwrap();
        assert_ne!(p1.0, p2.0);
        drop(inner);

        let p1_again = container.get(&r).unwrap();
        assert_eq!(p1.0, p1_again.0);
        drop(outer);
    }
}
