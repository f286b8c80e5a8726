//! The registry of resource managers and the instantiation engine.
//!
//! [`Container::get`] is the central design contract: it walks one resource
//! through Allocated → Provided → Injected → Created, using two
//! container-level deferred-work queues (injection, creation) so that a
//! dependency cycle passing through at least one injector edge can still
//! complete. Creation work is always preferred when draining, so a
//! fully-injected asset finishes before new injection work piles up
//! unfinalized.

use crate::asset::{downcast_erased, ErasedClone};
use crate::error::{DiError, Result};
use crate::manager::{AnyManager, ResourceManager};
use crate::phase::Phase;
use crate::resource::{Resource, ResourceId};
use crate::scope::{GlobalBackend, GuardedBackend, LocalBackend, NewBackend, ScopeBackend, ScopeKind};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::TypeId;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct DeferredRecord {
    rid: ResourceId,
    manager: Arc<dyn AnyManager>,
    backend: Arc<dyn ScopeBackend>,
}

struct ContainerInner {
    managers: DashMap<ResourceId, Arc<dyn AnyManager>, RandomState>,
    global: Arc<GlobalBackend>,
    new_backend: Arc<NewBackend>,
    guarded: DashMap<TypeId, Arc<GuardedBackend>, RandomState>,
    local: DashMap<TypeId, Arc<LocalBackend>, RandomState>,
    injection_queue: Mutex<VecDeque<DeferredRecord>>,
    creation_queue: Mutex<VecDeque<DeferredRecord>>,
    strict_providers: Arc<AtomicBool>,
}

/// Registry of [`ResourceManager`]s keyed by [`ResourceId`], and the owner
/// of the instantiation engine and every scope's backing storage.
///
/// Cheap to clone: internally `Arc`-shared, a `DashMap`-backed registry
/// behind a shared handle. No lock here is ever held across a
/// provider/injector/initializer/disposer callback; callbacks run against a
/// cloned-out value, and the result is written back afterward.
#[derive(Clone)]
pub struct Container(Arc<ContainerInner>);

/// A typed view of a declared resource's manager, returned by
/// [`Container::declare`]/[`Container::get_declared`].
///
/// Derefs to [`ResourceManager<T>`]. The downcast behind the `Deref` is
/// checked: manager lookup happens at registration time, not on the
/// instantiation hot path, so there is no performance case for skipping the
/// check here.
pub struct ManagerHandle<T: Clone + Send + Sync + 'static> {
    inner: Arc<dyn AnyManager>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + Sync + 'static> Deref for ManagerHandle<T> {
    type Target = ResourceManager<T>;
    fn deref(&self) -> &ResourceManager<T> {
        self.inner
            .as_any()
            .downcast_ref::<ResourceManager<T>>()
            .expect("resource manager registry invariant violated: type-key mismatch")
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    pub fn new() -> Self {
        Container(Arc::new(ContainerInner {
            managers: DashMap::with_hasher(RandomState::new()),
            global: Arc::new(GlobalBackend::new()),
            new_backend: Arc::new(NewBackend),
            guarded: DashMap::with_hasher(RandomState::new()),
            local: DashMap::with_hasher(RandomState::new()),
            injection_queue: Mutex::new(VecDeque::new()),
            creation_queue: Mutex::new(VecDeque::new()),
            strict_providers: Arc::new(AtomicBool::new(false)),
        }))
    }

    /// Enables strict provider registration: a second `set_provider` call
    /// for the same resource surfaces `Configuration` instead of silently
    /// overwriting. Registration is permissive (last write wins) by default.
    pub fn strict_providers(self) -> Self {
        self.0.strict_providers.store(true, Ordering::SeqCst);
        self
    }

    /// Returns the manager for `r`, creating one (with no provider
    /// installed yet) if this is the first declaration. Declaring the same
    /// resource twice returns the same manager.
    pub fn declare<T: Clone + Send + Sync + 'static, S: ScopeKind>(
        &self,
        r: &Resource<T, S>,
    ) -> ManagerHandle<T> {
        let rid = r.id();
        let strict = self.0.strict_providers.clone();
        let entry = self
            .0
            .managers
            .entry(rid.clone())
            .or_insert_with(|| Arc::new(ResourceManager::<T>::new(rid, strict)) as Arc<dyn AnyManager>);
        ManagerHandle {
            inner: entry.value().clone(),
            _marker: PhantomData,
        }
    }

    /// Returns the existing manager for `r`, or `None` if it has never been
    /// declared. Unlike [`Container::declare`], never creates one.
    pub fn get_declared<T: Clone + Send + Sync + 'static, S: ScopeKind>(
        &self,
        r: &Resource<T, S>,
    ) -> Option<ManagerHandle<T>> {
        let rid = r.id();
        self.0.managers.get(&rid).map(|e| ManagerHandle {
            inner: e.value().clone(),
            _marker: PhantomData,
        })
    }

    /// Destroys every manager and clears every scope's context, disposing
    /// all assets along the way. Re-declaring resources afterward creates
    /// fresh managers with no residual state.
    pub fn clear(&self) {
        for entry in self.0.guarded.iter() {
            entry.value().force_clear(self);
        }
        self.0.guarded.clear();
        for entry in self.0.local.iter() {
            entry.value().force_clear(self);
        }
        self.0.local.clear();
        self.0
            .global
            .context()
            .clear(self, &mut |rid, err| crate::asset::log_dispose_error(rid, err));
        self.0.managers.clear();
        self.0.injection_queue.lock().unwrap().clear();
        self.0.creation_queue.lock().unwrap().clear();
    }

    /// Clears the global scope's context only, disposing every asset it
    /// holds. Nothing else clears the global context automatically: it
    /// lives for the lifetime of the container.
    pub fn clear_global(&self) {
        self.0
            .global
            .context()
            .clear(self, &mut |rid, err| crate::asset::log_dispose_error(rid, err));
    }

    /// Returns the Created-phase instance for `r`, running its provider,
    /// injectors, and initializer as needed.
    pub fn get<T: Clone + Send + Sync + 'static, S: ScopeKind>(&self, r: &Resource<T, S>) -> Result<T> {
        self.get_at_phase(r, Phase::Created)
    }

    pub(crate) fn get_at_phase<T: Clone + Send + Sync + 'static, S: ScopeKind>(
        &self,
        r: &Resource<T, S>,
        target_phase: Phase,
    ) -> Result<T> {
        let rid = r.id();
        let backend = S::backend(self);

        let is_new = backend.allocate_if_absent(&rid)?;

        if is_new {
            self.provision_new_asset(&rid, &backend)?;
        } else if backend.phase(&rid) == Some(Phase::Allocated) {
            return Err(DiError::cyclical_dependency(&rid));
        }

        loop {
            let phase = backend
                .phase(&rid)
                .ok_or_else(|| DiError::instantiation(&rid, "asset vanished from its scope"))?;
            if phase >= target_phase {
                break;
            }
            if !self.drain_one()? {
                #[cfg(feature = "logging")]
                tracing::debug!(target: "cdi_container", resource = %rid, "no deferred work could make progress, reporting cyclical dependency");
                return Err(DiError::cyclical_dependency(&rid));
            }
        }

        let boxed = backend
            .clone_value(&rid)
            .ok_or_else(|| DiError::instantiation(&rid, "asset missing its value"))?;
        let typed = downcast_erased::<T>(boxed)
            .ok_or_else(|| DiError::type_mismatch(&rid, std::any::type_name::<T>()))?;

        if S::EPHEMERAL {
            backend.drop_asset(&rid);
        }

        Ok(typed)
    }

    /// Runs the provider eagerly and queues the remaining phases: a freshly
    /// allocated asset always provisions inline.
    fn provision_new_asset(&self, rid: &ResourceId, backend: &Arc<dyn ScopeBackend>) -> Result<()> {
        let manager = match self.lookup_manager(rid) {
            Some(m) => m,
            None => {
                backend.drop_asset(rid);
                return Err(DiError::undeclared_resource(rid));
            }
        };

        match manager.provide(self) {
            Ok(value) => {
                backend.set_value(rid, value);
                backend.set_phase(rid, Phase::Provided);
                #[cfg(feature = "logging")]
                tracing::trace!(target: "cdi_container", resource = %rid, phase = "provided", "asset provisioned");
            }
            Err(cause) => {
                backend.drop_asset(rid);
                return Err(DiError::instantiation_caused(rid, "provider failed", cause));
            }
        }

        if manager.number_of_injectors() > 0 {
            self.push_inject(rid.clone(), manager.clone(), backend.clone());
        } else {
            backend.set_phase(rid, Phase::Injected);
            self.advance_past_injected(rid, &manager, backend);
        }
        Ok(())
    }

    fn advance_past_injected(&self, rid: &ResourceId, manager: &Arc<dyn AnyManager>, backend: &Arc<dyn ScopeBackend>) {
        if manager.has_initializer() {
            self.push_create(rid.clone(), manager.clone(), backend.clone());
        } else {
            backend.set_phase(rid, Phase::Created);
        }
    }

    fn push_inject(&self, rid: ResourceId, manager: Arc<dyn AnyManager>, backend: Arc<dyn ScopeBackend>) {
        self.0
            .injection_queue
            .lock()
            .unwrap()
            .push_back(DeferredRecord { rid, manager, backend });
    }

    fn push_create(&self, rid: ResourceId, manager: Arc<dyn AnyManager>, backend: Arc<dyn ScopeBackend>) {
        self.0
            .creation_queue
            .lock()
            .unwrap()
            .push_back(DeferredRecord { rid, manager, backend });
    }

    /// Drains one item, preferring the creation queue over the injection
    /// queue. Returns whether any progress was made.
    fn drain_one(&self) -> Result<bool> {
        let create_record = self.0.creation_queue.lock().unwrap().pop_front();
        if let Some(rec) = create_record {
            self.run_create(&rec.rid, &rec.manager, &rec.backend)?;
            return Ok(true);
        }
        let inject_record = self.0.injection_queue.lock().unwrap().pop_front();
        match inject_record {
            Some(rec) => {
                self.run_inject_all(&rec.rid, &rec.manager, &rec.backend)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn run_inject_all(
        &self,
        rid: &ResourceId,
        manager: &Arc<dyn AnyManager>,
        backend: &Arc<dyn ScopeBackend>,
    ) -> Result<()> {
        for index in 0..manager.number_of_injectors() {
            let mut value = backend
                .clone_value(rid)
                .ok_or_else(|| DiError::instantiation(rid, "asset missing during injection"))?;
            if let Err(cause) = manager.inject(self, index, value.as_mut()) {
                backend.drop_asset(rid);
                return Err(DiError::instantiation_caused(rid, "injector failed", cause));
            }
            backend.set_value(rid, value);
        }
        backend.set_phase(rid, Phase::Injected);
        self.advance_past_injected(rid, manager, backend);
        Ok(())
    }

    fn run_create(&self, rid: &ResourceId, manager: &Arc<dyn AnyManager>, backend: &Arc<dyn ScopeBackend>) -> Result<()> {
        let mut value = backend
            .clone_value(rid)
            .ok_or_else(|| DiError::instantiation(rid, "asset missing during initialization"))?;
        if let Err(cause) = manager.initialize(self, value.as_mut()) {
            backend.drop_asset(rid);
            return Err(DiError::instantiation_caused(rid, "initializer failed", cause));
        }
        backend.set_value(rid, value);
        backend.set_phase(rid, Phase::Created);
        #[cfg(feature = "logging")]
        tracing::trace!(target: "cdi_container", resource = %rid, phase = "created", "asset created");
        Ok(())
    }

    pub(crate) fn dispose_erased(&self, rid: &ResourceId, value: &mut dyn ErasedClone) -> Result<()> {
        match self.lookup_manager(rid) {
            Some(manager) => manager.dispose(self, value),
            None => Err(DiError::disposal(rid, "no manager registered for disposal")),
        }
    }

    pub(crate) fn lookup_manager(&self, rid: &ResourceId) -> Option<Arc<dyn AnyManager>> {
        self.0.managers.get(rid).map(|e| e.value().clone())
    }

    pub(crate) fn declared_resource_ids(&self) -> Vec<ResourceId> {
        self.0.managers.iter().map(|e| e.key().clone()).collect()
    }

    pub(crate) fn global_backend(&self) -> Arc<dyn ScopeBackend> {
        self.0.global.clone() as Arc<dyn ScopeBackend>
    }

    pub(crate) fn new_backend(&self) -> Arc<dyn ScopeBackend> {
        self.0.new_backend.clone() as Arc<dyn ScopeBackend>
    }

    pub(crate) fn guarded_backend<Tag: 'static + Send + Sync>(&self) -> Arc<GuardedBackend> {
        self.0
            .guarded
            .entry(TypeId::of::<Tag>())
            .or_insert_with(|| Arc::new(GuardedBackend::new()))
            .value()
            .clone()
    }

    pub(crate) fn local_backend<Tag: 'static + Send + Sync>(&self) -> Arc<LocalBackend> {
        self.0
            .local
            .entry(TypeId::of::<Tag>())
            .or_insert_with(|| Arc::new(LocalBackend::new()))
            .value()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualifier::{Qualifier, QualifierSet};
    use crate::resource::Resource;
    use crate::scope::Global;
    use std::sync::{Arc as StdArc, Mutex as StdMutex};

    struct Name;

    #[derive(Clone, Debug, PartialEq)]
    struct V(i32);
    #[derive(Clone, Debug, PartialEq)]
    struct W(i32);

    fn named(name: &'static str) -> QualifierSet {
        QualifierSet::from_iter([Qualifier::with_payload::<Name, _>(name)])
    }

    #[test]
    fn simple_chain() {
        let container = Container::new();
        let v = Resource::<V, Global>::qualified(named("foovoid"));
        let w = Resource::<W, Global>::qualified(named("fooint_val"));

        container.declare(&v).set_provider((), |()| V(100)).unwrap();
        container
            .declare(&w)
            .set_provider(v.clone(), |dep: V| W(dep.0 + 10))
            .unwrap();

        assert_eq!(container.get(&w).unwrap(), W(110));
        assert_eq!(container.get(&v).unwrap(), V(100));
    }

    #[derive(Clone)]
    struct Linked(StdArc<StdMutex<bool>>);

    impl Linked {
        fn new() -> Self {
            Linked(StdArc::new(StdMutex::new(false)))
        }
        fn mark_saw_peer(&self) {
            *self.0.lock().unwrap() = true;
        }
        fn saw_peer(&self) -> bool {
            *self.0.lock().unwrap()
        }
    }

    struct TagA;
    struct TagB;

    #[test]
    fn cycle_via_injector_breaks() {
        let container = Container::new();
        let a = Resource::<Linked, Global>::qualified([Qualifier::tag::<TagA>()]);
        let b = Resource::<Linked, Global>::qualified([Qualifier::tag::<TagB>()]);

        container.declare(&a).set_provider((), |()| Linked::new()).unwrap();
        container.declare(&b).set_provider((), |()| Linked::new()).unwrap();
        container
            .declare(&a)
            .add_injector(b.clone(), |me: &mut Linked, _other: Linked| {
                me.mark_saw_peer();
            });
        container
            .declare(&b)
            .add_injector(a.clone(), |me: &mut Linked, _other: Linked| {
                me.mark_saw_peer();
            });

        let got_a = container.get(&a).unwrap();
        let got_b = container.get(&b).unwrap();
        assert!(got_a.saw_peer());
        assert!(got_b.saw_peer());
    }

    #[test]
    fn pure_provider_cycle_fails_instantiation() {
        let container = Container::new();
        let a = Resource::<V, Global>::qualified([Qualifier::tag::<TagA>()]);
        let b = Resource::<V, Global>::qualified([Qualifier::tag::<TagB>()]);

        container.declare(&a).set_provider(b.clone(), |dep: V| V(dep.0)).unwrap();
        container.declare(&b).set_provider(a.clone(), |dep: V| V(dep.0)).unwrap();

        let err = container.get(&a).unwrap_err();
        assert!(err.is_cyclical_dependency());
    }

    #[test]
    fn undeclared_dependency_fails() {
        let container = Container::new();
        let w = Resource::<W, Global>::new();
        let err = container.get(&w).unwrap_err();
        assert!(matches!(err, DiError::Instantiation { .. }));
    }

    #[test]
    fn clear_resets_managers_and_contexts() {
        let container = Container::new();
        let v = Resource::<V, Global>::new();
        container.declare(&v).set_provider((), |()| V(1)).unwrap();
        container.get(&v).unwrap();

        container.clear();

        assert!(container.get_declared(&v).is_none());
        let err = container.get(&v).unwrap_err();
        assert!(matches!(err, DiError::Instantiation { .. }));
    }
}
