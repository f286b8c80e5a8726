//! Per-resource holder of provider/injectors/initializer/disposer.
//!
//! A [`ResourceManager<T>`] is generic over the concrete instance type so
//! registration is fully type-checked; the [`Container`] stores it behind
//! the object-safe [`AnyManager`] trait so the engine can drive phases
//! without naming every resource's instance type.
//!
//! Dependency lists are expressed with [`DepList`]: `()`, a single
//! `Resource<D, S>` handle, and tuples of handles up to arity 8 all
//! implement it, each pairing a statically-known list of [`ResourceId`]s
//! (for introspection and the consistency checker) with a `resolve` call
//! that recurses into the container at the phase the calling position
//! requires.

use crate::asset::{box_value, ErasedClone};
use crate::container::Container;
use crate::error::{DiError, Result};
use crate::phase::Phase;
use crate::resource::{Resource, ResourceId};
use crate::scope::ScopeKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A statically-typed list of resource dependencies for one callback.
///
/// Blanket-implemented for `()`, single handles, and tuples; never
/// implemented by client code directly.
pub trait DepList: Send + Sync + 'static {
    type Output;
    fn ids(&self) -> Vec<ResourceId>;
    fn resolve(&self, container: &Container, phase: Phase) -> Result<Self::Output>;
}

impl DepList for () {
    type Output = ();
    fn ids(&self) -> Vec<ResourceId> {
        Vec::new()
    }
    fn resolve(&self, _container: &Container, _phase: Phase) -> Result<()> {
        Ok(())
    }
}

impl<D: Clone + Send + Sync + 'static, S: ScopeKind> DepList for Resource<D, S> {
    type Output = D;
    fn ids(&self) -> Vec<ResourceId> {
        vec![self.id()]
    }
    fn resolve(&self, container: &Container, phase: Phase) -> Result<D> {
        container.get_at_phase(self, phase)
    }
}

macro_rules! impl_dep_list_tuple {
    ($($idx:tt $T:ident),+) => {
        impl<$($T: DepList),+> DepList for ($($T,)+) {
            type Output = ($($T::Output,)+);

            fn ids(&self) -> Vec<ResourceId> {
                let mut v = Vec::new();
                $(v.extend(self.$idx.ids());)+
                v
            }

            fn resolve(&self, container: &Container, phase: Phase) -> Result<Self::Output> {
                Ok(($(self.$idx.resolve(container, phase)?,)+))
            }
        }
    };
}

impl_dep_list_tuple!(0 A, 1 B);
impl_dep_list_tuple!(0 A, 1 B, 2 C);
impl_dep_list_tuple!(0 A, 1 B, 2 C, 3 D);
impl_dep_list_tuple!(0 A, 1 B, 2 C, 3 D, 4 E);
impl_dep_list_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_dep_list_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_dep_list_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);

struct CallSlot<Out> {
    ids: Vec<ResourceId>,
    call: Box<dyn Fn(&Container) -> Result<Out> + Send + Sync>,
}

struct ActionSlot<T> {
    ids: Vec<ResourceId>,
    call: Box<dyn Fn(&Container, &mut T) -> Result<()> + Send + Sync>,
}

/// Type-erased engine-facing view of a [`ResourceManager<T>`].
pub(crate) trait AnyManager: Send + Sync {
    fn has_provider(&self) -> bool;
    fn has_initializer(&self) -> bool;
    fn has_disposer(&self) -> bool;
    fn number_of_injectors(&self) -> usize;

    fn provider_injections(&self) -> Vec<ResourceId>;
    fn initializer_injections(&self) -> Vec<ResourceId>;
    fn disposer_injections(&self) -> Vec<ResourceId>;
    fn injector_injections(&self, index: usize) -> Vec<ResourceId>;

    fn provide(&self, container: &Container) -> Result<Box<dyn ErasedClone>>;
    fn inject(&self, container: &Container, index: usize, value: &mut dyn ErasedClone) -> Result<()>;
    fn initialize(&self, container: &Container, value: &mut dyn ErasedClone) -> Result<()>;
    fn dispose(&self, container: &Container, value: &mut dyn ErasedClone) -> Result<()>;
}

/// Holder of one resource's provider, injectors, initializer, and disposer.
pub struct ResourceManager<T: Clone + Send + Sync + 'static> {
    rid: ResourceId,
    strict: Arc<AtomicBool>,
    provider: Mutex<Option<CallSlot<T>>>,
    injectors: Mutex<Vec<ActionSlot<T>>>,
    initializer: Mutex<Option<ActionSlot<T>>>,
    disposer: Mutex<Option<ActionSlot<T>>>,
}

impl<T: Clone + Send + Sync + 'static> ResourceManager<T> {
    pub(crate) fn new(rid: ResourceId, strict: Arc<AtomicBool>) -> Self {
        ResourceManager {
            rid,
            strict,
            provider: Mutex::new(None),
            injectors: Mutex::new(Vec::new()),
            initializer: Mutex::new(None),
            disposer: Mutex::new(None),
        }
    }

    /// Installs the provider and its declared dependency list.
    ///
    /// Permissive by default (last write wins). When the owning container
    /// has `strict_providers()` enabled, a second call surfaces
    /// `Configuration` instead of silently overwriting.
    pub fn set_provider<Deps: DepList>(
        &self,
        deps: Deps,
        f: impl Fn(Deps::Output) -> T + Send + Sync + 'static,
    ) -> Result<()> {
        let mut slot = self.provider.lock().unwrap();
        if self.strict.load(Ordering::SeqCst) && slot.is_some() {
            return Err(DiError::configuration(
                &self.rid,
                "provider already set (strict_providers is enabled)",
            ));
        }
        let ids = deps.ids();
        let call = Box::new(move |container: &Container| -> Result<T> {
            let args = deps.resolve(container, Phase::Provided)?;
            Ok(f(args))
        });
        *slot = Some(CallSlot { ids, call });
        Ok(())
    }

    /// Appends an injector; order of addition is order of invocation.
    pub fn add_injector<Deps: DepList>(
        &self,
        deps: Deps,
        f: impl Fn(&mut T, Deps::Output) + Send + Sync + 'static,
    ) {
        let ids = deps.ids();
        let call = Box::new(move |container: &Container, value: &mut T| -> Result<()> {
            let args = deps.resolve(container, Phase::Provided)?;
            f(value, args);
            Ok(())
        });
        self.injectors.lock().unwrap().push(ActionSlot { ids, call });
    }

    /// Installs the single initializer, overwriting any previous one.
    pub fn set_initializer<Deps: DepList>(
        &self,
        deps: Deps,
        f: impl Fn(&mut T, Deps::Output) + Send + Sync + 'static,
    ) {
        let ids = deps.ids();
        let call = Box::new(move |container: &Container, value: &mut T| -> Result<()> {
            let args = deps.resolve(container, Phase::Injected)?;
            f(value, args);
            Ok(())
        });
        *self.initializer.lock().unwrap() = Some(ActionSlot { ids, call });
    }

    /// Installs the single disposer, overwriting any previous one.
    pub fn set_disposer<Deps: DepList>(
        &self,
        deps: Deps,
        f: impl Fn(&mut T, Deps::Output) + Send + Sync + 'static,
    ) {
        let ids = deps.ids();
        let call = Box::new(move |container: &Container, value: &mut T| -> Result<()> {
            let args = deps.resolve(container, Phase::Created)?;
            f(value, args);
            Ok(())
        });
        *self.disposer.lock().unwrap() = Some(ActionSlot { ids, call });
    }
}

impl<T: Clone + Send + Sync + 'static> AnyManager for ResourceManager<T> {
    fn has_provider(&self) -> bool {
        self.provider.lock().unwrap().is_some()
    }
    fn has_initializer(&self) -> bool {
        self.initializer.lock().unwrap().is_some()
    }
    fn has_disposer(&self) -> bool {
        self.disposer.lock().unwrap().is_some()
    }
    fn number_of_injectors(&self) -> usize {
        self.injectors.lock().unwrap().len()
    }

    fn provider_injections(&self) -> Vec<ResourceId> {
        self.provider
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.ids.clone())
            .unwrap_or_default()
    }
    fn initializer_injections(&self) -> Vec<ResourceId> {
        self.initializer
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.ids.clone())
            .unwrap_or_default()
    }
    fn disposer_injections(&self) -> Vec<ResourceId> {
        self.disposer
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.ids.clone())
            .unwrap_or_default()
    }
    fn injector_injections(&self, index: usize) -> Vec<ResourceId> {
        self.injectors
            .lock()
            .unwrap()
            .get(index)
            .map(|s| s.ids.clone())
            .unwrap_or_default()
    }

    fn provide(&self, container: &Container) -> Result<Box<dyn ErasedClone>> {
        let guard = self.provider.lock().unwrap();
        let slot = guard
            .as_ref()
            .ok_or_else(|| DiError::instantiation(&self.rid, "no provider installed"))?;
        let value = (slot.call)(container)?;
        Ok(box_value(value))
    }

    fn inject(&self, container: &Container, index: usize, value: &mut dyn ErasedClone) -> Result<()> {
        let guard = self.injectors.lock().unwrap();
        let slot = guard
            .get(index)
            .ok_or_else(|| DiError::instantiation(&self.rid, "no such injector"))?;
        let typed = value
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| DiError::type_mismatch(&self.rid, std::any::type_name::<T>()))?;
        (slot.call)(container, typed)
    }

    fn initialize(&self, container: &Container, value: &mut dyn ErasedClone) -> Result<()> {
        let guard = self.initializer.lock().unwrap();
        let Some(slot) = guard.as_ref() else {
            return Ok(());
        };
        let typed = value
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| DiError::type_mismatch(&self.rid, std::any::type_name::<T>()))?;
        (slot.call)(container, typed)
    }

    fn dispose(&self, container: &Container, value: &mut dyn ErasedClone) -> Result<()> {
        let guard = self.disposer.lock().unwrap();
        let Some(slot) = guard.as_ref() else {
            return Ok(());
        };
        let typed = value
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| DiError::type_mismatch(&self.rid, std::any::type_name::<T>()))?;
        (slot.call)(container, typed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::scope::Global;

    #[derive(Clone)]
    struct Widget {
        name: String,
    }

    #[test]
    fn provider_with_no_deps_runs() {
        let container = Container::new();
        let r = Resource::<Widget, Global>::new();
        container
            .declare(&r)
            .set_provider((), |()| Widget { name: "w".into() })
            .unwrap();
        let v = container.get(&r).unwrap();
        assert_eq!(v.name, "w");
    }

    #[test]
    fn injector_ordering_matches_registration_order() {
        #[derive(Clone, Default)]
        struct Record {
            a: i32,
            b: i32,
            c: String,
        }

        let container = Container::new();
        let r = Resource::<Record, Global>::new();
        let mgr = container.declare(&r);
        mgr.set_provider((), |()| Record::default()).unwrap();
        mgr.add_injector((), |rec: &mut Record, ()| rec.a = 1);
        mgr.add_injector((), |rec: &mut Record, ()| rec.b = 2);
        mgr.add_injector((), |rec: &mut Record, ()| rec.c = "Hello".into());
        mgr.set_initializer((), |rec: &mut Record, ()| {
            assert_eq!(rec.c, "Hello");
        });

        let v = container.get(&r).unwrap();
        assert_eq!((v.a, v.b, v.c.as_str()), (1, 2, "Hello"));
    }
}
