//! Type-erased value storage and the per-scope map of resource-id to asset.
//!
//! An [`Asset`] is one storage slot: a type-erased value plus its current
//! [`Phase`]. A [`Context`] is the backing map a [`crate::scope::Scope`]
//! clears as a unit. Values are stored behind [`ErasedClone`] rather than
//! `Arc<dyn Any>` because injectors, initializers, and disposers all need
//! `&mut T` access to the stored instance; cloning out a snapshot for
//! dependents is what lets a cycle-breaking injector edge see a
//! Provided-phase value before the owning asset is fully wired.

use crate::container::Container;
use crate::error::{DiError, Result};
use crate::phase::Phase;
use crate::resource::ResourceId;
use ahash::RandomState;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;

/// A value that can be stored type-erased and cloned out for dependents.
///
/// Blanket-implemented for every `T: Any + Send + Sync + Clone`; client code
/// never implements this directly.
pub(crate) trait ErasedClone: Any + Send + Sync {
    fn clone_erased(&self) -> Box<dyn ErasedClone>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any + Send + Sync + Clone> ErasedClone for T {
    fn clone_erased(&self) -> Box<dyn ErasedClone> {
        Box::new(self.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

pub(crate) fn box_value<T: Any + Send + Sync + Clone>(value: T) -> Box<dyn ErasedClone> {
    Box::new(value)
}

pub(crate) fn downcast_erased<T: 'static>(b: Box<dyn ErasedClone>) -> Option<T> {
    b.into_any().downcast::<T>().ok().map(|b| *b)
}

/// One storage slot for one instance, plus its current lifecycle phase.
///
/// Constructed in [`Phase::Allocated`] with no value; the instantiation
/// engine is the only code that advances its phase or sets its value.
pub(crate) struct Asset {
    pub(crate) value: Option<Box<dyn ErasedClone>>,
    pub(crate) phase: Phase,
}

impl Asset {
    fn new() -> Self {
        Asset {
            value: None,
            phase: Phase::Allocated,
        }
    }
}

impl Default for Asset {
    fn default() -> Self {
        Asset::new()
    }
}

/// A map from [`ResourceId`] to [`Asset`], owned by a scope's activation.
///
/// All operations lock briefly and release before returning: the engine
/// never holds a context lock across a recursive `get` call, so the API is
/// a set of short atomic primitives rather than a borrowed handle into the
/// map.
pub(crate) struct Context {
    assets: Mutex<HashMap<ResourceId, Asset, RandomState>>,
}

impl Context {
    pub(crate) fn new() -> Self {
        Context {
            assets: Mutex::new(HashMap::default()),
        }
    }

    /// Ensures an entry exists for `rid`; returns whether it was newly
    /// created.
    pub(crate) fn allocate_if_absent(&self, rid: &ResourceId) -> bool {
        let mut assets = self.assets.lock().unwrap();
        if assets.contains_key(rid) {
            false
        } else {
            assets.insert(rid.clone(), Asset::new());
            true
        }
    }

    pub(crate) fn phase(&self, rid: &ResourceId) -> Option<Phase> {
        self.assets.lock().unwrap().get(rid).map(|a| a.phase)
    }

    pub(crate) fn set_phase(&self, rid: &ResourceId, phase: Phase) {
        if let Some(a) = self.assets.lock().unwrap().get_mut(rid) {
            a.phase = phase;
        }
    }

    pub(crate) fn set_value(&self, rid: &ResourceId, value: Box<dyn ErasedClone>) {
        if let Some(a) = self.assets.lock().unwrap().get_mut(rid) {
            a.value = Some(value);
        }
    }

    pub(crate) fn clone_value(&self, rid: &ResourceId) -> Option<Box<dyn ErasedClone>> {
        self.assets
            .lock()
            .unwrap()
            .get(rid)
            .and_then(|a| a.value.as_ref().map(|v| v.clone_erased()))
    }

    pub(crate) fn with_value_mut(
        &self,
        rid: &ResourceId,
        f: &mut dyn FnMut(&mut dyn ErasedClone),
    ) -> bool {
        let mut assets = self.assets.lock().unwrap();
        match assets.get_mut(rid).and_then(|a| a.value.as_deref_mut()) {
            Some(v) => {
                f(v);
                true
            }
            None => false,
        }
    }

    /// Removes an entry without running its disposer (unwinds failed
    /// provisioning).
    pub(crate) fn drop_entry(&self, rid: &ResourceId) {
        self.assets.lock().unwrap().remove(rid);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.assets.lock().unwrap().is_empty()
    }

    /// Disposes every entry via the container's manager lookup, then clears
    /// the map. A disposer that fails is reported through `on_error` but
    /// does not stop remaining disposals.
    pub(crate) fn clear(&self, container: &Container, on_error: &mut dyn FnMut(&ResourceId, DiError)) {
        let entries: Vec<(ResourceId, Asset)> = {
            let mut assets = self.assets.lock().unwrap();
            assets.drain().collect()
        };
        for (rid, mut asset) in entries {
            if let Some(value) = asset.value.as_mut() {
                if let Err(e) = container.dispose_erased(&rid, value.as_mut()) {
                    on_error(&rid, e);
                }
            }
        }
    }
}

pub(crate) fn log_dispose_error(rid: &ResourceId, err: DiError) {
    #[cfg(feature = "logging")]
    tracing::warn!(target: "cdi_container", resource = %rid, error = %err, "disposer failed during context clear");
    #[cfg(not(feature = "logging"))]
    {
        let _ = (rid, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Global;
    use crate::qualifier::QualifierSet;

    fn rid() -> ResourceId {
        ResourceId::new::<i32, Global>(QualifierSet::new())
    }

    #[test]
    fn allocate_is_idempotent_per_entry() {
        let ctx = Context::new();
        let rid = rid();
        assert!(ctx.allocate_if_absent(&rid));
        assert!(!ctx.allocate_if_absent(&rid));
        assert_eq!(ctx.phase(&rid), Some(Phase::Allocated));
    }

    #[test]
    fn set_and_clone_value_roundtrips() {
        let ctx = Context::new();
        let rid = rid();
        ctx.allocate_if_absent(&rid);
        ctx.set_value(&rid, box_value(42i32));
        let cloned = ctx.clone_value(&rid).unwrap();
        assert_eq!(downcast_erased::<i32>(cloned), Some(42));
    }

    #[test]
    fn with_value_mut_mutates_in_place() {
        let ctx = Context::new();
        let rid = rid();
        ctx.allocate_if_absent(&rid);
        ctx.set_value(&rid, box_value(10i32));
        ctx.with_value_mut(&rid, &mut |v| {
            if let Some(n) = v.as_any_mut().downcast_mut::<i32>() {
                *n += 5;
            }
        });
        let cloned = ctx.clone_value(&rid).unwrap();
        assert_eq!(downcast_erased::<i32>(cloned), Some(15));
    }

    #[test]
    fn drop_entry_removes_without_disposer() {
        let ctx = Context::new();
        let rid = rid();
        ctx.allocate_if_absent(&rid);
        ctx.drop_entry(&rid);
        assert!(ctx.is_empty());
    }
}
