//! Resource identity and the compile-time-typed handle client code holds.
//!
//! A [`ResourceId`] is the type-erased identity the container actually keys
//! its registry and contexts by: a type-key (instance type + scope kind) and
//! a [`QualifierSet`]. A [`Resource<T, S>`] is the compile-time-typed handle
//! client code constructs and passes to the registration/retrieval API; it
//! carries no instances of its own; it is a thin (type-key, qualifiers) pair
//! annotated with `T`/`S` for API-level type safety.

use crate::qualifier::{Qualifier, QualifierSet};
use crate::scope::ScopeKind;
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Type-erased identity of a resource: (type-key, qualifier-set).
///
/// The type-key folds in the scope kind as well as the instance type, so
/// the same instance type bound to two different scopes produces two
/// distinct `ResourceId`s and therefore two distinct `ResourceManager`s.
#[derive(Clone)]
pub struct ResourceId {
    instance_type: TypeId,
    instance_type_name: &'static str,
    scope_type: TypeId,
    qualifiers: QualifierSet,
    hash: u64,
}

impl ResourceId {
    pub fn new<T: 'static, S: ScopeKind>(qualifiers: QualifierSet) -> Self {
        let instance_type = TypeId::of::<T>();
        let scope_type = TypeId::of::<S>();
        let mut h = ahash::AHasher::default();
        instance_type.hash(&mut h);
        scope_type.hash(&mut h);
        qualifiers.hash(&mut h);
        ResourceId {
            instance_type,
            instance_type_name: std::any::type_name::<T>(),
            scope_type,
            qualifiers,
            hash: h.finish(),
        }
    }

    #[inline]
    pub fn instance_type(&self) -> TypeId {
        self.instance_type
    }

    #[inline]
    pub fn instance_type_name(&self) -> &'static str {
        self.instance_type_name
    }

    #[inline]
    pub fn scope_type(&self) -> TypeId {
        self.scope_type
    }

    #[inline]
    pub fn qualifiers(&self) -> &QualifierSet {
        &self.qualifiers
    }
}

impl PartialEq for ResourceId {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.instance_type == other.instance_type
            && self.scope_type == other.scope_type
            && self.qualifiers == other.qualifiers
    }
}

impl Eq for ResourceId {}

impl Hash for ResourceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.instance_type_name, self.qualifiers)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A compile-time-typed handle to a resource: an instance type `T`, a scope
/// kind `S`, and a run-time [`QualifierSet`].
///
/// Constructing a handle does not declare the resource with any container;
/// only installing a provider (or an explicit `Container::declare`) does.
pub struct Resource<T, S: ScopeKind> {
    qualifiers: QualifierSet,
    _marker: PhantomData<fn() -> (T, S)>,
}

impl<T: 'static, S: ScopeKind> Resource<T, S> {
    /// An unqualified resource handle.
    pub fn new() -> Self {
        Self {
            qualifiers: QualifierSet::new(),
            _marker: PhantomData,
        }
    }

    /// A resource handle qualified by the given qualifiers.
    pub fn qualified(qualifiers: impl IntoIterator<Item = Qualifier>) -> Self {
        Self {
            qualifiers: QualifierSet::from_iter(qualifiers),
            _marker: PhantomData,
        }
    }

    /// Returns a new handle with `q` added to (or replacing a similar member
    /// of) this handle's qualifier set.
    pub fn with(mut self, q: Qualifier) -> Self {
        self.qualifiers.update(q);
        self
    }

    pub fn qualifiers(&self) -> &QualifierSet {
        &self.qualifiers
    }

    /// The type-erased identity this handle resolves to.
    pub fn id(&self) -> ResourceId {
        ResourceId::new::<T, S>(self.qualifiers.clone())
    }
}

impl<T: 'static, S: ScopeKind> Default for Resource<T, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S: ScopeKind> Clone for Resource<T, S> {
    fn clone(&self) -> Self {
        Self {
            qualifiers: self.qualifiers.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, S: ScopeKind> fmt::Debug for Resource<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("instance_type", &std::any::type_name::<T>())
            .field("qualifiers", &self.qualifiers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Global;

    struct Widget;

    #[test]
    fn handles_with_equal_qualifiers_share_id() {
        let a = Resource::<Widget, Global>::new();
        let b = Resource::<Widget, Global>::new();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn different_scope_kind_changes_id() {
        use crate::scope::NewEachTime;
        let a = Resource::<Widget, Global>::new();
        let b = Resource::<Widget, NewEachTime>::new();
        assert_ne!(a.id(), b.id());
    }
}
