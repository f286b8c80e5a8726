//! Qualifiers: tagged, hashable annotations used to disambiguate resources
//! that share an instance type, and [`QualifierSet`], the small per-resource
//! collection of them.
//!
//! A qualifier kind is declared by a marker type (its *tag*). The tag
//! carries no runtime data of its own; it only identifies "what kind of
//! annotation is this" (e.g. a `Name` tag vs an `Environment` tag). The
//! qualifier *value* additionally carries an optional typed payload (e.g.
//! `Name("primary")`).
//!
//! Payload polymorphism is modeled as a small trait object rather than an
//! enum of built-in payload kinds, since client code can qualify resources
//! with arbitrary user types.

use ahash::RandomState;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

fn hasher() -> impl Hasher {
    RandomState::with_seeds(0x51_7c_ce_11, 0xd15_c0_de, 0xfeed_face, 0x0bad_f00d)
        .build_hasher()
}

/// Object-safe equality/hashing/display for a qualifier payload.
///
/// Implemented automatically for any `T: Any + Eq + Hash + fmt::Debug + Send
/// + Sync`; client code never implements this by hand.
pub trait QualifierPayload: Any + Send + Sync + fmt::Debug {
    fn payload_eq(&self, other: &dyn QualifierPayload) -> bool;
    fn payload_hash(&self) -> u64;
    fn as_any(&self) -> &dyn Any;
}

impl<T> QualifierPayload for T
where
    T: Any + Eq + Hash + fmt::Debug + Send + Sync,
{
    fn payload_eq(&self, other: &dyn QualifierPayload) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|o| o == self)
    }

    fn payload_hash(&self) -> u64 {
        let mut h = hasher();
        TypeId::of::<T>().hash(&mut h);
        self.hash(&mut h);
        h.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A tagged runtime annotation with an optional typed payload.
///
/// Two qualifiers are *equal* iff their tag-keys and payloads are both
/// equal; two are *similar* iff only their tag-keys match. The distinguished
/// [`Qualifier::all`] matches any other qualifier regardless of payload.
#[derive(Clone)]
pub struct Qualifier {
    tag: TypeId,
    tag_name: &'static str,
    payload: Option<Arc<dyn QualifierPayload>>,
    is_all: bool,
    hash: u64,
}

impl Qualifier {
    /// Construct a zero-payload qualifier of kind `Tag`.
    pub fn tag<Tag: 'static>() -> Self {
        Self::with_payload_opt::<Tag, ()>(None)
    }

    /// Construct a qualifier of kind `Tag` carrying `payload`.
    pub fn with_payload<Tag: 'static, P>(payload: P) -> Self
    where
        P: Any + Eq + Hash + fmt::Debug + Send + Sync,
    {
        Self::with_payload_opt::<Tag, P>(Some(Arc::new(payload)))
    }

    fn with_payload_opt<Tag: 'static, P>(payload: Option<Arc<dyn QualifierPayload>>) -> Self
    where
        P: 'static,
    {
        let tag = TypeId::of::<Tag>();
        let tag_name = std::any::type_name::<Tag>();
        let mut h = hasher();
        tag.hash(&mut h);
        let mut hash = h.finish();
        if let Some(p) = &payload {
            hash ^= p.payload_hash();
        }
        Qualifier {
            tag,
            tag_name,
            payload,
            is_all: false,
            hash,
        }
    }

    /// The distinguished qualifier that [`Qualifier::matches`] every other
    /// qualifier against, regardless of their tag or payload.
    pub fn all() -> Self {
        struct AllTag;
        let mut q = Self::tag::<AllTag>();
        q.is_all = true;
        q
    }

    /// The distinguished zero-payload "default" sentinel qualifier.
    pub fn default_sentinel() -> Self {
        struct DefaultTag;
        Self::tag::<DefaultTag>()
    }

    /// The distinguished zero-payload "null" sentinel qualifier.
    pub fn null() -> Self {
        struct NullTag;
        Self::tag::<NullTag>()
    }

    /// The tag identity of this qualifier (used for similarity matching).
    #[inline]
    pub fn tag_key(&self) -> TypeId {
        self.tag
    }

    /// Human-readable tag name, for error messages and reports.
    #[inline]
    pub fn tag_name(&self) -> &'static str {
        self.tag_name
    }

    /// Two qualifiers are similar iff they share a tag-key, regardless of
    /// payload.
    #[inline]
    pub fn is_similar(&self, other: &Qualifier) -> bool {
        self.tag == other.tag
    }

    /// The matching relation used by [`QualifierSet::matches`]: equality,
    /// except `All` matches unconditionally.
    pub fn matches(&self, other: &Qualifier) -> bool {
        if self.is_all || other.is_all {
            return true;
        }
        self == other
    }
}

impl PartialEq for Qualifier {
    fn eq(&self, other: &Self) -> bool {
        if self.hash != other.hash {
            return false;
        }
        if self.tag != other.tag {
            return false;
        }
        match (&self.payload, &other.payload) {
            (None, None) => true,
            (Some(a), Some(b)) => a.payload_eq(b.as_ref()),
            _ => false,
        }
    }
}

impl Eq for Qualifier {}

impl Hash for Qualifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(p) => write!(f, "{}({:?})", self.tag_name, p),
            None => write!(f, "{}", self.tag_name),
        }
    }
}

/// A small set of qualifiers with at most one member per tag-key.
///
/// Inserting a qualifier whose tag matches an existing member replaces that
/// member, enforcing an at-most-one-per-tag invariant. The set's cached
/// hash is the xor of its members' hashes, so membership order never
/// affects equality or hashing.
#[derive(Clone, Default)]
pub struct QualifierSet {
    members: Vec<Qualifier>,
    hash: u64,
}

impl QualifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_iter(qualifiers: impl IntoIterator<Item = Qualifier>) -> Self {
        let mut set = Self::new();
        for q in qualifiers {
            set.update(q);
        }
        set
    }

    /// Replace any member with the same tag-key as `q`, or insert it fresh.
    pub fn update(&mut self, q: Qualifier) {
        if let Some(existing) = self.members.iter().position(|m| m.is_similar(&q)) {
            self.hash ^= self.members[existing].hash;
            self.hash ^= q.hash;
            self.members[existing] = q;
        } else {
            self.hash ^= q.hash;
            self.members.push(q);
        }
    }

    /// Remove the member equal to `q`, if any.
    pub fn delete_equal(&mut self, q: &Qualifier) {
        if let Some(pos) = self.members.iter().position(|m| m == q) {
            self.hash ^= self.members[pos].hash;
            self.members.remove(pos);
        }
    }

    /// Remove the member similar to `q` (same tag-key), if any.
    pub fn delete_similar(&mut self, q: &Qualifier) {
        if let Some(pos) = self.members.iter().position(|m| m.is_similar(q)) {
            self.hash ^= self.members[pos].hash;
            self.members.remove(pos);
        }
    }

    /// Exact-match membership.
    pub fn contains(&self, q: &Qualifier) -> bool {
        self.members.iter().any(|m| m == q)
    }

    /// Tag-only membership.
    pub fn contains_similar(&self, q: &Qualifier) -> bool {
        self.members.iter().any(|m| m.is_similar(q))
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Qualifier> {
        self.members.iter()
    }

    /// `self.matches(other)` iff every element of `self` matches some
    /// element of `other` and vice versa. The empty set matches only the
    /// empty set.
    pub fn matches(&self, other: &QualifierSet) -> bool {
        if self.members.is_empty() || other.members.is_empty() {
            return self.members.is_empty() && other.members.is_empty();
        }
        self.members
            .iter()
            .all(|a| other.members.iter().any(|b| a.matches(b)))
            && other
                .members
                .iter()
                .all(|b| self.members.iter().any(|a| a.matches(b)))
    }
}

impl PartialEq for QualifierSet {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.members.len() == other.members.len()
            && self.members.iter().all(|m| other.contains(m))
    }
}

impl Eq for QualifierSet {}

impl Hash for QualifierSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for QualifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.members.iter()).finish()
    }
}

impl IntoIterator for QualifierSet {
    type Item = Qualifier;
    type IntoIter = std::vec::IntoIter<Qualifier>;
    fn into_iter(self) -> Self::IntoIter {
        self.members.into_iter()
    }
}

impl FromIterator<Qualifier> for QualifierSet {
    fn from_iter<I: IntoIterator<Item = Qualifier>>(iter: I) -> Self {
        let mut set = Self::new();
        for q in iter {
            set.update(q);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NameTag;
    struct EnvTag;

    #[test]
    fn equal_qualifiers_hash_equal() {
        let a = Qualifier::with_payload::<NameTag, _>("primary".to_string());
        let b = Qualifier::with_payload::<NameTag, _>("primary".to_string());
        assert_eq!(a, b);

        let mut ha = hasher();
        a.hash(&mut ha);
        let mut hb = hasher();
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn different_payload_same_tag_is_similar_not_equal() {
        let a = Qualifier::with_payload::<NameTag, _>("primary".to_string());
        let b = Qualifier::with_payload::<NameTag, _>("replica".to_string());
        assert!(a.is_similar(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn zero_payload_equality_is_tag_equality() {
        let a = Qualifier::tag::<NameTag>();
        let b = Qualifier::tag::<NameTag>();
        assert_eq!(a, b);
    }

    #[test]
    fn all_matches_everything() {
        let all = Qualifier::all();
        let named = Qualifier::with_payload::<NameTag, _>("primary".to_string());
        assert!(all.matches(&named));
        assert!(named.matches(&all));
    }

    #[test]
    fn set_enforces_tag_uniqueness() {
        let mut set = QualifierSet::new();
        set.update(Qualifier::with_payload::<NameTag, _>("a".to_string()));
        set.update(Qualifier::with_payload::<NameTag, _>("b".to_string()));
        assert_eq!(set.size(), 1);
        assert!(set.contains(&Qualifier::with_payload::<NameTag, _>(
            "b".to_string()
        )));
    }

    #[test]
    fn set_matching_reduces_to_equality_without_all() {
        let mut a = QualifierSet::new();
        a.update(Qualifier::with_payload::<NameTag, _>("primary".to_string()));
        a.update(Qualifier::tag::<EnvTag>());

        let mut b = QualifierSet::new();
        b.update(Qualifier::tag::<EnvTag>());
        b.update(Qualifier::with_payload::<NameTag, _>("primary".to_string()));

        assert!(a.matches(&b));

        let mut c = QualifierSet::new();
        c.update(Qualifier::with_payload::<NameTag, _>("replica".to_string()));
        assert!(!a.matches(&c));
    }

    #[test]
    fn empty_set_matches_only_empty_set() {
        let empty = QualifierSet::new();
        let mut nonempty = QualifierSet::new();
        nonempty.update(Qualifier::tag::<NameTag>());

        assert!(empty.matches(&QualifierSet::new()));
        assert!(!empty.matches(&nonempty));
        assert!(!nonempty.matches(&empty));
    }

    #[test]
    fn set_hash_is_order_independent() {
        let mut a = QualifierSet::new();
        a.update(Qualifier::tag::<NameTag>());
        a.update(Qualifier::tag::<EnvTag>());

        let mut b = QualifierSet::new();
        b.update(Qualifier::tag::<EnvTag>());
        b.update(Qualifier::tag::<NameTag>());

        assert_eq!(a, b);
        let mut ha = hasher();
        a.hash(&mut ha);
        let mut hb = hasher();
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn delete_similar_and_equal() {
        let mut set = QualifierSet::new();
        set.update(Qualifier::with_payload::<NameTag, _>("primary".to_string()));
        set.delete_similar(&Qualifier::tag::<NameTag>());
        assert!(set.is_empty());
    }
}
