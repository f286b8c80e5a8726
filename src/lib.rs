//! # cdi-container — a Contexts-and-Dependency-Injection container
//!
//! A type-safe dependency injection container built around an explicit
//! five-phase lifecycle (Allocated → Provided → Injected → Created →
//! Disposed) and a deferred-work scheduler that can resolve dependency
//! cycles which pass through at least one *injector* edge.
//!
//! ## Features
//!
//! - **Compile-time typed handles** — [`Resource<T, S>`] carries the
//!   instance type and scope kind as type parameters; only the qualifier set
//!   is a runtime value.
//! - **Four scopes** — [`Global`] (process-wide), [`Guarded`]
//!   (turnstile-activated, nested activations share a context), [`Local`]
//!   (stacked, one context per activation), [`NewEachTime`] (never
//!   persists).
//! - **Cycle-tolerant instantiation** — provider dependencies must be fully
//!   Provided; injector dependencies only need to be Provided, which is what
//!   lets mutually-injecting resources complete.
//! - **Offline consistency checking** — [`Container::check_consistency`]
//!   walks the declared phase-event graph and reports cycles and undeclared
//!   dependencies without running any callback.
//!
//! ## Quick start
//!
//! ```
//! use cdi_container::prelude::*;
//!
//! #[derive(Clone)]
//! struct Config {
//!     debug: bool,
//! }
//!
//! #[derive(Clone)]
//! struct Logger {
//!     debug: bool,
//! }
//!
//! let container = Container::new();
//! let config = Resource::<Config, Global>::new();
//! let logger = Resource::<Logger, Global>::new();
//!
//! container.declare(&config).set_provider((), |()| Config { debug: true }).unwrap();
//! container
//!     .declare(&logger)
//!     .set_provider(config.clone(), |c: Config| Logger { debug: c.debug })
//!     .unwrap();
//!
//! let logger = container.get(&logger).unwrap();
//! assert!(logger.debug);
//! ```

mod asset;
mod container;
mod error;
#[cfg(feature = "logging")]
pub mod logging;
mod manager;
mod phase;
mod qualifier;
mod resource;
mod scope;
mod verify;

pub use container::{Container, ManagerHandle};
pub use error::{DiError, Result};
pub use manager::{DepList, ResourceManager};
pub use phase::Phase;
pub use qualifier::{Qualifier, QualifierPayload, QualifierSet};
pub use resource::{Resource, ResourceId};
pub use scope::{
    Global, Guarded, GuardedActivation, Local, LocalActivation, NewEachTime, ScopeKind,
};

#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

/// Convenience re-exports for the common case of one container plus a
/// handful of `Global`-scoped resources.
pub mod prelude {
    pub use crate::{Container, DiError, Global, Qualifier, Resource, Result};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    struct TagA;
    struct TagB;

    #[derive(Clone)]
    struct Config {
        name: String,
    }

    #[derive(Clone)]
    struct Logger {
        config_name: String,
        initialized: bool,
    }

    // Seed scenario 1: simple provider chain.
    #[test]
    fn simple_chain_resolves_in_order() {
        let container = Container::new();
        let config = Resource::<Config, Global>::new();
        let logger = Resource::<Logger, Global>::new();

        container
            .declare(&config)
            .set_provider((), |()| Config { name: "app".into() })
            .unwrap();
        container
            .declare(&logger)
            .set_provider(config.clone(), |c: Config| Logger {
                config_name: c.name,
                initialized: false,
            })
            .unwrap();
        container.declare(&logger).set_initializer((), |l: &mut Logger, ()| {
            l.initialized = true;
        });

        let got = container.get(&logger).unwrap();
        assert_eq!(got.config_name, "app");
        assert!(got.initialized);
    }

    #[derive(Clone)]
    struct Node(Arc<Mutex<Option<i32>>>);
    impl Node {
        fn new() -> Self {
            Node(Arc::new(Mutex::new(None)))
        }
        fn set(&self, v: i32) {
            *self.0.lock().unwrap() = Some(v);
        }
        fn get(&self) -> Option<i32> {
            *self.0.lock().unwrap()
        }
    }

    // Seed scenario 2: cycle via injector.
    #[test]
    fn cycle_via_injector_resolves() {
        let container = Container::new();
        let a = Resource::<Node, Global>::qualified([Qualifier::tag::<TagA>()]);
        let b = Resource::<Node, Global>::qualified([Qualifier::tag::<TagB>()]);

        container.declare(&a).set_provider((), |()| Node::new()).unwrap();
        container.declare(&b).set_provider((), |()| Node::new()).unwrap();
        container.declare(&a).add_injector(b.clone(), |me: &mut Node, other: Node| {
            me.set(7);
            other.set(7);
        });
        container.declare(&b).add_injector(a.clone(), |me: &mut Node, other: Node| {
            me.set(other.get().unwrap_or(-1));
        });

        let got_a = container.get(&a).unwrap();
        let got_b = container.get(&b).unwrap();
        assert!(got_a.get().is_some());
        assert!(got_b.get().is_some());

        let mut report = String::new();
        assert!(container.check_consistency(&mut report));
    }

    #[derive(Clone)]
    struct V(i32);

    // Seed scenario 3: pure provider cycle rejected.
    #[test]
    fn pure_provider_cycle_is_rejected() {
        let container = Container::new();
        let a = Resource::<V, Global>::qualified([Qualifier::tag::<TagA>()]);
        let b = Resource::<V, Global>::qualified([Qualifier::tag::<TagB>()]);

        container.declare(&a).set_provider(b.clone(), |d: V| V(d.0)).unwrap();
        container.declare(&b).set_provider(a.clone(), |d: V| V(d.0)).unwrap();

        let mut report = String::new();
        assert!(!container.check_consistency(&mut report));
        assert!(report.contains("cyclical dependency"));

        let err = container.get(&a).unwrap_err();
        assert!(err.is_cyclical_dependency());
    }

    // Seed scenario 4: guarded-scope turnstile.
    #[test]
    fn guarded_scope_shares_one_context_across_nested_activations() {
        struct RequestTag;
        #[derive(Clone)]
        struct Counter(u32);

        let container = Container::new();
        let r = Resource::<Counter, Guarded<RequestTag>>::new();

        assert!(container.get(&r).is_err());

        static N: AtomicU32 = AtomicU32::new(0);
        let outer = GuardedActivation::<RequestTag>::activate(&container);
        container
            .declare(&r)
            .set_provider((), |()| Counter(N.fetch_add(1, Ordering::SeqCst)))
            .unwrap();
        let v1 = container.get(&r).unwrap();

        let inner = GuardedActivation::<RequestTag>::activate(&container);
        assert_eq!(container.get(&r).unwrap().0, v1.0);
        drop(inner);
        drop(outer);

        let reactivated = GuardedActivation::<RequestTag>::activate(&container);
        assert_ne!(container.get(&r).unwrap().0, v1.0);
        drop(reactivated);
    }

    // Seed scenario 5: stacked local scope.
    #[test]
    fn local_scope_pushes_distinct_context_per_activation() {
        struct RequestTag;
        #[derive(Clone)]
        struct Counter(u32);

        let container = Container::new();
        let r = Resource::<Counter, Local<RequestTag>>::new();
        static N: AtomicU32 = AtomicU32::new(0);
        container
            .declare(&r)
            .set_provider((), |()| Counter(N.fetch_add(1, Ordering::SeqCst)))
            .unwrap();

        let outer = LocalActivation::<RequestTag>::activate(&container);
        let p1 = container.get(&r).unwrap();

        let inner = LocalActivation::<RequestTag>::activate(&container);
        let p2 = container.get(&r).unwrap();
        assert_ne!(p1.0, p2.0);
        drop(inner);

        assert_eq!(container.get(&r).unwrap().0, p1.0);
        drop(outer);
    }

    // Seed scenario 6: injector ordering.
    #[test]
    fn injectors_run_in_registration_order() {
        #[derive(Clone, Default)]
        struct Record {
            a: i32,
            b: i32,
        }

        let container = Container::new();
        let r = Resource::<Record, Global>::new();
        let mgr = container.declare(&r);
        mgr.set_provider((), |()| Record::default()).unwrap();
        mgr.add_injector((), |rec: &mut Record, ()| {
            rec.a = 1;
        });
        mgr.add_injector((), |rec: &mut Record, ()| {
            assert_eq!(rec.a, 1);
            rec.b = 2;
        });

        let v = container.get(&r).unwrap();
        assert_eq!((v.a, v.b), (1, 2));
    }

    #[test]
    fn disposer_runs_on_scope_clear() {
        static DISPOSED: AtomicU32 = AtomicU32::new(0);

        #[derive(Clone)]
        struct Resource1;

        let container = Container::new();
        let r = Resource::<Resource1, Global>::new();
        container.declare(&r).set_provider((), |()| Resource1).unwrap();
        container
            .declare(&r)
            .set_disposer((), |_v: &mut Resource1, ()| {
                DISPOSED.fetch_add(1, Ordering::SeqCst);
            });

        container.get(&r).unwrap();
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 0);

        container.clear_global();
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_each_time_never_persists() {
        static N: AtomicU32 = AtomicU32::new(0);

        #[derive(Clone)]
        struct Ticket(u32);

        let container = Container::new();
        let r = Resource::<Ticket, NewEachTime>::new();
        container
            .declare(&r)
            .set_provider((), |()| Ticket(N.fetch_add(1, Ordering::SeqCst)))
            .unwrap();

        let a = container.get(&r).unwrap();
        let b = container.get(&r).unwrap();
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn strict_providers_rejects_redeclaration() {
        let container = Container::new().strict_providers();
        let r = Resource::<Config, Global>::new();
        container
            .declare(&r)
            .set_provider((), |()| Config { name: "one".into() })
            .unwrap();
        let err = container
            .declare(&r)
            .set_provider((), |()| Config { name: "two".into() })
            .unwrap_err();
        assert!(matches!(err, DiError::Configuration { .. }));
    }
}
