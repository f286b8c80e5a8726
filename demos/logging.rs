//! Example demonstrating logging capabilities
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use cdi_container::{Container, Global, Guarded, GuardedActivation, Qualifier, Resource};

#[allow(dead_code)]
#[derive(Clone)]
struct Database {
    url: String,
}

#[allow(dead_code)]
#[derive(Clone)]
struct UserService {
    name: String,
    db_url: String,
}

struct RequestTag;

#[allow(dead_code)]
#[derive(Clone)]
struct RequestContext {
    request_id: String,
}

fn main() {
    // Initialize logging - uses JSON if logging-json feature enabled,
    // pretty if logging-pretty enabled.
    #[cfg(feature = "logging")]
    {
        cdi_container::logging::init();
    }

    println!("=== cdi-container Logging Demo ===\n");

    let container = Container::new();

    let db = Resource::<Database, Global>::new();
    let users = Resource::<UserService, Global>::new();
    let ctx = Resource::<RequestContext, Guarded<RequestTag>>::qualified([Qualifier::tag::<RequestTag>()]);

    container
        .declare(&db)
        .set_provider((), |()| Database {
            url: "postgres://localhost/mydb".into(),
        })
        .unwrap();

    container
        .declare(&users)
        .set_provider(db.clone(), |d: Database| UserService {
            name: "UserService".into(),
            db_url: d.url,
        })
        .unwrap();

    let _db = container.get(&db).unwrap();
    let _users = container.get(&users).unwrap();

    let mut report = String::new();
    let consistent = container.check_consistency(&mut report);
    println!("consistency check: {consistent}\n{report}");

    // Activate a request-scoped turnstile (logs phase transitions for
    // resources bound to Guarded<RequestTag>).
    let request = GuardedActivation::<RequestTag>::activate(&container);
    container
        .declare(&ctx)
        .set_provider((), |()| RequestContext {
            request_id: "req-12345".into(),
        })
        .unwrap();
    let _ctx = container.get(&ctx).unwrap();
    drop(request);

    // Clear the global scope, disposing every global asset.
    container.clear_global();

    println!("\n=== Demo Complete ===");
    println!("Check the log output above to see structured logging in action!");
    println!("\nTip: Use --features logging-json for production (JSON output)");
    println!("     Use --features logging-pretty for development (colorful output)");
}
