//! Integration tests for choosing the current connection:
//! - flag override, configured default, first by name, placeholder
//! - re-initialization after reset
//! - registry round trips through the shared store
//! - concurrent initialization

use std::sync::Arc;

use connhub::connection::{BROKEN_DEFAULT_NAME, BROKEN_DEFAULT_URL};
use connhub::{ConfigStore, Connection, ConnectionError, ConnectionResolver, Layer, Resolution};

fn resolver_with(names: &[&str]) -> ConnectionResolver {
    let resolver = ConnectionResolver::new(ConfigStore::new());
    for name in names {
        resolver
            .registry()
            .put(&Connection::new(*name, format!("http://{name}")))
            .unwrap();
    }
    resolver
}

fn current(resolver: &ConnectionResolver) -> String {
    resolver.resolve_current().unwrap().name
}

// ── Initialization ───────────────────────────────────────────────

#[test]
fn init_is_idempotent() {
    let resolver = resolver_with(&["b", "a"]);
    let first = resolver.init_connections();
    let name = current(&resolver);

    let second = resolver.init_connections();
    assert_eq!(current(&resolver), name);
    assert_eq!(first, Resolution::FirstOfListResolved);
    // The first pass recorded a default, so the second one finds it.
    assert_eq!(second, Resolution::DefaultResolved);
}

#[test]
fn fallback_picks_lexicographically_first_regardless_of_insert_order() {
    for order in [["a", "b"], ["b", "a"]] {
        let resolver = resolver_with(&order);
        assert_eq!(resolver.init_connections(), Resolution::FirstOfListResolved);
        assert_eq!(current(&resolver), "a", "insert order {order:?}");
    }
}

#[test]
fn configured_default_beats_first_by_name() {
    let store = ConfigStore::new();
    store
        .load_toml_str(
            r#"
            defaultConnection = "b"

            [connections.a]
            serviceURL = "http://a"

            [connections.b]
            serviceURL = "http://b"
            "#,
        )
        .unwrap();
    let resolver = ConnectionResolver::new(store);

    assert_eq!(resolver.init_connections(), Resolution::DefaultResolved);
    assert_eq!(current(&resolver), "b");
}

#[test]
fn flag_beats_default_and_reverts_after_reset() {
    let store = ConfigStore::new();
    store
        .load_toml_str(
            r#"
            defaultConnection = "a"

            [connections.a]
            serviceURL = "http://a"

            [connections.b]
            serviceURL = "http://b"
            "#,
        )
        .unwrap();
    let resolver = ConnectionResolver::new(store);

    resolver.set_flag_override("b");
    assert_eq!(resolver.init_connections(), Resolution::FlagResolved);
    assert_eq!(current(&resolver), "b");

    resolver.reset_connection();
    assert!(resolver.flag_override().is_empty());
    assert_eq!(resolver.init_connections(), Resolution::DefaultResolved);
    assert_eq!(current(&resolver), "a");
}

#[test]
fn empty_registry_gets_placeholder() {
    let resolver = ConnectionResolver::new(ConfigStore::new());
    assert_eq!(resolver.init_connections(), Resolution::SyntheticFallback);

    let conn = resolver.resolve_current().unwrap();
    assert_eq!(conn.name, BROKEN_DEFAULT_NAME);
    assert_eq!(conn.service_url, BROKEN_DEFAULT_URL);
    assert!(conn.auth_token.is_empty());
    assert!(conn.headers.is_empty());

    let stored = resolver.registry().get(BROKEN_DEFAULT_NAME).unwrap();
    assert_eq!(stored, conn);
}

#[test]
fn placeholder_is_never_persisted() {
    let resolver = ConnectionResolver::new(ConfigStore::new());
    resolver.init_connections();

    let persisted = resolver.store().persisted();
    let connections = persisted
        .get("connections")
        .and_then(|v| v.as_table())
        .cloned()
        .unwrap_or_default();
    assert!(!connections.contains_key(BROKEN_DEFAULT_NAME));
    assert!(resolver
        .store()
        .layer(Layer::Defaults)
        .get("connections")
        .is_some());
}

#[test]
fn placeholder_resolves_when_file_connections_are_malformed() {
    let store = ConfigStore::new();
    store.load_toml_str(r#"connections = "oops""#).unwrap();
    let resolver = ConnectionResolver::new(store);

    assert_eq!(resolver.init_connections(), Resolution::SyntheticFallback);
    assert_eq!(current(&resolver), BROKEN_DEFAULT_NAME);

    resolver.reset_connection();
    let persisted = resolver.store().persisted();
    assert_eq!(persisted.get("connections").and_then(|v| v.as_str()), Some("oops"));
    assert!(persisted.get("defaultConnection").is_none());
}

#[test]
fn resolve_before_init_reports_missing_default() {
    let resolver = resolver_with(&["a"]);
    let err = resolver.resolve_current().unwrap_err();
    assert!(matches!(err, ConnectionError::NoDefaultConfigured));
}

// ── Selecting and resetting ──────────────────────────────────────

#[test]
fn full_lifecycle() {
    let resolver = ConnectionResolver::new(ConfigStore::new());
    let registry = resolver.registry();
    registry.put(&Connection::new("a", "http://x")).unwrap();
    registry.put(&Connection::new("b", "http://y")).unwrap();

    resolver.init_connections();
    let conn = resolver.resolve_current().unwrap();
    assert_eq!((conn.name.as_str(), conn.service_url.as_str()), ("a", "http://x"));

    assert!(resolver.set_connection("b"));
    assert_eq!(resolver.resolve_current().unwrap().service_url, "http://y");

    resolver.store().reset();
    resolver.reset_connection();
    assert_eq!(resolver.init_connections(), Resolution::SyntheticFallback);
    assert_eq!(current(&resolver), BROKEN_DEFAULT_NAME);
}

// ── Registry ─────────────────────────────────────────────────────

#[test]
fn put_then_get_returns_the_same_connection() {
    let resolver = ConnectionResolver::new(ConfigStore::new());
    let conn = Connection::new("prod", "https://api.example.com")
        .with_token("secret-token")
        .with_header("X-Tenant", "acme")
        .with_header("X-Trace", "on");

    resolver.registry().put(&conn).unwrap();
    assert_eq!(resolver.registry().get("prod").unwrap(), conn);
}

#[test]
fn list_is_sorted_and_removal_updates_it() {
    let resolver = resolver_with(&["charlie", "alpha", "bravo"]);
    let registry = resolver.registry();
    assert_eq!(registry.list().names(), vec!["alpha", "bravo", "charlie"]);

    assert!(registry.remove("bravo"));
    assert!(!registry.remove("bravo"));
    assert_eq!(registry.list().names(), vec!["alpha", "charlie"]);
}

// ── Concurrency ──────────────────────────────────────────────────

#[test]
fn concurrent_init_agrees_on_one_connection() {
    let resolver = Arc::new(resolver_with(&["m", "k", "x"]));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let resolver = resolver.clone();
            std::thread::spawn(move || {
                resolver.init_connections();
                current(&resolver)
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), "k");
    }
}
