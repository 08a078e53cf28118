//! Selection of the current connection.
//!
//! [`ConnectionResolver::init_connections`] walks a fixed chain of sources
//! and stops at the first one that names an existing connection:
//!
//! 1. the flag override (e.g. `--connection`)
//! 2. the configured `defaultConnection`
//! 3. the first connection by name
//! 4. a placeholder connection, inserted into the registry on the spot
//!
//! The last step always succeeds, so after initialization
//! [`ConnectionResolver::resolve_current`] never fails.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::{
    Connection, ConnectionError, BROKEN_DEFAULT_NAME, DEFAULT_CONNECTION_KEY,
};
use crate::registry::ConnectionRegistry;
use crate::store::ConfigStore;

/// Which step of the resolution chain picked the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    FlagResolved,
    DefaultResolved,
    FirstOfListResolved,
    SyntheticFallback,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Resolution::FlagResolved => "flag override",
            Resolution::DefaultResolved => "configured default",
            Resolution::FirstOfListResolved => "first connection by name",
            Resolution::SyntheticFallback => "placeholder connection",
        };
        f.write_str(label)
    }
}

/// Outcome of one initialization pass, handed to the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionReport {
    pub resolution: Resolution,
    /// Name of the connection that became current.
    pub connection: String,
    /// Why each earlier step of the chain was passed over.
    pub skipped: Vec<String>,
}

pub type ResolutionObserver = Arc<dyn Fn(&ResolutionReport) + Send + Sync>;

pub struct ConnectionResolver {
    registry: ConnectionRegistry,
    flag_override: Mutex<String>,
    init_lock: Mutex<()>,
    /// Set while the placeholder sits in the runtime layer rather than in defaults.
    placeholder_overlaid: AtomicBool,
    observer: Option<ResolutionObserver>,
}

impl ConnectionResolver {
    pub fn new(store: ConfigStore) -> Self {
        Self::with_registry(ConnectionRegistry::new(store))
    }

    pub fn with_registry(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            flag_override: Mutex::new(String::new()),
            init_lock: Mutex::new(()),
            placeholder_overlaid: AtomicBool::new(false),
            observer: None,
        }
    }

    /// Register a callback invoked after every initialization pass.
    pub fn with_observer(mut self, observer: impl Fn(&ResolutionReport) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ConfigStore {
        self.registry.store()
    }

    /// Set the one-shot override consulted first by the next
    /// [`ConnectionResolver::init_connections`]. An empty string disables it.
    pub fn set_flag_override(&self, name: impl Into<String>) {
        *self.flag_override.lock() = name.into();
    }

    pub fn flag_override(&self) -> String {
        self.flag_override.lock().clone()
    }

    /// Name of the current connection as recorded in the store, if any.
    pub fn current_name(&self) -> Option<String> {
        self.store().get_string(DEFAULT_CONNECTION_KEY)
    }

    /// Look up the current connection without changing anything.
    pub fn resolve_current(&self) -> Result<Connection, ConnectionError> {
        let name = self
            .current_name()
            .ok_or(ConnectionError::NoDefaultConfigured)?;
        self.registry
            .get(&name)
            .ok_or(ConnectionError::NamedConnectionNotFound(name))
    }

    /// Pick and record a current connection. Safe to call repeatedly; never fails.
    pub fn init_connections(&self) -> Resolution {
        let _guard = self.init_lock.lock();
        let mut skipped = Vec::new();

        let flag = self.flag_override();
        if !flag.is_empty() {
            if self.registry.contains(&flag) {
                return self.settle(Resolution::FlagResolved, flag, skipped);
            }
            skipped.push(format!("flag override names no connection: \"{}\"", flag));
        }

        match self.resolve_current() {
            Ok(conn) => return self.settle(Resolution::DefaultResolved, conn.name, skipped),
            Err(e) => skipped.push(e.to_string()),
        }

        if let Some(first) = self.registry.list().first() {
            let name = first.name.clone();
            return self.settle(Resolution::FirstOfListResolved, name, skipped);
        }
        skipped.push("no connections are configured".to_string());

        let fallback = Connection::broken_default();
        if let Err(e) = self.registry.seed(&fallback) {
            tracing::error!(error = %e, "failed to seed placeholder connection");
        }
        if !self.registry.contains(&fallback.name) {
            // A non-table `connections` in the file layer hides the defaults.
            skipped.push("configured connections are not a table".to_string());
            match self.registry.overlay(&fallback) {
                Ok(()) => self.placeholder_overlaid.store(true, Ordering::SeqCst),
                Err(e) => tracing::error!(error = %e, "failed to install placeholder connection"),
            }
        }
        self.settle(Resolution::SyntheticFallback, fallback.name, skipped)
    }

    /// Make `name` current if it exists. Returns false and changes nothing otherwise.
    pub fn set_connection(&self, name: &str) -> bool {
        if !self.registry.contains(name) {
            tracing::debug!(connection = %name, "refusing to select unknown connection");
            return false;
        }
        self.store().set(DEFAULT_CONNECTION_KEY, name);
        true
    }

    /// Drop the flag override and any runtime choice of current connection,
    /// so the next initialization starts from the configuration alone.
    ///
    /// A placeholder that had to be placed in the runtime layer is withdrawn
    /// too, so it never reaches a saved config file.
    pub fn reset_connection(&self) {
        self.flag_override.lock().clear();
        self.store().unset(DEFAULT_CONNECTION_KEY);
        if self.placeholder_overlaid.swap(false, Ordering::SeqCst) {
            self.registry.withdraw(BROKEN_DEFAULT_NAME);
        }
    }

    fn settle(&self, resolution: Resolution, name: String, skipped: Vec<String>) -> Resolution {
        self.store().set(DEFAULT_CONNECTION_KEY, name.as_str());

        if resolution == Resolution::SyntheticFallback {
            tracing::warn!(connection = %name, "no connections configured, using placeholder");
        } else {
            tracing::debug!(connection = %name, via = %resolution, "current connection resolved");
        }
        for reason in &skipped {
            tracing::debug!(reason = %reason, "resolution step skipped");
        }

        if let Some(observer) = &self.observer {
            observer(&ResolutionReport {
                resolution,
                connection: name,
                skipped,
            });
        }
        resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with(names: &[&str]) -> ConnectionResolver {
        let resolver = ConnectionResolver::new(ConfigStore::new());
        for name in names {
            resolver
                .registry()
                .put(&Connection::new(*name, format!("http://{}", name)))
                .unwrap();
        }
        resolver
    }

    #[test]
    fn resolve_current_without_default_errors() {
        let resolver = resolver_with(&["a"]);
        assert!(matches!(
            resolver.resolve_current(),
            Err(ConnectionError::NoDefaultConfigured)
        ));
    }

    #[test]
    fn resolve_current_with_dangling_default_errors() {
        let resolver = resolver_with(&["a"]);
        resolver.store().set(DEFAULT_CONNECTION_KEY, "gone");
        match resolver.resolve_current() {
            Err(ConnectionError::NamedConnectionNotFound(name)) => assert_eq!(name, "gone"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn resolve_current_does_not_mutate() {
        let resolver = resolver_with(&["a"]);
        let _ = resolver.resolve_current();
        assert!(resolver.current_name().is_none());
    }

    #[test]
    fn each_step_reports_its_resolution() {
        let resolver = resolver_with(&[]);
        assert_eq!(resolver.init_connections(), Resolution::SyntheticFallback);

        let resolver = resolver_with(&["b", "a"]);
        assert_eq!(resolver.init_connections(), Resolution::FirstOfListResolved);
        assert_eq!(resolver.init_connections(), Resolution::DefaultResolved);

        resolver.set_flag_override("b");
        assert_eq!(resolver.init_connections(), Resolution::FlagResolved);
    }

    #[test]
    fn unknown_flag_falls_through_to_default() {
        let resolver = resolver_with(&["a", "b"]);
        resolver.store().set(DEFAULT_CONNECTION_KEY, "b");
        resolver.set_flag_override("missing");
        assert_eq!(resolver.init_connections(), Resolution::DefaultResolved);
        assert_eq!(resolver.resolve_current().unwrap().name, "b");
    }

    #[test]
    fn dangling_default_is_replaced_by_first_connection() {
        let resolver = resolver_with(&["z", "m"]);
        resolver.store().set(DEFAULT_CONNECTION_KEY, "gone");
        assert_eq!(resolver.init_connections(), Resolution::FirstOfListResolved);
        assert_eq!(resolver.current_name().as_deref(), Some("m"));
    }

    #[test]
    fn observer_sees_skipped_steps() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let resolver = ConnectionResolver::new(ConfigStore::new())
            .with_observer(move |report| sink.lock().push(report.clone()));
        resolver.set_flag_override("nope");
        resolver.init_connections();

        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.resolution, Resolution::SyntheticFallback);
        assert_eq!(report.connection, BROKEN_DEFAULT_NAME);
        assert_eq!(report.skipped.len(), 3);
        assert!(report.skipped[0].contains("nope"));
        assert!(report.skipped[1].contains("not set"));
    }

    #[test]
    fn set_connection_requires_existing_name() {
        let resolver = resolver_with(&["a", "b"]);
        resolver.init_connections();
        assert!(!resolver.set_connection("nonexistent"));
        assert_eq!(resolver.current_name().as_deref(), Some("a"));
        assert!(resolver.set_connection("b"));
        assert_eq!(resolver.resolve_current().unwrap().name, "b");
    }

    #[test]
    fn reset_returns_to_pre_init_state() {
        let resolver = resolver_with(&["a"]);
        resolver.set_flag_override("a");
        resolver.init_connections();
        resolver.reset_connection();
        assert!(resolver.flag_override().is_empty());
        assert!(resolver.current_name().is_none());
        assert!(resolver.resolve_current().is_err());
    }

    #[test]
    fn concurrent_init_always_leaves_a_resolvable_connection() {
        let resolver = Arc::new(resolver_with(&[]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                std::thread::spawn(move || {
                    resolver.init_connections();
                    resolver.resolve_current().unwrap().name
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), BROKEN_DEFAULT_NAME);
        }
    }

    #[test]
    fn placeholder_survives_non_table_connections_in_file() {
        let store = ConfigStore::new();
        store.load_toml_str(r#"connections = "oops""#).unwrap();
        let resolver = ConnectionResolver::new(store);

        assert_eq!(resolver.init_connections(), Resolution::SyntheticFallback);
        let conn = resolver.resolve_current().unwrap();
        assert!(conn.is_broken_default());
        assert_eq!(resolver.init_connections(), Resolution::DefaultResolved);

        resolver.reset_connection();
        assert!(!resolver.registry().contains(BROKEN_DEFAULT_NAME));
        assert_eq!(
            resolver.store().persisted().get("connections"),
            Some(&toml::Value::String("oops".to_string()))
        );
    }
}
