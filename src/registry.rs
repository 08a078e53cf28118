//! Named connections stored under the `connections` table of a [`ConfigStore`].

use toml::Value;

use crate::connection::{validate_name, Connection, ConnectionError, ConnectionList, CONNECTIONS_KEY};
use crate::store::{ConfigStore, Layer};

/// Live view of the connections held in a config store.
///
/// Nothing is cached: every read goes back to the store, so writes made
/// through any handle are visible immediately.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    store: ConfigStore,
}

impl ConnectionRegistry {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Look up a connection by name.
    pub fn get(&self, name: &str) -> Option<Connection> {
        match self.store.get(CONNECTIONS_KEY) {
            Some(Value::Table(all)) => all.get(name).and_then(|v| connection_from_value(name, v)),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Every connection in store order.
    ///
    /// # Panics
    ///
    /// Panics if a name listed under `connections` cannot be read back as a
    /// connection table. That means the store was corrupted or mutated
    /// underneath us, and no caller can recover from it.
    pub fn get_all(&self) -> Vec<Connection> {
        self.store
            .child_keys(CONNECTIONS_KEY)
            .into_iter()
            .map(|name| match self.get(&name) {
                Some(conn) => conn,
                None => panic!("{}", ConnectionError::StoreInconsistency(name)),
            })
            .collect()
    }

    /// Every connection sorted by name.
    pub fn list(&self) -> ConnectionList {
        ConnectionList::sorted(self.get_all())
    }

    /// Create or replace a connection in the runtime layer.
    ///
    /// Any copy of the entry in lower layers is dropped first, so a later
    /// [`ConnectionRegistry::get`] returns exactly `conn`.
    pub fn put(&self, conn: &Connection) -> Result<(), ConnectionError> {
        conn.validate()?;
        let key = entry_key(&conn.name);
        let value = connection_to_value(conn)?;
        self.store.remove(&key);
        self.store.set(&key, value);
        tracing::debug!(connection = %conn.name, url = %conn.service_url, "stored connection");
        Ok(())
    }

    /// Store a connection in the defaults layer. Seeded entries are visible
    /// to lookups but never written back to a config file.
    pub fn seed(&self, conn: &Connection) -> Result<(), ConnectionError> {
        conn.validate()?;
        let value = connection_to_value(conn)?;
        self.store.set_in(Layer::Defaults, &entry_key(&conn.name), value);
        Ok(())
    }

    /// Store a connection in the runtime layer, leaving lower layers as they are.
    /// Undo with [`ConnectionRegistry::withdraw`].
    pub fn overlay(&self, conn: &Connection) -> Result<(), ConnectionError> {
        conn.validate()?;
        let value = connection_to_value(conn)?;
        self.store.set(&entry_key(&conn.name), value);
        Ok(())
    }

    /// Drop the runtime-layer copy of a connection. Returns true if there was one.
    pub fn withdraw(&self, name: &str) -> bool {
        if validate_name(name).is_err() {
            return false;
        }
        self.store.unset(&entry_key(name))
    }

    /// Delete a connection from every layer. Returns true if it existed.
    pub fn remove(&self, name: &str) -> bool {
        if validate_name(name).is_err() {
            return false;
        }
        self.store.remove(&entry_key(name))
    }
}

fn entry_key(name: &str) -> String {
    format!("{}.{}", CONNECTIONS_KEY, name)
}

fn connection_from_value(name: &str, value: &Value) -> Option<Connection> {
    if !value.is_table() {
        return None;
    }
    let mut conn: Connection = value.clone().try_into().ok()?;
    conn.name = name.to_string();
    Some(conn)
}

fn connection_to_value(conn: &Connection) -> Result<Value, ConnectionError> {
    Value::try_from(conn).map_err(|e| {
        ConnectionError::InvalidConnection(format!("connection \"{}\": {}", conn.name, e))
    })
}
