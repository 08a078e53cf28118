//! Layered key/value configuration store.
//!
//! Values live in three TOML tables: built-in defaults, the loaded config
//! file, and runtime overrides. Reads see the deep merge of all three, with
//! runtime winning over file and file winning over defaults. Keys are dotted
//! paths (`connections.prod.serviceURL`) walking nested tables.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use toml::{Table, Value};

/// One of the store's precedence layers, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Defaults,
    File,
    Runtime,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Default)]
struct Layers {
    defaults: Table,
    file: Table,
    runtime: Table,
}

impl Layers {
    fn table(&self, layer: Layer) -> &Table {
        match layer {
            Layer::Defaults => &self.defaults,
            Layer::File => &self.file,
            Layer::Runtime => &self.runtime,
        }
    }

    fn table_mut(&mut self, layer: Layer) -> &mut Table {
        match layer {
            Layer::Defaults => &mut self.defaults,
            Layer::File => &mut self.file,
            Layer::Runtime => &mut self.runtime,
        }
    }

    fn merged(&self) -> Table {
        let base = merge_tables(self.defaults.clone(), self.file.clone());
        merge_tables(base, self.runtime.clone())
    }
}

/// Shared handle to a layered configuration store.
///
/// Cloning is cheap; every clone sees the same underlying tables.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<Layers>>,
}

impl ConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `contents` as TOML and use it as the file layer.
    pub fn load_toml_str(&self, contents: &str) -> Result<(), StoreError> {
        let table: Table = toml::from_str(contents)?;
        self.replace_layer(Layer::File, table);
        Ok(())
    }

    /// Replace an entire layer.
    pub fn replace_layer(&self, layer: Layer, table: Table) {
        *self.inner.write().table_mut(layer) = table;
    }

    /// Snapshot of a single layer.
    pub fn layer(&self, layer: Layer) -> Table {
        self.inner.read().table(layer).clone()
    }

    /// Snapshot of the merged view across all layers.
    pub fn merged(&self) -> Table {
        self.inner.read().merged()
    }

    /// The file layer with runtime overrides applied. Defaults are left out
    /// so that built-in values never leak into a saved config file.
    pub fn persisted(&self) -> Table {
        let inner = self.inner.read();
        merge_tables(inner.file.clone(), inner.runtime.clone())
    }

    /// Render [`ConfigStore::persisted`] as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String, StoreError> {
        Ok(toml::to_string_pretty(&self.persisted())?)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let parts = split_key(key)?;
        let merged = self.inner.read().merged();
        lookup(&merged, &parts).cloned()
    }

    /// Scalar value at `key` rendered as a string. Tables and arrays yield `None`.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).as_ref().and_then(scalar_to_string)
    }

    /// String entries of the table at `key`. Non-scalar entries are skipped;
    /// a missing or non-table key yields an empty map.
    pub fn get_string_map(&self, key: &str) -> BTreeMap<String, String> {
        match self.get(key) {
            Some(Value::Table(table)) => table
                .iter()
                .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Keys directly below the table at `key`.
    pub fn child_keys(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Table(table)) => table.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_set(&self, key: &str) -> bool {
        match split_key(key) {
            Some(parts) => lookup(&self.inner.read().merged(), &parts).is_some(),
            None => false,
        }
    }

    /// Set `key` in the runtime layer.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.set_in(Layer::Runtime, key, value);
    }

    /// Set `key` in the defaults layer.
    pub fn set_default(&self, key: &str, value: impl Into<Value>) {
        self.set_in(Layer::Defaults, key, value);
    }

    /// Set `key` in a specific layer, creating intermediate tables as needed.
    /// A non-table value in the way of the path is replaced by a table.
    pub fn set_in(&self, layer: Layer, key: &str, value: impl Into<Value>) {
        let Some(parts) = split_key(key) else {
            tracing::warn!(key, "ignoring set of malformed key");
            return;
        };
        insert(self.inner.write().table_mut(layer), &parts, value.into());
    }

    /// Remove `key` from the runtime layer only, letting file or default
    /// values show through again. Returns true if a value was removed.
    pub fn unset(&self, key: &str) -> bool {
        match split_key(key) {
            Some(parts) => remove(self.inner.write().table_mut(Layer::Runtime), &parts),
            None => false,
        }
    }

    /// Remove `key` from every layer. Returns true if any layer held it.
    pub fn remove(&self, key: &str) -> bool {
        let Some(parts) = split_key(key) else {
            return false;
        };
        let mut inner = self.inner.write();
        let mut removed = false;
        for layer in [Layer::Defaults, Layer::File, Layer::Runtime] {
            removed |= remove(inner.table_mut(layer), &parts);
        }
        removed
    }

    /// Empty every layer.
    pub fn reset(&self) {
        *self.inner.write() = Layers::default();
    }
}

fn split_key(key: &str) -> Option<Vec<&str>> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(parts)
}

fn lookup<'a>(table: &'a Table, parts: &[&str]) -> Option<&'a Value> {
    let (first, rest) = parts.split_first()?;
    let value = table.get(*first)?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        Value::Table(child) => lookup(child, rest),
        _ => None,
    }
}

fn insert(table: &mut Table, parts: &[&str], value: Value) {
    let Some((first, rest)) = parts.split_first() else {
        return;
    };
    if rest.is_empty() {
        table.insert(first.to_string(), value);
        return;
    }
    if !matches!(table.get(*first), Some(Value::Table(_))) {
        table.insert(first.to_string(), Value::Table(Table::new()));
    }
    if let Some(Value::Table(child)) = table.get_mut(*first) {
        insert(child, rest, value);
    }
}

/// Remove the value at `parts`, pruning tables left empty by the removal.
fn remove(table: &mut Table, parts: &[&str]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return false;
    };
    if rest.is_empty() {
        return table.remove(*first).is_some();
    }
    let (removed, now_empty) = match table.get_mut(*first) {
        Some(Value::Table(child)) => {
            let removed = remove(child, rest);
            (removed, child.is_empty())
        }
        _ => (false, false),
    };
    if removed && now_empty {
        table.remove(*first);
    }
    removed
}

/// Deep-merge two tables. Overlay values win; nested tables are merged
/// key by key, anything else is replaced wholesale.
fn merge_tables(base: Table, overlay: Table) -> Table {
    let mut merged = overlay;
    for (key, base_value) in base {
        match merged.remove(&key) {
            None => {
                merged.insert(key, base_value);
            }
            Some(Value::Table(over)) => match base_value {
                Value::Table(under) => {
                    merged.insert(key, Value::Table(merge_tables(under, over)));
                }
                _ => {
                    merged.insert(key, Value::Table(over));
                }
            },
            Some(over) => {
                merged.insert(key, over);
            }
        }
    }
    merged
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Datetime(d) => Some(d.to_string()),
        Value::Array(_) | Value::Table(_) => None,
    }
}
