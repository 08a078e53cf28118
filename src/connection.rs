use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level key holding every named connection.
pub const CONNECTIONS_KEY: &str = "connections";
/// Key holding the name of the current connection.
pub const DEFAULT_CONNECTION_KEY: &str = "defaultConnection";

/// Name of the placeholder connection used when none are configured.
pub const BROKEN_DEFAULT_NAME: &str = "broken-default";
/// Service URL of the placeholder connection.
pub const BROKEN_DEFAULT_URL: &str = "http://127.0.0.1:80";

/// A named service endpoint: base URL, auth token and extra headers.
///
/// Serializes to the entry stored under `connections.<name>`; the name is
/// the entry's key rather than a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "serviceURL", default)]
    pub service_url: String,
    #[serde(rename = "authToken", default)]
    pub auth_token: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("couldn't find connection: \"{0}\"")]
    NamedConnectionNotFound(String),
    #[error("default connection not set")]
    NoDefaultConfigured,
    #[error("connection \"{0}\" is listed in the configuration but cannot be read back")]
    StoreInconsistency(String),
    #[error("invalid connection: {0}")]
    InvalidConnection(String),
}

impl Connection {
    pub fn new(name: impl Into<String>, service_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_url: service_url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// The placeholder connection materialized when the registry is empty.
    pub fn broken_default() -> Self {
        Self::new(BROKEN_DEFAULT_NAME, BROKEN_DEFAULT_URL)
    }

    pub fn is_broken_default(&self) -> bool {
        self.name == BROKEN_DEFAULT_NAME
    }

    /// Check that the connection can be stored under its name.
    ///
    /// Names are used as a single segment of a dotted config key, so they
    /// must be non-empty and free of `.`. The service URL must be present.
    pub fn validate(&self) -> Result<(), ConnectionError> {
        validate_name(&self.name)?;
        if self.service_url.trim().is_empty() {
            return Err(ConnectionError::InvalidConnection(format!(
                "connection \"{}\" has no service URL",
                self.name
            )));
        }
        Ok(())
    }
}

pub fn validate_name(name: &str) -> Result<(), ConnectionError> {
    if name.is_empty() {
        return Err(ConnectionError::InvalidConnection(
            "connection name must not be empty".into(),
        ));
    }
    if name.contains('.') {
        return Err(ConnectionError::InvalidConnection(format!(
            "connection name \"{}\" must not contain '.'",
            name
        )));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ConnectionError::InvalidConnection(format!(
            "connection name \"{}\" must not contain whitespace",
            name
        )));
    }
    Ok(())
}

/// Connections sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionList(Vec<Connection>);

impl ConnectionList {
    /// Build a list, sorting by byte order of the names.
    pub fn sorted(mut connections: Vec<Connection>) -> Self {
        connections.sort_by(|a, b| a.name.cmp(&b.name));
        Self(connections)
    }

    pub fn find(&self, name: &str) -> Option<&Connection> {
        self.0
            .binary_search_by(|c| c.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.0[idx])
    }

    pub fn first(&self) -> Option<&Connection> {
        self.0.first()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Connection> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Connection> {
        self.0
    }
}

impl<'a> IntoIterator for &'a ConnectionList {
    type Item = &'a Connection;
    type IntoIter = std::slice::Iter<'a, Connection>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for ConnectionList {
    type Item = Connection;
    type IntoIter = std::vec::IntoIter<Connection>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
