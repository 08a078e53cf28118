//! connhub - named service connections
//!
//! Keeps a set of named connections (service URL, auth token, headers) in a
//! layered TOML-backed store, picks one of them as the current connection,
//! and sends JSON HTTP requests through it.

pub mod config;
pub mod connection;
pub mod display;
pub mod http;
pub mod registry;
pub mod resolver;
pub mod store;

pub use connection::{Connection, ConnectionError, ConnectionList};
pub use http::{Body, Exchange, RequestClient, RequestError, Verbosity};
pub use registry::ConnectionRegistry;
pub use resolver::{ConnectionResolver, Resolution, ResolutionReport};
pub use store::{ConfigStore, Layer};
