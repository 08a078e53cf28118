use std::path::{Path, PathBuf};

use thiserror::Error;
use toml::Table;

use crate::store::{ConfigStore, Layer, StoreError};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "CONNHUB_CONFIG";

/// Default config file location: `<config dir>/connhub/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("connhub").join("config.toml"))
}

/// Resolve the config file path: explicit path, then `$CONNHUB_CONFIG`,
/// then the platform default.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    match std::env::var(CONFIG_ENV_VAR) {
        Ok(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => default_config_path(),
    }
}

/// Load a TOML config file into the store's file layer.
///
/// Returns false without touching the store if the file doesn't exist.
pub fn load(store: &ConfigStore, path: &Path) -> Result<bool, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, starting empty");
        return Ok(false);
    }

    if let Some(mode) = world_readable_mode(path) {
        tracing::warn!(
            path = %path.display(),
            mode = %format_args!("{:o}", mode),
            "config file holds auth tokens but anyone can read it; chmod 600 it"
        );
    }

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    store
        .load_toml_str(&contents)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(true)
}

/// Write the store's persisted view (file layer plus runtime changes) to `path`.
///
/// On success the written view becomes the new file layer and the runtime
/// layer is emptied, so the store matches what is on disk.
pub fn save(store: &ConfigStore, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
    }
    let contents = store.to_toml_string().map_err(ConfigError::Serialize)?;
    std::fs::write(path, contents).map_err(write_err)?;
    restrict_permissions(path);
    store.replace_layer(Layer::File, store.persisted());
    store.replace_layer(Layer::Runtime, Table::new());
    tracing::debug!(path = %path.display(), "saved config");
    Ok(())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config location available; pass --config or set CONNHUB_CONFIG")]
    NoLocation,

    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a valid connhub config: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot render config as TOML: {0}")]
    Serialize(#[source] StoreError),
}

/// Permission bits of `path` when the "other" read bit is set.
#[cfg(unix)]
fn world_readable_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path).ok()?.permissions().mode() & 0o7777;
    (mode & 0o004 != 0).then_some(mode)
}

#[cfg(not(unix))]
fn world_readable_mode(_path: &Path) -> Option<u32> {
    None
}

/// Saved configs hold tokens; keep them owner-only.
#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!(path = %path.display(), error = %e, "could not restrict config permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
