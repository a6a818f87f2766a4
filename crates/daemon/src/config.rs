// SPDX-License-Identifier: MIT

//! Server configuration.
//!
//! `serverrc.toml` is read once at startup. `connectionrc.toml` is
//! rewritten on every startup and removed on shutdown; clients read it to
//! find the socket endpoint.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Contents of `serverrc.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerRc {
    #[serde(default)]
    pub general: GeneralSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub connection: ConnectionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeneralSection {
    /// Skip the pre-processing pipeline entirely.
    #[serde(default)]
    pub disable_preprocessing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Run the payload cache cleaner.
    #[serde(default = "default_true")]
    pub enable_cleaner: bool,
    /// Verify external payload files against their part rows before
    /// answering a FETCH from cache.
    #[serde(default)]
    pub verify_on_retrieval: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self { enable_cleaner: true, verify_on_retrieval: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    /// Active search engine plugins, in priority order.
    #[serde(default = "default_managers")]
    pub managers: Vec<String>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self { managers: default_managers() }
    }
}

fn default_managers() -> Vec<String> {
    vec!["Agent".to_string()]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectionSection {
    /// Named-pipe transport name (Windows variants of the same framed
    /// protocol). Unused on the Unix-socket path.
    #[serde(default)]
    pub named_pipe: Option<String>,
}

/// Endpoint advertisement written for clients on each startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettings {
    pub data: ConnectionData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionData {
    /// `UnixPath` or `NamedPipe`.
    pub method: String,
    pub unix_path: Option<PathBuf>,
    pub named_pipe: Option<String>,
}

impl ConnectionSettings {
    pub fn unix(socket_path: &Path) -> Self {
        Self {
            data: ConnectionData {
                method: "UnixPath".to_string(),
                unix_path: Some(socket_path.to_path_buf()),
                named_pipe: None,
            },
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        Ok(toml::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Resolved daemon configuration: the rc file plus every derived path.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Root state directory (e.g. `~/.local/share/satchel`).
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
    pub db_path: PathBuf,
    pub external_dir: PathBuf,
    pub connectionrc_path: PathBuf,
    pub log_path: PathBuf,
    pub rc: ServerRc,
}

impl ServerConfig {
    /// Loads configuration for the user-level daemon, reading
    /// `serverrc.toml` from the state directory when present.
    pub fn load() -> Result<Self, ConfigError> {
        let state_dir = dirs::data_dir().ok_or(ConfigError::NoStateDir)?.join("satchel");
        Self::for_state_dir(state_dir)
    }

    /// Configuration rooted at an explicit directory (used by tests).
    pub fn for_state_dir(state_dir: PathBuf) -> Result<Self, ConfigError> {
        let rc_path = state_dir.join("serverrc.toml");
        let rc = if rc_path.exists() {
            toml::from_str(&std::fs::read_to_string(&rc_path)?)?
        } else {
            ServerRc::default()
        };
        Ok(Self {
            socket_path: state_dir.join("satcheld.socket"),
            lock_path: state_dir.join("satcheld.pid"),
            db_path: state_dir.join("satchel.db"),
            external_dir: state_dir.join("file_db_data"),
            connectionrc_path: state_dir.join("connectionrc.toml"),
            log_path: state_dir.join("satcheld.log"),
            state_dir,
            rc,
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
