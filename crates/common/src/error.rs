//! Startup error types shared by the gateway crates

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures while loading configuration and credentials
#[derive(Error, Debug)]
pub enum Error {
    /// A value was read but is unusable (bad URL, zero limit, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A file the gateway needs at startup could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Wrap an I/O failure with the path that caused it.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
