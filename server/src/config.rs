//! Configuration management for the server.

use std::env;
use std::path::PathBuf;

/// Rows returned inline with a search when not configured.
const DEFAULT_INITIAL_ROWS: usize = 200;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Property holding the record id
    pub id_property: String,
    /// JSON file with the initial records, an array of objects
    pub seed_file: Option<PathBuf>,
    /// Rows delivered together with a search result
    pub initial_rows: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let id_property = env::var("ID_PROPERTY").unwrap_or_else(|_| "id".to_string());
        if id_property.is_empty() {
            return Err(ConfigError::EmptyIdProperty);
        }

        let seed_file = env::var("SEED_FILE").ok().map(PathBuf::from);

        let initial_rows = match env::var("INITIAL_ROWS") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidInitialRows)?,
            Err(_) => DEFAULT_INITIAL_ROWS,
        };

        Ok(Self {
            host,
            port,
            id_property,
            seed_file,
            initial_rows,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            id_property: "id".to_string(),
            seed_file: None,
            initial_rows: DEFAULT_INITIAL_ROWS,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("ID_PROPERTY must not be empty")]
    EmptyIdProperty,

    #[error("Invalid INITIAL_ROWS value")]
    InvalidInitialRows,

    #[error("Cannot read seed file {path}: {reason}")]
    Seed { path: PathBuf, reason: String },
}
