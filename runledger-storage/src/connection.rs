//! Connection configuration for the backing SurrealDB instance.

use runledger_core::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Connection mode for the history database
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionMode {
    /// In-memory database (for testing)
    Memory,
    /// RocksDB file storage
    RocksDb { path: PathBuf },
    /// Remote server
    Remote { endpoint: String },
}

/// Configuration for the history database connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub mode: ConnectionMode,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub pool_size: usize,
    /// Per-query time budget enforced by callers
    pub query_timeout: Duration,
}

impl ConnectionConfig {
    /// Create a new in-memory configuration (for testing)
    pub fn memory() -> Self {
        Self {
            mode: ConnectionMode::Memory,
            namespace: "runledger".to_string(),
            database: "history".to_string(),
            username: None,
            password: None,
            pool_size: 10,
            query_timeout: Duration::from_secs(10),
        }
    }

    /// Create a new RocksDB configuration
    pub fn rocksdb(path: PathBuf) -> Self {
        Self {
            mode: ConnectionMode::RocksDb { path },
            ..Self::memory()
        }
    }

    /// Create a new remote configuration
    pub fn remote(endpoint: String) -> Self {
        Self {
            mode: ConnectionMode::Remote { endpoint },
            ..Self::memory()
        }
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: String) -> Self {
        self.namespace = namespace;
        self
    }

    /// Set the database name
    pub fn with_database(mut self, database: String) -> Self {
        self.database = database;
        self
    }

    /// Set authentication credentials
    pub fn with_auth(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }

    /// Set the connection pool size
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the per-query time budget
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Get the connection string for SurrealDB
    pub fn connection_string(&self) -> Result<String> {
        match &self.mode {
            ConnectionMode::Memory => Ok("mem://".to_string()),
            ConnectionMode::RocksDb { path } => {
                let path_str = path
                    .to_str()
                    .ok_or_else(|| LedgerError::config("Invalid path for RocksDB"))?;
                Ok(format!("rocksdb://{}", path_str))
            }
            ConnectionMode::Remote { endpoint } => Ok(endpoint.clone()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(LedgerError::config("Namespace cannot be empty"));
        }
        if self.database.is_empty() {
            return Err(LedgerError::config("Database name cannot be empty"));
        }
        if self.pool_size == 0 {
            return Err(LedgerError::config("Pool size must be greater than 0"));
        }
        if self.query_timeout.is_zero() {
            return Err(LedgerError::config("Query timeout must be non-zero"));
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::memory()
    }
}
