//! Connection pooling for the history database.

use crate::connection::ConnectionConfig;
use dashmap::DashMap;
use parking_lot::RwLock;
use runledger_core::error::{LedgerError, Result};
use std::sync::Arc;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;

/// A pool of SurrealDB client handles shared by the store and the
/// lifecycle manager.
pub struct ConnectionPool {
    config: ConnectionConfig,
    connections: Arc<DashMap<usize, Arc<Surreal<Any>>>>,
    next_id: Arc<RwLock<usize>>,
    max_size: usize,
}

impl ConnectionPool {
    /// Create a new connection pool
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let max_size = config.pool_size;

        Ok(Self {
            config,
            connections: Arc::new(DashMap::new()),
            next_id: Arc::new(RwLock::new(0)),
            max_size,
        })
    }

    /// Initialize the pool with connections
    pub async fn initialize(&self) -> Result<()> {
        tracing::info!(
            "Initializing connection pool with {} connections",
            self.max_size
        );

        for _ in 0..self.max_size {
            self.create_connection().await?;
        }

        Ok(())
    }

    /// Create a new connection
    async fn create_connection(&self) -> Result<Arc<Surreal<Any>>> {
        let conn_str = self.config.connection_string()?;

        tracing::debug!("Creating new SurrealDB connection: {}", conn_str);

        let db = surrealdb::engine::any::connect(conn_str)
            .await
            .map_err(|e| LedgerError::database(format!("Failed to connect: {}", e)))?;

        db.use_ns(&self.config.namespace)
            .use_db(&self.config.database)
            .await
            .map_err(|e| {
                LedgerError::database(format!("Failed to use namespace/database: {}", e))
            })?;

        // Authenticate if credentials are provided
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            db.signin(surrealdb::opt::auth::Root { username, password })
                .await
                .map_err(|e| LedgerError::database(format!("Authentication failed: {}", e)))?;
        }

        let db = Arc::new(db);
        let mut id = self.next_id.write();
        self.connections.insert(*id, db.clone());
        *id += 1;

        Ok(db)
    }

    /// Get a connection from the pool
    pub async fn get(&self) -> Result<Arc<Surreal<Any>>> {
        if let Some(entry) = self.connections.iter().next() {
            return Ok(entry.value().clone());
        }

        // Create a new connection if pool is not full
        if self.connections.len() < self.max_size {
            return self.create_connection().await;
        }

        Err(LedgerError::database("Connection pool exhausted"))
    }

    /// Whether the pool holds at least one live connection
    pub fn is_available(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Get the configured per-query time budget
    pub fn query_timeout(&self) -> std::time::Duration {
        self.config.query_timeout
    }

    /// Get the current pool size
    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// Get the maximum pool size
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Close all connections
    pub async fn close(&self) {
        tracing::info!("Closing connection pool");
        self.connections.clear();
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        tracing::debug!("Connection pool dropped");
    }
}
