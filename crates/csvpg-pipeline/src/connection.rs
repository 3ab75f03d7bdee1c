//! Connection references and their resolution to database pools
//!
//! Jobs only hold a [`ConnectionRef`]. The registry built at startup maps each
//! connection id to a lazily connecting pool, so an unreachable database
//! surfaces as a load failure of the job that needed it.

use crate::config::DatabaseConfig;
use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Opaque connection id, e.g. `postgres_conn`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionRef(String);

impl ConnectionRef {
    pub fn new(conn_id: impl Into<String>) -> Self {
        Self(conn_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps connection ids to pools
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    pools: HashMap<ConnectionRef, PgPool>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding a single lazily connecting pool under `conn`
    pub fn from_config(conn: ConnectionRef, config: &DatabaseConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(conn, connect_lazy(config)?);
        Ok(registry)
    }

    pub fn register(&mut self, conn: ConnectionRef, pool: PgPool) {
        debug!(conn_id = %conn, "Registered connection");
        self.pools.insert(conn, pool);
    }

    pub fn resolve(&self, conn: &ConnectionRef) -> Result<PgPool> {
        self.pools
            .get(conn)
            .cloned()
            .ok_or_else(|| IngestError::config(format!("unknown connection id '{}'", conn)))
    }

    /// Warn when a pool cannot serve `concurrency` jobs at once
    pub fn check_capacity(&self, concurrency: usize) {
        for (conn, pool) in &self.pools {
            let size = pool.options().get_max_connections();
            if (size as usize) < concurrency {
                warn!(
                    conn_id = %conn,
                    pool_size = size,
                    concurrency,
                    "Pool is smaller than the number of concurrent loads; jobs will wait for connections"
                );
            }
        }
    }
}

/// Build a pool that connects on first use
pub fn connect_lazy(config: &DatabaseConfig) -> Result<PgPool> {
    Ok(PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_lazy_with(config.connect_options()?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_connection_is_config_error() {
        let registry = ConnectionRegistry::new();
        let err = registry.resolve(&ConnectionRef::new("postgres_conn")).unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("postgres_conn"));
    }

    #[tokio::test]
    async fn test_lazy_pool_resolves_without_database() {
        let registry =
            ConnectionRegistry::from_config(ConnectionRef::new("postgres_conn"), &DatabaseConfig::default())
                .unwrap();
        let pool = registry.resolve(&ConnectionRef::new("postgres_conn")).unwrap();
        assert_eq!(pool.options().get_max_connections(), DatabaseConfig::default().max_connections);
    }
}
