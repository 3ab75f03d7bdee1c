//! Pipeline configuration
//!
//! Everything a run needs is collected into [`PipelineConfig`] at startup and
//! handed to the jobs explicitly. Values come from environment variables (a
//! `.env` file is honored) with the defaults below.

use crate::error::{IngestError, Result};
use crate::loader::RowErrorPolicy;
use csvpg_common::env;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DATABASE_HOST: &str = "localhost";
pub const DEFAULT_DATABASE_PORT: u16 = 5432;
pub const DEFAULT_DATABASE_NAME: &str = "customers_db";
pub const DEFAULT_DATABASE_USER: &str = "postgres";

/// Three loads run at once, each holding one connection.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_CONN_ID: &str = "postgres_conn";
pub const DEFAULT_CUSTOMERS_FILE: &str = "customer_data.csv";
pub const DEFAULT_ORDERS_FILE: &str = "order.csv";
pub const DEFAULT_ORDER_ITEMS_FILE: &str = "order_item.csv";

pub const DEFAULT_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 120;

pub const DEFAULT_TRANSFORM_PROGRAM: &str = "dbt";
pub const DEFAULT_TRANSFORM_PROJECT_DIR: &str = ".";
pub const DEFAULT_TRANSFORM_PROFILE: &str = "customers";

/// Full pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub ingest: IngestSettings,
    pub dag: DagSettings,
    pub transform: TransformSettings,
}

/// Destination database
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the individual parts
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Source files and load behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    pub conn_id: String,
    pub customers_file: PathBuf,
    pub orders_file: PathBuf,
    pub order_items_file: PathBuf,
    pub on_row_error: RowErrorPolicy,
}

/// Declared retry policy applied to every task
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DagSettings {
    pub retries: u32,
    pub retry_delay_secs: u64,
}

/// External transformation command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSettings {
    pub program: String,
    pub project_dir: PathBuf,
    pub profile: String,
}

impl PipelineConfig {
    /// Load `.env` if present, then read the environment and validate
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Read the environment without touching `.env` or validating
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")?,
                host: env::string_or("DATABASE_HOST", DEFAULT_DATABASE_HOST)?,
                port: env::parse_or("DATABASE_PORT", DEFAULT_DATABASE_PORT)?,
                database: env::string_or("DATABASE_NAME", DEFAULT_DATABASE_NAME)?,
                user: env::string_or("DATABASE_USER", DEFAULT_DATABASE_USER)?,
                password: env::string_or("DATABASE_PASSWORD", "")?,
                max_connections: env::parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                connect_timeout_secs: env::parse_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
            },
            ingest: IngestSettings {
                conn_id: env::string_or("INGEST_CONN_ID", DEFAULT_CONN_ID)?,
                customers_file: env::string_or("INGEST_CUSTOMERS_FILE", DEFAULT_CUSTOMERS_FILE)?
                    .into(),
                orders_file: env::string_or("INGEST_ORDERS_FILE", DEFAULT_ORDERS_FILE)?.into(),
                order_items_file: env::string_or(
                    "INGEST_ORDER_ITEMS_FILE",
                    DEFAULT_ORDER_ITEMS_FILE,
                )?
                .into(),
                on_row_error: env::parse_or("INGEST_ON_ROW_ERROR", RowErrorPolicy::default())?,
            },
            dag: DagSettings {
                retries: env::parse_or("DAG_RETRIES", DEFAULT_RETRIES)?,
                retry_delay_secs: env::parse_or("DAG_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY_SECS)?,
            },
            transform: TransformSettings {
                program: env::string_or("TRANSFORM_PROGRAM", DEFAULT_TRANSFORM_PROGRAM)?,
                project_dir: env::string_or(
                    "TRANSFORM_PROJECT_DIR",
                    DEFAULT_TRANSFORM_PROJECT_DIR,
                )?
                .into(),
                profile: env::string_or("TRANSFORM_PROFILE", DEFAULT_TRANSFORM_PROFILE)?,
            },
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_none() && self.database.host.is_empty() {
            return Err(IngestError::config("database host cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::config(
                "DATABASE_MAX_CONNECTIONS must be greater than 0",
            ));
        }

        if self.ingest.conn_id.is_empty() {
            return Err(IngestError::config("INGEST_CONN_ID cannot be empty"));
        }

        if self.transform.program.trim().is_empty() {
            return Err(IngestError::config("TRANSFORM_PROGRAM cannot be empty"));
        }

        // Fail early on a malformed URL rather than inside the first job
        self.database.connect_options()?;

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(ref url) = self.url {
            return PgConnectOptions::from_str(url)
                .map_err(|e| IngestError::config(format!("invalid DATABASE_URL: {}", e)));
        }

        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user);

        Ok(if self.password.is_empty() {
            options
        } else {
            options.password(&self.password)
        })
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: DEFAULT_DATABASE_HOST.to_string(),
            port: DEFAULT_DATABASE_PORT,
            database: DEFAULT_DATABASE_NAME.to_string(),
            user: DEFAULT_DATABASE_USER.to_string(),
            password: String::new(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

// Keeps the password and URL credentials out of logs
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            conn_id: DEFAULT_CONN_ID.to_string(),
            customers_file: PathBuf::from(DEFAULT_CUSTOMERS_FILE),
            orders_file: PathBuf::from(DEFAULT_ORDERS_FILE),
            order_items_file: PathBuf::from(DEFAULT_ORDER_ITEMS_FILE),
            on_row_error: RowErrorPolicy::default(),
        }
    }
}

impl DagSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Default for DagSettings {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_TRANSFORM_PROGRAM.to_string(),
            project_dir: PathBuf::from(DEFAULT_TRANSFORM_PROJECT_DIR),
            profile: DEFAULT_TRANSFORM_PROFILE.to_string(),
        }
    }
}
