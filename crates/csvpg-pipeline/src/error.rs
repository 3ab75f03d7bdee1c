//! Error types for the ingestion pipeline

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// SQLSTATE codes that mean the live table does not have the expected shape
const SCHEMA_MISMATCH_CODES: &[&str] = &[
    "42703", // undefined_column
    "42804", // datatype_mismatch
];

/// Error taxonomy of a pipeline run
#[derive(Error, Debug)]
pub enum IngestError {
    /// Source file missing or unreadable
    #[error("IO error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed row or header
    #[error("Parse error in '{file}' at line {line}: {message}")]
    Parse {
        file: String,
        line: u64,
        message: String,
    },

    /// Existing destination table has an incompatible shape
    #[error("Schema conflict on table '{table}': {message}")]
    SchemaConflict { table: String, message: String },

    /// Connection or transaction failure
    #[error("Load error on table '{table}': {message}: {source}")]
    Load {
        table: String,
        message: String,
        #[source]
        source: sqlx::Error,
    },

    /// A single row was rejected by the store
    #[error("Insert into '{table}' failed at line {line}: {source}")]
    Insert {
        table: String,
        line: u64,
        #[source]
        source: sqlx::Error,
    },

    /// External transformation command failed
    #[error("Transform failed: {message}")]
    Transform {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid task graph definition or lookup
    #[error("Graph error: {0}")]
    Graph(String),
}

impl IngestError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn parse(file: impl AsRef<Path>, line: u64, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.as_ref().display().to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn schema_conflict(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaConflict {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn load(table: impl Into<String>, message: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Load {
            table: table.into(),
            message: message.into(),
            source,
        }
    }

    /// Classify a failed row insert
    ///
    /// Store errors reporting an unknown column or a column type mismatch
    /// become `SchemaConflict`; everything else is an `Insert` error.
    pub fn from_insert(table: &str, line: u64, source: sqlx::Error) -> Self {
        match sqlstate(&source) {
            Some(code) if SCHEMA_MISMATCH_CODES.contains(&code.as_str()) => {
                Self::schema_conflict(table, format!("row at line {} rejected: {}", line, source))
            },
            _ => Self::Insert {
                table: table.to_string(),
                line,
                source,
            },
        }
    }

    pub fn transform(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::Transform {
            message: message.into(),
            exit_code,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph(msg.into())
    }

    /// True when the store rejected a row for a duplicate key
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Insert { source, .. } => source
                .as_database_error()
                .map(|e| e.is_unique_violation())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Parse { .. } => "parse",
            Self::SchemaConflict { .. } => "schema_conflict",
            Self::Load { .. } => "load",
            Self::Insert { .. } => "insert",
            Self::Transform { .. } => "transform",
            Self::Config(_) => "config",
            Self::Graph(_) => "graph",
        }
    }
}

impl From<csvpg_common::CommonError> for IngestError {
    fn from(err: csvpg_common::CommonError) -> Self {
        Self::Config(err.to_string())
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|e| e.code())
        .map(|code| code.into_owned())
}
