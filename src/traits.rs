// Core abstraction shared by every backend adapter:
// backend kinds, connection configuration, the normalized result model,
// the error taxonomy, and the Adapter trait itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::params::Params;

/// Supported backend kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Postgresql,
    Mysql,
    Mongodb,
    Redis,
}

impl BackendKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "SQLite",
            BackendKind::Postgresql => "PostgreSQL",
            BackendKind::Mysql => "MySQL",
            BackendKind::Mongodb => "MongoDB",
            BackendKind::Redis => "Redis",
        }
    }

    /// Default port for networked kinds. SQLite is file-based and has none.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            BackendKind::Sqlite => None,
            BackendKind::Postgresql => Some(5432),
            BackendKind::Mysql => Some(3306),
            BackendKind::Mongodb => Some(27017),
            BackendKind::Redis => Some(6379),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Postgresql => write!(f, "postgresql"),
            BackendKind::Mysql => write!(f, "mysql"),
            BackendKind::Mongodb => write!(f, "mongodb"),
            BackendKind::Redis => write!(f, "redis"),
        }
    }
}

/// Shared error vocabulary all backends map their failures onto
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Operation timed out after {0}s")]
    Timeout(u64),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Query execution error: {0}")]
    QueryFailed(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),
}

/// Unified backend endpoint description.
///
/// Which optional fields are required is fully determined by `kind`; see
/// [`DatabaseConfig::validate`]. Constructed once by the caller and owned,
/// unchanged, by the connection built from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub kind: BackendKind,

    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Database/namespace name. For Redis this is the numeric index ("0").
    pub database: Option<String>,
    /// File path for the embedded kind (":memory:" supported).
    pub path: Option<String>,

    pub connect_timeout_secs: Option<u64>,
    pub query_timeout_secs: Option<u64>,
}

impl DatabaseConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            path: None,
            connect_timeout_secs: None,
            query_timeout_secs: None,
        }
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        match self.kind {
            BackendKind::Sqlite => {
                if self.path.as_deref().map(str::is_empty).unwrap_or(true) {
                    return Err(DatabaseError::InvalidConfig(
                        "SQLite database path is required".to_string(),
                    ));
                }
            }
            BackendKind::Postgresql | BackendKind::Mysql => {
                self.require_host()?;
                if self.username.as_deref().map(str::is_empty).unwrap_or(true) {
                    return Err(DatabaseError::InvalidConfig("Username is required".to_string()));
                }
                if self.database.as_deref().map(str::is_empty).unwrap_or(true) {
                    return Err(DatabaseError::InvalidConfig(
                        "Database name is required".to_string(),
                    ));
                }
            }
            BackendKind::Mongodb => {
                self.require_host()?;
                if self.database.as_deref().map(str::is_empty).unwrap_or(true) {
                    return Err(DatabaseError::InvalidConfig(
                        "Database name is required".to_string(),
                    ));
                }
            }
            BackendKind::Redis => {
                self.require_host()?;
                if let Some(db) = self.database.as_deref() {
                    if db.parse::<u32>().is_err() {
                        return Err(DatabaseError::InvalidConfig(format!(
                            "Redis database must be a numeric index, got '{}'",
                            db
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn get_port(&self) -> u16 {
        self.port
            .or_else(|| self.kind.default_port())
            .unwrap_or(0)
    }

    fn require_host(&self) -> Result<(), DatabaseError> {
        if self.host.as_deref().map(str::is_empty).unwrap_or(true) {
            return Err(DatabaseError::InvalidConfig("Host is required".to_string()));
        }
        Ok(())
    }
}

/// Cell value in a normalized result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(String),
    Binary(Vec<u8>),
    /// Document-shaped value (nested arrays/objects from the document family)
    Json(serde_json::Value),
}

impl CellValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) | CellValue::DateTime(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

/// Normalized outcome of one `execute` call.
///
/// `success == false` always carries an error message and empty
/// columns/rows; `success == true` never carries one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    /// Affected/returned row count. DDL-like statements report whatever the
    /// backend gave us (0 or -1 both occur in the wild).
    pub row_count: i64,
    pub error: Option<String>,
}

impl QueryResult {
    /// Tabular success: row_count is the returned row count.
    pub fn ok(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let row_count = rows.len() as i64;
        Self {
            success: true,
            columns,
            rows,
            row_count,
            error: None,
        }
    }

    /// Non-tabular success reporting only an affected-row count.
    pub fn affected(row_count: i64) -> Self {
        Self {
            success: true,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count,
            error: None,
        }
    }

    /// Backend-reported command failure, folded into the result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            error: Some(error.into()),
        }
    }

    /// Zip columns with each row into one mapping per row, preserving row
    /// order.
    pub fn to_maps(&self) -> Vec<HashMap<String, CellValue>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// Column descriptor from schema introspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub column_default: Option<String>,
    pub ordinal_position: i32,
}

/// Schema-level container (table, view, or collection)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema_name: String,
    pub table_name: String,
    pub table_type: String,
}

/// The uniform contract every backend adapter satisfies.
///
/// Core methods (`connect`, `disconnect`, `test_connection`, `execute`) are
/// mandatory. Capability methods default to [`DatabaseError::NotSupported`];
/// an adapter opts in by overriding them. Backend-specific convenience
/// wrappers live on the concrete types, reachable through
/// [`Adapter::as_any_mut`].
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    fn backend_kind(&self) -> BackendKind;

    fn is_connected(&self) -> bool;

    /// Establish the native session. A second call on an already-connected
    /// adapter is a no-op.
    async fn connect(&mut self) -> Result<(), DatabaseError>;

    /// Tear down the native session. Idempotent; never fails observably.
    async fn disconnect(&mut self);

    /// Lightweight liveness probe. Never errors; false on any failure.
    async fn test_connection(&mut self) -> bool;

    /// The uniform entry point. Backend-reported command failures are folded
    /// into a failed [`QueryResult`]; structural problems (not connected,
    /// malformed command or parameters) propagate as errors.
    async fn execute(
        &mut self,
        command: &str,
        params: Option<Params>,
    ) -> Result<QueryResult, DatabaseError>;

    // --- Capability methods ---

    /// List schema-level containers (tables/views, or collections).
    async fn get_tables(&mut self) -> Result<Vec<TableInfo>, DatabaseError> {
        Err(DatabaseError::NotSupported(format!(
            "get_tables is not available on the {} adapter",
            self.backend_kind()
        )))
    }

    async fn get_table_schema(&mut self, _table: &str) -> Result<Vec<ColumnInfo>, DatabaseError> {
        Err(DatabaseError::NotSupported(format!(
            "get_table_schema is not available on the {} adapter",
            self.backend_kind()
        )))
    }

    async fn get_databases(&mut self) -> Result<Vec<String>, DatabaseError> {
        Err(DatabaseError::NotSupported(format!(
            "get_databases is not available on the {} adapter",
            self.backend_kind()
        )))
    }

    /// Begin a single-level transaction (relational kinds only).
    async fn begin_transaction(&mut self) -> Result<(), DatabaseError> {
        Err(DatabaseError::NotSupported(format!(
            "transactions are not available on the {} adapter",
            self.backend_kind()
        )))
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        Err(DatabaseError::NotSupported(format!(
            "transactions are not available on the {} adapter",
            self.backend_kind()
        )))
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        Err(DatabaseError::NotSupported(format!(
            "transactions are not available on the {} adapter",
            self.backend_kind()
        )))
    }

    // --- Downcasting for backend-specific operations ---

    fn as_any(&self) -> &dyn std::any::Any;

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}
