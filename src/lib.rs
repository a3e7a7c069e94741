//! One uniform query-execution interface over five heterogeneous backends.
//!
//! Every backend — SQLite, PostgreSQL, MySQL, MongoDB, Redis — is wrapped in
//! an [`Adapter`] that translates the shared
//! `execute(command, params) -> QueryResult` contract into native driver
//! calls. A [`DatabaseConnection`] owns exactly one adapter, selected from
//! the [`DatabaseConfig`] kind at open time.
//!
//! ```rust,no_run
//! use polyquery::{DatabaseConfig, BackendKind, DatabaseConnection, Params};
//!
//! # async fn example() -> Result<(), polyquery::DatabaseError> {
//! let config = DatabaseConfig {
//!     path: Some(":memory:".to_string()),
//!     ..DatabaseConfig::new(BackendKind::Sqlite)
//! };
//!
//! let mut conn = DatabaseConnection::open(config).await?;
//! conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", None).await?;
//! let result = conn.execute(
//!     "INSERT INTO users (name) VALUES (?)",
//!     Some(Params::positional([serde_json::json!("alice")])),
//! ).await?;
//! assert_eq!(result.row_count, 1);
//! conn.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! A single connection is not meant to be shared across tasks; callers that
//! need concurrent access open one connection per task or lean on the native
//! driver's own pooling.

pub mod adapters;
pub mod connection;
pub mod params;
pub mod registry;
pub mod traits;

pub use adapters::{MongoAdapter, MysqlAdapter, PostgresAdapter, RedisAdapter, SqliteAdapter};
pub use connection::{with_connection, DatabaseConnection};
pub use params::Params;
pub use registry::{create_adapter, supported_kinds};
pub use traits::{
    Adapter, BackendKind, CellValue, ColumnInfo, DatabaseConfig, DatabaseError, QueryResult,
    TableInfo,
};
