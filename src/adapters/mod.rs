// Backend adapter implementations, one module per backend kind.

pub mod mongodb;
pub mod mysql;
pub mod postgres;
pub mod redis;
pub mod sqlite;

pub use mongodb::MongoAdapter;
pub use mysql::MysqlAdapter;
pub use postgres::PostgresAdapter;
pub use redis::RedisAdapter;
pub use sqlite::SqliteAdapter;

use std::future::Future;
use std::time::Duration;

use crate::traits::DatabaseError;

/// Run a native call under the configured deadline. `None` means no
/// deadline beyond whatever the driver applies itself.
pub(crate) async fn with_deadline<T, F>(secs: Option<u64>, fut: F) -> Result<T, DatabaseError>
where
    F: Future<Output = T>,
{
    match secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), fut)
            .await
            .map_err(|_| DatabaseError::Timeout(secs)),
        None => Ok(fut.await),
    }
}

/// Statement classification shared by the relational adapters: a statement
/// that produces a result set goes down the query path, anything else down
/// the execute path.
pub(crate) fn is_query_statement(sql: &str) -> bool {
    let head = sql
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_uppercase();
    matches!(
        head.as_str(),
        "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "PRAGMA" | "VALUES" | "DESCRIBE"
    )
}
