// SQLite adapter
// Embedded relational backend over rusqlite. Positional `?` binding only.

use rusqlite::types::ValueRef;
use rusqlite::OpenFlags;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::adapters::is_query_statement;
use crate::params::{self, Params};
use crate::traits::{
    Adapter, BackendKind, CellValue, ColumnInfo, DatabaseConfig, DatabaseError, QueryResult,
    TableInfo,
};

pub struct SqliteAdapter {
    config: DatabaseConfig,
    conn: Option<Arc<Mutex<rusqlite::Connection>>>,
    in_transaction: bool,
}

impl SqliteAdapter {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            conn: None,
            in_transaction: false,
        }
    }

    fn database_path(&self) -> Result<String, DatabaseError> {
        let raw = self
            .config
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                DatabaseError::InvalidConfig("SQLite database path is required".to_string())
            })?;

        // Expand ~ to home directory if present
        if let Some(rest) = raw.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return Ok(Path::new(&home).join(rest).to_string_lossy().to_string());
            }
        }
        Ok(raw.to_string())
    }

    fn handle(&self) -> Result<&Arc<Mutex<rusqlite::Connection>>, DatabaseError> {
        self.conn.as_ref().ok_or(DatabaseError::NotConnected)
    }

    fn json_to_sql(value: &serde_json::Value) -> rusqlite::types::Value {
        use rusqlite::types::Value as SqlValue;
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Integer(*b as i64),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Integer(i)
                } else {
                    SqlValue::Real(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }

    fn cell_from_value_ref(value: ValueRef<'_>) -> CellValue {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Int(i),
            ValueRef::Real(f) => CellValue::Float(f),
            ValueRef::Text(t) => CellValue::String(String::from_utf8_lossy(t).to_string()),
            ValueRef::Blob(b) => CellValue::Binary(b.to_vec()),
        }
    }

    fn run_statement(
        conn: &rusqlite::Connection,
        sql: &str,
        values: Vec<rusqlite::types::Value>,
    ) -> Result<QueryResult, rusqlite::Error> {
        if is_query_statement(sql) {
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(|name| name.to_string())
                .collect();

            let mut rows = Vec::new();
            let mut raw_rows = stmt.query(rusqlite::params_from_iter(values))?;
            while let Some(row) = raw_rows.next()? {
                let cells = (0..columns.len())
                    .map(|idx| row.get_ref(idx).map(Self::cell_from_value_ref))
                    .collect::<Result<Vec<_>, _>>()?;
                rows.push(cells);
            }

            Ok(QueryResult::ok(columns, rows))
        } else {
            let affected = conn.execute(sql, rusqlite::params_from_iter(values))?;
            Ok(QueryResult::affected(affected as i64))
        }
    }

    async fn run_transaction_statement(&mut self, sql: &str) -> Result<(), DatabaseError> {
        let conn = self.handle()?.clone();
        let guard = conn.lock().await;
        guard
            .execute_batch(sql)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Adapter for SqliteAdapter {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&mut self) -> Result<(), DatabaseError> {
        if self.conn.is_some() {
            return Ok(());
        }

        let path = self.database_path()?;
        let conn = rusqlite::Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|e| {
            DatabaseError::ConnectionFailed(format!("failed to open SQLite database: {}", e))
        })?;

        if let Some(secs) = self.config.query_timeout_secs {
            conn.busy_timeout(Duration::from_secs(secs))
                .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
        }

        debug!(path = %path, "sqlite connected");
        self.conn = Some(Arc::new(Mutex::new(conn)));
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!("sqlite disconnected");
        }
        self.in_transaction = false;
    }

    async fn test_connection(&mut self) -> bool {
        match &self.conn {
            Some(conn) => conn
                .lock()
                .await
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            None => false,
        }
    }

    async fn execute(
        &mut self,
        command: &str,
        params: Option<Params>,
    ) -> Result<QueryResult, DatabaseError> {
        let conn = self.handle()?.clone();
        let values: Vec<rusqlite::types::Value> = params::prepare_positional(command, params.as_ref())?
            .iter()
            .map(Self::json_to_sql)
            .collect();

        let guard = conn.lock().await;
        match Self::run_statement(&guard, command, values) {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(error = %e, "sqlite statement failed");
                Ok(QueryResult::failure(e.to_string()))
            }
        }
    }

    async fn get_tables(&mut self) -> Result<Vec<TableInfo>, DatabaseError> {
        let conn = self.handle()?.clone();
        let guard = conn.lock().await;

        let mut stmt = guard
            .prepare(
                "SELECT name, type FROM sqlite_master \
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let tables = stmt
            .query_map([], |row| {
                Ok(TableInfo {
                    // SQLite has no schemas; everything lives in "main"
                    schema_name: "main".to_string(),
                    table_name: row.get(0)?,
                    table_type: row.get(1)?,
                })
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(tables)
    }

    async fn get_table_schema(&mut self, table: &str) -> Result<Vec<ColumnInfo>, DatabaseError> {
        let conn = self.handle()?.clone();
        let guard = conn.lock().await;

        let mut stmt = guard
            .prepare(
                "SELECT cid, name, type, \"notnull\", dflt_value, pk \
                 FROM pragma_table_info(?) ORDER BY cid",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let columns = stmt
            .query_map([table], |row| {
                let cid: i32 = row.get(0)?;
                let notnull: i32 = row.get(3)?;
                let pk: i32 = row.get(5)?;
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    data_type: row.get(2)?,
                    is_nullable: notnull == 0 && pk == 0,
                    is_primary_key: pk > 0,
                    column_default: row.get(4)?,
                    ordinal_position: cid,
                })
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(columns)
    }

    async fn get_databases(&mut self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.handle()?.clone();
        let guard = conn.lock().await;

        let mut stmt = guard
            .prepare("SELECT name FROM pragma_database_list() ORDER BY seq")
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let databases = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(databases)
    }

    async fn begin_transaction(&mut self) -> Result<(), DatabaseError> {
        if !self.is_connected() {
            return Err(DatabaseError::NotConnected);
        }
        if self.in_transaction {
            return Err(DatabaseError::QueryFailed(
                "a transaction is already in progress".to_string(),
            ));
        }
        self.run_transaction_statement("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        if !self.is_connected() {
            return Err(DatabaseError::NotConnected);
        }
        if !self.in_transaction {
            return Err(DatabaseError::QueryFailed(
                "no transaction in progress".to_string(),
            ));
        }
        self.in_transaction = false;
        self.run_transaction_statement("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        if !self.is_connected() {
            return Err(DatabaseError::NotConnected);
        }
        if !self.in_transaction {
            return Err(DatabaseError::QueryFailed(
                "no transaction in progress".to_string(),
            ));
        }
        self.in_transaction = false;
        self.run_transaction_statement("ROLLBACK").await
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory_adapter() -> SqliteAdapter {
        SqliteAdapter::new(DatabaseConfig {
            path: Some(":memory:".to_string()),
            ..DatabaseConfig::new(BackendKind::Sqlite)
        })
    }

    #[tokio::test]
    async fn test_connect_disconnect() {
        let mut adapter = memory_adapter();
        assert!(!adapter.is_connected());

        adapter.connect().await.unwrap();
        assert!(adapter.is_connected());
        assert!(adapter.test_connection().await);

        adapter.disconnect().await;
        assert!(!adapter.is_connected());
        // Idempotent
        adapter.disconnect().await;
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn test_second_connect_is_noop() {
        let mut adapter = memory_adapter();
        adapter.connect().await.unwrap();
        adapter
            .execute("CREATE TABLE t (id INTEGER)", None)
            .await
            .unwrap();

        adapter.connect().await.unwrap();
        // Table still there: the handle was not replaced
        let result = adapter.execute("SELECT * FROM t", None).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_execute_fails_fast_when_disconnected() {
        let mut adapter = memory_adapter();
        let err = adapter.execute("SELECT 1", None).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotConnected));
    }

    #[tokio::test]
    async fn test_insert_and_select_roundtrip() {
        let mut adapter = memory_adapter();
        adapter.connect().await.unwrap();

        let result = adapter
            .execute(
                "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, price REAL)",
                None,
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.row_count >= 0);

        let result = adapter
            .execute(
                "INSERT INTO products (name, price) VALUES (?, ?)",
                Some(Params::positional([json!("Widget"), json!(9.99)])),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.row_count, 1);

        let result = adapter.execute("SELECT * FROM products", None).await.unwrap();
        assert!(result.success);
        assert_eq!(result.columns, vec!["id", "name", "price"]);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows[0][1], CellValue::String("Widget".to_string()));
        assert_eq!(result.rows[0][2], CellValue::Float(9.99));
    }

    #[tokio::test]
    async fn test_invalid_sql_is_folded_into_result() {
        let mut adapter = memory_adapter();
        adapter.connect().await.unwrap();

        let result = adapter.execute("INVALID SQL", None).await.unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().map(|e| !e.is_empty()).unwrap_or(false));
    }

    #[tokio::test]
    async fn test_named_params_rejected() {
        let mut adapter = memory_adapter();
        adapter.connect().await.unwrap();
        adapter
            .execute("CREATE TABLE t (name TEXT)", None)
            .await
            .unwrap();

        let err = adapter
            .execute(
                "INSERT INTO t (name) VALUES (?)",
                Some(Params::named([("name".to_string(), json!("x"))])),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_transaction_rollback_restores_state() {
        let mut adapter = memory_adapter();
        adapter.connect().await.unwrap();
        adapter
            .execute("CREATE TABLE t (id INTEGER)", None)
            .await
            .unwrap();
        adapter
            .execute("INSERT INTO t VALUES (1)", None)
            .await
            .unwrap();

        adapter.begin_transaction().await.unwrap();
        adapter
            .execute("INSERT INTO t VALUES (2)", None)
            .await
            .unwrap();
        adapter.rollback().await.unwrap();

        let result = adapter.execute("SELECT * FROM t", None).await.unwrap();
        assert_eq!(result.row_count, 1);
    }

    #[tokio::test]
    async fn test_nested_begin_rejected() {
        let mut adapter = memory_adapter();
        adapter.connect().await.unwrap();

        adapter.begin_transaction().await.unwrap();
        let err = adapter.begin_transaction().await.unwrap_err();
        assert!(matches!(err, DatabaseError::QueryFailed(_)));
        adapter.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_introspection() {
        let mut adapter = memory_adapter();
        adapter.connect().await.unwrap();
        adapter
            .execute(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                None,
            )
            .await
            .unwrap();

        let tables = adapter.get_tables().await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].table_name, "users");

        let columns = adapter.get_table_schema("users").await.unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "id");
        assert!(columns[0].is_primary_key);
        assert_eq!(columns[1].name, "name");
        assert!(!columns[1].is_nullable);

        let databases = adapter.get_databases().await.unwrap();
        assert!(databases.contains(&"main".to_string()));
    }
}
