// MySQL adapter
// Networked relational backend over mysql_async. Accepts positional `?`
// SQL directly and rewrites named %(key)s placeholders to `?`.

use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, Row};
use tracing::{debug, error, warn};

use crate::adapters::with_deadline;
use crate::params::{self, Params};
use crate::traits::{
    Adapter, BackendKind, CellValue, ColumnInfo, DatabaseConfig, DatabaseError, QueryResult,
    TableInfo,
};

pub struct MysqlAdapter {
    config: DatabaseConfig,
    conn: Option<Conn>,
    in_transaction: bool,
}

impl MysqlAdapter {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            conn: None,
            in_transaction: false,
        }
    }

    fn build_opts(&self) -> Result<OptsBuilder, DatabaseError> {
        let host = self
            .config
            .host
            .clone()
            .ok_or_else(|| DatabaseError::InvalidConfig("Host is required".to_string()))?;
        let username = self
            .config
            .username
            .clone()
            .ok_or_else(|| DatabaseError::InvalidConfig("Username is required".to_string()))?;
        let database = self
            .config
            .database
            .clone()
            .ok_or_else(|| DatabaseError::InvalidConfig("Database name is required".to_string()))?;

        Ok(OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(self.config.get_port())
            .user(Some(username))
            .pass(self.config.password.clone())
            .db_name(Some(database)))
    }

    fn handle(&mut self) -> Result<&mut Conn, DatabaseError> {
        self.conn.as_mut().ok_or(DatabaseError::NotConnected)
    }

    fn json_to_mysql(value: &serde_json::Value) -> mysql_async::Value {
        use mysql_async::Value as SqlValue;
        match value {
            serde_json::Value::Null => SqlValue::NULL,
            serde_json::Value::Bool(b) => SqlValue::Int(*b as i64),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else {
                    SqlValue::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => SqlValue::Bytes(s.clone().into_bytes()),
            other => SqlValue::Bytes(other.to_string().into_bytes()),
        }
    }

    fn cell_from_value(value: &mysql_async::Value) -> CellValue {
        use mysql_async::Value as SqlValue;
        match value {
            SqlValue::NULL => CellValue::Null,
            SqlValue::Int(i) => CellValue::Int(*i),
            SqlValue::UInt(u) => CellValue::Int(*u as i64),
            SqlValue::Float(f) => CellValue::Float(*f as f64),
            SqlValue::Double(d) => CellValue::Float(*d),
            SqlValue::Bytes(b) => match String::from_utf8(b.clone()) {
                Ok(s) => CellValue::String(s),
                Err(_) => CellValue::Binary(b.clone()),
            },
            SqlValue::Date(year, month, day, hour, minute, second, micros) => {
                CellValue::DateTime(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
                    year, month, day, hour, minute, second, micros
                ))
            }
            SqlValue::Time(negative, days, hours, minutes, seconds, micros) => {
                let sign = if *negative { "-" } else { "" };
                CellValue::String(format!(
                    "{}{:02}:{:02}:{:02}.{:06}",
                    sign,
                    u32::from(*days) * 24 + u32::from(*hours),
                    minutes,
                    seconds,
                    micros
                ))
            }
        }
    }

    async fn run_statement(
        conn: &mut Conn,
        sql: &str,
        values: Vec<serde_json::Value>,
    ) -> Result<QueryResult, mysql_async::Error> {
        // Text protocol for parameterless statements, binary otherwise
        if values.is_empty() {
            let mut result = conn.query_iter(sql).await?;
            Self::collect_result(&mut result).await
        } else {
            let bound: Vec<mysql_async::Value> = values.iter().map(Self::json_to_mysql).collect();
            let mut result = conn
                .exec_iter(sql, mysql_async::Params::Positional(bound))
                .await?;
            Self::collect_result(&mut result).await
        }
    }

    async fn collect_result<'a, 't, P>(
        result: &mut mysql_async::QueryResult<'a, 't, P>,
    ) -> Result<QueryResult, mysql_async::Error>
    where
        P: mysql_async::prelude::Protocol,
    {
        let columns: Vec<String> = result
            .columns()
            .map(|cols| cols.iter().map(|c| c.name_str().into_owned()).collect())
            .unwrap_or_default();

        let rows: Vec<Row> = result.collect().await?;
        if columns.is_empty() {
            let affected = result.affected_rows() as i64;
            return Ok(QueryResult::affected(affected));
        }

        let rows = rows
            .iter()
            .map(|row| {
                (0..columns.len())
                    .map(|idx| {
                        row.as_ref(idx)
                            .map(Self::cell_from_value)
                            .unwrap_or(CellValue::Null)
                    })
                    .collect()
            })
            .collect();

        Ok(QueryResult::ok(columns, rows))
    }

    async fn run_transaction_statement(&mut self, sql: &str) -> Result<(), DatabaseError> {
        let conn = self.handle()?;
        conn.query_drop(sql)
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Adapter for MysqlAdapter {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Mysql
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&mut self) -> Result<(), DatabaseError> {
        if self.conn.is_some() {
            return Ok(());
        }

        let opts = self.build_opts()?;
        let conn = with_deadline(self.config.connect_timeout_secs, Conn::new(opts))
            .await?
            .map_err(|e| {
                error!(error = %e, "mysql connection failed");
                DatabaseError::ConnectionFailed(format!("MySQL connection failed: {}", e))
            })?;

        debug!(host = self.config.host.as_deref().unwrap_or(""), "mysql connected");
        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.disconnect().await {
                warn!(error = %e, "mysql disconnect failed");
            } else {
                debug!("mysql disconnected");
            }
        }
        self.in_transaction = false;
    }

    async fn test_connection(&mut self) -> bool {
        match &mut self.conn {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn execute(
        &mut self,
        command: &str,
        params: Option<Params>,
    ) -> Result<QueryResult, DatabaseError> {
        if !self.is_connected() {
            return Err(DatabaseError::NotConnected);
        }
        let (sql, values) = params::prepare_mysql(command, params.as_ref())?;
        let timeout = self.config.query_timeout_secs;
        let conn = self.handle()?;

        let run = Self::run_statement(conn, &sql, values);
        match with_deadline(timeout, run).await? {
            Ok(result) => Ok(result),
            Err(e) => Ok(QueryResult::failure(e.to_string())),
        }
    }

    async fn get_tables(&mut self) -> Result<Vec<TableInfo>, DatabaseError> {
        let conn = self.handle()?;

        let rows: Vec<(String, String, String)> = conn
            .query(
                "SELECT table_schema, table_name, table_type \
                 FROM information_schema.tables \
                 WHERE table_schema = DATABASE() \
                 ORDER BY table_name",
            )
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(schema_name, table_name, table_type)| TableInfo {
                schema_name,
                table_name,
                table_type,
            })
            .collect())
    }

    async fn get_table_schema(&mut self, table: &str) -> Result<Vec<ColumnInfo>, DatabaseError> {
        let conn = self.handle()?;

        let rows: Vec<(String, String, String, Option<String>, String, i32)> = conn
            .exec(
                "SELECT column_name, data_type, is_nullable, column_default, column_key, \
                        ordinal_position \
                 FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                 ORDER BY ordinal_position",
                (table,),
            )
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(name, data_type, is_nullable, column_default, column_key, ordinal_position)| {
                    ColumnInfo {
                        name,
                        data_type,
                        is_nullable: is_nullable == "YES",
                        is_primary_key: column_key == "PRI",
                        column_default,
                        ordinal_position,
                    }
                },
            )
            .collect())
    }

    async fn get_databases(&mut self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.handle()?;
        conn.query("SHOW DATABASES")
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
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
        self.run_transaction_statement("START TRANSACTION").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        if !self.in_transaction {
            return Err(DatabaseError::QueryFailed(
                "no transaction in progress".to_string(),
            ));
        }
        self.in_transaction = false;
        self.run_transaction_statement("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
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

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            host: Some("localhost".to_string()),
            username: Some("app".to_string()),
            password: Some("secret".to_string()),
            database: Some("app_db".to_string()),
            ..DatabaseConfig::new(BackendKind::Mysql)
        }
    }

    #[test]
    fn test_build_opts_requires_fields() {
        let mut cfg = config();
        cfg.username = None;
        let adapter = MysqlAdapter::new(cfg);
        assert!(matches!(
            adapter.build_opts(),
            Err(DatabaseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(
            MysqlAdapter::json_to_mysql(&json!("text")),
            mysql_async::Value::Bytes(b"text".to_vec())
        );
        assert_eq!(
            MysqlAdapter::json_to_mysql(&json!(42)),
            mysql_async::Value::Int(42)
        );
        assert_eq!(
            MysqlAdapter::json_to_mysql(&json!(null)),
            mysql_async::Value::NULL
        );
    }

    #[test]
    fn test_cell_conversion() {
        assert_eq!(
            MysqlAdapter::cell_from_value(&mysql_async::Value::Bytes(b"abc".to_vec())),
            CellValue::String("abc".to_string())
        );
        assert_eq!(
            MysqlAdapter::cell_from_value(&mysql_async::Value::UInt(7)),
            CellValue::Int(7)
        );
        assert_eq!(
            MysqlAdapter::cell_from_value(&mysql_async::Value::NULL),
            CellValue::Null
        );
    }

    #[tokio::test]
    async fn test_execute_fails_fast_when_disconnected() {
        let mut adapter = MysqlAdapter::new(config());
        let err = adapter.execute("SELECT 1", None).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut adapter = MysqlAdapter::new(config());
        adapter.disconnect().await;
        adapter.disconnect().await;
        assert!(!adapter.is_connected());
    }
}
