// PostgreSQL adapter
// Networked relational backend over tokio-postgres. Named %(key)s
// placeholders are rewritten to $N; positional SQL uses $N natively.
//
// The adapter owns a single client so BEGIN/COMMIT/ROLLBACK always land on
// the same session.

use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, warn};

use crate::adapters::{is_query_statement, with_deadline};
use crate::params::{self, Params};
use crate::traits::{
    Adapter, BackendKind, CellValue, ColumnInfo, DatabaseConfig, DatabaseError, QueryResult,
    TableInfo,
};

pub struct PostgresAdapter {
    config: DatabaseConfig,
    client: Option<Client>,
    in_transaction: bool,
}

impl PostgresAdapter {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            client: None,
            in_transaction: false,
        }
    }

    fn connection_string(&self) -> Result<String, DatabaseError> {
        let host = self
            .config
            .host
            .as_deref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Host is required".to_string()))?;
        let username = self
            .config
            .username
            .as_deref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Username is required".to_string()))?;
        let database = self
            .config
            .database
            .as_deref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Database name is required".to_string()))?;

        let mut conn_string = format!(
            "host={} port={} dbname={} user={}",
            host,
            self.config.get_port(),
            database,
            username
        );
        if let Some(password) = self.config.password.as_deref() {
            conn_string.push_str(&format!(" password={}", password));
        }
        Ok(conn_string)
    }

    fn handle(&self) -> Result<&Client, DatabaseError> {
        self.client.as_ref().ok_or(DatabaseError::NotConnected)
    }

    fn to_sql_value(value: &serde_json::Value) -> Box<dyn ToSql + Sync + Send> {
        match value {
            serde_json::Value::Null => Box::new(Option::<String>::None),
            serde_json::Value::Bool(b) => Box::new(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Box::new(i)
                } else {
                    Box::new(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Box::new(s.clone()),
            other => Box::new(other.clone()),
        }
    }

    fn cell_from_row(row: &Row, idx: usize) -> CellValue {
        let column_type = row.columns()[idx].type_();
        match *column_type {
            Type::BOOL => row
                .try_get::<_, Option<bool>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Bool)
                .unwrap_or(CellValue::Null),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Int(v as i64))
                .unwrap_or(CellValue::Null),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Int(v as i64))
                .unwrap_or(CellValue::Null),
            Type::INT8 => row
                .try_get::<_, Option<i64>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Int)
                .unwrap_or(CellValue::Null),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Float(v as f64))
                .unwrap_or(CellValue::Null),
            Type::FLOAT8 => row
                .try_get::<_, Option<f64>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Float)
                .unwrap_or(CellValue::Null),
            Type::TIMESTAMP => row
                .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::DateTime(v.to_string()))
                .unwrap_or(CellValue::Null),
            Type::TIMESTAMPTZ => row
                .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::DateTime(v.to_rfc3339()))
                .unwrap_or(CellValue::Null),
            Type::DATE => row
                .try_get::<_, Option<chrono::NaiveDate>>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::DateTime(v.to_string()))
                .unwrap_or(CellValue::Null),
            Type::BYTEA => row
                .try_get::<_, Option<Vec<u8>>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Binary)
                .unwrap_or(CellValue::Null),
            Type::JSON | Type::JSONB => row
                .try_get::<_, Option<serde_json::Value>>(idx)
                .ok()
                .flatten()
                .map(CellValue::Json)
                .unwrap_or(CellValue::Null),
            Type::UUID => row
                .try_get::<_, Option<uuid::Uuid>>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::String(v.to_string()))
                .unwrap_or(CellValue::Null),
            _ => row
                .try_get::<_, Option<String>>(idx)
                .ok()
                .flatten()
                .map(CellValue::String)
                .unwrap_or(CellValue::Null),
        }
    }

    async fn run_statement(
        client: &Client,
        sql: &str,
        values: Vec<serde_json::Value>,
    ) -> Result<QueryResult, tokio_postgres::Error> {
        let stmt = client.prepare(sql).await?;
        let boxed: Vec<Box<dyn ToSql + Sync + Send>> = values.iter().map(Self::to_sql_value).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            boxed.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();

        if is_query_statement(sql) {
            let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
            let rows = client.query(&stmt, &refs).await?;
            let rows = rows
                .iter()
                .map(|row| {
                    (0..columns.len())
                        .map(|idx| Self::cell_from_row(row, idx))
                        .collect()
                })
                .collect();
            Ok(QueryResult::ok(columns, rows))
        } else {
            let affected = client.execute(&stmt, &refs).await?;
            Ok(QueryResult::affected(affected as i64))
        }
    }

    async fn run_transaction_statement(&mut self, sql: &str) -> Result<(), DatabaseError> {
        let client = self.handle()?;
        client
            .batch_execute(sql)
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Adapter for PostgresAdapter {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Postgresql
    }

    fn is_connected(&self) -> bool {
        self.client
            .as_ref()
            .map(|c| !c.is_closed())
            .unwrap_or(false)
    }

    async fn connect(&mut self) -> Result<(), DatabaseError> {
        if self.is_connected() {
            return Ok(());
        }

        let conn_string = self.connection_string()?;
        let connect = tokio_postgres::connect(&conn_string, NoTls);
        let (client, connection) = with_deadline(self.config.connect_timeout_secs, connect)
            .await?
            .map_err(|e| {
                error!(error = %e, "postgresql connection failed");
                DatabaseError::ConnectionFailed(format!("PostgreSQL connection failed: {}", e))
            })?;

        // The connection object drives the socket; it lives until the client
        // is dropped.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgresql connection task ended with error");
            }
        });

        debug!(host = self.config.host.as_deref().unwrap_or(""), "postgresql connected");
        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.client.take().is_some() {
            debug!("postgresql disconnected");
        }
        self.in_transaction = false;
    }

    async fn test_connection(&mut self) -> bool {
        match &self.client {
            Some(client) => client.simple_query("SELECT 1").await.is_ok(),
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
        let (sql, values) = params::prepare_postgres(command, params.as_ref())?;

        let client = self.handle()?;
        let run = Self::run_statement(client, &sql, values);
        match with_deadline(self.config.query_timeout_secs, run).await? {
            Ok(result) => Ok(result),
            Err(e) => Ok(QueryResult::failure(e.to_string())),
        }
    }

    async fn get_tables(&mut self) -> Result<Vec<TableInfo>, DatabaseError> {
        let client = self.handle()?;

        let rows = client
            .query(
                "SELECT table_schema, table_name, table_type \
                 FROM information_schema.tables \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
                 ORDER BY table_schema, table_name",
                &[],
            )
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| TableInfo {
                schema_name: row.get(0),
                table_name: row.get(1),
                table_type: row.get(2),
            })
            .collect())
    }

    async fn get_table_schema(&mut self, table: &str) -> Result<Vec<ColumnInfo>, DatabaseError> {
        let client = self.handle()?;

        let rows = client
            .query(
                "SELECT column_name, data_type, is_nullable, column_default, ordinal_position \
                 FROM information_schema.columns \
                 WHERE table_name = $1 \
                 ORDER BY ordinal_position",
                &[&table],
            )
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get(0),
                data_type: row.get(1),
                is_nullable: row.get::<_, String>(2) == "YES",
                // Would need an extra join against key_column_usage
                is_primary_key: false,
                column_default: row.get(3),
                ordinal_position: row.get(4),
            })
            .collect())
    }

    async fn get_databases(&mut self) -> Result<Vec<String>, DatabaseError> {
        let client = self.handle()?;

        let rows = client
            .query(
                "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname",
                &[],
            )
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
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
