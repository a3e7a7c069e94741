// Redis adapter
// Key-value backend over the redis crate's ConnectionManager. Commands are
// single native command lines, tokenized on whitespace with quoted
// substrings, dispatched over a closed verb vocabulary.

use redis::aio::ConnectionManager;
use redis::Value;
use std::collections::HashMap;
use tracing::{debug, error};

use crate::adapters::with_deadline;
use crate::params::Params;
use crate::traits::{
    Adapter, BackendKind, CellValue, DatabaseConfig, DatabaseError, QueryResult,
};

/// How a verb's native reply is reshaped into rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyShape {
    /// One row with one column
    Scalar,
    /// One row per element
    List,
    /// One row per field/value pair
    Pairs,
    /// INFO text: one row per `key:value` line
    Info,
}

/// Closed command vocabulary: verb -> (reply shape, minimum argument count).
fn verb_entry(verb: &str) -> Option<(ReplyShape, usize)> {
    let entry = match verb {
        "SET" => (ReplyShape::Scalar, 2),
        "GET" => (ReplyShape::Scalar, 1),
        "DEL" => (ReplyShape::Scalar, 1),
        "EXISTS" => (ReplyShape::Scalar, 1),
        "EXPIRE" => (ReplyShape::Scalar, 2),
        "TTL" => (ReplyShape::Scalar, 1),
        "TYPE" => (ReplyShape::Scalar, 1),
        "INCR" => (ReplyShape::Scalar, 1),
        "DECR" => (ReplyShape::Scalar, 1),
        "KEYS" => (ReplyShape::List, 1),
        "HSET" => (ReplyShape::Scalar, 3),
        "HGET" => (ReplyShape::Scalar, 2),
        "HGETALL" => (ReplyShape::Pairs, 1),
        "HDEL" => (ReplyShape::Scalar, 2),
        "LPUSH" => (ReplyShape::Scalar, 2),
        "RPUSH" => (ReplyShape::Scalar, 2),
        "LRANGE" => (ReplyShape::List, 3),
        "LLEN" => (ReplyShape::Scalar, 1),
        "SADD" => (ReplyShape::Scalar, 2),
        "SMEMBERS" => (ReplyShape::List, 1),
        "DBSIZE" => (ReplyShape::Scalar, 0),
        "INFO" => (ReplyShape::Info, 0),
        "FLUSHDB" => (ReplyShape::Scalar, 0),
        "PING" => (ReplyShape::Scalar, 0),
        _ => return None,
    };
    Some(entry)
}

/// Split a command line on whitespace, honoring single- and double-quoted
/// substrings with backslash escapes inside double quotes.
fn tokenize(line: &str) -> Result<Vec<String>, DatabaseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' => {
                in_token = true;
                let quote = ch;
                let mut closed = false;
                while let Some(inner) = chars.next() {
                    if inner == quote {
                        closed = true;
                        break;
                    }
                    if inner == '\\' && quote == '"' {
                        if let Some(escaped) = chars.next() {
                            current.push(escaped);
                            continue;
                        }
                    }
                    current.push(inner);
                }
                if !closed {
                    return Err(DatabaseError::InvalidCommand(
                        "unterminated quote in command".to_string(),
                    ));
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }

    if tokens.is_empty() {
        return Err(DatabaseError::InvalidCommand("empty command".to_string()));
    }
    Ok(tokens)
}

fn value_to_cell(value: &Value) -> CellValue {
    match value {
        Value::Nil => CellValue::Null,
        Value::Int(i) => CellValue::Int(*i),
        Value::Double(d) => CellValue::Float(*d),
        Value::Boolean(b) => CellValue::Bool(*b),
        Value::Okay => CellValue::String("OK".to_string()),
        Value::SimpleString(s) => CellValue::String(s.clone()),
        Value::BulkString(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => CellValue::String(s.to_string()),
            Err(_) => CellValue::Binary(bytes.clone()),
        },
        Value::VerbatimString { text, .. } => CellValue::String(text.clone()),
        other => CellValue::String(format!("{:?}", other)),
    }
}

fn shape_reply(shape: ReplyShape, value: Value) -> QueryResult {
    match shape {
        ReplyShape::Scalar => QueryResult::ok(
            vec!["value".to_string()],
            vec![vec![value_to_cell(&value)]],
        ),
        ReplyShape::List => {
            let elements = match value {
                Value::Array(items) | Value::Set(items) => items,
                Value::Nil => Vec::new(),
                other => vec![other],
            };
            QueryResult::ok(
                vec!["value".to_string()],
                elements
                    .iter()
                    .map(|item| vec![value_to_cell(item)])
                    .collect(),
            )
        }
        ReplyShape::Pairs => {
            let columns = vec!["field".to_string(), "value".to_string()];
            match value {
                Value::Map(pairs) => QueryResult::ok(
                    columns,
                    pairs
                        .iter()
                        .map(|(field, val)| vec![value_to_cell(field), value_to_cell(val)])
                        .collect(),
                ),
                // RESP2 returns hashes as a flat array
                Value::Array(items) => QueryResult::ok(
                    columns,
                    items
                        .chunks(2)
                        .map(|pair| {
                            vec![
                                value_to_cell(&pair[0]),
                                pair.get(1).map(value_to_cell).unwrap_or(CellValue::Null),
                            ]
                        })
                        .collect(),
                ),
                Value::Nil => QueryResult::ok(columns, Vec::new()),
                other => QueryResult::ok(columns, vec![vec![
                    CellValue::Null,
                    value_to_cell(&other),
                ]]),
            }
        }
        ReplyShape::Info => {
            let text = match &value {
                Value::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
                Value::VerbatimString { text, .. } => text.clone(),
                Value::SimpleString(s) => s.clone(),
                _ => String::new(),
            };
            QueryResult::ok(
                vec!["field".to_string(), "value".to_string()],
                parse_info(&text)
                    .into_iter()
                    .map(|(field, val)| {
                        vec![CellValue::String(field), CellValue::String(val)]
                    })
                    .collect(),
            )
        }
    }
}

/// Parse the INFO reply: `key:value` lines, `#` section headers skipped.
fn parse_info(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            line.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

pub struct RedisAdapter {
    config: DatabaseConfig,
    conn: Option<ConnectionManager>,
}

impl RedisAdapter {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config, conn: None }
    }

    fn connection_url(&self) -> Result<String, DatabaseError> {
        let host = self
            .config
            .host
            .as_deref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Host is required".to_string()))?;

        let credentials = match (&self.config.username, &self.config.password) {
            (Some(user), Some(pass)) if !pass.is_empty() => format!("{}:{}@", user, pass),
            (None, Some(pass)) if !pass.is_empty() => format!(":{}@", pass),
            _ => String::new(),
        };
        let database = self.config.database.as_deref().unwrap_or("0");

        Ok(format!(
            "redis://{}{}:{}/{}",
            credentials,
            host,
            self.config.get_port(),
            database
        ))
    }

    fn handle(&mut self) -> Result<&mut ConnectionManager, DatabaseError> {
        self.conn.as_mut().ok_or(DatabaseError::NotConnected)
    }

    async fn run_verb(
        conn: &mut ConnectionManager,
        verb: &str,
        args: &[String],
    ) -> Result<Value, redis::RedisError> {
        let mut cmd = redis::cmd(verb);
        for arg in args {
            cmd.arg(arg);
        }
        cmd.query_async(conn).await
    }

    // --- Native convenience wrappers ---

    pub async fn set(&mut self, key: &str, value: &str) -> Result<bool, DatabaseError> {
        let conn = self.handle()?;
        let reply: Value = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(conn)
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(matches!(reply, Value::Okay))
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.handle()?;
        redis::cmd("GET")
            .arg(key)
            .query_async(conn)
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    pub async fn hset(
        &mut self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<i64, DatabaseError> {
        let conn = self.handle()?;
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(conn)
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    pub async fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.handle()?;
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(conn)
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    pub async fn delete(&mut self, key: &str) -> Result<i64, DatabaseError> {
        let conn = self.handle()?;
        redis::cmd("DEL")
            .arg(key)
            .query_async(conn)
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    pub async fn info(&mut self) -> Result<HashMap<String, String>, DatabaseError> {
        let conn = self.handle()?;
        let text: String = redis::cmd("INFO")
            .query_async(conn)
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(parse_info(&text).into_iter().collect())
    }
}

#[async_trait::async_trait]
impl Adapter for RedisAdapter {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&mut self) -> Result<(), DatabaseError> {
        if self.conn.is_some() {
            return Ok(());
        }

        let url = self.connection_url()?;
        let client = redis::Client::open(url.as_str()).map_err(|e| {
            DatabaseError::ConnectionFailed(format!("failed to create Redis client: {}", e))
        })?;

        let manager = with_deadline(self.config.connect_timeout_secs, ConnectionManager::new(client))
            .await?
            .map_err(|e| {
                error!(error = %e, "redis connection failed");
                DatabaseError::ConnectionFailed(format!("Redis connection failed: {}", e))
            })?;

        debug!(host = self.config.host.as_deref().unwrap_or(""), "redis connected");
        self.conn = Some(manager);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!("redis disconnected");
        }
    }

    async fn test_connection(&mut self) -> bool {
        match &mut self.conn {
            Some(conn) => redis::cmd("PING")
                .query_async::<Value>(conn)
                .await
                .is_ok(),
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
        if params.as_ref().map(|p| !p.is_empty()).unwrap_or(false) {
            return Err(DatabaseError::InvalidParams(
                "key-value commands carry their arguments inline".to_string(),
            ));
        }

        let tokens = tokenize(command)?;
        let verb = tokens[0].to_uppercase();
        let (shape, min_args) = verb_entry(&verb).ok_or_else(|| {
            DatabaseError::InvalidCommand(format!("unknown command '{}'", tokens[0]))
        })?;

        let args = &tokens[1..];
        if args.len() < min_args {
            return Err(DatabaseError::InvalidCommand(format!(
                "{} expects at least {} argument(s), got {}",
                verb,
                min_args,
                args.len()
            )));
        }

        let timeout = self.config.query_timeout_secs;
        let conn = self.handle()?;
        let run = Self::run_verb(conn, &verb, args);
        match with_deadline(timeout, run).await? {
            Ok(value) => Ok(shape_reply(shape, value)),
            Err(e) => Ok(QueryResult::failure(e.to_string())),
        }
    }

    async fn get_databases(&mut self) -> Result<Vec<String>, DatabaseError> {
        // Redis exposes a fixed set of numbered databases
        Ok((0..16).map(|db| db.to_string()).collect())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
