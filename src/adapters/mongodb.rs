// MongoDB adapter
// Document backend over the official mongodb driver. Commands use the
// dot-qualified pseudo-command grammar `db.<collection>.<op>` with an
// argument mapping carried in the params.

use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use std::future::IntoFuture;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, IndexModel};
use std::time::Duration;
use tracing::{debug, error};

use crate::adapters::with_deadline;
use crate::params::Params;
use crate::traits::{
    Adapter, BackendKind, CellValue, DatabaseConfig, DatabaseError, QueryResult, TableInfo,
};

/// Closed set of document operations, resolved once per `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentOp {
    Insert,
    Find,
    Update,
    Delete,
    Count,
}

impl DocumentOp {
    fn parse(op: &str) -> Result<Self, DatabaseError> {
        match op {
            "insert" => Ok(DocumentOp::Insert),
            "find" => Ok(DocumentOp::Find),
            "update" => Ok(DocumentOp::Update),
            "delete" => Ok(DocumentOp::Delete),
            "count" => Ok(DocumentOp::Count),
            other => Err(DatabaseError::InvalidCommand(format!(
                "unknown document operation '{}'",
                other
            ))),
        }
    }
}

/// Parse `db.<collection>.<op>` (the leading `db.` is optional) into the
/// collection name and operation. Dots inside the collection name are kept.
fn parse_command(command: &str) -> Result<(String, DocumentOp), DatabaseError> {
    let trimmed = command.trim();
    let body = trimmed.strip_prefix("db.").unwrap_or(trimmed);

    let (collection, op) = body.rsplit_once('.').ok_or_else(|| {
        DatabaseError::InvalidCommand(format!(
            "expected db.<collection>.<operation>, got '{}'",
            command
        ))
    })?;

    if collection.is_empty() {
        return Err(DatabaseError::InvalidCommand(
            "collection name is empty".to_string(),
        ));
    }

    Ok((collection.to_string(), DocumentOp::parse(op)?))
}

fn bson_to_cell(value: &Bson) -> CellValue {
    match value {
        Bson::Null => CellValue::Null,
        Bson::Boolean(b) => CellValue::Bool(*b),
        Bson::Int32(i) => CellValue::Int(*i as i64),
        Bson::Int64(i) => CellValue::Int(*i),
        Bson::Double(d) => CellValue::Float(*d),
        Bson::String(s) => CellValue::String(s.clone()),
        Bson::ObjectId(oid) => CellValue::String(oid.to_hex()),
        Bson::DateTime(dt) => CellValue::DateTime(dt.to_chrono().to_rfc3339()),
        Bson::Binary(bin) => CellValue::Binary(bin.bytes.clone()),
        other => CellValue::Json(other.clone().into_relaxed_extjson()),
    }
}

/// Flatten documents into a tabular result. Columns are the union of keys
/// across the returned documents, in first-seen order; a document missing a
/// key contributes a Null cell.
fn documents_to_result(documents: Vec<Document>) -> QueryResult {
    let mut columns: Vec<String> = Vec::new();
    for document in &documents {
        for key in document.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }

    let rows = documents
        .iter()
        .map(|document| {
            columns
                .iter()
                .map(|column| document.get(column).map(bson_to_cell).unwrap_or(CellValue::Null))
                .collect()
        })
        .collect();

    QueryResult::ok(columns, rows)
}

fn named_args(params: Option<Params>) -> Result<serde_json::Map<String, serde_json::Value>, DatabaseError> {
    match params {
        None => Ok(serde_json::Map::new()),
        Some(Params::Named(map)) => Ok(map),
        Some(Params::Positional(_)) => Err(DatabaseError::InvalidParams(
            "document operations take a named argument mapping".to_string(),
        )),
    }
}

fn arg_document(
    args: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Document, DatabaseError> {
    match args.get(key) {
        None => Ok(Document::new()),
        Some(value) => bson::to_document(value).map_err(|e| {
            DatabaseError::InvalidParams(format!("'{}' is not a document: {}", key, e))
        }),
    }
}

pub struct MongoAdapter {
    config: DatabaseConfig,
    client: Option<Client>,
}

impl MongoAdapter {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    fn connection_uri(&self) -> Result<String, DatabaseError> {
        let host = self
            .config
            .host
            .as_deref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Host is required".to_string()))?;

        let credentials = match (&self.config.username, &self.config.password) {
            (Some(user), Some(pass)) if !user.is_empty() => format!("{}:{}@", user, pass),
            (Some(user), None) if !user.is_empty() => format!("{}@", user),
            _ => String::new(),
        };

        Ok(format!(
            "mongodb://{}{}:{}",
            credentials,
            host,
            self.config.get_port()
        ))
    }

    fn database_name(&self) -> Result<&str, DatabaseError> {
        self.config
            .database
            .as_deref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Database name is required".to_string()))
    }

    fn handle(&self) -> Result<&Client, DatabaseError> {
        self.client.as_ref().ok_or(DatabaseError::NotConnected)
    }

    fn database(&self) -> Result<mongodb::Database, DatabaseError> {
        let name = self.database_name()?.to_string();
        Ok(self.handle()?.database(&name))
    }

    async fn run_operation(
        &self,
        collection: &str,
        op: DocumentOp,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<QueryResult, DatabaseError> {
        let db = self.database()?;
        let coll = db.collection::<Document>(collection);

        let outcome: Result<QueryResult, mongodb::error::Error> = match op {
            DocumentOp::Insert => {
                let documents = match args.get("documents") {
                    Some(serde_json::Value::Array(items)) => items
                        .iter()
                        .map(|item| {
                            bson::to_document(item).map_err(|e| {
                                DatabaseError::InvalidParams(format!(
                                    "document is not an object: {}",
                                    e
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => {
                        return Err(DatabaseError::InvalidParams(
                            "insert requires a 'documents' array".to_string(),
                        ))
                    }
                };

                match coll.insert_many(documents).await {
                    Ok(result) => Ok(QueryResult::affected(result.inserted_ids.len() as i64)),
                    Err(e) => Err(e),
                }
            }
            DocumentOp::Find => {
                let filter = arg_document(&args, "filter")?;
                let mut find = coll.find(filter);
                if let Some(limit) = args.get("limit").and_then(|v| v.as_i64()) {
                    find = find.limit(limit);
                }
                if let Some(skip) = args.get("skip").and_then(|v| v.as_u64()) {
                    find = find.skip(skip);
                }
                if args.contains_key("sort") {
                    find = find.sort(arg_document(&args, "sort")?);
                }

                match find.await {
                    Ok(cursor) => match cursor.try_collect::<Vec<Document>>().await {
                        Ok(documents) => Ok(documents_to_result(documents)),
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(e),
                }
            }
            DocumentOp::Update => {
                let filter = arg_document(&args, "filter")?;
                if !args.contains_key("update") {
                    return Err(DatabaseError::InvalidParams(
                        "update requires an 'update' document".to_string(),
                    ));
                }
                let update = arg_document(&args, "update")?;
                let many = args.get("many").and_then(|v| v.as_bool()).unwrap_or(false);

                let result = if many {
                    coll.update_many(filter, update).await
                } else {
                    coll.update_one(filter, update).await
                };
                match result {
                    Ok(update) => Ok(QueryResult::affected(update.modified_count as i64)),
                    Err(e) => Err(e),
                }
            }
            DocumentOp::Delete => {
                let filter = arg_document(&args, "filter")?;
                let many = args.get("many").and_then(|v| v.as_bool()).unwrap_or(false);

                let result = if many {
                    coll.delete_many(filter).await
                } else {
                    coll.delete_one(filter).await
                };
                match result {
                    Ok(delete) => Ok(QueryResult::affected(delete.deleted_count as i64)),
                    Err(e) => Err(e),
                }
            }
            DocumentOp::Count => {
                let filter = arg_document(&args, "filter")?;
                match coll.count_documents(filter).await {
                    Ok(count) => Ok(QueryResult::ok(
                        vec!["count".to_string()],
                        vec![vec![CellValue::Int(count as i64)]],
                    )),
                    Err(e) => Err(e),
                }
            }
        };

        // Backend-reported failures fold into the result
        Ok(outcome.unwrap_or_else(|e| QueryResult::failure(e.to_string())))
    }

    // --- Native convenience wrappers ---

    pub async fn get_collections(&mut self) -> Result<Vec<String>, DatabaseError> {
        let db = self.database()?;
        db.list_collection_names()
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    pub async fn create_collection(&mut self, name: &str) -> Result<(), DatabaseError> {
        let db = self.database()?;
        db.create_collection(name)
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    pub async fn drop_collection(&mut self, name: &str) -> Result<(), DatabaseError> {
        let db = self.database()?;
        db.collection::<Document>(name)
            .drop()
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    /// Create an index over `keys` (field name, direction) pairs.
    pub async fn create_index(
        &mut self,
        collection: &str,
        keys: Vec<(String, i32)>,
        unique: bool,
    ) -> Result<String, DatabaseError> {
        let db = self.database()?;
        let coll = db.collection::<Document>(collection);

        let mut key_doc = Document::new();
        for (field, direction) in keys {
            key_doc.insert(field, direction);
        }

        let model = IndexModel::builder()
            .keys(key_doc)
            .options(IndexOptions::builder().unique(unique).build())
            .build();

        coll.create_index(model)
            .await
            .map(|result| result.index_name)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Adapter for MongoAdapter {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Mongodb
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn connect(&mut self) -> Result<(), DatabaseError> {
        if self.client.is_some() {
            return Ok(());
        }

        let uri = self.connection_uri()?;
        let mut options = ClientOptions::parse(&uri).await.map_err(|e| {
            DatabaseError::ConnectionFailed(format!("failed to parse MongoDB URI: {}", e))
        })?;
        if let Some(secs) = self.config.connect_timeout_secs {
            options.connect_timeout = Some(Duration::from_secs(secs));
            options.server_selection_timeout = Some(Duration::from_secs(secs));
        }

        let client = Client::with_options(options).map_err(|e| {
            DatabaseError::ConnectionFailed(format!("failed to create MongoDB client: {}", e))
        })?;

        // The driver connects lazily; probe so failures surface here
        let probe = client.list_database_names().into_future();
        with_deadline(self.config.connect_timeout_secs, probe)
            .await?
            .map_err(|e| {
                error!(error = %e, "mongodb connection failed");
                DatabaseError::ConnectionFailed(format!("MongoDB connection failed: {}", e))
            })?;

        debug!(host = self.config.host.as_deref().unwrap_or(""), "mongodb connected");
        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.client.take().is_some() {
            debug!("mongodb disconnected");
        }
    }

    async fn test_connection(&mut self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        let Ok(name) = self.database_name() else {
            return false;
        };
        client
            .database(name)
            .run_command(doc! {"ping": 1})
            .await
            .is_ok()
    }

    async fn execute(
        &mut self,
        command: &str,
        params: Option<Params>,
    ) -> Result<QueryResult, DatabaseError> {
        if !self.is_connected() {
            return Err(DatabaseError::NotConnected);
        }
        let (collection, op) = parse_command(command)?;
        let args = named_args(params)?;

        let run = self.run_operation(&collection, op, args);
        with_deadline(self.config.query_timeout_secs, run).await?
    }

    async fn get_tables(&mut self) -> Result<Vec<TableInfo>, DatabaseError> {
        let database = self.database_name()?.to_string();
        let collections = self.get_collections().await?;
        Ok(collections
            .into_iter()
            .map(|name| TableInfo {
                schema_name: database.clone(),
                table_name: name,
                table_type: "collection".to_string(),
            })
            .collect())
    }

    async fn get_databases(&mut self) -> Result<Vec<String>, DatabaseError> {
        let client = self.handle()?;
        client
            .list_database_names()
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
