// Connection façade: owns exactly one adapter for a configuration and
// manages its lifecycle. Open connects, close disconnects, and the scoped
// form releases on every exit path.

use futures::future::BoxFuture;
use tracing::debug;

use crate::params::Params;
use crate::registry;
use crate::traits::{Adapter, BackendKind, DatabaseConfig, DatabaseError, QueryResult};

/// One open backend session.
///
/// A connection is a single logical owner of its adapter and native handle;
/// it is not meant to be shared across tasks. Callers that need concurrent
/// access open one connection per task or rely on the backend driver's own
/// pooling.
pub struct DatabaseConnection {
    id: String,
    config: DatabaseConfig,
    adapter: Box<dyn Adapter>,
}

impl std::fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConnection")
            .field("id", &self.id)
            .field("kind", &self.config.kind)
            .finish_non_exhaustive()
    }
}

impl DatabaseConnection {
    /// Resolve the configuration to an adapter, connect it, and hand the
    /// caller the open connection.
    pub async fn open(config: DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut adapter = registry::create_adapter(&config)?;
        adapter.connect().await?;

        let id = uuid::Uuid::new_v4().to_string();
        debug!(connection_id = %id, kind = %config.kind, "connection opened");

        Ok(Self {
            id,
            config,
            adapter,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> BackendKind {
        self.config.kind
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.adapter.is_connected()
    }

    /// Forward a command verbatim to the held adapter.
    pub async fn execute(
        &mut self,
        command: &str,
        params: Option<Params>,
    ) -> Result<QueryResult, DatabaseError> {
        self.adapter.execute(command, params).await
    }

    /// The concrete adapter, for capability-specific calls. Callers check
    /// the kind before invoking capability-only methods.
    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    pub fn adapter_mut(&mut self) -> &mut dyn Adapter {
        self.adapter.as_mut()
    }

    /// Disconnect the held adapter. Idempotent.
    pub async fn close(&mut self) {
        if self.is_open() {
            debug!(connection_id = %self.id, "connection closed");
        }
        self.adapter.disconnect().await;
    }
}

/// Scoped acquisition: open a connection, run the callback, and close the
/// connection on every exit path, including a callback error.
///
/// ```rust,no_run
/// use polyquery::{with_connection, BackendKind, DatabaseConfig};
///
/// # async fn example() -> Result<(), polyquery::DatabaseError> {
/// let config = DatabaseConfig {
///     path: Some(":memory:".to_string()),
///     ..DatabaseConfig::new(BackendKind::Sqlite)
/// };
///
/// let count = with_connection(config, |conn| {
///     Box::pin(async move {
///         let result = conn.execute("SELECT 1", None).await?;
///         Ok(result.row_count)
///     })
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_connection<T, F>(config: DatabaseConfig, f: F) -> Result<T, DatabaseError>
where
    F: for<'c> FnOnce(&'c mut DatabaseConnection) -> BoxFuture<'c, Result<T, DatabaseError>>,
{
    let mut conn = DatabaseConnection::open(config).await?;
    let result = f(&mut conn).await;
    conn.close().await;
    result
}
