// Backend dispatch table: kind -> adapter constructor.
// A closed, explicit enumeration; adding a backend means adding one adapter
// module and one match arm here.

use crate::adapters::{MongoAdapter, MysqlAdapter, PostgresAdapter, RedisAdapter, SqliteAdapter};
use crate::traits::{Adapter, BackendKind, DatabaseConfig, DatabaseError};

/// Build the adapter for a configuration. Validates the configuration
/// first, so unknown requirements surface here rather than mid-call.
pub fn create_adapter(config: &DatabaseConfig) -> Result<Box<dyn Adapter>, DatabaseError> {
    config.validate()?;

    Ok(match config.kind {
        BackendKind::Sqlite => Box::new(SqliteAdapter::new(config.clone())),
        BackendKind::Postgresql => Box::new(PostgresAdapter::new(config.clone())),
        BackendKind::Mysql => Box::new(MysqlAdapter::new(config.clone())),
        BackendKind::Mongodb => Box::new(MongoAdapter::new(config.clone())),
        BackendKind::Redis => Box::new(RedisAdapter::new(config.clone())),
    })
}

/// Every backend kind the dispatch table resolves.
pub fn supported_kinds() -> &'static [BackendKind] {
    &[
        BackendKind::Sqlite,
        BackendKind::Postgresql,
        BackendKind::Mysql,
        BackendKind::Mongodb,
        BackendKind::Redis,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_supported_kind_constructs() {
        for kind in supported_kinds() {
            let config = DatabaseConfig {
                host: Some("localhost".to_string()),
                username: Some("app".to_string()),
                password: Some("secret".to_string()),
                database: Some(match kind {
                    BackendKind::Redis => "0".to_string(),
                    _ => "app_db".to_string(),
                }),
                path: Some(":memory:".to_string()),
                ..DatabaseConfig::new(*kind)
            };

            let adapter = create_adapter(&config).unwrap();
            assert_eq!(adapter.backend_kind(), *kind);
            assert!(!adapter.is_connected());
        }
    }

    #[test]
    fn test_invalid_config_rejected_at_dispatch() {
        let config = DatabaseConfig::new(BackendKind::Postgresql);
        assert!(matches!(
            create_adapter(&config),
            Err(DatabaseError::InvalidConfig(_))
        ));
    }
}
