// End-to-end suite over the embedded backend, the one kind that needs no
// server. Exercises the connection façade, round-trips, transactions, and
// the structural failure paths.

use polyquery::{
    with_connection, Adapter, BackendKind, CellValue, DatabaseConfig, DatabaseConnection,
    DatabaseError, Params,
};
use serde_json::json;

fn memory_config() -> DatabaseConfig {
    DatabaseConfig {
        path: Some(":memory:".to_string()),
        ..DatabaseConfig::new(BackendKind::Sqlite)
    }
}

#[tokio::test]
async fn round_trip_preserves_declared_column_order() {
    let mut conn = DatabaseConnection::open(memory_config()).await.unwrap();

    conn.execute(
        "CREATE TABLE t (alpha INTEGER, beta TEXT, gamma REAL)",
        None,
    )
    .await
    .unwrap();

    for i in 0..3 {
        let result = conn
            .execute(
                "INSERT INTO t (alpha, beta, gamma) VALUES (?, ?, ?)",
                Some(Params::positional([
                    json!(i),
                    json!(format!("row-{}", i)),
                    json!(i as f64 * 1.5),
                ])),
            )
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
    }

    let result = conn.execute("SELECT * FROM t", None).await.unwrap();
    assert!(result.success);
    assert_eq!(result.columns, vec!["alpha", "beta", "gamma"]);
    assert_eq!(result.row_count, 3);
    assert_eq!(result.rows.len(), 3);

    conn.close().await;
}

#[tokio::test]
async fn products_table_insert_and_select() {
    let mut conn = DatabaseConnection::open(memory_config()).await.unwrap();

    conn.execute(
        "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, price REAL)",
        None,
    )
    .await
    .unwrap();

    let result = conn
        .execute(
            "INSERT INTO products (name, price) VALUES (?, ?)",
            Some(Params::positional([json!("Widget"), json!(9.99)])),
        )
        .await
        .unwrap();
    assert_eq!(result.row_count, 1);

    let result = conn.execute("SELECT * FROM products", None).await.unwrap();
    assert_eq!(result.columns, vec!["id", "name", "price"]);
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0][1], CellValue::String("Widget".to_string()));

    let maps = result.to_maps();
    assert_eq!(maps[0]["name"], CellValue::String("Widget".to_string()));
    assert_eq!(maps[0]["price"], CellValue::Float(9.99));

    conn.close().await;
}

#[tokio::test]
async fn file_backed_database_persists_between_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db").to_string_lossy().to_string();
    let config = DatabaseConfig {
        path: Some(path),
        ..DatabaseConfig::new(BackendKind::Sqlite)
    };

    let mut conn = DatabaseConnection::open(config.clone()).await.unwrap();
    conn.execute("CREATE TABLE persisted (id INTEGER)", None)
        .await
        .unwrap();
    conn.execute("INSERT INTO persisted VALUES (7)", None)
        .await
        .unwrap();
    conn.close().await;

    let mut conn = DatabaseConnection::open(config).await.unwrap();
    let result = conn
        .execute("SELECT id FROM persisted", None)
        .await
        .unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0][0], CellValue::Int(7));
    conn.close().await;
}

#[tokio::test]
async fn disconnect_twice_never_errors() {
    let mut conn = DatabaseConnection::open(memory_config()).await.unwrap();
    conn.close().await;
    assert!(!conn.is_open());
    conn.close().await;
    assert!(!conn.is_open());
}

#[tokio::test]
async fn rollback_leaves_row_count_unchanged() {
    let mut conn = DatabaseConnection::open(memory_config()).await.unwrap();

    conn.execute("CREATE TABLE accounts (balance INTEGER)", None)
        .await
        .unwrap();
    conn.execute("INSERT INTO accounts VALUES (100)", None)
        .await
        .unwrap();

    let before = conn
        .execute("SELECT * FROM accounts", None)
        .await
        .unwrap()
        .row_count;

    conn.adapter_mut().begin_transaction().await.unwrap();
    conn.execute("INSERT INTO accounts VALUES (200)", None)
        .await
        .unwrap();
    conn.adapter_mut().rollback().await.unwrap();

    let after = conn
        .execute("SELECT * FROM accounts", None)
        .await
        .unwrap()
        .row_count;
    assert_eq!(before, after);

    conn.close().await;
}

#[tokio::test]
async fn commit_makes_transaction_visible() {
    let mut conn = DatabaseConnection::open(memory_config()).await.unwrap();

    conn.execute("CREATE TABLE t (id INTEGER)", None)
        .await
        .unwrap();

    conn.adapter_mut().begin_transaction().await.unwrap();
    conn.execute("INSERT INTO t VALUES (1)", None).await.unwrap();
    conn.adapter_mut().commit().await.unwrap();

    let result = conn.execute("SELECT * FROM t", None).await.unwrap();
    assert_eq!(result.row_count, 1);

    conn.close().await;
}

#[tokio::test]
async fn execute_on_closed_connection_is_a_connection_failure() {
    let mut conn = DatabaseConnection::open(memory_config()).await.unwrap();
    conn.close().await;

    let err = conn.execute("SELECT 1", None).await.unwrap_err();
    assert!(matches!(err, DatabaseError::NotConnected));
}

#[tokio::test]
async fn named_params_against_positional_backend_are_rejected() {
    let mut conn = DatabaseConnection::open(memory_config()).await.unwrap();
    conn.execute("CREATE TABLE t (name TEXT)", None)
        .await
        .unwrap();

    let err = conn
        .execute(
            "INSERT INTO t (name) VALUES (?)",
            Some(Params::named([("name".to_string(), json!("x"))])),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidParams(_)));

    conn.close().await;
}

#[tokio::test]
async fn placeholders_without_params_are_rejected() {
    let mut conn = DatabaseConnection::open(memory_config()).await.unwrap();
    conn.execute("CREATE TABLE t (name TEXT)", None)
        .await
        .unwrap();

    let err = conn
        .execute("INSERT INTO t (name) VALUES (?)", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidParams(_)));

    conn.close().await;
}

#[tokio::test]
async fn invalid_sql_never_escapes_as_an_exception() {
    let mut conn = DatabaseConnection::open(memory_config()).await.unwrap();

    let result = conn.execute("INVALID SQL", None).await.unwrap();
    assert!(!result.success);
    assert!(!result.error.unwrap().is_empty());
    assert!(result.rows.is_empty());
    assert!(result.columns.is_empty());

    conn.close().await;
}

#[tokio::test]
async fn with_connection_releases_on_error_path() {
    // The callback error must come back unchanged, with the connection
    // closed behind the scenes.
    let err = with_connection(memory_config(), |conn| {
        Box::pin(async move {
            conn.execute("CREATE TABLE t (id INTEGER)", None).await?;
            Err::<(), _>(DatabaseError::QueryFailed("expected".to_string()))
        })
    })
    .await
    .unwrap_err();

    match err {
        DatabaseError::QueryFailed(message) => assert_eq!(message, "expected"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn with_connection_runs_whole_session() {
    let names = with_connection(memory_config(), |conn| {
        Box::pin(async move {
            conn.execute("CREATE TABLE users (name TEXT)", None).await?;
            for name in ["alice", "bob"] {
                conn.execute(
                    "INSERT INTO users (name) VALUES (?)",
                    Some(Params::positional([json!(name)])),
                )
                .await?;
            }
            let result = conn.execute("SELECT name FROM users ORDER BY name", None).await?;
            Ok(result
                .rows
                .iter()
                .filter_map(|row| row[0].as_str().map(str::to_string))
                .collect::<Vec<_>>())
        })
    })
    .await
    .unwrap();

    assert_eq!(names, vec!["alice", "bob"]);
}
