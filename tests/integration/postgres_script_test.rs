//! Script execution against PostgreSQL.
//!
//! Set DATABASE_URL to a postgres:// URL to run these tests.

use sql_scriptrun::config::ConnectionConfig;
use sql_scriptrun::db::{self, Connection};
use sql_scriptrun::script::{RecordingObserver, ScriptEvent, ScriptExecutor};
use std::sync::Arc;

/// Helper to open the test database, if one is configured.
async fn get_test_connection() -> Option<Box<dyn Connection>> {
    let config = ConnectionConfig::from_env().ok()??;
    if !config.url.starts_with("postgres") {
        return None;
    }
    db::connect(&config.url).await.ok()
}

#[tokio::test]
async fn test_postgres_script_round_trip() {
    let Some(mut conn) = get_test_connection().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let recorder = Arc::new(RecordingObserver::new());
    let summary = {
        let mut executor = ScriptExecutor::new(&mut *conn);
        executor.add_observer(recorder.clone());
        executor
            .run_script(
                "CREATE TEMP TABLE scriptrun_probe (id INT, label TEXT);\n\
                 INSERT INTO scriptrun_probe VALUES (1, 'one'), (2, NULL);\n\
                 SELECT id, label FROM scriptrun_probe ORDER BY id;\n",
            )
            .await
            .unwrap()
    };

    assert_eq!(summary.success_count, 3);
    let rows: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(|event| matches!(event, ScriptEvent::Row(_)))
        .collect();
    assert_eq!(
        rows,
        vec![
            ScriptEvent::Row(vec![Some("1".into()), Some("one".into())]),
            ScriptEvent::Row(vec![Some("2".into()), None]),
        ]
    );

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_postgres_error_is_reported_with_statement() {
    let Some(mut conn) = get_test_connection().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let summary = {
        let mut executor = ScriptExecutor::new(&mut *conn);
        executor.set_auto_commit(true);
        executor
            .run_script("SELECT * FROM scriptrun_table_that_does_not_exist;\nSELECT 1;")
            .await
            .unwrap()
    };

    assert_eq!(summary.error_count, 1);
    assert_eq!(summary.success_count, 1);

    conn.close().await.unwrap();
}
