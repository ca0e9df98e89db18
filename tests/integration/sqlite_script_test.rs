//! Script execution against an in-memory SQLite database.

use pretty_assertions::assert_eq;
use sql_scriptrun::db::{Connection, SqlxConnection};
use sql_scriptrun::error::ScriptError;
use sql_scriptrun::script::{RecordingObserver, ScriptEvent, ScriptExecutor};
use std::io::Write;
use std::sync::Arc;

async fn memory_connection() -> SqlxConnection {
    SqlxConnection::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite should open")
}

fn rows(recorder: &RecordingObserver) -> Vec<Vec<Option<String>>> {
    recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ScriptEvent::Row(values) => Some(values),
            _ => None,
        })
        .collect()
}

fn text(value: &str) -> Option<String> {
    Some(value.to_string())
}

#[tokio::test]
async fn test_create_insert_select() {
    let mut conn = memory_connection().await;
    let mut executor = ScriptExecutor::new(&mut conn);
    let recorder = Arc::new(RecordingObserver::new());
    executor.add_observer(recorder.clone());

    let summary = executor
        .run_script(
            "-- schema\n\
             CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL);\n\
             INSERT INTO people (name)\n  VALUES ('Ada'), ('Grace');\n\
             SELECT id, name FROM people ORDER BY id;\n",
        )
        .await
        .unwrap();

    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.total(), 3);
    assert_eq!(
        recorder.events(),
        vec![
            ScriptEvent::BeginScript,
            ScriptEvent::Comment("-- schema".into()),
            ScriptEvent::Sql(
                "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL)".into()
            ),
            ScriptEvent::UpdateCount(0),
            ScriptEvent::Sql("INSERT INTO people (name)\n  VALUES ('Ada'), ('Grace')".into()),
            ScriptEvent::UpdateCount(2),
            ScriptEvent::Sql("SELECT id, name FROM people ORDER BY id".into()),
            ScriptEvent::ResultSet(vec!["id".into(), "name".into()]),
            ScriptEvent::Row(vec![text("1"), text("Ada")]),
            ScriptEvent::Row(vec![text("2"), text("Grace")]),
            ScriptEvent::NoMoreRows,
            ScriptEvent::EndScript(summary.clone()),
        ]
    );
    drop(executor);
    assert!(!conn.in_transaction());
}

#[tokio::test]
async fn test_empty_select_reports_result_set() {
    let mut conn = memory_connection().await;
    let mut executor = ScriptExecutor::new(&mut conn);
    let recorder = Arc::new(RecordingObserver::new());
    executor.add_observer(recorder.clone());

    let summary = executor
        .run_script(
            "CREATE TABLE t (id INTEGER);
             INSERT INTO t VALUES (1), (2);
             SELECT id FROM t WHERE id > 5;
",
        )
        .await
        .unwrap();

    assert_eq!(summary.success_count, 3);
    let events = recorder.events();
    let select = events
        .iter()
        .position(|event| *event == ScriptEvent::Sql("SELECT id FROM t WHERE id > 5".into()))
        .unwrap();
    assert_eq!(
        events[select + 1..].to_vec(),
        vec![
            ScriptEvent::ResultSet(vec!["id".into()]),
            ScriptEvent::NoMoreRows,
            ScriptEvent::EndScript(summary.clone()),
        ]
    );
}

#[tokio::test]
async fn test_committed_changes_survive_the_run() {
    let mut conn = memory_connection().await;

    ScriptExecutor::new(&mut conn)
        .run_script("CREATE TABLE notes (body TEXT);\nINSERT INTO notes VALUES ('kept');")
        .await
        .unwrap();

    let mut executor = ScriptExecutor::new(&mut conn);
    let recorder = Arc::new(RecordingObserver::new());
    executor.add_observer(recorder.clone());
    executor.run_script("SELECT body FROM notes;").await.unwrap();

    assert_eq!(rows(&recorder), vec![vec![text("kept")]]);
}

#[tokio::test]
async fn test_trigger_body_with_delimiter_directive() {
    let mut conn = memory_connection().await;
    let mut executor = ScriptExecutor::new(&mut conn);
    let recorder = Arc::new(RecordingObserver::new());
    executor.add_observer(recorder.clone());

    let summary = executor
        .run_script(
            "CREATE TABLE audit (entry TEXT);
CREATE TABLE items (name TEXT);
-- @DELIMITER $$
CREATE TRIGGER items_audit AFTER INSERT ON items
BEGIN
  INSERT INTO audit (entry) VALUES ('added ' || NEW.name);
END$$
-- @DELIMITER ;
INSERT INTO items (name) VALUES ('bolt');
SELECT entry FROM audit;
",
        )
        .await
        .unwrap();

    assert_eq!(summary.success_count, 5);
    assert_eq!(summary.error_count, 0);
    assert_eq!(rows(&recorder), vec![vec![text("added bolt")]]);
    assert!(recorder
        .statements()
        .iter()
        .any(|sql| sql.ends_with("VALUES ('added ' || NEW.name);\nEND")));
}

#[tokio::test]
async fn test_failed_statements_are_counted() {
    let mut conn = memory_connection().await;
    let mut executor = ScriptExecutor::new(&mut conn);

    let summary = executor
        .run_script("CREATE TABLE t (id INTEGER);\nSELECT * FROM nope;\nINSERT INTO t VALUES (1);")
        .await
        .unwrap();

    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.error_count, 1);
    assert!(summary.has_failures());
}

#[tokio::test]
async fn test_stop_on_error_rolls_back_open_transaction() {
    let mut conn = memory_connection().await;

    let mut setup = ScriptExecutor::new(&mut conn);
    setup.set_auto_commit(true);
    setup.run_script("CREATE TABLE t (id INTEGER);").await.unwrap();
    drop(setup);

    let mut executor = ScriptExecutor::new(&mut conn);
    executor.set_stop_on_error(true);
    let err = executor
        .run_script("INSERT INTO t VALUES (1);\nINSERT INTO missing VALUES (2);\n")
        .await
        .unwrap_err();

    match err {
        ScriptError::Statement { command, message } => {
            assert_eq!(command, "INSERT INTO missing VALUES (2)");
            assert!(message.contains("missing"), "message: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    drop(executor);
    assert!(!conn.in_transaction());

    let mut check = ScriptExecutor::new(&mut conn);
    let recorder = Arc::new(RecordingObserver::new());
    check.add_observer(recorder.clone());
    check.run_script("SELECT id FROM t;").await.unwrap();
    assert!(rows(&recorder).is_empty());
}

#[tokio::test]
async fn test_full_script_mode() {
    let mut conn = memory_connection().await;
    let mut executor = ScriptExecutor::new(&mut conn);
    executor.set_send_full_script(true);
    let recorder = Arc::new(RecordingObserver::new());
    executor.add_observer(recorder.clone());

    let summary = executor
        .run_script("CREATE TABLE f (x INTEGER);\nINSERT INTO f VALUES (1);\nINSERT INTO f VALUES (2);\n")
        .await
        .unwrap();

    assert_eq!(summary.success_count, 1);
    assert_eq!(recorder.statements().len(), 1);
    assert!(recorder.events().contains(&ScriptEvent::Success));

    executor.set_send_full_script(false);
    recorder.clear();
    executor.run_script("SELECT x FROM f ORDER BY x;").await.unwrap();
    assert_eq!(rows(&recorder), vec![vec![text("1")], vec![text("2")]]);
}

#[tokio::test]
async fn test_run_reader_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "CREATE TABLE r (v TEXT);\r\nINSERT INTO r VALUES ('x');\r\n").unwrap();

    let mut conn = memory_connection().await;
    let mut executor = ScriptExecutor::new(&mut conn);
    executor.set_remove_crs(true);

    let source = tokio::fs::File::open(file.path()).await.unwrap();
    let summary = executor.run_reader(source).await.unwrap();

    assert_eq!(summary.success_count, 2);
}

#[tokio::test]
async fn test_missing_terminator_after_valid_statements() {
    let mut conn = memory_connection().await;
    let mut executor = ScriptExecutor::new(&mut conn);
    let recorder = Arc::new(RecordingObserver::new());
    executor.add_observer(recorder.clone());

    let err = executor
        .run_script("CREATE TABLE z (id INTEGER);\nINSERT INTO z VALUES (1)\n")
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Line missing end-of-line terminator (;) => INSERT INTO z VALUES (1)"
    );
    assert_eq!(recorder.summary().unwrap().success_count, 1);
    drop(executor);
    conn.close().await.unwrap();
}
