use std::sync::Arc;
use std::time::Duration;

use pgdal::drivers::{InMemoryTestDriver, InMemoryTestResponseBuilder};
use pgdal::error::PgDalError;
use pgdal::traits::{Diagnostic, DiagnosticSink, RecordingSink};
use pgdal::types::{Cell, RawQueryResult};
use pgdal::{params, value, Backend, Database, QueryOutcome, User, UserRepository};

const USER_COLUMNS: &[&str] = &[
    "id",
    "login",
    "email",
    "password",
    "backendId",
    "token",
    "tokenExp",
    "status",
];

fn user_row() -> RawQueryResult {
    InMemoryTestResponseBuilder::new()
        .columns(USER_COLUMNS)
        .row(&["1", "TestUser0", "a@b.com", "hash", "1", "tok", "123", "0"])
        .build()
}

fn backend_row() -> RawQueryResult {
    InMemoryTestResponseBuilder::new()
        .columns(&["id", "address", "region"])
        .row(&["1", "10.10.0.2:8080", "eu-west"])
        .build()
}

async fn open(driver: &InMemoryTestDriver) -> (Database, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let db = Database::open(driver.clone(), Arc::clone(&sink) as Arc<dyn DiagnosticSink>)
        .await
        .unwrap();
    (db, sink)
}

#[tokio::test]
async fn test_lookup_by_login_resolves_backend() {
    let driver = InMemoryTestDriver::new()
        .with_response(user_row())
        .with_response(backend_row());
    let (db, sink) = open(&driver).await;

    let user = db.get_user_by_login("TestUser0").await.unwrap();

    assert_eq!(
        user,
        User {
            id: 1,
            login: "TestUser0".into(),
            email: "a@b.com".into(),
            password: "hash".into(),
            backend_id: Backend {
                id: 1,
                address: "10.10.0.2:8080".into(),
                region: "eu-west".into(),
            },
            token: "tok".into(),
            token_exp: 123,
            status: 0,
        }
    );

    driver.assert_query_count(2);
    let queries = driver.recorded_queries();
    assert_eq!(queries[0].sql, "SELECT * FROM users WHERE login = $1");
    assert_eq!(queries[0].params, vec!["TestUser0".to_string()]);
    assert_eq!(queries[1].sql, "SELECT * FROM backend WHERE id = $1");
    assert_eq!(queries[1].params, vec!["1".to_string()]);
    assert!(sink.diagnostics().is_empty());
}

#[tokio::test]
async fn test_lookup_with_no_rows_returns_default_user() {
    let driver = InMemoryTestDriver::new().with_response(
        InMemoryTestResponseBuilder::new().columns(USER_COLUMNS).build(), // No rows
    );
    let (db, sink) = open(&driver).await;

    let user = db.get_user_by_login("TestUser0").await.unwrap();

    assert_eq!(user, User::default());
    driver.assert_query_count(1);
    assert_eq!(
        sink.diagnostics(),
        vec![Diagnostic::EmptyRows {
            sql: "SELECT * FROM users WHERE login = $1".into(),
        }]
    );
}

#[tokio::test]
async fn test_update_failure_is_reported_not_raised() {
    let driver =
        InMemoryTestDriver::new().with_failure("ERROR: server closed the connection unexpectedly");
    let (db, sink) = open(&driver).await;

    let user = User {
        id: 8,
        login: "TestUser0".into(),
        backend_id: Backend {
            id: 3,
            ..Backend::default()
        },
        token_exp: 99,
        ..User::default()
    };
    let outcome = db.update_user(&user).await;

    assert_eq!(
        outcome,
        QueryOutcome::Failed("ERROR: server closed the connection unexpectedly".into())
    );
    assert!(!outcome.is_available());
    assert!(outcome.into_result_set().is_none());

    let last = driver.last_query().unwrap();
    assert_eq!(last.params, vec!["TestUser0", "", "", "3", "", "99", "0", "8"]);
    assert!(matches!(
        sink.diagnostics().as_slice(),
        [Diagnostic::QueryFailed { message, .. }] if message.contains("closed the connection")
    ));
}

#[tokio::test]
async fn test_add_user_reports_command_ok() {
    let driver = InMemoryTestDriver::new().with_response(RawQueryResult::command(1));
    let (db, sink) = open(&driver).await;

    let outcome = db
        .add_user(&User {
            login: "new".into(),
            email: "n@b.com".into(),
            status: 2,
            ..User::default()
        })
        .await;

    assert_eq!(outcome, QueryOutcome::CommandOk { rows_affected: 1 });
    assert!(outcome.is_available());
    assert!(driver
        .last_query()
        .unwrap()
        .sql
        .starts_with("INSERT INTO users (login, email, password, \"backendId\""));
    assert!(sink.diagnostics().is_empty());
}

#[tokio::test]
async fn test_null_cells_map_to_zero_values() {
    let driver = InMemoryTestDriver::new().with_response(
        InMemoryTestResponseBuilder::new()
            .columns(USER_COLUMNS)
            .row_with_nulls(&[
                Some("5"),
                Some("nulls"),
                None,
                None,
                None,
                None,
                None,
                None,
            ])
            .build(),
    );
    let (db, _sink) = open(&driver).await;

    let user = db.get_user_by_id("5").await.unwrap();

    assert_eq!(user.id, 5);
    assert_eq!(user.login, "nulls");
    assert_eq!(user.email, "");
    assert_eq!(user.token_exp, 0);
    assert_eq!(user.backend_id, Backend::default());
    // The backend lookup still ran, for id 0
    driver.assert_last_query("SELECT * FROM backend WHERE id = $1", &["0"]);
}

#[tokio::test]
async fn test_missing_column_is_a_hard_error() {
    let driver = InMemoryTestDriver::new().with_response(
        InMemoryTestResponseBuilder::new()
            .columns(&["id", "login"])
            .row(&["1", "TestUser0"])
            .build(),
    );
    let (db, _sink) = open(&driver).await;

    let err = db.get_user_by_token("tok").await.unwrap_err();

    assert_eq!(
        err,
        PgDalError::OutOfRange("column '\"backendId\"' not found".into())
    );
}

#[tokio::test]
async fn test_query_values_by_name_and_index() {
    let driver = InMemoryTestDriver::new().with_response(user_row());
    let (db, _sink) = open(&driver).await;

    let answer = db
        .query("SELECT * FROM users WHERE email = $1", &params!["a@b.com"])
        .await;
    let answer = answer.as_ref();

    let by_name: String = value(answer, 0, "email").unwrap();
    let by_index: String = value(answer, 0, 2usize).unwrap();
    assert_eq!(by_name, by_index);

    let exp: u64 = value(answer, 0, "\"tokenExp\"").unwrap();
    let exp_by_index: u64 = value(answer, 0, 6usize).unwrap();
    assert_eq!(exp, 123);
    assert_eq!(exp, exp_by_index);

    assert!(matches!(
        value::<u64>(answer, 1, 0usize),
        Err(PgDalError::OutOfRange(_))
    ));
    assert!(matches!(
        value::<u64>(answer, 0, 8usize),
        Err(PgDalError::OutOfRange(_))
    ));
}

#[tokio::test]
async fn test_absent_answer_yields_zero_values_anywhere() {
    let driver = InMemoryTestDriver::new().with_failure("syntax error");
    let (db, _sink) = open(&driver).await;

    let answer = db.query("SELEC 1", &[]).await;

    assert!(answer.is_none());
    assert_eq!(value::<u64>(answer.as_ref(), 42, 7usize).unwrap(), 0);
    assert_eq!(value::<String>(answer.as_ref(), 0, "nope").unwrap(), "");
    assert_eq!(value::<f64>(answer.as_ref(), 3, "x").unwrap(), 0.0);
}

#[tokio::test]
async fn test_open_fails_when_driver_not_ready() {
    let driver = InMemoryTestDriver::new().with_ready_error(
        PgDalError::ModeConfigurationFailed("no runtime".into()),
    );
    let result = Database::open(driver, Arc::new(RecordingSink::new())).await;
    assert!(matches!(
        result,
        Err(PgDalError::ModeConfigurationFailed(_))
    ));

    let driver = InMemoryTestDriver::new()
        .with_ready_error(PgDalError::ConnectionFailed("password authentication failed".into()));
    let result = Database::open(driver, Arc::new(RecordingSink::new())).await;
    assert!(matches!(result, Err(PgDalError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_connect_rejects_invalid_descriptor() {
    let result = Database::connect("postgresql://host:notaport/db").await;
    assert!(matches!(result, Err(PgDalError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_connect_with_empty_descriptor_is_a_connection_failure() {
    let result = Database::connect("").await;
    assert!(matches!(result, Err(PgDalError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_connect_failure_carries_the_underlying_cause() {
    // Nothing listens on port 1; the refusal comes from the OS.
    let result = Database::connect("postgresql://postgres@127.0.0.1:1/users_db").await;
    match result {
        Err(PgDalError::ConnectionFailed(message)) => {
            assert!(message.contains("os error"), "message was: {}", message)
        }
        Err(other) => panic!("Expected ConnectionFailed, got {:?}", other),
        Ok(_) => panic!("Expected ConnectionFailed, got a session"),
    }
}

#[tokio::test]
async fn test_unreadable_cell_fails_only_its_own_column() {
    let driver = InMemoryTestDriver::new()
        .with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&[
                    "id",
                    "login",
                    "email",
                    "password",
                    "backendId",
                    "token",
                    "tokenExp",
                    "status",
                    "validity",
                ])
                .row_cells(vec![
                    Cell::Text("1".into()),
                    Cell::Text("TestUser0".into()),
                    Cell::Text("a@b.com".into()),
                    Cell::Text("hash".into()),
                    Cell::Text("1".into()),
                    Cell::Text("tok".into()),
                    Cell::Text("123".into()),
                    Cell::Text("0".into()),
                    Cell::Unreadable("no text rendering for type tstzrange".into()),
                ])
                .build(),
        )
        .with_response(backend_row());
    let (db, _sink) = open(&driver).await;

    let user = db.get_user_by_login("TestUser0").await.unwrap();
    assert_eq!(user.login, "TestUser0");
    assert_eq!(user.token_exp, 123);
    assert_eq!(user.backend_id.region, "eu-west");
}

#[tokio::test]
async fn test_reading_an_unreadable_cell_is_an_error() {
    let driver = InMemoryTestDriver::new().with_response(
        InMemoryTestResponseBuilder::new()
            .columns(&["id", "validity"])
            .row_cells(vec![
                Cell::Text("7".into()),
                Cell::Unreadable("no text rendering for type tstzrange".into()),
            ])
            .build(),
    );
    let (db, _sink) = open(&driver).await;

    let answer = db.query("SELECT id, validity FROM sessions", &[]).await;

    assert_eq!(value::<u64>(answer.as_ref(), 0, "id").unwrap(), 7);
    assert_eq!(
        value::<String>(answer.as_ref(), 0, "validity").unwrap_err(),
        PgDalError::UnreadableCell {
            column: 1,
            reason: "no text rendering for type tstzrange".into(),
        }
    );
}

#[tokio::test]
async fn test_cloned_test_driver_shares_its_recording() {
    let driver = InMemoryTestDriver::new().with_default_response(RawQueryResult::command(1));
    let (first, _) = open(&driver).await;
    let (second, _) = open(&driver).await;

    first.execute("UPDATE users SET status = 1", &[]).await;
    second.execute("UPDATE users SET status = 2", &[]).await;

    // Clones of the test driver share one script and one recording.
    driver.assert_query_count(2);
    drop(first);
    second.execute("UPDATE users SET status = 3", &[]).await;
    driver.assert_last_query("UPDATE users SET status = 3", &[]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queries_are_serialized() {
    const CALLERS: usize = 16;

    let driver = InMemoryTestDriver::new()
        .with_latency(Duration::from_millis(5))
        .with_default_response(RawQueryResult::command(1));
    let (db, _sink) = open(&driver).await;
    let db = Arc::new(db);

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let db = Arc::clone(&db);
            tokio::spawn(async move {
                db.execute("UPDATE users SET status = $1 WHERE id = $2", &params![1u64, i])
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(
            handle.await.unwrap(),
            QueryOutcome::CommandOk { rows_affected: 1 }
        );
    }

    driver.assert_query_count(CALLERS);
    assert_eq!(driver.max_concurrent_executions(), 1);

    let mut ids: Vec<String> = driver
        .recorded_queries()
        .into_iter()
        .map(|q| q.params[1].clone())
        .collect();
    ids.sort_by_key(|id| id.parse::<usize>().unwrap());
    let expected: Vec<String> = (0..CALLERS).map(|i| i.to_string()).collect();
    assert_eq!(ids, expected);
}
