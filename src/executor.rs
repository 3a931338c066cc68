use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::PgDalError;
use crate::traits::{DatabaseDriver, Diagnostic, DiagnosticSink};
use crate::types::{BoundParams, RawQueryResult, ResultSet, SqlValue};

/// Classified result of one query execution.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// The query produced at least one row.
    RowsAvailable(ResultSet),
    /// The statement produced no tuple set (UPDATE, INSERT, ...).
    CommandOk { rows_affected: u64 },
    /// The query produced a tuple set without rows.
    EmptyRows,
    /// The query failed; carries the server or transport diagnostic.
    Failed(String),
}

impl QueryOutcome {
    /// Collapses the outcome to the inspectable result set, if any.
    ///
    /// Failed, empty and row-less command outcomes all become `None`.
    pub fn into_result_set(self) -> Option<ResultSet> {
        match self {
            QueryOutcome::RowsAvailable(result) => Some(result),
            _ => None,
        }
    }

    /// True when the server accepted the statement and returned something:
    /// rows, or a completed command.
    pub fn is_available(&self) -> bool {
        matches!(
            self,
            QueryOutcome::RowsAvailable(_) | QueryOutcome::CommandOk { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, QueryOutcome::Failed(_))
    }
}

/// Runs queries against one driver, one at a time.
///
/// The executor owns its driver, so no other handle can issue requests on
/// the same session around the lock.
pub struct QueryExecutor {
    driver: Mutex<Box<dyn DatabaseDriver>>,
    sink: Arc<dyn DiagnosticSink>,
}

impl QueryExecutor {
    pub(crate) fn new(driver: Box<dyn DatabaseDriver>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            driver: Mutex::new(driver),
            sink,
        }
    }

    /// Execute `sql` with positional parameters and classify the response.
    ///
    /// Holds the driver lock for the whole call. Failures and empty
    /// results are reported to the diagnostic sink; nothing is retried.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> QueryOutcome {
        let bound = BoundParams::bind(params);

        let driver = self.driver.lock().await;
        tracing::debug!(sql = sql, params_count = bound.len(), "executing query");
        let response = driver.execute(sql, &bound).await;
        drop(driver);

        let outcome = classify(response);
        match &outcome {
            QueryOutcome::Failed(message) => self.sink.emit(Diagnostic::QueryFailed {
                sql: sql.to_string(),
                message: message.clone(),
            }),
            QueryOutcome::EmptyRows => self.sink.emit(Diagnostic::EmptyRows {
                sql: sql.to_string(),
            }),
            _ => {}
        }
        outcome
    }
}

fn classify(response: crate::error::Result<RawQueryResult>) -> QueryOutcome {
    match response {
        Err(PgDalError::QueryFailed(message)) => QueryOutcome::Failed(message),
        Err(other) => QueryOutcome::Failed(other.to_string()),
        Ok(RawQueryResult::Rows(result)) if result.is_empty() => QueryOutcome::EmptyRows,
        Ok(RawQueryResult::Rows(result)) => QueryOutcome::RowsAvailable(result),
        Ok(RawQueryResult::Command { rows_affected }) => QueryOutcome::CommandOk { rows_affected },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{InMemoryTestDriver, InMemoryTestResponseBuilder};
    use crate::traits::RecordingSink;

    fn executor(driver: InMemoryTestDriver) -> (QueryExecutor, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let executor = QueryExecutor::new(Box::new(driver), Arc::clone(&sink) as Arc<dyn DiagnosticSink>);
        (executor, sink)
    }

    #[test]
    fn test_classify_priority() {
        assert_eq!(
            classify(Err(PgDalError::QueryFailed("boom".into()))),
            QueryOutcome::Failed("boom".into())
        );
        assert_eq!(
            classify(Ok(RawQueryResult::Rows(ResultSet::empty(vec!["id".into()])))),
            QueryOutcome::EmptyRows
        );
        assert_eq!(
            classify(Ok(RawQueryResult::command(3))),
            QueryOutcome::CommandOk { rows_affected: 3 }
        );
        let rows = InMemoryTestResponseBuilder::new()
            .columns(&["id"])
            .row(&["1"])
            .build_rows();
        assert!(matches!(
            classify(Ok(RawQueryResult::Rows(rows))),
            QueryOutcome::RowsAvailable(_)
        ));
    }

    #[test]
    fn test_into_result_set_collapses_everything_but_rows() {
        assert!(QueryOutcome::EmptyRows.into_result_set().is_none());
        assert!(QueryOutcome::Failed("x".into()).into_result_set().is_none());
        assert!(QueryOutcome::CommandOk { rows_affected: 1 }
            .into_result_set()
            .is_none());
        assert!(QueryOutcome::CommandOk { rows_affected: 0 }.is_available());
        assert!(!QueryOutcome::EmptyRows.is_available());
    }

    #[tokio::test]
    async fn test_execute_emits_diagnostics_for_failed_and_empty() {
        let (executor, sink) = executor(
            InMemoryTestDriver::new()
                .with_failure("relation \"users\" does not exist")
                .with_response(InMemoryTestResponseBuilder::new().columns(&["id"]).build()),
        );

        let first = executor.execute("SELECT * FROM users", &[]).await;
        let second = executor.execute("SELECT id FROM users", &[]).await;

        assert!(first.is_failed());
        assert_eq!(second, QueryOutcome::EmptyRows);
        assert_eq!(
            sink.diagnostics(),
            vec![
                Diagnostic::QueryFailed {
                    sql: "SELECT * FROM users".into(),
                    message: "relation \"users\" does not exist".into(),
                },
                Diagnostic::EmptyRows {
                    sql: "SELECT id FROM users".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_execute_binds_parameters_as_text() {
        let driver = InMemoryTestDriver::new().with_response(RawQueryResult::command(1));
        let executor = QueryExecutor::new(Box::new(driver.clone()), Arc::new(RecordingSink::new()));

        let outcome = executor
            .execute("UPDATE t SET a = $1 WHERE id = $2", &crate::params!["x", 9u64])
            .await;

        assert_eq!(outcome, QueryOutcome::CommandOk { rows_affected: 1 });
        driver.assert_last_query("UPDATE t SET a = $1 WHERE id = $2", &["x", "9"]);
    }
}
