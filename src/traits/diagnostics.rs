use std::sync::Mutex;

/// A message the executor reports about one query.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// The query failed at the transport or protocol level.
    QueryFailed { sql: String, message: String },
    /// The query succeeded but its tuple set was empty.
    EmptyRows { sql: String },
}

/// Receives query diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::QueryFailed { sql, message } => {
                tracing::warn!(sql = %sql, error = %message, "SQL error");
            }
            Diagnostic::EmptyRows { sql } => {
                tracing::info!(sql = %sql, "query returned 0 rows");
            }
        }
    }
}

/// Keeps every diagnostic in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all diagnostics emitted so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        if let Ok(mut diagnostics) = self.diagnostics.lock() {
            diagnostics.push(diagnostic);
        }
    }
}
