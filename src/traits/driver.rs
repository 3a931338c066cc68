use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BoundParams, RawQueryResult};

/// Trait for database driver implementations.
/// A driver owns exactly one session and is responsible for:
/// - Confirming the session is ready for use
/// - Sending the textual parameters with the query
/// - Converting the response into a RawQueryResult
///
/// Callers never run two `execute` calls on one driver at the same time;
/// the executor holds a lock around every call.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Confirms the session is open and in its operating mode.
    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    /// Execute a SQL query with the given parameters.
    /// Parameters use PostgreSQL-style placeholders ($1, $2, etc.)
    async fn execute(&self, sql: &str, params: &BoundParams) -> Result<RawQueryResult>;
}
