//! Executor
//!
//! Applies an approved change list to a target database inside one
//! transaction. Concurrent runs against the same database serialize on a
//! transaction-scoped advisory lock. Any failure, timeout or cancellation
//! rolls the whole list back.

use crate::connection::{tls_connector, Database};
use crate::diff::ChangeList;
use crate::error::{describe_db_error, ShiftError, ShiftResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_postgres::types::ToSql;
use tokio_postgres::{CancelToken, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long an interrupted transaction may take to roll back
const ROLLBACK_GRACE: Duration = Duration::from_secs(10);

/// Outcome of one execution attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ExecutionResult {
    /// Every statement ran and the transaction committed
    Committed { statements: usize },
    /// Statement `ordinal` failed; nothing was applied
    Failed {
        ordinal: usize,
        statement: String,
        cause: String,
    },
    /// Interrupted while statement `ordinal` was pending; nothing was applied
    Cancelled { ordinal: usize },
}

impl ExecutionResult {
    pub fn is_committed(&self) -> bool {
        matches!(self, ExecutionResult::Committed { .. })
    }

    /// Number of committed statements, or the matching error
    pub fn into_result(self) -> ShiftResult<usize> {
        match self {
            ExecutionResult::Committed { statements } => Ok(statements),
            ExecutionResult::Failed {
                ordinal,
                statement,
                cause,
            } => Err(ShiftError::Execution {
                ordinal,
                statement,
                cause,
            }),
            ExecutionResult::Cancelled { .. } => Err(ShiftError::Cancelled),
        }
    }
}

/// Advisory lock key for a database: the first 8 bytes of
/// SHA-256(`pgshift:<dbname>`)
pub fn lock_key(database: &str) -> i64 {
    let digest = Sha256::digest(format!("pgshift:{}", database).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

enum Interruption {
    Cancelled,
    TimedOut,
}

/// Ask the server to cancel the running statement, over TLS when the
/// connection itself uses it
async fn interrupt(token: &CancelToken, tls: bool) {
    let result = if tls {
        token.cancel_query(tls_connector()).await
    } else {
        token.cancel_query(NoTls).await
    };
    if let Err(e) = result {
        warn!("Failed to cancel the running statement: {}", e);
    }
}

/// Roll back, giving up after `grace`; dropping the client then discards the
/// connection
async fn rollback_within<F>(rollback: F, grace: Duration)
where
    F: std::future::Future<Output = Result<(), tokio_postgres::Error>>,
{
    match tokio::time::timeout(grace, rollback).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Rollback failed: {}", e),
        Err(_) => warn!("Rollback did not finish within {}s; abandoning the connection", grace.as_secs()),
    }
}

pub struct Executor<'a> {
    db: &'a Database,
    timeout: Duration,
    cancel: &'a CancellationToken,
}

impl<'a> Executor<'a> {
    pub fn new(db: &'a Database, timeout: Duration, cancel: &'a CancellationToken) -> Self {
        Self { db, timeout, cancel }
    }

    /// Run every statement in order. Database errors on a statement are
    /// reported as [`ExecutionResult::Failed`]; exceeding the timeout is an
    /// error.
    pub async fn execute(&self, changes: &ChangeList) -> ShiftResult<ExecutionResult> {
        if changes.is_empty() {
            info!("Nothing to apply to {}", self.db.name());
            return Ok(ExecutionResult::Committed { statements: 0 });
        }
        if self.cancel.is_cancelled() {
            return Ok(ExecutionResult::Cancelled { ordinal: 1 });
        }

        let deadline = Instant::now() + self.timeout;
        let mut client = self.db.client().await?;
        let cancel_token = client.cancel_token();
        let tx = client.transaction().await?;

        let tls = self.db.params().ssl_require;
        let key = lock_key(self.db.name());
        let lock_params: [&(dyn ToSql + Sync); 1] = [&key];
        debug!("Waiting for advisory lock {} on {}", key, self.db.name());
        let locked = tokio::select! {
            result = tx.query_one("SELECT pg_advisory_xact_lock($1)", &lock_params) => Ok(result),
            _ = self.cancel.cancelled() => Err(Interruption::Cancelled),
            _ = sleep_until(deadline) => Err(Interruption::TimedOut),
        };
        match locked {
            Ok(result) => {
                result?;
            }
            Err(interruption) => {
                interrupt(&cancel_token, tls).await;
                rollback_within(tx.rollback(), ROLLBACK_GRACE).await;
                return self.interrupted(interruption, 1);
            }
        }

        info!("Applying {} statement(s) to {}", changes.len(), self.db.name());
        for statement in changes {
            debug!("#{} {}", statement.ordinal, statement.sql);
            let step = tokio::select! {
                result = tx.batch_execute(&statement.sql) => Ok(result),
                _ = self.cancel.cancelled() => Err(Interruption::Cancelled),
                _ = sleep_until(deadline) => Err(Interruption::TimedOut),
            };

            match step {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let cause = describe_db_error(&e);
                    error!("Statement #{} failed: {}", statement.ordinal, cause);
                    rollback_within(tx.rollback(), ROLLBACK_GRACE).await;
                    return Ok(ExecutionResult::Failed {
                        ordinal: statement.ordinal,
                        statement: statement.sql.clone(),
                        cause,
                    });
                }
                Err(interruption) => {
                    interrupt(&cancel_token, tls).await;
                    rollback_within(tx.rollback(), ROLLBACK_GRACE).await;
                    return self.interrupted(interruption, statement.ordinal);
                }
            }
        }

        tx.commit().await?;
        info!("Committed {} statement(s) to {}", changes.len(), self.db.name());
        Ok(ExecutionResult::Committed {
            statements: changes.len(),
        })
    }

    fn interrupted(&self, interruption: Interruption, ordinal: usize) -> ShiftResult<ExecutionResult> {
        match interruption {
            Interruption::Cancelled => {
                warn!("Cancelled at statement #{}; rolled back", ordinal);
                Ok(ExecutionResult::Cancelled { ordinal })
            }
            Interruption::TimedOut => Err(ShiftError::Timeout {
                operation: format!("applying changes to {} (statement #{})", self.db.name(), ordinal),
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lock_key_is_stable_per_database() {
        assert_eq!(lock_key("app"), lock_key("app"));
        assert_ne!(lock_key("app"), lock_key("app_test"));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(
            ExecutionResult::Committed { statements: 3 }.into_result().unwrap(),
            3
        );

        let failed = ExecutionResult::Failed {
            ordinal: 2,
            statement: "ALTER TABLE \"public\".\"t\" ADD COLUMN \"x\" int".to_string(),
            cause: "42701: column \"x\" already exists".to_string(),
        };
        assert!(!failed.is_committed());
        assert!(matches!(
            failed.into_result(),
            Err(ShiftError::Execution { ordinal: 2, .. })
        ));

        assert!(matches!(
            ExecutionResult::Cancelled { ordinal: 1 }.into_result(),
            Err(ShiftError::Cancelled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_gives_up_after_grace() {
        let started = tokio::time::Instant::now();
        let stuck = std::future::pending::<Result<(), tokio_postgres::Error>>();
        rollback_within(stuck, Duration::from_secs(3)).await;
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_rollback_returns_when_finished() {
        rollback_within(async { Ok(()) }, ROLLBACK_GRACE).await;
    }

    #[test]
    fn test_result_serializes_with_status_tag() {
        let json = serde_json::to_value(ExecutionResult::Cancelled { ordinal: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "cancelled", "ordinal": 4 }));
    }
}
