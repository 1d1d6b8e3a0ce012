//! Scratch databases
//!
//! A scratch database hosts one schema-file load or migration replay. It is
//! created from an admin connection right before the load and dropped right
//! after the snapshot is taken, on every exit path. Each one carries a marker
//! comment so `clean` can find leftovers from killed runs.

use crate::connection::{ConnectionParams, Database};
use crate::error::{describe_db_error, ShiftError, ShiftResult};
use crate::quote::{fit_identifier, ident, literal};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Comment placed on every scratch database
pub const SCRATCH_MARKER: &str = "pgshift scratch database; safe to drop";

const FORCE_DROP_MIN_VERSION: i32 = 130000;

/// `<base>_<unix-time>_<suffix>_<short-uuid>`, cut to fit an identifier
pub fn scratch_name(base: &str, suffix: &str) -> String {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let short = uuid::Uuid::new_v4().simple().to_string();
    let tail = format!("_{}_{}_{}", unix, suffix, &short[..8]);
    fit_identifier(base, &tail)
}

/// Connection to the maintenance database that creates and drops scratch
/// databases
#[derive(Clone)]
pub struct AdminConnection {
    db: Database,
}

impl AdminConnection {
    pub async fn connect(
        server: &ConnectionParams,
        admin_dbname: &str,
        timeout: Duration,
    ) -> ShiftResult<Self> {
        let db = Database::connect(&server.with_database(admin_dbname), timeout).await?;
        Ok(Self { db })
    }

    pub fn params(&self) -> &ConnectionParams {
        self.db.params()
    }

    /// Create and mark a new, uniquely named database
    pub async fn create_scratch(&self, base: &str, suffix: &str) -> ShiftResult<String> {
        let name = scratch_name(base, suffix);
        let client = self.db.client().await?;

        // CREATE DATABASE cannot run inside a transaction block
        client
            .batch_execute(&format!("CREATE DATABASE {}", ident(&name)))
            .await
            .map_err(|e| {
                ShiftError::Internal(format!(
                    "Failed to create scratch database {}: {}",
                    name,
                    describe_db_error(&e)
                ))
            })?;

        let comment = format!(
            "COMMENT ON DATABASE {} IS {}",
            ident(&name),
            literal(SCRATCH_MARKER)
        );
        if let Err(e) = client.batch_execute(&comment).await {
            drop(client);
            if let Err(cleanup) = self.drop_database(&name).await {
                error!("Failed to drop unmarked scratch database {}: {}", name, cleanup);
            }
            return Err(e.into());
        }

        info!("Created scratch database {}", name);
        Ok(name)
    }

    /// Drop a database, disconnecting anyone still attached
    pub async fn drop_database(&self, name: &str) -> ShiftResult<()> {
        let version = self.db.server_version_num().await?;
        let client = self.db.client().await?;

        let sql = if version >= FORCE_DROP_MIN_VERSION {
            format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", ident(name))
        } else {
            client
                .execute(
                    "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                     WHERE datname = $1 AND pid <> pg_backend_pid()",
                    &[&name],
                )
                .await?;
            format!("DROP DATABASE IF EXISTS {}", ident(name))
        };
        client.batch_execute(&sql).await?;

        debug!("Dropped database {}", name);
        Ok(())
    }

    /// Databases carrying the scratch marker
    pub async fn marked_databases(&self) -> ShiftResult<Vec<String>> {
        let client = self.db.client().await?;
        let rows = client
            .query(
                "SELECT d.datname::text AS name \
                 FROM pg_database d \
                 JOIN pg_shdescription s \
                   ON s.objoid = d.oid AND s.classoid = 'pg_database'::regclass \
                 WHERE s.description = $1 \
                 ORDER BY 1",
                &[&SCRATCH_MARKER],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("name")).collect())
    }

    /// Drop every marked database; returns the names dropped
    pub async fn clean(&self) -> ShiftResult<Vec<String>> {
        let names = self.marked_databases().await?;
        for name in &names {
            info!("Dropping leftover scratch database {}", name);
            self.drop_database(name).await?;
        }
        Ok(names)
    }

    pub fn close(&self) {
        self.db.close();
    }
}

/// Drops the scratch database if the owning future is dropped mid-flight
/// (outer timeout, runtime shutdown).
struct TeardownGuard {
    admin: AdminConnection,
    name: String,
    armed: bool,
}

impl TeardownGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let admin = self.admin.clone();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Scratch scope abandoned; dropping {} in the background", name);
                handle.spawn(async move {
                    if let Err(e) = admin.drop_database(&name).await {
                        error!("Failed to drop scratch database {}: {}", name, e);
                    }
                    admin.close();
                });
            }
            Err(_) => warn!(
                "No runtime to drop scratch database {}; run `pgshift clean`",
                name
            ),
        }
    }
}

/// Run `body` against a fresh scratch database and drop it afterwards,
/// whatever the outcome. Cancellation aborts `body` and still drops the
/// database.
pub async fn with_scratch<T, F, Fut>(
    server: &ConnectionParams,
    admin_dbname: &str,
    connect_timeout: Duration,
    suffix: &str,
    cancel: &CancellationToken,
    body: F,
) -> ShiftResult<T>
where
    F: FnOnce(Database) -> Fut,
    Fut: Future<Output = ShiftResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(ShiftError::Cancelled);
    }

    let admin = AdminConnection::connect(server, admin_dbname, connect_timeout).await?;
    let name = match admin.create_scratch(&server.database, suffix).await {
        Ok(name) => name,
        Err(e) => {
            admin.close();
            return Err(e);
        }
    };
    let mut guard = TeardownGuard {
        admin: admin.clone(),
        name: name.clone(),
        armed: true,
    };

    let result = async {
        let db = Database::connect(&server.with_database(&name), connect_timeout).await?;
        let outcome = tokio::select! {
            outcome = body(db.clone()) => outcome,
            _ = cancel.cancelled() => {
                warn!("Cancelled while working in scratch database {}", name);
                Err(ShiftError::Cancelled)
            }
        };
        db.close();
        outcome
    }
    .await;

    let teardown = admin.drop_database(&name).await;
    guard.disarm();
    admin.close();

    match (result, teardown) {
        (Ok(value), Ok(())) => {
            info!("Dropped scratch database {}", name);
            Ok(value)
        }
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Err(teardown_err)) => {
            error!(
                "Failed to drop scratch database {}: {}; run `pgshift clean`",
                name, teardown_err
            );
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::MAX_IDENTIFIER_LEN;

    #[test]
    fn test_scratch_name_shape() {
        let name = scratch_name("app", "migrations");
        let parts: Vec<&str> = name.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "app");
        assert!(parts[1].parse::<u64>().is_ok());
        assert_eq!(parts[2], "migrations");
        assert_eq!(parts[3].len(), 8);
    }

    #[test]
    fn test_scratch_names_are_unique() {
        assert_ne!(scratch_name("app", "schema"), scratch_name("app", "schema"));
    }

    #[test]
    fn test_long_base_is_cut_to_identifier_length() {
        let base = "a".repeat(80);
        let name = scratch_name(&base, "schema");
        assert!(name.len() <= MAX_IDENTIFIER_LEN);
        assert!(name.contains("_schema_"));
    }

    #[test]
    fn test_cancelled_before_start_touches_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Unreachable server: the scope must bail out before connecting
        let server = ConnectionParams {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..ConnectionParams::default()
        };
        let mut scope = tokio_test::task::spawn(with_scratch(
            &server,
            "template1",
            Duration::from_millis(50),
            "schema",
            &cancel,
            |_db| async { Ok(()) },
        ));
        // ready on the first poll, so no connection attempt was awaited
        let result = tokio_test::assert_ready!(scope.poll());
        assert!(matches!(result, Err(ShiftError::Cancelled)));
    }
}
