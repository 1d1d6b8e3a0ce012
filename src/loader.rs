//! State Loader
//!
//! Turns an endpoint into a [`Snapshot`]. All three endpoint kinds end in the
//! same catalog introspection, so they are compared on identical terms.

use crate::config::{ConfigError, Settings};
use crate::connection::{ConnectionParams, Database};
use crate::error::{ShiftError, ShiftResult};
use crate::files::FilePattern;
use crate::introspection::PostgresIntrospector;
use crate::migrations::{self, MigrationReplayer};
use crate::policy::DiffPolicy;
use crate::scratch::with_scratch;
use crate::snapshot::Snapshot;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Where a schema state comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    LiveDatabase(ConnectionParams),
    SchemaFile(FilePattern),
    MigrationSet(FilePattern),
}

impl Endpoint {
    /// Resolve `database`, `schema`, `migrations` or a `postgres://` URL
    pub fn parse(spec: &str, settings: &Settings) -> Result<Self, ConfigError> {
        let spec = spec.trim();
        match spec {
            "database" | "db" => Ok(Endpoint::LiveDatabase(settings.database.connection_params()?)),
            "schema" => Ok(Endpoint::SchemaFile(FilePattern::schema(settings))),
            "migrations" => Ok(Endpoint::MigrationSet(FilePattern::migrations(settings))),
            url if ConnectionParams::is_postgres_url(url) => Ok(Endpoint::LiveDatabase(
                ConnectionParams::from_connection_string(url)?,
            )),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown endpoint '{}' (expected database, schema, migrations or a postgres:// URL)",
                other
            ))),
        }
    }

    /// Provenance label carried by the snapshot; passwords are masked
    pub fn label(&self) -> String {
        match self {
            Endpoint::LiveDatabase(params) => params.to_display_string(),
            Endpoint::SchemaFile(pattern) => format!("schema:{}", pattern),
            Endpoint::MigrationSet(pattern) => format!("migrations:{}", pattern),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Endpoint::LiveDatabase(_))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: impl Into<String>,
    work: impl Future<Output = ShiftResult<T>>,
) -> ShiftResult<T> {
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => Err(ShiftError::Timeout {
            operation: operation.into(),
            seconds: limit.as_secs(),
        }),
    }
}

/// Produces snapshots for endpoints under one set of settings
pub struct StateLoader<'a> {
    settings: &'a Settings,
    cancel: &'a CancellationToken,
}

impl<'a> StateLoader<'a> {
    pub fn new(settings: &'a Settings, cancel: &'a CancellationToken) -> Self {
        Self { settings, cancel }
    }

    pub async fn load(&self, endpoint: &Endpoint, policy: &DiffPolicy) -> ShiftResult<Snapshot> {
        if self.cancel.is_cancelled() {
            return Err(ShiftError::Cancelled);
        }
        let label = endpoint.label();
        info!("Loading schema state from {}", label);

        let snapshot = match endpoint {
            Endpoint::LiveDatabase(params) => self.load_live(params, &label, policy).await?,
            Endpoint::SchemaFile(pattern) => {
                let paths = pattern.resolve()?;
                if paths.is_empty() {
                    return Err(ShiftError::Pattern {
                        pattern: pattern.to_string(),
                        message: "no schema files matched".to_string(),
                    });
                }
                let files = migrations::read_all(&paths).await?;
                self.load_scratch("schema", &label, policy, |db| async move {
                    migrations::load_schema(&db, &files).await
                })
                .await?
            }
            Endpoint::MigrationSet(pattern) => {
                let paths = pattern.resolve()?;
                let files = migrations::read_all(&paths).await?;
                self.load_scratch("migrations", &label, policy, |db| async move {
                    MigrationReplayer::new(&db).replay(&files).await.map(|_| ())
                })
                .await?
            }
        };

        info!(
            "Captured {} object(s) from {} (checksum {})",
            snapshot.len(),
            label,
            &snapshot.checksum[..12.min(snapshot.checksum.len())]
        );
        Ok(snapshot)
    }

    async fn introspect(&self, db: &Database, label: &str, policy: &DiffPolicy) -> ShiftResult<Snapshot> {
        let client = db.client().await?;
        let introspector = PostgresIntrospector::new(
            &client,
            self.settings.database.schema.clone(),
            policy.include_privileges,
        );
        bounded(
            self.settings.timeouts.introspect(),
            format!("introspecting {}", label),
            introspector.snapshot(label),
        )
        .await
    }

    async fn load_live(
        &self,
        params: &ConnectionParams,
        label: &str,
        policy: &DiffPolicy,
    ) -> ShiftResult<Snapshot> {
        let db = Database::connect(params, self.settings.database.connect_timeout()).await?;
        let result = tokio::select! {
            result = self.introspect(&db, label, policy) => result,
            _ = self.cancel.cancelled() => Err(ShiftError::Cancelled),
        };
        db.close();
        result
    }

    /// Populate a scratch database with `populate`, then snapshot it
    async fn load_scratch<F, Fut>(
        &self,
        suffix: &str,
        label: &str,
        policy: &DiffPolicy,
        populate: F,
    ) -> ShiftResult<Snapshot>
    where
        F: FnOnce(Database) -> Fut,
        Fut: Future<Output = ShiftResult<()>>,
    {
        let server = self.settings.database.connection_params()?;
        let load_timeout = self.settings.timeouts.load();

        with_scratch(
            &server,
            &self.settings.database.admin_dbname,
            self.settings.database.connect_timeout(),
            suffix,
            self.cancel,
            |db| async move {
                bounded(load_timeout, format!("loading {}", label), populate(db.clone())).await?;
                self.introspect(&db, label, policy).await
            },
        )
        .await
    }
}
