//! Pipeline orchestration
//!
//! configuration → two endpoints → two snapshots → diff → safety filter →
//! SQL output or execution. Each stage finishes before the next starts.

use crate::config::{ConfigError, Settings};
use crate::connection::Database;
use crate::diff::{ChangeList, ChangeStatement, DiffEngine};
use crate::error::{ShiftError, ShiftResult};
use crate::executor::{ExecutionResult, Executor};
use crate::loader::{Endpoint, StateLoader};
use crate::policy::DiffPolicy;
use crate::safety::SafetyFilter;
use crate::scratch::AdminConnection;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Filtered changes between two endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffOutcome {
    pub from: String,
    pub to: String,
    pub from_checksum: String,
    pub to_checksum: String,
    pub changes: ChangeList,
    pub withheld: Vec<ChangeStatement>,
}

impl DiffOutcome {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

pub struct Pipeline<'a> {
    settings: &'a Settings,
    cancel: CancellationToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(settings: &'a Settings, cancel: CancellationToken) -> Self {
        Self { settings, cancel }
    }

    /// Load both endpoints, diff them and apply the safety policy
    pub async fn diff(
        &self,
        from: &Endpoint,
        to: &Endpoint,
        policy: &DiffPolicy,
    ) -> ShiftResult<DiffOutcome> {
        let loader = StateLoader::new(self.settings, &self.cancel);
        let from_snapshot = loader.load(from, policy).await?;
        let to_snapshot = loader.load(to, policy).await?;

        let changes = DiffEngine::diff(&from_snapshot, &to_snapshot, policy);
        let filtered = SafetyFilter::apply(changes, policy)?;

        Ok(DiffOutcome {
            from: from_snapshot.label.clone(),
            to: to_snapshot.label.clone(),
            from_checksum: from_snapshot.checksum.clone(),
            to_checksum: to_snapshot.checksum.clone(),
            changes: filtered.kept,
            withheld: filtered.withheld,
        })
    }

    /// The database the change list rewrites: `from`, or `to` when reversed
    pub fn target<'e>(from: &'e Endpoint, to: &'e Endpoint, policy: &DiffPolicy) -> ShiftResult<&'e Endpoint> {
        let target = if policy.reverse_direction { to } else { from };
        if !target.is_live() {
            return Err(ShiftError::Config(ConfigError::InvalidValue(format!(
                "cannot apply changes to {}: the target must be a database",
                target
            ))));
        }
        Ok(target)
    }

    /// Diff, then execute the filtered list against the target database
    pub async fn apply(
        &self,
        from: &Endpoint,
        to: &Endpoint,
        policy: &DiffPolicy,
    ) -> ShiftResult<(DiffOutcome, ExecutionResult)> {
        let Endpoint::LiveDatabase(params) = Self::target(from, to, policy)? else {
            return Err(ShiftError::Internal("apply target is not a database".to_string()));
        };

        let outcome = self.diff(from, to, policy).await?;
        if outcome.is_empty() {
            info!("{} is already up to date", params.to_display_string());
            return Ok((outcome, ExecutionResult::Committed { statements: 0 }));
        }

        let db = Database::connect(params, self.settings.database.connect_timeout()).await?;
        let result = Executor::new(&db, self.settings.timeouts.execute(), &self.cancel)
            .execute(&outcome.changes)
            .await;
        db.close();
        Ok((outcome, result?))
    }

    /// Drop leftover scratch databases; returns their names
    pub async fn clean(&self) -> ShiftResult<Vec<String>> {
        let server = self.settings.database.connection_params()?;
        let admin = AdminConnection::connect(
            &server,
            &self.settings.database.admin_dbname,
            self.settings.database.connect_timeout(),
        )
        .await?;
        let result = admin.clean().await;
        admin.close();

        let dropped = result?;
        info!("Dropped {} scratch database(s)", dropped.len());
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionParams;
    use crate::files::FilePattern;
    use pretty_assertions::assert_eq;

    fn live(db: &str) -> Endpoint {
        Endpoint::LiveDatabase(ConnectionParams {
            database: db.to_string(),
            ..ConnectionParams::default()
        })
    }

    fn schema() -> Endpoint {
        Endpoint::SchemaFile(FilePattern::Glob("schema.sql".to_string()))
    }

    #[test]
    fn test_target_is_from_unless_reversed() {
        let db = live("app");
        let file = schema();

        let forward = DiffPolicy::default();
        assert_eq!(Pipeline::target(&db, &file, &forward).unwrap(), &db);
        assert!(Pipeline::target(&file, &db, &forward).is_err());

        let reversed = DiffPolicy::default().reversed(true);
        assert_eq!(Pipeline::target(&file, &db, &reversed).unwrap(), &db);
    }

    #[tokio::test]
    async fn test_apply_rejects_file_target_before_loading() {
        let settings = Settings::default();
        let pipeline = Pipeline::new(&settings, CancellationToken::new());
        let result = pipeline.apply(&schema(), &live("app"), &DiffPolicy::default()).await;
        assert!(matches!(result, Err(ShiftError::Config(ConfigError::InvalidValue(_)))));
    }
}
