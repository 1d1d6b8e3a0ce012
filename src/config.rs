//! Application configuration module
//!
//! Settings are layered: built-in defaults, then `pgshift.toml` (or the file
//! given with `--config`), then `PGSHIFT__<SECTION>__<KEY>` environment
//! variables. A `.env` file is loaded into the environment first.

use crate::connection::ConnectionParams;
use crate::policy::DiffPolicy;
use crate::safety::{SafetyMode, SafetyTable};
use crate::safety::rules::{ChangeRule, Safety};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use validator::Validate;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "pgshift.toml";

/// Default database name, also used as the scratch database prefix
pub const DEFAULT_DBNAME: &str = "pgshift";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Failed to read configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Invalid connection string: {0}")]
    InvalidUrl(String),
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ConfigError::InvalidValue(errors.to_string().replace('\n', "; "))
    }
}

/// Connection settings for the live database and the scratch server
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[validate(length(min = 1))]
    pub host: Option<String>,
    #[validate(range(min = 1))]
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    #[validate(length(min = 1, max = 40))]
    pub dbname: Option<String>,
    /// Restrict introspection to this schema
    pub schema: Option<String>,
    pub sslmode: Option<String>,
    /// Database the scratch lifecycle connects to for CREATE/DROP DATABASE
    #[validate(length(min = 1))]
    pub admin_dbname: String,
    #[validate(range(min = 1, max = 3600))]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            user: None,
            password: None,
            dbname: None,
            schema: None,
            sslmode: None,
            admin_dbname: "template1".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the configured target; discrete fields win over URL fields
    pub fn connection_params(&self) -> Result<ConnectionParams, ConfigError> {
        let mut params = match &self.url {
            Some(url) => ConnectionParams::from_url_lenient(url)?,
            None => ConnectionParams::default(),
        };

        if let Some(host) = &self.host {
            params.host = host.clone();
        }
        if let Some(port) = self.port {
            params.port = port;
        }
        if let Some(user) = &self.user {
            params.user = user.clone();
        }
        if let Some(password) = &self.password {
            params.password = password.clone();
        }
        if let Some(dbname) = &self.dbname {
            params.database = dbname.clone();
        }
        if params.database.is_empty() {
            params.database = DEFAULT_DBNAME.to_string();
        }
        if let Some(mode) = &self.sslmode {
            params.ssl_require = ConnectionParams::sslmode_requires_tls(mode);
        }

        Ok(params)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Schema definition file(s)
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct SchemaConfig {
    #[validate(length(min = 1))]
    pub filename: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            filename: "schema.sql".to_string(),
        }
    }
}

/// Migration files: a directory of `*.sql`, or an explicit glob
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct MigrationsConfig {
    #[validate(length(min = 1))]
    pub directory: String,
    pub filename: Option<String>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: "migrations".to_string(),
            filename: None,
        }
    }
}

/// Defaults for the `diff` and `apply` commands
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct DiffConfig {
    #[validate(length(min = 1))]
    pub from: String,
    #[validate(length(min = 1))]
    pub to: String,
    pub safety_mode: SafetyMode,
    pub include_privileges: bool,
    pub reverse: bool,
    pub allow_unsafe: bool,
    /// Per-rule safety overrides, e.g. `drop_column = "safe"`
    pub safety: BTreeMap<ChangeRule, Safety>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            from: "migrations".to_string(),
            to: "schema".to_string(),
            safety_mode: SafetyMode::AllowAll,
            include_privileges: false,
            reverse: false,
            allow_unsafe: false,
            safety: BTreeMap::new(),
        }
    }
}

/// Upper bounds for the blocking pipeline stages, in seconds
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct TimeoutConfig {
    #[validate(range(min = 1))]
    pub load_secs: u64,
    #[validate(range(min = 1))]
    pub introspect_secs: u64,
    #[validate(range(min = 1))]
    pub execute_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            load_secs: 300,
            introspect_secs: 120,
            execute_secs: 600,
        }
    }
}

impl TimeoutConfig {
    pub fn load(&self) -> Duration {
        Duration::from_secs(self.load_secs)
    }

    pub fn introspect(&self) -> Duration {
        Duration::from_secs(self.introspect_secs)
    }

    pub fn execute(&self) -> Duration {
        Duration::from_secs(self.execute_secs)
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct Settings {
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub schema: SchemaConfig,
    #[validate(nested)]
    pub migrations: MigrationsConfig,
    #[validate(nested)]
    pub diff: DiffConfig,
    #[validate(nested)]
    pub timeouts: TimeoutConfig,
    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Settings {
    /// Load settings from the config file and the environment.
    ///
    /// An explicitly named file must exist; the default `pgshift.toml` is
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // A missing .env is fine; an unreadable or malformed one is not
        env_file_loaded(dotenvy::dotenv())?;

        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        debug!("Loading configuration from {} (required: {})", file.display(), required);

        let raw = ::config::Config::builder()
            .add_source(::config::File::from(file.clone()).required(required))
            .add_source(
                ::config::Environment::with_prefix("PGSHIFT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let mut settings: Settings = raw.try_deserialize()?;
        settings.base_dir = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        settings.validate()?;
        Ok(settings)
    }

    /// Resolve a configured path against the config file's directory
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        if candidate.is_absolute() {
            candidate
        } else {
            self.base_dir.join(candidate)
        }
    }

    /// Policy from the `[diff]` section before CLI overrides
    pub fn diff_policy(&self) -> DiffPolicy {
        DiffPolicy {
            include_privileges: self.diff.include_privileges,
            safety_mode: self.diff.safety_mode,
            reverse_direction: self.diff.reverse,
            allow_unsafe: self.diff.allow_unsafe,
            safety_table: SafetyTable::with_overrides(self.diff.safety.clone()),
        }
    }
}

fn env_file_loaded(result: dotenvy::Result<PathBuf>) -> Result<(), ConfigError> {
    match result {
        Ok(path) => {
            debug!("Loaded environment from {}", path.display());
            Ok(())
        }
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
