//! pgshift - PostgreSQL schema diff and apply
//!
//! ```bash
//! # SQL still missing from the migrations to reach schema.sql
//! pgshift diff
//!
//! # Bring the configured database in line with schema.sql
//! pgshift apply database schema --safety allow-safe-only
//!
//! # Remove scratch databases left behind by killed runs
//! pgshift clean
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use pgshift::{
    CancellationToken, DiffOutcome, DiffPolicy, Endpoint, Pipeline, SafetyMode, Settings, ShiftError,
    ShiftResult,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "pgshift")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Diff PostgreSQL schemas and apply the result safely", long_about = None)]
#[command(after_help = "ENDPOINTS:
    database                 the configured database
    schema                   the configured schema file(s)
    migrations               the configured migrations, replayed into a scratch database
    postgres://...           any other database")]
struct Cli {
    /// Configuration file (default: ./pgshift.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log pipeline progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Sql,
    Annotated,
    Json,
}

/// Policy flags shared by `diff` and `apply`; unset flags keep the config value
#[derive(clap::Args)]
struct PolicyArgs {
    /// Include GRANT/REVOKE statements
    #[arg(long)]
    privileges: bool,

    /// allow-safe-only, allow-all or allow-unsafe-explicit
    #[arg(long)]
    safety: Option<SafetyMode>,

    /// Swap FROM and TO
    #[arg(long)]
    reverse: bool,

    /// Confirm unsafe statements under allow-unsafe-explicit
    #[arg(long)]
    allow_unsafe: bool,
}

impl PolicyArgs {
    fn policy(&self, settings: &Settings) -> DiffPolicy {
        let base = settings.diff_policy();
        let mode = self.safety.unwrap_or(base.safety_mode);
        let privileges = base.include_privileges || self.privileges;
        let reverse = base.reverse_direction || self.reverse;
        let allow_unsafe = base.allow_unsafe || self.allow_unsafe;
        base.with_safety_mode(mode)
            .with_privileges(privileges)
            .reversed(reverse)
            .allowing_unsafe(allow_unsafe)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the statements that turn FROM into TO
    Diff {
        /// Default: [diff] from, else `migrations`
        from: Option<String>,
        /// Default: [diff] to, else `schema`
        to: Option<String>,
        #[arg(short, long, value_enum, default_value = "sql")]
        format: OutputFormat,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Turn the FROM database into TO inside one transaction
    Apply {
        /// Database to change (default: `database`)
        from: Option<String>,
        /// Default: [diff] to, else `schema`
        to: Option<String>,
        #[arg(short, long, value_enum, default_value = "annotated")]
        format: OutputFormat,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Drop scratch databases left behind by interrupted runs
    Clean,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    match run(cli, cancel).await {
        Ok(code) => Ok(code),
        Err(e) => {
            error!(code = e.code(), "{}", e);
            eprintln!("error: {}", e);
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> ShiftResult<ExitCode> {
    let settings = Settings::load(cli.config.as_deref())?;
    let pipeline = Pipeline::new(&settings, cancel);

    match cli.command {
        Commands::Diff {
            from,
            to,
            format,
            policy,
        } => {
            let policy = policy.policy(&settings);
            let from = Endpoint::parse(from.as_deref().unwrap_or(&settings.diff.from), &settings)?;
            let to = Endpoint::parse(to.as_deref().unwrap_or(&settings.diff.to), &settings)?;

            let outcome = pipeline.diff(&from, &to, &policy).await?;
            if outcome.is_empty() {
                info!("No differences between {} and {}", outcome.from, outcome.to);
            }
            print!("{}", render(&outcome, format)?);
        }
        Commands::Apply {
            from,
            to,
            format,
            policy,
        } => {
            let policy = policy.policy(&settings);
            let from = Endpoint::parse(from.as_deref().unwrap_or("database"), &settings)?;
            let to = Endpoint::parse(to.as_deref().unwrap_or(&settings.diff.to), &settings)?;

            let (outcome, result) = pipeline.apply(&from, &to, &policy).await?;
            if !outcome.is_empty() {
                print!("{}", render(&outcome, format)?);
            }
            let applied = result.into_result()?;
            info!("Applied {} statement(s)", applied);
        }
        Commands::Clean => {
            for name in pipeline.clean().await? {
                println!("{}", name);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn render(outcome: &DiffOutcome, format: OutputFormat) -> ShiftResult<String> {
    match format {
        OutputFormat::Sql => Ok(outcome.changes.to_sql(false)),
        OutputFormat::Annotated => {
            let mut out = outcome.changes.to_sql(true);
            for statement in &outcome.withheld {
                out.push_str(&format!(
                    "\n-- withheld: {}\n-- {};\n",
                    statement.annotation().trim_start_matches("-- "),
                    statement.sql
                ));
            }
            Ok(out)
        }
        OutputFormat::Json => serde_json::to_string_pretty(outcome)
            .map(|json| json + "\n")
            .map_err(|e| ShiftError::Internal(format!("Failed to serialize changes: {}", e))),
    }
}

/// Logs go to stderr; stdout carries only the output
fn init_tracing(verbose: bool, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "info,pgshift=debug" } else { "warn" })
    });

    let (text, json) = match format {
        LogFormat::Text => (
            Some(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbose)
                    .with_level(true)
                    .compact(),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(fmt::layer().with_writer(std::io::stderr).json()),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text)
        .with(json)
        .init();
}

/// Trip `cancel` on Ctrl+C or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl+C, cancelling"),
        _ = terminate => warn!("Received terminate signal, cancelling"),
    }
    cancel.cancel();
}
