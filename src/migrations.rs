//! Migration Replayer and schema-file loading
//!
//! SQL text is opaque. It goes to the server through the simple-query
//! protocol (`batch_execute`) exactly as read from disk: no parameter binding,
//! no templating, so `%` and `:name` reach PostgreSQL untouched.

use crate::connection::Database;
use crate::error::{describe_db_error, io_error, ShiftError, ShiftResult};
use deadpool_postgres::Client;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One SQL file and its contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFile {
    pub path: PathBuf,
    pub sql: String,
}

impl SqlFile {
    pub async fn read(path: &Path) -> ShiftResult<Self> {
        let sql = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| io_error(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            sql,
        })
    }

    pub fn is_blank(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

/// Read files in the given order
pub async fn read_all(paths: &[PathBuf]) -> ShiftResult<Vec<SqlFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(SqlFile::read(path).await?);
    }
    Ok(files)
}

async fn run_in_transaction(client: &mut Client, sql: &str) -> Result<(), tokio_postgres::Error> {
    let tx = client.transaction().await?;
    tx.batch_execute(sql).await?;
    tx.commit().await
}

/// Applies migration files to a scratch database, one transaction per file
pub struct MigrationReplayer<'a> {
    db: &'a Database,
}

impl<'a> MigrationReplayer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Apply `files` in order; stops at the first failing file, whose own
    /// partial effect is rolled back. Returns the number of files applied.
    pub async fn replay(&self, files: &[SqlFile]) -> ShiftResult<usize> {
        if files.is_empty() {
            warn!("No migration files found; replaying an empty set");
        }

        let mut client = self.db.client().await?;
        let mut applied = 0;
        for file in files {
            if file.is_blank() {
                debug!("Skipping empty migration {}", file.path.display());
                continue;
            }
            info!("Applying migration {}", file.path.display());
            run_in_transaction(&mut client, &file.sql)
                .await
                .map_err(|e| ShiftError::MigrationApply {
                    file: file.path.clone(),
                    cause: describe_db_error(&e),
                })?;
            applied += 1;
        }

        info!("Replayed {} migration file(s) into {}", applied, self.db.name());
        Ok(applied)
    }
}

/// Schema files joined in order. The separator closes a trailing statement
/// that lacks its semicolon.
pub fn combine(files: &[&SqlFile]) -> String {
    files
        .iter()
        .map(|f| f.sql.as_str())
        .collect::<Vec<_>>()
        .join("\n;\n")
}

/// Execute the schema definition as one unit. On failure the files are
/// re-run one by one in a rolled-back transaction to name the culprit.
pub async fn load_schema(db: &Database, files: &[SqlFile]) -> ShiftResult<()> {
    let files: Vec<&SqlFile> = files.iter().filter(|f| !f.is_blank()).collect();
    let Some(first) = files.first() else {
        warn!("Schema definition is empty");
        return Ok(());
    };

    let mut client = db.client().await?;
    let error = match run_in_transaction(&mut client, &combine(&files)).await {
        Ok(()) => {
            info!("Loaded {} schema file(s) into {}", files.len(), db.name());
            return Ok(());
        }
        Err(e) => e,
    };

    if files.len() == 1 {
        return Err(ShiftError::SchemaLoad {
            file: first.path.clone(),
            cause: describe_db_error(&error),
        });
    }

    debug!("Combined schema load failed; locating the failing file");
    match locate_failure(&mut client, &files).await? {
        Some((file, cause)) => Err(ShiftError::SchemaLoad { file, cause }),
        // Only fails when concatenated, e.g. an unterminated string running
        // across a file boundary
        None => Err(ShiftError::SchemaLoad {
            file: first.path.clone(),
            cause: describe_db_error(&error),
        }),
    }
}

async fn locate_failure(
    client: &mut Client,
    files: &[&SqlFile],
) -> ShiftResult<Option<(PathBuf, String)>> {
    let tx = client.transaction().await?;
    for file in files {
        if let Err(e) = tx.batch_execute(&file.sql).await {
            // dropping `tx` rolls back
            return Ok(Some((file.path.clone(), describe_db_error(&e))));
        }
    }
    tx.rollback().await?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn file(name: &str, sql: &str) -> SqlFile {
        SqlFile {
            path: PathBuf::from(name),
            sql: sql.to_string(),
        }
    }

    #[test]
    fn test_blank_detection() {
        assert!(file("a.sql", "  \n\t").is_blank());
        assert!(!file("a.sql", "SELECT 1").is_blank());
    }

    #[test]
    fn test_combine_keeps_text_verbatim() {
        let a = file("a.sql", "CREATE TABLE t (pct text DEFAULT '100%')");
        let b = file("b.sql", "COMMENT ON TABLE t IS ':token %s';\n");
        assert_eq!(
            combine(&[&a, &b]),
            "CREATE TABLE t (pct text DEFAULT '100%')\n;\nCOMMENT ON TABLE t IS ':token %s';\n"
        );
    }

    #[tokio::test]
    async fn test_read_all_in_given_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("001.sql");
        let second = dir.path().join("002.sql");
        std::fs::write(&first, "CREATE TABLE a ();").unwrap();
        std::fs::write(&second, "").unwrap();

        let files = read_all(&[second.clone(), first.clone()]).await.unwrap();
        assert_eq!(files[0].path, second);
        assert!(files[0].is_blank());
        assert_eq!(files[1].sql, "CREATE TABLE a ();");
    }

    #[tokio::test]
    async fn test_missing_file_names_path() {
        let err = SqlFile::read(Path::new("/definitely/not/here.sql")).await.unwrap_err();
        match err {
            ShiftError::Io { path, .. } => assert_eq!(path, PathBuf::from("/definitely/not/here.sql")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
