//! SQL file resolution
//!
//! Expands the configured schema and migration locations into an ordered list
//! of files. Globs understand `*`, `?` and `**`; results are always sorted by
//! their path string so replay order never depends on the filesystem.

use crate::config::Settings;
use crate::error::{io_error, ShiftError, ShiftResult};
use glob::{MatchOptions, Pattern};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where SQL files come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePattern {
    /// A file name or glob; matches are used whatever their extension
    Glob(String),
    /// Every `*.sql` file directly inside the directory
    Directory(PathBuf),
}

impl fmt::Display for FilePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilePattern::Glob(pattern) => f.write_str(pattern),
            FilePattern::Directory(dir) => write!(f, "{}/*.sql", dir.display()),
        }
    }
}

impl FilePattern {
    /// `[schema] filename`, resolved against the config file's directory
    pub fn schema(settings: &Settings) -> Self {
        FilePattern::Glob(path_string(&settings.resolve_path(&settings.schema.filename)))
    }

    /// `[migrations] filename` under `directory` when set, else the directory
    pub fn migrations(settings: &Settings) -> Self {
        let directory = settings.resolve_path(&settings.migrations.directory);
        match &settings.migrations.filename {
            Some(pattern) => {
                let candidate = Path::new(pattern);
                let full = if candidate.is_absolute() {
                    candidate.to_path_buf()
                } else {
                    directory.join(candidate)
                };
                FilePattern::Glob(path_string(&full))
            }
            None => FilePattern::Directory(directory),
        }
    }

    /// Matching files in lexicographic path order
    pub fn resolve(&self) -> ShiftResult<Vec<PathBuf>> {
        let mut files = match self {
            FilePattern::Directory(dir) => sql_files_in(dir)?,
            FilePattern::Glob(pattern) => expand_glob(pattern)?,
        };
        files.sort_by(|a, b| path_string(a).cmp(&path_string(b)));
        debug!("{} resolved to {} file(s)", self, files.len());
        Ok(files)
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn sql_files_in(dir: &Path) -> ShiftResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| io_error(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    Ok(files)
}

fn has_wildcard(component: &str) -> bool {
    component.contains(['*', '?'])
}

/// Split at the first component holding a wildcard: (literal base, rest)
fn split_glob(pattern: &str) -> (PathBuf, Option<String>) {
    let parts: Vec<&str> = pattern.split('/').collect();
    match parts.iter().position(|p| has_wildcard(p)) {
        None => (PathBuf::from(pattern), None),
        Some(i) => {
            let base = parts[..i].join("/");
            let base = match (base.is_empty(), pattern.starts_with('/')) {
                (true, true) => "/".to_string(),
                (true, false) => ".".to_string(),
                _ => base,
            };
            (PathBuf::from(base), Some(parts[i..].join("/")))
        }
    }
}

fn expand_glob(pattern: &str) -> ShiftResult<Vec<PathBuf>> {
    if pattern.trim().is_empty() {
        return Err(ShiftError::Pattern {
            pattern: pattern.to_string(),
            message: "empty pattern".to_string(),
        });
    }

    let (base, rest) = split_glob(pattern);
    let Some(rest) = rest else {
        if !base.is_file() {
            return Err(io_error(
                &base,
                std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            ));
        }
        return Ok(vec![base]);
    };

    if !base.is_dir() {
        return Err(io_error(
            &base,
            std::io::Error::new(std::io::ErrorKind::NotFound, "directory not found"),
        ));
    }

    // the literal base may itself hold glob metacharacters such as '['
    let full = format!("{}/{}", Pattern::escape(&path_string(&base)), rest);
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    let entries = glob::glob_with(&full, options).map_err(|e| ShiftError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            io_error(path, e.into_error())
        })?;
        if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "SELECT 1;").unwrap();
    }

    fn names(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| path_string(f.strip_prefix(root).unwrap()))
            .collect()
    }

    #[test]
    fn test_single_star_stays_in_one_directory() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "v1_init.sql");
        touch(dir.path(), "v10_init.sql");
        touch(dir.path(), "sub/v2_more.sql");

        let pattern = format!("{}/v?_*.sql", path_string(dir.path()));
        let files = FilePattern::Glob(pattern).resolve().unwrap();
        assert_eq!(names(dir.path(), &files), vec!["v1_init.sql"]);
    }

    #[test]
    fn test_brackets_in_base_directory_are_literal() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db[prod]/001.sql");
        touch(dir.path(), "dbp/002.sql");

        let pattern = format!("{}/db[prod]/*.sql", path_string(dir.path()));
        let files = FilePattern::Glob(pattern).resolve().unwrap();
        assert_eq!(names(dir.path(), &files), vec!["db[prod]/001.sql"]);
    }

    #[test]
    fn test_malformed_glob_is_a_pattern_error() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/**.sql", path_string(dir.path()));
        assert!(matches!(
            FilePattern::Glob(pattern).resolve(),
            Err(ShiftError::Pattern { .. })
        ));
    }

    #[test]
    fn test_directory_mode_takes_only_top_level_sql() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "002_b.sql");
        touch(dir.path(), "001_a.sql");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "nested/003_c.sql");

        let files = FilePattern::Directory(dir.path().to_path_buf()).resolve().unwrap();
        assert_eq!(names(dir.path(), &files), vec!["001_a.sql", "002_b.sql"]);
    }

    #[test]
    fn test_recursive_glob_sorted_by_path_string() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b/001.sql");
        touch(dir.path(), "a-b/001.sql");
        touch(dir.path(), "a/002.sql");
        touch(dir.path(), "a/001.psql");

        let pattern = format!("{}/**/*", path_string(dir.path()));
        let files = FilePattern::Glob(pattern).resolve().unwrap();
        assert_eq!(
            names(dir.path(), &files),
            vec!["a-b/001.sql", "a/001.psql", "a/002.sql", "b/001.sql"]
        );
    }

    #[test]
    fn test_plain_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "schema.sql");

        let present = FilePattern::Glob(path_string(&dir.path().join("schema.sql")));
        assert_eq!(present.resolve().unwrap().len(), 1);

        let missing = FilePattern::Glob(path_string(&dir.path().join("nope.sql")));
        assert!(matches!(missing.resolve(), Err(ShiftError::Io { .. })));
    }

    #[test]
    fn test_split_glob() {
        assert_eq!(
            split_glob("db/schema/*.sql"),
            (PathBuf::from("db/schema"), Some("*.sql".to_string()))
        );
        assert_eq!(split_glob("*.sql"), (PathBuf::from("."), Some("*.sql".to_string())));
        assert_eq!(split_glob("schema.sql"), (PathBuf::from("schema.sql"), None));
    }

    #[test]
    fn test_migrations_pattern_joins_directory() {
        let mut settings = Settings::default();
        settings.base_dir = PathBuf::from("/srv/app");
        assert_eq!(
            FilePattern::migrations(&settings),
            FilePattern::Directory(PathBuf::from("/srv/app/migrations"))
        );

        settings.migrations.filename = Some("**/*.up.sql".to_string());
        assert_eq!(
            FilePattern::migrations(&settings),
            FilePattern::Glob("/srv/app/migrations/**/*.up.sql".to_string())
        );
    }
}
