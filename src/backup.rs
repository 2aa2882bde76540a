//! Timestamped copies of client config files taken before each write.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

const BACKUP_SUFFIX: &str = ".backup";

/// One backup on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupRecord {
    pub timestamp: DateTime<Utc>,
    /// Best-effort guess from the path. Bookkeeping only.
    pub client: String,
    pub original: PathBuf,
    pub backup: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Cannot back up {}: file does not exist", .0.display())]
    SourceMissing(PathBuf),
    #[error("Failed to back up {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
}

/// Per-user backup directory.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `path` into the backup directory. Backups are never removed here.
    pub fn backup(&self, path: &Path) -> Result<BackupRecord, BackupError> {
        if !path.is_file() {
            return Err(BackupError::SourceMissing(path.to_path_buf()));
        }
        let io_err = |source| BackupError::Io {
            path: path.to_path_buf(),
            source,
        };

        let absolute = std::path::absolute(path).map_err(io_err)?;
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;

        let timestamp = Utc::now();
        let stem = format!(
            "{}_{}",
            sanitize(&absolute),
            timestamp.format("%Y-%m-%dT%H-%M-%S-%3fZ")
        );
        let mut backup = self.dir.join(format!("{stem}{BACKUP_SUFFIX}"));
        let mut n = 1;
        while backup.exists() {
            backup = self.dir.join(format!("{stem}-{n}{BACKUP_SUFFIX}"));
            n += 1;
        }

        std::fs::copy(path, &backup).map_err(io_err)?;
        let record = BackupRecord {
            timestamp,
            client: infer_client(&absolute).to_string(),
            original: absolute,
            backup,
        };
        tracing::info!(
            "Backed up {} to {}",
            record.original.display(),
            record.backup.display()
        );
        Ok(record)
    }

    /// Backup files currently in the directory, oldest first by name.
    pub fn list(&self) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(BACKUP_SUFFIX))
                })
                .collect(),
            Err(_) => vec![],
        };
        found.sort();
        found
    }
}

/// Path separators and drive colons become `_`.
pub fn sanitize(path: &Path) -> String {
    path.to_string_lossy()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches('_')
        .to_string()
}

/// Guess which client owns a config path.
pub fn infer_client(path: &Path) -> &'static str {
    let p = path.to_string_lossy().to_lowercase().replace('\\', "/");
    if p.contains("claude_desktop_config") || p.contains("/claude/") {
        "claude-desktop"
    } else if p.contains(".claude.json") {
        "claude-code"
    } else if p.contains(".cursor") {
        "cursor"
    } else if p.contains("windsurf") || p.contains(".codeium") {
        "windsurf"
    } else if p.contains("/code/") || p.contains("code - insiders") || p.contains("vscode") {
        "vscode"
    } else if p.contains("/zed/") {
        "zed"
    } else {
        "unknown"
    }
}
