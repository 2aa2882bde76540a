//! Read-modify-write of one client's config file.
//!
//! Works on raw JSON so every field outside the managed key survives untouched.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::backup::{BackupError, BackupRecord, BackupStore};
use crate::clients::ClientDescriptor;
use crate::models::ServerEntry;

/// Parsed client config: the whole top-level object plus which key holds servers.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfigDocument {
    servers_key: String,
    root: Map<String, Value>,
}

impl ClientConfigDocument {
    pub fn empty(servers_key: &str) -> Self {
        let mut root = Map::new();
        root.insert(servers_key.to_string(), Value::Object(Map::new()));
        Self {
            servers_key: servers_key.to_string(),
            root,
        }
    }

    pub fn servers_key(&self) -> &str {
        &self.servers_key
    }

    /// Managed entries. A missing or non-object key reads as empty.
    pub fn servers(&self) -> Map<String, Value> {
        self.root
            .get(&self.servers_key)
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.root
            .get(&self.servers_key)
            .and_then(|v| v.as_object())
            .is_some_and(|s| s.contains_key(id))
    }

    fn servers_mut(&mut self) -> &mut Map<String, Value> {
        let slot = self
            .root
            .entry(self.servers_key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(map) => map,
            _ => unreachable!("slot was just made an object"),
        }
    }

    pub fn set(&mut self, id: &str, entry: Value) {
        self.servers_mut().insert(id.to_string(), entry);
    }

    pub fn remove(&mut self, id: &str) -> Option<Value> {
        self.servers_mut().shift_remove(id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InstallOptions {
    pub backup: bool,
    pub force: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            backup: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn into_result(self, path: &Path) -> Result<Vec<String>, ConfigError> {
        if self.valid {
            Ok(self.warnings)
        } else {
            Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                errors: self.errors,
            })
        }
    }
}

/// Edits config files of one client family.
#[derive(Debug, Clone)]
pub struct ConfigMutator {
    servers_key: String,
    backups: BackupStore,
}

impl ConfigMutator {
    pub fn new(servers_key: &str, backups: BackupStore) -> Self {
        Self {
            servers_key: servers_key.to_string(),
            backups,
        }
    }

    pub fn for_client(client: &ClientDescriptor, backups: BackupStore) -> Self {
        Self::new(client.servers_key, backups)
    }

    pub fn servers_key(&self) -> &str {
        &self.servers_key
    }

    /// Missing file reads as an empty document.
    pub fn read(&self, path: &Path) -> Result<ClientConfigDocument, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ClientConfigDocument::empty(&self.servers_key))
            }
            Err(e) => return Err(ConfigError::read(path, e)),
        };
        if content.trim().is_empty() {
            return Ok(ClientConfigDocument::empty(&self.servers_key));
        }

        let value: Value = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        match value {
            Value::Object(root) => Ok(ClientConfigDocument {
                servers_key: self.servers_key.clone(),
                root,
            }),
            _ => Err(ConfigError::NotAnObject(path.to_path_buf())),
        }
    }

    /// Pretty JSON with trailing newline, via a synced sibling temp file and rename.
    ///
    /// A symlinked config is written through to its target. Existing permissions are kept.
    pub fn write(&self, path: &Path, doc: &ClientConfigDocument) -> Result<(), ConfigError> {
        use std::io::Write;

        let target = match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                std::fs::canonicalize(path).map_err(|e| ConfigError::write(path, e))?
            }
            _ => path.to_path_buf(),
        };
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::write(path, e))?;
        }
        let mut output =
            serde_json::to_string_pretty(&doc.root).map_err(ConfigError::Serialize)?;
        output.push('\n');

        let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(format!(".{}.tmp", std::process::id()));
        let tmp = target.with_file_name(tmp_name);

        let written = (|| -> std::io::Result<()> {
            {
                let mut file = std::fs::File::create(&tmp)?;
                file.write_all(output.as_bytes())?;
                file.sync_all()?;
            }
            if let Ok(meta) = std::fs::metadata(&target) {
                std::fs::set_permissions(&tmp, meta.permissions())?;
            }
            std::fs::rename(&tmp, &target)
        })();
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(ConfigError::write(path, e));
        }
        Ok(())
    }

    pub fn is_installed(&self, path: &Path, id: &str) -> Result<bool, ConfigError> {
        Ok(self.read(path)?.contains(id))
    }

    pub fn list_entries(&self, path: &Path) -> Result<Map<String, Value>, ConfigError> {
        Ok(self.read(path)?.servers())
    }

    /// Add `id`. Returns the backup taken, if any. The entry's shape is not checked here.
    pub fn install(
        &self,
        path: &Path,
        id: &str,
        entry: &ServerEntry,
        opts: InstallOptions,
    ) -> Result<Option<BackupRecord>, ConfigError> {
        let mut doc = self.read(path)?;
        if doc.contains(id) && !opts.force {
            return Err(ConfigError::AlreadyInstalled {
                id: id.to_string(),
                path: path.to_path_buf(),
            });
        }

        let record = self.backup_if_present(path, opts.backup)?;
        doc.set(id, entry.to_value());
        self.write(path, &doc)?;
        tracing::info!("Installed {} into {}", id, path.display());
        Ok(record)
    }

    pub fn uninstall(
        &self,
        path: &Path,
        id: &str,
        backup: bool,
    ) -> Result<Option<BackupRecord>, ConfigError> {
        let mut doc = self.read(path)?;
        if !doc.contains(id) {
            return Err(ConfigError::NotInstalled {
                id: id.to_string(),
                path: path.to_path_buf(),
            });
        }

        let record = self.backup_if_present(path, backup)?;
        doc.remove(id);
        self.write(path, &doc)?;
        tracing::info!("Removed {} from {}", id, path.display());
        Ok(record)
    }

    pub fn backup(&self, path: &Path) -> Result<BackupRecord, BackupError> {
        self.backups.backup(path)
    }

    fn backup_if_present(
        &self,
        path: &Path,
        enabled: bool,
    ) -> Result<Option<BackupRecord>, ConfigError> {
        if !enabled || !path.exists() {
            return Ok(None);
        }
        Ok(Some(self.backups.backup(path)?))
    }

    /// Check every managed entry's shape.
    pub fn validate(&self, path: &Path) -> Result<ValidationReport, ConfigError> {
        let doc = self.read(path)?;
        let mut report = ValidationReport::default();

        if let Some(value) = doc.root.get(&self.servers_key) {
            if !value.is_object() {
                report
                    .errors
                    .push(format!("`{}` must be an object", self.servers_key));
            }
        }

        for (id, entry) in doc.servers() {
            validate_entry(&id, &entry, &mut report);
        }
        report.valid = report.errors.is_empty();
        Ok(report)
    }
}

fn env_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env placeholder regex")
    })
}

fn validate_entry(id: &str, entry: &Value, report: &mut ValidationReport) {
    let Some(obj) = entry.as_object() else {
        report.errors.push(format!("{id}: entry must be an object"));
        return;
    };

    match (obj.get("command"), obj.get("url")) {
        (Some(_), Some(_)) => report
            .errors
            .push(format!("{id}: cannot have both `command` and `url`")),
        (None, None) => report
            .errors
            .push(format!("{id}: must have either `command` or `url`")),
        (Some(command), None) => {
            if !command.as_str().is_some_and(|c| !c.trim().is_empty()) {
                report
                    .errors
                    .push(format!("{id}: `command` must be a non-empty string"));
            }
        }
        (None, Some(url)) => match url.as_str() {
            Some(u) => {
                if let Err(e) = url::Url::parse(u) {
                    report.errors.push(format!("{id}: invalid url `{u}`: {e}"));
                }
            }
            None => report.errors.push(format!("{id}: `url` must be a string")),
        },
    }

    if let Some(args) = obj.get("args") {
        let ok = args
            .as_array()
            .is_some_and(|a| a.iter().all(Value::is_string));
        if !ok {
            report
                .errors
                .push(format!("{id}: `args` must be an array of strings"));
        }
    }

    if let Some(env) = obj.get("env") {
        match env.as_object() {
            Some(vars) => {
                for (key, value) in vars {
                    let Some(text) = value.as_str() else {
                        report
                            .errors
                            .push(format!("{id}: env `{key}` must be a string"));
                        continue;
                    };
                    for caps in env_placeholder().captures_iter(text) {
                        let var = &caps[1];
                        if std::env::var_os(var).is_none() {
                            report.warnings.push(format!(
                                "{id}: env `{key}` references unset variable ${{{var}}}"
                            ));
                        }
                    }
                }
            }
            None => report
                .errors
                .push(format!("{id}: `env` must be an object of strings")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Server '{id}' is already installed in {}", path.display())]
    AlreadyInstalled { id: String, path: PathBuf },
    #[error("Server '{id}' is not installed in {}", path.display())]
    NotInstalled { id: String, path: PathBuf },
    #[error("Invalid config {}: {}", path.display(), errors.join("; "))]
    Invalid { path: PathBuf, errors: Vec<String> },
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{} does not contain a JSON object", .0.display())]
    NotAnObject(PathBuf),
    #[error("Failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("Failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: std::io::Error },
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
    #[error(transparent)]
    Backup(#[from] BackupError),
}

impl ConfigError {
    fn read(path: &Path, source: std::io::Error) -> Self {
        ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    fn write(path: &Path, source: std::io::Error) -> Self {
        ConfigError::Write {
            path: path.to_path_buf(),
            source,
        }
    }
}
