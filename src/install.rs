//! Install and uninstall MCP servers across client config files.

use std::path::PathBuf;

use crate::backup::{BackupRecord, BackupStore};
use crate::clients::{ClientKind, ClientTable, DetectedClient};
use crate::config::{ConfigError, ConfigMutator, InstallOptions};
use crate::deps::{
    CommandLookup, DependencyError, DependencyValidator, InstallerTable, NativeLookup, Prompter,
    RemediationReport,
};
use crate::models::{ExecutionKind, ServerDefinition, ServerEntry};
use crate::params::{self, ParameterError, ParameterValues};
use crate::paths::Settings;
use crate::registry::{Registry, RegistryError};

/// Caller-supplied answers and switches for one install.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Parameter values by name. Missing names fall back to defaults.
    pub values: ParameterValues,
    /// Whether the prompter may be asked to install missing dependencies.
    pub interactive: bool,
    pub force: bool,
    pub backup: bool,
}

impl Default for InstallRequest {
    fn default() -> Self {
        Self {
            values: ParameterValues::new(),
            interactive: false,
            force: false,
            backup: true,
        }
    }
}

/// Result of touching one client's config file.
#[derive(Debug)]
pub struct ClientOutcome {
    pub client: ClientKind,
    pub config_path: Option<PathBuf>,
    pub result: Result<Option<BackupRecord>, InstallError>,
}

impl ClientOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug)]
pub struct InstallSummary {
    pub server: String,
    pub entry: ServerEntry,
    pub remediation: RemediationReport,
    pub outcomes: Vec<ClientOutcome>,
}

/// Ties the registry, client table and config mutation together.
pub struct Installer {
    registry: Registry,
    clients: ClientTable,
    installers: InstallerTable,
    lookup: Box<dyn CommandLookup>,
    backups: BackupStore,
}

impl Installer {
    /// Built-in clients and installers, real `which`/`where` lookups.
    pub fn new(settings: Settings) -> Self {
        let backups = BackupStore::new(settings.backup_dir());
        Self::with_parts(
            Registry::new(settings),
            ClientTable::builtin(),
            InstallerTable::builtin(),
            Box::new(NativeLookup),
            backups,
        )
    }

    pub fn with_parts(
        registry: Registry,
        clients: ClientTable,
        installers: InstallerTable,
        lookup: Box<dyn CommandLookup>,
        backups: BackupStore,
    ) -> Self {
        Self {
            registry,
            clients,
            installers,
            lookup,
            backups,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    pub fn detect_clients(&self) -> Vec<DetectedClient> {
        self.clients.installed(self.lookup.as_ref())
    }

    /// Whether each of `targets` already has `id` configured. Unreadable configs stay errors.
    pub fn installed_in(
        &self,
        id: &str,
        targets: &[ClientKind],
    ) -> Vec<(ClientKind, Result<bool, InstallError>)> {
        targets
            .iter()
            .map(|&kind| {
                let present = self.resolve_target(kind).and_then(|(mutator, path)| {
                    mutator.is_installed(&path, id).map_err(InstallError::from)
                });
                (kind, present)
            })
            .collect()
    }

    pub fn install(
        &self,
        id: &str,
        targets: &[ClientKind],
        request: &InstallRequest,
        prompter: &dyn Prompter,
    ) -> Result<InstallSummary, InstallError> {
        let server = self.registry.require_server(id)?;

        let validator = DependencyValidator::for_platform(
            self.lookup.as_ref(),
            &self.installers,
            self.clients.platform(),
        );
        let report = validator.check(&server);
        let remediation = if report.ok {
            RemediationReport::default()
        } else {
            validator.remediate(&report.missing, request.interactive, prompter)
        };
        let outstanding = remediation.outstanding();
        if !outstanding.is_empty() {
            return Err(InstallError::DependencyMissing(outstanding));
        }

        let values = params::collect(&server, |name, _| request.values.get(name).cloned())?;
        let entry = build_entry(&server, &values)?;
        tracing::debug!("Installing {} as {}", id, params::preview(&server, &values));

        let opts = InstallOptions {
            backup: request.backup,
            force: request.force,
        };
        let outcomes = self.apply(targets, |mutator, path| {
            mutator.install(path, id, &entry, opts).map_err(InstallError::from)
        });

        Ok(InstallSummary {
            server: server.id,
            entry,
            remediation,
            outcomes,
        })
    }

    pub fn uninstall(&self, id: &str, targets: &[ClientKind], backup: bool) -> Vec<ClientOutcome> {
        self.apply(targets, |mutator, path| {
            mutator.uninstall(path, id, backup).map_err(InstallError::from)
        })
    }

    fn resolve_target(&self, kind: ClientKind) -> Result<(ConfigMutator, PathBuf), InstallError> {
        let descriptor = self
            .clients
            .get(kind)
            .ok_or_else(|| InstallError::UnknownClient(kind.as_str().to_string()))?;
        let path = self
            .clients
            .config_path(descriptor)
            .ok_or_else(|| InstallError::NoConfigPath(kind.as_str().to_string()))?;
        Ok((
            ConfigMutator::for_client(descriptor, self.backups.clone()),
            path,
        ))
    }

    /// Run `op` once per distinct target, each on its own thread.
    fn apply<F>(&self, targets: &[ClientKind], op: F) -> Vec<ClientOutcome>
    where
        F: Fn(&ConfigMutator, &std::path::Path) -> Result<Option<BackupRecord>, InstallError>
            + Sync,
    {
        let mut distinct: Vec<ClientKind> = Vec::new();
        for &kind in targets {
            if !distinct.contains(&kind) {
                distinct.push(kind);
            }
        }

        let op = &op;
        std::thread::scope(|scope| {
            let handles: Vec<_> = distinct
                .into_iter()
                .map(|kind| {
                    let target = self.resolve_target(kind);
                    let handle = match target {
                        Ok((mutator, path)) => Ok(scope.spawn(move || {
                            let result = op(&mutator, &path);
                            (Some(path), result)
                        })),
                        Err(e) => Err(e),
                    };
                    (kind, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(client, handle)| match handle {
                    Ok(handle) => match handle.join() {
                        Ok((config_path, result)) => ClientOutcome {
                            client,
                            config_path,
                            result,
                        },
                        Err(_) => ClientOutcome {
                            client,
                            config_path: None,
                            result: Err(InstallError::WorkerPanicked(client.as_str().to_string())),
                        },
                    },
                    Err(e) => ClientOutcome {
                        client,
                        config_path: None,
                        result: Err(e),
                    },
                })
                .collect()
        })
    }
}

/// Config entry for `server` with `values` substituted.
pub fn build_entry(
    server: &ServerDefinition,
    values: &ParameterValues,
) -> Result<ServerEntry, InstallError> {
    let rendered = params::substitute(server, values);
    match server.kind {
        ExecutionKind::Local => {
            let command = rendered
                .command
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| InstallError::InvalidTemplate {
                    id: server.id.clone(),
                    reason: "local server has no command".to_string(),
                })?;
            Ok(ServerEntry::Local {
                command,
                args: rendered.args,
                env: rendered.env,
                cwd: None,
            })
        }
        ExecutionKind::Remote => {
            let url = rendered
                .url
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| InstallError::InvalidTemplate {
                    id: server.id.clone(),
                    reason: "remote server has no url".to_string(),
                })?;
            url::Url::parse(&url).map_err(|e| InstallError::InvalidTemplate {
                id: server.id.clone(),
                reason: format!("invalid url `{url}`: {e}"),
            })?;
            Ok(ServerEntry::Remote {
                url,
                transport: server
                    .installation
                    .transport
                    .clone()
                    .unwrap_or_else(|| "sse".to_string()),
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Missing dependencies: {}", format_missing(.0))]
    DependencyMissing(Vec<DependencyError>),
    #[error(transparent)]
    Parameters(#[from] ParameterError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid install template for '{id}': {reason}")]
    InvalidTemplate { id: String, reason: String },
    #[error("Unknown client: {0}")]
    UnknownClient(String),
    #[error("No config path for client {0} on this platform")]
    NoConfigPath(String),
    #[error("Config update for {0} panicked")]
    WorkerPanicked(String),
}

fn format_missing(errors: &[DependencyError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClientDescriptor;
    use crate::models::{InstallTemplate, Platform};
    use std::collections::BTreeMap;

    fn server(kind: ExecutionKind, installation: InstallTemplate) -> ServerDefinition {
        ServerDefinition {
            id: "demo".into(),
            name: "Demo".into(),
            description: String::new(),
            category: "uncategorized".into(),
            kind,
            auth_required: false,
            tags: vec![],
            parameters: BTreeMap::new(),
            installation,
            documentation: None,
            repository: None,
        }
    }

    #[test]
    fn local_entry_drops_empty_args() {
        let def = server(
            ExecutionKind::Local,
            InstallTemplate {
                command: Some("npx".into()),
                args: vec!["-y".into(), "{{missing}}".into()],
                ..Default::default()
            },
        );
        let entry = build_entry(&def, &ParameterValues::new()).unwrap();
        assert_eq!(
            entry,
            ServerEntry::Local {
                command: "npx".into(),
                args: vec!["-y".into()],
                env: BTreeMap::new(),
                cwd: None,
            }
        );
    }

    #[test]
    fn remote_entry_needs_a_parsable_url() {
        let mut values = ParameterValues::new();
        values.insert("host".into(), "mcp.example.com".into());
        let def = server(
            ExecutionKind::Remote,
            InstallTemplate {
                url: Some("https://{{host}}/sse".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            build_entry(&def, &values).unwrap(),
            ServerEntry::Remote {
                url: "https://mcp.example.com/sse".into(),
                transport: "sse".into(),
            }
        );

        let bad = server(ExecutionKind::Remote, InstallTemplate::default());
        assert!(matches!(
            build_entry(&bad, &values),
            Err(InstallError::InvalidTemplate { .. })
        ));
    }

    fn cursor_only(temp: &std::path::Path) -> Installer {
        let settings = Settings::in_dir(temp);
        let cursor = ClientDescriptor {
            kind: ClientKind::Cursor,
            display_name: "Cursor",
            config_candidates: vec![(
                Platform::Linux,
                vec![temp.join("mcp.json").to_string_lossy().into_owned()],
            )],
            detect_dirs: vec![],
            detect_command: None,
            servers_key: "mcpServers",
        };
        Installer::with_parts(
            Registry::new(settings.clone()),
            ClientTable::new(vec![cursor], Platform::Linux),
            InstallerTable::builtin(),
            Box::new(NativeLookup),
            BackupStore::new(settings.backup_dir()),
        )
    }

    #[test]
    fn unreadable_config_is_not_reported_as_absent() {
        let temp = tempfile::tempdir().unwrap();
        let installer = cursor_only(temp.path());
        std::fs::write(
            temp.path().join("mcp.json"),
            r#"{ "mcpServers": { "fs": { "command": "npx" } }, }"#,
        )
        .unwrap();

        let status = installer.installed_in("fs", &[ClientKind::Cursor, ClientKind::Zed]);
        assert!(matches!(
            status[0],
            (ClientKind::Cursor, Err(InstallError::Config(ConfigError::Parse { .. })))
        ));
        assert!(matches!(
            status[1],
            (ClientKind::Zed, Err(InstallError::UnknownClient(_)))
        ));

        std::fs::write(temp.path().join("mcp.json"), r#"{ "mcpServers": {} }"#).unwrap();
        let status = installer.installed_in("fs", &[ClientKind::Cursor]);
        assert!(matches!(status[0], (ClientKind::Cursor, Ok(false))));
    }

    #[test]
    fn unknown_targets_are_reported_per_client() {
        let temp = tempfile::tempdir().unwrap();
        let installer = cursor_only(temp.path());

        let outcomes = installer.uninstall("demo", &[ClientKind::Zed, ClientKind::Cursor], true);
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(
            outcomes[0].result,
            Err(InstallError::UnknownClient(_))
        ));
        assert!(matches!(
            outcomes[1].result,
            Err(InstallError::Config(ConfigError::NotInstalled { .. }))
        ));
    }
}
