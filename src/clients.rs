//! Supported client applications and where they keep their MCP config.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::deps::CommandLookup;
use crate::models::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientKind {
    ClaudeDesktop,
    ClaudeCode,
    Cursor,
    Windsurf,
    VsCode,
    Zed,
}

impl ClientKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientKind::ClaudeDesktop => "claude-desktop",
            ClientKind::ClaudeCode => "claude-code",
            ClientKind::Cursor => "cursor",
            ClientKind::Windsurf => "windsurf",
            ClientKind::VsCode => "vscode",
            ClientKind::Zed => "zed",
        }
    }
}

impl std::str::FromStr for ClientKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "claude-desktop" | "claude" => Ok(Self::ClaudeDesktop),
            "claude-code" => Ok(Self::ClaudeCode),
            "cursor" => Ok(Self::Cursor),
            "windsurf" => Ok(Self::Windsurf),
            "vscode" | "code" => Ok(Self::VsCode),
            "zed" => Ok(Self::Zed),
            other => Err(format!("unsupported client: {other}")),
        }
    }
}

/// Static description of one client application.
#[derive(Debug, Clone)]
pub struct ClientDescriptor {
    pub kind: ClientKind,
    pub display_name: &'static str,
    /// Candidate config files per platform, in preference order. `~` and `$VAR` are expanded.
    pub config_candidates: Vec<(Platform, Vec<String>)>,
    /// Directories only this client creates. Any of them existing counts as installed.
    pub detect_dirs: Vec<(Platform, Vec<String>)>,
    pub detect_command: Option<&'static str>,
    /// Top-level key holding the managed server entries.
    pub servers_key: &'static str,
}

impl ClientDescriptor {
    /// Expanded candidate paths for the given platform.
    pub fn candidates(&self, platform: Platform) -> Vec<PathBuf> {
        expand_for(&self.config_candidates, platform)
    }

    pub fn detect_dirs(&self, platform: Platform) -> Vec<PathBuf> {
        expand_for(&self.detect_dirs, platform)
    }

    /// First existing candidate, else the first candidate as creation target.
    pub fn config_path(&self, platform: Platform) -> Option<PathBuf> {
        let candidates = self.candidates(platform);
        candidates
            .iter()
            .find(|p| p.exists())
            .or_else(|| candidates.first())
            .cloned()
    }
}

fn paths(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|p| p.to_string()).collect()
}

fn expand_for(table: &[(Platform, Vec<String>)], platform: Platform) -> Vec<PathBuf> {
    table
        .iter()
        .filter(|(p, _)| *p == platform)
        .flat_map(|(_, paths)| paths.iter())
        .filter_map(|raw| expand(raw))
        .collect()
}

fn expand(raw: &str) -> Option<PathBuf> {
    match shellexpand::full(raw) {
        Ok(expanded) => Some(PathBuf::from(expanded.as_ref())),
        Err(e) => {
            tracing::debug!("Skipping config candidate {}: {}", raw, e);
            None
        }
    }
}

/// A client found on this system.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedClient {
    pub kind: ClientKind,
    pub name: String,
    pub installed: bool,
    pub config_path: Option<PathBuf>,
    pub config_exists: bool,
}

/// Immutable table of supported clients. Build once and pass by reference.
#[derive(Debug, Clone)]
pub struct ClientTable {
    descriptors: Vec<ClientDescriptor>,
    platform: Platform,
}

impl ClientTable {
    pub fn new(descriptors: Vec<ClientDescriptor>, platform: Platform) -> Self {
        Self {
            descriptors,
            platform,
        }
    }

    pub fn builtin() -> Self {
        use Platform::{Linux, MacOs, Windows};

        let descriptors = vec![
            ClientDescriptor {
                kind: ClientKind::ClaudeDesktop,
                display_name: "Claude Desktop",
                config_candidates: vec![
                    (
                        MacOs,
                        paths(&["~/Library/Application Support/Claude/claude_desktop_config.json"]),
                    ),
                    (Windows, paths(&["$APPDATA/Claude/claude_desktop_config.json"])),
                    (Linux, paths(&["~/.config/Claude/claude_desktop_config.json"])),
                ],
                detect_dirs: vec![
                    (MacOs, paths(&["~/Library/Application Support/Claude"])),
                    (Windows, paths(&["$APPDATA/Claude"])),
                    (Linux, paths(&["~/.config/Claude"])),
                ],
                detect_command: None,
                servers_key: "mcpServers",
            },
            ClientDescriptor {
                kind: ClientKind::ClaudeCode,
                display_name: "Claude Code",
                config_candidates: vec![
                    (MacOs, paths(&["~/.claude.json"])),
                    (Windows, paths(&["$USERPROFILE/.claude.json"])),
                    (Linux, paths(&["~/.claude.json"])),
                ],
                detect_dirs: vec![
                    (MacOs, paths(&["~/.claude"])),
                    (Windows, paths(&["$USERPROFILE/.claude"])),
                    (Linux, paths(&["~/.claude"])),
                ],
                detect_command: Some("claude"),
                servers_key: "mcpServers",
            },
            ClientDescriptor {
                kind: ClientKind::Cursor,
                display_name: "Cursor",
                config_candidates: vec![
                    (MacOs, paths(&["~/.cursor/mcp.json"])),
                    (Windows, paths(&["$USERPROFILE/.cursor/mcp.json"])),
                    (Linux, paths(&["~/.cursor/mcp.json"])),
                ],
                detect_dirs: vec![
                    (MacOs, paths(&["~/.cursor"])),
                    (Windows, paths(&["$USERPROFILE/.cursor"])),
                    (Linux, paths(&["~/.cursor"])),
                ],
                detect_command: Some("cursor"),
                servers_key: "mcpServers",
            },
            ClientDescriptor {
                kind: ClientKind::Windsurf,
                display_name: "Windsurf",
                config_candidates: vec![
                    (MacOs, paths(&["~/.codeium/windsurf/mcp_config.json"])),
                    (Windows, paths(&["$USERPROFILE/.codeium/windsurf/mcp_config.json"])),
                    (Linux, paths(&["~/.codeium/windsurf/mcp_config.json"])),
                ],
                detect_dirs: vec![
                    (MacOs, paths(&["~/.codeium/windsurf"])),
                    (Windows, paths(&["$USERPROFILE/.codeium/windsurf"])),
                    (Linux, paths(&["~/.codeium/windsurf"])),
                ],
                detect_command: Some("windsurf"),
                servers_key: "mcpServers",
            },
            ClientDescriptor {
                kind: ClientKind::VsCode,
                display_name: "VS Code",
                config_candidates: vec![
                    (
                        MacOs,
                        paths(&[
                            "~/Library/Application Support/Code/User/mcp.json",
                            "~/Library/Application Support/Code - Insiders/User/mcp.json",
                        ]),
                    ),
                    (
                        Windows,
                        paths(&[
                            "$APPDATA/Code/User/mcp.json",
                            "$APPDATA/Code - Insiders/User/mcp.json",
                        ]),
                    ),
                    (
                        Linux,
                        paths(&[
                            "~/.config/Code/User/mcp.json",
                            "~/.config/Code - Insiders/User/mcp.json",
                        ]),
                    ),
                ],
                detect_dirs: vec![
                    (
                        MacOs,
                        paths(&[
                            "~/Library/Application Support/Code",
                            "~/Library/Application Support/Code - Insiders",
                        ]),
                    ),
                    (Windows, paths(&["$APPDATA/Code", "$APPDATA/Code - Insiders"])),
                    (Linux, paths(&["~/.config/Code", "~/.config/Code - Insiders"])),
                ],
                detect_command: Some("code"),
                servers_key: "servers",
            },
            // Zed's settings.json is commonly JSONC. Files with comments or
            // trailing commas fail to read with ConfigError::Parse and are left untouched.
            ClientDescriptor {
                kind: ClientKind::Zed,
                display_name: "Zed",
                config_candidates: vec![
                    (MacOs, paths(&["~/.config/zed/settings.json"])),
                    (Windows, paths(&["$APPDATA/Zed/settings.json"])),
                    (Linux, paths(&["~/.config/zed/settings.json"])),
                ],
                detect_dirs: vec![
                    (MacOs, paths(&["~/.config/zed"])),
                    (Windows, paths(&["$APPDATA/Zed"])),
                    (Linux, paths(&["~/.config/zed"])),
                ],
                detect_command: Some("zed"),
                servers_key: "context_servers",
            },
        ];

        Self::new(descriptors, Platform::current())
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn descriptors(&self) -> &[ClientDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, kind: ClientKind) -> Option<&ClientDescriptor> {
        self.descriptors.iter().find(|d| d.kind == kind)
    }

    /// Config file to read or create for a client on this platform.
    pub fn config_path(&self, descriptor: &ClientDescriptor) -> Option<PathBuf> {
        descriptor.config_path(self.platform)
    }

    /// Report install state for every known client.
    pub fn detect(&self, lookup: &dyn CommandLookup) -> Vec<DetectedClient> {
        self.descriptors
            .iter()
            .map(|d| {
                let config_path = self.config_path(d);
                let config_exists = config_path.as_deref().is_some_and(Path::exists);
                let dir_exists = d.detect_dirs(self.platform).iter().any(|p| p.is_dir());
                let installed = config_exists
                    || dir_exists
                    || d.detect_command.is_some_and(|cmd| lookup.exists(cmd));
                tracing::debug!(
                    "Client {}: installed={} config={:?}",
                    d.kind.as_str(),
                    installed,
                    config_path
                );
                DetectedClient {
                    kind: d.kind,
                    name: d.display_name.to_string(),
                    installed,
                    config_path,
                    config_exists,
                }
            })
            .collect()
    }

    /// Installed clients only.
    pub fn installed(&self, lookup: &dyn CommandLookup) -> Vec<DetectedClient> {
        self.detect(lookup).into_iter().filter(|c| c.installed).collect()
    }
}
