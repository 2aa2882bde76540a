//! Per-user locations and registry settings.
//!
//! Uses env vars when set, otherwise platform defaults from `dirs`.

use std::path::{Path, PathBuf};

/// Registry endpoint used when `MCP_SETUP_REGISTRY_URL` is not set.
pub const DEFAULT_REGISTRY_URL: &str =
    "https://raw.githubusercontent.com/mcp-setup/registry/main/registry.json";

/// Resolved locations and switches shared by every component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_path: PathBuf,
    pub backup_dir: PathBuf,
    pub bundled_registry: Option<PathBuf>,
    pub registry_url: String,
    /// Serve the bundled snapshot before consulting cache or network.
    pub use_bundled: bool,
}

impl Settings {
    /// Resolve settings from environment, falling back to platform defaults.
    pub fn resolve() -> Self {
        let cache_path = resolve_path(
            "MCP_SETUP_CACHE_PATH",
            dirs::cache_dir().map(|p| p.join("mcp-setup/registry.json")),
            "~/.cache/mcp-setup/registry.json",
        );
        let backup_dir = resolve_path(
            "MCP_SETUP_BACKUP_DIR",
            dirs::data_local_dir().map(|p| p.join("mcp-setup/backups")),
            "~/.local/share/mcp-setup/backups",
        );
        let bundled_registry = env_value("MCP_SETUP_BUNDLED_REGISTRY").map(|v| expand_tilde(&v));
        let registry_url =
            env_value("MCP_SETUP_REGISTRY_URL").unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string());
        let use_bundled = env_value("MCP_SETUP_USE_BUNDLED")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            cache_path,
            backup_dir,
            bundled_registry,
            registry_url,
            use_bundled,
        }
    }

    /// Settings rooted in one directory. Network and bundled layers are left to the caller.
    pub fn in_dir(base: &Path) -> Self {
        Self {
            cache_path: base.join("cache/registry.json"),
            backup_dir: base.join("backups"),
            bundled_registry: None,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            use_bundled: false,
        }
    }

    /// Local registry cache file.
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Directory that receives config backups.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }
}

fn env_value(name: &str) -> Option<String> {
    let val = std::env::var(name).ok()?;
    let trimmed = val.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn resolve_path(env_var: &str, platform_default: Option<PathBuf>, fallback: &str) -> PathBuf {
    if let Some(val) = env_value(env_var) {
        return expand_tilde(&val);
    }
    platform_default.unwrap_or_else(|| expand_tilde(fallback))
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_overrides_win() {
        std::env::set_var("MCP_SETUP_CACHE_PATH", "/tmp/mcp-setup-test/cache.json");
        std::env::set_var("MCP_SETUP_USE_BUNDLED", "TRUE");
        std::env::set_var("MCP_SETUP_REGISTRY_URL", "  ");
        let settings = Settings::resolve();
        std::env::remove_var("MCP_SETUP_CACHE_PATH");
        std::env::remove_var("MCP_SETUP_USE_BUNDLED");
        std::env::remove_var("MCP_SETUP_REGISTRY_URL");

        assert_eq!(settings.cache_path(), Path::new("/tmp/mcp-setup-test/cache.json"));
        assert!(settings.use_bundled);
        assert_eq!(settings.registry_url, DEFAULT_REGISTRY_URL);
    }

    #[test]
    #[serial]
    fn tilde_is_expanded() {
        std::env::set_var("MCP_SETUP_BACKUP_DIR", "~/backups");
        let settings = Settings::resolve();
        std::env::remove_var("MCP_SETUP_BACKUP_DIR");

        assert!(!settings.backup_dir().to_string_lossy().starts_with('~'));
        assert!(settings.backup_dir().ends_with("backups"));
    }
}
