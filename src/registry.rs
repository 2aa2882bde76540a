//! Server catalog resolution: bundled snapshot, local cache, remote registry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Catalog, ServerDefinition};
use crate::paths::Settings;

/// Maximum age of the local cache before the remote registry is consulted.
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

fn build_http_client() -> Result<reqwest::blocking::Client, reqwest::Error> {
    reqwest::blocking::Client::builder()
        .user_agent(concat!("mcp-setup/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(30))
        .build()
}

/// One layer of the resolution chain, tried in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Bundled(PathBuf),
    Cached(PathBuf),
    Remote(String),
    /// Degraded result once the remote registry has failed.
    ExpiredCache(PathBuf),
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Bundled(p) => write!(f, "bundled registry {}", p.display()),
            Source::Cached(p) => write!(f, "cache {}", p.display()),
            Source::Remote(url) => write!(f, "remote registry {}", url),
            Source::ExpiredCache(p) => write!(f, "expired cache {}", p.display()),
        }
    }
}

/// Cached payload with its fetch time and freshness window.
#[derive(Debug, Clone)]
pub struct CacheEnvelope {
    pub catalog: Catalog,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEnvelope {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or_default()
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.age(now) <= self.ttl
    }
}

/// Sidecar written next to the cache file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheMeta {
    fetched_at: DateTime<Utc>,
    ttl_hours: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub exists: bool,
    pub path: PathBuf,
    pub age_hours: Option<f64>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogStats {
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_auth_required: AuthBreakdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthBreakdown {
    pub required: usize,
    pub not_required: usize,
}

impl Catalog {
    pub fn get(&self, id: &str) -> Option<&ServerDefinition> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Case-insensitive substring match over name, description and tags.
    pub fn search(&self, query: &str) -> Vec<ServerDefinition> {
        let needle = query.trim().to_lowercase();
        self.servers
            .iter()
            .filter(|s| {
                s.name.to_lowercase().contains(&needle)
                    || s.description.to_lowercase().contains(&needle)
                    || s.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> CatalogStats {
        let mut stats = CatalogStats {
            total: self.servers.len(),
            ..Default::default()
        };
        for server in &self.servers {
            *stats.by_category.entry(server.category.clone()).or_default() += 1;
            if server.auth_required {
                stats.by_auth_required.required += 1;
            } else {
                stats.by_auth_required.not_required += 1;
            }
        }
        stats
    }
}

/// Memoizing catalog loader.
#[derive(Debug)]
pub struct Registry {
    settings: Settings,
    catalog: Mutex<Option<Arc<Catalog>>>,
}

impl Registry {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            catalog: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Load the catalog once per registry instance; later calls return the same catalog.
    pub fn load(&self) -> Result<Arc<Catalog>, RegistryError> {
        let mut guard = self.catalog.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(catalog) = guard.as_ref() {
            return Ok(Arc::clone(catalog));
        }
        let catalog = Arc::new(self.resolve(false)?);
        *guard = Some(Arc::clone(&catalog));
        Ok(catalog)
    }

    /// Re-resolve and replace the memoized catalog. `force` skips bundled and fresh-cache layers.
    pub fn refresh(&self, force: bool) -> Result<Arc<Catalog>, RegistryError> {
        let catalog = Arc::new(self.resolve(force)?);
        let mut guard = self.catalog.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::clone(&catalog));
        Ok(catalog)
    }

    pub fn get_server(&self, id: &str) -> Result<Option<ServerDefinition>, RegistryError> {
        Ok(self.load()?.get(id).cloned())
    }

    pub fn require_server(&self, id: &str) -> Result<ServerDefinition, RegistryError> {
        self.get_server(id)?
            .ok_or_else(|| RegistryError::ServerNotFound(id.to_string()))
    }

    pub fn search(&self, query: &str) -> Result<Vec<ServerDefinition>, RegistryError> {
        Ok(self.load()?.search(query))
    }

    pub fn stats(&self) -> Result<CatalogStats, RegistryError> {
        Ok(self.load()?.stats())
    }

    pub fn cache_info(&self) -> CacheInfo {
        let path = self.settings.cache_path().to_path_buf();
        let meta = std::fs::metadata(&path).ok();
        CacheInfo {
            exists: meta.is_some(),
            age_hours: cache_age(&path).map(|d| d.as_secs_f64() / 3600.0),
            size_bytes: meta.map(|m| m.len()).unwrap_or(0),
            path,
        }
    }

    /// Layers to try, in order.
    pub fn sources(&self, force: bool) -> Vec<Source> {
        let cache = self.settings.cache_path().to_path_buf();
        let mut sources = Vec::new();
        if !force && self.settings.use_bundled {
            if let Some(bundled) = &self.settings.bundled_registry {
                sources.push(Source::Bundled(bundled.clone()));
            }
        }
        if !force {
            sources.push(Source::Cached(cache.clone()));
        }
        sources.push(Source::Remote(self.settings.registry_url.clone()));
        sources.push(Source::ExpiredCache(cache));
        sources
    }

    fn resolve(&self, force: bool) -> Result<Catalog, RegistryError> {
        let mut last_error = None;
        for source in self.sources(force) {
            match self.try_source(&source, force) {
                Ok(Some(catalog)) => {
                    tracing::info!("Loaded {} servers from {}", catalog.servers.len(), source);
                    return Ok(catalog);
                }
                Ok(None) => tracing::debug!("Skipping {}", source),
                Err(e) => {
                    tracing::warn!("Rejected {}: {}", source, e);
                    last_error = Some(e);
                }
            }
        }
        Err(RegistryError::Unavailable {
            source: Box::new(last_error.unwrap_or(SourceError::Exhausted)),
        })
    }

    fn try_source(&self, source: &Source, force: bool) -> Result<Option<Catalog>, SourceError> {
        let now = Utc::now();
        match source {
            Source::Bundled(path) => {
                if !path.exists() {
                    return Ok(None);
                }
                read_payload(path).map(Some)
            }
            Source::Cached(path) => match read_cache(path)? {
                Some(envelope) if envelope.is_fresh(now) => Ok(Some(envelope.catalog)),
                _ => Ok(None),
            },
            Source::Remote(url) => {
                let catalog = fetch_remote(url)?;
                if let Err(e) = write_cache(self.settings.cache_path(), &catalog, now) {
                    tracing::warn!("Failed to update registry cache: {}", e);
                }
                Ok(Some(catalog))
            }
            Source::ExpiredCache(path) => {
                let stale = cache_age(path).is_some_and(|age| age > CACHE_TTL);
                if !path.exists() || !(stale || force) {
                    return Ok(None);
                }
                read_cache(path).map(|e| e.map(|e| e.catalog))
            }
        }
    }
}

fn fetch_remote(url: &str) -> Result<Catalog, SourceError> {
    let client = build_http_client().map_err(SourceError::HttpClient)?;
    let fetch_err = |e| SourceError::Fetch {
        url: url.to_string(),
        source: e,
    };
    let resp = client.get(url).send().map_err(fetch_err)?;
    let resp = resp.error_for_status().map_err(fetch_err)?;
    let body = resp.text().map_err(fetch_err)?;
    parse_payload(&body, url)
}

fn read_payload(path: &Path) -> Result<Catalog, SourceError> {
    let content = std::fs::read_to_string(path).map_err(|e| SourceError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_payload(&content, &path.display().to_string())
}

/// Structural check: a non-empty `servers` array whose items are server definitions.
pub fn parse_payload(content: &str, origin: &str) -> Result<Catalog, SourceError> {
    let invalid = |reason: String| SourceError::Invalid {
        origin: origin.to_string(),
        reason,
    };
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;
    match value.get("servers").and_then(|s| s.as_array()) {
        Some(servers) if !servers.is_empty() => {}
        Some(_) => return Err(invalid("servers list is empty".to_string())),
        None => return Err(invalid("missing servers list".to_string())),
    }
    serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
}

fn meta_path(cache: &Path) -> PathBuf {
    cache.with_extension("meta.json")
}

fn read_meta(cache: &Path) -> Option<CacheMeta> {
    let content = std::fs::read_to_string(meta_path(cache)).ok()?;
    serde_json::from_str(&content).ok()
}

/// Cache age from the sidecar, else from the file's modification time. None without a cache file.
fn cache_age(cache: &Path) -> Option<Duration> {
    if !cache.is_file() {
        return None;
    }
    if let Some(meta) = read_meta(cache) {
        return (Utc::now() - meta.fetched_at).to_std().ok().or(Some(Duration::ZERO));
    }
    let modified = std::fs::metadata(cache).and_then(|m| m.modified()).ok()?;
    Some(SystemTime::now().duration_since(modified).unwrap_or_default())
}

pub fn read_cache(cache: &Path) -> Result<Option<CacheEnvelope>, SourceError> {
    if !cache.exists() {
        return Ok(None);
    }
    let catalog = read_payload(cache)?;
    let fetched_at = match read_meta(cache) {
        Some(meta) => meta.fetched_at,
        None => {
            let age = cache_age(cache).unwrap_or_default();
            Utc::now() - chrono::Duration::from_std(age).unwrap_or(chrono::Duration::zero())
        }
    };
    Ok(Some(CacheEnvelope {
        catalog,
        fetched_at,
        ttl: CACHE_TTL,
    }))
}

pub fn write_cache(
    cache: &Path,
    catalog: &Catalog,
    fetched_at: DateTime<Utc>,
) -> std::io::Result<()> {
    if let Some(parent) = cache.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let payload = serde_json::to_string_pretty(catalog)?;
    std::fs::write(cache, payload)?;
    let meta = CacheMeta {
        fetched_at,
        ttl_hours: CACHE_TTL.as_secs() / 3600,
    };
    std::fs::write(meta_path(cache), serde_json::to_string_pretty(&meta)?)?;
    tracing::debug!("Wrote registry cache {}", cache.display());
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry unavailable: {source}")]
    Unavailable { source: Box<SourceError> },
    #[error("Server '{0}' not found in registry")]
    ServerNotFound(String),
}

/// Why one layer of the chain was rejected.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("no registry source produced a catalog")]
    Exhausted,
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid registry payload from {origin}: {reason}")]
    Invalid { origin: String, reason: String },
    #[error("HTTP client error: {0}")]
    HttpClient(reqwest::Error),
    #[error("failed to fetch {url}: {source}")]
    Fetch { url: String, source: reqwest::Error },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    const UNREACHABLE: &str = "http://127.0.0.1:9/registry.json";

    fn payload() -> serde_json::Value {
        json!({
            "version": "1.0",
            "lastUpdated": "2025-01-01",
            "servers": [
                {
                    "id": "filesystem",
                    "name": "Filesystem",
                    "description": "Read and write local files",
                    "category": "files",
                    "tags": ["storage"],
                    "installation": { "command": "npx", "args": ["-y", "@mcp/fs"] }
                },
                {
                    "id": "github",
                    "name": "GitHub",
                    "description": "Repositories and issues",
                    "category": "dev",
                    "authRequired": true,
                    "installation": { "command": "npx", "args": ["-y", "@mcp/github"] }
                }
            ]
        })
    }

    fn settings_in(dir: &Path) -> Settings {
        let mut settings = Settings::in_dir(dir);
        settings.registry_url = UNREACHABLE.to_string();
        settings
    }

    fn write_cache_aged(settings: &Settings, hours: i64) {
        let catalog: Catalog = serde_json::from_value(payload()).unwrap();
        let fetched = Utc::now() - chrono::Duration::hours(hours);
        write_cache(settings.cache_path(), &catalog, fetched).unwrap();
    }

    #[test]
    fn fresh_cache_is_used() {
        let temp = tempdir().unwrap();
        let settings = settings_in(temp.path());
        write_cache_aged(&settings, 1);

        let registry = Registry::new(settings);
        let catalog = registry.load().unwrap();
        assert_eq!(catalog.servers.len(), 2);
        assert!(registry.get_server("github").unwrap().is_some());
        assert!(registry.get_server("missing").unwrap().is_none());
    }

    #[test]
    fn expired_cache_is_used_when_remote_fails() {
        let temp = tempdir().unwrap();
        let settings = settings_in(temp.path());
        write_cache_aged(&settings, 48);

        let registry = Registry::new(settings);
        let catalog = registry.load().unwrap();
        assert_eq!(catalog.servers.len(), 2);

        let info = registry.cache_info();
        assert!(info.exists);
        assert!(info.age_hours.unwrap() > 47.0);
        assert!(info.size_bytes > 0);
    }

    #[test]
    fn orphaned_sidecar_reports_no_age() {
        let temp = tempdir().unwrap();
        let settings = settings_in(temp.path());
        write_cache_aged(&settings, 1);
        fs::remove_file(settings.cache_path()).unwrap();
        assert!(meta_path(settings.cache_path()).exists());

        let info = Registry::new(settings).cache_info();
        assert!(!info.exists);
        assert_eq!(info.age_hours, None);
        assert_eq!(info.size_bytes, 0);
    }

    #[test]
    fn invalid_cache_and_failed_remote_is_unavailable() {
        let temp = tempdir().unwrap();
        let settings = settings_in(temp.path());
        fs::create_dir_all(settings.cache_path().parent().unwrap()).unwrap();
        fs::write(settings.cache_path(), r#"{ "invalid": "format" }"#).unwrap();

        let registry = Registry::new(settings);
        let err = registry.load().unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable { .. }));
    }

    #[test]
    fn no_layers_is_unavailable() {
        let temp = tempdir().unwrap();
        let registry = Registry::new(settings_in(temp.path()));
        match registry.load() {
            Err(RegistryError::Unavailable { source }) => {
                assert!(matches!(*source, SourceError::Fetch { .. }));
            }
            other => panic!("expected unavailable, got {other:?}"),
        }
        assert!(!registry.cache_info().exists);
    }

    #[test]
    fn bundled_snapshot_wins_when_enabled() {
        let temp = tempdir().unwrap();
        let bundled = temp.path().join("bundled.json");
        let mut body = payload();
        body["servers"].as_array_mut().unwrap().truncate(1);
        fs::write(&bundled, body.to_string()).unwrap();

        let mut settings = settings_in(temp.path());
        settings.bundled_registry = Some(bundled);
        settings.use_bundled = true;
        write_cache_aged(&settings, 1);

        let registry = Registry::new(settings);
        assert_eq!(registry.load().unwrap().servers.len(), 1);
    }

    #[test]
    fn empty_bundled_snapshot_falls_through() {
        let temp = tempdir().unwrap();
        let bundled = temp.path().join("bundled.json");
        fs::write(&bundled, r#"{ "servers": [] }"#).unwrap();

        let mut settings = settings_in(temp.path());
        settings.bundled_registry = Some(bundled);
        settings.use_bundled = true;
        write_cache_aged(&settings, 1);

        let registry = Registry::new(settings);
        assert_eq!(registry.load().unwrap().servers.len(), 2);
    }

    #[test]
    fn load_is_memoized() {
        let temp = tempdir().unwrap();
        let settings = settings_in(temp.path());
        write_cache_aged(&settings, 1);
        let registry = Registry::new(settings.clone());

        let first = registry.load().unwrap();
        fs::remove_file(settings.cache_path()).unwrap();
        let second = registry.load().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn forced_refresh_skips_fresh_cache_then_degrades() {
        let temp = tempdir().unwrap();
        let settings = settings_in(temp.path());
        write_cache_aged(&settings, 1);
        let registry = Registry::new(settings);

        assert_eq!(
            registry.sources(true),
            vec![
                Source::Remote(UNREACHABLE.to_string()),
                Source::ExpiredCache(registry.settings().cache_path().to_path_buf()),
            ]
        );
        assert_eq!(registry.refresh(true).unwrap().servers.len(), 2);
    }

    #[test]
    fn search_and_stats() {
        let catalog: Catalog = serde_json::from_value(payload()).unwrap();
        assert_eq!(catalog.search("STORAGE").len(), 1);
        assert_eq!(catalog.search("repositories")[0].id, "github");
        assert!(catalog.search("nothing-like-this").is_empty());

        let stats = catalog.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_category.get("dev"), Some(&1));
        assert_eq!(stats.by_auth_required.required, 1);
        assert_eq!(stats.by_auth_required.not_required, 1);
    }

    #[test]
    fn empty_catalog_queries() {
        let catalog = Catalog::default();
        assert!(catalog.search("anything").is_empty());
        assert_eq!(catalog.stats(), CatalogStats::default());
    }

    #[test]
    fn payload_validation() {
        assert!(parse_payload(r#"{ "invalid": "format" }"#, "test").is_err());
        assert!(parse_payload(r#"{ "servers": [] }"#, "test").is_err());
        assert!(parse_payload(r#"{ "servers": [{ "id": "x" }] }"#, "test").is_err());
        assert!(parse_payload(&payload().to_string(), "test").is_ok());
    }
}
