//! Shared fixtures for integration tests.

// Not every helper is used by every test file.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use chrono::Utc;
use mcp_setup::clients::ClientDescriptor;
use mcp_setup::deps::{CommandLookup, Prompter};
use mcp_setup::models::Catalog;
use mcp_setup::{ClientKind, ClientTable, Platform, Settings};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Scratch directory holding settings, cache, backups and client configs.
pub struct TestEnv {
    pub temp: TempDir,
    pub settings: Settings,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("create temp dir");
        let mut settings = Settings::in_dir(temp.path());
        settings.registry_url = "http://127.0.0.1:9/registry.json".to_string();
        Self { temp, settings }
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Seed a fresh cache with `catalog_json()`.
    pub fn seed_cache(&self) {
        let catalog: Catalog = serde_json::from_value(catalog_json()).expect("fixture catalog");
        mcp_setup::registry::write_cache(self.settings.cache_path(), &catalog, Utc::now())
            .expect("write cache");
    }

    /// Existing directory under the scratch root, as a parameter value.
    pub fn data_dir(&self, name: &str) -> String {
        let dir = self.path().join(name);
        fs::create_dir_all(&dir).expect("create data dir");
        dir.to_string_lossy().into_owned()
    }

    pub fn cursor_config(&self) -> PathBuf {
        self.path().join("cursor/mcp.json")
    }

    pub fn vscode_config(&self) -> PathBuf {
        self.path().join("Code/User/mcp.json")
    }

    /// Cursor and VS Code, both pointing into the scratch directory.
    pub fn clients(&self) -> ClientTable {
        let platform = Platform::current();
        let at = |p: PathBuf| vec![(platform, vec![p.to_string_lossy().into_owned()])];
        ClientTable::new(
            vec![
                ClientDescriptor {
                    kind: ClientKind::Cursor,
                    display_name: "Cursor",
                    config_candidates: at(self.cursor_config()),
                    detect_dirs: vec![],
                    detect_command: None,
                    servers_key: "mcpServers",
                },
                ClientDescriptor {
                    kind: ClientKind::VsCode,
                    display_name: "VS Code",
                    config_candidates: at(self.vscode_config()),
                    detect_dirs: vec![],
                    detect_command: None,
                    servers_key: "servers",
                },
            ],
            platform,
        )
    }
}

pub fn catalog_json() -> Value {
    json!({
        "version": "1.0.0",
        "lastUpdated": "2026-01-01",
        "servers": [
            {
                "id": "filesystem",
                "name": "Filesystem",
                "description": "Read and write local files",
                "category": "storage",
                "type": "local",
                "parameters": {
                    "root": { "type": "path", "required": true, "description": "Directory to expose" },
                    "mode": { "type": "string", "required": false, "default": "" }
                },
                "installation": {
                    "command": "npx",
                    "args": ["-y", "@modelcontextprotocol/server-filesystem", "{{root}}", "{{mode}}"]
                }
            },
            {
                "id": "github",
                "name": "GitHub",
                "category": "dev",
                "type": "local",
                "authRequired": true,
                "parameters": {
                    "token": {
                        "type": "secret",
                        "required": true,
                        "validation": { "pattern": "^ghp_[A-Za-z0-9]+$" }
                    }
                },
                "installation": {
                    "command": "uvx",
                    "args": ["mcp-server-github"],
                    "env": { "GITHUB_TOKEN": "{{token}}" }
                }
            },
            {
                "id": "weather",
                "name": "Weather",
                "category": "data",
                "type": "remote",
                "parameters": {
                    "region": { "type": "string", "required": true }
                },
                "installation": {
                    "url": "https://{{region}}.weather.example/sse",
                    "transport": "sse"
                }
            }
        ]
    })
}

/// Resolves a fixed set of commands, plus `marked` once `marker` exists.
pub struct FakeLookup {
    pub present: HashSet<String>,
    pub marked: Option<(String, PathBuf)>,
}

impl FakeLookup {
    pub fn with(commands: &[&str]) -> Self {
        Self {
            present: commands.iter().map(|c| c.to_string()).collect(),
            marked: None,
        }
    }
}

impl CommandLookup for FakeLookup {
    fn exists(&self, command: &str) -> bool {
        if self.present.contains(command) {
            return true;
        }
        matches!(&self.marked, Some((name, marker)) if name == command && marker.exists())
    }
}

/// Answers every confirmation with `answer` and records status lines.
pub struct ScriptedPrompter {
    pub answer: bool,
    pub lines: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            lines: RefCell::new(Vec::new()),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, _question: &str) -> bool {
        self.answer
    }

    fn status(&self, line: &str) {
        self.lines.borrow_mut().push(line.to_string());
    }
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).expect("read config")).expect("parse config")
}

/// Serve one HTTP response on a loopback port. Returns the URL and the server thread.
pub fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let handle = std::thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
        let mut line = String::new();
        while reader.read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
            if line == "\r\n" {
                break;
            }
            line.clear();
        }
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.flush();
    });
    (format!("http://{addr}/registry.json"), handle)
}
