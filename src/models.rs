//! Data structures for registry payloads and client config entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Registry payload as served remotely, bundled, or cached.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
    pub servers: Vec<ServerDefinition>,
}

/// An installable server from the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(rename = "type", default)]
    pub kind: ExecutionKind,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    pub installation: InstallTemplate,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

fn default_category() -> String {
    "uncategorized".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    #[default]
    Local,
    Remote,
}

/// Command template. `args`, `env` values and `url` may contain `{{name}}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallTemplate {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub transport: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    #[serde(rename = "type", default)]
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub validation: Option<ParameterConstraints>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    #[default]
    String,
    Number,
    Boolean,
    Path,
    File,
    Url,
    Secret,
    ApiKey,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterConstraints {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

/// Operating system family used to pick path and installer tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    MacOs,
    Linux,
    Windows,
}

impl Platform {
    pub const fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MacOs => "macos",
            Self::Linux => "linux",
            Self::Windows => "windows",
        }
    }
}

/// One server's record inside a client config file.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEntry {
    Local {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        cwd: Option<String>,
    },
    Remote {
        url: String,
        transport: String,
    },
}

impl ServerEntry {
    /// JSON shape written into client config files.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        match self {
            ServerEntry::Local {
                command,
                args,
                env,
                cwd,
            } => {
                obj.insert("command".into(), Value::String(command.clone()));
                obj.insert(
                    "args".into(),
                    Value::Array(args.iter().cloned().map(Value::String).collect()),
                );
                if !env.is_empty() {
                    let env_obj = env
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect();
                    obj.insert("env".into(), Value::Object(env_obj));
                }
                if let Some(cwd) = cwd {
                    obj.insert("cwd".into(), Value::String(cwd.clone()));
                }
            }
            ServerEntry::Remote { url, transport } => {
                obj.insert("url".into(), Value::String(url.clone()));
                obj.insert("type".into(), Value::String(transport.clone()));
            }
        }
        Value::Object(obj)
    }

    /// Parse a stored entry. Returns None for shapes that `validate` would reject.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        match (obj.get("command"), obj.get("url")) {
            (Some(command), None) => {
                let args = match obj.get("args") {
                    Some(a) => a
                        .as_array()?
                        .iter()
                        .map(|v| v.as_str().map(String::from))
                        .collect::<Option<Vec<_>>>()?,
                    None => Vec::new(),
                };
                let env = match obj.get("env") {
                    Some(e) => e
                        .as_object()?
                        .iter()
                        .map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect::<Option<BTreeMap<_, _>>>()?,
                    None => BTreeMap::new(),
                };
                Some(ServerEntry::Local {
                    command: command.as_str()?.to_string(),
                    args,
                    env,
                    cwd: obj.get("cwd").and_then(|c| c.as_str()).map(String::from),
                })
            }
            (None, Some(url)) => Some(ServerEntry::Remote {
                url: url.as_str()?.to_string(),
                transport: obj
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("sse")
                    .to_string(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_definition_defaults() {
        let def: ServerDefinition = serde_json::from_value(json!({
            "id": "fs",
            "name": "Filesystem",
            "installation": { "command": "npx", "args": ["-y", "server-fs"] }
        }))
        .unwrap();
        assert_eq!(def.kind, ExecutionKind::Local);
        assert_eq!(def.category, "uncategorized");
        assert!(def.parameters.is_empty());
        assert!(!def.auth_required);
    }

    #[test]
    fn unknown_parameter_type_is_tolerated() {
        let spec: ParameterSpec =
            serde_json::from_value(json!({ "type": "color", "required": true })).unwrap();
        assert_eq!(spec.kind, ParameterKind::Other);
        let spec: ParameterSpec = serde_json::from_value(json!({ "type": "api_key" })).unwrap();
        assert_eq!(spec.kind, ParameterKind::ApiKey);
    }

    #[test]
    fn local_entry_omits_empty_env() {
        let entry = ServerEntry::Local {
            command: "uvx".into(),
            args: vec!["mcp-server-git".into()],
            env: BTreeMap::new(),
            cwd: None,
        };
        assert_eq!(entry.to_value(), json!({ "command": "uvx", "args": ["mcp-server-git"] }));
        assert_eq!(ServerEntry::from_value(&entry.to_value()), Some(entry));
    }

    #[test]
    fn mixed_entry_is_rejected() {
        let value = json!({ "command": "node", "url": "https://example.com/mcp" });
        assert_eq!(ServerEntry::from_value(&value), None);
        let remote = json!({ "url": "https://example.com/mcp", "type": "http" });
        assert_eq!(
            ServerEntry::from_value(&remote),
            Some(ServerEntry::Remote {
                url: "https://example.com/mcp".into(),
                transport: "http".into()
            })
        );
    }
}
