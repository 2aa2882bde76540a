//! Parameter collection, validation and `{{name}}` substitution.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::models::{ParameterKind, ParameterSpec, ServerDefinition};
use crate::paths::expand_tilde;

/// Shortest accepted secret or API key.
const MIN_SECRET_LEN: usize = 8;

pub type ParameterValues = BTreeMap<String, String>;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("valid placeholder regex")
    })
}

/// Template after substitution, ready to become a config entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Substituted {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParameterError {
    #[error("Invalid parameters: {}", format_fields(.errors))]
    ValidationFailed { errors: Vec<FieldError> },
}

fn format_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn has_parameters(server: &ServerDefinition) -> bool {
    !server.parameters.is_empty()
}

pub fn required_params(server: &ServerDefinition) -> Vec<(&str, &ParameterSpec)> {
    server
        .parameters
        .iter()
        .filter(|(_, spec)| spec.required)
        .map(|(name, spec)| (name.as_str(), spec))
        .collect()
}

pub fn optional_params(server: &ServerDefinition) -> Vec<(&str, &ParameterSpec)> {
    server
        .parameters
        .iter()
        .filter(|(_, spec)| !spec.required)
        .map(|(name, spec)| (name.as_str(), spec))
        .collect()
}

/// Ask `supply` once per parameter (required first) and validate the answers.
///
/// `supply` returning `None` or an empty string means "no value". Optional
/// parameters then fall back to their default, or to the empty string.
pub fn collect<F>(
    server: &ServerDefinition,
    mut supply: F,
) -> Result<ParameterValues, ParameterError>
where
    F: FnMut(&str, &ParameterSpec) -> Option<String>,
{
    let mut values = ParameterValues::new();
    let mut errors = Vec::new();

    let ordered = required_params(server)
        .into_iter()
        .chain(optional_params(server));

    for (name, spec) in ordered {
        let supplied = supply(name, spec)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let value = match supplied {
            Some(v) => v,
            None if spec.required => {
                errors.push(FieldError {
                    field: name.to_string(),
                    message: "a value is required".to_string(),
                });
                continue;
            }
            None => spec.default.clone().unwrap_or_default(),
        };

        if !value.is_empty() {
            if let Err(message) = validate_value(spec, &value) {
                errors.push(FieldError {
                    field: name.to_string(),
                    message,
                });
                continue;
            }
        }
        values.insert(name.to_string(), value);
    }

    if errors.is_empty() {
        Ok(values)
    } else {
        Err(ParameterError::ValidationFailed { errors })
    }
}

/// Type check first, then declared pattern and length bounds.
pub fn validate_value(spec: &ParameterSpec, value: &str) -> Result<(), String> {
    match spec.kind {
        ParameterKind::Path | ParameterKind::File => {
            let path = expand_tilde(value);
            if !path.exists() {
                return Err(format!("path does not exist: {}", path.display()));
            }
        }
        ParameterKind::Url => {
            url::Url::parse(value).map_err(|e| format!("not a valid URL: {e}"))?;
        }
        ParameterKind::Number => {
            value
                .parse::<f64>()
                .map_err(|_| format!("not a number: {value}"))?;
        }
        ParameterKind::Boolean => {
            if !matches!(
                value.to_ascii_lowercase().as_str(),
                "true" | "false" | "yes" | "no" | "1" | "0"
            ) {
                return Err(format!("not a boolean: {value}"));
            }
        }
        ParameterKind::Secret | ParameterKind::ApiKey => {
            if value.chars().count() < MIN_SECRET_LEN {
                return Err(format!("must be at least {MIN_SECRET_LEN} characters"));
            }
        }
        ParameterKind::String | ParameterKind::Other => {}
    }

    if let Some(rules) = &spec.validation {
        if let Some(pattern) = &rules.pattern {
            let re = Regex::new(pattern).map_err(|e| format!("invalid pattern {pattern}: {e}"))?;
            if !re.is_match(value) {
                return Err(format!("does not match pattern {pattern}"));
            }
        }
        let len = value.chars().count();
        if let Some(min) = rules.min_length {
            if len < min {
                return Err(format!("must be at least {min} characters"));
            }
        }
        if let Some(max) = rules.max_length {
            if len > max {
                return Err(format!("must be at most {max} characters"));
            }
        }
    }
    Ok(())
}

/// Replace every `{{name}}`; unknown names become empty.
pub fn render(template: &str, values: &ParameterValues) -> String {
    placeholder()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Substitute values into the install template.
///
/// Arguments that render empty are dropped; environment entries are kept even when empty.
pub fn substitute(server: &ServerDefinition, values: &ParameterValues) -> Substituted {
    let template = &server.installation;
    Substituted {
        command: template.command.clone(),
        args: template
            .args
            .iter()
            .map(|a| render(a, values))
            .filter(|a| !a.is_empty())
            .collect(),
        env: template
            .env
            .iter()
            .map(|(k, v)| (k.clone(), render(v, values)))
            .collect(),
        url: template.url.as_deref().map(|u| render(u, values)),
    }
}

/// Human-readable invocation: env assignments, command, arguments.
pub fn preview(server: &ServerDefinition, values: &ParameterValues) -> String {
    let rendered = substitute(server, values);
    if let Some(url) = rendered.url.filter(|_| rendered.command.is_none()) {
        return url;
    }

    let mut parts: Vec<String> = rendered
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, quote(v)))
        .collect();
    if let Some(cmd) = rendered.command {
        parts.push(quote(&cmd));
    }
    parts.extend(rendered.args.iter().map(|a| quote(a)));
    parts.join(" ")
}

fn quote(s: &str) -> String {
    if !s.is_empty() && !s.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        s.to_string()
    } else {
        format!("\"{}\"", s.replace('"', "\\\""))
    }
}
