//! Runtime dependency checks and guided installation.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc;

use serde::Serialize;

use crate::models::{ExecutionKind, Platform, ServerDefinition};

/// Longest failure message taken from raw installer output.
const MAX_REASON_LEN: usize = 200;

/// Known installer faults, checked in order against lowercased output.
const FAULT_PATTERNS: &[(&[&str], &str)] = &[
    (
        &["permission denied", "eacces", "access is denied", "operation not permitted"],
        "Permission denied. Try running the installer with elevated privileges.",
    ),
    (
        &[
            "command not found",
            "not recognized as an internal or external command",
            "no such file or directory",
        ],
        "The package manager needed for this install is not available.",
    ),
    (
        &[
            "could not resolve host",
            "network is unreachable",
            "connection refused",
            "timed out",
            "enotfound",
            "etimedout",
        ],
        "Network failure while downloading. Check your connection and try again.",
    ),
    (
        &["no space left on device", "not enough space", "enospc"],
        "Insufficient disk space.",
    ),
    (
        &["already installed", "is already the newest version"],
        "Package reports it is already installed, but it is not on PATH.",
    ),
    (
        &["certificate", "ssl", "tls handshake"],
        "Certificate error while downloading. Check proxy or CA settings.",
    ),
];

/// Resolves whether an executable is available.
pub trait CommandLookup {
    fn exists(&self, command: &str) -> bool;
}

/// Uses the platform's own lookup command (`which` or `where`).
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLookup;

impl CommandLookup for NativeLookup {
    fn exists(&self, command: &str) -> bool {
        let program = if cfg!(windows) { "where" } else { "which" };
        match Command::new(program).arg(command).stdin(Stdio::null()).output() {
            Ok(out) => {
                tracing::debug!(
                    "{} {}: {}",
                    program,
                    command,
                    String::from_utf8_lossy(&out.stdout).trim()
                );
                out.status.success()
            }
            Err(e) => {
                tracing::debug!("{} unavailable: {}", program, e);
                false
            }
        }
    }
}

/// User interaction during remediation.
pub trait Prompter {
    /// Ask for consent. Returning false declines.
    fn confirm(&self, question: &str) -> bool;
    /// One line of progress or installer output.
    fn status(&self, line: &str);
}

/// Declines every prompt and sends status lines to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unattended;

impl Prompter for Unattended {
    fn confirm(&self, _question: &str) -> bool {
        false
    }

    fn status(&self, line: &str) {
        tracing::info!("{}", line);
    }
}

/// How to obtain one family of executables.
#[derive(Debug, Clone)]
pub struct InstallRecipe {
    pub commands: Vec<String>,
    /// Alternative shell commands per platform, tried in order.
    pub install: Vec<(Platform, Vec<String>)>,
    pub manual: Vec<(Platform, String)>,
}

/// Immutable installer data. Build once and pass by reference.
#[derive(Debug, Clone, Default)]
pub struct InstallerTable {
    recipes: Vec<InstallRecipe>,
}

fn strings(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

impl InstallerTable {
    pub fn new(recipes: Vec<InstallRecipe>) -> Self {
        Self { recipes }
    }

    pub fn builtin() -> Self {
        use Platform::{Linux, MacOs, Windows};

        let recipes = vec![
            InstallRecipe {
                commands: strings(&["npx", "node", "npm"]),
                install: vec![
                    (MacOs, strings(&["brew install node"])),
                    (
                        Linux,
                        strings(&[
                            "sudo apt-get install -y nodejs npm",
                            "sudo dnf install -y nodejs npm",
                        ]),
                    ),
                    (Windows, strings(&["winget install -e --id OpenJS.NodeJS.LTS"])),
                ],
                manual: vec![
                    (
                        MacOs,
                        "Install Node.js with `brew install node` or from https://nodejs.org/"
                            .into(),
                    ),
                    (
                        Linux,
                        "Install Node.js with your package manager (e.g. `sudo apt install nodejs npm`) or from https://nodejs.org/"
                            .into(),
                    ),
                    (
                        Windows,
                        "Download the Node.js LTS installer from https://nodejs.org/ and restart your terminal"
                            .into(),
                    ),
                ],
            },
            InstallRecipe {
                commands: strings(&["uvx", "uv"]),
                install: vec![
                    (
                        MacOs,
                        strings(&[
                            "brew install uv",
                            "curl -LsSf https://astral.sh/uv/install.sh | sh",
                        ]),
                    ),
                    (
                        Linux,
                        strings(&[
                            "curl -LsSf https://astral.sh/uv/install.sh | sh",
                            "pipx install uv",
                        ]),
                    ),
                    (Windows, strings(&["winget install -e --id astral-sh.uv"])),
                ],
                manual: vec![
                    (
                        MacOs,
                        "Install uv with `brew install uv`, see https://docs.astral.sh/uv/".into(),
                    ),
                    (
                        Linux,
                        "Install uv with `curl -LsSf https://astral.sh/uv/install.sh | sh`".into(),
                    ),
                    (
                        Windows,
                        "Install uv with `powershell -c \"irm https://astral.sh/uv/install.ps1 | iex\"`"
                            .into(),
                    ),
                ],
            },
            InstallRecipe {
                commands: strings(&["python", "python3"]),
                install: vec![
                    (MacOs, strings(&["brew install python"])),
                    (
                        Linux,
                        strings(&[
                            "sudo apt-get install -y python3",
                            "sudo dnf install -y python3",
                        ]),
                    ),
                    (Windows, strings(&["winget install -e --id Python.Python.3.12"])),
                ],
                manual: vec![
                    (
                        MacOs,
                        "Install Python with `brew install python` or from https://www.python.org/"
                            .into(),
                    ),
                    (Linux, "Install Python 3 with your package manager".into()),
                    (
                        Windows,
                        "Install Python from https://www.python.org/ and tick \"Add to PATH\""
                            .into(),
                    ),
                ],
            },
            InstallRecipe {
                commands: strings(&["docker"]),
                install: vec![
                    (MacOs, strings(&["brew install --cask docker"])),
                    (Linux, strings(&["sudo apt-get install -y docker.io"])),
                    (Windows, strings(&["winget install -e --id Docker.DockerDesktop"])),
                ],
                manual: vec![
                    (MacOs, "Install Docker Desktop from https://www.docker.com/".into()),
                    (
                        Linux,
                        "Install Docker Engine, see https://docs.docker.com/engine/install/".into(),
                    ),
                    (Windows, "Install Docker Desktop from https://www.docker.com/".into()),
                ],
            },
        ];

        Self::new(recipes)
    }

    fn recipe(&self, command: &str) -> Option<&InstallRecipe> {
        let name = executable_name(command);
        self.recipes
            .iter()
            .find(|r| r.commands.iter().any(|c| c == name))
    }

    /// Automated installers and manual instructions for a command on a platform.
    pub fn remediation(&self, command: &str, platform: Platform) -> Remediation {
        let recipe = self.recipe(command);
        let auto_install = recipe
            .and_then(|r| r.install.iter().find(|(p, _)| *p == platform))
            .map(|(_, cmds)| cmds.clone())
            .unwrap_or_default();
        let manual = recipe
            .and_then(|r| r.manual.iter().find(|(p, _)| *p == platform))
            .map(|(_, text)| text.clone())
            .unwrap_or_else(|| {
                format!("Install `{command}` and make sure it is on your PATH, then retry.")
            });
        Remediation {
            auto_install,
            manual,
        }
    }
}

/// `C:\tools\node.exe` and `/usr/bin/node` both map to `node`.
fn executable_name(command: &str) -> &str {
    let base = command.rsplit(['/', '\\']).next().unwrap_or(command);
    base.strip_suffix(".exe")
        .or_else(|| base.strip_suffix(".cmd"))
        .unwrap_or(base)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Remediation {
    pub auto_install: Vec<String>,
    pub manual: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingDependency {
    pub command: String,
    pub remediation: Remediation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyReport {
    pub ok: bool,
    pub missing: Vec<MissingDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum MissingReason {
    Declined,
    InstallFailed(String),
    NoAutoInstaller,
}

impl std::fmt::Display for MissingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingReason::Declined => write!(f, "installation was declined"),
            MissingReason::InstallFailed(reason) => write!(f, "installation failed: {}", reason),
            MissingReason::NoAutoInstaller => {
                write!(f, "no automated installer for this platform")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualStep {
    pub command: String,
    pub reason: MissingReason,
    pub instructions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemediationReport {
    pub installed: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub declined: Vec<String>,
    pub manual: Vec<ManualStep>,
}

impl RemediationReport {
    /// Every dependency still missing, with why.
    pub fn outstanding(&self) -> Vec<DependencyError> {
        self.manual
            .iter()
            .map(|step| DependencyError::Missing {
                command: step.command.clone(),
                reason: step.reason.clone(),
                instructions: step.instructions.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyError {
    #[error("Required command `{command}` is missing ({reason}). {instructions}")]
    Missing {
        command: String,
        reason: MissingReason,
        instructions: String,
    },
}

/// Checks and installs the executables servers launch.
pub struct DependencyValidator<'a> {
    lookup: &'a dyn CommandLookup,
    installers: &'a InstallerTable,
    platform: Platform,
}

impl<'a> DependencyValidator<'a> {
    pub fn new(lookup: &'a dyn CommandLookup, installers: &'a InstallerTable) -> Self {
        Self::for_platform(lookup, installers, Platform::current())
    }

    pub fn for_platform(
        lookup: &'a dyn CommandLookup,
        installers: &'a InstallerTable,
        platform: Platform,
    ) -> Self {
        Self {
            lookup,
            installers,
            platform,
        }
    }

    pub fn check(&self, server: &ServerDefinition) -> DependencyReport {
        let command = match (server.kind, server.installation.command.as_deref()) {
            (ExecutionKind::Local, Some(cmd)) if !cmd.trim().is_empty() => cmd.trim(),
            _ => {
                return DependencyReport {
                    ok: true,
                    missing: Vec::new(),
                }
            }
        };

        if self.lookup.exists(command) {
            return DependencyReport {
                ok: true,
                missing: Vec::new(),
            };
        }

        tracing::debug!("Server {} needs missing command {}", server.id, command);
        DependencyReport {
            ok: false,
            missing: vec![MissingDependency {
                command: command.to_string(),
                remediation: self.installers.remediation(command, self.platform),
            }],
        }
    }

    pub fn remediate(
        &self,
        missing: &[MissingDependency],
        interactive: bool,
        prompter: &dyn Prompter,
    ) -> RemediationReport {
        let mut report = RemediationReport::default();

        for dep in missing {
            let manual = |reason| ManualStep {
                command: dep.command.clone(),
                reason,
                instructions: dep.remediation.manual.clone(),
            };

            if dep.remediation.auto_install.is_empty() {
                report.manual.push(manual(MissingReason::NoAutoInstaller));
                continue;
            }

            let question = format!(
                "`{}` is required but not installed. Install it now?",
                dep.command
            );
            if !interactive || !prompter.confirm(&question) {
                report.declined.push(dep.command.clone());
                report.manual.push(manual(MissingReason::Declined));
                continue;
            }

            match self.install_one(dep, prompter) {
                Ok(()) => report.installed.push(dep.command.clone()),
                Err(reason) => {
                    report.failed.push((dep.command.clone(), reason.clone()));
                    report.manual.push(manual(MissingReason::InstallFailed(reason)));
                }
            }
        }

        report
    }

    /// Try each alternative until the command resolves. Returns the last failure reason.
    fn install_one(&self, dep: &MissingDependency, prompter: &dyn Prompter) -> Result<(), String> {
        let mut reason = String::from("no installer was run");
        for cmdline in &dep.remediation.auto_install {
            prompter.status(&format!("Running: {cmdline}"));
            let outcome = run_streaming(cmdline, prompter);

            if self.lookup.exists(&dep.command) {
                tracing::info!("Installed {} via `{}`", dep.command, cmdline);
                prompter.status(&format!("Installed {}", dep.command));
                return Ok(());
            }

            reason = match outcome {
                Ok((true, _)) => format!(
                    "`{cmdline}` finished but `{}` is still not on PATH",
                    dep.command
                ),
                Ok((false, output)) => classify_failure(&output),
                Err(e) => format!("could not start `{cmdline}`: {e}"),
            };
            tracing::warn!("Install attempt for {} failed: {}", dep.command, reason);
        }
        Err(reason)
    }
}

fn shell(cmdline: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", cmdline]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", cmdline]);
        cmd
    }
}

/// Run a shell command, forwarding each output line to the prompter. No timeout.
fn run_streaming(cmdline: &str, prompter: &dyn Prompter) -> std::io::Result<(bool, String)> {
    let mut child = shell(cmdline)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (tx, rx) = mpsc::channel::<String>();
    let mut captured = String::new();

    std::thread::scope(|s| {
        if let Some(out) = stdout {
            let tx = tx.clone();
            s.spawn(move || forward_lines(out, tx));
        }
        if let Some(err) = stderr {
            let tx = tx.clone();
            s.spawn(move || forward_lines(err, tx));
        }
        drop(tx);

        for line in rx {
            prompter.status(&line);
            captured.push_str(&line);
            captured.push('\n');
        }
    });

    let status = child.wait()?;
    Ok((status.success(), captured))
}

fn forward_lines<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    for line in BufReader::new(reader).lines().map_while(Result::ok) {
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// Map installer output to a short, actionable message.
pub fn classify_failure(output: &str) -> String {
    let lower = output.to_lowercase();
    for (needles, message) in FAULT_PATTERNS {
        if needles.iter().any(|n| lower.contains(n)) {
            return (*message).to_string();
        }
    }
    match output.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) if line.chars().count() > MAX_REASON_LEN => {
            let truncated: String = line.chars().take(MAX_REASON_LEN).collect();
            format!("{truncated}...")
        }
        Some(line) => line.to_string(),
        None => "Installer failed without output".to_string(),
    }
}
