//! mcp-setup - MCP server installer
//!
//! Resolves server definitions from a layered registry, checks and remediates
//! their runtime dependencies, fills in parameters, and edits each client's
//! JSON config with a backup taken first.

pub mod backup;
pub mod clients;
pub mod config;
pub mod deps;
pub mod install;
pub mod models;
pub mod params;
pub mod paths;
pub mod registry;

pub use backup::{BackupError, BackupRecord, BackupStore};
pub use clients::{ClientDescriptor, ClientKind, ClientTable, DetectedClient};
pub use config::{
    ClientConfigDocument, ConfigError, ConfigMutator, InstallOptions, ValidationReport,
};
pub use deps::{
    CommandLookup, DependencyError, DependencyReport, DependencyValidator, InstallerTable,
    MissingReason, NativeLookup, Prompter, RemediationReport, Unattended,
};
pub use install::{ClientOutcome, InstallError, InstallRequest, InstallSummary, Installer};
pub use models::{Catalog, ParameterSpec, Platform, ServerDefinition, ServerEntry};
pub use params::{ParameterError, ParameterValues};
pub use paths::Settings;
pub use registry::{Registry, RegistryError, Source};
