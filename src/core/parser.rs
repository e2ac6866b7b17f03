//! Project file parsing, stage table validation and context resolution.
//!
//! `stackplan.yaml` is optional. Every context field resolves as:
//! CLI flag, then project file, then built-in default.

use super::error::{ConfigurationError, ValidationError};
use super::stages::StageConfigTable;
use super::types::*;
use crate::resources::network::{carve_subnets, parse_cidr};
use indexmap::IndexMap;
use std::path::Path;

pub const DEFAULT_PROJECT: &str = "example";
pub const DEFAULT_VERSION: &str = "latest";
pub const DEFAULT_BASE_DOMAIN: &str = "example.com";

/// Parse a project file from disk.
pub fn parse_project_file(path: &Path) -> Result<ProjectFile, ConfigurationError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_project(&content).map_err(|message| ConfigurationError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Parse a project file from a string.
pub fn parse_project(yaml: &str) -> Result<ProjectFile, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Build the stage table a project file declares, or the built-in table when
/// it declares none.
pub fn build_table(file: &ProjectFile) -> Result<StageConfigTable, ConfigurationError> {
    if file.stages.is_empty() {
        return Ok(StageConfigTable::builtin());
    }
    let mut entries = IndexMap::new();
    for (name, settings) in &file.stages {
        entries.insert(StageId::parse(name)?, settings.clone());
    }
    Ok(StageConfigTable::new(entries))
}

/// Validate a project file's stage table. Returns every problem found
/// (empty = valid).
pub fn validate_project(file: &ProjectFile) -> Vec<ValidationError> {
    if file.stages.is_empty() {
        return validate_table(&StageConfigTable::builtin());
    }
    let mut errors = Vec::new();
    for name in file.stages.keys() {
        if let Err(e) = StageId::parse(name) {
            errors.push(profile_error(name, e.to_string()));
        }
    }
    for (name, settings) in &file.stages {
        validate_settings(name, settings, &mut errors);
    }
    errors
}

/// Validate an already-built stage table. Returns every problem found
/// (empty = valid).
pub fn validate_table(table: &StageConfigTable) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if table.is_empty() {
        errors.push(profile_error("*", "stage table declares no stages"));
    }
    for (stage, settings) in table.entries() {
        validate_settings(stage.as_str(), settings, &mut errors);
    }
    errors
}

fn validate_settings(stage: &str, settings: &StageSettings, errors: &mut Vec<ValidationError>) {
    let mut push = |message: String| errors.push(profile_error(stage, message));

    // Network
    let network = &settings.network;
    if let Err(e) = parse_cidr(&network.cidr) {
        push(format!("network.cidr: {}", e));
    } else if let Err(e) = carve_subnets(&network.cidr, network.cidr_mask, 2 * u32::from(network.availability_zones)) {
        push(format!("network.cidr_mask {}: {}", network.cidr_mask, e));
    }
    if settings.network.availability_zones == 0 {
        push("network.availability_zones must be at least 1".to_string());
    }

    // Data stores
    if settings.database.port == 0 {
        push("database.port must not be 0".to_string());
    }
    if settings.database.min_capacity > settings.database.max_capacity {
        push(format!(
            "database.min_capacity {} exceeds max_capacity {}",
            settings.database.min_capacity, settings.database.max_capacity
        ));
    }
    if settings.cache.port == 0 {
        push("cache.port must not be 0".to_string());
    }

    // Services
    if settings.services.is_empty() {
        push("no services declared".to_string());
    }
    for (name, svc) in &settings.services {
        if name == ASSETS_ORIGIN {
            push(format!("service name '{}' is reserved for the object store", ASSETS_ORIGIN));
        }
        if svc.port == 0 {
            push(format!("services.{}.port must not be 0", name));
        }
        if svc.min_capacity > svc.max_capacity {
            push(format!(
                "services.{}.min_capacity {} exceeds max_capacity {}",
                name, svc.min_capacity, svc.max_capacity
            ));
        }
    }

    // Routes
    for (dist, route) in &settings.distributions {
        for origin in route.required_origins() {
            if origin != ASSETS_ORIGIN && !settings.services.contains_key(&origin) {
                push(format!(
                    "distributions.{} routes to unknown origin '{}'",
                    dist, origin
                ));
            }
        }
    }

    // Header gate
    let header = &settings.security.custom_header;
    if header.key.trim().is_empty() {
        push("security.custom_header.key must not be empty".to_string());
    }
    if header.value.is_empty() {
        push("security.custom_header.value must not be empty".to_string());
    }
    // The listener rule treats these as wildcards.
    if header.value.contains(['*', '?']) {
        push("security.custom_header.value must not contain '*' or '?'".to_string());
    }
}

fn profile_error(stage: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::Profile {
        stage: stage.to_string(),
        message: message.into(),
    }
}

/// Context values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ContextOverrides {
    pub stage: Option<String>,
    pub project: Option<String>,
    pub version: Option<String>,
    pub base_domain: Option<String>,
    pub account: Option<String>,
    pub region: Option<String>,
}

/// Resolve the invocation context. A stage is required; everything else
/// falls back to the project file, then to defaults.
pub fn resolve_context(flags: &ContextOverrides, file: &ProjectFile) -> Result<Context, ConfigurationError> {
    let stage = flags
        .stage
        .as_deref()
        .ok_or(ConfigurationError::MissingContext("stage"))?;
    let pick = |flag: &Option<String>, from_file: &Option<String>| flag.clone().or_else(|| from_file.clone());
    let ctx = Context {
        stage: StageId::parse(stage)?,
        project: pick(&flags.project, &file.project).unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
        version: pick(&flags.version, &file.version).unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        base_domain: pick(&flags.base_domain, &file.base_domain)
            .unwrap_or_else(|| DEFAULT_BASE_DOMAIN.to_string()),
        account: pick(&flags.account, &file.account),
        region: pick(&flags.region, &file.region),
    };
    tracing::debug!(stage = %ctx.stage, project = %ctx.project, version = %ctx.version, "context resolved");
    Ok(ctx)
}

/// Starter project file written by `init`.
pub fn starter_project(project: &str) -> String {
    format!(
        r#"# stackplan project file
project: {project}
version: latest
base_domain: example.com
# account: "123456789012"
# region: ap-northeast-1

# Leave `stages` out to use the built-in staging/production table.
# stages:
#   staging:
#     domain: dev.example.com
#     backend_domain: api.dev.example.com
#     network: {{ cidr: 10.0.0.0/16, cidr_mask: 24 }}
#     ...
"#
    )
}
