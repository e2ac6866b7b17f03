//! Stage configuration table: an immutable stage to settings mapping.
//!
//! Built once at process entry and passed by reference. Resolution is a pure
//! function of the table plus the derived secret store name.

use super::error::ConfigurationError;
use super::types::*;
use indexmap::IndexMap;

/// Immutable mapping from stage identifier to stage settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfigTable {
    entries: IndexMap<StageId, StageSettings>,
}

impl StageConfigTable {
    /// Build a table from parsed entries. Keys are validated stage ids, so a
    /// table is total over the stages it declares by construction.
    pub fn new(entries: IndexMap<StageId, StageSettings>) -> Self {
        Self { entries }
    }

    /// The table compiled into the binary: `staging` and `production`.
    pub fn builtin() -> Self {
        let mut entries = IndexMap::new();
        entries.insert(StageId("staging".to_string()), staging());
        entries.insert(StageId("production".to_string()), production());
        Self { entries }
    }

    /// Resolve a stage to its profile.
    pub fn resolve(&self, stage: &StageId, project: &str) -> Result<StageProfile, ConfigurationError> {
        let settings = self
            .entries
            .get(stage)
            .ok_or_else(|| ConfigurationError::UnknownStage {
                stage: stage.to_string(),
                known: self.stage_names(),
            })?;
        Ok(StageProfile {
            stage: stage.clone(),
            secrets_name: secrets_name(project, stage),
            settings: settings.clone(),
        })
    }

    /// Declared stage names, in table order.
    pub fn stage_names(&self) -> Vec<String> {
        self.entries.keys().map(|s| s.to_string()).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&StageId, &StageSettings)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-stage secret store name.
pub fn secrets_name(project: &str, stage: &StageId) -> String {
    format!("{}/{}/Secrets", project, stage)
}

// ============================================================================
// Built-in profiles
// ============================================================================

fn staging() -> StageSettings {
    StageSettings {
        domain: "dev.example.com".to_string(),
        backend_domain: "api.dev.example.com".to_string(),
        cache: cache_profile("cache.t2.micro"),
        services: services(7),
        ..shared_settings()
    }
}

fn production() -> StageSettings {
    StageSettings {
        domain: "example.com".to_string(),
        backend_domain: "api.example.com".to_string(),
        cache: cache_profile("cache.m6g.large"),
        services: services(400),
        ..shared_settings()
    }
}

/// Settings both built-in stages have in common.
fn shared_settings() -> StageSettings {
    StageSettings {
        domain: String::new(),
        backend_domain: String::new(),
        network: NetworkProfile {
            cidr: "10.0.0.0/16".to_string(),
            cidr_mask: 24,
            availability_zones: 2,
        },
        dns: DnsProfile::default(),
        database: DatabaseProfile {
            port: 3306,
            min_capacity: 1,
            max_capacity: 1,
            auto_pause_minutes: Some(0),
        },
        cache: cache_profile(""),
        security: SecurityProfile {
            basic_auth: BasicAuth {
                enabled: true,
                user: Some("user".to_string()),
                password: Some("password".to_string()),
            },
            custom_header: CustomHeader {
                key: "x-pre-shared-key".to_string(),
                value: "change-me-pre-shared-key".to_string(),
            },
        },
        services: IndexMap::new(),
        distributions: distributions(),
        certificate_arn: None,
    }
}

fn cache_profile(node_type: &str) -> CacheProfile {
    CacheProfile {
        port: 6379,
        node_type: node_type.to_string(),
        num_node_groups: 1,
        replicas_per_node_group: 1,
        preferred_maintenance_window: "sat:16:30-sat:17:30".to_string(),
        properties: IndexMap::from([("cluster-enabled".to_string(), "yes".to_string())]),
    }
}

fn services(log_retention_days: u32) -> IndexMap<String, ServiceProfile> {
    let base = ServiceProfile {
        port: 3000,
        cpu: 512,
        memory_limit_mib: 1024,
        desired_count: 1,
        min_capacity: 1,
        max_capacity: 1,
        scale_on_cpu_target_utilization_percent: 75,
        scale_on_memory_target_utilization_percent: 75,
        log_retention_days,
        environment: IndexMap::new(),
        secrets: vec![],
        attach_storage: false,
        health_check_path: "/".to_string(),
    };
    let backend = ServiceProfile {
        environment: IndexMap::from([("LOG_LEVEL".to_string(), "info".to_string())]),
        secrets: vec!["JWT_SECRET".to_string()],
        attach_storage: true,
        ..base.clone()
    };
    IndexMap::from([
        ("backend".to_string(), backend),
        ("frontend".to_string(), base),
    ])
}

fn distributions() -> IndexMap<String, RouteTable> {
    IndexMap::from([
        (
            "Distribution".to_string(),
            RouteTable {
                host: RouteHost::Domain,
                default_origin: "frontend".to_string(),
                behaviors: IndexMap::from([(
                    "/assets/*".to_string(),
                    ASSETS_ORIGIN.to_string(),
                )]),
                basic_auth: true,
            },
        ),
        (
            "BackendDistribution".to_string(),
            RouteTable {
                host: RouteHost::BackendDomain,
                default_origin: "backend".to_string(),
                behaviors: IndexMap::new(),
                basic_auth: false,
            },
        ),
    ])
}
