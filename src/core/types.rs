//! Core types: stage identifiers, invocation context, stage profiles,
//! the project file schema, manifests and plans.
//!
//! Profile types derive Serialize/Deserialize so a stage table can live in
//! `stackplan.yaml` and round-trip through the manifest.

use super::error::ConfigurationError;
use crate::resources::{NodeSpec, ResourceKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Stage identity and invocation context
// ============================================================================

/// A deployment stage name, e.g. `staging` or `production`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StageId(pub(crate) String);

impl StageId {
    /// Parse a stage name: non-empty, lowercase ASCII letters, digits and `-`,
    /// starting with a letter.
    pub fn parse(name: &str) -> Result<Self, ConfigurationError> {
        let mut chars = name.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(ConfigurationError::InvalidStage(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StageId {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StageId> for String {
    fn from(id: StageId) -> Self {
        id.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named invocation parameters, fixed at process entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub stage: StageId,
    pub project: String,
    pub version: String,
    pub base_domain: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl Context {
    /// Name of a stack shared by every stage.
    pub fn common_stack_name(&self, name: &str) -> String {
        format!("{}-{}", self.project, name)
    }

    /// Name of a stack scoped to the current stage.
    pub fn staged_stack_name(&self, name: &str) -> String {
        format!("{}-{}-{}", self.project, self.stage, name)
    }
}

// ============================================================================
// Stage profile
// ============================================================================

/// A resolved stage: the static settings plus the fields derived from the
/// project and stage names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageProfile {
    pub stage: StageId,

    /// Secret store name, always `{project}/{stage}/Secrets`.
    pub secrets_name: String,

    pub settings: StageSettings,
}

/// Everything that varies per stage. This is the shape of one entry under
/// `stages:` in the project file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSettings {
    /// Public domain of the frontend distribution; selects the hosted zone.
    pub domain: String,

    /// Domain of the backend distribution.
    pub backend_domain: String,

    pub network: NetworkProfile,

    #[serde(default)]
    pub dns: DnsProfile,

    pub database: DatabaseProfile,

    pub cache: CacheProfile,

    pub security: SecurityProfile,

    /// Container services (order-preserving).
    pub services: IndexMap<String, ServiceProfile>,

    /// CDN route tables keyed by distribution name.
    pub distributions: IndexMap<String, RouteTable>,

    /// TLS certificate for the distributions, if already issued.
    #[serde(default)]
    pub certificate_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkProfile {
    /// VPC address block, e.g. `10.0.0.0/16`
    pub cidr: String,

    /// Prefix length of every subnet
    pub cidr_mask: u8,

    #[serde(default = "default_availability_zones")]
    pub availability_zones: u8,
}

fn default_availability_zones() -> u8 {
    2
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsProfile {
    #[serde(default)]
    pub records: DnsRecords,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsRecords {
    #[serde(default)]
    pub cname: Vec<CnameEntry>,
    #[serde(default)]
    pub mx: Vec<MxEntry>,
    #[serde(default)]
    pub txt: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CnameEntry {
    pub host: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxEntry {
    pub priority: u16,
    pub host_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseProfile {
    pub port: u16,
    pub min_capacity: u32,
    pub max_capacity: u32,
    /// Minutes of inactivity before pausing; `0` or absent never pauses.
    #[serde(default)]
    pub auto_pause_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheProfile {
    pub port: u16,
    pub node_type: String,
    /// Shard count
    pub num_node_groups: u32,
    /// Replicas inside each shard
    pub replicas_per_node_group: u32,
    pub preferred_maintenance_window: String,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityProfile {
    pub basic_auth: BasicAuth,
    pub custom_header: CustomHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub enabled: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// The shared-secret header the CDN injects and the load balancer requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomHeader {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceProfile {
    pub port: u16,
    /// CPU units (1024 = one vCPU)
    pub cpu: u32,
    pub memory_limit_mib: u32,
    pub desired_count: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub scale_on_cpu_target_utilization_percent: u32,
    pub scale_on_memory_target_utilization_percent: u32,
    pub log_retention_days: u32,
    #[serde(default)]
    pub environment: IndexMap<String, String>,
    /// Keys pulled from the stage secret store
    #[serde(default)]
    pub secrets: Vec<String>,
    /// Wire the service to the database, cache and bucket
    #[serde(default)]
    pub attach_storage: bool,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
}

fn default_health_check_path() -> String {
    "/".to_string()
}

/// One CDN distribution: the origin behind the default behavior and one
/// origin per additional path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteTable {
    pub host: RouteHost,
    /// A service name, or [`ASSETS_ORIGIN`]
    pub default_origin: String,
    #[serde(default)]
    pub behaviors: IndexMap<String, String>,
    #[serde(default)]
    pub basic_auth: bool,
}

/// Origin name reserved for the stage's object store.
pub const ASSETS_ORIGIN: &str = "assets";

/// Which of the stage domains a distribution answers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteHost {
    Domain,
    BackendDomain,
}

impl RouteTable {
    /// Every origin name the table needs, default first, without repeats.
    pub fn required_origins(&self) -> Vec<String> {
        let mut origins = vec![self.default_origin.clone()];
        for origin in self.behaviors.values() {
            if !origins.contains(origin) {
                origins.push(origin.clone());
            }
        }
        origins
    }
}

// ============================================================================
// Project file
// ============================================================================

/// Root of `stackplan.yaml`. Every field is optional: CLI flags win, then the
/// file, then built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectFile {
    #[serde(default)]
    pub project: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub base_domain: Option<String>,

    #[serde(default)]
    pub account: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// Stage table; the built-in table is used when empty.
    #[serde(default)]
    pub stages: IndexMap<String, StageSettings>,
}

// ============================================================================
// Manifest (render target submission)
// ============================================================================

/// The ordered, fully-parameterized graph handed to a render target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema: String,
    pub generator: String,
    pub context: Context,
    pub secrets_name: String,
    /// BLAKE3 over stacks and node hashes
    pub fingerprint: String,
    /// Stacks in deployment order
    pub stacks: Vec<StackEntry>,
    /// Nodes in emission order
    pub nodes: Vec<ManifestNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    pub name: String,
    pub depends_on: Vec<String>,
    /// Shared across stages (carries no Stage tag)
    pub shared: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestNode {
    pub id: String,
    pub stack: String,
    pub kind: ResourceKind,
    pub depends_on: Vec<String>,
    pub tags: IndexMap<String, String>,
    pub hash: String,
    pub spec: NodeSpec,
}

// ============================================================================
// Plan
// ============================================================================

/// Action the render target will take on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub node_id: String,
    pub stack: String,
    pub kind: ResourceKind,
    pub action: PlanAction,
    pub description: String,
}

/// Difference between a freshly composed manifest and the last submitted one.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub name: String,
    pub changes: Vec<PlannedChange>,
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}
