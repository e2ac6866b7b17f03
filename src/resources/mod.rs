//! Resource constructors: one pure factory per infrastructure primitive.
//!
//! Each constructor:
//! 1. checks its inputs and upstream handles, failing at construction time
//! 2. returns a [`ResourceNode`] with a closed, typed [`NodeSpec`]
//! 3. returns typed output handles that downstream constructors consume

pub mod cache;
pub mod database;
pub mod distribution;
pub mod dns;
pub mod network;
pub mod registry;
pub mod service;
pub mod storage;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Graph-unique node identity, `{stack}/{construct}`.
pub type NodeId = String;

/// Kind of infrastructure primitive a node declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    BastionHost,
    ComputeCluster,
    ContainerRegistry,
    ComputeService,
    RelationalStore,
    CacheCluster,
    ObjectStore,
    CdnDistribution,
    DnsZone,
    DnsRecord,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::BastionHost => write!(f, "bastion-host"),
            Self::ComputeCluster => write!(f, "compute-cluster"),
            Self::ContainerRegistry => write!(f, "container-registry"),
            Self::ComputeService => write!(f, "compute-service"),
            Self::RelationalStore => write!(f, "relational-store"),
            Self::CacheCluster => write!(f, "cache-cluster"),
            Self::ObjectStore => write!(f, "object-store"),
            Self::CdnDistribution => write!(f, "cdn-distribution"),
            Self::DnsZone => write!(f, "dns-zone"),
            Self::DnsRecord => write!(f, "dns-record"),
        }
    }
}

/// A value another node exposes, known only once the render target has
/// realized the producing node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub node: NodeId,
    pub output: String,
}

impl OutputRef {
    pub fn new(node: &str, output: &str) -> Self {
        Self {
            node: node.to_string(),
            output: output.to_string(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.output)
    }
}

/// A parameter that is either known at plan time or read from an upstream
/// output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    Literal(String),
    Output(OutputRef),
}

impl Param {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }
}

/// The stack a node is declared in, and the tags every node in it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub stack: String,
    pub tags: IndexMap<String, String>,
}

impl Scope {
    /// A stack shared across stages: tagged with `Project` only.
    pub fn shared(stack: &str, project: &str) -> Self {
        Self {
            stack: stack.to_string(),
            tags: IndexMap::from([("Project".to_string(), project.to_string())]),
        }
    }

    /// A stage-scoped stack: tagged with `Project` and `Stage`.
    pub fn staged(stack: &str, project: &str, stage: &str) -> Self {
        Self {
            stack: stack.to_string(),
            tags: IndexMap::from([
                ("Project".to_string(), project.to_string()),
                ("Stage".to_string(), stage.to_string()),
            ]),
        }
    }

    /// Identity of a construct inside this stack.
    pub fn node_id(&self, construct: &str) -> NodeId {
        format!("{}/{}", self.stack, construct)
    }
}

/// One declared infrastructure primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceNode {
    pub id: NodeId,
    pub stack: String,
    pub spec: NodeSpec,
    /// Upstream outputs this node consumes
    pub references: Vec<OutputRef>,
    pub tags: IndexMap<String, String>,
}

impl ResourceNode {
    pub(crate) fn new(id: NodeId, scope: &Scope, spec: NodeSpec, references: Vec<OutputRef>) -> Self {
        let mut refs: Vec<OutputRef> = Vec::with_capacity(references.len());
        for r in references {
            if !refs.contains(&r) {
                refs.push(r);
            }
        }
        tracing::debug!(node = %id, kind = %spec.kind(), references = refs.len(), "constructed node");
        Self {
            id,
            stack: scope.stack.clone(),
            spec,
            references: refs,
            tags: scope.tags.clone(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// Distinct nodes this node reads outputs from.
    pub fn referenced_nodes(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = Vec::new();
        for r in &self.references {
            if !nodes.contains(&r.node.as_str()) {
                nodes.push(r.node.as_str());
            }
        }
        nodes
    }
}

/// Closed per-kind configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeSpec {
    Network(network::NetworkSpec),
    Bastion(network::BastionSpec),
    Cluster(network::ClusterSpec),
    Repository(registry::RepositorySpec),
    Service(service::ServiceSpec),
    Database(database::DatabaseSpec),
    Cache(cache::CacheSpec),
    Bucket(storage::BucketSpec),
    Distribution(distribution::DistributionSpec),
    Zone(dns::ZoneSpec),
    Record(dns::RecordSpec),
}

impl NodeSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Network(_) => ResourceKind::Network,
            Self::Bastion(_) => ResourceKind::BastionHost,
            Self::Cluster(_) => ResourceKind::ComputeCluster,
            Self::Repository(_) => ResourceKind::ContainerRegistry,
            Self::Service(_) => ResourceKind::ComputeService,
            Self::Database(_) => ResourceKind::RelationalStore,
            Self::Cache(_) => ResourceKind::CacheCluster,
            Self::Bucket(_) => ResourceKind::ObjectStore,
            Self::Distribution(_) => ResourceKind::CdnDistribution,
            Self::Zone(_) => ResourceKind::DnsZone,
            Self::Record(_) => ResourceKind::DnsRecord,
        }
    }
}

// ============================================================================
// Security groups (shared by several kinds)
// ============================================================================

/// Firewall attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    pub vpc: OutputRef,
    pub ingress: Vec<IngressRule>,
    pub egress: EgressPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub peer: Peer,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Peer {
    Cidr(String),
    SecurityGroup(OutputRef),
}

/// Outbound policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EgressPolicy {
    /// Provider default: all outbound traffic.
    AllowAll,
    /// Explicit all-TCP to 0.0.0.0/0 on top of the default.
    AllowAllTcpAnywhere,
}

/// Ingress on `port` from every CIDR plus every allowed security group.
pub(crate) fn port_ingress(cidrs: &[String], groups: &[OutputRef], port: u16) -> Vec<IngressRule> {
    cidrs
        .iter()
        .map(|c| IngressRule {
            peer: Peer::Cidr(c.clone()),
            port,
        })
        .chain(groups.iter().map(|g| IngressRule {
            peer: Peer::SecurityGroup(g.clone()),
            port,
        }))
        .collect()
}
