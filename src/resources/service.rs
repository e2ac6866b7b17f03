//! Load-balanced container service with header-gated listener.
//!
//! The load balancer listener denies by default. A single priority-1 rule
//! forwards to the service target group when the request carries the stage's
//! shared-secret header, so only the CDN (which injects it) reaches the service.

use super::cache::CacheHandle;
use super::database::DatabaseHandle;
use super::network::{ClusterHandle, NetworkHandle};
use super::registry::RepositoryHandle;
use super::storage::BucketHandle;
use super::*;
use crate::core::error::ValidationError;
use crate::core::types::{CustomHeader, ServiceProfile};

/// Port the load balancer listens on; the CDN talks HTTP to it.
pub const LISTENER_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub service_name: String,
    pub image: ContainerImage,
    pub port: u16,
    pub cpu: u32,
    pub memory_limit_mib: u32,
    pub environment: IndexMap<String, Param>,
    pub secrets: IndexMap<String, SecretBinding>,
    pub cluster: OutputRef,
    pub subnets: OutputRef,
    pub load_balancer_subnets: OutputRef,
    pub security_group: SecurityGroupSpec,
    pub health_check: HealthCheck,
    pub scaling: AutoScaling,
    pub circuit_breaker_rollback: bool,
    pub log_group: LogGroup,
    pub listener: ListenerPolicy,
    pub bucket_grant: Option<BucketGrant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub repository: OutputRef,
    pub tag: String,
}

/// Where a container secret comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretBinding {
    /// A key of the stage secret document
    Stage { secret_name: String, key: String },
    /// A field of a secret another node generates
    Output { secret: OutputRef, field: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    pub healthy_http_codes: String,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    pub timeout_seconds: u32,
    pub interval_seconds: u32,
}

impl HealthCheck {
    fn http(path: &str) -> Self {
        Self {
            path: path.to_string(),
            healthy_http_codes: "200".to_string(),
            healthy_threshold: 5,
            unhealthy_threshold: 2,
            timeout_seconds: 5,
            interval_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScaling {
    pub desired_count: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub cpu_target_percent: u32,
    pub memory_target_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogGroup {
    pub name: String,
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketGrant {
    pub bucket_arn: OutputRef,
    pub read: bool,
    pub write: bool,
}

// ============================================================================
// Listener policy
// ============================================================================

/// Default action plus priority-ordered rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerPolicy {
    pub port: u16,
    pub default_action: ListenerAction,
    pub rules: Vec<ListenerRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRule {
    pub priority: u32,
    pub condition: HeaderCondition,
    pub action: ListenerAction,
}

/// Matches when the named header carries one of `values`. Names and values
/// both compare case-insensitively, as the load balancer does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderCondition {
    pub header_name: String,
    pub values: Vec<String>,
}

impl HeaderCondition {
    pub fn matches(&self, headers: &[(&str, &str)]) -> bool {
        headers.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case(&self.header_name) && self.values.iter().any(|v| v.eq_ignore_ascii_case(value))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ListenerAction {
    FixedResponse {
        status_code: u16,
        content_type: String,
        body: String,
    },
    Forward {
        target_group: OutputRef,
    },
}

impl ListenerAction {
    pub fn forbidden() -> Self {
        Self::FixedResponse {
            status_code: 403,
            content_type: "text/html".to_string(),
            body: "<h1>403 Forbidden</h1>".to_string(),
        }
    }
}

impl ListenerPolicy {
    /// Deny everything except requests carrying `header`.
    pub fn header_gated(header: &CustomHeader, target_group: OutputRef) -> Self {
        Self {
            port: LISTENER_PORT,
            default_action: ListenerAction::forbidden(),
            rules: vec![ListenerRule {
                priority: 1,
                condition: HeaderCondition {
                    header_name: header.key.clone(),
                    values: vec![header.value.clone()],
                },
                action: ListenerAction::Forward { target_group },
            }],
        }
    }

    /// Action the listener takes for a request with these headers: the
    /// lowest-priority matching rule, else the default.
    pub fn evaluate(&self, headers: &[(&str, &str)]) -> &ListenerAction {
        let mut rules: Vec<&ListenerRule> = self.rules.iter().collect();
        rules.sort_by_key(|r| r.priority);
        rules
            .into_iter()
            .find(|r| r.condition.matches(headers))
            .map(|r| &r.action)
            .unwrap_or(&self.default_action)
    }
}

// ============================================================================
// Constructor
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub node: NodeId,
    pub service: String,
    pub load_balancer_dns: OutputRef,
    pub target_group: OutputRef,
    pub listener: ListenerPolicy,
}

/// Storage a service is wired to.
pub struct StorageAttachment<'a> {
    pub bucket: &'a BucketHandle,
    pub database: &'a DatabaseHandle,
    pub cache: &'a CacheHandle,
}

/// Inputs of [`compute_service`].
pub struct ServiceInput<'a> {
    pub service: &'a str,
    pub project: &'a str,
    pub stage: &'a str,
    pub version: &'a str,
    pub secrets_name: &'a str,
    pub profile: &'a ServiceProfile,
    pub custom_header: &'a CustomHeader,
    pub network: Option<&'a NetworkHandle>,
    pub cluster: Option<&'a ClusterHandle>,
    pub repository: Option<&'a RepositoryHandle>,
    pub storage: Option<StorageAttachment<'a>>,
}

/// Declare a load-balanced container service.
pub fn compute_service(
    scope: &Scope,
    input: ServiceInput,
) -> Result<(ResourceNode, ServiceHandle), ValidationError> {
    let id = scope.node_id(&construct_name(input.service));
    let network = input
        .network
        .ok_or_else(|| ValidationError::missing(&id, "network"))?;
    let cluster = input
        .cluster
        .ok_or_else(|| ValidationError::missing(&id, "cluster"))?;
    let repository = input
        .repository
        .ok_or_else(|| ValidationError::missing(&id, "repository"))?;
    if input.profile.attach_storage && input.storage.is_none() {
        return Err(ValidationError::missing(&id, "storage"));
    }
    check_profile(&id, input.profile)?;

    let p = input.profile;
    let mut refs = vec![
        network.vpc_id.clone(),
        network.private_subnets.clone(),
        network.public_subnets.clone(),
        cluster.cluster_arn.clone(),
        repository.repository_uri.clone(),
    ];

    let mut environment: IndexMap<String, Param> = p
        .environment
        .iter()
        .map(|(k, v)| (k.clone(), Param::literal(v.clone())))
        .collect();
    let mut secrets: IndexMap<String, SecretBinding> = IndexMap::new();
    let mut bucket_grant = None;

    if let Some(storage) = &input.storage {
        environment.insert("PORT".to_string(), Param::literal(p.port.to_string()));
        environment.insert("APP_NAME".to_string(), Param::literal(input.project));
        environment.insert(
            "AWS_S3_BUCKET".to_string(),
            Param::literal(format!("{}/assets", storage.bucket.bucket_name)),
        );
        environment.insert("AWS_S3_REGION".to_string(), Param::Output(storage.bucket.region.clone()));
        environment.insert(
            "QUEUE_HOST".to_string(),
            Param::Output(storage.cache.endpoint_address.clone()),
        );
        environment.insert(
            "QUEUE_PORT".to_string(),
            Param::Output(storage.cache.endpoint_port.clone()),
        );
        for (name, field) in [
            ("DB_HOST", "host"),
            ("DB_PORT", "port"),
            ("DB_USERNAME", "username"),
            ("DB_PASSWORD", "password"),
            ("DB_DATABASE", "dbname"),
        ] {
            secrets.insert(
                name.to_string(),
                SecretBinding::Output {
                    secret: storage.database.secret.clone(),
                    field: field.to_string(),
                },
            );
        }
        bucket_grant = Some(BucketGrant {
            bucket_arn: storage.bucket.bucket_arn.clone(),
            read: true,
            write: true,
        });
        refs.extend([
            storage.bucket.region.clone(),
            storage.bucket.bucket_arn.clone(),
            storage.cache.endpoint_address.clone(),
            storage.cache.endpoint_port.clone(),
            storage.database.secret.clone(),
        ]);
    }

    for key in &p.secrets {
        secrets.insert(
            key.clone(),
            SecretBinding::Stage {
                secret_name: input.secrets_name.to_string(),
                key: key.clone(),
            },
        );
    }

    let target_group = OutputRef::new(&id, "target_group_arn");
    let listener = ListenerPolicy::header_gated(input.custom_header, target_group.clone());

    let spec = ServiceSpec {
        service_name: input.service.to_string(),
        image: ContainerImage {
            repository: repository.repository_uri.clone(),
            tag: input.version.to_string(),
        },
        port: p.port,
        cpu: p.cpu,
        memory_limit_mib: p.memory_limit_mib,
        environment,
        secrets,
        cluster: cluster.cluster_arn.clone(),
        subnets: network.private_subnets.clone(),
        load_balancer_subnets: network.public_subnets.clone(),
        security_group: SecurityGroupSpec {
            vpc: network.vpc_id.clone(),
            ingress: vec![],
            egress: EgressPolicy::AllowAll,
        },
        health_check: HealthCheck::http(&p.health_check_path),
        scaling: AutoScaling {
            desired_count: p.desired_count,
            min_capacity: p.min_capacity,
            max_capacity: p.max_capacity,
            cpu_target_percent: p.scale_on_cpu_target_utilization_percent,
            memory_target_percent: p.scale_on_memory_target_utilization_percent,
        },
        circuit_breaker_rollback: true,
        log_group: LogGroup {
            name: format!("/aws/ecs/{}-{}-{}", input.project, input.stage, input.service),
            retention_days: p.log_retention_days,
        },
        listener: listener.clone(),
        bucket_grant,
    };

    let handle = ServiceHandle {
        node: id.clone(),
        service: input.service.to_string(),
        load_balancer_dns: OutputRef::new(&id, "load_balancer_dns_name"),
        target_group,
        listener,
    };
    Ok((ResourceNode::new(id, scope, NodeSpec::Service(spec), refs), handle))
}

/// `backend` -> `Backend`.
pub fn construct_name(service: &str) -> String {
    let mut chars = service.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn check_profile(node: &str, p: &ServiceProfile) -> Result<(), ValidationError> {
    let positive: [(&'static str, u32); 6] = [
        ("port", u32::from(p.port)),
        ("cpu", p.cpu),
        ("memory_limit_mib", p.memory_limit_mib),
        ("desired_count", p.desired_count),
        ("min_capacity", p.min_capacity),
        ("max_capacity", p.max_capacity),
    ];
    for (field, value) in positive {
        if value == 0 {
            return Err(ValidationError::out_of_range(node, field, "must be positive"));
        }
    }
    if p.min_capacity > p.max_capacity {
        return Err(ValidationError::out_of_range(
            node,
            "min_capacity",
            format!("{} exceeds max_capacity {}", p.min_capacity, p.max_capacity),
        ));
    }
    if p.desired_count < p.min_capacity || p.desired_count > p.max_capacity {
        return Err(ValidationError::out_of_range(
            node,
            "desired_count",
            format!(
                "{} is outside [{}, {}]",
                p.desired_count, p.min_capacity, p.max_capacity
            ),
        ));
    }
    for (field, value) in [
        ("scale_on_cpu_target_utilization_percent", p.scale_on_cpu_target_utilization_percent),
        ("scale_on_memory_target_utilization_percent", p.scale_on_memory_target_utilization_percent),
    ] {
        if !(1..=100).contains(&value) {
            return Err(ValidationError::out_of_range(
                node,
                field,
                format!("{} is outside 1..=100", value),
            ));
        }
    }
    if p.log_retention_days == 0 {
        return Err(ValidationError::out_of_range(node, "log_retention_days", "must be positive"));
    }
    Ok(())
}
