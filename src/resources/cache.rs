//! Redis replication group.

use super::database::check_store_port;
use super::network::{BastionHandle, NetworkHandle};
use super::*;
use crate::core::error::ValidationError;
use crate::core::types::CacheProfile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSpec {
    pub description: String,
    pub engine: String,
    pub engine_version: String,
    pub node_type: String,
    pub num_node_groups: u32,
    pub replicas_per_node_group: u32,
    pub port: u16,
    pub preferred_maintenance_window: String,
    pub automatic_failover: bool,
    pub multi_az: bool,
    pub auto_minor_version_upgrade: bool,
    pub subnet_group: CacheSubnetGroup,
    pub parameter_group: CacheParameterGroup,
    pub security_group: SecurityGroupSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSubnetGroup {
    pub description: String,
    pub subnets: OutputRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheParameterGroup {
    pub description: String,
    pub family: String,
    pub properties: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle {
    pub node: NodeId,
    pub endpoint_address: OutputRef,
    pub endpoint_port: OutputRef,
}

/// Inputs of [`cache_cluster`].
pub struct CacheInput<'a> {
    pub network: Option<&'a NetworkHandle>,
    pub allow_from: Vec<&'a BastionHandle>,
    pub cluster_name: String,
    pub port: u16,
    pub profile: &'a CacheProfile,
}

/// Declare a multi-AZ replication group with automatic failover.
pub fn cache_cluster(
    scope: &Scope,
    input: CacheInput,
) -> Result<(ResourceNode, CacheHandle), ValidationError> {
    let id = scope.node_id("Redis");
    let network = input
        .network
        .ok_or_else(|| ValidationError::missing(&id, "network"))?;
    check_store_port(&id, input.port, input.profile.port)?;
    if input.profile.num_node_groups == 0 {
        return Err(ValidationError::out_of_range(&id, "num_node_groups", "must be positive"));
    }
    // Automatic failover needs a replica to promote.
    if input.profile.replicas_per_node_group == 0 {
        return Err(ValidationError::out_of_range(
            &id,
            "replicas_per_node_group",
            "must be positive when automatic failover is on",
        ));
    }
    if input.profile.node_type.is_empty() {
        return Err(ValidationError::out_of_range(&id, "node_type", "must not be empty"));
    }

    let groups: Vec<OutputRef> = input
        .allow_from
        .iter()
        .map(|b| b.security_group_id.clone())
        .collect();
    tracing::warn!(node = %id, "security group allows all outbound TCP to 0.0.0.0/0");

    let name = input.cluster_name;
    let spec = CacheSpec {
        description: format!("{}-redis", name),
        engine: "redis".to_string(),
        engine_version: "6.2".to_string(),
        node_type: input.profile.node_type.clone(),
        num_node_groups: input.profile.num_node_groups,
        replicas_per_node_group: input.profile.replicas_per_node_group,
        port: input.port,
        preferred_maintenance_window: input.profile.preferred_maintenance_window.clone(),
        automatic_failover: true,
        multi_az: true,
        auto_minor_version_upgrade: false,
        subnet_group: CacheSubnetGroup {
            description: format!("{}-redis-subnet-group", name),
            subnets: network.private_subnets.clone(),
        },
        parameter_group: CacheParameterGroup {
            description: format!("{}-redis-parameter-group", name),
            family: "redis6.x".to_string(),
            properties: input.profile.properties.clone(),
        },
        security_group: SecurityGroupSpec {
            vpc: network.vpc_id.clone(),
            ingress: port_ingress(&network.private_subnet_cidrs, &groups, input.port),
            egress: EgressPolicy::AllowAllTcpAnywhere,
        },
    };

    let handle = CacheHandle {
        node: id.clone(),
        endpoint_address: OutputRef::new(&id, "configuration_endpoint_address"),
        endpoint_port: OutputRef::new(&id, "configuration_endpoint_port"),
    };
    let mut refs = vec![network.vpc_id.clone(), network.private_subnets.clone()];
    refs.extend(groups);
    Ok((ResourceNode::new(id, scope, NodeSpec::Cache(spec), refs), handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::NetworkProfile;
    use crate::resources::network;

    fn profile() -> CacheProfile {
        CacheProfile {
            port: 6379,
            node_type: "cache.t2.micro".to_string(),
            num_node_groups: 1,
            replicas_per_node_group: 1,
            preferred_maintenance_window: "sat:16:30-sat:17:30".to_string(),
            properties: IndexMap::from([("cluster-enabled".to_string(), "yes".to_string())]),
        }
    }

    fn net() -> NetworkHandle {
        let base = Scope::staged("acme-staging-BaseStack", "acme", "staging");
        network::network(
            &base,
            &NetworkProfile {
                cidr: "10.0.0.0/16".to_string(),
                cidr_mask: 24,
                availability_zones: 2,
            },
        )
        .unwrap()
        .1
    }

    fn scope() -> Scope {
        Scope::staged("acme-staging-StorageStack", "acme", "staging")
    }

    #[test]
    fn test_cache_cluster_spec() {
        let net = net();
        let p = profile();
        let (node, handle) = cache_cluster(
            &scope(),
            CacheInput {
                network: Some(&net),
                allow_from: vec![],
                cluster_name: "acme-staging".to_string(),
                port: 6379,
                profile: &p,
            },
        )
        .unwrap();
        match &node.spec {
            NodeSpec::Cache(spec) => {
                assert_eq!(spec.description, "acme-staging-redis");
                assert_eq!(spec.parameter_group.family, "redis6.x");
                assert_eq!(spec.parameter_group.properties["cluster-enabled"], "yes");
                assert!(spec.automatic_failover && spec.multi_az);
                assert!(!spec.auto_minor_version_upgrade);
                assert_eq!(spec.security_group.ingress.len(), 2);
            }
            other => panic!("unexpected spec: {:?}", other),
        }
        assert_eq!(handle.endpoint_port.output, "configuration_endpoint_port");
    }

    #[test]
    fn test_cache_missing_network() {
        let p = profile();
        let err = cache_cluster(
            &scope(),
            CacheInput {
                network: None,
                allow_from: vec![],
                cluster_name: "acme-staging".to_string(),
                port: 6379,
                profile: &p,
            },
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::missing("acme-staging-StorageStack/Redis", "network"));
    }

    #[test]
    fn test_cache_port_mismatch() {
        let net = net();
        let p = profile();
        let err = cache_cluster(
            &scope(),
            CacheInput {
                network: Some(&net),
                allow_from: vec![],
                cluster_name: "acme-staging".to_string(),
                port: 6380,
                profile: &p,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { field: "port", .. }));
    }

    #[test]
    fn test_cache_failover_needs_replica() {
        let net = net();
        let mut p = profile();
        p.replicas_per_node_group = 0;
        let err = cache_cluster(
            &scope(),
            CacheInput {
                network: Some(&net),
                allow_from: vec![],
                cluster_name: "acme-staging".to_string(),
                port: 6379,
                profile: &p,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("replicas_per_node_group"));
    }
}
