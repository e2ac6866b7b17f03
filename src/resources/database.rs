//! Serverless MySQL-compatible relational store.

use super::network::{BastionHandle, NetworkHandle};
use super::*;
use crate::core::error::ValidationError;
use crate::core::types::DatabaseProfile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub engine: String,
    pub engine_version: String,
    pub enable_data_api: bool,
    pub database_name: String,
    pub port: u16,
    pub subnets: OutputRef,
    pub security_group: SecurityGroupSpec,
    pub parameters: IndexMap<String, String>,
    pub scaling: ServerlessScaling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerlessScaling {
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub auto_pause_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHandle {
    pub node: NodeId,
    pub endpoint_address: OutputRef,
    pub endpoint_port: OutputRef,
    /// Generated credentials: host, port, username, password, dbname
    pub secret: OutputRef,
}

/// Inputs of [`relational_store`].
pub struct DatabaseInput<'a> {
    pub network: Option<&'a NetworkHandle>,
    /// Extra security groups allowed in on the store port
    pub allow_from: Vec<&'a BastionHandle>,
    pub database_name: String,
    pub port: u16,
    pub profile: &'a DatabaseProfile,
}

/// Declare the relational store inside the private subnets.
pub fn relational_store(
    scope: &Scope,
    input: DatabaseInput,
) -> Result<(ResourceNode, DatabaseHandle), ValidationError> {
    let id = scope.node_id("AuroraMysql");
    let network = input
        .network
        .ok_or_else(|| ValidationError::missing(&id, "network"))?;
    check_store_port(&id, input.port, input.profile.port)?;
    check_capacity(&id, input.profile.min_capacity, input.profile.max_capacity)?;
    if input.database_name.is_empty() {
        return Err(ValidationError::out_of_range(&id, "database_name", "must not be empty"));
    }

    let groups: Vec<OutputRef> = input
        .allow_from
        .iter()
        .map(|b| b.security_group_id.clone())
        .collect();
    tracing::warn!(node = %id, "security group allows all outbound TCP to 0.0.0.0/0");

    let spec = DatabaseSpec {
        engine: "aurora-mysql".to_string(),
        engine_version: "2.08.3".to_string(),
        enable_data_api: true,
        database_name: input.database_name,
        port: input.port,
        subnets: network.private_subnets.clone(),
        security_group: SecurityGroupSpec {
            vpc: network.vpc_id.clone(),
            ingress: port_ingress(&network.private_subnet_cidrs, &groups, input.port),
            egress: EgressPolicy::AllowAllTcpAnywhere,
        },
        parameters: mysql_parameters(),
        scaling: ServerlessScaling {
            min_capacity: input.profile.min_capacity,
            max_capacity: input.profile.max_capacity,
            auto_pause_minutes: input.profile.auto_pause_minutes,
        },
    };

    let handle = DatabaseHandle {
        node: id.clone(),
        endpoint_address: OutputRef::new(&id, "endpoint_address"),
        endpoint_port: OutputRef::new(&id, "endpoint_port"),
        secret: OutputRef::new(&id, "secret_arn"),
    };
    let mut refs = vec![network.vpc_id.clone(), network.private_subnets.clone()];
    refs.extend(groups);
    Ok((ResourceNode::new(id, scope, NodeSpec::Database(spec), refs), handle))
}

/// utf8mb4 everywhere, slow query log on, large index prefixes.
fn mysql_parameters() -> IndexMap<String, String> {
    [
        ("character_set_client", "utf8mb4"),
        ("character_set_connection", "utf8mb4"),
        ("character_set_database", "utf8mb4"),
        ("character_set_results", "utf8mb4"),
        ("character_set_server", "utf8mb4"),
        ("collation_connection", "utf8mb4_bin"),
        ("slow_query_log", "1"),
        ("long_query_time", "1"),
        ("log_output", "FILE"),
        ("innodb_large_prefix", "1"),
        ("innodb_file_format", "Barracuda"),
        ("innodb_file_per_table", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// A store must listen where its profile says it does.
pub(crate) fn check_store_port(node: &str, port: u16, declared: u16) -> Result<(), ValidationError> {
    if port == 0 {
        return Err(ValidationError::out_of_range(node, "port", "must be positive"));
    }
    if port != declared {
        return Err(ValidationError::out_of_range(
            node,
            "port",
            format!("{} does not match the profile port {}", port, declared),
        ));
    }
    Ok(())
}

fn check_capacity(node: &str, min: u32, max: u32) -> Result<(), ValidationError> {
    if min == 0 {
        return Err(ValidationError::out_of_range(node, "min_capacity", "must be positive"));
    }
    if min > max {
        return Err(ValidationError::out_of_range(
            node,
            "min_capacity",
            format!("{} exceeds max_capacity {}", min, max),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::network;
    use crate::core::types::NetworkProfile;

    fn fixtures() -> (Scope, NetworkHandle, BastionHandle, DatabaseProfile) {
        let base = Scope::staged("acme-staging-BaseStack", "acme", "staging");
        let (_, net) = network::network(
            &base,
            &NetworkProfile {
                cidr: "10.0.0.0/16".to_string(),
                cidr_mask: 24,
                availability_zones: 2,
            },
        )
        .unwrap();
        let (_, bastion) = network::bastion(&base, Some(&net)).unwrap();
        let profile = DatabaseProfile {
            port: 3306,
            min_capacity: 1,
            max_capacity: 2,
            auto_pause_minutes: Some(0),
        };
        (
            Scope::staged("acme-staging-StorageStack", "acme", "staging"),
            net,
            bastion,
            profile,
        )
    }

    #[test]
    fn test_database_ingress_from_private_subnets_and_bastion() {
        let (scope, net, bastion, profile) = fixtures();
        let (node, handle) = relational_store(
            &scope,
            DatabaseInput {
                network: Some(&net),
                allow_from: vec![&bastion],
                database_name: "acme_staging".to_string(),
                port: 3306,
                profile: &profile,
            },
        )
        .unwrap();
        match &node.spec {
            NodeSpec::Database(spec) => {
                assert_eq!(spec.security_group.ingress.len(), 3);
                assert_eq!(spec.security_group.egress, EgressPolicy::AllowAllTcpAnywhere);
                assert_eq!(spec.parameters["character_set_server"], "utf8mb4");
                assert_eq!(spec.scaling.max_capacity, 2);
            }
            other => panic!("unexpected spec: {:?}", other),
        }
        let referenced = node.referenced_nodes();
        assert!(referenced.contains(&net.node.as_str()));
        assert!(referenced.contains(&bastion.node.as_str()));
        assert_eq!(handle.secret.output, "secret_arn");
    }

    #[test]
    fn test_database_missing_network() {
        let (scope, _, _, profile) = fixtures();
        let err = relational_store(
            &scope,
            DatabaseInput {
                network: None,
                allow_from: vec![],
                database_name: "acme_staging".to_string(),
                port: 3306,
                profile: &profile,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::MissingDependency { .. }));
    }

    #[test]
    fn test_database_port_must_match_profile() {
        let (scope, net, _, profile) = fixtures();
        let err = relational_store(
            &scope,
            DatabaseInput {
                network: Some(&net),
                allow_from: vec![],
                database_name: "acme_staging".to_string(),
                port: 5432,
                profile: &profile,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not match the profile port 3306"));
    }

    #[test]
    fn test_database_capacity_order() {
        let (scope, net, _, mut profile) = fixtures();
        profile.min_capacity = 4;
        let err = relational_store(
            &scope,
            DatabaseInput {
                network: Some(&net),
                allow_from: vec![],
                database_name: "acme_staging".to_string(),
                port: 3306,
                profile: &profile,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { field: "min_capacity", .. }));
    }
}
