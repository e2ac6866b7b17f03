//! Network, bastion host and container cluster.

use super::*;
use crate::core::error::ValidationError;
use crate::core::types::NetworkProfile;
use std::net::Ipv4Addr;

/// Smallest subnet the provider accepts.
const MAX_SUBNET_MASK: u8 = 28;
const MAX_AVAILABILITY_ZONES: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub cidr: String,
    pub availability_zones: u8,
    pub subnets: Vec<SubnetSpec>,
    /// Interface endpoints (private DNS inside the VPC)
    pub interface_endpoints: Vec<String>,
    /// Gateway endpoints, attached to the private subnets
    pub gateway_endpoints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub name: String,
    pub tier: SubnetTier,
    pub cidr: String,
    pub zone_index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetTier {
    Public,
    /// Private with outbound access through NAT
    Private,
}

/// Outputs of a network node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub node: NodeId,
    pub vpc_id: OutputRef,
    pub public_subnets: OutputRef,
    pub private_subnets: OutputRef,
    /// Known at plan time, used for ingress rules
    pub private_subnet_cidrs: Vec<String>,
}

/// Parse `a.b.c.d/p` into its network address and prefix length.
pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8), String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("'{}' is not in a.b.c.d/prefix form", cidr))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| format!("'{}' has an invalid address", cidr))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("'{}' has an invalid prefix", cidr))?;
    if prefix > 32 {
        return Err(format!("'{}' prefix exceeds 32", cidr));
    }
    let host_bits = u32::from(addr) & host_mask(prefix);
    if host_bits != 0 {
        return Err(format!("'{}' has host bits set", cidr));
    }
    Ok((addr, prefix))
}

fn host_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        u32::MAX
    } else {
        u32::MAX >> prefix
    }
}

/// Carve `count` consecutive subnets of length `mask` out of `cidr`.
pub fn carve_subnets(cidr: &str, mask: u8, count: u32) -> Result<Vec<String>, String> {
    let (base, prefix) = parse_cidr(cidr)?;
    if mask <= prefix || mask > MAX_SUBNET_MASK {
        return Err(format!(
            "subnet mask /{} must be longer than /{} and at most /{}",
            mask, prefix, MAX_SUBNET_MASK
        ));
    }
    let available = 1u64 << (mask - prefix);
    if u64::from(count) > available {
        return Err(format!(
            "{} holds {} subnets of /{}, {} needed",
            cidr, available, mask, count
        ));
    }
    let step = 1u32 << (32 - mask);
    let base = u32::from(base);
    Ok((0..count)
        .map(|i| format!("{}/{}", Ipv4Addr::from(base + i * step), mask))
        .collect())
}

/// Declare the VPC: one public and one private subnet per zone, plus
/// endpoints so private tasks can pull images and ship logs.
pub fn network(
    scope: &Scope,
    profile: &NetworkProfile,
) -> Result<(ResourceNode, NetworkHandle), ValidationError> {
    let id = scope.node_id("Network");
    let azs = profile.availability_zones;
    if azs == 0 || azs > MAX_AVAILABILITY_ZONES {
        return Err(ValidationError::out_of_range(
            &id,
            "availability_zones",
            format!("must be between 1 and {}, got {}", MAX_AVAILABILITY_ZONES, azs),
        ));
    }
    let cidrs = carve_subnets(&profile.cidr, profile.cidr_mask, u32::from(azs) * 2)
        .map_err(|e| ValidationError::out_of_range(&id, "cidr", e))?;

    let mut subnets = Vec::new();
    for (i, cidr) in cidrs.iter().enumerate() {
        let zone_index = (i % usize::from(azs)) as u8;
        let tier = if i < usize::from(azs) {
            SubnetTier::Public
        } else {
            SubnetTier::Private
        };
        let name = match tier {
            SubnetTier::Public => format!("Public{}", zone_index + 1),
            SubnetTier::Private => format!("Private{}", zone_index + 1),
        };
        subnets.push(SubnetSpec {
            name,
            tier,
            cidr: cidr.clone(),
            zone_index,
        });
    }

    let private_subnet_cidrs = subnets
        .iter()
        .filter(|s| s.tier == SubnetTier::Private)
        .map(|s| s.cidr.clone())
        .collect();

    let spec = NetworkSpec {
        cidr: profile.cidr.clone(),
        availability_zones: azs,
        subnets,
        interface_endpoints: vec!["ecr.api".to_string(), "ecr.dkr".to_string(), "logs".to_string()],
        gateway_endpoints: vec!["s3".to_string()],
    };

    let handle = NetworkHandle {
        node: id.clone(),
        vpc_id: OutputRef::new(&id, "vpc_id"),
        public_subnets: OutputRef::new(&id, "public_subnet_ids"),
        private_subnets: OutputRef::new(&id, "private_subnet_ids"),
        private_subnet_cidrs,
    };
    let node = ResourceNode::new(id, scope, NodeSpec::Network(spec), vec![]);
    Ok((node, handle))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BastionSpec {
    pub instance_type: String,
    pub subnets: OutputRef,
    pub security_group: SecurityGroupSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BastionHandle {
    pub node: NodeId,
    pub security_group_id: OutputRef,
}

/// Declare the bastion host operators tunnel through to reach the stores.
pub fn bastion(
    scope: &Scope,
    network: Option<&NetworkHandle>,
) -> Result<(ResourceNode, BastionHandle), ValidationError> {
    let id = scope.node_id("Bastion");
    let network = network.ok_or_else(|| ValidationError::missing(&id, "network"))?;
    let spec = BastionSpec {
        instance_type: "t3.micro".to_string(),
        subnets: network.private_subnets.clone(),
        security_group: SecurityGroupSpec {
            vpc: network.vpc_id.clone(),
            ingress: vec![],
            egress: EgressPolicy::AllowAll,
        },
    };
    let handle = BastionHandle {
        node: id.clone(),
        security_group_id: OutputRef::new(&id, "security_group_id"),
    };
    let refs = vec![network.vpc_id.clone(), network.private_subnets.clone()];
    Ok((ResourceNode::new(id, scope, NodeSpec::Bastion(spec), refs), handle))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub vpc: OutputRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHandle {
    pub node: NodeId,
    pub cluster_arn: OutputRef,
}

/// Declare the container cluster services are scheduled on.
pub fn cluster(
    scope: &Scope,
    network: Option<&NetworkHandle>,
) -> Result<(ResourceNode, ClusterHandle), ValidationError> {
    let id = scope.node_id("EcsCluster");
    let network = network.ok_or_else(|| ValidationError::missing(&id, "network"))?;
    let spec = ClusterSpec {
        vpc: network.vpc_id.clone(),
    };
    let handle = ClusterHandle {
        node: id.clone(),
        cluster_arn: OutputRef::new(&id, "cluster_arn"),
    };
    let refs = vec![network.vpc_id.clone()];
    Ok((ResourceNode::new(id, scope, NodeSpec::Cluster(spec), refs), handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        Scope::staged("acme-staging-BaseStack", "acme", "staging")
    }

    fn profile() -> NetworkProfile {
        NetworkProfile {
            cidr: "10.0.0.0/16".to_string(),
            cidr_mask: 24,
            availability_zones: 2,
        }
    }

    #[test]
    fn test_network_parse_cidr() {
        let (addr, prefix) = parse_cidr("10.0.0.0/16").unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(prefix, 16);
        assert!(parse_cidr("10.0.0.0").is_err());
        assert!(parse_cidr("10.0.0.300/16").is_err());
        assert!(parse_cidr("10.0.0.0/33").is_err());
        assert!(parse_cidr("10.0.1.0/16").unwrap_err().contains("host bits"));
    }

    #[test]
    fn test_network_carve_subnets() {
        let subnets = carve_subnets("10.0.0.0/16", 24, 4).unwrap();
        assert_eq!(
            subnets,
            vec!["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24", "10.0.3.0/24"]
        );
    }

    #[test]
    fn test_network_carve_too_many() {
        let err = carve_subnets("10.0.0.0/26", 28, 8).unwrap_err();
        assert!(err.contains("4 subnets"));
        assert!(carve_subnets("10.0.0.0/24", 16, 1).is_err());
    }

    #[test]
    fn test_network_public_then_private() {
        let (node, handle) = network(&scope(), &profile()).unwrap();
        assert_eq!(node.kind(), ResourceKind::Network);
        assert_eq!(handle.private_subnet_cidrs, vec!["10.0.2.0/24", "10.0.3.0/24"]);
        match &node.spec {
            NodeSpec::Network(spec) => {
                assert_eq!(spec.subnets.len(), 4);
                assert_eq!(spec.subnets[0].tier, SubnetTier::Public);
                assert_eq!(spec.subnets[0].name, "Public1");
                assert_eq!(spec.subnets[3].name, "Private2");
                assert_eq!(spec.gateway_endpoints, vec!["s3"]);
                assert_eq!(spec.interface_endpoints.len(), 3);
            }
            other => panic!("unexpected spec: {:?}", other),
        }
        assert!(node.references.is_empty());
    }

    #[test]
    fn test_network_zero_zones() {
        let mut p = profile();
        p.availability_zones = 0;
        let err = network(&scope(), &p).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { field: "availability_zones", .. }));
    }

    #[test]
    fn test_network_bastion_requires_network() {
        let err = bastion(&scope(), None).unwrap_err();
        assert_eq!(
            err,
            ValidationError::missing("acme-staging-BaseStack/Bastion", "network")
        );
    }

    #[test]
    fn test_network_cluster_references_vpc() {
        let (_, net) = network(&scope(), &profile()).unwrap();
        let (node, handle) = cluster(&scope(), Some(&net)).unwrap();
        assert_eq!(node.referenced_nodes(), vec![net.node.as_str()]);
        assert_eq!(handle.cluster_arn.output, "cluster_arn");
    }
}
