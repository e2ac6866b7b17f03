//! Composer: the fixed deployment, built from one stage profile.
//!
//! Six kinds of stack wired in one direction:
//!
//! ```text
//! Common <- Base <- Storage
//! {Service}Stack <- Common, Base (+ Storage when the service attaches it)
//! Distribution <- Common, Storage, every service stack
//! ```
//!
//! Every node edge that crosses stacks must follow the stack edges.

use super::error::{Error, ValidationError};
use super::graph::{ancestors, topological_order, CompositionGraph};
use super::types::{Context, RouteHost, StackEntry, StageProfile, ASSETS_ORIGIN};
use crate::resources::cache::{self, CacheInput};
use crate::resources::database::{self, DatabaseInput};
use crate::resources::distribution::{self, DistributionInput, Origin};
use crate::resources::service::{self, ServiceHandle, ServiceInput, StorageAttachment};
use crate::resources::{dns, network, registry, storage, NodeId, ResourceKind, Scope};
use indexmap::IndexMap;

/// A validated, frozen deployment.
#[derive(Debug, Clone)]
pub struct Deployment {
    /// Stacks in deployment order
    pub stacks: Vec<StackEntry>,
    pub graph: CompositionGraph,
    /// Nodes in emission order
    pub order: Vec<NodeId>,
}

impl Deployment {
    /// Declared dependencies of a node.
    pub fn dependencies(&self, id: &str) -> &[NodeId] {
        self.graph.dependencies(id)
    }
}

/// Stack names for one context.
struct StackNames {
    common: String,
    base: String,
    storage: String,
    services: IndexMap<String, String>,
    distribution: String,
}

impl StackNames {
    fn new(ctx: &Context, profile: &StageProfile) -> Self {
        Self {
            common: ctx.common_stack_name("CommonStack"),
            base: ctx.staged_stack_name("BaseStack"),
            storage: ctx.staged_stack_name("StorageStack"),
            services: profile
                .settings
                .services
                .keys()
                .map(|svc| {
                    let stack = format!("{}Stack", service::construct_name(svc));
                    (svc.clone(), ctx.staged_stack_name(&stack))
                })
                .collect(),
            distribution: ctx.staged_stack_name("DistributionStack"),
        }
    }

    /// Stack -> stacks it deploys after.
    fn edges(&self, profile: &StageProfile) -> IndexMap<String, Vec<String>> {
        let mut edges = IndexMap::new();
        edges.insert(self.common.clone(), vec![]);
        edges.insert(self.base.clone(), vec![self.common.clone()]);
        edges.insert(self.storage.clone(), vec![self.base.clone()]);
        let mut distribution_deps = vec![self.common.clone(), self.storage.clone()];
        for (svc, stack) in &self.services {
            let mut deps = vec![self.common.clone(), self.base.clone()];
            if profile.settings.services[svc].attach_storage {
                deps.push(self.storage.clone());
            }
            edges.insert(stack.clone(), deps);
            distribution_deps.push(stack.clone());
        }
        edges.insert(self.distribution.clone(), distribution_deps);
        edges
    }
}

/// Build every node of the deployment from `profile` and validate the graph.
pub fn compose(ctx: &Context, profile: &StageProfile) -> Result<Deployment, Error> {
    tracing::info!(stage = %ctx.stage, project = %ctx.project, "composing deployment");
    let settings = &profile.settings;
    let names = StackNames::new(ctx, profile);
    let stack_edges = names.edges(profile);
    let stack_order = topological_order(&stack_edges)?;

    let project = ctx.project.as_str();
    let stage = ctx.stage.as_str();
    let common = Scope::shared(&names.common, project);
    let base = Scope::staged(&names.base, project, stage);
    let store = Scope::staged(&names.storage, project, stage);
    let dist = Scope::staged(&names.distribution, project, stage);

    let mut graph = CompositionGraph::new();

    // Common: hosted zones and one image repository per service.
    let (zone_nodes, zones) = dns::hosted_zones(&common, &ctx.base_domain)?;
    for node in zone_nodes {
        // The delegation record lives in the apex zone and names the dev zone.
        let deps = match node.kind() {
            ResourceKind::DnsRecord => vec![zones.public.node.clone(), zones.dev.node.clone()],
            _ => vec![],
        };
        graph.add_node(node, &deps)?;
    }
    let zone = zones.zone_for(&settings.domain)?;

    let mut repositories = IndexMap::new();
    for svc in settings.services.keys() {
        let (node, handle) = registry::repository(&common, project, svc)?;
        graph.add_node(node, &[])?;
        repositories.insert(svc.clone(), handle);
    }

    // Base: network, bastion, cluster, stage records.
    let (node, net) = network::network(&base, &settings.network)?;
    graph.add_node(node, &[])?;
    let (node, bastion) = network::bastion(&base, Some(&net))?;
    graph.add_node(node, &[net.node.clone()])?;
    let (node, cluster) = network::cluster(&base, Some(&net))?;
    graph.add_node(node, &[net.node.clone()])?;
    for node in dns::profile_records(&base, zone, &settings.dns.records)? {
        graph.add_node(node, &[zone.node.clone()])?;
    }

    // Storage: bucket, relational store, cache.
    let (node, bucket) = storage::bucket(&store, &format!("sf-{}-{}", project, stage))?;
    graph.add_node(node, &[])?;
    let (node, db) = database::relational_store(
        &store,
        DatabaseInput {
            network: Some(&net),
            allow_from: vec![&bastion],
            database_name: format!("{}_{}", project, stage),
            port: settings.database.port,
            profile: &settings.database,
        },
    )?;
    graph.add_node(node, &[net.node.clone(), bastion.node.clone()])?;
    let (node, redis) = cache::cache_cluster(
        &store,
        CacheInput {
            network: Some(&net),
            allow_from: vec![&bastion],
            cluster_name: format!("{}-{}", project, stage),
            port: settings.cache.port,
            profile: &settings.cache,
        },
    )?;
    graph.add_node(node, &[net.node.clone(), bastion.node.clone()])?;

    // One stack per service.
    let mut services: IndexMap<String, ServiceHandle> = IndexMap::new();
    for (svc, svc_profile) in &settings.services {
        let scope = Scope::staged(&names.services[svc], project, stage);
        let repository = repositories.get(svc);
        let mut deps = vec![net.node.clone(), cluster.node.clone()];
        deps.extend(repository.map(|r| r.node.clone()));
        let attachment = if svc_profile.attach_storage {
            deps.extend([bucket.node.clone(), db.node.clone(), redis.node.clone()]);
            Some(StorageAttachment {
                bucket: &bucket,
                database: &db,
                cache: &redis,
            })
        } else {
            None
        };
        let (node, handle) = service::compute_service(
            &scope,
            ServiceInput {
                service: svc,
                project,
                stage,
                version: &ctx.version,
                secrets_name: &profile.secrets_name,
                profile: svc_profile,
                custom_header: &settings.security.custom_header,
                network: Some(&net),
                cluster: Some(&cluster),
                repository,
                storage: attachment,
            },
        )?;
        graph.add_node(node, &deps)?;
        services.insert(svc.clone(), handle);
    }

    // Distribution: one CDN per route table, each with an alias record.
    for (name, route) in &settings.distributions {
        let mut origins = IndexMap::new();
        let mut deps = Vec::new();
        for origin in route.required_origins() {
            if origin == ASSETS_ORIGIN {
                deps.push(bucket.node.clone());
                origins.insert(origin, Origin::Bucket(&bucket));
            } else if let Some(handle) = services.get(&origin) {
                deps.push(handle.node.clone());
                origins.insert(origin, Origin::Service(handle));
            }
        }
        let domain = match route.host {
            RouteHost::Domain => settings.domain.as_str(),
            RouteHost::BackendDomain => settings.backend_domain.as_str(),
        };
        let (node, handle) = distribution::cdn_distribution(
            &dist,
            DistributionInput {
                name,
                route,
                domain,
                certificate_arn: settings.certificate_arn.as_deref(),
                security: &settings.security,
                origins,
            },
        )?;
        graph.add_node(node, &deps)?;
        let alias = dns::alias_record(&dist, &format!("{}Alias", name), zone, &handle);
        graph.add_node(alias, &[zone.node.clone(), handle.node.clone()])?;
    }

    check_stack_edges(&graph, &stack_edges)?;
    let order = graph.validate()?;

    let stacks = stack_order
        .iter()
        .map(|name| StackEntry {
            name: name.clone(),
            depends_on: stack_edges.get(name).cloned().unwrap_or_default(),
            shared: *name == names.common,
        })
        .collect::<Vec<_>>();

    tracing::info!(
        stage = %ctx.stage,
        stacks = stacks.len(),
        nodes = order.len(),
        "deployment composed"
    );
    Ok(Deployment { stacks, graph, order })
}

/// Every node edge must stay in one stack or follow the stack DAG.
fn check_stack_edges(
    graph: &CompositionGraph,
    stack_edges: &IndexMap<String, Vec<String>>,
) -> Result<(), ValidationError> {
    for node in graph.nodes() {
        let allowed = ancestors(stack_edges, &node.stack);
        for dep in graph.dependencies(&node.id) {
            let Some(dep_node) = graph.node(dep) else {
                continue;
            };
            if dep_node.stack != node.stack && !allowed.contains(&dep_node.stack) {
                return Err(ValidationError::CrossStack {
                    node: node.id.clone(),
                    stack: node.stack.clone(),
                    dependency_stack: dep_node.stack.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ConfigurationError;
    use crate::core::graph::GraphState;
    use crate::core::stages::StageConfigTable;
    use crate::core::types::StageId;
    use crate::resources::distribution::OriginResponse;
    use crate::resources::service::ListenerAction;
    use crate::resources::NodeSpec;

    fn context(stage: &str) -> Context {
        Context {
            stage: StageId::parse(stage).unwrap(),
            project: "acme".to_string(),
            version: "v1".to_string(),
            base_domain: "example.com".to_string(),
            account: None,
            region: None,
        }
    }

    fn compose_stage(stage: &str) -> Deployment {
        let ctx = context(stage);
        let profile = StageConfigTable::builtin().resolve(&ctx.stage, &ctx.project).unwrap();
        compose(&ctx, &profile).unwrap()
    }

    #[test]
    fn test_composer_stack_order() {
        let d = compose_stage("staging");
        let names: Vec<&str> = d.stacks.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "acme-CommonStack",
                "acme-staging-BaseStack",
                "acme-staging-FrontendStack",
                "acme-staging-StorageStack",
                "acme-staging-BackendStack",
                "acme-staging-DistributionStack",
            ]
        );
        assert!(d.stacks[0].shared);
        let backend = d.stacks.iter().find(|s| s.name == "acme-staging-BackendStack").unwrap();
        assert!(backend.depends_on.contains(&"acme-staging-StorageStack".to_string()));
        let frontend = d.stacks.iter().find(|s| s.name == "acme-staging-FrontendStack").unwrap();
        assert!(!frontend.depends_on.contains(&"acme-staging-StorageStack".to_string()));
    }

    #[test]
    fn test_composer_graph_frozen_and_ordered() {
        let d = compose_stage("staging");
        assert_eq!(d.graph.state(), GraphState::Frozen);
        let pos = |id: &str| d.order.iter().position(|o| o == id).unwrap();
        for (from, to) in d.graph.edges() {
            assert!(pos(&from) < pos(&to), "{} must precede {}", from, to);
        }
        assert!(pos("acme-staging-BaseStack/Network") < pos("acme-staging-StorageStack/AuroraMysql"));
        assert!(pos("acme-staging-BackendStack/Backend") < pos("acme-staging-DistributionStack/BackendDistribution"));
    }

    #[test]
    fn test_composer_tagging_contract() {
        let d = compose_stage("production");
        for node in d.graph.nodes() {
            assert_eq!(node.tags["Project"], "acme");
            if node.stack == "acme-CommonStack" {
                assert!(!node.tags.contains_key("Stage"), "{}", node.id);
            } else {
                assert_eq!(node.tags["Stage"], "production");
            }
        }
    }

    #[test]
    fn test_composer_node_kinds() {
        let d = compose_stage("staging");
        let count = |kind: ResourceKind| d.graph.nodes().filter(|n| n.kind() == kind).count();
        assert_eq!(count(ResourceKind::ContainerRegistry), 2);
        assert_eq!(count(ResourceKind::ComputeService), 2);
        assert_eq!(count(ResourceKind::CdnDistribution), 2);
        assert_eq!(count(ResourceKind::DnsZone), 2);
        // NS delegation plus two alias records
        assert_eq!(count(ResourceKind::DnsRecord), 3);
        assert_eq!(count(ResourceKind::RelationalStore), 1);
        assert_eq!(count(ResourceKind::CacheCluster), 1);
    }

    #[test]
    fn test_composer_deterministic() {
        let a = compose_stage("staging");
        let b = compose_stage("staging");
        assert_eq!(a.order, b.order);
        assert_eq!(a.graph.edges(), b.graph.edges());
        let specs_a: Vec<&NodeSpec> = a.graph.ordered_nodes().map(|n| &n.spec).collect();
        let specs_b: Vec<&NodeSpec> = b.graph.ordered_nodes().map(|n| &n.spec).collect();
        assert_eq!(specs_a, specs_b);
    }

    #[test]
    fn test_composer_distribution_header_gate() {
        let d = compose_stage("staging");
        let node = d.graph.node("acme-staging-DistributionStack/Distribution").unwrap();
        let NodeSpec::Distribution(spec) = &node.spec else {
            panic!("expected distribution");
        };
        assert_eq!(
            spec.default_response(&[]),
            OriginResponse::Listener(&ListenerAction::forbidden())
        );
        assert!(matches!(
            spec.default_response(&[("x-pre-shared-key", "change-me-pre-shared-key")]),
            OriginResponse::Listener(ListenerAction::Forward { .. })
        ));
    }

    #[test]
    fn test_composer_unknown_domain() {
        let ctx = context("staging");
        let mut profile = StageConfigTable::builtin().resolve(&ctx.stage, &ctx.project).unwrap();
        profile.settings.domain = "other.org".to_string();
        let err = compose(&ctx, &profile).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::NoHostedZone { .. })
        ));
    }

    #[test]
    fn test_composer_invalid_service_rejected() {
        let ctx = context("staging");
        let mut profile = StageConfigTable::builtin().resolve(&ctx.stage, &ctx.project).unwrap();
        if let Some(backend) = profile.settings.services.get_mut("backend") {
            backend.min_capacity = 3;
        }
        let err = compose(&ctx, &profile).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::OutOfRange { field: "min_capacity", .. })
        ));
    }

    #[test]
    fn test_composer_cross_stack_edge_rejected() {
        let scope = Scope::staged("acme-staging-BaseStack", "acme", "staging");
        let other = Scope::staged("acme-staging-StorageStack", "acme", "staging");
        let (upstream, _) = storage::bucket(&other, "sf-acme-staging").unwrap();
        let (downstream, _) = registry::repository(&scope, "acme", "backend").unwrap();

        let mut graph = CompositionGraph::new();
        graph.add_node(upstream, &[]).unwrap();
        graph
            .add_node(downstream, &["acme-staging-StorageStack/Bucket".to_string()])
            .unwrap();
        let edges = IndexMap::from([
            ("acme-staging-BaseStack".to_string(), vec![]),
            (
                "acme-staging-StorageStack".to_string(),
                vec!["acme-staging-BaseStack".to_string()],
            ),
        ]);
        let err = check_stack_edges(&graph, &edges).unwrap_err();
        assert!(matches!(err, ValidationError::CrossStack { .. }));
    }
}
