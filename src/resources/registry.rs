//! Container image repositories, one per service.

use super::*;
use crate::core::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySpec {
    pub repository_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryHandle {
    pub node: NodeId,
    pub service: String,
    pub repository_uri: OutputRef,
}

/// Declare the repository `{project}/{service}`.
pub fn repository(
    scope: &Scope,
    project: &str,
    service: &str,
) -> Result<(ResourceNode, RepositoryHandle), ValidationError> {
    let id = scope.node_id(&format!("{}Repository", service));
    if service.is_empty() {
        return Err(ValidationError::out_of_range(&id, "service", "must not be empty"));
    }
    let spec = RepositorySpec {
        repository_name: format!("{}/{}", project, service),
    };
    let handle = RepositoryHandle {
        node: id.clone(),
        service: service.to_string(),
        repository_uri: OutputRef::new(&id, "repository_uri"),
    };
    Ok((ResourceNode::new(id, scope, NodeSpec::Repository(spec), vec![]), handle))
}
